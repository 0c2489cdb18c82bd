use crate::context::ExecutionContext;
use async_trait::async_trait;
use conductor_core::{ConductorError, ConductorResult};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Typed access to per-session state. The kernel serializes writes per
/// session, so implementations may use last-write-wins semantics.
#[async_trait]
pub trait ContextStore: Send + Sync {
    /// Fetch the context for a session, if one exists.
    async fn get(&self, session_id: Uuid) -> ConductorResult<Option<ExecutionContext>>;
    /// Persist the context for its session.
    async fn put(&self, context: &ExecutionContext) -> ConductorResult<()>;
    /// Remove a session's context.
    async fn delete(&self, session_id: Uuid) -> ConductorResult<()>;
    /// Session ids with stored context.
    async fn list(&self) -> ConductorResult<Vec<Uuid>>;
}

/// In-memory store, the default for a single-process deployment.
#[derive(Default)]
pub struct MemoryContextStore {
    contexts: RwLock<HashMap<Uuid, ExecutionContext>>,
}

impl MemoryContextStore {
    /// Create an empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ContextStore for MemoryContextStore {
    async fn get(&self, session_id: Uuid) -> ConductorResult<Option<ExecutionContext>> {
        Ok(self.contexts.read().await.get(&session_id).cloned())
    }

    async fn put(&self, context: &ExecutionContext) -> ConductorResult<()> {
        self.contexts
            .write()
            .await
            .insert(context.session_id, context.clone());
        Ok(())
    }

    async fn delete(&self, session_id: Uuid) -> ConductorResult<()> {
        self.contexts.write().await.remove(&session_id);
        Ok(())
    }

    async fn list(&self) -> ConductorResult<Vec<Uuid>> {
        Ok(self.contexts.read().await.keys().copied().collect())
    }
}

/// File-based store (JSON files on disk). Good enough for single-node use.
pub struct FileContextStore {
    dir: PathBuf,
}

impl FileContextStore {
    /// Create the store, creating `dir` if needed.
    pub async fn new(dir: PathBuf) -> ConductorResult<Self> {
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    fn context_path(&self, session_id: Uuid) -> PathBuf {
        self.dir.join(format!("{session_id}.json"))
    }
}

#[async_trait]
impl ContextStore for FileContextStore {
    async fn get(&self, session_id: Uuid) -> ConductorResult<Option<ExecutionContext>> {
        let path = self.context_path(session_id);
        if !path.exists() {
            return Ok(None);
        }
        let data = tokio::fs::read_to_string(path).await?;
        let context: ExecutionContext = serde_json::from_str(&data)
            .map_err(|e| ConductorError::Context(format!("failed to parse context: {e}")))?;
        Ok(Some(context))
    }

    async fn put(&self, context: &ExecutionContext) -> ConductorResult<()> {
        let path = self.context_path(context.session_id);
        let json = serde_json::to_string_pretty(context)?;
        tokio::fs::write(path, json).await?;
        Ok(())
    }

    async fn delete(&self, session_id: Uuid) -> ConductorResult<()> {
        let path = self.context_path(session_id);
        if path.exists() {
            tokio::fs::remove_file(path).await?;
        }
        Ok(())
    }

    async fn list(&self) -> ConductorResult<Vec<Uuid>> {
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if let Some(name) = entry.file_name().to_str() {
                if let Some(stem) = name.strip_suffix(".json") {
                    if let Ok(id) = Uuid::parse_str(stem) {
                        ids.push(id);
                    }
                }
            }
        }
        Ok(ids)
    }
}
