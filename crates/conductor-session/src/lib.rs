//! Session context model and context store adapter.
//!
//! The kernel reads and writes per-session state through the
//! [`ContextStore`] trait; writes are serialized per session by the kernel,
//! so last-write-wins stores are acceptable.

/// Per-session execution state.
pub mod context;
/// Context store trait and implementations.
pub mod store;

pub use context::{ExecutionContext, Turn};
pub use store::{ContextStore, FileContextStore, MemoryContextStore};
