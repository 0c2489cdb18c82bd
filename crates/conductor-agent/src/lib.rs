//! Agent contract, registry, and health tracking for the Conductor kernel.
//!
//! Workers are opaque to the kernel: they declare capabilities through an
//! [`AgentDescriptor`] and are invoked through the [`AgentHandler`] trait.
//! The [`AgentRegistry`] owns all mutable per-agent state (load counters,
//! success history, circuit breaker) behind a single synchronization
//! boundary so the router can rank agents from consistent snapshots.
//!
//! # Main types
//!
//! - [`AgentHandler`] — The capability contract every worker implements.
//! - [`AgentDescriptor`] — Static registration record for a worker.
//! - [`AgentRegistry`] — Registration plus health/load/breaker bookkeeping.
//! - [`HttpAgent`] — An [`AgentHandler`] backed by an external HTTP worker.

/// Static agent metadata and health states.
pub mod descriptor;
/// The worker invocation contract.
pub mod handler;
/// HTTP-backed worker handler.
pub mod http;
/// Agent registration and runtime state tracking.
pub mod registry;

pub use descriptor::{AgentDescriptor, AgentSnapshot, HealthState};
pub use handler::AgentHandler;
pub use http::HttpAgent;
pub use registry::{AgentRegistry, BreakerConfig};
