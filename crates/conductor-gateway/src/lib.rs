//! HTTP surface for the Conductor kernel.
//!
//! Exposes task submission, task cancellation, agent registration, and a
//! WebSocket stream of subtask status transitions for progress reporting.

/// Router construction and request handlers.
pub mod server;

pub use server::GatewayServer;
