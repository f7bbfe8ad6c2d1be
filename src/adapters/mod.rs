//! Protocol adapters.
//!
//! Adapters translate an external protocol's requests into engine operations
//! and the engine's errors back into that protocol's vocabulary. The RPC
//! transport itself is external: a transport hands each decoded request to
//! the adapter together with a [`RequestContext`].
//!
//! Currently implemented:
//! - [`etcd`] - etcd v3 KV, Txn, Compaction and Lease surface

use std::future::Future;
use std::pin::Pin;

use crate::core::error::EtkvResult;

pub mod etcd;

/// Request context propagated through adapter processing.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Auth token presented by the caller, if any.
    pub auth_token: Option<String>,

    /// Per-request deadline overriding the configured default.
    pub timeout_ms: Option<u64>,

    /// Trace ID for distributed tracing.
    pub trace_id: Option<String>,
}

impl RequestContext {
    /// Create an anonymous request context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the auth token.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    /// Set a per-request deadline.
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Set trace context.
    pub fn with_trace(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }
}

/// Adapter lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    /// Adapter is created but not started.
    Created,
    /// Adapter is running and accepting requests.
    Running,
    /// Adapter is shutting down gracefully.
    ShuttingDown,
    /// Adapter has stopped.
    Stopped,
}

impl AdapterState {
    /// Whether requests are still accepted.
    pub fn accepts_requests(self) -> bool {
        matches!(self, Self::Created | Self::Running)
    }
}

/// Adapter health status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterHealth {
    /// Current state.
    pub state: AdapterState,

    /// Total requests processed.
    pub total_requests: u64,

    /// Failed requests.
    pub failed_requests: u64,

    /// Open keepalive sessions.
    pub keepalive_sessions: u64,

    /// Last error message (if any).
    pub last_error: Option<String>,
}

/// Common lifecycle interface for protocol adapters.
pub trait Adapter: Send + Sync {
    /// Get the adapter name (e.g., "etcd").
    fn name(&self) -> &'static str;

    /// Get the current adapter state.
    fn state(&self) -> AdapterState;

    /// Get health status.
    fn health(&self) -> AdapterHealth;

    /// Start accepting requests.
    fn start(&self) -> Pin<Box<dyn Future<Output = EtkvResult<()>> + Send + '_>>;

    /// Stop accepting requests. Requests already in flight finish.
    fn stop(&self) -> Pin<Box<dyn Future<Output = EtkvResult<()>> + Send + '_>>;
}
