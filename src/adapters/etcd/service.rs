//! etcd service facade.
//!
//! The entry point an external RPC transport calls. Each request goes through:
//! - the adapter state gate (no new work once shutdown begins)
//! - the authenticator, when enabled
//! - the per-request deadline
//! - dispatch to the Revision Index, Transaction Translator, Compactor or
//!   Lease Engine
//! - the response envelope, or the error mapper on failure

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use super::auth::{Access, AuthDisabled, Authenticator};
use super::errors::{to_etcd_error, EtcdError};
use super::header::{Envelope, HeaderBuilder};
use super::keepalive::{self, KeepAliveStream};
use super::kv::{
    CompactionRequest, CompactionResponse, DeleteRangeRequest, DeleteRangeResponse, PutRequest,
    PutResponse, RangeRequest, RangeResponse, ResponseHeader,
};
use super::lease::{
    LeaseGrantRequest, LeaseGrantResponse, LeaseKeepAliveRequest, LeaseKeepAliveResponse,
    LeaseLeasesRequest, LeaseLeasesResponse, LeaseRevokeRequest, LeaseRevokeResponse, LeaseStatus,
    LeaseTimeToLiveRequest, LeaseTimeToLiveResponse,
};
use super::txn::{TxnRequest, TxnResponse, TxnValidationConfig};
use crate::adapters::{Adapter, AdapterHealth, AdapterState, RequestContext};
use crate::backend::Backend;
use crate::core::error::{EtkvError, EtkvResult};
use crate::lease::LeaseEngine;
use crate::mvcc::{Compactor, RevisionIndex, TxnTranslator};

/// Result type of the service facade.
pub type EtcdResult<T> = Result<T, EtcdError>;

/// Configuration for the etcd service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EtcdServiceConfig {
    /// Cluster ID for response headers.
    pub cluster_id: u64,

    /// Member ID for response headers.
    pub member_id: u64,

    /// Raft term for response headers.
    pub raft_term: u64,

    /// Default per-request deadline in milliseconds.
    pub request_timeout_ms: u64,
}

impl Default for EtcdServiceConfig {
    fn default() -> Self {
        Self {
            cluster_id: 1,
            member_id: 1,
            raft_term: 1,
            request_timeout_ms: 5_000,
        }
    }
}

/// Service statistics.
#[derive(Default)]
struct ServiceStats {
    total_requests: AtomicU64,
    failed_requests: AtomicU64,
    keepalive_sessions: AtomicU64,
    last_error: RwLock<Option<String>>,
}

impl ServiceStats {
    fn record_request(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    fn record_error(&self, message: String) {
        self.failed_requests.fetch_add(1, Ordering::Relaxed);
        *self.last_error.write() = Some(message);
    }
}

/// etcd v3 service over the MVCC and lease engines.
pub struct EtcdService<B: Backend> {
    config: EtcdServiceConfig,
    header: HeaderBuilder,
    index: Arc<RevisionIndex<B>>,
    txns: TxnTranslator<B>,
    compactor: Compactor<B>,
    leases: Arc<LeaseEngine<B>>,
    auth: Arc<dyn Authenticator>,
    state: RwLock<AdapterState>,
    stats: ServiceStats,
}

impl<B: Backend> EtcdService<B> {
    /// Create a service with default transaction limits, a compaction batch
    /// of 1000 keys and authentication disabled.
    pub fn new(config: EtcdServiceConfig, index: Arc<RevisionIndex<B>>, leases: Arc<LeaseEngine<B>>) -> Self {
        Self {
            config,
            header: HeaderBuilder::new(config.cluster_id, config.member_id, config.raft_term),
            txns: TxnTranslator::new(index.clone(), TxnValidationConfig::default()),
            compactor: Compactor::new(index.clone(), 1000),
            index,
            leases,
            auth: Arc::new(AuthDisabled),
            state: RwLock::new(AdapterState::Created),
            stats: ServiceStats::default(),
        }
    }

    /// Set transaction validation limits.
    pub fn with_txn_limits(mut self, limits: TxnValidationConfig) -> Self {
        self.txns = TxnTranslator::new(self.index.clone(), limits);
        self
    }

    /// Set the number of keys compacted per backend transaction.
    pub fn with_compaction_batch_size(mut self, batch_size: usize) -> Self {
        self.compactor = Compactor::new(self.index.clone(), batch_size);
        self
    }

    /// Set the authenticator.
    pub fn with_authenticator(mut self, auth: Arc<dyn Authenticator>) -> Self {
        self.auth = auth;
        self
    }

    /// Get the configuration.
    pub fn config(&self) -> &EtcdServiceConfig {
        &self.config
    }

    /// The Revision Index.
    pub fn index(&self) -> &Arc<RevisionIndex<B>> {
        &self.index
    }

    /// The Lease Engine.
    pub fn leases(&self) -> &Arc<LeaseEngine<B>> {
        &self.leases
    }

    async fn authorize(&self, ctx: &RequestContext, access: &[Access]) -> EtkvResult<()> {
        if !self.auth.is_enabled() {
            return Ok(());
        }
        for wanted in access {
            self.auth.authorize(ctx.auth_token.as_deref(), wanted).await?;
        }
        Ok(())
    }

    /// Run one request: gate, authorize, bound by the deadline, then stamp
    /// the envelope or map the error.
    async fn call<T, Fut>(
        &self,
        ctx: &RequestContext,
        op: &'static str,
        access: Vec<Access>,
        work: Fut,
    ) -> EtcdResult<T>
    where
        T: Envelope,
        Fut: Future<Output = EtkvResult<T>>,
    {
        self.stats.record_request();
        let timeout = Duration::from_millis(ctx.timeout_ms.unwrap_or(self.config.request_timeout_ms));
        let deadline = Instant::now() + timeout;
        let guarded = async {
            if !self.state().accepts_requests() {
                return Err(EtkvError::unavailable("server is shutting down"));
            }
            self.authorize(ctx, &access).await?;
            work.await
        };
        let result = match tokio::time::timeout_at(deadline, guarded).await {
            Ok(result) => result,
            Err(_) => Err(EtkvError::DeadlineExceeded),
        };

        match result {
            Ok(mut resp) => {
                let revision = resp.header_mut().revision;
                let header = if revision > 0 {
                    self.header.at(revision)
                } else {
                    self.current_header(deadline).await
                };
                resp.set_header(header);
                Ok(resp)
            }
            Err(err) => Err(self.fail(ctx, op, err, deadline).await),
        }
    }

    /// Header at the current revision, or revision 0 once `deadline` passes.
    async fn current_header(&self, deadline: Instant) -> ResponseHeader {
        match tokio::time::timeout_at(deadline, self.header.current(&self.index)).await {
            Ok(header) => header,
            Err(_) => self.header.at(0),
        }
    }

    async fn fail(
        &self,
        ctx: &RequestContext,
        op: &'static str,
        err: EtkvError,
        deadline: Instant,
    ) -> EtcdError {
        let trace_id = ctx.trace_id.as_deref().unwrap_or("-");
        match &err {
            EtkvError::Internal { .. } => {
                tracing::error!(op, trace_id, error = %err, "request failed on invariant violation")
            }
            EtkvError::Unavailable { .. } | EtkvError::Backend(_) | EtkvError::DeadlineExceeded => {
                tracing::warn!(op, trace_id, error = %err, "request failed")
            }
            _ => tracing::debug!(op, trace_id, error = %err, "request rejected"),
        }
        self.stats.record_error(format!("{}: {}", op, err));
        to_etcd_error(&err).with_header(self.current_header(deadline).await)
    }

    // ========================================================================
    // KV
    // ========================================================================

    pub async fn range(&self, ctx: &RequestContext, req: &RangeRequest) -> EtcdResult<RangeResponse> {
        self.call(ctx, "range", vec![Access::read(req)], self.index.range(req))
            .await
    }

    pub async fn put(&self, ctx: &RequestContext, req: &PutRequest) -> EtcdResult<PutResponse> {
        self.call(ctx, "put", vec![Access::put(req)], self.index.put(req))
            .await
    }

    pub async fn delete_range(
        &self,
        ctx: &RequestContext,
        req: &DeleteRangeRequest,
    ) -> EtcdResult<DeleteRangeResponse> {
        self.call(ctx, "delete_range", vec![Access::delete(req)], self.index.delete_range(req))
            .await
    }

    pub async fn txn(&self, ctx: &RequestContext, req: &TxnRequest) -> EtcdResult<TxnResponse> {
        self.call(ctx, "txn", Access::txn(req), self.txns.execute(req))
            .await
    }

    pub async fn compact(
        &self,
        ctx: &RequestContext,
        req: &CompactionRequest,
    ) -> EtcdResult<CompactionResponse> {
        self.call(ctx, "compact", vec![Access::Admin], self.compactor.compact(req))
            .await
    }

    // ========================================================================
    // Lease
    // ========================================================================

    pub async fn lease_grant(
        &self,
        ctx: &RequestContext,
        req: &LeaseGrantRequest,
    ) -> EtcdResult<LeaseGrantResponse> {
        let work = async {
            let lease = self.leases.grant(req.id, req.ttl).await?;
            Ok(LeaseGrantResponse {
                id: lease.id,
                ttl: lease.ttl,
                ..LeaseGrantResponse::default()
            })
        };
        self.call(ctx, "lease_grant", vec![Access::Lease], work).await
    }

    pub async fn lease_revoke(
        &self,
        ctx: &RequestContext,
        req: &LeaseRevokeRequest,
    ) -> EtcdResult<LeaseRevokeResponse> {
        let work = async {
            let revoked = self.leases.revoke(req.id).await?;
            let mut resp = LeaseRevokeResponse::default();
            resp.header.revision = revoked.revision;
            Ok(resp)
        };
        self.call(ctx, "lease_revoke", vec![Access::Lease], work).await
    }

    pub async fn lease_time_to_live(
        &self,
        ctx: &RequestContext,
        req: &LeaseTimeToLiveRequest,
    ) -> EtcdResult<LeaseTimeToLiveResponse> {
        let work = async {
            let ttl = self.leases.time_to_live(req.id, req.keys).await?;
            Ok(LeaseTimeToLiveResponse {
                id: ttl.id,
                ttl: ttl.ttl,
                granted_ttl: ttl.granted_ttl,
                keys: ttl.keys,
                ..LeaseTimeToLiveResponse::default()
            })
        };
        self.call(ctx, "lease_time_to_live", vec![Access::Lease], work)
            .await
    }

    pub async fn lease_leases(
        &self,
        ctx: &RequestContext,
        _req: &LeaseLeasesRequest,
    ) -> EtcdResult<LeaseLeasesResponse> {
        let work = async {
            let leases = self.leases.leases().await?;
            Ok(LeaseLeasesResponse {
                leases: leases.into_iter().map(|id| LeaseStatus { id }).collect(),
                ..LeaseLeasesResponse::default()
            })
        };
        self.call(ctx, "lease_leases", vec![Access::Lease], work).await
    }

    /// One keepalive round trip. A missing or expired lease answers with
    /// `ttl = 0` rather than an error.
    pub async fn lease_keep_alive(
        &self,
        ctx: &RequestContext,
        req: &LeaseKeepAliveRequest,
    ) -> EtcdResult<LeaseKeepAliveResponse> {
        let work = async {
            let ttl = match self.leases.renew(req.id).await {
                Ok(ttl) => ttl,
                Err(EtkvError::LeaseNotFound { .. } | EtkvError::LeaseExpired { .. }) => 0,
                Err(err) => return Err(err),
            };
            Ok(LeaseKeepAliveResponse {
                id: req.id,
                ttl,
                ..LeaseKeepAliveResponse::default()
            })
        };
        self.call(ctx, "lease_keep_alive", vec![Access::Lease], work)
            .await
    }

    /// Open a keepalive session over an inbound request stream. The session
    /// ends when `inbound` closes, the returned receiver is dropped, or
    /// `cancel` flips to `true`. Ending a session never revokes the lease.
    pub fn lease_keep_alive_stream(
        self: &Arc<Self>,
        ctx: RequestContext,
        inbound: mpsc::Receiver<LeaseKeepAliveRequest>,
        cancel: watch::Receiver<bool>,
    ) -> KeepAliveStream {
        keepalive::spawn(self.clone(), ctx, inbound, cancel)
    }

    pub(crate) fn session_opened(&self) {
        self.stats.keepalive_sessions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn session_closed(&self) {
        self.stats.keepalive_sessions.fetch_sub(1, Ordering::Relaxed);
    }
}

impl<B: Backend> Adapter for EtcdService<B> {
    fn name(&self) -> &'static str {
        "etcd"
    }

    fn state(&self) -> AdapterState {
        *self.state.read()
    }

    fn health(&self) -> AdapterHealth {
        AdapterHealth {
            state: self.state(),
            total_requests: self.stats.total_requests.load(Ordering::Relaxed),
            failed_requests: self.stats.failed_requests.load(Ordering::Relaxed),
            keepalive_sessions: self.stats.keepalive_sessions.load(Ordering::Relaxed),
            last_error: self.stats.last_error.read().clone(),
        }
    }

    fn start(&self) -> Pin<Box<dyn Future<Output = EtkvResult<()>> + Send + '_>> {
        Box::pin(async move {
            // Fail fast if the backend is unreachable.
            let revision = self.index.current_revision().await?;
            *self.state.write() = AdapterState::Running;
            tracing::info!(
                cluster_id = self.config.cluster_id,
                member_id = self.config.member_id,
                revision,
                "etcd service started"
            );
            Ok(())
        })
    }

    fn stop(&self) -> Pin<Box<dyn Future<Output = EtkvResult<()>> + Send + '_>> {
        Box::pin(async move {
            *self.state.write() = AdapterState::ShuttingDown;
            *self.state.write() = AdapterState::Stopped;
            tracing::info!(member_id = self.config.member_id, "etcd service stopped");
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::etcd::errors::{GrpcCode, ERR_KEY_NOT_FOUND};
    use crate::backend::MemoryBackend;
    use crate::core::time::{ManualClock, Tick};
    use crate::lease::LeaseEngineConfig;
    use crate::mvcc::RetryPolicy;

    fn service() -> EtcdService<MemoryBackend> {
        let index = Arc::new(RevisionIndex::new(
            Arc::new(MemoryBackend::new()),
            RetryPolicy::default(),
        ));
        let clock = Arc::new(ManualClock::new(Tick::new(0)));
        let leases = Arc::new(LeaseEngine::new(LeaseEngineConfig::default(), index.clone(), clock));
        EtcdService::new(
            EtcdServiceConfig {
                cluster_id: 11,
                member_id: 22,
                raft_term: 3,
                request_timeout_ms: 1_000,
            },
            index,
            leases,
        )
    }

    #[tokio::test]
    async fn test_headers_are_stamped() {
        let svc = service();
        let ctx = RequestContext::new();
        let put = svc.put(&ctx, &PutRequest::new("k", "v")).await.unwrap();
        assert_eq!(put.header.cluster_id, 11);
        assert_eq!(put.header.member_id, 22);
        assert_eq!(put.header.raft_term, 3);
        assert_eq!(put.header.revision, 2);

        let grant = svc
            .lease_grant(&ctx, &LeaseGrantRequest { ttl: 10, id: 0 })
            .await
            .unwrap();
        assert_eq!(grant.header.revision, 2);
        assert_eq!(grant.header.member_id, 22);
    }

    #[tokio::test]
    async fn test_errors_carry_header() {
        let svc = service();
        let ctx = RequestContext::new();
        let req = PutRequest {
            ignore_value: true,
            ..PutRequest::new("missing", "")
        };
        let err = svc.put(&ctx, &req).await.unwrap_err();
        assert_eq!(err.code, GrpcCode::InvalidArgument);
        assert_eq!(err.message, ERR_KEY_NOT_FOUND);
        assert_eq!(err.header.unwrap().revision, 1);

        let health = svc.health();
        assert_eq!(health.total_requests, 1);
        assert_eq!(health.failed_requests, 1);
        assert!(health.last_error.unwrap().starts_with("put"));
    }

    #[tokio::test]
    async fn test_stopped_service_rejects_requests() {
        let svc = service();
        let ctx = RequestContext::new();
        svc.start().await.unwrap();
        assert_eq!(svc.state(), AdapterState::Running);
        svc.stop().await.unwrap();
        let err = svc.range(&ctx, &RangeRequest::key("k")).await.unwrap_err();
        assert_eq!(err.code, GrpcCode::Unavailable);
    }

    #[tokio::test]
    async fn test_keep_alive_reports_zero_for_missing_lease() {
        let svc = service();
        let resp = svc
            .lease_keep_alive(&RequestContext::new(), &LeaseKeepAliveRequest { id: 77 })
            .await
            .unwrap();
        assert_eq!(resp.id, 77);
        assert_eq!(resp.ttl, 0);
    }

    #[tokio::test]
    async fn test_time_to_live_sentinel() {
        let svc = service();
        let resp = svc
            .lease_time_to_live(
                &RequestContext::new(),
                &LeaseTimeToLiveRequest { id: 5, keys: true },
            )
            .await
            .unwrap();
        assert_eq!(resp.ttl, -1);
        let leases = svc
            .lease_leases(&RequestContext::new(), &LeaseLeasesRequest {})
            .await
            .unwrap();
        assert!(leases.leases.is_empty());
    }
}
