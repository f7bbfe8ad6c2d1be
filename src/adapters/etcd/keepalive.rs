//! Lease keepalive sessions.
//!
//! One task per lease-holder stream. The task answers each renewal ping with
//! the lease's fresh TTL until the client stops sending, stops listening, or
//! the session is cancelled. A session ending is never a revocation: the
//! lease simply runs out unless another session renews it.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use super::errors::EtcdError;
use super::lease::{LeaseKeepAliveRequest, LeaseKeepAliveResponse};
use super::service::EtcdService;
use crate::adapters::RequestContext;
use crate::backend::Backend;

/// Outbound buffer per session.
const OUTBOUND_CAPACITY: usize = 16;

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The client closed its request stream.
    InboundClosed,
    /// The client dropped the response stream.
    OutboundClosed,
    /// The cancellation signal fired.
    Cancelled,
    /// A non-lease error was reported to the client.
    Failed,
}

/// Handle to a running keepalive session.
pub struct KeepAliveStream {
    /// Renewal responses, or a single terminal error.
    pub responses: mpsc::Receiver<Result<LeaseKeepAliveResponse, EtcdError>>,
    /// The session task.
    pub handle: JoinHandle<SessionEnd>,
}

pub(crate) fn spawn<B: Backend>(
    service: Arc<EtcdService<B>>,
    ctx: RequestContext,
    inbound: mpsc::Receiver<LeaseKeepAliveRequest>,
    cancel: watch::Receiver<bool>,
) -> KeepAliveStream {
    let (tx, responses) = mpsc::channel(OUTBOUND_CAPACITY);
    let handle = tokio::spawn(async move {
        service.session_opened();
        let end = run_session(&service, &ctx, inbound, tx, cancel).await;
        service.session_closed();
        tracing::debug!(?end, "keepalive session ended");
        end
    });
    KeepAliveStream { responses, handle }
}

async fn run_session<B: Backend>(
    service: &EtcdService<B>,
    ctx: &RequestContext,
    mut inbound: mpsc::Receiver<LeaseKeepAliveRequest>,
    outbound: mpsc::Sender<Result<LeaseKeepAliveResponse, EtcdError>>,
    mut cancel: watch::Receiver<bool>,
) -> SessionEnd {
    if *cancel.borrow() {
        return SessionEnd::Cancelled;
    }

    loop {
        let req = tokio::select! {
            changed = cancel.changed() => {
                // A dropped sender counts as cancellation.
                if changed.is_err() || *cancel.borrow() {
                    return SessionEnd::Cancelled;
                }
                continue;
            }
            _ = outbound.closed() => return SessionEnd::OutboundClosed,
            req = inbound.recv() => match req {
                Some(req) => req,
                None => return SessionEnd::InboundClosed,
            },
        };

        match service.lease_keep_alive(ctx, &req).await {
            Ok(resp) => {
                tracing::trace!(lease_id = resp.id, ttl = resp.ttl, "keepalive");
                if outbound.send(Ok(resp)).await.is_err() {
                    return SessionEnd::OutboundClosed;
                }
            }
            Err(err) => {
                tracing::debug!(lease_id = req.id, error = %err, "keepalive failed");
                let _ = outbound.send(Err(err)).await;
                return SessionEnd::Failed;
            }
        }
    }
}
