//! Common test utilities.
//!
//! This module contains shared helpers for integration tests.
//! Import with `mod common;` in test files.

use async_trait::async_trait;
use etkv::adapters::etcd::{Access, Authenticator, EtcdService, EtcdServiceConfig};
use etkv::adapters::RequestContext;
use etkv::backend::MemoryBackend;
use etkv::core::error::{EtkvError, EtkvResult};
use etkv::core::time::{ManualClock, Tick};
use etkv::lease::{LeaseEngine, LeaseEngineConfig, Sweeper, SweeperConfig};
use etkv::mvcc::{RetryPolicy, RevisionIndex};
use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;
use tempfile::NamedTempFile;

/// Start of the manual clock used by every harness.
pub const START_MS: u64 = 1_000_000;

/// A fully wired engine over a fresh memory backend and a manual clock.
pub struct Harness {
    pub backend: Arc<MemoryBackend>,
    pub index: Arc<RevisionIndex<MemoryBackend>>,
    pub clock: Arc<ManualClock>,
    pub leases: Arc<LeaseEngine<MemoryBackend>>,
    pub service: Arc<EtcdService<MemoryBackend>>,
}

impl Harness {
    /// A sweeper over this harness's lease engine.
    pub fn sweeper(&self, owner: &str) -> Sweeper<MemoryBackend> {
        Sweeper::new(self.leases.clone(), SweeperConfig::default(), owner)
    }
}

/// Harness with default settings.
pub fn harness() -> Harness {
    build_harness(RetryPolicy::default(), None)
}

/// Harness with a custom retry policy.
pub fn harness_with_retry(retry: RetryPolicy) -> Harness {
    build_harness(retry, None)
}

/// Harness whose service checks every request with `auth`.
pub fn harness_with_auth(auth: Arc<dyn Authenticator>) -> Harness {
    build_harness(RetryPolicy::default(), Some(auth))
}

fn build_harness(retry: RetryPolicy, auth: Option<Arc<dyn Authenticator>>) -> Harness {
    let backend = Arc::new(MemoryBackend::new());
    let index = Arc::new(RevisionIndex::new(backend.clone(), retry));
    let clock = Arc::new(ManualClock::new(Tick::new(START_MS)));
    let leases = Arc::new(LeaseEngine::new(
        LeaseEngineConfig::default(),
        index.clone(),
        clock.clone(),
    ));
    let mut service = EtcdService::new(test_service_config(), index.clone(), leases.clone());
    if let Some(auth) = auth {
        service = service.with_authenticator(auth);
    }
    Harness {
        backend,
        index,
        clock,
        leases,
        service: Arc::new(service),
    }
}

/// Service identity used by every harness.
pub fn test_service_config() -> EtcdServiceConfig {
    EtcdServiceConfig {
        cluster_id: 100,
        member_id: 200,
        raft_term: 7,
        request_timeout_ms: 2_000,
    }
}

/// Anonymous request context.
pub fn ctx() -> RequestContext {
    RequestContext::new()
}

/// Token authenticator granting each token access to key prefixes.
#[derive(Default)]
pub struct PrefixAuthenticator {
    grants: HashMap<String, Vec<Vec<u8>>>,
}

impl PrefixAuthenticator {
    pub fn grant(mut self, token: &str, prefix: &str) -> Self {
        self.grants
            .entry(token.to_string())
            .or_default()
            .push(prefix.as_bytes().to_vec());
        self
    }
}

#[async_trait]
impl Authenticator for PrefixAuthenticator {
    fn is_enabled(&self) -> bool {
        true
    }

    async fn authorize(&self, token: Option<&str>, access: &Access) -> EtkvResult<()> {
        let token = token.ok_or(EtkvError::AuthenticationRequired)?;
        let prefixes = self
            .grants
            .get(token)
            .ok_or(EtkvError::AuthenticationRequired)?;
        match access {
            Access::Key { key, .. } if prefixes.iter().any(|p| key.starts_with(p)) => Ok(()),
            Access::Lease => Ok(()),
            _ => Err(EtkvError::PermissionDenied {
                message: format!("token {} lacks access", token),
            }),
        }
    }
}

/// Write `content` to a temporary config file.
pub fn write_config(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("Failed to create temp file");
    file.write_all(content.as_bytes())
        .expect("Failed to write config");
    file
}

/// Unwrap a value as UTF-8 for readable assertions.
pub fn utf8(bytes: &[u8]) -> &str {
    std::str::from_utf8(bytes).expect("value is not UTF-8")
}
