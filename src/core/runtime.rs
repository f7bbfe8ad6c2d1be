//! Main runtime orchestration.
//!
//! The runtime coordinates component lifecycle:
//! - Start order: backend → revision index → lease engine → etcd service → sweeper
//! - Shutdown order: etcd service → sweeper → lease engine → backend
//!
//! Stopping the service first means no request starts after shutdown begins,
//! while requests already in flight still finish against a live backend.

use crate::adapters::etcd::EtcdService;
use crate::adapters::Adapter;
use crate::backend::MemoryBackend;
use crate::core::config::Config;
use crate::core::time::SystemClock;
use crate::lease::{LeaseEngine, Sweeper};
use crate::mvcc::RevisionIndex;
use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// How long shutdown waits for the sweeper to finish its pass.
const SWEEPER_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Component health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentHealth {
    /// Component is starting.
    Starting,
    /// Component is healthy and operational.
    Healthy,
    /// Component has failed.
    Failed,
    /// Component is stopping.
    Stopping,
    /// Component has stopped.
    Stopped,
}

/// Health status aggregated from all components.
#[derive(Debug, Clone)]
pub struct RuntimeHealth {
    /// Backend and revision index.
    pub backend: ComponentHealth,
    /// etcd service.
    pub service: ComponentHealth,
    /// Expiry sweeper task.
    pub sweeper: ComponentHealth,
}

impl Default for RuntimeHealth {
    fn default() -> Self {
        Self {
            backend: ComponentHealth::Starting,
            service: ComponentHealth::Starting,
            sweeper: ComponentHealth::Starting,
        }
    }
}

impl RuntimeHealth {
    /// Check if the runtime is ready to serve requests.
    pub fn is_ready(&self) -> bool {
        matches!(
            (self.backend, self.service, self.sweeper),
            (
                ComponentHealth::Healthy,
                ComponentHealth::Healthy,
                ComponentHealth::Healthy
            )
        )
    }

    /// Check if the runtime is alive (not failed).
    pub fn is_alive(&self) -> bool {
        !matches!(
            (self.backend, self.service, self.sweeper),
            (ComponentHealth::Failed, _, _)
                | (_, ComponentHealth::Failed, _)
                | (_, _, ComponentHealth::Failed)
        )
    }
}

/// etkv runtime holding all component handles.
pub struct Runtime {
    /// Configuration.
    config: Arc<Config>,

    /// Backend store.
    backend: Arc<MemoryBackend>,

    /// etcd service over the engines.
    service: Arc<EtcdService<MemoryBackend>>,

    /// Expiry sweeper.
    sweeper: Arc<Sweeper<MemoryBackend>>,

    /// Sweeper task handle.
    sweeper_handle: Option<JoinHandle<()>>,

    /// Runtime health status.
    health: RuntimeHealth,

    /// Whether the runtime is running.
    running: Arc<AtomicBool>,

    /// Shutdown signal sender.
    shutdown_tx: watch::Sender<bool>,

    /// Shutdown signal receiver.
    shutdown_rx: watch::Receiver<bool>,
}

impl Runtime {
    /// Create a new runtime with the given configuration.
    ///
    /// Components are wired but not started.
    pub fn new(config: Config) -> Result<Self> {
        config.validate().context("invalid configuration")?;

        let backend = Arc::new(MemoryBackend::new());
        let index = Arc::new(RevisionIndex::new(backend.clone(), config.retry_policy()));
        let leases = Arc::new(LeaseEngine::new(
            config.lease_engine_config(),
            index.clone(),
            Arc::new(SystemClock),
        ));
        let service = Arc::new(
            EtcdService::new(config.service_config(), index, leases.clone())
                .with_txn_limits(config.txn_limits())
                .with_compaction_batch_size(config.kv.compaction_batch_size),
        );
        let sweeper = Arc::new(Sweeper::new(
            leases,
            config.sweeper_config(),
            format!("member-{}", config.cluster.member_id),
        ));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Ok(Self {
            config: Arc::new(config),
            backend,
            service,
            sweeper,
            sweeper_handle: None,
            health: RuntimeHealth::default(),
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
            shutdown_rx,
        })
    }

    /// Get the configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get the backend store.
    pub fn backend(&self) -> &Arc<MemoryBackend> {
        &self.backend
    }

    /// Get the etcd service. A transport hands decoded requests to it.
    pub fn service(&self) -> &Arc<EtcdService<MemoryBackend>> {
        &self.service
    }

    /// Get the current health status.
    pub fn health(&self) -> &RuntimeHealth {
        &self.health
    }

    /// Check if the runtime is ready to serve requests.
    pub fn is_ready(&self) -> bool {
        self.health.is_ready()
    }

    /// Check if the runtime is alive.
    pub fn is_alive(&self) -> bool {
        self.health.is_alive()
    }

    /// Check if the runtime is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Shutdown signal for tasks tied to the runtime's lifetime. Pass it as
    /// the `cancel` of keepalive sessions so they end when the runtime stops.
    pub fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.shutdown_rx.clone()
    }

    /// Start all runtime components.
    pub async fn start(&mut self) -> Result<()> {
        tracing::info!(
            cluster_id = self.config.cluster.cluster_id,
            member_id = self.config.cluster.member_id,
            backend = %self.config.backend.kind,
            "starting etkv runtime"
        );

        // 1. Backend and revision index
        let revision = match self.service.index().current_revision().await {
            Ok(revision) => revision,
            Err(err) => {
                self.health.backend = ComponentHealth::Failed;
                return Err(err).context("backend unreachable");
            }
        };
        self.health.backend = ComponentHealth::Healthy;
        tracing::info!(revision, "revision index ready");

        // 2. etcd service
        if let Err(err) = self.service.start().await {
            self.health.service = ComponentHealth::Failed;
            return Err(err).context("failed to start etcd service");
        }
        self.health.service = ComponentHealth::Healthy;

        // 3. Expiry sweeper
        let handle = self.sweeper.clone().spawn(self.shutdown_receiver());
        self.sweeper_handle = Some(handle);
        self.health.sweeper = ComponentHealth::Healthy;
        tracing::info!(
            owner = %self.sweeper.owner(),
            interval_ms = self.config.lease.sweep_interval_ms,
            "expiry sweeper started"
        );

        self.running.store(true, Ordering::Release);
        tracing::info!("etkv runtime started");
        Ok(())
    }

    /// Trigger graceful shutdown.
    pub fn shutdown(&self) {
        tracing::info!("shutdown requested");
        let _ = self.shutdown_tx.send(true);
    }

    /// Run the runtime until SIGINT or a shutdown request.
    pub async fn run(&mut self) -> Result<()> {
        self.start().await?;

        let mut shutdown_rx = self.shutdown_receiver();
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!("shutdown signal received (SIGINT)");
            }
            _ = shutdown_requested(&mut shutdown_rx) => {
                tracing::info!("shutdown requested by component");
            }
        }

        self.stop().await
    }

    /// Stop all runtime components in reverse start order.
    pub async fn stop(&mut self) -> Result<()> {
        tracing::info!("stopping etkv runtime");
        self.running.store(false, Ordering::Release);

        // 1. Stop accepting requests
        self.health.service = ComponentHealth::Stopping;
        self.service
            .stop()
            .await
            .context("failed to stop etcd service")?;
        self.health.service = ComponentHealth::Stopped;

        // 2. Stop the sweeper; it releases its lock on the way out
        let _ = self.shutdown_tx.send(true);
        self.health.sweeper = ComponentHealth::Stopping;
        if let Some(handle) = self.sweeper_handle.take() {
            match tokio::time::timeout(SWEEPER_STOP_TIMEOUT, handle).await {
                Ok(Ok(())) => tracing::info!("expiry sweeper stopped"),
                Ok(Err(e)) => tracing::warn!(error = %e, "expiry sweeper task panicked"),
                Err(_) => tracing::warn!("expiry sweeper stop timed out"),
            }
        }
        self.health.sweeper = ComponentHealth::Stopped;

        // 3. The backend is dropped with the runtime
        self.health.backend = ComponentHealth::Stopped;

        tracing::info!("etkv runtime stopped");
        Ok(())
    }
}

/// Resolve once `rx` reads `true` or its sender is gone.
async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow() {
        if rx.changed().await.is_err() {
            break;
        }
    }
}
