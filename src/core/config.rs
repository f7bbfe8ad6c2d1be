//! Configuration parsing and validation.
//!
//! etkv configuration is loaded from TOML files with CLI overrides. Every
//! section is optional; an empty file yields a single in-memory member with
//! etcd's usual limits.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::adapters::etcd::txn::TxnValidationConfig;
use crate::adapters::etcd::EtcdServiceConfig;
use crate::lease::{LeaseEngineConfig, SweeperConfig};
use crate::mvcc::RetryPolicy;

/// Top-level etkv configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Static cluster identity for response headers.
    #[serde(default)]
    pub cluster: ClusterConfig,

    /// Backend selection.
    #[serde(default)]
    pub backend: BackendConfig,

    /// KV and transaction limits.
    #[serde(default)]
    pub kv: KvConfig,

    /// Conflict retry budget.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Lease engine and expiry sweeper.
    #[serde(default)]
    pub lease: LeaseConfig,

    /// Telemetry configuration.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Static cluster identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfig {
    #[serde(default = "default_cluster_id")]
    pub cluster_id: u64,

    #[serde(default = "default_member_id")]
    pub member_id: u64,

    #[serde(default = "default_raft_term")]
    pub raft_term: u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            cluster_id: default_cluster_id(),
            member_id: default_member_id(),
            raft_term: default_raft_term(),
        }
    }
}

/// Backend selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Backend kind. Only "memory" ships with etkv.
    #[serde(default = "default_backend_kind")]
    pub kind: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: default_backend_kind(),
        }
    }
}

/// KV and transaction limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KvConfig {
    /// Maximum operations per compare list or branch.
    #[serde(default = "default_max_txn_ops")]
    pub max_txn_ops: usize,

    /// Maximum nested transaction depth.
    #[serde(default = "default_max_txn_depth")]
    pub max_txn_depth: usize,

    /// Default per-request deadline in milliseconds.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Keys compacted per backend transaction.
    #[serde(default = "default_compaction_batch_size")]
    pub compaction_batch_size: usize,
}

impl Default for KvConfig {
    fn default() -> Self {
        Self {
            max_txn_ops: default_max_txn_ops(),
            max_txn_depth: default_max_txn_depth(),
            request_timeout_ms: default_request_timeout_ms(),
            compaction_batch_size: default_compaction_batch_size(),
        }
    }
}

/// Conflict retry budget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_backoff_ms: default_base_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

/// Lease engine and expiry sweeper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseConfig {
    /// Requested TTLs below this are raised to it.
    #[serde(default = "default_min_ttl_seconds")]
    pub min_ttl_seconds: i64,

    /// Requested TTLs above this are rejected.
    #[serde(default = "default_max_ttl_seconds")]
    pub max_ttl_seconds: i64,

    /// Time between sweeper passes.
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,

    /// Lifetime of the sweeper lock.
    #[serde(default = "default_sweeper_lock_ttl_ms")]
    pub sweeper_lock_ttl_ms: u64,

    /// Revocations per sweeper pass. 0 means unbounded.
    #[serde(default = "default_max_revokes_per_sweep")]
    pub max_revokes_per_sweep: usize,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            min_ttl_seconds: default_min_ttl_seconds(),
            max_ttl_seconds: default_max_ttl_seconds(),
            sweep_interval_ms: default_sweep_interval_ms(),
            sweeper_lock_ttl_ms: default_sweeper_lock_ttl_ms(),
            max_revokes_per_sweep: default_max_revokes_per_sweep(),
        }
    }
}

/// Telemetry configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

// Default value functions

fn default_cluster_id() -> u64 {
    1
}

fn default_member_id() -> u64 {
    1
}

fn default_raft_term() -> u64 {
    1
}

fn default_backend_kind() -> String {
    "memory".to_string()
}

fn default_max_txn_ops() -> usize {
    128
}

fn default_max_txn_depth() -> usize {
    4
}

fn default_request_timeout_ms() -> u64 {
    5_000
}

fn default_compaction_batch_size() -> usize {
    1_000
}

fn default_max_attempts() -> u32 {
    8
}

fn default_base_backoff_ms() -> u64 {
    10
}

fn default_max_backoff_ms() -> u64 {
    200
}

fn default_min_ttl_seconds() -> i64 {
    5
}

fn default_max_ttl_seconds() -> i64 {
    9_000_000_000
}

fn default_sweep_interval_ms() -> u64 {
    500
}

fn default_sweeper_lock_ttl_ms() -> u64 {
    5_000
}

fn default_max_revokes_per_sweep() -> usize {
    1_000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Config =
            toml::from_str(&content).with_context(|| "failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).with_context(|| "failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    /// Apply CLI overrides to the configuration.
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(ref log_level) = overrides.log_level {
            self.telemetry.log_level = log_level.clone();
        }
        if let Some(member_id) = overrides.member_id {
            self.cluster.member_id = member_id;
        }
        if let Some(request_timeout_ms) = overrides.request_timeout_ms {
            self.kv.request_timeout_ms = request_timeout_ms;
        }
    }

    /// Validate configuration consistency.
    pub fn validate(&self) -> Result<()> {
        self.validate_backend()?;
        self.validate_kv()?;
        self.validate_retry()?;
        self.validate_lease()?;
        self.validate_telemetry()?;
        Ok(())
    }

    fn validate_backend(&self) -> Result<()> {
        if self.backend.kind != "memory" {
            anyhow::bail!("backend.kind must be 'memory', got: {}", self.backend.kind);
        }
        Ok(())
    }

    fn validate_kv(&self) -> Result<()> {
        if self.kv.max_txn_ops == 0 {
            anyhow::bail!("kv.max_txn_ops must be > 0");
        }
        if self.kv.request_timeout_ms == 0 {
            anyhow::bail!("kv.request_timeout_ms must be > 0");
        }
        if self.kv.compaction_batch_size == 0 {
            anyhow::bail!("kv.compaction_batch_size must be > 0");
        }
        Ok(())
    }

    fn validate_retry(&self) -> Result<()> {
        if self.retry.max_attempts == 0 {
            anyhow::bail!("retry.max_attempts must be > 0");
        }
        if self.retry.base_backoff_ms > self.retry.max_backoff_ms {
            anyhow::bail!(
                "retry.base_backoff_ms ({}) cannot exceed retry.max_backoff_ms ({})",
                self.retry.base_backoff_ms,
                self.retry.max_backoff_ms
            );
        }
        Ok(())
    }

    fn validate_lease(&self) -> Result<()> {
        if self.lease.min_ttl_seconds <= 0 {
            anyhow::bail!("lease.min_ttl_seconds must be > 0");
        }
        if self.lease.min_ttl_seconds > self.lease.max_ttl_seconds {
            anyhow::bail!(
                "lease.min_ttl_seconds ({}) cannot exceed lease.max_ttl_seconds ({})",
                self.lease.min_ttl_seconds,
                self.lease.max_ttl_seconds
            );
        }
        if self.lease.sweep_interval_ms == 0 {
            anyhow::bail!("lease.sweep_interval_ms must be > 0");
        }
        // The lock must outlive a pass or two sweepers overlap.
        if self.lease.sweeper_lock_ttl_ms <= self.lease.sweep_interval_ms {
            anyhow::bail!(
                "lease.sweeper_lock_ttl_ms ({}) must exceed lease.sweep_interval_ms ({})",
                self.lease.sweeper_lock_ttl_ms,
                self.lease.sweep_interval_ms
            );
        }
        Ok(())
    }

    fn validate_telemetry(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.telemetry.log_level.as_str()) {
            anyhow::bail!(
                "telemetry.log_level must be one of {:?}, got: {}",
                valid_levels,
                self.telemetry.log_level
            );
        }
        Ok(())
    }

    /// Service settings for the etcd adapter.
    pub fn service_config(&self) -> EtcdServiceConfig {
        EtcdServiceConfig {
            cluster_id: self.cluster.cluster_id,
            member_id: self.cluster.member_id,
            raft_term: self.cluster.raft_term,
            request_timeout_ms: self.kv.request_timeout_ms,
        }
    }

    /// Transaction validation limits.
    pub fn txn_limits(&self) -> TxnValidationConfig {
        TxnValidationConfig {
            max_operations: self.kv.max_txn_ops,
            max_nesting_depth: self.kv.max_txn_depth,
        }
    }

    /// Conflict retry policy.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            base_backoff_ms: self.retry.base_backoff_ms,
            max_backoff_ms: self.retry.max_backoff_ms,
        }
    }

    /// Lease engine settings.
    pub fn lease_engine_config(&self) -> LeaseEngineConfig {
        LeaseEngineConfig {
            min_ttl_seconds: self.lease.min_ttl_seconds,
            max_ttl_seconds: self.lease.max_ttl_seconds,
        }
    }

    /// Expiry sweeper settings.
    pub fn sweeper_config(&self) -> SweeperConfig {
        SweeperConfig {
            interval_ms: self.lease.sweep_interval_ms,
            lock_ttl_ms: self.lease.sweeper_lock_ttl_ms,
            max_revokes_per_sweep: self.lease.max_revokes_per_sweep,
        }
    }
}

/// CLI override options that can be applied to configuration.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    /// Override log level.
    pub log_level: Option<String>,
    /// Override member ID.
    pub member_id: Option<u64>,
    /// Override the default request deadline.
    pub request_timeout_ms: Option<u64>,
}
