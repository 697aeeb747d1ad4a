// config.rs - Centralized configuration for the sync engine

use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs::File;
use tokio::io::AsyncReadExt;

use crate::types::SyncError;

/// Conflict resolution strategy selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStrategy {
    /// Incoming record always wins
    RealtimeWins,
    /// Later observation timestamp wins, ties favor incoming
    TimestampBased,
    /// Kind-specific field-level merge
    Merge,
}

/// Batching and flush-timer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchingConfig {
    /// Initial flush interval (ms)
    pub base_interval_ms: u64,
    /// Lower clamp for the adaptive interval (ms)
    pub min_interval_ms: u64,
    /// Upper clamp for the adaptive interval (ms)
    pub max_interval_ms: u64,
    /// Maximum updates drained per scheduled flush
    pub max_batch_size: usize,
    /// Batch size cap while a Critical update is queued
    pub critical_batch_size: usize,
    /// Batch size cap while a High update is queued
    pub high_batch_size: usize,
    /// High-priority queue depth that forces an immediate flush
    pub high_priority_flush_threshold: usize,
    /// Queue depth that forces a flush while the connection is degraded
    pub degraded_queue_threshold: usize,
    /// Average flush time above which the interval backs off (ms)
    pub slow_flush_threshold_ms: f64,
    /// Average flush time below which the interval tightens (ms)
    pub fast_flush_threshold_ms: f64,
    /// Number of recent flush durations kept for interval tuning
    pub performance_window: usize,
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            base_interval_ms: 200,
            min_interval_ms: 50,
            max_interval_ms: 2000,
            max_batch_size: 50,
            critical_batch_size: 10,
            high_batch_size: 25,
            high_priority_flush_threshold: 1,
            degraded_queue_threshold: 10,
            slow_flush_threshold_ms: 100.0,
            fast_flush_threshold_ms: 50.0,
            performance_window: 50,
        }
    }
}

/// Conflict resolution configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictConfig {
    /// Strategy applied when a cached record exists for the same logical key
    pub strategy: ConflictStrategy,
    /// Skip conflict handling when content hashes are identical
    pub skip_identical_payloads: bool,
}

impl Default for ConflictConfig {
    fn default() -> Self {
        Self {
            strategy: ConflictStrategy::Merge,
            skip_identical_payloads: false,
        }
    }
}

/// Connection health monitoring configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    /// Base missed-heartbeat threshold before the channel is declared unhealthy
    pub max_missed_heartbeats: u32,
    /// Staleness watchdog cadence (ms); silence beyond 2x forces Unhealthy
    pub health_check_interval_ms: u64,
    /// Average latency at or below this classifies as Excellent (ms)
    pub latency_excellent_ms: u64,
    /// Average latency at or below this classifies as Good (ms)
    pub latency_good_ms: u64,
    /// Average latency at or below this classifies as Poor (ms)
    pub latency_poor_ms: u64,
    /// Ring-buffer capacity for latency samples
    pub latency_window: usize,
    /// Trailing window for disconnect-frequency stability scoring (ms)
    pub disconnect_window_ms: i64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            max_missed_heartbeats: 3,
            health_check_interval_ms: 10000,
            latency_excellent_ms: 100,
            latency_good_ms: 300,
            latency_poor_ms: 1000,
            latency_window: 100,
            disconnect_window_ms: 300_000, // 5 minutes
        }
    }
}

/// Polling fallback configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    /// Floor polling cadence (ms); also the interval after activation/reset
    pub fallback_interval_ms: u64,
    /// Backoff ceiling (ms)
    pub max_interval_ms: u64,
    /// Multiplicative backoff/recovery factor
    pub backoff_multiplier: f64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            fallback_interval_ms: 5000,
            max_interval_ms: 60000,
            backoff_multiplier: 1.5,
        }
    }
}

/// Priority derivation thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriorityConfig {
    /// Trade volume (USD) at or above which a trade is Critical
    pub critical_trade_volume: f64,
    /// Trade volume (USD) at or above which a trade is High
    pub large_trade_volume: f64,
    /// Connection count at or above which a graph delta is High
    pub large_graph_connections: usize,
}

impl Default for PriorityConfig {
    fn default() -> Self {
        Self {
            critical_trade_volume: 100_000.0,
            large_trade_volume: 10_000.0,
            large_graph_connections: 20,
        }
    }
}

/// Top-level engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncEngineConfig {
    pub batching: BatchingConfig,
    pub conflict: ConflictConfig,
    pub health: HealthConfig,
    pub polling: PollingConfig,
    pub priority: PriorityConfig,
}

impl SyncEngineConfig {
    /// Loads configuration from a TOML/JSON/YAML file, selected by extension.
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, SyncError> {
        let file_format = path.as_ref().extension().and_then(|os| os.to_str());

        let mut file = File::open(path.as_ref())
            .await
            .map_err(|e| SyncError::ConfigurationError(format!("Failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .await
            .map_err(|e| SyncError::ConfigurationError(format!("Failed to read config file: {e}")))?;

        let config: SyncEngineConfig = match file_format {
            Some("toml") => toml::from_str(&contents)
                .map_err(|e| SyncError::ConfigurationError(format!("Failed to parse TOML config: {e}")))?,
            Some("json") => serde_json::from_str(&contents)
                .map_err(|e| SyncError::ConfigurationError(format!("Failed to parse JSON config: {e}")))?,
            Some("yaml") | Some("yml") => serde_yaml::from_str(&contents)
                .map_err(|e| SyncError::ConfigurationError(format!("Failed to parse YAML config: {e}")))?,
            _ => {
                return Err(SyncError::ConfigurationError(
                    "Unsupported config file format".to_string(),
                ))
            }
        };

        config.validate()?;
        Ok(config)
    }

    /// Sanity-checks cross-field constraints.
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.batching.min_interval_ms == 0 || self.batching.min_interval_ms > self.batching.max_interval_ms {
            return Err(SyncError::ConfigurationError(
                "batching: min_interval_ms must be nonzero and <= max_interval_ms".to_string(),
            ));
        }
        if self.batching.max_batch_size == 0 {
            return Err(SyncError::ConfigurationError(
                "batching: max_batch_size must be nonzero".to_string(),
            ));
        }
        if self.polling.fallback_interval_ms == 0
            || self.polling.fallback_interval_ms > self.polling.max_interval_ms
        {
            return Err(SyncError::ConfigurationError(
                "polling: fallback_interval_ms must be nonzero and <= max_interval_ms".to_string(),
            ));
        }
        if self.polling.backoff_multiplier <= 1.0 {
            return Err(SyncError::ConfigurationError(
                "polling: backoff_multiplier must be greater than 1.0".to_string(),
            ));
        }
        if !(self.health.latency_excellent_ms <= self.health.latency_good_ms
            && self.health.latency_good_ms <= self.health.latency_poor_ms)
        {
            return Err(SyncError::ConfigurationError(
                "health: latency thresholds must be ordered excellent <= good <= poor".to_string(),
            ));
        }
        if self.health.max_missed_heartbeats == 0 {
            return Err(SyncError::ConfigurationError(
                "health: max_missed_heartbeats must be nonzero".to_string(),
            ));
        }
        Ok(())
    }

    /// Applies a partial update, returning the merged configuration.
    pub fn apply_update(&self, update: SyncConfigUpdate) -> Self {
        let mut merged = self.clone();
        if let Some(batching) = update.batching {
            merged.batching = batching;
        }
        if let Some(conflict) = update.conflict {
            merged.conflict = conflict;
        }
        if let Some(health) = update.health {
            merged.health = health;
        }
        if let Some(polling) = update.polling {
            merged.polling = polling;
        }
        if let Some(priority) = update.priority {
            merged.priority = priority;
        }
        merged
    }
}

/// Partial configuration for hot reconfiguration; absent sections keep
/// their current values.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfigUpdate {
    pub batching: Option<BatchingConfig>,
    pub conflict: Option<ConflictConfig>,
    pub health: Option<HealthConfig>,
    pub polling: Option<PollingConfig>,
    pub priority: Option<PriorityConfig>,
}
