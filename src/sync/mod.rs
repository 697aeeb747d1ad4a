// src/sync/mod.rs - 实时同步引擎模块

pub mod validator;
pub mod conflict;
pub mod health_monitor;
pub mod polling;
pub mod batcher;
pub mod cache;
pub mod engine;


// 重新导出主要类型
pub use validator::{
    DataIntegrityValidator,
    ValidationStats,
    check_payload,
    content_hash,
};

pub use conflict::{resolve, Resolution};

pub use health_monitor::ConnectionHealthMonitor;

pub use polling::{PollingFallbackController, PollingStats};

pub use batcher::{
    AdaptiveBatcher,
    EnqueueOutcome,
    SubscriberCallback,
    compute_priority,
    next_interval,
};

pub use cache::{CacheStore, MemoryCacheStore, cache_writer_subscriber};

pub use engine::{RealtimeSyncEngine, SyncEngineStatus};
