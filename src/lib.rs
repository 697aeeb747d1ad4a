// Define modules
pub mod config;  // Engine configuration and file loader
pub mod types;  // 同步引擎类型系统
pub mod sync;  // 实时同步与冲突解决引擎

// Re-export key components for easier usage
pub use config::{
    BatchingConfig,
    ConflictConfig,
    ConflictStrategy,
    HealthConfig,
    PollingConfig,
    PriorityConfig,
    SyncConfigUpdate,
    SyncEngineConfig,
};

pub use types::{
    Update,
    UpdateBatch,
    UpdateKind,
    UpdatePayload,
    UpdatePriority,
    UpdateSource,
    ConflictInfo,
    ResolutionOutcome,
    ConnectionHealth,
    ConnectionQuality,
    SyncError,
};

pub use sync::{
    CacheStore,
    MemoryCacheStore,
    RealtimeSyncEngine,
    SubscriberCallback,
    SyncEngineStatus,
    cache_writer_subscriber,
};
