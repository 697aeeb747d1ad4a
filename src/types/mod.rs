// src/types/mod.rs - 同步引擎类型系统

pub mod update;
pub mod batch;
pub mod health;
pub mod errors;

// 重新导出常用类型
pub use update::{
    Update,
    UpdatePayload,
    UpdateKind,
    UpdateSource,
    UpdatePriority,
    TradeActivity,
    TradeSide,
    NetworkGraphDelta,
    GraphConnection,
    StatsSnapshot,
    TrendingSet,
    ConflictInfo,
    ResolutionOutcome,
};

pub use batch::{UpdateBatch, BatchPerformanceStats};

pub use health::{
    ConnectionHealth,
    ConnectionQuality,
    HealthTransition,
};

pub use errors::SyncError;
