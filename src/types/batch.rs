//! 批次类型定义

use serde::{Deserialize, Serialize};
use super::update::{Update, UpdatePriority};

/// 一次刷出的不可变更新批次
///
/// 批次内更新已按（严重度, 序列号）升序排列；
/// 批次ID与创建时间在进程内单调递增。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateBatch {
    /// 批次ID（单调递增）
    pub id: u64,
    /// 创建时间戳（毫秒）
    pub created_at: i64,
    /// 批次内的更新序列
    pub updates: Vec<Update>,
    /// 批次优先级（成员中的最高严重度）
    pub priority: UpdatePriority,
    /// 本批次中解决的冲突数量
    pub conflicts_resolved: usize,
    /// 封批时的数据完整性评分（0.0-1.0）
    pub data_integrity_score: f64,
    /// 封批时生效的自适应批处理间隔（毫秒）
    pub adaptive_interval_ms: u64,
}

impl UpdateBatch {
    /// 批次内更新数量
    pub fn len(&self) -> usize {
        self.updates.len()
    }

    /// 批次是否为空
    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }
}

/// 批处理性能统计
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchPerformanceStats {
    /// 已派发批次总数
    pub batches_dispatched: u64,
    /// 已派发更新总数
    pub updates_dispatched: u64,
    /// 累计解决冲突数
    pub conflicts_resolved: u64,
    /// 最近窗口的平均处理耗时（毫秒）
    pub avg_processing_time_ms: f64,
    /// 订阅者回调失败次数
    pub dispatch_failures: u64,
    /// 最后一次刷出时间戳（毫秒）
    pub last_flush_at: Option<i64>,
}

impl Default for BatchPerformanceStats {
    fn default() -> Self {
        Self {
            batches_dispatched: 0,
            updates_dispatched: 0,
            conflicts_resolved: 0,
            avg_processing_time_ms: 0.0,
            dispatch_failures: 0,
            last_flush_at: None,
        }
    }
}
