//! 连接健康状态类型定义

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// 连接质量分级（按延迟阈值划分）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionQuality {
    /// 优秀
    Excellent,
    /// 良好
    Good,
    /// 较差
    Poor,
    /// 严重劣化
    Critical,
}

impl ConnectionQuality {
    /// 批次规模缩放因子（连接越差批次越小）
    pub fn batch_size_factor(&self) -> f64 {
        match self {
            ConnectionQuality::Excellent => 1.0,
            ConnectionQuality::Good => 0.8,
            ConnectionQuality::Poor => 0.6,
            ConnectionQuality::Critical => 0.4,
        }
    }

    /// 刷出间隔缩放因子（连接越差刷出越慢）
    pub fn interval_factor(&self) -> f64 {
        match self {
            ConnectionQuality::Excellent => 0.8,
            ConnectionQuality::Good => 1.0,
            ConnectionQuality::Poor => 1.5,
            ConnectionQuality::Critical => 2.0,
        }
    }
}

impl std::fmt::Display for ConnectionQuality {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            ConnectionQuality::Excellent => write!(f, "EXCELLENT"),
            ConnectionQuality::Good => write!(f, "GOOD"),
            ConnectionQuality::Poor => write!(f, "POOR"),
            ConnectionQuality::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// 健康状态迁移
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthTransition {
    /// 恢复健康（心跳重新出现）
    BecameHealthy,
    /// 进入不健康（漏跳达到动态阈值或心跳停滞）
    BecameUnhealthy,
}

/// 进程级连接健康状态
///
/// 引擎启动时以乐观默认值创建一次，之后原地更新，随引擎销毁。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionHealth {
    /// 当前是否健康
    pub is_healthy: bool,
    /// 最后一次心跳时间戳（毫秒）
    pub last_heartbeat_at: i64,
    /// 连续漏跳次数
    pub missed_heartbeats: u32,
    /// 最近一次延迟采样（毫秒）
    pub latency_ms: u64,
    /// 窗口内平均延迟（毫秒）
    pub average_latency_ms: f64,
    /// 延迟采样环形窗口
    pub latency_history: VecDeque<u64>,
    /// 连接质量分级
    pub connection_quality: ConnectionQuality,
    /// 连接稳定性评分（0.0-1.0，按断连频率衰减）
    pub connection_stability: f64,
    /// 重连次数
    pub reconnect_count: u32,
    /// 最后一次重连时间戳（毫秒）
    pub last_reconnect_at: Option<i64>,
    /// 是否检测到数据丢失窗口
    pub data_loss_detected: bool,
    /// 轮询降级是否激活
    pub polling_fallback_active: bool,
    /// 当前轮询间隔（毫秒）
    pub polling_interval_ms: u64,
}

impl ConnectionHealth {
    /// 以乐观默认值创建初始健康状态
    pub fn optimistic(now_ms: i64, polling_floor_ms: u64) -> Self {
        Self {
            is_healthy: true,
            last_heartbeat_at: now_ms,
            missed_heartbeats: 0,
            latency_ms: 0,
            average_latency_ms: 0.0,
            latency_history: VecDeque::new(),
            connection_quality: ConnectionQuality::Excellent,
            connection_stability: 1.0,
            reconnect_count: 0,
            last_reconnect_at: None,
            data_loss_detected: false,
            polling_fallback_active: false,
            polling_interval_ms: polling_floor_ms,
        }
    }
}
