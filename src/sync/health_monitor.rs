//! 连接健康监控器
//! 跟踪心跳与延迟采样，驱动 健康⇄不健康 状态机

use std::collections::VecDeque;
use std::sync::Arc;
use chrono::Utc;
use log::{debug, info, warn};
use tokio::sync::RwLock;

use crate::config::SyncEngineConfig;
use crate::types::{ConnectionHealth, ConnectionQuality, HealthTransition};

/// 每次断连事件对稳定性评分的扣减
const STABILITY_PENALTY_PER_DISCONNECT: f64 = 0.2;

/// 连接健康监控器
///
/// 健康状态在引擎启动时以乐观默认值创建一次，此后只原地更新。
/// 历史稳定的连接获得更高的漏跳容忍度（动态阈值）。
#[derive(Debug, Clone)]
pub struct ConnectionHealthMonitor {
    /// 引擎配置
    config: Arc<RwLock<SyncEngineConfig>>,
    /// 监控状态
    state: Arc<RwLock<MonitorState>>,
}

/// 监控内部状态
#[derive(Debug)]
struct MonitorState {
    /// 健康状态（进程级，原地更新）
    health: ConnectionHealth,
    /// 断连事件时间戳（滑动窗口）
    disconnect_events: VecDeque<i64>,
}

impl ConnectionHealthMonitor {
    /// 创建监控器，健康状态取乐观初值
    pub fn new(config: Arc<RwLock<SyncEngineConfig>>, polling_floor_ms: u64) -> Self {
        let now = Utc::now().timestamp_millis();
        Self {
            config,
            state: Arc::new(RwLock::new(MonitorState {
                health: ConnectionHealth::optimistic(now, polling_floor_ms),
                disconnect_events: VecDeque::new(),
            })),
        }
    }

    /// 上报一次连通性信号（由传输层按其自身节奏调用）
    ///
    /// 返回本次上报引发的状态迁移；未迁移时返回None。
    pub async fn report_connectivity(
        &self,
        is_connected: bool,
        latency_ms: Option<u64>,
    ) -> Option<HealthTransition> {
        let health_config = self.config.read().await.health.clone();
        let now = Utc::now().timestamp_millis();
        let mut state = self.state.write().await;

        if is_connected {
            state.health.missed_heartbeats = 0;
            state.health.last_heartbeat_at = now;

            if let Some(latency) = latency_ms {
                state.health.latency_ms = latency;
                state.health.latency_history.push_back(latency);
                while state.health.latency_history.len() > health_config.latency_window {
                    state.health.latency_history.pop_front();
                }

                let sum: u64 = state.health.latency_history.iter().sum();
                state.health.average_latency_ms =
                    sum as f64 / state.health.latency_history.len() as f64;
                state.health.connection_quality = classify_quality(
                    state.health.average_latency_ms,
                    &health_config,
                );
            }

            prune_disconnect_events(
                &mut state.disconnect_events,
                now,
                health_config.disconnect_window_ms,
            );
            state.health.connection_stability =
                stability_score(state.disconnect_events.len());

            if !state.health.is_healthy {
                state.health.is_healthy = true;
                state.health.reconnect_count += 1;
                state.health.last_reconnect_at = Some(now);
                info!(
                    "[HealthMonitor] 心跳恢复，连接转为健康 (重连次数: {})",
                    state.health.reconnect_count
                );
                return Some(HealthTransition::BecameHealthy);
            }

            debug!(
                "[HealthMonitor] 心跳正常: 延迟={:?}ms 质量={} 稳定性={:.2}",
                latency_ms, state.health.connection_quality, state.health.connection_stability
            );
            None
        } else {
            state.disconnect_events.push_back(now);
            prune_disconnect_events(
                &mut state.disconnect_events,
                now,
                health_config.disconnect_window_ms,
            );
            state.health.missed_heartbeats += 1;
            state.health.connection_stability =
                stability_score(state.disconnect_events.len());

            let threshold = dynamic_threshold(
                health_config.max_missed_heartbeats,
                state.health.connection_stability,
            );

            if state.health.is_healthy && state.health.missed_heartbeats >= threshold {
                self.mark_unhealthy(&mut state, "漏跳达到动态阈值", threshold);
                return Some(HealthTransition::BecameUnhealthy);
            }

            debug!(
                "[HealthMonitor] 漏跳 {}/{} (稳定性={:.2})",
                state.health.missed_heartbeats, threshold, state.health.connection_stability
            );
            None
        }
    }

    /// 心跳停滞看门狗：静默超过2倍检查间隔时强制转入不健康
    pub async fn check_staleness(&self) -> Option<HealthTransition> {
        let now = Utc::now().timestamp_millis();
        self.check_staleness_at(now).await
    }

    /// 以显式时钟执行停滞检查（便于确定性测试）
    pub(crate) async fn check_staleness_at(&self, now_ms: i64) -> Option<HealthTransition> {
        let health_config = self.config.read().await.health.clone();
        let mut state = self.state.write().await;

        if !state.health.is_healthy {
            return None;
        }

        let silence = now_ms - state.health.last_heartbeat_at;
        let limit = 2 * health_config.health_check_interval_ms as i64;
        if silence > limit {
            // 静默死亡也按断连事件计入稳定性
            state.disconnect_events.push_back(now_ms);
            prune_disconnect_events(
                &mut state.disconnect_events,
                now_ms,
                health_config.disconnect_window_ms,
            );
            state.health.connection_stability =
                stability_score(state.disconnect_events.len());

            warn!(
                "[HealthMonitor] 心跳静默{}ms，超过上限{}ms，强制转入不健康",
                silence, limit
            );
            self.mark_unhealthy(&mut state, "心跳停滞", 0);
            return Some(HealthTransition::BecameUnhealthy);
        }
        None
    }

    /// 当前连接质量
    pub async fn quality(&self) -> ConnectionQuality {
        self.state.read().await.health.connection_quality
    }

    /// 健康状态只读快照
    pub async fn snapshot(&self) -> ConnectionHealth {
        self.state.read().await.health.clone()
    }

    /// 同步轮询降级状态到健康快照（由轮询控制器维护）
    pub async fn set_polling_state(&self, active: bool, interval_ms: u64) {
        let mut state = self.state.write().await;
        state.health.polling_fallback_active = active;
        state.health.polling_interval_ms = interval_ms;
    }

    /// 重置可累计指标（状态机本身不受影响）
    pub async fn reset_metrics(&self) {
        let mut state = self.state.write().await;
        state.health.reconnect_count = 0;
        state.health.last_reconnect_at = None;
        state.health.data_loss_detected = false;
        state.health.latency_history.clear();
        state.health.average_latency_ms = 0.0;
    }

    fn mark_unhealthy(&self, state: &mut MonitorState, reason: &str, threshold: u32) {
        state.health.is_healthy = false;
        state.health.data_loss_detected = true;
        warn!(
            "[HealthMonitor] 连接转为不健康: {} (漏跳={} 阈值={})",
            reason, state.health.missed_heartbeats, threshold
        );
    }
}

/// 按平均延迟划分连接质量，阈值边界归属更好的一级
fn classify_quality(average_latency_ms: f64, config: &crate::config::HealthConfig) -> ConnectionQuality {
    if average_latency_ms <= config.latency_excellent_ms as f64 {
        ConnectionQuality::Excellent
    } else if average_latency_ms <= config.latency_good_ms as f64 {
        ConnectionQuality::Good
    } else if average_latency_ms <= config.latency_poor_ms as f64 {
        ConnectionQuality::Poor
    } else {
        ConnectionQuality::Critical
    }
}

/// 稳定性评分：窗口内断连越频繁评分越低
fn stability_score(disconnects_in_window: usize) -> f64 {
    (1.0 - disconnects_in_window as f64 * STABILITY_PENALTY_PER_DISCONNECT).max(0.0)
}

/// 动态漏跳阈值：稳定连接获得更高容忍度
fn dynamic_threshold(base: u32, stability: f64) -> u32 {
    let bonus = (stability * 2.0).floor() as u32;
    base.saturating_sub(bonus).max(1)
}

/// 清理滑动窗口外的断连事件
fn prune_disconnect_events(events: &mut VecDeque<i64>, now_ms: i64, window_ms: i64) {
    while let Some(oldest) = events.front() {
        if now_ms - oldest > window_ms {
            events.pop_front();
        } else {
            break;
        }
    }
}
