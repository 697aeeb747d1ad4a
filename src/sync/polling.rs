//! 轮询降级控制器
//! 推送通道劣化时以自适应节奏注入刷新信号，恢复后退出

use std::sync::Arc;
use std::time::Duration;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::config::SyncEngineConfig;
use crate::sync::batcher::AdaptiveBatcher;
use crate::sync::health_monitor::ConnectionHealthMonitor;
use crate::sync::validator::content_hash;
use crate::types::{ConnectionQuality, StatsSnapshot, UpdatePayload, UpdateSource};

/// 轮询状态统计快照
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingStats {
    /// 是否处于轮询模式
    pub is_polling_mode: bool,
    /// 当前轮询间隔（毫秒）
    pub current_interval_ms: u64,
    /// 累计tick次数
    pub ticks: u64,
}

/// 轮询降级控制器
///
/// 每次tick向队列注入一条Low优先级的合成刷新信号，由外部
/// 订阅者识别后执行真正的网络拉取；本控制器自身不发请求。
/// 定时器在每次tick后按新间隔重新调度，持续自适应。
#[derive(Clone)]
pub struct PollingFallbackController {
    /// 引擎配置
    config: Arc<RwLock<SyncEngineConfig>>,
    /// 轮询状态
    state: Arc<RwLock<PollingState>>,
}

/// 轮询内部状态
struct PollingState {
    /// 轮询模式标记（防止重复启动定时器）
    is_polling_mode: bool,
    /// 当前自适应间隔（毫秒）
    current_interval_ms: u64,
    /// 累计tick次数
    ticks: u64,
    /// 轮询任务句柄
    task: Option<JoinHandle<()>>,
}

impl PollingFallbackController {
    /// 创建控制器，间隔取配置下限
    pub fn new(config: Arc<RwLock<SyncEngineConfig>>, floor_ms: u64) -> Self {
        Self {
            config,
            state: Arc::new(RwLock::new(PollingState {
                is_polling_mode: false,
                current_interval_ms: floor_ms,
                ticks: 0,
                task: None,
            })),
        }
    }

    /// 激活轮询降级（幂等：已激活时为空操作）
    pub async fn activate(&self, batcher: AdaptiveBatcher, health: ConnectionHealthMonitor) {
        let floor = self.config.read().await.polling.fallback_interval_ms;

        {
            let mut state = self.state.write().await;
            if state.is_polling_mode {
                debug!("[PollingFallback] 已处于轮询模式，忽略重复激活");
                return;
            }
            state.is_polling_mode = true;
            state.current_interval_ms = floor;
        }
        health.set_polling_state(true, floor).await;
        info!("[PollingFallback] 轮询降级激活，初始间隔{}ms", floor);

        let controller = self.clone();
        let handle = tokio::spawn(async move {
            loop {
                // 每轮重新读取间隔，即定时器以新值重新调度
                let interval = controller.state.read().await.current_interval_ms;
                tokio::time::sleep(Duration::from_millis(interval)).await;

                if !controller.state.read().await.is_polling_mode {
                    break;
                }

                // 注入合成刷新信号，由外部订阅者执行真实拉取
                let payload = UpdatePayload::Stats(StatsSnapshot::polling_refresh());
                let hash = content_hash(&payload);
                batcher
                    .enqueue(payload, UpdateSource::PollingFallback, None, hash)
                    .await;

                let polling = controller.config.read().await.polling.clone();
                let quality = health.quality().await;

                let mut state = controller.state.write().await;
                state.ticks += 1;
                let current = state.current_interval_ms as f64;
                let next = if quality == ConnectionQuality::Critical {
                    (current * polling.backoff_multiplier).round() as u64
                } else {
                    (current / polling.backoff_multiplier).round() as u64
                };
                let next = next.clamp(polling.fallback_interval_ms, polling.max_interval_ms);
                let changed = next != state.current_interval_ms;
                state.current_interval_ms = next;
                drop(state);

                health.set_polling_state(true, next).await;
                if changed {
                    debug!(
                        "[PollingFallback] tick后间隔调整为{}ms (质量={})",
                        next, quality
                    );
                }
            }
        });
        self.state.write().await.task = Some(handle);
    }

    /// 关闭轮询降级，间隔复位到下限（幂等）
    pub async fn deactivate(&self, health: &ConnectionHealthMonitor) {
        let floor = self.config.read().await.polling.fallback_interval_ms;

        let mut state = self.state.write().await;
        if !state.is_polling_mode {
            return;
        }
        state.is_polling_mode = false;
        if let Some(task) = state.task.take() {
            task.abort();
        }
        state.current_interval_ms = floor;
        drop(state);

        health.set_polling_state(false, floor).await;
        info!("[PollingFallback] 轮询降级关闭，间隔复位到{}ms", floor);
    }

    /// 是否处于轮询模式
    pub async fn is_polling_mode(&self) -> bool {
        self.state.read().await.is_polling_mode
    }

    /// 当前轮询间隔（毫秒）
    pub async fn current_interval_ms(&self) -> u64 {
        self.state.read().await.current_interval_ms
    }

    /// 状态统计快照
    pub async fn get_stats(&self) -> PollingStats {
        let state = self.state.read().await;
        PollingStats {
            is_polling_mode: state.is_polling_mode,
            current_interval_ms: state.current_interval_ms,
            ticks: state.ticks,
        }
    }
}
