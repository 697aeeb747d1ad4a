//! 更新队列与自适应批处理器
//! 同步引擎的调度核心：入队、优先级、批量刷出与间隔自调

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use chrono::Utc;
use dashmap::DashMap;
use log::{debug, info, warn};
use tokio::sync::RwLock;

use crate::config::{BatchingConfig, PriorityConfig, SyncEngineConfig};
use crate::sync::health_monitor::ConnectionHealthMonitor;
use crate::sync::validator::DataIntegrityValidator;
use crate::types::{
    BatchPerformanceStats, ConflictInfo, ConnectionQuality, SyncError, Update, UpdateBatch,
    UpdatePayload, UpdatePriority, UpdateSource,
};

/// 订阅者回调；返回Err时仅记录日志，不影响其他订阅者
pub type SubscriberCallback = Arc<dyn Fn(&UpdateBatch) -> Result<(), SyncError> + Send + Sync>;

/// 入队结果
#[derive(Debug, Clone, Copy)]
pub struct EnqueueOutcome {
    /// 入队后的队列长度
    pub queue_len: usize,
    /// 是否应立即刷出（而非等待定时器）
    pub flush_now: bool,
}

/// 更新队列与自适应批处理器
///
/// 队列由批处理器独占：生产者只追加，批次在刷出时一次性排出，
/// 单次排出内不丢失、不重复、不跨批拆分。
#[derive(Clone)]
pub struct AdaptiveBatcher {
    /// 引擎配置
    config: Arc<RwLock<SyncEngineConfig>>,
    /// 连接健康监控器（提供质量因子）
    health: ConnectionHealthMonitor,
    /// 完整性验证器（提供封批评分）
    validator: DataIntegrityValidator,
    /// 订阅者注册表
    subscribers: Arc<DashMap<String, SubscriberCallback>>,
    /// 刷出进行中标记（重叠的定时器触发直接空转）
    processing: Arc<AtomicBool>,
    /// 批处理状态
    state: Arc<RwLock<BatcherState>>,
}

/// 批处理内部状态
struct BatcherState {
    /// 待刷出的更新队列
    queue: VecDeque<Update>,
    /// 下一个序列号（进程内严格递增）
    next_sequence: u64,
    /// 下一个批次ID（单调递增）
    next_batch_id: u64,
    /// 性能调优后的基准间隔（毫秒）
    tuned_interval_ms: u64,
    /// 叠加质量因子后的生效间隔（毫秒）
    effective_interval_ms: u64,
    /// 最近若干次刷出的处理耗时（毫秒）
    processing_samples: VecDeque<f64>,
    /// 批处理性能统计
    performance: BatchPerformanceStats,
}

impl AdaptiveBatcher {
    /// 创建批处理器，初始间隔取配置基准值
    pub fn new(
        config: Arc<RwLock<SyncEngineConfig>>,
        health: ConnectionHealthMonitor,
        validator: DataIntegrityValidator,
        base_interval_ms: u64,
    ) -> Self {
        Self {
            config,
            health,
            validator,
            subscribers: Arc::new(DashMap::new()),
            processing: Arc::new(AtomicBool::new(false)),
            state: Arc::new(RwLock::new(BatcherState {
                queue: VecDeque::new(),
                next_sequence: 0,
                next_batch_id: 0,
                tuned_interval_ms: base_interval_ms,
                effective_interval_ms: base_interval_ms,
                processing_samples: VecDeque::new(),
                performance: BatchPerformanceStats::default(),
            })),
        }
    }

    /// 将一条已校验、已裁决的更新追加到队列
    pub async fn enqueue(
        &self,
        payload: UpdatePayload,
        source: UpdateSource,
        conflict_info: Option<ConflictInfo>,
        content_hash: u64,
    ) -> EnqueueOutcome {
        let config = self.config.read().await;
        let priority = compute_priority(&payload, source, &config.priority);
        let batching = config.batching.clone();
        drop(config);

        let quality = self.health.quality().await;
        let now = Utc::now().timestamp_millis();

        let mut state = self.state.write().await;
        let sequence = state.next_sequence;
        state.next_sequence += 1;

        let update = Update {
            id: format!("upd-{}-{}", sequence, now),
            payload,
            observed_at: now,
            sequence_number: sequence,
            source,
            priority,
            content_hash,
            conflict_info,
        };

        debug!(
            "[Batcher] 入队: id={} kind={} priority={:?} source={:?}",
            update.id,
            update.kind(),
            priority,
            source
        );
        state.queue.push_back(update);

        let flush_now = should_flush_now(&state.queue, &batching, quality);
        EnqueueOutcome {
            queue_len: state.queue.len(),
            flush_now,
        }
    }

    /// 按自适应批次规模刷出一批
    pub async fn flush(&self) -> Option<UpdateBatch> {
        self.flush_internal(false).await
    }

    /// 一次性排空整个队列（关停或测试确定性用）
    pub async fn force_flush(&self) -> Option<UpdateBatch> {
        self.flush_internal(true).await
    }

    async fn flush_internal(&self, drain_all: bool) -> Option<UpdateBatch> {
        if self.processing.swap(true, Ordering::SeqCst) {
            return None;
        }
        // 任务被取消时由守卫复位标记，避免刷出永久卡死
        let _processing_guard = ProcessingGuard {
            flag: Arc::clone(&self.processing),
        };

        let config = self.config.read().await.batching.clone();
        let quality = self.health.quality().await;
        let integrity_score = self.validator.integrity_score().await;

        let batch = {
            let mut state = self.state.write().await;
            if state.queue.is_empty() {
                return None;
            }

            let drain_count = if drain_all {
                state.queue.len()
            } else {
                adaptive_batch_size(&state.queue, &config, quality).min(state.queue.len())
            };

            let mut updates: Vec<Update> = state.queue.drain(..drain_count).collect();
            updates.sort_by_key(|u| (u.priority.severity_rank(), u.sequence_number));

            let priority = updates
                .iter()
                .map(|u| u.priority)
                .min_by_key(|p| p.severity_rank())
                .unwrap_or(UpdatePriority::Low);
            let conflicts_resolved = updates.iter().filter(|u| u.had_conflict()).count();

            let batch = UpdateBatch {
                id: state.next_batch_id,
                created_at: Utc::now().timestamp_millis(),
                updates,
                priority,
                conflicts_resolved,
                data_integrity_score: integrity_score,
                adaptive_interval_ms: state.effective_interval_ms,
            };
            state.next_batch_id += 1;
            batch
        };

        let started = Instant::now();
        let failures = self.dispatch(&batch);
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

        let mut state = self.state.write().await;
        state.processing_samples.push_back(elapsed_ms);
        while state.processing_samples.len() > config.performance_window {
            state.processing_samples.pop_front();
        }
        let avg_ms = state.processing_samples.iter().sum::<f64>()
            / state.processing_samples.len() as f64;

        let (tuned, effective) =
            next_interval(state.tuned_interval_ms, avg_ms, quality, &config);
        if effective != state.effective_interval_ms {
            debug!(
                "[Batcher] 刷出间隔调整: {}ms -> {}ms (均耗时={:.1}ms 质量={})",
                state.effective_interval_ms, effective, avg_ms, quality
            );
        }
        state.tuned_interval_ms = tuned;
        state.effective_interval_ms = effective;

        state.performance.batches_dispatched += 1;
        state.performance.updates_dispatched += batch.updates.len() as u64;
        state.performance.conflicts_resolved += batch.conflicts_resolved as u64;
        state.performance.avg_processing_time_ms = avg_ms;
        state.performance.dispatch_failures += failures;
        state.performance.last_flush_at = Some(batch.created_at);

        info!(
            "[Batcher] 批次#{}已派发: {}条更新 冲突={} 优先级={:?} 剩余队列={}",
            batch.id,
            batch.updates.len(),
            batch.conflicts_resolved,
            batch.priority,
            state.queue.len()
        );
        Some(batch)
    }

    /// 向全部订阅者派发批次；单个失败不影响其余，也不重发
    fn dispatch(&self, batch: &UpdateBatch) -> u64 {
        let mut failures = 0;
        for entry in self.subscribers.iter() {
            if let Err(e) = (entry.value())(batch) {
                warn!("[Batcher] 订阅者'{}'处理批次#{}失败: {}", entry.key(), batch.id, e);
                failures += 1;
            }
        }
        failures
    }

    /// 注册订阅者；同名订阅者被替换
    pub fn subscribe(&self, id: &str, callback: SubscriberCallback) {
        self.subscribers.insert(id.to_string(), callback);
    }

    /// 注销订阅者
    pub fn unsubscribe(&self, id: &str) {
        self.subscribers.remove(id);
    }

    /// 清空订阅者注册表
    pub fn clear_subscribers(&self) {
        self.subscribers.clear();
    }

    /// 订阅者数量
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// 当前队列长度
    pub async fn queue_size(&self) -> usize {
        self.state.read().await.queue.len()
    }

    /// 是否有刷出正在进行
    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::SeqCst)
    }

    /// 当前生效的自适应刷出间隔（毫秒）
    pub async fn current_interval_ms(&self) -> u64 {
        self.state.read().await.effective_interval_ms
    }

    /// 性能统计快照
    pub async fn performance_snapshot(&self) -> BatchPerformanceStats {
        self.state.read().await.performance.clone()
    }

    /// 配置热更新后重置自适应间隔到新基准
    pub async fn apply_config(&self) {
        let config = self.config.read().await.batching.clone();
        let mut state = self.state.write().await;
        state.tuned_interval_ms = config
            .base_interval_ms
            .clamp(config.min_interval_ms, config.max_interval_ms);
        state.effective_interval_ms = state.tuned_interval_ms;
        state.processing_samples.clear();
    }

    /// 重置性能指标（队列与序列号保持不变）
    pub async fn reset_metrics(&self) {
        let mut state = self.state.write().await;
        state.processing_samples.clear();
        state.performance = BatchPerformanceStats::default();
    }
}

/// 刷出进行中标记的复位守卫
struct ProcessingGuard {
    flag: Arc<AtomicBool>,
}

impl Drop for ProcessingGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// 按类别与负载量级推导优先级
///
/// 轮询刷新信号与缓存回放恒为Low；轮询通道的真实数据
/// 最高记为Medium（降级通道本身就是低优先级刷新）。
pub fn compute_priority(
    payload: &UpdatePayload,
    source: UpdateSource,
    config: &PriorityConfig,
) -> UpdatePriority {
    if let UpdatePayload::Stats(stats) = payload {
        if stats.is_polling_refresh {
            return UpdatePriority::Low;
        }
    }
    if source == UpdateSource::Cache {
        return UpdatePriority::Low;
    }

    let base = match payload {
        UpdatePayload::Trade(trade) => {
            let volume = trade.amount_in.max(trade.amount_out);
            if volume >= config.critical_trade_volume {
                UpdatePriority::Critical
            } else if volume >= config.large_trade_volume {
                UpdatePriority::High
            } else {
                UpdatePriority::Medium
            }
        }
        UpdatePayload::NetworkGraph(delta) => {
            if delta.connections.len() >= config.large_graph_connections {
                UpdatePriority::High
            } else {
                UpdatePriority::Medium
            }
        }
        UpdatePayload::Stats(_) => UpdatePriority::Medium,
        UpdatePayload::Trending(_) => UpdatePriority::Medium,
    };

    if source == UpdateSource::PollingFallback
        && base.severity_rank() < UpdatePriority::Medium.severity_rank()
    {
        return UpdatePriority::Medium;
    }
    base
}

/// 立即刷出判定
fn should_flush_now(
    queue: &VecDeque<Update>,
    config: &BatchingConfig,
    quality: ConnectionQuality,
) -> bool {
    if queue.len() >= config.max_batch_size {
        return true;
    }

    let mut high_count = 0;
    for update in queue {
        match update.priority {
            UpdatePriority::Critical => return true,
            UpdatePriority::High => high_count += 1,
            _ => {}
        }
    }
    if high_count >= config.high_priority_flush_threshold {
        return true;
    }

    // 劣化连接以更小的批次更积极地刷出，压住数据陈旧度
    let degraded = matches!(quality, ConnectionQuality::Poor | ConnectionQuality::Critical);
    degraded && queue.len() >= config.degraded_queue_threshold
}

/// 按队列构成与连接质量确定本次批次规模
fn adaptive_batch_size(
    queue: &VecDeque<Update>,
    config: &BatchingConfig,
    quality: ConnectionQuality,
) -> usize {
    let has_critical = queue.iter().any(|u| u.priority == UpdatePriority::Critical);
    if has_critical {
        return config.critical_batch_size.max(1);
    }
    let has_high = queue.iter().any(|u| u.priority == UpdatePriority::High);
    if has_high {
        return config.high_batch_size.max(1);
    }
    ((config.max_batch_size as f64 * quality.batch_size_factor()).floor() as usize).max(1)
}

/// 刷出间隔状态迁移（纯函数）
///
/// 性能调整作用在持久的基准值上：均耗时超过慢阈值放大1.2倍，
/// 低于快阈值收紧0.9倍；质量因子只缩放生效值，避免逐次复利。
/// 两者都钳制在配置区间内，由调度循环在刷出后应用。
pub fn next_interval(
    tuned_ms: u64,
    avg_processing_ms: f64,
    quality: ConnectionQuality,
    config: &BatchingConfig,
) -> (u64, u64) {
    let mut tuned = tuned_ms as f64;
    if avg_processing_ms > config.slow_flush_threshold_ms {
        tuned *= 1.2;
    } else if avg_processing_ms < config.fast_flush_threshold_ms {
        tuned *= 0.9;
    }

    let tuned = (tuned.round() as u64).clamp(config.min_interval_ms, config.max_interval_ms);
    let effective = ((tuned as f64 * quality.interval_factor()).round() as u64)
        .clamp(config.min_interval_ms, config.max_interval_ms);
    (tuned, effective)
}
