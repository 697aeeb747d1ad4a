//! 实时同步引擎
//! 组装校验、冲突裁决、健康监控、轮询降级与批处理的总控

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use chrono::Utc;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::config::{SyncConfigUpdate, SyncEngineConfig};
use crate::sync::batcher::{AdaptiveBatcher, SubscriberCallback};
use crate::sync::cache::CacheStore;
use crate::sync::conflict;
use crate::sync::health_monitor::ConnectionHealthMonitor;
use crate::sync::polling::PollingFallbackController;
use crate::sync::validator::{content_hash, DataIntegrityValidator, ValidationStats};
use crate::types::{
    BatchPerformanceStats, ConnectionHealth, HealthTransition, SyncError, UpdateBatch,
    UpdatePayload, UpdateSource,
};

/// 引擎状态快照
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncEngineStatus {
    /// 待刷出队列长度
    pub queue_size: usize,
    /// 订阅者数量
    pub subscriber_count: usize,
    /// 是否有刷出进行中
    pub is_processing: bool,
    /// 是否处于轮询降级模式
    pub is_polling_mode: bool,
    /// 连接健康快照
    pub connection_health: ConnectionHealth,
    /// 当前生效的批处理间隔（毫秒）
    pub adaptive_interval_ms: u64,
    /// 批处理性能统计
    pub batch_performance: BatchPerformanceStats,
    /// 数据完整性统计
    pub data_integrity: ValidationStats,
}

/// 实时同步引擎
///
/// 显式构造、显式销毁，不依赖任何进程级单例；
/// 多实例可并存（测试各自独立建一个即可）。
#[derive(Clone)]
pub struct RealtimeSyncEngine {
    /// 引擎配置（热更新共享）
    config: Arc<RwLock<SyncEngineConfig>>,
    /// 缓存协作方（冲突比对的最近已知值来源）
    cache: Arc<dyn CacheStore>,
    /// 数据完整性验证器
    validator: DataIntegrityValidator,
    /// 连接健康监控器
    health: ConnectionHealthMonitor,
    /// 轮询降级控制器
    polling: PollingFallbackController,
    /// 更新队列与批处理器
    batcher: AdaptiveBatcher,
    /// 后台任务句柄
    tasks: Arc<RwLock<EngineTasks>>,
    /// 销毁标记（销毁后入队直接丢弃）
    destroyed: Arc<AtomicBool>,
}

/// 引擎后台任务
struct EngineTasks {
    /// 批处理定时刷出任务
    flush_task: Option<JoinHandle<()>>,
    /// 心跳停滞看门狗任务
    watchdog_task: Option<JoinHandle<()>>,
    /// 是否已启动
    started: bool,
}

impl RealtimeSyncEngine {
    /// 创建引擎（尚未启动定时器，见`start`）
    pub fn new(config: SyncEngineConfig, cache: Arc<dyn CacheStore>) -> Result<Self, SyncError> {
        config.validate()?;

        let base_interval = config
            .batching
            .base_interval_ms
            .clamp(config.batching.min_interval_ms, config.batching.max_interval_ms);
        let polling_floor = config.polling.fallback_interval_ms;

        let config = Arc::new(RwLock::new(config));
        let validator = DataIntegrityValidator::new();
        let health = ConnectionHealthMonitor::new(config.clone(), polling_floor);
        let polling = PollingFallbackController::new(config.clone(), polling_floor);
        let batcher = AdaptiveBatcher::new(
            config.clone(),
            health.clone(),
            validator.clone(),
            base_interval,
        );

        Ok(Self {
            config,
            cache,
            validator,
            health,
            polling,
            batcher,
            tasks: Arc::new(RwLock::new(EngineTasks {
                flush_task: None,
                watchdog_task: None,
                started: false,
            })),
            destroyed: Arc::new(AtomicBool::new(false)),
        })
    }

    /// 启动定时刷出与心跳看门狗（幂等）
    pub async fn start(&self) {
        let mut tasks = self.tasks.write().await;
        if tasks.started {
            return;
        }
        tasks.started = true;
        tasks.flush_task = Some(self.spawn_flush_loop());
        tasks.watchdog_task = Some(self.spawn_watchdog());
        info!("[SyncEngine] 引擎启动");
    }

    fn spawn_flush_loop(&self) -> JoinHandle<()> {
        let engine = self.clone();
        tokio::spawn(async move {
            loop {
                // 每轮取最新生效间隔，相当于调整后重建定时器
                let interval = engine.batcher.current_interval_ms().await;
                tokio::time::sleep(Duration::from_millis(interval)).await;
                if engine.destroyed.load(Ordering::SeqCst) {
                    break;
                }
                engine.batcher.flush().await;
            }
        })
    }

    fn spawn_watchdog(&self) -> JoinHandle<()> {
        let engine = self.clone();
        tokio::spawn(async move {
            loop {
                let interval = engine.config.read().await.health.health_check_interval_ms;
                tokio::time::sleep(Duration::from_millis(interval)).await;
                if engine.destroyed.load(Ordering::SeqCst) {
                    break;
                }
                if let Some(HealthTransition::BecameUnhealthy) =
                    engine.health.check_staleness().await
                {
                    engine
                        .polling
                        .activate(engine.batcher.clone(), engine.health.clone())
                        .await;
                }
            }
        })
    }

    /// 入队一条更新
    ///
    /// 对合法形态的输入从不报错：校验失败只计数丢弃，
    /// 冲突一律在入队前裁决完毕。
    pub async fn enqueue(&self, payload: UpdatePayload, source: UpdateSource) {
        if self.destroyed.load(Ordering::SeqCst) {
            warn!("[SyncEngine] 引擎已销毁，丢弃入队请求");
            return;
        }

        if !self.validator.validate(&payload).await {
            // 畸形数据重试不会变得合法，丢弃不重试
            return;
        }

        let observed_at = Utc::now().timestamp_millis();
        let kind = payload.kind();
        let key = payload.logical_key();
        let cached = self.cache.get_cached(kind, &key);

        let conflict_config = self.config.read().await.conflict.clone();
        let resolution = conflict::resolve(&conflict_config, payload, observed_at, cached.as_ref());

        if let Some(info) = &resolution.conflict_info {
            debug!(
                "[SyncEngine] 冲突裁决: kind={} key={} 结局={}",
                kind, key, info.resolution
            );
        }

        let hash = content_hash(&resolution.payload);
        let outcome = self
            .batcher
            .enqueue(resolution.payload, source, resolution.conflict_info, hash)
            .await;

        if outcome.flush_now {
            debug!("[SyncEngine] 触发立即刷出 (队列长度={})", outcome.queue_len);
            self.batcher.flush().await;
        }
    }

    /// 传输层连通性上报入口
    pub async fn report_connectivity(&self, is_connected: bool, latency_ms: Option<u64>) {
        match self.health.report_connectivity(is_connected, latency_ms).await {
            Some(HealthTransition::BecameUnhealthy) => {
                self.polling
                    .activate(self.batcher.clone(), self.health.clone())
                    .await;
            }
            Some(HealthTransition::BecameHealthy) => {
                self.polling.deactivate(&self.health).await;
            }
            None => {}
        }
    }

    /// 注册订阅者
    pub fn subscribe(&self, id: &str, callback: SubscriberCallback) {
        self.batcher.subscribe(id, callback);
    }

    /// 注销订阅者
    pub fn unsubscribe(&self, id: &str) {
        self.batcher.unsubscribe(id);
    }

    /// 连接健康只读快照
    pub async fn get_connection_health(&self) -> ConnectionHealth {
        self.health.snapshot().await
    }

    /// 引擎状态快照
    pub async fn get_status(&self) -> SyncEngineStatus {
        SyncEngineStatus {
            queue_size: self.batcher.queue_size().await,
            subscriber_count: self.batcher.subscriber_count(),
            is_processing: self.batcher.is_processing(),
            is_polling_mode: self.polling.is_polling_mode().await,
            connection_health: self.health.snapshot().await,
            adaptive_interval_ms: self.batcher.current_interval_ms().await,
            batch_performance: self.batcher.performance_snapshot().await,
            data_integrity: self.validator.get_stats().await,
        }
    }

    /// 绕过定时器刷出一批（规模仍受自适应上限约束）
    pub async fn flush(&self) -> Option<UpdateBatch> {
        self.batcher.flush().await
    }

    /// 绕过定时器排空整个队列
    pub async fn force_flush(&self) -> Option<UpdateBatch> {
        self.batcher.force_flush().await
    }

    /// 热更新配置：合并、校验、应用，并重建两个定时器
    pub async fn update_configuration(&self, update: SyncConfigUpdate) -> Result<(), SyncError> {
        let merged = self.config.read().await.apply_update(update);
        merged.validate()?;
        *self.config.write().await = merged;

        self.batcher.apply_config().await;

        // 定时器重建后立即按新间隔运行
        let mut tasks = self.tasks.write().await;
        if tasks.started {
            if let Some(task) = tasks.flush_task.take() {
                task.abort();
            }
            if let Some(task) = tasks.watchdog_task.take() {
                task.abort();
            }
            tasks.flush_task = Some(self.spawn_flush_loop());
            tasks.watchdog_task = Some(self.spawn_watchdog());
        }
        drop(tasks);

        // 轮询若在运行，按新的下限间隔重启
        if self.polling.is_polling_mode().await {
            self.polling.deactivate(&self.health).await;
            self.polling
                .activate(self.batcher.clone(), self.health.clone())
                .await;
        }

        info!("[SyncEngine] 配置已热更新，定时器已重建");
        Ok(())
    }

    /// 重置全部可累计指标
    pub async fn reset_metrics(&self) {
        self.batcher.reset_metrics().await;
        self.validator.reset().await;
        self.health.reset_metrics().await;
        info!("[SyncEngine] 指标已重置");
    }

    /// 销毁引擎：停掉两个定时器与轮询任务并清空订阅者
    ///
    /// 进行中的刷出允许自然结束；销毁后入队为静默丢弃。
    pub async fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }

        let mut tasks = self.tasks.write().await;
        if let Some(task) = tasks.flush_task.take() {
            task.abort();
        }
        if let Some(task) = tasks.watchdog_task.take() {
            task.abort();
        }
        tasks.started = false;
        drop(tasks);

        self.polling.deactivate(&self.health).await;
        self.batcher.clear_subscribers();
        info!("[SyncEngine] 引擎已销毁");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::cache::{cache_writer_subscriber, MemoryCacheStore};
    use crate::types::{StatsSnapshot, TradeActivity, TradeSide, UpdatePriority};
    use std::sync::Mutex;

    fn trade(id: &str, amount_in: f64) -> UpdatePayload {
        UpdatePayload::Trade(TradeActivity {
            id: id.to_string(),
            kol_wallet: "wallet-a".to_string(),
            trade_type: TradeSide::Buy,
            token_mint: "mint-x".to_string(),
            amount_in,
            amount_out: 0.0,
            timestamp: 1_700_000_000_000,
            token_name: None,
            token_symbol: None,
            token_image: None,
            prediction_score: None,
            graph_weight: None,
        })
    }

    fn new_engine() -> RealtimeSyncEngine {
        RealtimeSyncEngine::new(
            SyncEngineConfig::default(),
            Arc::new(MemoryCacheStore::new()),
        )
        .expect("默认配置下创建引擎不应失败")
    }

    #[tokio::test]
    async fn test_engine_initial_status() {
        let engine = new_engine();
        let status = engine.get_status().await;

        assert_eq!(status.queue_size, 0);
        assert_eq!(status.subscriber_count, 0);
        assert!(!status.is_processing);
        assert!(!status.is_polling_mode);
        assert!(status.connection_health.is_healthy);
        assert_eq!(status.adaptive_interval_ms, 200);
    }

    #[tokio::test]
    async fn test_invalid_update_is_dropped_silently() {
        let _ = env_logger::try_init();
        let engine = new_engine();

        engine
            .enqueue(trade("", 100.0), UpdateSource::PushChannel)
            .await;

        let status = engine.get_status().await;
        assert_eq!(status.queue_size, 0, "畸形更新不应入队");
        assert_eq!(status.data_integrity.failed, 1);
    }

    #[tokio::test]
    async fn test_dispatch_path_delivers_sorted_batch() {
        let engine = new_engine();
        let received: Arc<Mutex<Vec<UpdateBatch>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        engine.subscribe(
            "test-sink",
            Arc::new(move |batch: &UpdateBatch| {
                sink.lock().unwrap().push(batch.clone());
                Ok(())
            }),
        );

        engine
            .enqueue(
                UpdatePayload::Stats(StatsSnapshot {
                    total_trades: 5,
                    active_wallets: 2,
                    total_volume: 100.0,
                    is_polling_refresh: false,
                }),
                UpdateSource::PushChannel,
            )
            .await;
        engine
            .enqueue(trade("T1", 50.0), UpdateSource::PushChannel)
            .await;
        engine.force_flush().await.expect("批次不应为空");

        let batches = received.lock().unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 2);
        assert_eq!(batches[0].data_integrity_score, 1.0);
    }

    #[tokio::test]
    async fn test_high_priority_trade_flushes_immediately() {
        let engine = new_engine();
        let received: Arc<Mutex<Vec<UpdateBatch>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        engine.subscribe(
            "test-sink",
            Arc::new(move |batch: &UpdateBatch| {
                sink.lock().unwrap().push(batch.clone());
                Ok(())
            }),
        );

        // 大额交易不等定时器，入队即刷出
        engine
            .enqueue(trade("T-big", 15000.0), UpdateSource::PushChannel)
            .await;

        let batches = received.lock().unwrap();
        assert_eq!(batches.len(), 1, "High优先级应触发立即刷出");
        assert_eq!(batches[0].priority, UpdatePriority::High);
        assert_eq!(batches[0].updates[0].priority, UpdatePriority::High);
    }

    #[tokio::test]
    async fn test_conflict_merge_through_cache() {
        let engine = {
            let cache = Arc::new(MemoryCacheStore::new());
            let engine = RealtimeSyncEngine::new(SyncEngineConfig::default(), cache.clone())
                .expect("创建引擎失败");
            // 派发后回写缓存，形成冲突比对环路
            engine.subscribe("cache-writer", cache_writer_subscriber(cache));
            engine
        };

        // 第一条T1带name缺symbol
        let mut first = trade("T1", 100.0);
        if let UpdatePayload::Trade(t) = &mut first {
            t.token_name = Some("Foo".to_string());
        }
        engine.enqueue(first, UpdateSource::PushChannel).await;
        let batch = engine.force_flush().await.expect("首批不应为空");
        assert_eq!(batch.conflicts_resolved, 0);

        // 第二条T1带symbol缺name，合并后两者齐备
        let mut second = trade("T1", 100.0);
        if let UpdatePayload::Trade(t) = &mut second {
            t.token_symbol = Some("FOO".to_string());
        }
        engine.enqueue(second, UpdateSource::PushChannel).await;
        let batch = engine.force_flush().await.expect("次批不应为空");

        assert_eq!(batch.conflicts_resolved, 1, "重复键应记录冲突");
        match &batch.updates[0].payload {
            UpdatePayload::Trade(t) => {
                assert_eq!(t.token_name.as_deref(), Some("Foo"));
                assert_eq!(t.token_symbol.as_deref(), Some("FOO"));
            }
            other => panic!("unexpected payload: {:?}", other),
        }
        assert!(batch.updates[0].had_conflict());
    }

    #[tokio::test]
    async fn test_unhealthy_transition_activates_polling() {
        let engine = new_engine();

        for _ in 0..3 {
            engine.report_connectivity(false, None).await;
        }

        let status = engine.get_status().await;
        assert!(!status.connection_health.is_healthy);
        assert!(status.is_polling_mode);
        assert!(status.connection_health.polling_fallback_active);

        // 心跳恢复后轮询退出
        engine.report_connectivity(true, Some(50)).await;
        let status = engine.get_status().await;
        assert!(status.connection_health.is_healthy);
        assert!(!status.is_polling_mode);
    }

    #[tokio::test]
    async fn test_update_configuration_rebuilds_timers() {
        let engine = new_engine();
        engine.start().await;

        let mut batching = crate::config::BatchingConfig::default();
        batching.base_interval_ms = 500;
        batching.min_interval_ms = 100;
        batching.max_interval_ms = 5000;

        engine
            .update_configuration(SyncConfigUpdate {
                batching: Some(batching),
                ..Default::default()
            })
            .await
            .expect("合法配置更新不应失败");

        let status = engine.get_status().await;
        assert_eq!(status.adaptive_interval_ms, 500, "新基准间隔应立即生效");

        // 非法更新被整体拒绝
        let mut bad = crate::config::BatchingConfig::default();
        bad.min_interval_ms = 0;
        let result = engine
            .update_configuration(SyncConfigUpdate {
                batching: Some(bad),
                ..Default::default()
            })
            .await;
        assert!(result.is_err());

        engine.destroy().await;
    }

    #[tokio::test]
    async fn test_reset_metrics_clears_counters() {
        let engine = new_engine();
        engine
            .enqueue(trade("", 1.0), UpdateSource::PushChannel)
            .await;
        engine
            .enqueue(trade("T1", 1.0), UpdateSource::PushChannel)
            .await;
        engine.force_flush().await;

        engine.reset_metrics().await;
        let status = engine.get_status().await;
        assert_eq!(status.data_integrity.total_checked, 0);
        assert_eq!(status.batch_performance.batches_dispatched, 0);
    }

    #[tokio::test]
    async fn test_destroy_clears_subscribers_and_drops_enqueues() {
        let engine = new_engine();
        engine.start().await;
        engine.subscribe("sink", Arc::new(|_batch: &UpdateBatch| Ok(())));
        assert_eq!(engine.get_status().await.subscriber_count, 1);

        engine.destroy().await;
        let status = engine.get_status().await;
        assert_eq!(status.subscriber_count, 0);

        engine
            .enqueue(trade("T1", 10.0), UpdateSource::PushChannel)
            .await;
        assert_eq!(engine.get_status().await.queue_size, 0, "销毁后入队应被丢弃");

        // 重复销毁为空操作
        engine.destroy().await;
    }
}
