//! 缓存协作方边界
//! 冲突比对用的"最近已知值"查找接口与内存参考实现

use std::sync::Arc;
use dashmap::DashMap;

use crate::sync::batcher::SubscriberCallback;
use crate::types::{Update, UpdateBatch, UpdateKind, UpdatePayload};

/// 缓存存储协作方契约
///
/// `get_cached`在入队路径上内联调用，实现必须是同步快速查找；
/// 对数据新鲜度不做任何保证（见引擎的读后写一致性取舍）。
pub trait CacheStore: Send + Sync {
    /// 查找某逻辑键的最近已知记录
    fn get_cached(&self, kind: UpdateKind, key: &str) -> Option<Update>;

    /// 写入一条已接受的记录（通常由派发后的订阅者调用）
    fn store(&self, update: Update);
}

/// 基于DashMap的内存缓存实现
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    entries: DashMap<(UpdateKind, String), Update>,
}

impl MemoryCacheStore {
    /// 创建空缓存
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// 当前缓存条目数
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// 缓存是否为空
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl CacheStore for MemoryCacheStore {
    fn get_cached(&self, kind: UpdateKind, key: &str) -> Option<Update> {
        self.entries
            .get(&(kind, key.to_string()))
            .map(|entry| entry.value().clone())
    }

    fn store(&self, update: Update) {
        let key = (update.kind(), update.logical_key());
        self.entries.insert(key, update);
    }
}

/// 构造把派发结果回写缓存的订阅者回调
///
/// 合成轮询刷新信号不回写：它不是状态，只是拉取触发器，
/// 写入会踩掉真实的全局统计缓存。
pub fn cache_writer_subscriber(store: Arc<dyn CacheStore>) -> SubscriberCallback {
    Arc::new(move |batch: &UpdateBatch| {
        for update in &batch.updates {
            if let UpdatePayload::Stats(stats) = &update.payload {
                if stats.is_polling_refresh {
                    continue;
                }
            }
            store.store(update.clone());
        }
        Ok(())
    })
}
