//! 数据完整性验证器
//! 负责更新入队前的结构校验与内容哈希计算

use std::sync::Arc;
use chrono::Utc;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::types::{UpdateKind, UpdatePayload};

/// FNV-1a 64位滚动哈希参数
const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// 计算负载的内容哈希
///
/// 先经serde_json规范化（对象键有序），再做FNV-1a滚动哈希，
/// 结果与字段插入顺序无关。非加密用途，仅作变更检测信号。
pub fn content_hash(payload: &UpdatePayload) -> u64 {
    let canonical = match serde_json::to_value(payload) {
        Ok(value) => value.to_string(),
        // Serialization of these payload types cannot fail; keep a stable sentinel anyway.
        Err(_) => String::new(),
    };

    let mut hash = FNV_OFFSET_BASIS;
    for byte in canonical.as_bytes() {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// 对负载做逐类别的结构校验
///
/// 纯函数，冲突解决器在合并后也用它做二次校验。
pub fn check_payload(payload: &UpdatePayload) -> Result<(), String> {
    match payload {
        UpdatePayload::Trade(trade) => {
            if trade.id.is_empty() {
                return Err("trade id is empty".to_string());
            }
            if trade.kol_wallet.is_empty() {
                return Err("trade kol_wallet is empty".to_string());
            }
            if trade.token_mint.is_empty() {
                return Err("trade token_mint is empty".to_string());
            }
            if !trade.amount_in.is_finite() || trade.amount_in < 0.0 {
                return Err(format!("trade amount_in is invalid: {}", trade.amount_in));
            }
            if !trade.amount_out.is_finite() || trade.amount_out < 0.0 {
                return Err(format!("trade amount_out is invalid: {}", trade.amount_out));
            }
            if trade.timestamp <= 0 {
                return Err(format!("trade timestamp is invalid: {}", trade.timestamp));
            }
            Ok(())
        }
        UpdatePayload::NetworkGraph(delta) => {
            if delta.token_mint.is_empty() {
                return Err("graph token_mint is empty".to_string());
            }
            if delta.connections.is_empty() {
                return Err("graph connection map is empty".to_string());
            }
            for (wallet, connection) in &delta.connections {
                if wallet.is_empty() || connection.kol_wallet.is_empty() {
                    return Err("graph connection has empty wallet".to_string());
                }
                if !connection.weight.is_finite() {
                    return Err(format!(
                        "graph connection weight is invalid: {}",
                        connection.weight
                    ));
                }
            }
            Ok(())
        }
        UpdatePayload::Stats(stats) => {
            if !stats.total_volume.is_finite() || stats.total_volume < 0.0 {
                return Err(format!("stats total_volume is invalid: {}", stats.total_volume));
            }
            Ok(())
        }
        UpdatePayload::Trending(set) => {
            if set.token_mints.iter().any(|mint| mint.is_empty()) {
                return Err("trending set contains empty mint".to_string());
            }
            Ok(())
        }
    }
}

/// 验证统计信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationStats {
    /// 总校验次数
    pub total_checked: u64,
    /// 通过次数
    pub passed: u64,
    /// 拒绝次数
    pub failed: u64,
    /// 最近一次拒绝的更新类别
    pub last_failure_kind: Option<UpdateKind>,
    /// 最近一次拒绝原因
    pub last_failure_reason: Option<String>,
    /// 最近一次拒绝时间戳（毫秒）
    pub last_failure_at: Option<i64>,
}

impl Default for ValidationStats {
    fn default() -> Self {
        Self {
            total_checked: 0,
            passed: 0,
            failed: 0,
            last_failure_kind: None,
            last_failure_reason: None,
            last_failure_at: None,
        }
    }
}

impl ValidationStats {
    /// 完整性评分（0.0-1.0）；无样本时按满分处理
    pub fn integrity_score(&self) -> f64 {
        if self.total_checked == 0 {
            return 1.0;
        }
        self.passed as f64 / self.total_checked as f64
    }
}

/// 数据完整性验证器
///
/// 校验失败只计数并丢弃，不抛出错误：畸形数据重试也不会变得合法。
#[derive(Debug, Clone)]
pub struct DataIntegrityValidator {
    /// 验证统计
    stats: Arc<RwLock<ValidationStats>>,
}

impl DataIntegrityValidator {
    /// 创建新的验证器
    pub fn new() -> Self {
        Self {
            stats: Arc::new(RwLock::new(ValidationStats::default())),
        }
    }

    /// 校验负载并记录统计，返回是否可入队
    pub async fn validate(&self, payload: &UpdatePayload) -> bool {
        let result = check_payload(payload);
        let mut stats = self.stats.write().await;
        stats.total_checked += 1;

        match result {
            Ok(()) => {
                stats.passed += 1;
                debug!("[Validator] 校验通过: kind={}", payload.kind());
                true
            }
            Err(reason) => {
                stats.failed += 1;
                stats.last_failure_kind = Some(payload.kind());
                stats.last_failure_reason = Some(reason.clone());
                stats.last_failure_at = Some(Utc::now().timestamp_millis());
                warn!("[Validator] 拒绝畸形更新: kind={} 原因={}", payload.kind(), reason);
                false
            }
        }
    }

    /// 当前完整性评分
    pub async fn integrity_score(&self) -> f64 {
        self.stats.read().await.integrity_score()
    }

    /// 统计快照
    pub async fn get_stats(&self) -> ValidationStats {
        self.stats.read().await.clone()
    }

    /// 重置统计
    pub async fn reset(&self) {
        *self.stats.write().await = ValidationStats::default();
    }
}

impl Default for DataIntegrityValidator {
    fn default() -> Self {
        Self::new()
    }
}
