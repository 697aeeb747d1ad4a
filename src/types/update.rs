// src/types/update.rs - 更新记录类型定义

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// 交易方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    Buy,
    Sell,
}

/// KOL交易活动记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeActivity {
    /// 交易唯一标识
    pub id: String,
    /// KOL钱包地址
    pub kol_wallet: String,
    /// 交易方向
    pub trade_type: TradeSide,
    /// 代币mint地址
    pub token_mint: String,
    /// 买入金额（USD）
    pub amount_in: f64,
    /// 卖出金额（USD）
    pub amount_out: f64,
    /// 交易时间戳（毫秒）
    pub timestamp: i64,
    /// 代币显示名称（富化字段）
    pub token_name: Option<String>,
    /// 代币符号（富化字段）
    pub token_symbol: Option<String>,
    /// 代币图标URL（富化字段）
    pub token_image: Option<String>,
    /// 预测评分（衍生字段）
    pub prediction_score: Option<f64>,
    /// 网络图贡献权重（衍生字段）
    pub graph_weight: Option<f64>,
}

/// 网络图中的单条KOL-代币连接
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphConnection {
    /// KOL钱包地址
    pub kol_wallet: String,
    /// 连接权重
    pub weight: f64,
    /// 累计交易次数
    pub trade_count: u32,
}

/// 代币关系网络图增量
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkGraphDelta {
    /// 中心代币mint地址
    pub token_mint: String,
    /// 连接映射（按KOL钱包地址索引）
    pub connections: HashMap<String, GraphConnection>,
    /// 关联代币列表
    pub related_tokens: Vec<String>,
}

/// 聚合统计快照
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// 累计交易数
    pub total_trades: u64,
    /// 活跃钱包数
    pub active_wallets: u64,
    /// 累计交易量（USD）
    pub total_volume: f64,
    /// 是否为轮询刷新信号
    pub is_polling_refresh: bool,
}

impl StatsSnapshot {
    /// 构造轮询刷新信号（由轮询降级控制器注入队列）
    pub fn polling_refresh() -> Self {
        Self {
            total_trades: 0,
            active_wallets: 0,
            total_volume: 0.0,
            is_polling_refresh: true,
        }
    }
}

/// 热门代币排名集合
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendingSet {
    /// 按热度排序的代币mint列表
    pub token_mints: Vec<String>,
    /// 统计窗口（小时）
    pub window_hours: u32,
}

/// 更新负载（按kind标记的和类型）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data")]
pub enum UpdatePayload {
    /// 交易执行
    Trade(TradeActivity),
    /// 网络图增量
    NetworkGraph(NetworkGraphDelta),
    /// 聚合统计
    Stats(StatsSnapshot),
    /// 热门排名
    Trending(TrendingSet),
}

impl UpdatePayload {
    /// 返回负载对应的更新类别
    pub fn kind(&self) -> UpdateKind {
        match self {
            UpdatePayload::Trade(_) => UpdateKind::Trade,
            UpdatePayload::NetworkGraph(_) => UpdateKind::NetworkGraph,
            UpdatePayload::Stats(_) => UpdateKind::Stats,
            UpdatePayload::Trending(_) => UpdateKind::Trending,
        }
    }

    /// 返回冲突检测使用的逻辑键
    ///
    /// Trade按交易ID，NetworkGraph按中心代币地址；
    /// Stats与Trending为全局单例键。
    pub fn logical_key(&self) -> String {
        match self {
            UpdatePayload::Trade(trade) => trade.id.clone(),
            UpdatePayload::NetworkGraph(delta) => delta.token_mint.clone(),
            UpdatePayload::Stats(_) => "global".to_string(),
            UpdatePayload::Trending(_) => "trending".to_string(),
        }
    }
}

/// 更新类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UpdateKind {
    /// 交易执行
    Trade,
    /// 网络图增量
    NetworkGraph,
    /// 聚合统计
    Stats,
    /// 热门排名
    Trending,
}

impl std::fmt::Display for UpdateKind {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            UpdateKind::Trade => write!(f, "trade"),
            UpdateKind::NetworkGraph => write!(f, "network_graph"),
            UpdateKind::Stats => write!(f, "stats"),
            UpdateKind::Trending => write!(f, "trending"),
        }
    }
}

/// 更新来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UpdateSource {
    /// 低延迟推送通道
    PushChannel,
    /// 轮询降级通道
    PollingFallback,
    /// 本地缓存回放
    Cache,
}

/// 更新优先级
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UpdatePriority {
    /// 关键（立即刷出）
    Critical,
    /// 高
    High,
    /// 中
    Medium,
    /// 低
    Low,
}

impl UpdatePriority {
    /// 严重度序号，越小越紧急（用于批次内排序）
    pub fn severity_rank(&self) -> u8 {
        match self {
            UpdatePriority::Critical => 0,
            UpdatePriority::High => 1,
            UpdatePriority::Medium => 2,
            UpdatePriority::Low => 3,
        }
    }
}

/// 冲突解决结局
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResolutionOutcome {
    /// 实时数据直接胜出
    RealtimeWins,
    /// 按观测时间戳裁决
    TimestampBased,
    /// 字段级合并
    Merged,
    /// 合并结果非法，回退到缓存值
    FallbackToCache,
    /// 内容哈希一致，跳过冲突处理
    SkippedIdentical,
}

impl std::fmt::Display for ResolutionOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            ResolutionOutcome::RealtimeWins => write!(f, "realtime-wins"),
            ResolutionOutcome::TimestampBased => write!(f, "timestamp-based"),
            ResolutionOutcome::Merged => write!(f, "merged"),
            ResolutionOutcome::FallbackToCache => write!(f, "fallback-to-cache"),
            ResolutionOutcome::SkippedIdentical => write!(f, "skipped-identical"),
        }
    }
}

/// 冲突解决记录（附在更新上用于审计）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictInfo {
    /// 是否检测到冲突（同逻辑键存在历史记录即视为冲突）
    pub conflict_detected: bool,
    /// 采用的解决结局
    pub resolution: ResolutionOutcome,
    /// 被取代一方的负载快照
    pub superseded: Option<serde_json::Value>,
}

/// 一条进入同步队列的更新记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Update {
    /// 唯一标识（序列号+时间戳生成）
    pub id: String,
    /// 负载数据
    pub payload: UpdatePayload,
    /// 入队观测时间戳（毫秒）
    pub observed_at: i64,
    /// 进程内严格递增序列号
    pub sequence_number: u64,
    /// 数据来源
    pub source: UpdateSource,
    /// 优先级
    pub priority: UpdatePriority,
    /// 负载内容哈希（字段序无关）
    pub content_hash: u64,
    /// 冲突解决记录
    pub conflict_info: Option<ConflictInfo>,
}

impl Update {
    /// 返回更新类别
    pub fn kind(&self) -> UpdateKind {
        self.payload.kind()
    }

    /// 返回逻辑键
    pub fn logical_key(&self) -> String {
        self.payload.logical_key()
    }

    /// 是否记录了实际冲突
    pub fn had_conflict(&self) -> bool {
        self.conflict_info
            .as_ref()
            .map(|info| info.conflict_detected)
            .unwrap_or(false)
    }
}
