//! 冲突解决器
//! 对同一逻辑键的新旧记录做纯函数裁决，从不产出非法数据

use log::warn;

use crate::config::{ConflictConfig, ConflictStrategy};
use crate::sync::validator::{check_payload, content_hash};
use crate::types::{ConflictInfo, ResolutionOutcome, Update, UpdatePayload};

/// 冲突裁决结果
#[derive(Debug, Clone)]
pub struct Resolution {
    /// 最终入队的负载
    pub payload: UpdatePayload,
    /// 冲突记录；无历史记录时为None
    pub conflict_info: Option<ConflictInfo>,
}

/// 裁决新记录与缓存记录
///
/// 冲突按存在性判定：同逻辑键只要存在历史记录即视为冲突，
/// 无论字段值是否实际不同。`skip_identical_payloads`开启时，
/// 内容哈希一致的重复记录跳过裁决，不计入冲突统计。
pub fn resolve(
    config: &ConflictConfig,
    incoming: UpdatePayload,
    observed_at: i64,
    cached: Option<&Update>,
) -> Resolution {
    let prev = match cached {
        Some(prev) => prev,
        None => {
            return Resolution {
                payload: incoming,
                conflict_info: None,
            }
        }
    };

    if config.skip_identical_payloads && content_hash(&incoming) == prev.content_hash {
        return Resolution {
            payload: incoming,
            conflict_info: Some(ConflictInfo {
                conflict_detected: false,
                resolution: ResolutionOutcome::SkippedIdentical,
                superseded: None,
            }),
        };
    }

    let (resolved, outcome, superseded) = match config.strategy {
        ConflictStrategy::RealtimeWins => (
            incoming.clone(),
            ResolutionOutcome::RealtimeWins,
            snapshot(&prev.payload),
        ),
        ConflictStrategy::TimestampBased => timestamp_based(incoming.clone(), observed_at, prev),
        ConflictStrategy::Merge => merge(incoming.clone(), observed_at, prev),
    };

    // 合并可能拼出非法形态；二次校验失败时回退到缓存值
    if let Err(reason) = check_payload(&resolved) {
        warn!(
            "[ConflictResolver] 合并结果未通过校验，回退缓存值: key={} 原因={}",
            prev.logical_key(),
            reason
        );
        return Resolution {
            payload: prev.payload.clone(),
            conflict_info: Some(ConflictInfo {
                conflict_detected: true,
                resolution: ResolutionOutcome::FallbackToCache,
                superseded: snapshot(&incoming),
            }),
        };
    }

    Resolution {
        payload: resolved,
        conflict_info: Some(ConflictInfo {
            conflict_detected: true,
            resolution: outcome,
            superseded,
        }),
    }
}

/// 留存被取代一方的负载快照，用于审计
fn snapshot(payload: &UpdatePayload) -> Option<serde_json::Value> {
    serde_json::to_value(payload).ok()
}

/// 时间戳裁决：较新的观测时间胜出，平局偏向新记录
fn timestamp_based(
    incoming: UpdatePayload,
    observed_at: i64,
    prev: &Update,
) -> (UpdatePayload, ResolutionOutcome, Option<serde_json::Value>) {
    if observed_at >= prev.observed_at {
        (
            incoming,
            ResolutionOutcome::TimestampBased,
            snapshot(&prev.payload),
        )
    } else {
        let superseded = snapshot(&incoming);
        (
            prev.payload.clone(),
            ResolutionOutcome::TimestampBased,
            superseded,
        )
    }
}

/// 按类别做字段级合并
///
/// Trade：时间戳裁决选底板，缺失的富化字段从败方回填；
/// NetworkGraph：连接映射按钱包键取并集（新记录覆盖同键），
/// 关联代币列表取集合并集。其余类别退化为时间戳裁决。
fn merge(
    incoming: UpdatePayload,
    observed_at: i64,
    prev: &Update,
) -> (UpdatePayload, ResolutionOutcome, Option<serde_json::Value>) {
    match (incoming, &prev.payload) {
        (UpdatePayload::Trade(new_trade), UpdatePayload::Trade(old_trade)) => {
            let incoming_wins = observed_at >= prev.observed_at;
            let (mut base, filler) = if incoming_wins {
                (new_trade, old_trade)
            } else {
                (old_trade.clone(), &new_trade)
            };

            if base.token_name.is_none() {
                base.token_name = filler.token_name.clone();
            }
            if base.token_symbol.is_none() {
                base.token_symbol = filler.token_symbol.clone();
            }
            if base.token_image.is_none() {
                base.token_image = filler.token_image.clone();
            }
            if base.prediction_score.is_none() {
                base.prediction_score = filler.prediction_score;
            }
            if base.graph_weight.is_none() {
                base.graph_weight = filler.graph_weight;
            }

            let superseded = snapshot(&UpdatePayload::Trade(filler.clone()));
            (
                UpdatePayload::Trade(base),
                ResolutionOutcome::Merged,
                superseded,
            )
        }
        (UpdatePayload::NetworkGraph(new_delta), UpdatePayload::NetworkGraph(old_delta)) => {
            let mut merged = old_delta.clone();
            merged.token_mint = new_delta.token_mint.clone();
            // 新记录覆盖同键连接
            for (wallet, connection) in new_delta.connections {
                merged.connections.insert(wallet, connection);
            }

            let mut related = new_delta.related_tokens;
            for token in &old_delta.related_tokens {
                if !related.contains(token) {
                    related.push(token.clone());
                }
            }
            merged.related_tokens = related;

            let superseded = snapshot(&prev.payload);
            (
                UpdatePayload::NetworkGraph(merged),
                ResolutionOutcome::Merged,
                superseded,
            )
        }
        // 其余类别没有可合并的字段结构
        (incoming, _) => timestamp_based(incoming, observed_at, prev),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::validator::content_hash;
    use crate::types::{
        GraphConnection, NetworkGraphDelta, TradeActivity, TradeSide, UpdatePriority, UpdateSource,
    };
    use std::collections::HashMap;

    fn base_trade(id: &str) -> TradeActivity {
        TradeActivity {
            id: id.to_string(),
            kol_wallet: "wallet-a".to_string(),
            trade_type: TradeSide::Buy,
            token_mint: "mint-x".to_string(),
            amount_in: 1000.0,
            amount_out: 0.0,
            timestamp: 1_700_000_000_000,
            token_name: None,
            token_symbol: None,
            token_image: None,
            prediction_score: None,
            graph_weight: None,
        }
    }

    fn cached_update(payload: UpdatePayload, observed_at: i64) -> Update {
        let content_hash = content_hash(&payload);
        Update {
            id: format!("upd-0-{}", observed_at),
            payload,
            observed_at,
            sequence_number: 0,
            source: UpdateSource::PushChannel,
            priority: UpdatePriority::Medium,
            content_hash,
            conflict_info: None,
        }
    }

    fn merge_config() -> ConflictConfig {
        ConflictConfig {
            strategy: ConflictStrategy::Merge,
            skip_identical_payloads: false,
        }
    }

    #[test]
    fn test_no_cached_record_means_no_conflict() {
        let resolution = resolve(
            &merge_config(),
            UpdatePayload::Trade(base_trade("T1")),
            100,
            None,
        );
        assert!(resolution.conflict_info.is_none());
    }

    #[test]
    fn test_realtime_wins_returns_incoming() {
        let config = ConflictConfig {
            strategy: ConflictStrategy::RealtimeWins,
            skip_identical_payloads: false,
        };
        let mut old = base_trade("T1");
        old.amount_in = 1.0;
        let cached = cached_update(UpdatePayload::Trade(old), 200);

        let mut incoming = base_trade("T1");
        incoming.amount_in = 2.0;
        // 即使新记录观测时间更早也直接胜出
        let resolution = resolve(&config, UpdatePayload::Trade(incoming), 100, Some(&cached));

        match resolution.payload {
            UpdatePayload::Trade(trade) => assert_eq!(trade.amount_in, 2.0),
            other => panic!("unexpected payload: {:?}", other),
        }
        let info = resolution.conflict_info.expect("应记录冲突");
        assert!(info.conflict_detected);
        assert_eq!(info.resolution, ResolutionOutcome::RealtimeWins);
        assert!(info.superseded.is_some());
    }

    #[test]
    fn test_timestamp_based_resolution() {
        let config = ConflictConfig {
            strategy: ConflictStrategy::TimestampBased,
            skip_identical_payloads: false,
        };
        let mut old = base_trade("T1");
        old.amount_in = 1.0;
        let cached = cached_update(UpdatePayload::Trade(old), 200);

        let mut incoming = base_trade("T1");
        incoming.amount_in = 2.0;

        // 较新的新记录胜出
        let resolution = resolve(
            &config,
            UpdatePayload::Trade(incoming.clone()),
            300,
            Some(&cached),
        );
        match resolution.payload {
            UpdatePayload::Trade(trade) => assert_eq!(trade.amount_in, 2.0),
            other => panic!("unexpected payload: {:?}", other),
        }

        // 较旧的新记录败给缓存
        let resolution = resolve(
            &config,
            UpdatePayload::Trade(incoming.clone()),
            100,
            Some(&cached),
        );
        match resolution.payload {
            UpdatePayload::Trade(trade) => assert_eq!(trade.amount_in, 1.0),
            other => panic!("unexpected payload: {:?}", other),
        }

        // 平局偏向新记录
        let resolution = resolve(&config, UpdatePayload::Trade(incoming), 200, Some(&cached));
        match resolution.payload {
            UpdatePayload::Trade(trade) => assert_eq!(trade.amount_in, 2.0),
            other => panic!("unexpected payload: {:?}", other),
        }
    }

    #[test]
    fn test_merge_backfills_enrichment_fields() {
        // 缓存记录有name缺symbol，新记录有symbol缺name，合并后两者都在
        let mut old = base_trade("T1");
        old.token_name = Some("Foo".to_string());
        let cached = cached_update(UpdatePayload::Trade(old), 100);

        let mut incoming = base_trade("T1");
        incoming.token_symbol = Some("FOO".to_string());

        let resolution = resolve(
            &merge_config(),
            UpdatePayload::Trade(incoming),
            200,
            Some(&cached),
        );

        match resolution.payload {
            UpdatePayload::Trade(trade) => {
                assert_eq!(trade.token_name.as_deref(), Some("Foo"));
                assert_eq!(trade.token_symbol.as_deref(), Some("FOO"));
            }
            other => panic!("unexpected payload: {:?}", other),
        }
        let info = resolution.conflict_info.expect("应记录冲突");
        assert_eq!(info.resolution, ResolutionOutcome::Merged);
    }

    #[test]
    fn test_merge_backfills_toward_cached_winner() {
        // 缓存记录更新时，底板取缓存、从新记录回填
        let mut old = base_trade("T1");
        old.token_symbol = Some("OLD".to_string());
        let cached = cached_update(UpdatePayload::Trade(old), 300);

        let mut incoming = base_trade("T1");
        incoming.token_name = Some("New Name".to_string());

        let resolution = resolve(
            &merge_config(),
            UpdatePayload::Trade(incoming),
            100,
            Some(&cached),
        );

        match resolution.payload {
            UpdatePayload::Trade(trade) => {
                assert_eq!(trade.token_symbol.as_deref(), Some("OLD"));
                assert_eq!(trade.token_name.as_deref(), Some("New Name"));
            }
            other => panic!("unexpected payload: {:?}", other),
        }
    }

    #[test]
    fn test_merge_graph_union_overwrites_same_key() {
        let mut old_connections = HashMap::new();
        old_connections.insert(
            "wallet-a".to_string(),
            GraphConnection { kol_wallet: "wallet-a".to_string(), weight: 1.0, trade_count: 2 },
        );
        old_connections.insert(
            "wallet-b".to_string(),
            GraphConnection { kol_wallet: "wallet-b".to_string(), weight: 5.0, trade_count: 9 },
        );
        let cached = cached_update(
            UpdatePayload::NetworkGraph(NetworkGraphDelta {
                token_mint: "mint-x".to_string(),
                connections: old_connections,
                related_tokens: vec!["mint-y".to_string()],
            }),
            100,
        );

        let mut new_connections = HashMap::new();
        new_connections.insert(
            "wallet-a".to_string(),
            GraphConnection { kol_wallet: "wallet-a".to_string(), weight: 3.0, trade_count: 4 },
        );
        let incoming = UpdatePayload::NetworkGraph(NetworkGraphDelta {
            token_mint: "mint-x".to_string(),
            connections: new_connections,
            related_tokens: vec!["mint-z".to_string()],
        });

        let resolution = resolve(&merge_config(), incoming, 200, Some(&cached));

        match resolution.payload {
            UpdatePayload::NetworkGraph(delta) => {
                assert_eq!(delta.connections.len(), 2, "并集应保留双方键");
                assert_eq!(delta.connections["wallet-a"].weight, 3.0, "同键应被新记录覆盖");
                assert_eq!(delta.connections["wallet-b"].weight, 5.0);
                assert!(delta.related_tokens.contains(&"mint-y".to_string()));
                assert!(delta.related_tokens.contains(&"mint-z".to_string()));
            }
            other => panic!("unexpected payload: {:?}", other),
        }
    }

    #[test]
    fn test_invalid_merge_falls_back_to_cached() {
        let cached = cached_update(UpdatePayload::Trade(base_trade("T1")), 100);

        // 注入绕过了入队前校验的畸形新记录
        let mut incoming = base_trade("T1");
        incoming.amount_in = f64::NAN;

        let resolution = resolve(
            &merge_config(),
            UpdatePayload::Trade(incoming),
            200,
            Some(&cached),
        );

        match resolution.payload {
            UpdatePayload::Trade(trade) => {
                assert!(trade.amount_in.is_finite(), "回退后必须是合法缓存值")
            }
            other => panic!("unexpected payload: {:?}", other),
        }
        let info = resolution.conflict_info.expect("应记录冲突");
        assert_eq!(info.resolution, ResolutionOutcome::FallbackToCache);
    }

    #[test]
    fn test_skip_identical_payloads_optimization() {
        let payload = UpdatePayload::Trade(base_trade("T1"));
        let cached = cached_update(payload.clone(), 100);

        let config = ConflictConfig {
            strategy: ConflictStrategy::Merge,
            skip_identical_payloads: true,
        };
        let resolution = resolve(&config, payload.clone(), 200, Some(&cached));
        let info = resolution.conflict_info.expect("应留下跳过记录");
        assert!(!info.conflict_detected, "内容一致时不计为冲突");
        assert_eq!(info.resolution, ResolutionOutcome::SkippedIdentical);

        // 默认关闭时维持存在性冲突语义
        let resolution = resolve(&merge_config(), payload, 200, Some(&cached));
        assert!(resolution.conflict_info.expect("应记录冲突").conflict_detected);
    }
}
