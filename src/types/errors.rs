// src/types/errors.rs - 错误类型定义

use serde::{Deserialize, Serialize};
use std::fmt;

/// 同步引擎错误类型
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SyncError {
    // 数据相关错误
    ValidationFailed(String),
    ConflictMergeFailed(String),

    // 订阅者相关错误
    SubscriberFailed(String),

    // 配置相关错误
    ConfigurationError(String),

    // 生命周期相关错误
    EngineStopped(String),
    InternalError(String),
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SyncError::ValidationFailed(msg) => write!(f, "Validation failed: {}", msg),
            SyncError::ConflictMergeFailed(msg) => write!(f, "Conflict merge failed: {}", msg),
            SyncError::SubscriberFailed(msg) => write!(f, "Subscriber failed: {}", msg),
            SyncError::ConfigurationError(msg) => write!(f, "Configuration error: {}", msg),
            SyncError::EngineStopped(msg) => write!(f, "Engine stopped: {}", msg),
            SyncError::InternalError(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for SyncError {}
