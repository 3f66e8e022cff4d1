//! 聚合引擎错误类型
//!
//! 迟到响应、缺失置信度、Provider 沉默都不是错误（在 Collector 内部消化）；
//! 这里只描述真正无法处理的输入与基础设施故障。

use thiserror::Error;

/// 问答聚合过程中可能出现的错误
#[derive(Error, Debug)]
pub enum QueryError {
    /// 消息结构不合法（data 不是对象、缺少 provider_id 等）
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// 总线已没有任何订阅者
    #[error("Message bus closed")]
    BusClosed,

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),
}

pub type Result<T> = std::result::Result<T, QueryError>;
