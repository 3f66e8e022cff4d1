//! 答案 Provider
//!
//! 聚合器只依赖消息契约；Provider 可以在进程内（经 `ProviderHost` 托管），
//! 也可以是总线另一端的任意监听者。

mod host;
mod keyword;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::core::Result;

pub use host::ProviderHost;
pub use keyword::{KeywordProvider, KeywordProviderConfig};

/// Provider 给出的最终答案
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderAnswer {
    pub answer: String,
    /// 自报置信度，聚合器会截断到 [0, 1]
    pub confidence: f64,
    pub callback_data: Map<String, Value>,
}

impl ProviderAnswer {
    pub fn new(answer: impl Into<String>, confidence: f64) -> Self {
        Self {
            answer: answer.into(),
            confidence,
            callback_data: Map::new(),
        }
    }

    pub fn with_callback_data(mut self, callback_data: Map<String, Value>) -> Self {
        self.callback_data = callback_data;
        self
    }
}

/// 答案 Provider 能力
#[async_trait]
pub trait QueryProvider: Send + Sync {
    /// 全局唯一 ID
    fn id(&self) -> &str;

    /// 回答问题；`Ok(None)` 表示不知道
    async fn query(&self, phrase: &str) -> Result<Option<ProviderAnswer>>;

    /// 被选为胜者后调用（渲染 / 播报由 Provider 自行处理）
    async fn on_selected(&self, _phrase: &str, _callback_data: &Map<String, Value>) {}
}
