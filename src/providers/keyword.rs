//! 关键词表驱动的 Provider
//!
//! 问题文本包含任一关键词即给出固定答案，主要用于命令行演示与集成测试。

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};

use super::{ProviderAnswer, QueryProvider};
use crate::core::Result;

/// `[[providers]]` 配置段
#[derive(Debug, Clone, Deserialize)]
pub struct KeywordProviderConfig {
    pub id: String,
    pub keywords: Vec<String>,
    pub answer: String,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    /// 胜出后写入上下文更新的关键字（如 "DuckKnows"）
    #[serde(default)]
    pub context_keyword: Option<String>,
}

fn default_confidence() -> f64 {
    0.5
}

pub struct KeywordProvider {
    config: KeywordProviderConfig,
    keywords: Vec<String>,
    selected: AtomicUsize,
}

impl KeywordProvider {
    pub fn new(config: KeywordProviderConfig) -> Self {
        let keywords = config.keywords.iter().map(|k| k.to_lowercase()).collect();
        Self {
            config,
            keywords,
            selected: AtomicUsize::new(0),
        }
    }

    /// 被选为胜者的次数
    pub fn selected_count(&self) -> usize {
        self.selected.load(Ordering::SeqCst)
    }

    fn matches(&self, phrase: &str) -> bool {
        let phrase = phrase.to_lowercase();
        self.keywords.iter().any(|k| !k.is_empty() && phrase.contains(k.as_str()))
    }
}

#[async_trait]
impl QueryProvider for KeywordProvider {
    fn id(&self) -> &str {
        &self.config.id
    }

    async fn query(&self, phrase: &str) -> Result<Option<ProviderAnswer>> {
        if !self.matches(phrase) {
            return Ok(None);
        }

        let mut callback_data = Map::new();
        callback_data.insert("query".into(), Value::String(phrase.to_string()));
        callback_data.insert("answer".into(), Value::String(self.config.answer.clone()));
        if let Some(keyword) = &self.config.context_keyword {
            callback_data.insert("context_keyword".into(), Value::String(keyword.clone()));
        }

        Ok(Some(
            ProviderAnswer::new(self.config.answer.clone(), self.config.confidence)
                .with_callback_data(callback_data),
        ))
    }

    async fn on_selected(&self, phrase: &str, _callback_data: &Map<String, Value>) {
        self.selected.fetch_add(1, Ordering::SeqCst);
        tracing::info!(provider = %self.config.id, phrase = %phrase, "{}", self.config.answer);
    }
}
