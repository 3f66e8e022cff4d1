//! 结果输出
//!
//! 有胜者时依次发布：上下文更新 → 最终聚合结果，然后回调胜出 Provider；
//! 无答案时什么都不发，让外层兜底链继续。

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;

use super::payload::{
    munge_provider_id, AggregatedAnswer, ContextUpdate, QueryOutcome,
    QuestionResponse,
};
use super::session::{QuerySession, SessionStatus};
use crate::bus::{Message, MessageBus, CONTEXT_UPDATE, QUESTION_RESPONSE};
use crate::providers::QueryProvider;

const DEFAULT_CONTEXT_KEYWORD: &str = "Knows";

pub struct OutputEmitter {
    bus: MessageBus,
    aggregator_id: String,
    /// 进程内 Provider，胜出时回调
    providers: RwLock<HashMap<String, Arc<dyn QueryProvider>>>,
}

impl OutputEmitter {
    pub fn new(bus: MessageBus, aggregator_id: impl Into<String>) -> Self {
        Self {
            bus,
            aggregator_id: aggregator_id.into(),
            providers: RwLock::new(HashMap::new()),
        }
    }

    pub async fn register(&self, provider: Arc<dyn QueryProvider>) {
        self.providers
            .write()
            .await
            .insert(provider.id().to_string(), provider);
    }

    pub async fn provider_ids(&self) -> Vec<String> {
        self.providers.read().await.keys().cloned().collect()
    }

    /// 发布已关闭会话的结果
    pub async fn emit(&self, session: &QuerySession) -> QueryOutcome {
        if session.status != SessionStatus::ClosedAnswered {
            tracing::info!(query_id = %session.query_id, phrase = %session.phrase, "No answer found");
            return QueryOutcome::NoAnswer;
        }
        let Some(winner) = session.winner_record() else {
            return QueryOutcome::NoAnswer;
        };
        let answer = winner.answer.clone().unwrap_or_default();
        let context = session.context().outbound(&self.aggregator_id);

        let keyword = winner
            .callback_data
            .get("context_keyword")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_CONTEXT_KEYWORD);
        let update = ContextUpdate {
            context_tag: format!("{}{}", munge_provider_id(&winner.provider_id), keyword),
            word: session.phrase.clone(),
            origin: String::new(),
        };
        let update = serde_json::to_value(&update).unwrap_or(Value::Null);
        self.bus
            .emit(Message::new(CONTEXT_UPDATE, update).with_context(context.clone()));

        let response = QuestionResponse {
            phrase: session.phrase.clone(),
            provider_id: winner.provider_id.clone(),
            answer: Some(answer.clone()),
            callback_data: Some(winner.callback_data.clone()),
            confidence: Some(winner.confidence),
            ..Default::default()
        };
        self.bus
            .emit(Message::new(QUESTION_RESPONSE, response.to_value()).with_context(context));

        tracing::info!(
            query_id = %session.query_id,
            provider = %winner.provider_id,
            confidence = winner.confidence,
            "Answer selected"
        );

        let provider = self.providers.read().await.get(&winner.provider_id).cloned();
        match provider {
            Some(p) => p.on_selected(&session.phrase, &winner.callback_data).await,
            None => tracing::debug!(provider = %winner.provider_id, "winner is not hosted locally"),
        }

        QueryOutcome::Answered(AggregatedAnswer {
            query_id: session.query_id.clone(),
            phrase: session.phrase.clone(),
            provider_id: winner.provider_id.clone(),
            answer,
            confidence: winner.confidence,
            callback_data: winner.callback_data.clone(),
        })
    }
}
