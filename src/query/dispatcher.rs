//! 问题分发
//!
//! 打开会话、发布 "思考中" 指示与广播问题、调度初始超时，然后挂起等待会话关闭。
//! 等待是对关闭通知的 await，不轮询；另有一个安全上限，定时器失灵时强制到期，
//! 保证调用总能返回。

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use super::emitter::OutputEmitter;
use super::payload::{busy_indicator, QueryOutcome, QuestionBroadcast};
use super::session_store::SessionStore;
use super::timeout::SessionTimer;
use crate::bus::{Message, MessageBus, Routing, QUESTION_BROADCAST};
use crate::core::{QueryError, Result};

pub struct Dispatcher {
    store: Arc<SessionStore>,
    timer: Arc<SessionTimer>,
    emitter: Arc<OutputEmitter>,
    bus: MessageBus,
    aggregator_id: String,
    initial_timeout: Duration,
    /// 等待上限：初始窗口 + 延期上限 + 宽限
    wait_bound: Duration,
}

impl Dispatcher {
    pub fn new(
        store: Arc<SessionStore>,
        timer: Arc<SessionTimer>,
        emitter: Arc<OutputEmitter>,
        bus: MessageBus,
        aggregator_id: impl Into<String>,
        initial_timeout: Duration,
        wait_bound: Duration,
    ) -> Self {
        Self {
            store,
            timer,
            emitter,
            bus,
            aggregator_id: aggregator_id.into(),
            initial_timeout,
            wait_bound,
        }
    }

    /// 广播问题并等待聚合结果
    pub async fn handle_question(&self, utterance: &str, routing: Option<Routing>) -> QueryOutcome {
        let query_id = self.store.create(utterance, routing).await;
        let Some(mut status_rx) = self.store.subscribe(&query_id).await else {
            return QueryOutcome::NoAnswer;
        };
        let notified = self.emitter.provider_ids().await;

        tracing::info!(query_id = %query_id, phrase = %utterance, "Broadcasting question");

        // 持有会话锁直到初始超时调度完毕，避免与最早到达的响应交错
        if let Some(mut session) = self.store.lock(&query_id).await {
            session.notified_providers.extend(notified);
            let context = session.context().outbound(&self.aggregator_id);

            self.bus.emit(busy_indicator(&self.aggregator_id));
            let question = QuestionBroadcast {
                phrase: utterance.to_string(),
                query_id: query_id.clone(),
            };
            let data = serde_json::to_value(&question).unwrap_or(Value::Null);
            self.bus
                .emit(Message::new(QUESTION_BROADCAST, data).with_context(context.clone()));

            self.timer
                .arm(&query_id, self.initial_timeout, session.extension_count, context)
                .await;
        }

        let closed = tokio::time::timeout(self.wait_bound, async {
            status_rx.wait_for(|status| status.is_closed()).await.map(|_| ())
        })
        .await;
        if closed.is_err() {
            tracing::warn!(query_id = %query_id, "Timer did not fire within bound, forcing expiry");
            self.timer.expire_now(&query_id).await;
        }

        self.timer.disarm(&query_id).await;
        match self.store.remove(&query_id).await {
            Some(session) => self.emitter.emit(&session).await,
            None => QueryOutcome::NoAnswer,
        }
    }

    /// 处理兜底路径的消息形式：`data.utterance` + 可选路由上下文
    pub async fn handle_utterance(&self, message: &Message) -> Result<QueryOutcome> {
        let utterance = message
            .data_str("utterance")
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| QueryError::InvalidMessage("missing utterance".into()))?;
        let routing = Routing::from_context(&message.context);
        Ok(self.handle_question(utterance, routing).await)
    }
}
