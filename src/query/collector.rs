//! 响应收集
//!
//! 每条 `question-response` 在对应会话的锁内完成全部处理：写入记录、
//! 延期与重新调度定时器、提前关闭判定。迟到或找不到会话的响应直接忽略。

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::payload::QuestionResponse;
use super::session::{CloseReason, SessionStatus};
use super::session_store::SessionStore;
use super::timeout::SessionTimer;
use crate::bus::{BusReceiver, Message};
use crate::core::Result;

/// 忽略响应的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// 聚合器自己发出的最终结果
    OwnMessage,
    /// 找不到对应会话
    Orphan,
    /// 会话已关闭
    Late,
}

/// 单条响应的处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectOutcome {
    Ignored(IgnoreReason),
    /// 已记录，会话保持开放
    Recorded,
    /// 截止时间已延后
    Extended { extension_count: u32 },
    /// 延期次数已用完，截止时间不变
    ExtensionExhausted,
    /// 会话被提前关闭
    Closed(SessionStatus),
}

pub struct ResponseCollector {
    store: Arc<SessionStore>,
    timer: Arc<SessionTimer>,
    aggregator_id: String,
    extension: Duration,
    max_extensions: u32,
}

impl ResponseCollector {
    pub fn new(
        store: Arc<SessionStore>,
        timer: Arc<SessionTimer>,
        aggregator_id: impl Into<String>,
        extension: Duration,
        max_extensions: u32,
    ) -> Self {
        Self {
            store,
            timer,
            aggregator_id: aggregator_id.into(),
            extension,
            max_extensions,
        }
    }

    /// 处理一条响应消息
    pub async fn handle(&self, message: &Message) -> Result<CollectOutcome> {
        if message.context_str("provider_id") == Some(self.aggregator_id.as_str()) {
            return Ok(CollectOutcome::Ignored(IgnoreReason::OwnMessage));
        }
        let response = QuestionResponse::from_message(message)?;

        let query_id = match &response.query_id {
            Some(id) => Some(id.clone()),
            None => self.store.find_open_by_phrase(&response.phrase).await,
        };
        let Some(query_id) = query_id else {
            tracing::debug!(provider = %response.provider_id, phrase = %response.phrase, "orphan response ignored");
            return Ok(CollectOutcome::Ignored(IgnoreReason::Orphan));
        };
        let Some(mut session) = self.store.lock(&query_id).await else {
            tracing::debug!(provider = %response.provider_id, query_id = %query_id, "response for unknown session ignored");
            return Ok(CollectOutcome::Ignored(IgnoreReason::Orphan));
        };

        if !session.is_open() {
            session.late_responses += 1;
            tracing::debug!(provider = %response.provider_id, query_id = %query_id, "late response ignored");
            return Ok(CollectOutcome::Ignored(IgnoreReason::Late));
        }

        let provider_id = response.provider_id.as_str();
        let mut outcome = CollectOutcome::Recorded;

        if response.has_answer() {
            session.record(
                provider_id,
                false,
                response.answer.clone(),
                response.confidence,
                response.callback_data.clone().unwrap_or_default(),
            );
            tracing::debug!(query_id = %query_id, provider = %provider_id, "provider finalized");
        } else if response.searching == Some(true) {
            session.record(provider_id, true, None, response.confidence, Default::default());
            session.searching_providers.insert(provider_id.to_string());

            if session.extension_count < self.max_extensions {
                session.deadline += self.extension;
                session.extension_count += 1;
                let delay = session.deadline.saturating_duration_since(Instant::now());
                self.timer
                    .rearm(&query_id, delay, session.extension_count)
                    .await;
                tracing::debug!(
                    query_id = %query_id,
                    provider = %provider_id,
                    extensions = session.extension_count,
                    "deadline extended"
                );
                outcome = CollectOutcome::Extended {
                    extension_count: session.extension_count,
                };
            } else {
                tracing::debug!(query_id = %query_id, provider = %provider_id, "extension cap reached");
                outcome = CollectOutcome::ExtensionExhausted;
            }
        } else {
            // 放弃作答：不再算作进行中
            session.record(provider_id, false, None, response.confidence, Default::default());
            tracing::debug!(query_id = %query_id, provider = %provider_id, "provider declined");
        }

        if session.has_finalized() && session.in_flight_settled() {
            let status = session.close(CloseReason::AllFinalized);
            return Ok(CollectOutcome::Closed(status));
        }
        Ok(outcome)
    }

    /// 按到达顺序消费响应，直到 `shutdown` 被取消或总线关闭
    pub fn spawn(self: Arc<Self>, mut rx: BusReceiver, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut lost = 0;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    msg = rx.recv() => match msg {
                        Some(msg) => {
                            if rx.lagged() > lost {
                                tracing::error!(
                                    lost = rx.lagged() - lost,
                                    "Response collector lagged, provider responses lost; raise [bus] capacity"
                                );
                                lost = rx.lagged();
                            }
                            if let Err(e) = self.handle(&msg).await {
                                tracing::warn!("Dropped malformed response: {}", e);
                            }
                        }
                        None => break,
                    }
                }
            }
            tracing::debug!("response collector stopped");
        })
    }
}
