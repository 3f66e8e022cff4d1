//! 进程内 Provider 托管
//!
//! 监听 `question-broadcast`，对每个问题：先宣告 searching，再调用 Provider，
//! 最后发出最终答案；不知道或出错时发出 `searching: false` 表示放弃。

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::QueryProvider;
use crate::bus::{Message, MessageBus, QUESTION_BROADCAST, QUESTION_RESPONSE};
use crate::query::{QuestionBroadcast, QuestionResponse};

pub struct ProviderHost {
    provider: Arc<dyn QueryProvider>,
    bus: MessageBus,
}

impl ProviderHost {
    pub fn new(provider: Arc<dyn QueryProvider>, bus: MessageBus) -> Self {
        Self { provider, bus }
    }

    /// 订阅总线并在后台运行，直到 `shutdown` 被取消
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        // 先订阅再返回，保证之后的广播不会漏掉
        let mut rx = self.bus.on(QUESTION_BROADCAST);
        tokio::spawn(async move {
            tracing::debug!(provider = %self.provider.id(), "provider host started");
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    msg = rx.recv() => match msg {
                        Some(msg) => {
                            let provider = Arc::clone(&self.provider);
                            let bus = self.bus.clone();
                            let cancel = shutdown.child_token();
                            tokio::spawn(async move {
                                answer(provider, bus, msg, cancel).await;
                            });
                        }
                        None => break,
                    }
                }
            }
            tracing::debug!(provider = %self.provider.id(), "provider host stopped");
        })
    }
}

fn respond(bus: &MessageBus, request: &Message, response: QuestionResponse) {
    let mut msg = request.forward(QUESTION_RESPONSE, response.to_value());
    msg.context.insert(
        "provider_id".into(),
        serde_json::Value::String(response.provider_id.clone()),
    );
    bus.emit(msg);
}

/// 处理单个问题；`cancel` 触发时放弃进行中的查询，不再发布任何消息
async fn answer(
    provider: Arc<dyn QueryProvider>,
    bus: MessageBus,
    request: Message,
    cancel: CancellationToken,
) {
    let question: QuestionBroadcast = match serde_json::from_value(request.data.clone()) {
        Ok(q) => q,
        Err(e) => {
            tracing::warn!(provider = %provider.id(), "Malformed question broadcast: {}", e);
            return;
        }
    };

    let base = QuestionResponse {
        phrase: question.phrase.clone(),
        provider_id: provider.id().to_string(),
        query_id: Some(question.query_id.clone()),
        ..Default::default()
    };

    respond(
        &bus,
        &request,
        QuestionResponse {
            searching: Some(true),
            ..base.clone()
        },
    );

    let result = tokio::select! {
        _ = cancel.cancelled() => {
            tracing::debug!(provider = %provider.id(), "query abandoned on shutdown");
            return;
        }
        result = provider.query(&question.phrase) => result,
    };
    let response = match result {
        Ok(Some(found)) => QuestionResponse {
            answer: Some(found.answer),
            confidence: Some(found.confidence),
            callback_data: Some(found.callback_data),
            ..base
        },
        Ok(None) => QuestionResponse {
            searching: Some(false),
            ..base
        },
        Err(e) => {
            tracing::warn!(provider = %provider.id(), "Provider query failed: {}", e);
            QuestionResponse {
                searching: Some(false),
                ..base
            }
        }
    };
    respond(&bus, &request, response);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{QueryError, Result};
    use crate::providers::ProviderAnswer;
    use async_trait::async_trait;
    use serde_json::json;
    use std::time::Duration;

    struct Fixed(Option<f64>);

    #[async_trait]
    impl QueryProvider for Fixed {
        fn id(&self) -> &str {
            "fixed.test"
        }

        async fn query(&self, _phrase: &str) -> Result<Option<ProviderAnswer>> {
            match self.0 {
                Some(c) if c < 0.0 => Err(QueryError::Provider("boom".into())),
                Some(c) => Ok(Some(ProviderAnswer::new("forty two", c))),
                None => Ok(None),
            }
        }
    }

    async fn collect_responses(provider: Fixed) -> Vec<Message> {
        let bus = MessageBus::new(32);
        let mut rx = bus.on(QUESTION_RESPONSE);
        let token = CancellationToken::new();
        let handle = ProviderHost::new(Arc::new(provider), bus.clone()).spawn(token.clone());

        bus.emit(Message::new(
            QUESTION_BROADCAST,
            json!({"phrase": "meaning of life", "query_id": "q1"}),
        ));

        let mut out = Vec::new();
        for _ in 0..2 {
            let msg = tokio::time::timeout(Duration::from_secs(1), rx.recv())
                .await
                .unwrap()
                .unwrap();
            out.push(msg);
        }
        token.cancel();
        handle.await.unwrap();
        out
    }

    #[tokio::test]
    async fn test_searching_then_answer() {
        let msgs = collect_responses(Fixed(Some(0.6))).await;

        assert_eq!(msgs[0].data["searching"], true);
        assert_eq!(msgs[0].data["query_id"], "q1");
        assert_eq!(msgs[0].context_str("provider_id"), Some("fixed.test"));
        assert_eq!(msgs[1].data["answer"], "forty two");
        assert_eq!(msgs[1].data["confidence"], 0.6);
    }

    struct Stalled;

    #[async_trait]
    impl QueryProvider for Stalled {
        fn id(&self) -> &str {
            "stalled.test"
        }

        async fn query(&self, _phrase: &str) -> Result<Option<ProviderAnswer>> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Some(ProviderAnswer::new("too late", 1.0)))
        }
    }

    #[tokio::test]
    async fn test_shutdown_abandons_in_flight_query() {
        let bus = MessageBus::new(32);
        let mut rx = bus.on(QUESTION_RESPONSE);
        let token = CancellationToken::new();
        let handle = ProviderHost::new(Arc::new(Stalled), bus.clone()).spawn(token.clone());

        bus.emit(Message::new(
            QUESTION_BROADCAST,
            json!({"phrase": "meaning of life", "query_id": "q1"}),
        ));
        let searching = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(searching.data["searching"], true);

        token.cancel();
        handle.await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_decline_on_unknown_and_error() {
        let msgs = collect_responses(Fixed(None)).await;
        assert_eq!(msgs[1].data["searching"], false);
        assert!(msgs[1].data.get("answer").is_none());

        let msgs = collect_responses(Fixed(Some(-1.0))).await;
        assert_eq!(msgs[1].data["searching"], false);
    }
}
