//! 会话超时：定时器调度、延期与到期处理
//!
//! 以 query_id 为事件名调度到期回调。每次调度与取消都会在总线上发布通知，
//! 初次调度按请求方路由，延期与取消只在内部可见。
//!
//! 每个回调记录调度时的延期次数；到期时会话已被再次延期则视为过期回调。

use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use serde_json::json;

use super::payload::internal_context;
use super::session::{CloseReason, SessionStatus};
use super::session_store::SessionStore;
use crate::bus::{Message, MessageBus, MessageContext, REMOVE_EVENT, SCHEDULE_EVENT};
use crate::timer::TimerService;

pub struct SessionTimer {
    timer: Arc<dyn TimerService>,
    store: Arc<SessionStore>,
    bus: MessageBus,
    aggregator_id: String,
}

impl SessionTimer {
    pub fn new(
        timer: Arc<dyn TimerService>,
        store: Arc<SessionStore>,
        bus: MessageBus,
        aggregator_id: impl Into<String>,
    ) -> Self {
        Self {
            timer,
            store,
            bus,
            aggregator_id: aggregator_id.into(),
        }
    }

    /// 调度（或重新调度）会话到期；`epoch` 为调度时会话的延期次数
    pub async fn arm(&self, query_id: &str, delay: Duration, epoch: u32, context: MessageContext) {
        self.bus.emit(
            Message::new(
                SCHEDULE_EVENT,
                json!({"event": query_id, "delay_ms": delay.as_millis() as u64}),
            )
            .with_context(context),
        );

        let store = Arc::clone(&self.store);
        let id = query_id.to_string();
        self.timer
            .schedule(
                query_id,
                delay,
                Box::new(move || {
                    async move {
                        expire(&store, &id, Some(epoch)).await;
                    }
                    .boxed()
                }),
            )
            .await;
        tracing::debug!(query_id = %query_id, delay_ms = delay.as_millis() as u64, "timeout armed");
    }

    /// 延期：通知只在内部可见
    pub async fn rearm(&self, query_id: &str, delay: Duration, epoch: u32) {
        self.arm(query_id, delay, epoch, internal_context(&self.aggregator_id))
            .await;
    }

    /// 取消会话的定时器（尽力而为）
    pub async fn disarm(&self, query_id: &str) {
        self.bus.emit(
            Message::new(REMOVE_EVENT, json!({"event": query_id}))
                .with_context(internal_context(&self.aggregator_id)),
        );
        self.timer.cancel(query_id).await;
    }

    /// 不经定时器直接执行到期处理
    pub async fn expire_now(&self, query_id: &str) -> Option<SessionStatus> {
        expire(&self.store, query_id, None).await
    }
}

/// 到期处理：已关闭或已再次延期的会话视为过期回调，直接忽略
///
/// `epoch` 为 None 时强制关闭。
pub async fn expire(store: &SessionStore, query_id: &str, epoch: Option<u32>) -> Option<SessionStatus> {
    let Some(mut guard) = store.lock(query_id).await else {
        tracing::debug!(query_id = %query_id, "timeout for unknown session ignored");
        return None;
    };
    if guard.status.is_closed() {
        tracing::debug!(query_id = %query_id, "stale timeout ignored");
        return Some(guard.status);
    }
    if epoch.is_some_and(|e| e != guard.extension_count) {
        tracing::debug!(query_id = %query_id, "timeout superseded by extension ignored");
        return Some(guard.status);
    }
    Some(guard.close(CloseReason::DeadlineExpired))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timer::ManualTimer;
    use serde_json::Map;

    fn setup() -> (Arc<ManualTimer>, Arc<SessionStore>, MessageBus, SessionTimer) {
        let manual = Arc::new(ManualTimer::new());
        let store = Arc::new(SessionStore::new(Duration::from_secs(5)));
        let bus = MessageBus::new(32);
        let timer = SessionTimer::new(manual.clone(), Arc::clone(&store), bus.clone(), "cq");
        (manual, store, bus, timer)
    }

    #[tokio::test]
    async fn test_expiry_closes_open_session() {
        let (manual, store, bus, timer) = setup();
        let mut rx = bus.subscribe();
        let id = store.create("q", None).await;

        timer
            .arm(&id, Duration::from_secs(5), 0, internal_context("cq"))
            .await;
        let notice = rx.try_recv().unwrap();
        assert_eq!(notice.msg_type, SCHEDULE_EVENT);
        assert_eq!(notice.data["event"], id.as_str());
        assert_eq!(notice.data["delay_ms"], 5000);

        assert!(manual.fire(&id).await);
        assert_eq!(
            store.get(&id).await.unwrap().status,
            SessionStatus::ClosedNoAnswer
        );
    }

    #[tokio::test]
    async fn test_expiry_with_answer() {
        let (_, store, _, timer) = setup();
        let id = store.create("q", None).await;
        store
            .apply(&id, |s| {
                s.record("a", false, Some("x".into()), Some(0.1), Map::new());
            })
            .await;

        assert_eq!(timer.expire_now(&id).await, Some(SessionStatus::ClosedAnswered));
        // 第二次到期为空操作
        assert_eq!(timer.expire_now(&id).await, Some(SessionStatus::ClosedAnswered));
        assert_eq!(timer.expire_now("unknown").await, None);
    }

    #[tokio::test]
    async fn test_superseded_timeout_ignored() {
        let (_, store, _, _) = setup();
        let id = store.create("q", None).await;
        store.apply(&id, |s| s.extension_count = 1).await;

        assert_eq!(expire(&store, &id, Some(0)).await, Some(SessionStatus::Open));
        assert_eq!(
            expire(&store, &id, Some(1)).await,
            Some(SessionStatus::ClosedNoAnswer)
        );
    }

    #[tokio::test]
    async fn test_disarm_emits_internal_notice() {
        let (manual, store, bus, timer) = setup();
        let mut rx = bus.on(REMOVE_EVENT);
        let id = store.create("q", None).await;

        timer.rearm(&id, Duration::from_secs(3), 1).await;
        timer.disarm(&id).await;

        assert!(!manual.is_scheduled(&id).await);
        let notice = rx.try_recv().unwrap();
        assert!(!notice.context.contains_key("destination"));
        assert_eq!(notice.context_str("provider_id"), Some("cq"));
    }
}
