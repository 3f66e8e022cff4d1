//! 会话存储
//!
//! 所有进行中的查询会话按 query_id 存放。表本身由 `RwLock` 保护，只在查找、插入、
//! 删除时短暂持有；每个会话另有独立的 `Mutex`，同一 query 的所有修改（响应写入、
//! 延期、关闭）在该锁下串行，不同 query 之间完全并行。

use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex, OwnedMutexGuard, RwLock};

use super::selector::select_winner;
use super::session::{CloseReason, QueryId, QuerySession, SessionStatus};
use crate::bus::Routing;

struct SessionSlot {
    session: Arc<Mutex<QuerySession>>,
    status: watch::Sender<SessionStatus>,
}

/// 持有单个会话锁期间的可变视图
pub struct SessionGuard {
    session: OwnedMutexGuard<QuerySession>,
    slot: Arc<SessionSlot>,
}

impl SessionGuard {
    /// 关闭会话并唤醒等待方；已关闭时为空操作，返回既有终态
    pub fn close(&mut self, reason: CloseReason) -> SessionStatus {
        if self.session.status.is_closed() {
            return self.session.status;
        }

        let winner = select_winner(&self.session);
        let status = if winner.is_some() {
            SessionStatus::ClosedAnswered
        } else {
            SessionStatus::ClosedNoAnswer
        };
        self.session.winner = winner;
        self.session.status = status;

        tracing::info!(
            query_id = %self.session.query_id,
            reason = %reason,
            status = ?status,
            winner = ?self.session.winner,
            responses = self.session.responses.len(),
            extensions = self.session.extension_count,
            elapsed_ms = self.session.elapsed().as_millis() as u64,
            "Query session closed"
        );

        self.slot.status.send_replace(status);
        status
    }
}

impl Deref for SessionGuard {
    type Target = QuerySession;

    fn deref(&self) -> &QuerySession {
        &self.session
    }
}

impl DerefMut for SessionGuard {
    fn deref_mut(&mut self) -> &mut QuerySession {
        &mut self.session
    }
}

pub struct SessionStore {
    sessions: RwLock<HashMap<QueryId, Arc<SessionSlot>>>,
    /// 新会话的初始窗口
    window: Duration,
}

impl SessionStore {
    pub fn new(window: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            window,
        }
    }

    /// 创建会话，返回新的 query_id
    pub async fn create(&self, phrase: &str, routing: Option<Routing>) -> QueryId {
        let session = QuerySession::new(phrase.to_string(), routing, self.window);
        let query_id = session.query_id.clone();
        let (status, _) = watch::channel(SessionStatus::Open);
        let slot = Arc::new(SessionSlot {
            session: Arc::new(Mutex::new(session)),
            status,
        });

        self.sessions.write().await.insert(query_id.clone(), slot);
        tracing::debug!(query_id = %query_id, "Query session created");
        query_id
    }

    async fn slot(&self, query_id: &str) -> Option<Arc<SessionSlot>> {
        self.sessions.read().await.get(query_id).cloned()
    }

    /// 锁定会话；会话不存在时返回 None
    pub async fn lock(&self, query_id: &str) -> Option<SessionGuard> {
        let slot = self.slot(query_id).await?;
        let session = Arc::clone(&slot.session).lock_owned().await;
        Some(SessionGuard { session, slot })
    }

    /// 会话快照
    pub async fn get(&self, query_id: &str) -> Option<QuerySession> {
        self.lock(query_id).await.map(|guard| guard.clone())
    }

    /// 原子地读-改-写会话
    pub async fn apply<F, R>(&self, query_id: &str, mutation: F) -> Option<R>
    where
        F: FnOnce(&mut QuerySession) -> R,
    {
        let mut guard = self.lock(query_id).await?;
        Some(mutation(&mut guard))
    }

    /// 关闭会话（幂等），返回关闭后的快照
    pub async fn close(&self, query_id: &str, reason: CloseReason) -> Option<QuerySession> {
        let mut guard = self.lock(query_id).await?;
        guard.close(reason);
        Some(guard.clone())
    }

    /// 订阅会话状态变化
    pub async fn subscribe(&self, query_id: &str) -> Option<watch::Receiver<SessionStatus>> {
        self.slot(query_id).await.map(|slot| slot.status.subscribe())
    }

    /// 丢弃会话，返回最终快照
    pub async fn remove(&self, query_id: &str) -> Option<QuerySession> {
        let slot = self.sessions.write().await.remove(query_id)?;
        let session = slot.session.lock().await.clone();
        Some(session)
    }

    /// 按问题文本查找仍然开放的会话（最早创建者优先）
    pub async fn find_open_by_phrase(&self, phrase: &str) -> Option<QueryId> {
        let slots: Vec<Arc<SessionSlot>> = self.sessions.read().await.values().cloned().collect();
        let mut best: Option<(std::time::Instant, QueryId)> = None;
        for slot in slots {
            let session = slot.session.lock().await;
            if !session.is_open() || session.phrase != phrase {
                continue;
            }
            if best.as_ref().map_or(true, |(created, _)| session.created_at < *created) {
                best = Some((session.created_at, session.query_id.clone()));
            }
        }
        best.map(|(_, id)| id)
    }

    /// 当前存放的会话数
    pub async fn active_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn store() -> SessionStore {
        SessionStore::new(Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let store = store();
        let routing = Routing::new("unittests", "common_query");
        let id = store.create("what is the speed of light", Some(routing.clone())).await;

        let session = store.get(&id).await.unwrap();
        assert_eq!(session.phrase, "what is the speed of light");
        assert_eq!(session.routing, Some(routing));
        assert_eq!(session.status, SessionStatus::Open);
        assert!(store.get("missing").await.is_none());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let store = store();
        let id = store.create("q", None).await;
        store
            .apply(&id, |s| {
                s.record("a", false, Some("yes".into()), Some(0.4), Map::new());
            })
            .await;

        let first = store.close(&id, CloseReason::AllFinalized).await.unwrap();
        assert_eq!(first.status, SessionStatus::ClosedAnswered);
        assert_eq!(first.winner.as_deref(), Some("a"));

        // 关闭后新增更好的答案也不会改变结果
        store
            .apply(&id, |s| {
                s.record("b", false, Some("better".into()), Some(0.9), Map::new());
            })
            .await;
        let second = store.close(&id, CloseReason::DeadlineExpired).await.unwrap();
        assert_eq!(second.status, SessionStatus::ClosedAnswered);
        assert_eq!(second.winner.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn test_close_without_answers() {
        let store = store();
        let id = store.create("q", None).await;
        let mut rx = store.subscribe(&id).await.unwrap();

        let session = store.close(&id, CloseReason::DeadlineExpired).await.unwrap();
        assert_eq!(session.status, SessionStatus::ClosedNoAnswer);
        assert!(session.winner.is_none());

        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), SessionStatus::ClosedNoAnswer);
    }

    #[tokio::test]
    async fn test_remove_discards() {
        let store = store();
        let id = store.create("q", None).await;
        assert_eq!(store.active_count().await, 1);

        assert!(store.remove(&id).await.is_some());
        assert_eq!(store.active_count().await, 0);
        assert!(store.close(&id, CloseReason::DeadlineExpired).await.is_none());
    }

    #[tokio::test]
    async fn test_find_open_by_phrase() {
        let store = store();
        let first = store.create("same", None).await;
        tokio::time::sleep(Duration::from_millis(2)).await;
        let _second = store.create("same", None).await;
        let _other = store.create("different", None).await;

        assert_eq!(store.find_open_by_phrase("same").await, Some(first.clone()));

        store.close(&first, CloseReason::DeadlineExpired).await;
        let next = store.find_open_by_phrase("same").await.unwrap();
        assert_ne!(next, first);
        assert!(store.find_open_by_phrase("nothing").await.is_none());
    }

    #[tokio::test]
    async fn test_concurrent_mutations_serialize() {
        let store = Arc::new(store());
        let id = store.create("q", None).await;

        let mut handles = Vec::new();
        for i in 0..16 {
            let store = Arc::clone(&store);
            let id = id.clone();
            handles.push(tokio::spawn(async move {
                store
                    .apply(&id, |s| {
                        s.record(&format!("p{i}"), true, None, None, Map::new());
                        s.extension_count += 1;
                    })
                    .await
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let session = store.get(&id).await.unwrap();
        assert_eq!(session.responses.len(), 16);
        assert_eq!(session.extension_count, 16);
    }
}
