//! 查询会话数据模型
//!
//! 一次 `handle_question` 调用对应一个 `QuerySession`：记录广播出去的问题、
//! 各 Provider 的响应、截止时间与延期次数，以及最终的关闭状态和胜出者。

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use super::payload::outbound_context;
use crate::bus::{MessageContext, Routing};

/// 查询 ID（UUID v4，创建时生成，永不复用）
pub type QueryId = String;

/// 会话状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Open,
    ClosedAnswered,
    ClosedNoAnswer,
}

impl SessionStatus {
    pub fn is_closed(&self) -> bool {
        !matches!(self, SessionStatus::Open)
    }
}

/// 关闭原因（仅用于日志与诊断）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// 所有声明在搜索的 Provider 都已给出结论
    AllFinalized,
    /// 截止时间到达
    DeadlineExpired,
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CloseReason::AllFinalized => write!(f, "all_finalized"),
            CloseReason::DeadlineExpired => write!(f, "deadline_expired"),
        }
    }
}

/// 会话上下文：贯穿每个操作，替代隐式的全局状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    pub query_id: QueryId,
    pub routing: Option<Routing>,
}

impl SessionContext {
    /// 聚合器为该会话发出消息时使用的上下文
    pub fn outbound(&self, aggregator_id: &str) -> MessageContext {
        outbound_context(self.routing.as_ref(), aggregator_id)
    }
}

/// 单个 Provider 的响应记录
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseRecord {
    pub provider_id: String,
    pub searching: bool,
    pub answer: Option<String>,
    /// 已截断到 [0, 1]
    pub confidence: f64,
    pub callback_data: Map<String, Value>,
    pub received_at: DateTime<Utc>,
    /// 会话内到达序号，同一时刻到达时用于稳定排序
    pub sequence: u64,
}

impl ResponseRecord {
    /// 是否为最终答案（非空 answer）
    pub fn is_final(&self) -> bool {
        self.answer.as_deref().is_some_and(|a| !a.is_empty())
    }
}

/// 把原始置信度截断到 [0, 1]；缺失或非有限值视为 0.0
pub fn clamp_confidence(raw: Option<f64>) -> f64 {
    match raw {
        Some(c) if c.is_finite() => c.clamp(0.0, 1.0),
        _ => 0.0,
    }
}

/// 一次查询的完整簿记状态
#[derive(Debug, Clone)]
pub struct QuerySession {
    pub query_id: QueryId,
    pub phrase: String,
    pub routing: Option<Routing>,
    /// 问题广播时已知的 Provider
    pub notified_providers: HashSet<String>,
    pub responses: HashMap<String, ResponseRecord>,
    /// 曾经声明过 searching 的 Provider
    pub searching_providers: HashSet<String>,
    pub deadline: Instant,
    pub extension_count: u32,
    pub status: SessionStatus,
    pub winner: Option<String>,
    /// 关闭后仍到达的响应数（只记账，不影响结果）
    pub late_responses: usize,
    pub created_at: Instant,
    next_sequence: u64,
}

impl QuerySession {
    pub fn new(phrase: String, routing: Option<Routing>, window: Duration) -> Self {
        let now = Instant::now();
        Self {
            query_id: uuid::Uuid::new_v4().to_string(),
            phrase,
            routing,
            notified_providers: HashSet::new(),
            responses: HashMap::new(),
            searching_providers: HashSet::new(),
            deadline: now + window,
            extension_count: 0,
            status: SessionStatus::Open,
            winner: None,
            late_responses: 0,
            created_at: now,
            next_sequence: 0,
        }
    }

    pub fn context(&self) -> SessionContext {
        SessionContext {
            query_id: self.query_id.clone(),
            routing: self.routing.clone(),
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == SessionStatus::Open
    }

    /// 写入（或覆盖）Provider 自己的记录，返回分配的到达序号
    pub fn record(
        &mut self,
        provider_id: &str,
        searching: bool,
        answer: Option<String>,
        confidence: Option<f64>,
        callback_data: Map<String, Value>,
    ) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.responses.insert(
            provider_id.to_string(),
            ResponseRecord {
                provider_id: provider_id.to_string(),
                searching,
                answer,
                confidence: clamp_confidence(confidence),
                callback_data,
                received_at: Utc::now(),
                sequence,
            },
        );
        sequence
    }

    pub fn finalized(&self) -> impl Iterator<Item = &ResponseRecord> {
        self.responses.values().filter(|r| r.is_final())
    }

    pub fn has_finalized(&self) -> bool {
        self.finalized().next().is_some()
    }

    /// 已通知与声明过搜索的 Provider 是否全部给出了结论（答案或放弃）
    ///
    /// 已通知但尚无记录的 Provider 视为仍在进行中。
    pub fn in_flight_settled(&self) -> bool {
        self.notified_providers
            .iter()
            .chain(self.searching_providers.iter())
            .all(|id| self.responses.get(id).map_or(false, |r| !r.searching))
    }

    pub fn winner_record(&self) -> Option<&ResponseRecord> {
        self.winner.as_ref().and_then(|id| self.responses.get(id))
    }

    pub fn elapsed(&self) -> Duration {
        self.created_at.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_confidence() {
        assert_eq!(clamp_confidence(None), 0.0);
        assert_eq!(clamp_confidence(Some(1.7)), 1.0);
        assert_eq!(clamp_confidence(Some(-0.2)), 0.0);
        assert_eq!(clamp_confidence(Some(f64::NAN)), 0.0);
        assert_eq!(clamp_confidence(Some(0.42)), 0.42);
    }

    #[test]
    fn test_provider_overwrites_own_record() {
        let mut session = QuerySession::new("hello".into(), None, Duration::from_secs(5));
        session.record("a", true, None, None, Map::new());
        session.record("b", true, None, None, Map::new());
        let seq = session.record("a", false, Some("hi".into()), Some(0.5), Map::new());

        assert_eq!(session.responses.len(), 2);
        let a = &session.responses["a"];
        assert!(a.is_final());
        assert_eq!(a.sequence, seq);
        assert!(session.responses["b"].searching);
    }

    #[test]
    fn test_query_ids_unique() {
        let a = QuerySession::new("x".into(), None, Duration::from_secs(1));
        let b = QuerySession::new("x".into(), None, Duration::from_secs(1));
        assert_ne!(a.query_id, b.query_id);
    }

    #[test]
    fn test_notified_provider_without_record_is_in_flight() {
        let mut session = QuerySession::new("x".into(), None, Duration::from_secs(1));
        session.notified_providers.extend(["fast".to_string(), "slow".to_string()]);

        session.record("fast", false, Some("hi".into()), Some(0.1), Map::new());
        assert!(session.has_finalized());
        assert!(!session.in_flight_settled());

        session.record("slow", true, None, None, Map::new());
        assert!(!session.in_flight_settled());

        // 放弃同样算作给出结论
        session.record("slow", false, None, None, Map::new());
        assert!(session.in_flight_settled());
    }

    #[test]
    fn test_empty_answer_is_not_final() {
        let mut session = QuerySession::new("x".into(), None, Duration::from_secs(1));
        session.record("a", false, Some(String::new()), Some(0.9), Map::new());
        assert!(!session.has_finalized());
    }
}
