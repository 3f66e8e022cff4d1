//! 问题广播与答案聚合（scatter-gather）
//!
//! ## 流程
//!
//! 1. **Dispatcher**：创建会话，发布 "思考中" 指示与 `question-broadcast`，调度初始超时
//! 2. **Collector**：消费 Provider 的 `question-response`；searching 时延后截止时间，
//!    所有进行中的 Provider 都给出结论时提前关闭
//! 3. **Timeout**：截止时间到达即关闭会话（已关闭则为空操作）
//! 4. **Selector**：置信度最高者胜出，平手取最早到达
//! 5. **Emitter**：发布上下文更新与最终结果，或在无答案时静默

mod collector;
mod dispatcher;
mod emitter;
mod payload;
mod selector;
mod service;
mod session;
mod session_store;
mod timeout;

pub use collector::{CollectOutcome, IgnoreReason, ResponseCollector};
pub use dispatcher::Dispatcher;
pub use emitter::OutputEmitter;
pub use payload::{
    busy_indicator, internal_context, munge_provider_id, outbound_context, AggregatedAnswer,
    ContextUpdate, QueryOutcome, QuestionBroadcast, QuestionResponse,
};
pub use selector::{select_best, select_winner};
pub use service::{CommonQuery, QueryConfig};
pub use session::{
    clamp_confidence, CloseReason, QueryId, QuerySession, ResponseRecord, SessionContext,
    SessionStatus,
};
pub use session_store::{SessionGuard, SessionStore};
pub use timeout::{expire, SessionTimer};
