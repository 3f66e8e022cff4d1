//! Common Query - 问题广播与答案聚合引擎
//!
//! 语音助手在没有任何意图匹配时，把用户的话当作问题广播给所有答案 Provider，
//! 在有限时间窗口内收集它们的置信度与答案，选出唯一胜者。
//!
//! 模块划分：
//! - **bus**: 消息信封、路由规则、进程内发布/订阅总线
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型
//! - **observability**: 日志初始化
//! - **providers**: Provider 能力抽象、进程内托管与关键词 Provider
//! - **query**: 会话存储、分发、收集、选择与输出
//! - **timer**: 定时器服务接口（tokio 实现 + 手动假时钟）

pub mod bus;
pub mod config;
pub mod core;
pub mod observability;
pub mod providers;
pub mod query;
pub mod timer;

pub use query::{AggregatedAnswer, CommonQuery, QueryConfig, QueryOutcome};
