//! 问答协议载荷与调用结果
//!
//! 字段名即线上契约：Provider 响应与最终聚合结果共用 `question-response` 的载荷结构。

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Map, Value};

use super::session::QueryId;
use crate::bus::{Message, MessageContext, Routing};
use crate::core::{QueryError, Result};

/// 广播问题载荷
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionBroadcast {
    pub phrase: String,
    pub query_id: QueryId,
}

/// Provider 响应 / 最终聚合结果载荷
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct QuestionResponse {
    pub phrase: String,
    pub provider_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_id: Option<QueryId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub searching: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_data: Option<Map<String, Value>>,
    /// 非数值的置信度按缺失处理
    #[serde(
        default,
        alias = "conf",
        deserialize_with = "lenient_f64",
        skip_serializing_if = "Option::is_none"
    )]
    pub confidence: Option<f64>,
}

fn lenient_f64<'de, D>(deserializer: D) -> std::result::Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(value.as_f64())
}

impl QuestionResponse {
    /// 解析 `question-response` 消息
    pub fn from_message(message: &Message) -> Result<Self> {
        if !message.data.is_object() {
            return Err(QueryError::InvalidMessage(format!(
                "{} data must be an object",
                message.msg_type
            )));
        }
        let response: Self = serde_json::from_value(message.data.clone())
            .map_err(|e| QueryError::InvalidMessage(e.to_string()))?;
        if response.provider_id.is_empty() {
            return Err(QueryError::InvalidMessage("empty provider_id".into()));
        }
        Ok(response)
    }

    /// 带非空答案
    pub fn has_answer(&self) -> bool {
        self.answer.as_deref().is_some_and(|a| !a.is_empty())
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// 上下文更新载荷
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextUpdate {
    pub context_tag: String,
    pub word: String,
    pub origin: String,
}

/// 聚合得到的答案
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedAnswer {
    pub query_id: QueryId,
    pub phrase: String,
    pub provider_id: String,
    pub answer: String,
    pub confidence: f64,
    pub callback_data: Map<String, Value>,
}

/// `handle_question` 的结果：没有答案是正常结果，外层兜底链可以继续尝试
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutcome {
    Answered(AggregatedAnswer),
    NoAnswer,
}

impl QueryOutcome {
    pub fn is_answered(&self) -> bool {
        matches!(self, QueryOutcome::Answered(_))
    }

    pub fn answer(&self) -> Option<&AggregatedAnswer> {
        match self {
            QueryOutcome::Answered(a) => Some(a),
            QueryOutcome::NoAnswer => None,
        }
    }
}

/// 聚合器发出的消息上下文
///
/// 有路由时按回复语义发往请求方（destination = 请求方 source），否则为内部消息。
pub fn outbound_context(routing: Option<&Routing>, aggregator_id: &str) -> MessageContext {
    let mut context = MessageContext::new();
    if let Some(r) = routing {
        context.insert("destination".into(), Value::String(r.source.clone()));
        context.insert("source".into(), Value::String(r.destination.clone()));
    }
    context.insert("provider_id".into(), Value::String(aggregator_id.to_string()));
    context
}

/// 仅内部可见的消息上下文
pub fn internal_context(aggregator_id: &str) -> MessageContext {
    outbound_context(None, aggregator_id)
}

/// "正在思考" 指示消息，固定发往 UI
pub fn busy_indicator(aggregator_id: &str) -> Message {
    let mut context = internal_context(aggregator_id);
    context.insert("destination".into(), json!(["ui"]));
    Message::new(crate::bus::UI_BUSY_INDICATOR, json!({})).with_context(context)
}

/// Provider ID 转为只含字母数字与下划线的上下文前缀
pub fn munge_provider_id(provider_id: &str) -> String {
    provider_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}
