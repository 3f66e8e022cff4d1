//! 总线消息协议定义
//!
//! 所有消息都是 `{type, data, context}` 三段式信封。`context` 承载路由信息：
//! `destination` 决定消息是否会被投递给外部请求方。

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 广播问题
pub const QUESTION_BROADCAST: &str = "question-broadcast";
/// Provider 响应，也用于最终聚合结果
pub const QUESTION_RESPONSE: &str = "question-response";
/// 对话上下文更新（供追问使用）
pub const CONTEXT_UPDATE: &str = "context-update";
/// "正在思考" 指示
pub const UI_BUSY_INDICATOR: &str = "ui-busy-indicator";
/// 定时器调度通知
pub const SCHEDULE_EVENT: &str = "scheduler.schedule-event";
/// 定时器取消通知
pub const REMOVE_EVENT: &str = "scheduler.remove-event";

/// 消息上下文（任意键值）
pub type MessageContext = Map<String, Value>;

/// 总线消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type")]
    pub msg_type: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub context: MessageContext,
}

impl Message {
    pub fn new(msg_type: impl Into<String>, data: Value) -> Self {
        Self {
            msg_type: msg_type.into(),
            data,
            context: MessageContext::new(),
        }
    }

    pub fn with_context(mut self, context: MessageContext) -> Self {
        self.context = context;
        self
    }

    /// 沿用当前上下文发出新消息
    pub fn forward(&self, msg_type: impl Into<String>, data: Value) -> Self {
        Self {
            msg_type: msg_type.into(),
            data,
            context: self.context.clone(),
        }
    }

    /// 回复：交换 source 与 destination，使回复发往原始请求方
    pub fn reply(&self, msg_type: impl Into<String>, data: Value) -> Self {
        let mut context = self.context.clone();
        let source = context.remove("source");
        let destination = context.remove("destination");
        if let Some(s) = source {
            context.insert("destination".into(), s);
        }
        if let Some(d) = destination {
            context.insert("source".into(), d);
        }
        Self {
            msg_type: msg_type.into(),
            data,
            context,
        }
    }

    /// 读取 data 中的字符串字段
    pub fn data_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }

    pub fn context_str(&self, key: &str) -> Option<&str> {
        self.context.get(key).and_then(Value::as_str)
    }

    /// 消息是否会投递给指定的外部通道
    ///
    /// `destination` 可以是单个字符串，也可以是字符串数组；缺失即为内部消息。
    pub fn is_routed_to(&self, channel: &str) -> bool {
        match self.context.get("destination") {
            Some(Value::String(d)) => d == channel,
            Some(Value::Array(items)) => items.iter().any(|v| v.as_str() == Some(channel)),
            _ => false,
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn from_json(raw: &str) -> crate::core::Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// 外部请求方路由信息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Routing {
    /// 请求方所在通道
    pub source: String,
    /// 请求方希望送达的处理方
    pub destination: String,
}

impl Routing {
    pub fn new(source: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
        }
    }

    /// 从消息上下文中提取路由（两者都存在才算有效）
    pub fn from_context(context: &MessageContext) -> Option<Self> {
        let source = context.get("source")?.as_str()?;
        let destination = context.get("destination")?.as_str()?;
        Some(Self::new(source, destination))
    }

    /// 请求方发来消息时携带的上下文
    pub fn to_context(&self) -> MessageContext {
        let mut context = MessageContext::new();
        context.insert("source".into(), Value::String(self.source.clone()));
        context.insert("destination".into(), Value::String(self.destination.clone()));
        context
    }
}
