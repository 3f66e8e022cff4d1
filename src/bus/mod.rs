//! 消息总线：信封格式、路由规则与进程内发布/订阅实现

#[allow(clippy::module_inception)]
mod bus;
mod message;

pub use bus::{BusReceiver, MessageBus};
pub use message::{
    Message, MessageContext, Routing, CONTEXT_UPDATE, QUESTION_BROADCAST, QUESTION_RESPONSE,
    REMOVE_EVENT, SCHEDULE_EVENT, UI_BUSY_INDICATOR,
};
