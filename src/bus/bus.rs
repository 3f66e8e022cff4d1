//! 进程内消息总线（发布/订阅）
//!
//! 基于 `tokio::sync::broadcast`：所有订阅者按发送顺序看到同一条消息流。

use tokio::sync::broadcast;

use super::message::Message;
use crate::core::{QueryError, Result};

const DEFAULT_CHANNEL_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct MessageBus {
    sender: broadcast::Sender<Message>,
}

impl MessageBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// 发布消息；没有订阅者时静默丢弃
    pub fn emit(&self, message: Message) {
        tracing::trace!(msg_type = %message.msg_type, "bus emit");
        let _ = self.sender.send(message);
    }

    /// 发布消息，没有任何订阅者时返回错误
    pub fn send(&self, message: Message) -> Result<()> {
        self.sender
            .send(message)
            .map(|_| ())
            .map_err(|_| QueryError::BusClosed)
    }

    pub fn subscribe(&self) -> BusReceiver {
        BusReceiver {
            receiver: self.sender.subscribe(),
            filter: None,
            lagged: 0,
        }
    }

    /// 只订阅指定类型的消息
    pub fn on(&self, msg_type: impl Into<String>) -> BusReceiver {
        BusReceiver {
            receiver: self.sender.subscribe(),
            filter: Some(msg_type.into()),
            lagged: 0,
        }
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

pub struct BusReceiver {
    receiver: broadcast::Receiver<Message>,
    filter: Option<String>,
    /// 因积压被覆盖而丢失的消息总数（不区分类型）
    lagged: u64,
}

impl BusReceiver {
    fn accepts(&self, message: &Message) -> bool {
        self.filter
            .as_deref()
            .map_or(true, |t| t == message.msg_type)
    }

    pub fn lagged(&self) -> u64 {
        self.lagged
    }

    /// 等待下一条消息；总线关闭时返回 None
    pub async fn recv(&mut self) -> Option<Message> {
        loop {
            match self.receiver.recv().await {
                Ok(msg) if self.accepts(&msg) => return Some(msg),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "Bus receiver lagged");
                    self.lagged += n;
                    continue;
                }
            }
        }
    }

    pub fn try_recv(&mut self) -> Option<Message> {
        loop {
            match self.receiver.try_recv() {
                Ok(msg) if self.accepts(&msg) => return Some(msg),
                Ok(_) => continue,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    self.lagged += n;
                    continue;
                }
                Err(_) => return None,
            }
        }
    }

    /// 取出当前已到达的全部消息
    pub fn drain(&mut self) -> Vec<Message> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}
