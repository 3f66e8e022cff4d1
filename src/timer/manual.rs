//! 手动驱动的定时器（测试用假时钟）
//!
//! 调度只做登记，由测试代码调用 `fire` 决定何时到期，结果完全确定。

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{TimerCallback, TimerService};

#[derive(Default)]
pub struct ManualTimer {
    scheduled: Mutex<HashMap<String, (Duration, TimerCallback)>>,
    cancelled: Mutex<Vec<String>>,
}

impl ManualTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// 立即触发事件；事件未调度时返回 false
    pub async fn fire(&self, event: &str) -> bool {
        let entry = self.scheduled.lock().await.remove(event);
        match entry {
            Some((_, callback)) => {
                callback().await;
                true
            }
            None => false,
        }
    }

    pub async fn is_scheduled(&self, event: &str) -> bool {
        self.scheduled.lock().await.contains_key(event)
    }

    /// 最近一次调度的延迟
    pub async fn delay_of(&self, event: &str) -> Option<Duration> {
        self.scheduled.lock().await.get(event).map(|(d, _)| *d)
    }

    pub async fn scheduled_events(&self) -> Vec<String> {
        self.scheduled.lock().await.keys().cloned().collect()
    }

    /// 被取消过的事件（按取消顺序）
    pub async fn cancelled(&self) -> Vec<String> {
        self.cancelled.lock().await.clone()
    }
}

#[async_trait]
impl TimerService for ManualTimer {
    async fn schedule(&self, event: &str, delay: Duration, callback: TimerCallback) {
        self.scheduled
            .lock()
            .await
            .insert(event.to_string(), (delay, callback));
    }

    async fn cancel(&self, event: &str) {
        self.scheduled.lock().await.remove(event);
        self.cancelled.lock().await.push(event.to_string());
    }
}
