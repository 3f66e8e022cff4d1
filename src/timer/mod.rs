//! 定时器服务接口
//!
//! 聚合引擎只依赖 schedule / cancel 契约：
//! - 以事件名为键调度回调；对同名事件再次 schedule 即为重新调度（旧回调作废）
//! - cancel 为尽力而为，回调仍可能与取消并发触发，调用方需自行保证幂等

mod manual;
mod tokio_timer;

use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::BoxFuture;

pub use manual::ManualTimer;
pub use tokio_timer::TokioTimer;

/// 到期回调
pub type TimerCallback = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

#[async_trait]
pub trait TimerService: Send + Sync {
    /// 在 `delay` 之后触发 `callback`，替换同名的已调度事件
    async fn schedule(&self, event: &str, delay: Duration, callback: TimerCallback);

    /// 取消事件；事件不存在时为空操作
    async fn cancel(&self, event: &str);
}
