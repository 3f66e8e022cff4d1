//! 基于 tokio 任务的定时器实现

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use super::{TimerCallback, TimerService};

/// 每个事件一个 sleep 任务；重新调度时中止旧任务
#[derive(Default)]
pub struct TokioTimer {
    tasks: Arc<Mutex<HashMap<String, (u64, JoinHandle<()>)>>>,
    generation: AtomicU64,
}

impl TokioTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// 尚未触发的事件数
    pub async fn pending_count(&self) -> usize {
        self.tasks.lock().await.len()
    }
}

#[async_trait]
impl TimerService for TokioTimer {
    async fn schedule(&self, event: &str, delay: Duration, callback: TimerCallback) {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let mut tasks = self.tasks.lock().await;
        if let Some((_, previous)) = tasks.remove(event) {
            previous.abort();
        }

        let registry = Arc::clone(&self.tasks);
        let name = event.to_string();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut tasks = registry.lock().await;
                match tasks.get(&name) {
                    Some((g, _)) if *g == generation => {
                        tasks.remove(&name);
                    }
                    // 已被重新调度或取消
                    _ => return,
                }
            }
            tracing::debug!(event = %name, "timer fired");
            callback().await;
        });
        tasks.insert(event.to_string(), (generation, handle));
    }

    async fn cancel(&self, event: &str) {
        if let Some((_, handle)) = self.tasks.lock().await.remove(event) {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::FutureExt;
    use std::sync::atomic::AtomicUsize;

    fn counting_callback(counter: &Arc<AtomicUsize>) -> TimerCallback {
        let counter = Arc::clone(counter);
        Box::new(move || {
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
            .boxed()
        })
    }

    #[tokio::test]
    async fn test_fires_once() {
        let timer = TokioTimer::new();
        let fired = Arc::new(AtomicUsize::new(0));

        timer
            .schedule("q1", Duration::from_millis(20), counting_callback(&fired))
            .await;
        assert_eq!(timer.pending_count().await, 1);

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(timer.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_reschedule_replaces_previous() {
        let timer = TokioTimer::new();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        timer
            .schedule("q1", Duration::from_millis(30), counting_callback(&first))
            .await;
        timer
            .schedule("q1", Duration::from_millis(60), counting_callback(&second))
            .await;

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancel() {
        let timer = TokioTimer::new();
        let fired = Arc::new(AtomicUsize::new(0));

        timer
            .schedule("q1", Duration::from_millis(30), counting_callback(&fired))
            .await;
        timer.cancel("q1").await;
        // 取消不存在的事件
        timer.cancel("missing").await;

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
