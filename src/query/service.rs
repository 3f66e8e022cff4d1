//! Common Query 服务：组装会话存储、定时器、分发、收集与输出

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::collector::ResponseCollector;
use super::dispatcher::Dispatcher;
use super::emitter::OutputEmitter;
use super::payload::QueryOutcome;
use super::session_store::SessionStore;
use super::timeout::SessionTimer;
use crate::bus::{Message, MessageBus, Routing, QUESTION_RESPONSE};
use crate::core::Result;
use crate::providers::{ProviderHost, QueryProvider};
use crate::timer::TimerService;

/// 聚合引擎配置
#[derive(Debug, Clone)]
pub struct QueryConfig {
    /// 聚合器自身 ID，写入所发出消息的 `context.provider_id`
    pub aggregator_id: String,
    /// 初始等待窗口
    pub initial_timeout: Duration,
    /// 每次延期的增量
    pub extension: Duration,
    /// 延期次数上限
    pub max_extensions: u32,
    /// 定时器失灵时的额外宽限
    pub safety_grace: Duration,
}

impl QueryConfig {
    /// 最坏情况下的等待时长
    pub fn max_wait(&self) -> Duration {
        self.initial_timeout + self.extension * self.max_extensions
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            aggregator_id: "common_query".to_string(),
            initial_timeout: Duration::from_secs(5),
            extension: Duration::from_secs(10),
            max_extensions: 3,
            safety_grace: Duration::from_secs(1),
        }
    }
}

pub struct CommonQuery {
    config: QueryConfig,
    bus: MessageBus,
    store: Arc<SessionStore>,
    collector: Arc<ResponseCollector>,
    emitter: Arc<OutputEmitter>,
    dispatcher: Dispatcher,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl CommonQuery {
    pub fn new(config: QueryConfig, bus: MessageBus, timer: Arc<dyn TimerService>) -> Self {
        let store = Arc::new(SessionStore::new(config.initial_timeout));
        let session_timer = Arc::new(SessionTimer::new(
            timer,
            Arc::clone(&store),
            bus.clone(),
            config.aggregator_id.clone(),
        ));
        let emitter = Arc::new(OutputEmitter::new(bus.clone(), config.aggregator_id.clone()));
        let collector = Arc::new(ResponseCollector::new(
            Arc::clone(&store),
            Arc::clone(&session_timer),
            config.aggregator_id.clone(),
            config.extension,
            config.max_extensions,
        ));
        let dispatcher = Dispatcher::new(
            Arc::clone(&store),
            session_timer,
            Arc::clone(&emitter),
            bus.clone(),
            config.aggregator_id.clone(),
            config.initial_timeout,
            config.max_wait() + config.safety_grace,
        );

        Self {
            config,
            bus,
            store,
            collector,
            emitter,
            dispatcher,
            shutdown: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// 启动响应收集循环；返回时已完成订阅
    pub async fn start(&self) {
        let rx = self.bus.on(QUESTION_RESPONSE);
        let handle = Arc::clone(&self.collector).spawn(rx, self.shutdown.child_token());
        self.tasks.lock().await.push(handle);
        tracing::info!(aggregator = %self.config.aggregator_id, "Common query started");
    }

    /// 托管一个进程内 Provider：订阅广播并在胜出时接收回调
    pub async fn register_provider(&self, provider: Arc<dyn QueryProvider>) {
        tracing::info!(provider = %provider.id(), "Provider registered");
        self.emitter.register(Arc::clone(&provider)).await;
        let handle = ProviderHost::new(provider, self.bus.clone()).spawn(self.shutdown.child_token());
        self.tasks.lock().await.push(handle);
    }

    pub async fn handle_question(&self, utterance: &str, routing: Option<Routing>) -> QueryOutcome {
        self.dispatcher.handle_question(utterance, routing).await
    }

    pub async fn handle_utterance(&self, message: &Message) -> Result<QueryOutcome> {
        self.dispatcher.handle_utterance(message).await
    }

    /// 停止所有后台任务
    pub async fn stop(&self) {
        self.shutdown.cancel();
        let tasks: Vec<_> = self.tasks.lock().await.drain(..).collect();
        for task in tasks {
            let _ = task.await;
        }
        tracing::info!(aggregator = %self.config.aggregator_id, "Common query stopped");
    }

    /// 进行中的会话数
    pub async fn active_sessions(&self) -> usize {
        self.store.active_count().await
    }

    pub fn bus(&self) -> &MessageBus {
        &self.bus
    }

    pub fn config(&self) -> &QueryConfig {
        &self.config
    }
}
