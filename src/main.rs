//! Common Query 命令行
//!
//! 入口：初始化日志、加载配置、托管配置中的关键词 Provider，逐行读取标准输入作为问题。
//! 一行也可以是完整的总线消息 JSON，如 `{"type":"fallback","data":{"utterance":"..."}}`。
//!
//! 运行方式：
//! ```bash
//! cargo run -- config/demo.toml
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use common_query::bus::{Message, MessageBus};
use common_query::config::load_config;
use common_query::providers::KeywordProvider;
use common_query::timer::TokioTimer;
use common_query::{CommonQuery, QueryConfig, QueryOutcome};
use tokio::io::{AsyncBufReadExt, BufReader};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    common_query::observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let cfg = load_config(config_path).context("Failed to load config")?;

    let bus = MessageBus::new(cfg.bus.capacity);
    let engine = CommonQuery::new(QueryConfig::from(&cfg.query), bus, Arc::new(TokioTimer::new()));
    engine.start().await;

    for provider in &cfg.providers {
        engine
            .register_provider(Arc::new(KeywordProvider::new(provider.clone())))
            .await;
    }
    if cfg.providers.is_empty() {
        tracing::warn!("No providers configured, every question will go unanswered");
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received Ctrl+C, shutting down...");
                break;
            }
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    break;
                };
                let question = line.trim();
                if question.is_empty() {
                    continue;
                }
                // 以 `{` 开头的行按总线消息处理，携带路由上下文
                let outcome = if question.starts_with('{') {
                    match Message::from_json(question) {
                        Ok(msg) => engine.handle_utterance(&msg).await,
                        Err(e) => Err(e),
                    }
                } else {
                    Ok(engine.handle_question(question, None).await)
                };
                let outcome = match outcome {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        tracing::warn!("Rejected input: {}", e);
                        continue;
                    }
                };
                match outcome {
                    QueryOutcome::Answered(answer) => println!(
                        "[{} {:.2}] {}",
                        answer.provider_id, answer.confidence, answer.answer
                    ),
                    QueryOutcome::NoAnswer => println!("(no answer)"),
                }
            }
        }
    }

    engine.stop().await;
    Ok(())
}
