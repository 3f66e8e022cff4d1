//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `COMMON_QUERY__*` 覆盖（双下划线表示嵌套，如
//! `COMMON_QUERY__QUERY__INITIAL_TIMEOUT_MS=3000`）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::core::Result;
use crate::providers::KeywordProviderConfig;
use crate::query::QueryConfig;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub query: QuerySection,
    pub bus: BusSection,
    /// [[providers]]：命令行托管的关键词 Provider
    pub providers: Vec<KeywordProviderConfig>,
}

/// [app] 段
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppSection {
    pub name: Option<String>,
}

/// [query] 段：聚合窗口与延期策略（毫秒）
#[derive(Debug, Clone, Deserialize)]
pub struct QuerySection {
    #[serde(default = "default_aggregator_id")]
    pub aggregator_id: String,
    #[serde(default = "default_initial_timeout_ms")]
    pub initial_timeout_ms: u64,
    #[serde(default = "default_extension_ms")]
    pub extension_ms: u64,
    #[serde(default = "default_max_extensions")]
    pub max_extensions: u32,
    #[serde(default = "default_safety_grace_ms")]
    pub safety_grace_ms: u64,
}

fn default_aggregator_id() -> String {
    "common_query".to_string()
}

fn default_initial_timeout_ms() -> u64 {
    5000
}

fn default_extension_ms() -> u64 {
    10_000
}

fn default_max_extensions() -> u32 {
    3
}

fn default_safety_grace_ms() -> u64 {
    1000
}

impl Default for QuerySection {
    fn default() -> Self {
        Self {
            aggregator_id: default_aggregator_id(),
            initial_timeout_ms: default_initial_timeout_ms(),
            extension_ms: default_extension_ms(),
            max_extensions: default_max_extensions(),
            safety_grace_ms: default_safety_grace_ms(),
        }
    }
}

impl From<&QuerySection> for QueryConfig {
    fn from(section: &QuerySection) -> Self {
        Self {
            aggregator_id: section.aggregator_id.clone(),
            initial_timeout: Duration::from_millis(section.initial_timeout_ms),
            extension: Duration::from_millis(section.extension_ms),
            max_extensions: section.max_extensions,
            safety_grace: Duration::from_millis(section.safety_grace_ms),
        }
    }
}

/// [bus] 段
#[derive(Debug, Clone, Deserialize)]
pub struct BusSection {
    #[serde(default = "default_bus_capacity")]
    pub capacity: usize,
}

fn default_bus_capacity() -> usize {
    256
}

impl Default for BusSection {
    fn default() -> Self {
        Self {
            capacity: default_bus_capacity(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 COMMON_QUERY__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 COMMON_QUERY__*
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("COMMON_QUERY")
            .separator("__")
            .try_parsing(true),
    );

    Ok(builder.build()?.try_deserialize()?)
}
