//! 翻译编排配置管理模块
//!
//! 提供分层配置：默认值、配置文件（TOML/JSON）和 `PARLEY_*` 环境变量。

pub mod manager;

// 重新导出主要类型
pub use manager::{BackendConfig, CacheConfig, ConfigManager, OrchestratorConfig, SchedulerConfig};

/// 配置常量
pub mod constants {
    use std::time::Duration;

    // 成本估算相关
    pub const BASE_TIME_MS: u64 = 100;
    pub const LENGTH_FACTOR_MS: f64 = 2.0;
    pub const ADVANCED_CHAR_THRESHOLD: usize = 500;
    pub const MARKUP_ADVANCED_CHAR_THRESHOLD: usize = 200;
    pub const COMPLEX_CHAR_THRESHOLD: usize = 200;
    pub const MEDIUM_CHAR_THRESHOLD: usize = 50;
    pub const MEDIUM_WORD_THRESHOLD: usize = 10;
    pub const MEDIUM_PUNCTUATION_THRESHOLD: usize = 3;

    // 调度器设置
    pub const DEFAULT_BATCH_SIZE: usize = 16;
    pub const DEFAULT_BATCH_TIMEOUT: Duration = Duration::from_millis(250);
    pub const DEFAULT_MAX_PENDING_TASKS: usize = 10_000;
    pub const DEFAULT_MAX_RETRIES: u32 = 3;
    pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(500);
    pub const DEFAULT_MAX_CONCURRENCY: usize = 6;
    pub const DEFAULT_LEDGER_RETENTION: Duration = Duration::from_secs(300);
    pub const DEFAULT_COMMAND_CHANNEL_CAPACITY: usize = 1024;
    pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 1024;
    pub const MIN_TICK_INTERVAL: Duration = Duration::from_millis(5);

    // 默认后端设置
    pub const DEFAULT_API_URL: &str = "http://localhost:1188";
    pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
    pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
    pub const FALLBACK_CONFIDENCE: f32 = 0.1;

    // 缓存设置
    pub const DEFAULT_MEMORY_CAPACITY: usize = 1000;
    pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(3600); // 1小时
    pub const DEFAULT_DEVICE_MAX_BYTES: u64 = 16 * 1024 * 1024;
    pub const DEFAULT_SHARED_MAX_ENTRIES: usize = 100_000;
    pub const DEFAULT_SHARED_MAX_AGE: Duration = Duration::from_secs(86400 * 30);
    pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(600);
    pub const DEFAULT_PERSIST_QUEUE_CAPACITY: usize = 512;

    // 支持的语言代码
    pub const SUPPORTED_LANGUAGES: &[&str] = &[
        "ar", "bg", "cs", "da", "de", "el", "en", "es", "et", "fi", "fr", "he", "hi", "hu", "id",
        "it", "ja", "ko", "lt", "lv", "nb", "nl", "pl", "pt", "ro", "ru", "sk", "sl", "sv", "th",
        "tr", "uk", "vi", "zh",
    ];

    // 配置文件搜索路径
    pub const CONFIG_PATHS: &[&str] = &[
        "parley.toml",
        "config.toml",
        ".parley.toml",
        "~/.config/parley/config.toml",
        "/etc/parley/config.toml",
    ];
}

/// 便利函数
pub fn config_file_exists() -> bool {
    constants::CONFIG_PATHS
        .iter()
        .any(|path| std::path::Path::new(shellexpand::tilde(path).as_ref()).exists())
}

/// 加载配置，失败时退回默认配置
pub fn load_config() -> OrchestratorConfig {
    match ConfigManager::new() {
        Ok(manager) => manager.into_config(),
        Err(e) => {
            tracing::warn!("配置加载失败，使用默认配置: {}", e);
            OrchestratorConfig::default()
        }
    }
}
