//! 配置管理器
//!
//! 提供统一的配置接口，支持文件配置、环境变量和默认值

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::constants;
use crate::env::EnvVar;
use crate::translation::error::{TranslationError, TranslationResult};
use crate::translation::model::normalize_language;

/// 翻译后端配置
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct BackendConfig {
    pub api_url: String,
    pub connect_timeout_ms: u64,
    pub request_timeout_ms: u64,
    pub fallback_enabled: bool,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            api_url: constants::DEFAULT_API_URL.to_string(),
            connect_timeout_ms: constants::DEFAULT_CONNECT_TIMEOUT.as_millis() as u64,
            request_timeout_ms: constants::DEFAULT_REQUEST_TIMEOUT.as_millis() as u64,
            fallback_enabled: true,
        }
    }
}

impl BackendConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// 调度器配置
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub batch_size: usize,
    pub batch_timeout_ms: u64,
    pub max_pending_tasks: usize,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    pub max_concurrency: usize,
    pub ledger_retention_secs: u64,
    pub command_channel_capacity: usize,
    pub event_channel_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            batch_size: constants::DEFAULT_BATCH_SIZE,
            batch_timeout_ms: constants::DEFAULT_BATCH_TIMEOUT.as_millis() as u64,
            max_pending_tasks: constants::DEFAULT_MAX_PENDING_TASKS,
            max_retries: constants::DEFAULT_MAX_RETRIES,
            retry_backoff_ms: constants::DEFAULT_RETRY_BACKOFF.as_millis() as u64,
            max_concurrency: constants::DEFAULT_MAX_CONCURRENCY,
            ledger_retention_secs: constants::DEFAULT_LEDGER_RETENTION.as_secs(),
            command_channel_capacity: constants::DEFAULT_COMMAND_CHANNEL_CAPACITY,
            event_channel_capacity: constants::DEFAULT_EVENT_CHANNEL_CAPACITY,
        }
    }
}

impl SchedulerConfig {
    pub fn batch_timeout(&self) -> Duration {
        Duration::from_millis(self.batch_timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn ledger_retention(&self) -> Duration {
        Duration::from_secs(self.ledger_retention_secs)
    }

    /// 第 `attempt` 次失败后的退避时间：`retry_backoff × 2^(attempt-1)`
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.retry_backoff().saturating_mul(1u32 << exponent)
    }

    /// 调度器计时器周期
    pub fn tick_interval(&self) -> Duration {
        (self.batch_timeout() / 4).max(constants::MIN_TICK_INTERVAL)
    }
}

/// 分层缓存配置
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    pub memory_capacity: usize,
    pub memory_ttl_secs: u64,
    pub device_store_path: Option<PathBuf>,
    pub device_max_bytes: u64,
    pub shared_store_path: Option<PathBuf>,
    pub shared_max_entries: usize,
    pub shared_max_age_secs: u64,
    pub sweep_interval_secs: u64,
    pub persist_queue_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            memory_capacity: constants::DEFAULT_MEMORY_CAPACITY,
            memory_ttl_secs: constants::DEFAULT_CACHE_TTL.as_secs(),
            device_store_path: None,
            device_max_bytes: constants::DEFAULT_DEVICE_MAX_BYTES,
            shared_store_path: None,
            shared_max_entries: constants::DEFAULT_SHARED_MAX_ENTRIES,
            shared_max_age_secs: constants::DEFAULT_SHARED_MAX_AGE.as_secs(),
            sweep_interval_secs: constants::DEFAULT_SWEEP_INTERVAL.as_secs(),
            persist_queue_capacity: constants::DEFAULT_PERSIST_QUEUE_CAPACITY,
        }
    }
}

impl CacheConfig {
    /// 仅内存缓存
    pub fn memory_only(capacity: usize) -> Self {
        Self {
            memory_capacity: capacity,
            ..Default::default()
        }
    }

    pub fn memory_ttl(&self) -> Duration {
        Duration::from_secs(self.memory_ttl_secs)
    }

    pub fn shared_max_age(&self) -> Duration {
        Duration::from_secs(self.shared_max_age_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn has_durable_tiers(&self) -> bool {
        self.device_store_path.is_some() || self.shared_store_path.is_some()
    }
}

/// 翻译编排总配置
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub supported_languages: Vec<String>,
    pub backend: BackendConfig,
    pub scheduler: SchedulerConfig,
    pub cache: CacheConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            supported_languages: constants::SUPPORTED_LANGUAGES
                .iter()
                .map(|code| code.to_string())
                .collect(),
            backend: BackendConfig::default(),
            scheduler: SchedulerConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl OrchestratorConfig {
    /// 检查语言代码是否受支持
    pub fn is_supported_language(&self, code: &str) -> bool {
        let code = normalize_language(code);
        self.supported_languages.iter().any(|supported| *supported == code)
    }

    /// 验证配置
    pub fn validate(&self) -> TranslationResult<()> {
        let scheduler = &self.scheduler;

        if scheduler.batch_size == 0 {
            return Err(TranslationError::Config("批次大小不能为0".to_string()));
        }

        if scheduler.max_concurrency == 0 {
            return Err(TranslationError::Config("最大并发数不能为0".to_string()));
        }

        if scheduler.max_retries == 0 {
            return Err(TranslationError::Config("最大尝试次数不能为0".to_string()));
        }

        if scheduler.max_pending_tasks == 0 {
            return Err(TranslationError::Config("队列容量不能为0".to_string()));
        }

        if scheduler.batch_timeout_ms == 0 {
            return Err(TranslationError::Config("批次超时必须大于0".to_string()));
        }

        if scheduler.command_channel_capacity == 0 || scheduler.event_channel_capacity == 0 {
            return Err(TranslationError::Config("通道容量不能为0".to_string()));
        }

        if self.cache.memory_capacity == 0 {
            return Err(TranslationError::Config("内存缓存容量不能为0".to_string()));
        }

        if self.cache.persist_queue_capacity == 0 {
            return Err(TranslationError::Config("持久化队列容量不能为0".to_string()));
        }

        if self.backend.request_timeout_ms == 0 || self.backend.connect_timeout_ms == 0 {
            return Err(TranslationError::Config("后端超时必须大于0".to_string()));
        }

        if !self.backend.api_url.starts_with("http://") && !self.backend.api_url.starts_with("https://") {
            return Err(TranslationError::Config(format!(
                "后端地址无效: {}",
                self.backend.api_url
            )));
        }

        if self.supported_languages.is_empty() {
            return Err(TranslationError::Config("支持的语言列表不能为空".to_string()));
        }

        Ok(())
    }

    /// 应用环境变量覆盖（类型安全环境变量系统）
    ///
    /// 只有显式设置的变量才会覆盖配置文件中的值，解析失败的变量返回配置错误。
    pub fn apply_env_overrides(&mut self) -> TranslationResult<()> {
        use crate::env::{backend, cache, scheduler};

        // 后端相关环境变量
        if let Some(api_url) = backend::ApiUrl::get_explicit() {
            self.backend.api_url = api_url?;
            tracing::info!("环境变量覆盖后端地址: {}", self.backend.api_url);
        }

        if let Some(timeout) = backend::ConnectTimeout::get_explicit() {
            self.backend.connect_timeout_ms = timeout?.as_millis() as u64;
        }

        if let Some(timeout) = backend::RequestTimeout::get_explicit() {
            self.backend.request_timeout_ms = timeout?.as_millis() as u64;
        }

        if let Some(enabled) = backend::FallbackEnabled::get_explicit() {
            self.backend.fallback_enabled = enabled?;
        }

        // 调度器相关环境变量
        if let Some(batch_size) = scheduler::BatchSize::get_explicit() {
            self.scheduler.batch_size = batch_size?;
        }

        if let Some(batch_timeout) = scheduler::BatchTimeout::get_explicit() {
            self.scheduler.batch_timeout_ms = batch_timeout?.as_millis() as u64;
        }

        if let Some(max_pending) = scheduler::MaxPendingTasks::get_explicit() {
            self.scheduler.max_pending_tasks = max_pending?;
        }

        if let Some(max_retries) = scheduler::MaxRetries::get_explicit() {
            self.scheduler.max_retries = max_retries? as u32;
        }

        if let Some(backoff) = scheduler::RetryBackoff::get_explicit() {
            self.scheduler.retry_backoff_ms = backoff?.as_millis() as u64;
        }

        if let Some(max_concurrency) = scheduler::MaxConcurrency::get_explicit() {
            self.scheduler.max_concurrency = max_concurrency?;
            tracing::info!("环境变量覆盖最大并发数: {}", self.scheduler.max_concurrency);
        }

        // 缓存相关环境变量
        if let Some(capacity) = cache::MemoryCapacity::get_explicit() {
            self.cache.memory_capacity = capacity?;
        }

        if let Some(ttl) = cache::MemoryTtl::get_explicit() {
            self.cache.memory_ttl_secs = ttl?.as_secs();
        }

        if let Some(path) = cache::DeviceStorePath::get_explicit() {
            self.cache.device_store_path = Some(path?);
        }

        if let Some(path) = cache::SharedStorePath::get_explicit() {
            self.cache.shared_store_path = Some(path?);
        }

        if let Some(max_age) = cache::SharedMaxAge::get_explicit() {
            self.cache.shared_max_age_secs = max_age?.as_secs();
        }

        Ok(())
    }
}

/// 配置管理器
pub struct ConfigManager {
    config: OrchestratorConfig,
    source: Option<PathBuf>,
}

impl ConfigManager {
    /// 创建新的配置管理器
    pub fn new() -> TranslationResult<Self> {
        let (mut config, source) = Self::load_config()?;
        config.apply_env_overrides()?;
        config.validate()?;

        Ok(Self { config, source })
    }

    /// 从指定文件创建（仍然应用环境变量覆盖）
    pub fn from_file(path: &Path) -> TranslationResult<Self> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides()?;
        config.validate()?;

        Ok(Self {
            config,
            source: Some(path.to_path_buf()),
        })
    }

    /// 获取配置
    pub fn get_config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn into_config(self) -> OrchestratorConfig {
        self.config
    }

    /// 配置来源文件（未找到时为 None）
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// 查找并加载配置
    fn load_config() -> TranslationResult<(OrchestratorConfig, Option<PathBuf>)> {
        // 首先尝试加载 .env 文件
        Self::load_dotenv();

        if let Some(path) = crate::env::core::ConfigPath::get_explicit() {
            let path = path?;
            tracing::info!("加载环境变量指定的配置文件: {}", path.display());
            return Ok((Self::load_from_file(&path)?, Some(path)));
        }

        // 查找配置文件
        for path in constants::CONFIG_PATHS {
            let expanded_path = shellexpand::tilde(path);
            let candidate = Path::new(expanded_path.as_ref());
            if candidate.exists() {
                tracing::info!("加载配置文件: {}", expanded_path);
                return Ok((Self::load_from_file(candidate)?, Some(candidate.to_path_buf())));
            }
        }

        tracing::info!("未找到配置文件，使用默认配置");
        Ok((OrchestratorConfig::default(), None))
    }

    /// 从指定文件加载配置
    fn load_from_file(path: &Path) -> TranslationResult<OrchestratorConfig> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| TranslationError::Config(format!("读取配置文件失败: {}", e)))?;

        // 尝试TOML格式
        if path.extension().map_or(false, |ext| ext == "toml") {
            toml::from_str(&content)
                .map_err(|e| TranslationError::Config(format!("解析TOML配置失败: {}", e)))
        } else {
            // 尝试JSON格式
            serde_json::from_str(&content)
                .map_err(|e| TranslationError::Config(format!("解析JSON配置失败: {}", e)))
        }
    }

    /// 加载 .env 文件
    fn load_dotenv() {
        let env_files = [".env.local", ".env.development", ".env.production", ".env"];

        for env_file in &env_files {
            if Path::new(env_file).exists() && dotenv::from_filename(env_file).is_ok() {
                tracing::info!("已加载环境变量文件: {}", env_file);
                break;
            }
        }
    }

    /// 生成示例配置文件
    pub fn generate_example_config(path: &Path) -> TranslationResult<()> {
        let config = OrchestratorConfig::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| TranslationError::Config(format!("序列化配置失败: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| TranslationError::Config(format!("写入配置文件失败: {}", e)))?;

        Ok(())
    }
}
