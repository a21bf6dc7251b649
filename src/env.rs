//! 统一的环境变量管理系统
//!
//! 提供类型安全、可验证的环境变量访问。所有变量都以 `PARLEY_` 为前缀，
//! 由 [`crate::translation::config::ConfigManager`] 用来覆盖配置文件中的值。

use std::env;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// 环境变量解析错误
#[derive(Debug, Clone)]
pub struct EnvError {
    pub variable: String,
    pub message: String,
}

impl fmt::Display for EnvError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Environment variable '{}': {}", self.variable, self.message)
    }
}

impl std::error::Error for EnvError {}

pub type EnvResult<T> = Result<T, EnvError>;

/// 环境变量访问器特性
pub trait EnvVar<T> {
    const NAME: &'static str;
    const DEFAULT: Option<T>;
    const DESCRIPTION: &'static str;

    fn parse(value: &str) -> EnvResult<T>;

    fn get() -> EnvResult<T> {
        match env::var(Self::NAME) {
            Ok(value) => Self::parse(&value),
            Err(_) => {
                if let Some(default) = Self::DEFAULT {
                    Ok(default)
                } else {
                    Err(EnvError {
                        variable: Self::NAME.to_string(),
                        message: "Required environment variable not set".to_string(),
                    })
                }
            }
        }
    }

    /// 仅当变量被显式设置时返回值，用于覆盖配置文件
    fn get_explicit() -> Option<EnvResult<T>> {
        env::var(Self::NAME).ok().map(|value| Self::parse(&value))
    }

    fn get_or_default(default: T) -> T {
        Self::get().unwrap_or(default)
    }
}

/// 核心环境变量定义
pub mod core {
    use super::*;

    /// 日志级别
    pub struct LogLevel;
    impl EnvVar<String> for LogLevel {
        const NAME: &'static str = "PARLEY_LOG_LEVEL";
        const DEFAULT: Option<String> = None;
        const DESCRIPTION: &'static str = "Log level: trace, debug, info, warn, error";

        fn get() -> EnvResult<String> {
            match env::var(Self::NAME) {
                Ok(value) => Self::parse(&value),
                Err(_) => Ok("info".to_string()),
            }
        }

        fn parse(value: &str) -> EnvResult<String> {
            match value.to_lowercase().as_str() {
                "trace" | "debug" | "info" | "warn" | "error" => Ok(value.to_lowercase()),
                _ => Err(EnvError {
                    variable: Self::NAME.to_string(),
                    message: format!(
                        "Invalid log level '{}'. Use: trace, debug, info, warn, error",
                        value
                    ),
                }),
            }
        }
    }

    /// 配置文件路径（优先于默认搜索路径）
    pub struct ConfigPath;
    impl EnvVar<PathBuf> for ConfigPath {
        const NAME: &'static str = "PARLEY_CONFIG";
        const DEFAULT: Option<PathBuf> = None;
        const DESCRIPTION: &'static str = "Path to a TOML or JSON configuration file";

        fn parse(value: &str) -> EnvResult<PathBuf> {
            parse_path(value, Self::NAME)
        }
    }
}

/// 翻译后端相关环境变量
pub mod backend {
    use super::*;

    /// 后端地址
    pub struct ApiUrl;
    impl EnvVar<String> for ApiUrl {
        const NAME: &'static str = "PARLEY_BACKEND_URL";
        const DEFAULT: Option<String> = None;
        const DESCRIPTION: &'static str = "Translation backend base URL";

        fn get() -> EnvResult<String> {
            match env::var(Self::NAME) {
                Ok(value) => Self::parse(&value),
                Err(_) => Ok("http://localhost:1188".to_string()),
            }
        }

        fn parse(value: &str) -> EnvResult<String> {
            let url = value.trim();
            if url.starts_with("http://") || url.starts_with("https://") {
                Ok(url.trim_end_matches('/').to_string())
            } else {
                Err(EnvError {
                    variable: Self::NAME.to_string(),
                    message: "Backend URL must start with http:// or https://".to_string(),
                })
            }
        }
    }

    /// 连接超时
    pub struct ConnectTimeout;
    impl EnvVar<Duration> for ConnectTimeout {
        const NAME: &'static str = "PARLEY_BACKEND_CONNECT_TIMEOUT_MS";
        const DEFAULT: Option<Duration> = Some(Duration::from_millis(3000));
        const DESCRIPTION: &'static str = "Connect deadline for the backend in milliseconds";

        fn parse(value: &str) -> EnvResult<Duration> {
            parse_millis(value, Self::NAME, 10, 60_000)
        }
    }

    /// 单次调用超时
    pub struct RequestTimeout;
    impl EnvVar<Duration> for RequestTimeout {
        const NAME: &'static str = "PARLEY_BACKEND_REQUEST_TIMEOUT_MS";
        const DEFAULT: Option<Duration> = Some(Duration::from_millis(10_000));
        const DESCRIPTION: &'static str = "Per-call deadline for backend requests in milliseconds";

        fn parse(value: &str) -> EnvResult<Duration> {
            parse_millis(value, Self::NAME, 10, 300_000)
        }
    }

    /// 降级回退开关
    pub struct FallbackEnabled;
    impl EnvVar<bool> for FallbackEnabled {
        const NAME: &'static str = "PARLEY_BACKEND_FALLBACK_ENABLED";
        const DEFAULT: Option<bool> = Some(true);
        const DESCRIPTION: &'static str = "Use the local approximation when the backend is unreachable";

        fn parse(value: &str) -> EnvResult<bool> {
            parse_bool(value, Self::NAME)
        }
    }
}

/// 调度器相关环境变量
pub mod scheduler {
    use super::*;

    /// 批次大小（任务数）
    pub struct BatchSize;
    impl EnvVar<usize> for BatchSize {
        const NAME: &'static str = "PARLEY_BATCH_SIZE";
        const DEFAULT: Option<usize> = Some(16);
        const DESCRIPTION: &'static str = "Number of queued tasks that triggers a batch dispatch";

        fn parse(value: &str) -> EnvResult<usize> {
            parse_positive_usize(value, Self::NAME, 1, 1000)
        }
    }

    /// 批次超时
    pub struct BatchTimeout;
    impl EnvVar<Duration> for BatchTimeout {
        const NAME: &'static str = "PARLEY_BATCH_TIMEOUT_MS";
        const DEFAULT: Option<Duration> = Some(Duration::from_millis(250));
        const DESCRIPTION: &'static str = "Maximum time a queued task waits for its batch to fill";

        fn parse(value: &str) -> EnvResult<Duration> {
            parse_millis(value, Self::NAME, 1, 60_000)
        }
    }

    /// 最大排队任务数
    pub struct MaxPendingTasks;
    impl EnvVar<usize> for MaxPendingTasks {
        const NAME: &'static str = "PARLEY_MAX_PENDING_TASKS";
        const DEFAULT: Option<usize> = Some(10_000);
        const DESCRIPTION: &'static str = "Queue capacity before LOW priority tasks are dropped";

        fn parse(value: &str) -> EnvResult<usize> {
            parse_positive_usize(value, Self::NAME, 1, 1_000_000)
        }
    }

    /// 最大重试次数
    pub struct MaxRetries;
    impl EnvVar<usize> for MaxRetries {
        const NAME: &'static str = "PARLEY_MAX_RETRIES";
        const DEFAULT: Option<usize> = Some(3);
        const DESCRIPTION: &'static str = "Maximum backend attempts per translation task";

        fn parse(value: &str) -> EnvResult<usize> {
            parse_positive_usize(value, Self::NAME, 1, 20)
        }
    }

    /// 重试基础退避
    pub struct RetryBackoff;
    impl EnvVar<Duration> for RetryBackoff {
        const NAME: &'static str = "PARLEY_RETRY_BACKOFF_MS";
        const DEFAULT: Option<Duration> = Some(Duration::from_millis(500));
        const DESCRIPTION: &'static str = "Base retry delay; doubled on each further attempt";

        fn parse(value: &str) -> EnvResult<Duration> {
            parse_millis(value, Self::NAME, 1, 60_000)
        }
    }

    /// 最大并发翻译数
    pub struct MaxConcurrency;
    impl EnvVar<usize> for MaxConcurrency {
        const NAME: &'static str = "PARLEY_MAX_CONCURRENCY";
        const DEFAULT: Option<usize> = Some(6);
        const DESCRIPTION: &'static str = "Maximum concurrent backend translations";

        fn parse(value: &str) -> EnvResult<usize> {
            parse_positive_usize(value, Self::NAME, 1, 100)
        }
    }
}

/// 缓存相关环境变量
pub mod cache {
    use super::*;

    /// 内存缓存容量
    pub struct MemoryCapacity;
    impl EnvVar<usize> for MemoryCapacity {
        const NAME: &'static str = "PARLEY_CACHE_MEMORY_CAPACITY";
        const DEFAULT: Option<usize> = Some(1000);
        const DESCRIPTION: &'static str = "In-process cache size (number of entries)";

        fn parse(value: &str) -> EnvResult<usize> {
            parse_positive_usize(value, Self::NAME, 10, 1_000_000)
        }
    }

    /// 内存缓存TTL
    pub struct MemoryTtl;
    impl EnvVar<Duration> for MemoryTtl {
        const NAME: &'static str = "PARLEY_CACHE_MEMORY_TTL";
        const DEFAULT: Option<Duration> = Some(Duration::from_secs(3600));
        const DESCRIPTION: &'static str = "In-process cache TTL in seconds";

        fn parse(value: &str) -> EnvResult<Duration> {
            parse_secs(value, Self::NAME, 60, 86400 * 7)
        }
    }

    /// 设备级持久缓存路径
    pub struct DeviceStorePath;
    impl EnvVar<PathBuf> for DeviceStorePath {
        const NAME: &'static str = "PARLEY_CACHE_DEVICE_PATH";
        const DEFAULT: Option<PathBuf> = None;
        const DESCRIPTION: &'static str = "Path of the per-device durable cache (tier 1)";

        fn parse(value: &str) -> EnvResult<PathBuf> {
            parse_path(value, Self::NAME)
        }
    }

    /// 共享持久缓存路径
    pub struct SharedStorePath;
    impl EnvVar<PathBuf> for SharedStorePath {
        const NAME: &'static str = "PARLEY_CACHE_SHARED_PATH";
        const DEFAULT: Option<PathBuf> = None;
        const DESCRIPTION: &'static str = "Path of the large durable cache (tier 2)";

        fn parse(value: &str) -> EnvResult<PathBuf> {
            parse_path(value, Self::NAME)
        }
    }

    /// 共享持久缓存最大存活时间
    pub struct SharedMaxAge;
    impl EnvVar<Duration> for SharedMaxAge {
        const NAME: &'static str = "PARLEY_CACHE_SHARED_MAX_AGE";
        const DEFAULT: Option<Duration> = Some(Duration::from_secs(86400 * 30));
        const DESCRIPTION: &'static str = "Age in seconds after which tier 2 entries are purged";

        fn parse(value: &str) -> EnvResult<Duration> {
            parse_secs(value, Self::NAME, 60, 86400 * 365)
        }
    }
}

/// 辅助函数
fn parse_bool(value: &str, var_name: &str) -> EnvResult<bool> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" | "enabled" => Ok(true),
        "false" | "0" | "no" | "off" | "disabled" => Ok(false),
        _ => Err(EnvError {
            variable: var_name.to_string(),
            message: format!(
                "Invalid boolean value '{}'. Use: true/false, 1/0, yes/no, on/off, enabled/disabled",
                value
            ),
        }),
    }
}

fn parse_positive_usize(value: &str, var_name: &str, min: usize, max: usize) -> EnvResult<usize> {
    let num: usize = value.trim().parse().map_err(|_| EnvError {
        variable: var_name.to_string(),
        message: "Must be a valid positive number".to_string(),
    })?;

    if num < min {
        return Err(EnvError {
            variable: var_name.to_string(),
            message: format!("Value {} is below minimum {}", num, min),
        });
    }

    if num > max {
        return Err(EnvError {
            variable: var_name.to_string(),
            message: format!("Value {} exceeds maximum {}", num, max),
        });
    }

    Ok(num)
}

fn parse_millis(value: &str, var_name: &str, min: u64, max: u64) -> EnvResult<Duration> {
    parse_positive_usize(value, var_name, min as usize, max as usize)
        .map(|ms| Duration::from_millis(ms as u64))
}

fn parse_secs(value: &str, var_name: &str, min: u64, max: u64) -> EnvResult<Duration> {
    let seconds: u64 = value.trim().parse().map_err(|_| EnvError {
        variable: var_name.to_string(),
        message: "Must be a valid number of seconds".to_string(),
    })?;

    if seconds < min {
        return Err(EnvError {
            variable: var_name.to_string(),
            message: format!("Duration too short (minimum {} seconds)", min),
        });
    }

    if seconds > max {
        return Err(EnvError {
            variable: var_name.to_string(),
            message: format!("Duration too long (maximum {} seconds)", max),
        });
    }

    Ok(Duration::from_secs(seconds))
}

fn parse_path(value: &str, var_name: &str) -> EnvResult<PathBuf> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(EnvError {
            variable: var_name.to_string(),
            message: "Path must not be empty".to_string(),
        });
    }
    Ok(PathBuf::from(shellexpand::tilde(trimmed).as_ref()))
}

/// 环境变量文档生成器
pub fn generate_env_docs() -> String {
    let mut docs = String::new();
    docs.push_str("# Environment Variables\n\n");

    let mut line = |name: &str, description: &str| {
        docs.push_str(&format!("- `{}`: {}\n", name, description));
    };

    line(core::LogLevel::NAME, core::LogLevel::DESCRIPTION);
    line(core::ConfigPath::NAME, core::ConfigPath::DESCRIPTION);
    line(backend::ApiUrl::NAME, backend::ApiUrl::DESCRIPTION);
    line(backend::ConnectTimeout::NAME, backend::ConnectTimeout::DESCRIPTION);
    line(backend::RequestTimeout::NAME, backend::RequestTimeout::DESCRIPTION);
    line(backend::FallbackEnabled::NAME, backend::FallbackEnabled::DESCRIPTION);
    line(scheduler::BatchSize::NAME, scheduler::BatchSize::DESCRIPTION);
    line(scheduler::BatchTimeout::NAME, scheduler::BatchTimeout::DESCRIPTION);
    line(scheduler::MaxPendingTasks::NAME, scheduler::MaxPendingTasks::DESCRIPTION);
    line(scheduler::MaxRetries::NAME, scheduler::MaxRetries::DESCRIPTION);
    line(scheduler::RetryBackoff::NAME, scheduler::RetryBackoff::DESCRIPTION);
    line(scheduler::MaxConcurrency::NAME, scheduler::MaxConcurrency::DESCRIPTION);
    line(cache::MemoryCapacity::NAME, cache::MemoryCapacity::DESCRIPTION);
    line(cache::MemoryTtl::NAME, cache::MemoryTtl::DESCRIPTION);
    line(cache::DeviceStorePath::NAME, cache::DeviceStorePath::DESCRIPTION);
    line(cache::SharedStorePath::NAME, cache::SharedStorePath::DESCRIPTION);
    line(cache::SharedMaxAge::NAME, cache::SharedMaxAge::DESCRIPTION);

    docs
}
