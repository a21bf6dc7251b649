//! # Parley Library
//!
//! 多语言聊天平台的翻译编排与分层缓存管道。
//!
//! ## 模块组织
//!
//! - `translation` - 编排服务、调度器、批次派发、分层缓存和投递扇出
//! - `env` - `PARLEY_*` 环境变量的类型化访问

pub mod env;
pub mod translation;

// Re-export commonly used items for convenience
pub use translation::{
    DeliveryEvent, IncomingMessage, MessageContext, OrchestratorConfig,
    ParticipantLanguagePreference, TranslationError, TranslationResult, TranslationService,
};

use crate::env::EnvVar;
use tracing_subscriber::{fmt, EnvFilter};

/// 初始化日志
///
/// 过滤规则优先取 `RUST_LOG`，其次 `PARLEY_LOG_LEVEL`。重复调用是安全的。
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = crate::env::core::LogLevel::get_or_default("info".to_string());
        EnvFilter::new(format!("parley={}", level))
    });

    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}
