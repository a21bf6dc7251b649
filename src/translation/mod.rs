//! 翻译编排模块
//!
//! 多语言聊天的翻译编排与分层缓存管道，采用清晰的模块化架构：
//! - **core**: 编排服务、调度器actor和翻译后端
//! - **pipeline**: 成本估算、优先级车道、幂等账本和批次派发
//! - **storage**: 分层缓存（内存 LRU + redb 持久层）
//! - **delivery**: 投递扇出、参与者视图和消息状态机
//! - **model**: 任务、消息和结果的数据模型
//! - **config**: 配置管理
//! - **error**: 错误处理
//!
//! # 基本用法
//!
//! ```rust,no_run
//! use parley::translation::{
//!     IncomingMessage, MessageContext, OrchestratorConfig, ParticipantLanguagePreference,
//!     TranslationService,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let service = TranslationService::from_config(OrchestratorConfig::default())?;
//! let mut events = service.subscribe();
//!
//! let roster = vec![
//!     ParticipantLanguagePreference::new("alice", "en"),
//!     ParticipantLanguagePreference::new("bruno", "fr"),
//! ];
//! let message = IncomingMessage::new("m1", "c1", "alice", "Hello world").with_source_language("en");
//! service.submit_message(message, &roster, MessageContext::live()).await?;
//!
//! let event = events.recv().await?;
//! println!("{} <- {}", event.participant_id, event.translated_content);
//! # Ok(())
//! # }
//! ```

// ============================================================================
// 子模块声明
// ============================================================================

/// 配置管理模块 - 后端、调度器和缓存配置
pub mod config;

/// 核心模块 - 编排服务、调度器和翻译后端
pub mod core;

/// 投递扇出模块 - 把译文送到需要的参与者
pub mod delivery;

/// 错误处理模块 - 统一的错误类型和处理机制
pub mod error;

/// 数据模型模块
pub mod model;

/// 处理管道模块 - 估算、排队、去重和批次派发
pub mod pipeline;

/// 存储管理模块 - 分层缓存
pub mod storage;

// ============================================================================
// 核心API导出 - 主要的公共接口
// ============================================================================

/// 编排服务的主要组件
pub use core::{
    BackendAdapter, BackendTranslation, DetectedLanguage, HealthLevel, HealthStatus, HttpBackend,
    LocalApproximation, ServiceStats, ServiceStatsSnapshot, SubmissionReport, TranslationBackend,
    TranslationRequest, TranslationService, TranslationTicket,
};

/// 配置管理相关组件
pub use config::{BackendConfig, CacheConfig, ConfigManager, OrchestratorConfig, SchedulerConfig};

/// 错误处理
pub use error::{TranslationError, TranslationResult};

/// 数据模型
pub use model::{
    CompletedTranslation, Complexity, FailedTranslation, IncomingMessage, LedgerKey,
    MessageContext, ModelTier, ParticipantLanguagePreference, TaskOutcome, TaskPriority,
    TaskStatus, TranslationTask,
};

/// 投递
pub use delivery::{DeliveryEvent, MessagePlan, MessageState, ParticipantView};

/// 缓存
pub use storage::{CacheEntry, CacheKey, CacheStats, CacheTier, HierarchicalCache};
