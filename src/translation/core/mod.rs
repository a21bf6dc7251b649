//! 编排核心模块
//!
//! ## 架构设计
//!
//! - **服务层** (`service.rs`): 对外接口，校验输入、检测语言、创建任务
//! - **调度层** (`scheduler.rs`): 单写者actor，独占车道、账本和消息状态
//! - **后端层** (`backend.rs`, `fallback.rs`): 翻译后端、超时与降级
//!
//! ## 模块依赖关系
//!
//! ```text
//! TranslationService (service.rs)
//!     └── Scheduler actor (scheduler.rs)
//!             ├── PriorityLanes (pipeline/queue.rs)
//!             ├── Ledger (pipeline/ledger.rs)
//!             ├── DeliveryFanout (delivery.rs)
//!             └── BatchDispatcher (pipeline/batch.rs)
//!                     ├── HierarchicalCache (storage/cache.rs)
//!                     └── BackendAdapter (backend.rs)
//!                             └── LocalApproximation (fallback.rs)
//! ```

pub mod backend;
pub mod fallback;
pub mod scheduler;
pub mod service;

pub use backend::{
    BackendAdapter, BackendStats, BackendStatsSnapshot, BackendTranslation, DetectedLanguage,
    HttpBackend, TranslationBackend,
};
pub use fallback::LocalApproximation;
pub use scheduler::{SchedulerHandle, SchedulerStatus};
pub use service::{
    HealthLevel, HealthStatus, ServiceStats, ServiceStatsSnapshot, SubmissionReport,
    TranslationRequest, TranslationService, TranslationTicket,
};
