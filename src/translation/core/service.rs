//! 翻译编排服务
//!
//! 本模块提供统一的服务入口，持有调度器句柄、分层缓存、投递扇出和后端适配器。
//! 没有全局单例：调用方持有 `TranslationService` 实例并显式传递。
//!
//! ## 主要组件
//!
//! - `TranslationService`: 对外接口，负责校验、源语言检测、优先级推导和任务创建
//! - `TranslationTicket`: 单个 (消息, 目标语言) 的结果凭据
//! - `ServiceStats`: 线程安全的统计信息收集器
//! - `HealthStatus`: 服务健康状态监控
//!
//! ## 使用示例
//!
//! ```rust,no_run
//! use parley::translation::{
//!     IncomingMessage, MessageContext, OrchestratorConfig, ParticipantLanguagePreference,
//!     TranslationService,
//! };
//!
//! # async fn demo() -> parley::translation::TranslationResult<()> {
//! let service = TranslationService::from_config(OrchestratorConfig::default())?;
//!
//! let roster = vec![
//!     ParticipantLanguagePreference::new("alice", "en"),
//!     ParticipantLanguagePreference::new("bruno", "fr"),
//! ];
//! let message = IncomingMessage::new("m1", "c1", "alice", "Hello world");
//! let report = service.submit_message(message, &roster, MessageContext::live()).await?;
//!
//! for ticket in report.tickets {
//!     let outcome = ticket.wait().await?;
//!     println!("{:?}", outcome);
//! }
//! service.shutdown().await?;
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;

use super::backend::{
    BackendAdapter, BackendStatsSnapshot, BackendTranslation, DetectedLanguage, HttpBackend,
    TranslationBackend,
};
use super::scheduler::{spawn_scheduler, SchedulerHandle, SchedulerStatus, TaskRequest};
use crate::translation::config::{ConfigManager, OrchestratorConfig};
use crate::translation::delivery::{
    plan_message, DeliveryEvent, DeliveryFanout, FanoutHandle, MessageState, ParticipantView,
};
use crate::translation::error::{ErrorStats, TranslationError, TranslationResult};
use crate::translation::model::{
    normalize_language, Complexity, IncomingMessage, LedgerKey, MessageContext,
    ParticipantLanguagePreference, TaskOutcome, TaskPriority, TaskStatus, TranslationTask,
};
use crate::translation::pipeline::estimator;
use crate::translation::storage::{CacheStats, HierarchicalCache};

// ============================================================================
// 请求与凭据
// ============================================================================

/// 单个 (消息, 目标语言) 的直接翻译请求
#[derive(Debug, Clone)]
pub struct TranslationRequest {
    pub message_id: String,
    pub conversation_id: String,
    pub content: String,
    /// 缺省时自动检测
    pub source_language: Option<String>,
    pub target_language: String,
    pub priority: TaskPriority,
    pub requesting_user_id: Option<String>,
}

impl TranslationRequest {
    pub fn new(message_id: &str, conversation_id: &str, content: &str, target_language: &str) -> Self {
        Self {
            message_id: message_id.to_string(),
            conversation_id: conversation_id.to_string(),
            content: content.to_string(),
            source_language: None,
            target_language: target_language.to_string(),
            priority: TaskPriority::Normal,
            requesting_user_id: None,
        }
    }

    pub fn with_source_language(mut self, language: &str) -> Self {
        self.source_language = Some(language.to_string());
        self
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn requested_by(mut self, user_id: &str) -> Self {
        self.requesting_user_id = Some(user_id.to_string());
        self
    }
}

/// 翻译结果凭据
#[derive(Debug)]
pub struct TranslationTicket {
    pub key: LedgerKey,
    receiver: oneshot::Receiver<TaskOutcome>,
}

impl TranslationTicket {
    fn new(key: LedgerKey) -> (Self, oneshot::Sender<TaskOutcome>) {
        let (sender, receiver) = oneshot::channel();
        (Self { key, receiver }, sender)
    }

    /// 等待最终结果
    pub async fn wait(self) -> TranslationResult<TaskOutcome> {
        let key = self.key;
        self.receiver.await.map_err(|_| {
            TranslationError::ChannelClosed(format!("{} 的结果通道已关闭", key))
        })
    }

    /// 带超时等待
    pub async fn wait_timeout(self, timeout: Duration) -> TranslationResult<TaskOutcome> {
        tokio::time::timeout(timeout, self.wait()).await?
    }
}

/// 消息提交结果
#[derive(Debug)]
pub struct SubmissionReport {
    pub message_id: String,
    pub source_language: String,
    pub priority: TaskPriority,
    pub complexity: Complexity,
    pub estimated_time_ms: u64,
    pub original_viewers: Vec<String>,
    /// 因语言不受支持而跳过的目标语言
    pub skipped_languages: Vec<String>,
    /// 每个目标语言一张凭据
    pub tickets: Vec<TranslationTicket>,
}

impl SubmissionReport {
    pub fn target_languages(&self) -> Vec<&str> {
        self.tickets
            .iter()
            .map(|ticket| ticket.key.target_language.as_str())
            .collect()
    }
}

// ============================================================================
// 服务
// ============================================================================

/// 翻译编排服务
///
/// 所有可变状态由调度器actor独占，服务本身只持有句柄和共享只读视图，
/// 可以放进 `Arc` 在多个任务间共享。
pub struct TranslationService {
    /// 编排配置
    config: OrchestratorConfig,

    /// 后端适配器，带超时、统计与降级
    adapter: Arc<BackendAdapter>,

    /// 分层缓存
    cache: Arc<HierarchicalCache>,

    /// 调度器句柄
    scheduler: SchedulerHandle,

    /// 投递视图与事件订阅
    fanout: FanoutHandle,

    /// 服务统计信息
    stats: Arc<ServiceStats>,

    /// 任务ID生成器
    next_task_id: AtomicU64,

    /// 调度器任务句柄，停机时等待其结束
    actor: Mutex<Option<JoinHandle<()>>>,
}

impl TranslationService {
    /// 创建服务实例
    ///
    /// 校验配置、打开分层缓存并启动调度器。必须在 Tokio 运行时中调用。
    ///
    /// # 错误
    ///
    /// - 配置校验失败
    /// - 持久缓存无法打开
    pub fn new(
        config: OrchestratorConfig,
        backend: Arc<dyn TranslationBackend>,
    ) -> TranslationResult<Self> {
        config.validate()?;

        let cache = Arc::new(HierarchicalCache::open(&config.cache)?);
        let adapter = Arc::new(BackendAdapter::from_config(backend, &config.backend));
        let fanout = DeliveryFanout::new(config.scheduler.event_channel_capacity);
        let fanout_handle = fanout.handle();
        let stats = Arc::new(ServiceStats::default());

        let (scheduler, actor) = spawn_scheduler(
            config.scheduler.clone(),
            Arc::clone(&adapter),
            Arc::clone(&cache),
            fanout,
            Arc::clone(&stats),
        );

        tracing::info!(
            backend = adapter.backend_name(),
            durable_cache = cache.has_durable_tiers(),
            languages = config.supported_languages.len(),
            "翻译编排服务已启动"
        );

        Ok(Self {
            config,
            adapter,
            cache,
            scheduler,
            fanout: fanout_handle,
            stats,
            next_task_id: AtomicU64::new(1),
            actor: Mutex::new(Some(actor)),
        })
    }

    /// 使用 HTTP 后端创建服务
    pub fn from_config(config: OrchestratorConfig) -> TranslationResult<Self> {
        let backend = Arc::new(HttpBackend::new(&config.backend)?);
        Self::new(config, backend)
    }

    /// 从默认配置文件与环境变量创建服务
    pub fn create_default() -> TranslationResult<Self> {
        let config = ConfigManager::new()?.into_config();
        Self::from_config(config)
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    // ------------------------------------------------------------------------
    // 提交
    // ------------------------------------------------------------------------

    /// 提交一条新消息
    ///
    /// 校验内容与语言、检测缺省的源语言、按上下文推导优先级、估算成本，
    /// 为每个需要的目标语言创建一个任务并交给调度器。
    pub async fn submit_message(
        &self,
        message: IncomingMessage,
        roster: &[ParticipantLanguagePreference],
        context: MessageContext,
    ) -> TranslationResult<SubmissionReport> {
        if message.content.trim().is_empty() {
            return Err(TranslationError::Validation(format!(
                "消息 {} 内容为空",
                message.message_id
            )));
        }

        let source_language = self
            .resolve_source(&message.content, message.source_language.as_deref())
            .await?;

        let mut plan = plan_message(&message, &source_language, roster);
        let skipped_languages =
            plan.retain_targets(|language| self.config.is_supported_language(language));
        if !skipped_languages.is_empty() {
            tracing::warn!(
                message_id = %message.message_id,
                skipped = ?skipped_languages,
                "跳过不支持的目标语言"
            );
        }

        let priority = TaskPriority::from_context(&context);
        let estimate = estimator::estimate(&message.content);

        let mut tickets = Vec::with_capacity(plan.targets.len());
        let mut requests = Vec::with_capacity(plan.targets.len());
        for target in &plan.targets {
            let task = TranslationTask {
                id: self.next_task_id.fetch_add(1, Ordering::Relaxed),
                message_id: message.message_id.clone(),
                conversation_id: message.conversation_id.clone(),
                content: message.content.clone(),
                source_language: source_language.clone(),
                target_language: target.clone(),
                priority,
                complexity: estimate.complexity,
                estimated_time_ms: estimate.estimated_time_ms,
                retry_count: 0,
                max_retries: self.config.scheduler.max_retries,
                created_at: message.created_at,
                requesting_user_id: None,
                is_last_message: context.is_last_message,
                status: TaskStatus::Pending,
            };
            let (ticket, waiter) = TranslationTicket::new(task.ledger_key());
            tickets.push(ticket);
            requests.push(TaskRequest {
                task,
                waiter: Some(waiter),
            });
        }

        let original_viewers = plan.original_viewers.clone();
        let task_count = requests.len();
        self.scheduler.submit(plan, requests).await?;
        self.stats.messages_submitted.fetch_add(1, Ordering::Relaxed);

        tracing::info!(
            message_id = %message.message_id,
            source = %source_language,
            tasks = task_count,
            priority = priority.as_str(),
            complexity = ?estimate.complexity,
            "消息已提交"
        );

        Ok(SubmissionReport {
            message_id: message.message_id,
            source_language,
            priority,
            complexity: estimate.complexity,
            estimated_time_ms: estimate.estimated_time_ms,
            original_viewers,
            skipped_languages,
            tickets,
        })
    }

    /// 请求单个 (消息, 目标语言) 的翻译
    ///
    /// 与正在进行的相同请求合并；已完成的请求直接返回账本中的结果。
    pub async fn request_translation(
        &self,
        request: TranslationRequest,
    ) -> TranslationResult<TranslationTicket> {
        if request.content.trim().is_empty() {
            return Err(TranslationError::Validation(format!(
                "消息 {} 内容为空",
                request.message_id
            )));
        }

        let target_language = self.require_supported(&request.target_language)?;
        let source_language = self
            .resolve_source(&request.content, request.source_language.as_deref())
            .await?;
        if source_language == target_language {
            return Err(TranslationError::Validation(format!(
                "源语言与目标语言相同: {}",
                target_language
            )));
        }

        let estimate = estimator::estimate(&request.content);
        let task = TranslationTask {
            id: self.next_task_id.fetch_add(1, Ordering::Relaxed),
            message_id: request.message_id,
            conversation_id: request.conversation_id,
            content: request.content,
            source_language,
            target_language,
            priority: request.priority,
            complexity: estimate.complexity,
            estimated_time_ms: estimate.estimated_time_ms,
            retry_count: 0,
            max_retries: self.config.scheduler.max_retries,
            created_at: chrono::Utc::now(),
            requesting_user_id: request.requesting_user_id,
            is_last_message: false,
            status: TaskStatus::Pending,
        };

        let (ticket, waiter) = TranslationTicket::new(task.ledger_key());
        self.scheduler
            .request(TaskRequest {
                task,
                waiter: Some(waiter),
            })
            .await?;
        self.stats.direct_requests.fetch_add(1, Ordering::Relaxed);
        Ok(ticket)
    }

    /// 不经调度器直接翻译，后端不可达时返回降级结果
    pub async fn translate_direct(
        &self,
        text: &str,
        source: &str,
        target: &str,
    ) -> TranslationResult<BackendTranslation> {
        let source = self.require_supported(source)?;
        let target = self.require_supported(target)?;
        self.adapter.translate_or_fallback(text, &source, &target).await
    }

    /// 语言检测，后端失败时使用本地检测
    pub async fn detect_language(&self, text: &str) -> DetectedLanguage {
        self.adapter.detect_language(text).await
    }

    async fn resolve_source(&self, content: &str, declared: Option<&str>) -> TranslationResult<String> {
        match declared {
            Some(language) => self.require_supported(language),
            None => {
                let detected = self.adapter.detect_language(content).await;
                self.stats.languages_detected.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    language = %detected.language,
                    confidence = detected.confidence,
                    "自动检测源语言"
                );
                self.require_supported(&detected.language)
            }
        }
    }

    fn require_supported(&self, language: &str) -> TranslationResult<String> {
        let normalized = normalize_language(language);
        if self.config.is_supported_language(&normalized) {
            Ok(normalized)
        } else {
            Err(TranslationError::Validation(format!(
                "不支持的语言代码: {}",
                language
            )))
        }
    }

    // ------------------------------------------------------------------------
    // 取消与关闭
    // ------------------------------------------------------------------------

    /// 关闭会话：取消其排队中的非关键任务，之后完成的结果只写缓存不再投递
    pub async fn close_conversation(&self, conversation_id: &str) -> TranslationResult<usize> {
        self.scheduler.close_conversation(conversation_id).await
    }

    /// 取消一个尚未派发的 (消息, 目标语言)
    pub async fn cancel(&self, message_id: &str, target_language: &str) -> TranslationResult<bool> {
        self.scheduler
            .cancel(LedgerKey::new(message_id, target_language))
            .await
    }

    /// 停机：停止调度器、关闭工作池并刷新缓存写线程
    pub async fn shutdown(&self) -> TranslationResult<()> {
        match self.scheduler.shutdown().await {
            Ok(()) | Err(TranslationError::ChannelClosed(_)) => {}
            Err(error) => return Err(error),
        }

        let actor = self
            .actor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(actor) = actor {
            if let Err(error) = actor.await {
                tracing::error!("调度器任务异常结束: {}", error);
            }
        }

        self.cache.close().await?;
        tracing::info!("翻译编排服务已停止");
        Ok(())
    }

    // ------------------------------------------------------------------------
    // 查询
    // ------------------------------------------------------------------------

    pub fn subscribe(&self) -> broadcast::Receiver<DeliveryEvent> {
        self.fanout.subscribe()
    }

    pub fn view(&self, participant_id: &str, message_id: &str) -> Option<ParticipantView> {
        self.fanout.view(participant_id, message_id)
    }

    pub fn message_state(&self, message_id: &str) -> Option<MessageState> {
        self.fanout.message_state(message_id)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn backend_stats(&self) -> BackendStatsSnapshot {
        self.adapter.stats()
    }

    pub async fn scheduler_status(&self) -> TranslationResult<SchedulerStatus> {
        self.scheduler.status().await
    }

    pub fn cache(&self) -> &Arc<HierarchicalCache> {
        &self.cache
    }

    /// 获取统计信息快照
    pub fn get_stats(&self) -> ServiceStatsSnapshot {
        self.stats.snapshot()
    }

    /// 获取服务健康状态
    ///
    /// - `backend`: 后端可达为健康；不可达但启用降级为降级；否则不健康
    /// - `cache`: 有持久层写入失败为降级
    /// - `scheduler`: 调度器已停止为不健康；发生过溢出丢弃为降级
    pub fn get_health(&self) -> HealthStatus {
        let mut components = HashMap::new();

        let backend = if self.adapter.is_reachable() {
            HealthLevel::Healthy
        } else if self.config.backend.fallback_enabled {
            HealthLevel::Degraded
        } else {
            HealthLevel::Unhealthy
        };
        components.insert("backend".to_string(), backend);

        let cache = if self.cache.stats().write_errors > 0 {
            HealthLevel::Degraded
        } else {
            HealthLevel::Healthy
        };
        components.insert("cache".to_string(), cache);

        let scheduler = if self.scheduler.is_closed() {
            HealthLevel::Unhealthy
        } else if self.stats.tasks_dropped.load(Ordering::Relaxed) > 0 {
            HealthLevel::Degraded
        } else {
            HealthLevel::Healthy
        };
        components.insert("scheduler".to_string(), scheduler);

        HealthStatus::from_components(components)
    }
}

// ============================================================================
// 统计
// ============================================================================

/// 服务统计信息（线程安全版本）
///
/// 调度器actor和服务入口共同更新，所有计数器都是原子类型。
#[derive(Debug, Default)]
pub struct ServiceStats {
    /// 提交的消息数
    pub messages_submitted: AtomicU64,

    /// 直接翻译请求数
    pub direct_requests: AtomicU64,

    /// 自动检测源语言次数
    pub languages_detected: AtomicU64,

    /// 新建任务数（账本中新建条目）
    pub tasks_created: AtomicU64,

    /// 合并到进行中请求的次数
    pub tasks_coalesced: AtomicU64,

    /// 账本中已有结果直接返回的次数
    pub ledger_hits: AtomicU64,

    pub tasks_completed: AtomicU64,
    pub tasks_failed: AtomicU64,
    pub tasks_retried: AtomicU64,
    pub tasks_cancelled: AtomicU64,

    /// 因溢出被丢弃或拒绝的任务数
    pub tasks_dropped: AtomicU64,

    pub batches_dispatched: AtomicU64,
    pub critical_dispatches: AtomicU64,

    /// 由缓存完成的任务数
    pub cache_hits: AtomicU64,

    /// 发出的投递事件数
    pub deliveries: AtomicU64,

    /// 总处理时间（微秒）
    pub processing_time: AtomicU64,

    pub total_chars_processed: AtomicU64,

    errors: Mutex<ErrorStats>,
}

impl ServiceStats {
    pub fn add_processing_time(&self, duration: Duration) {
        self.processing_time
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn add_chars_processed(&self, count: usize) {
        self.total_chars_processed
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn add_deliveries(&self, count: usize) {
        self.deliveries.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_error(&self, error: &TranslationError) {
        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record_error(error);
    }

    pub fn error_stats(&self) -> ErrorStats {
        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// 获取统计数据快照
    pub fn snapshot(&self) -> ServiceStatsSnapshot {
        let errors = self.error_stats();
        ServiceStatsSnapshot {
            messages_submitted: self.messages_submitted.load(Ordering::Relaxed),
            direct_requests: self.direct_requests.load(Ordering::Relaxed),
            languages_detected: self.languages_detected.load(Ordering::Relaxed),
            tasks_created: self.tasks_created.load(Ordering::Relaxed),
            tasks_coalesced: self.tasks_coalesced.load(Ordering::Relaxed),
            ledger_hits: self.ledger_hits.load(Ordering::Relaxed),
            tasks_completed: self.tasks_completed.load(Ordering::Relaxed),
            tasks_failed: self.tasks_failed.load(Ordering::Relaxed),
            tasks_retried: self.tasks_retried.load(Ordering::Relaxed),
            tasks_cancelled: self.tasks_cancelled.load(Ordering::Relaxed),
            tasks_dropped: self.tasks_dropped.load(Ordering::Relaxed),
            batches_dispatched: self.batches_dispatched.load(Ordering::Relaxed),
            critical_dispatches: self.critical_dispatches.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            deliveries: self.deliveries.load(Ordering::Relaxed),
            processing_time: Duration::from_micros(self.processing_time.load(Ordering::Relaxed)),
            total_chars_processed: self.total_chars_processed.load(Ordering::Relaxed),
            errors_encountered: errors.total_errors,
        }
    }
}

/// 统计数据的不可变快照
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ServiceStatsSnapshot {
    pub messages_submitted: u64,
    pub direct_requests: u64,
    pub languages_detected: u64,
    pub tasks_created: u64,
    pub tasks_coalesced: u64,
    pub ledger_hits: u64,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub tasks_retried: u64,
    pub tasks_cancelled: u64,
    pub tasks_dropped: u64,
    pub batches_dispatched: u64,
    pub critical_dispatches: u64,
    pub cache_hits: u64,
    pub deliveries: u64,
    pub processing_time: Duration,
    pub total_chars_processed: u64,
    pub errors_encountered: usize,
}

impl ServiceStatsSnapshot {
    /// 完成任务的平均处理时间
    pub fn average_processing_time(&self) -> Duration {
        if self.tasks_completed == 0 {
            Duration::ZERO
        } else {
            self.processing_time / self.tasks_completed as u32
        }
    }
}

// ============================================================================
// 健康状态
// ============================================================================

/// 服务健康状态报告
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    /// 整体健康级别
    pub overall: HealthLevel,

    /// 各组件的健康状态，键是组件名称（如 "backend"、"cache"）
    pub components: HashMap<String, HealthLevel>,
}

impl HealthStatus {
    /// 根据各组件状态确定整体状态
    pub fn from_components(components: HashMap<String, HealthLevel>) -> Self {
        let overall = if components
            .values()
            .all(|&level| level == HealthLevel::Healthy)
        {
            HealthLevel::Healthy
        } else if components
            .values()
            .any(|&level| level == HealthLevel::Unhealthy)
        {
            // 任何组件不健康都会导致整体不健康
            HealthLevel::Unhealthy
        } else {
            HealthLevel::Degraded
        };

        Self {
            overall,
            components,
        }
    }
}

/// 健康状态级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthLevel {
    /// 组件运行正常
    Healthy,

    /// 组件功能受限但仍可用
    Degraded,

    /// 组件无法正常工作
    Unhealthy,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overall_health_from_components() {
        let mut components = HashMap::new();
        components.insert("backend".to_string(), HealthLevel::Healthy);
        components.insert("cache".to_string(), HealthLevel::Healthy);
        assert_eq!(
            HealthStatus::from_components(components.clone()).overall,
            HealthLevel::Healthy
        );

        components.insert("cache".to_string(), HealthLevel::Degraded);
        assert_eq!(
            HealthStatus::from_components(components.clone()).overall,
            HealthLevel::Degraded
        );

        components.insert("backend".to_string(), HealthLevel::Unhealthy);
        assert_eq!(
            HealthStatus::from_components(components).overall,
            HealthLevel::Unhealthy
        );
    }

    #[test]
    fn test_stats_snapshot() {
        let stats = ServiceStats::default();
        stats.tasks_completed.fetch_add(2, Ordering::Relaxed);
        stats.add_processing_time(Duration::from_millis(30));
        stats.add_deliveries(3);
        stats.record_error(&TranslationError::Network("down".to_string()));

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.tasks_completed, 2);
        assert_eq!(snapshot.deliveries, 3);
        assert_eq!(snapshot.errors_encountered, 1);
        assert_eq!(snapshot.average_processing_time(), Duration::from_millis(15));
    }

    #[tokio::test]
    async fn test_ticket_reports_closed_channel() {
        let (ticket, waiter) = TranslationTicket::new(LedgerKey::new("m1", "fr"));
        drop(waiter);
        let result = ticket.wait().await;
        assert!(matches!(result, Err(TranslationError::ChannelClosed(_))));
    }
}
