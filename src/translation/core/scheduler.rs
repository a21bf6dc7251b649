//! 调度器actor
//!
//! 单写者任务，独占优先级车道、幂等账本和消息状态机。调用方通过有界命令通道
//! 与它通信，工作单元通过另一条有界通道回报结果。
//!
//! ## 派发
//!
//! 优先级车道是唯一的积压队列。所有派发都经过 `pump()`，每次只出队不超过空闲
//! 工作槽位数的任务，溢出上限因此覆盖全部未开始的任务。
//!
//! - 关键任务只要有空闲槽位就出队，不等批次条件
//! - 其余任务在批次触发后出队：数量达到 `batch_size`，或第一个任务等待超过
//!   `batch_timeout`；触发后持续出队直到车道清空
//! - 工作单元先归还槽位再回报，每条回报之后重新 `pump()`

use std::collections::{HashMap, HashSet};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::backend::BackendAdapter;
use super::service::ServiceStats;
use crate::translation::config::SchedulerConfig;
use crate::translation::delivery::{DeliveryFanout, MessagePlan};
use crate::translation::error::{TranslationError, TranslationResult};
use crate::translation::model::{
    FailedTranslation, LedgerKey, TaskPriority, TaskStatus, TranslationTask,
};
use crate::translation::pipeline::batch::{BatchDispatcher, DispatchStatsSnapshot, WorkerReport};
use crate::translation::pipeline::ledger::{Admission, Ledger, LedgerSnapshot, LedgerStatus, Waiter};
use crate::translation::pipeline::queue::{EnqueueOutcome, PriorityLanes, QueueStatus};
use crate::translation::storage::HierarchicalCache;

/// 账本清理的最长间隔
const MAX_PURGE_INTERVAL: Duration = Duration::from_secs(60);

// ============================================================================
// 命令
// ============================================================================

/// 一个带等待者的翻译请求
pub struct TaskRequest {
    pub task: TranslationTask,
    pub waiter: Option<Waiter>,
}

/// 发往调度器的命令
pub enum SchedulerCommand {
    /// 提交一条消息的全部任务
    Submit {
        plan: MessagePlan,
        requests: Vec<TaskRequest>,
    },
    /// 单独请求一个 (消息, 目标语言)
    Request(TaskRequest),
    CloseConversation {
        conversation_id: String,
        reply: oneshot::Sender<usize>,
    },
    Cancel {
        key: LedgerKey,
        reply: oneshot::Sender<bool>,
    },
    Status {
        reply: oneshot::Sender<SchedulerStatus>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// 调度器状态快照
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub queue: QueueStatus,
    pub ledger: LedgerSnapshot,
    pub dispatch: DispatchStatsSnapshot,
    pub available_workers: usize,
    pub max_concurrency: usize,
    pub closed_conversations: usize,
}

// ============================================================================
// 句柄
// ============================================================================

/// 调度器句柄，可廉价克隆
#[derive(Clone)]
pub struct SchedulerHandle {
    commands: mpsc::Sender<SchedulerCommand>,
}

impl SchedulerHandle {
    async fn send(&self, command: SchedulerCommand) -> TranslationResult<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| TranslationError::ChannelClosed("调度器已停止".to_string()))
    }

    async fn ask<T>(&self, reply: oneshot::Receiver<T>) -> TranslationResult<T> {
        reply
            .await
            .map_err(|_| TranslationError::ChannelClosed("调度器未响应".to_string()))
    }

    pub async fn submit(&self, plan: MessagePlan, requests: Vec<TaskRequest>) -> TranslationResult<()> {
        self.send(SchedulerCommand::Submit { plan, requests }).await
    }

    pub async fn request(&self, request: TaskRequest) -> TranslationResult<()> {
        self.send(SchedulerCommand::Request(request)).await
    }

    pub async fn close_conversation(&self, conversation_id: &str) -> TranslationResult<usize> {
        let (reply, rx) = oneshot::channel();
        self.send(SchedulerCommand::CloseConversation {
            conversation_id: conversation_id.to_string(),
            reply,
        })
        .await?;
        self.ask(rx).await
    }

    pub async fn cancel(&self, key: LedgerKey) -> TranslationResult<bool> {
        let (reply, rx) = oneshot::channel();
        self.send(SchedulerCommand::Cancel { key, reply }).await?;
        self.ask(rx).await
    }

    pub async fn status(&self) -> TranslationResult<SchedulerStatus> {
        let (reply, rx) = oneshot::channel();
        self.send(SchedulerCommand::Status { reply }).await?;
        self.ask(rx).await
    }

    pub async fn shutdown(&self) -> TranslationResult<()> {
        let (reply, rx) = oneshot::channel();
        self.send(SchedulerCommand::Shutdown { reply }).await?;
        self.ask(rx).await
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }
}

/// 启动调度器actor
pub fn spawn_scheduler(
    config: SchedulerConfig,
    adapter: Arc<BackendAdapter>,
    cache: Arc<HierarchicalCache>,
    fanout: DeliveryFanout,
    stats: Arc<ServiceStats>,
) -> (SchedulerHandle, JoinHandle<()>) {
    let (actor, handle) = Scheduler::new(config, adapter, cache, fanout, stats);
    let join = tokio::spawn(actor.run());
    (handle, join)
}

// ============================================================================
// Actor
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

struct Scheduler {
    config: SchedulerConfig,
    lanes: PriorityLanes,
    ledger: Ledger,
    fanout: DeliveryFanout,
    dispatcher: BatchDispatcher,
    stats: Arc<ServiceStats>,
    commands: mpsc::Receiver<SchedulerCommand>,
    reports: mpsc::Receiver<WorkerReport>,
    retry_tx: mpsc::Sender<TranslationTask>,
    retry_rx: mpsc::Receiver<TranslationTask>,
    /// 已出车道但未结束的任务数（执行中或等待重试），按会话计
    outstanding: HashMap<String, usize>,
    /// 已关闭且仍有未结束任务的会话
    closed_conversations: HashSet<String>,
    /// 当前批次第一个任务入队的时刻
    batch_started: Option<Instant>,
    /// 批次已触发，车道清空前持续出队
    draining: bool,
    last_purge: Instant,
}

impl Scheduler {
    fn new(
        config: SchedulerConfig,
        adapter: Arc<BackendAdapter>,
        cache: Arc<HierarchicalCache>,
        fanout: DeliveryFanout,
        stats: Arc<ServiceStats>,
    ) -> (Self, SchedulerHandle) {
        let (command_tx, command_rx) = mpsc::channel(config.command_channel_capacity.max(1));
        let (report_tx, report_rx) = mpsc::channel(config.event_channel_capacity.max(1));
        let (retry_tx, retry_rx) = mpsc::channel(config.event_channel_capacity.max(1));

        let dispatcher = BatchDispatcher::new(adapter, cache, config.max_concurrency, report_tx);
        let actor = Self {
            lanes: PriorityLanes::new(config.max_pending_tasks),
            ledger: Ledger::new(),
            fanout,
            dispatcher,
            stats,
            commands: command_rx,
            reports: report_rx,
            retry_tx,
            retry_rx,
            outstanding: HashMap::new(),
            closed_conversations: HashSet::new(),
            batch_started: None,
            draining: false,
            last_purge: Instant::now(),
            config,
        };
        (actor, SchedulerHandle { commands: command_tx })
    }

    async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.config.tick_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        tracing::info!(
            batch_size = self.config.batch_size,
            batch_timeout_ms = self.config.batch_timeout_ms,
            max_concurrency = self.dispatcher.max_concurrency(),
            "调度器已启动"
        );

        loop {
            tokio::select! {
                command = self.commands.recv() => {
                    let flow = match command {
                        Some(command) => self.handle_command(command),
                        None => Flow::Stop,
                    };
                    if flow == Flow::Stop {
                        break;
                    }
                }
                Some(report) = self.reports.recv() => {
                    self.handle_report(report);
                    self.pump();
                }
                Some(task) = self.retry_rx.recv() => {
                    self.handle_retry(task);
                    self.pump();
                }
                _ = ticker.tick() => self.on_tick(),
            }
        }

        self.dispatcher.close();
        tracing::info!("调度器已停止");
    }

    // ------------------------------------------------------------------------
    // 命令处理
    // ------------------------------------------------------------------------

    fn handle_command(&mut self, command: SchedulerCommand) -> Flow {
        match command {
            SchedulerCommand::Submit { plan, requests } => {
                self.closed_conversations.remove(&plan.conversation_id);
                let state = self.fanout.register(plan);
                tracing::debug!(?state, tasks = requests.len(), "消息已登记");
                for request in requests {
                    self.admit(request);
                }
                self.pump();
            }
            SchedulerCommand::Request(request) => {
                self.admit(request);
                self.pump();
            }
            SchedulerCommand::CloseConversation {
                conversation_id,
                reply,
            } => {
                let cancelled = self.close_conversation(&conversation_id);
                let _ = reply.send(cancelled);
            }
            SchedulerCommand::Cancel { key, reply } => {
                let _ = reply.send(self.cancel(&key));
            }
            SchedulerCommand::Status { reply } => {
                let _ = reply.send(self.status());
            }
            SchedulerCommand::Shutdown { reply } => {
                self.drain_for_shutdown();
                let _ = reply.send(());
                return Flow::Stop;
            }
        }
        Flow::Continue
    }

    fn admit(&mut self, request: TaskRequest) {
        let TaskRequest { task, waiter } = request;
        let key = task.ledger_key();

        match self.ledger.admit(&key, waiter) {
            Admission::AlreadyCompleted(result) => {
                self.stats.ledger_hits.fetch_add(1, Ordering::Relaxed);
                let events = self.fanout.deliver(&result);
                self.stats.add_deliveries(events.len());
                tracing::debug!(%key, "账本已有结果，跳过派发");
            }
            Admission::Coalesced => {
                self.stats.tasks_coalesced.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(%key, "合并到进行中的请求");
            }
            Admission::Created => {
                self.stats.tasks_created.fetch_add(1, Ordering::Relaxed);
                self.schedule(task);
            }
        }
    }

    /// 入车道；派发由 `pump()` 决定
    fn schedule(&mut self, mut task: TranslationTask) {
        self.transition(&mut task, TaskStatus::Queued);
        let priority = task.priority;

        match self.lanes.enqueue(task) {
            EnqueueOutcome::Enqueued => {}
            EnqueueOutcome::EnqueuedWithDrop(dropped) => {
                tracing::warn!(
                    key = %dropped.ledger_key(),
                    "队列已满，丢弃最旧的低优先级任务"
                );
                self.fail_overflow(dropped);
            }
            EnqueueOutcome::Rejected(rejected) => {
                tracing::warn!(
                    key = %rejected.ledger_key(),
                    priority = rejected.priority.as_str(),
                    "队列已满且无可丢弃任务，拒绝入队"
                );
                self.fail_overflow(rejected);
                return;
            }
        }

        if priority != TaskPriority::Critical && self.batch_started.is_none() {
            self.batch_started = Some(Instant::now());
        }
    }

    /// 状态迁移；非法迁移记为内部错误，以调度器的记录为准继续
    fn transition(&self, task: &mut TranslationTask, next: TaskStatus) {
        if task.status == next {
            return;
        }
        if let Err(error) = task.advance(next) {
            tracing::error!(key = %task.ledger_key(), error = %error, "任务状态不一致");
            self.stats.record_error(&error);
            task.status = next;
        }
    }

    fn fail_overflow(&mut self, task: TranslationTask) {
        self.stats.tasks_dropped.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("parley_tasks_dropped_total").increment(1);
        let error = TranslationError::Overflow(format!(
            "待处理任务超过上限 {}",
            self.config.max_pending_tasks
        ));
        self.fail_task(task, error);
    }

    fn close_conversation(&mut self, conversation_id: &str) -> usize {
        let removed = self.lanes.remove_conversation(conversation_id);
        let mut cancelled = 0;
        for mut task in removed {
            self.transition(&mut task, TaskStatus::Cancelled);
            if self.ledger.cancel(&task.ledger_key()) {
                cancelled += 1;
            }
        }
        self.reset_batch_if_idle();

        let closed_messages = self.fanout.close_conversation(conversation_id);
        // 只有执行中或等待重试的任务需要在回来时识别会话已关闭
        if self.outstanding.contains_key(conversation_id) {
            self.closed_conversations.insert(conversation_id.to_string());
        }
        self.stats
            .tasks_cancelled
            .fetch_add(cancelled as u64, Ordering::Relaxed);

        tracing::info!(
            conversation_id,
            cancelled,
            closed_messages,
            "会话已关闭"
        );
        cancelled
    }

    fn cancel(&mut self, key: &LedgerKey) -> bool {
        let queued = match self.lanes.remove_key(key) {
            Some(mut task) => {
                self.transition(&mut task, TaskStatus::Cancelled);
                true
            }
            None => false,
        };
        self.reset_batch_if_idle();

        // 重试等待中的任务不在车道里，但账本条目仍是 Pending
        let cancelled = self.ledger.cancel(key);
        if cancelled {
            self.stats.tasks_cancelled.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(%key, queued, "任务已取消");
        }
        cancelled
    }

    fn status(&self) -> SchedulerStatus {
        SchedulerStatus {
            queue: self.lanes.status(),
            ledger: self.ledger.snapshot(),
            dispatch: self.dispatcher.stats(),
            available_workers: self.dispatcher.available_workers(),
            max_concurrency: self.dispatcher.max_concurrency(),
            closed_conversations: self.closed_conversations.len(),
        }
    }

    /// 停机：排队中的任务以 `Cancelled` 结束，进行中的任务不再接收新许可
    fn drain_for_shutdown(&mut self) {
        let mut cancelled = 0;
        while !self.lanes.is_empty() {
            for mut task in self.lanes.dequeue_next_batch(self.config.batch_size.max(1)) {
                self.transition(&mut task, TaskStatus::Cancelled);
                if self.ledger.cancel(&task.ledger_key()) {
                    cancelled += 1;
                }
            }
        }
        self.reset_batch_if_idle();
        self.stats
            .tasks_cancelled
            .fetch_add(cancelled as u64, Ordering::Relaxed);
        tracing::info!(cancelled, "调度器停机，取消排队任务");
    }

    // ------------------------------------------------------------------------
    // 批次
    // ------------------------------------------------------------------------

    fn on_tick(&mut self) {
        self.pump();

        let retention = self.config.ledger_retention();
        if self.last_purge.elapsed() >= retention.min(MAX_PURGE_INTERVAL) {
            self.last_purge = Instant::now();
            let ledger_purged = self.ledger.purge_settled(retention);
            let messages_purged = self.fanout.purge_settled(retention);
            if ledger_purged > 0 || messages_purged > 0 {
                tracing::debug!(ledger_purged, messages_purged, "清理已结束的条目");
            }
        }
    }

    fn batch_due(&self) -> bool {
        self.draining
            || self.lanes.len() >= self.config.batch_size
            || self
                .batch_started
                .is_some_and(|started| started.elapsed() >= self.config.batch_timeout())
    }

    fn reset_batch_if_idle(&mut self) {
        if self.lanes.is_empty() {
            self.batch_started = None;
            self.draining = false;
        }
    }

    /// 唯一的出队派发路径，出队数不超过空闲工作槽位
    fn pump(&mut self) {
        loop {
            let free = self.dispatcher.available_workers();
            if free == 0 || self.lanes.is_empty() {
                break;
            }

            let critical = self.lanes.dequeue_batch(TaskPriority::Critical, free);
            if !critical.is_empty() {
                self.stats
                    .critical_dispatches
                    .fetch_add(critical.len() as u64, Ordering::Relaxed);
                self.dispatch(critical);
                continue;
            }

            if !self.batch_due() {
                break;
            }
            self.draining = true;
            let batch = self
                .lanes
                .dequeue_next_batch(free.min(self.config.batch_size.max(1)));
            self.dispatch(batch);
        }
        self.reset_batch_if_idle();
    }

    fn dispatch(&mut self, mut batch: Vec<TranslationTask>) {
        if batch.is_empty() {
            return;
        }

        for task in batch.iter_mut() {
            self.ledger.mark_in_flight(&task.ledger_key());
            self.transition(task, TaskStatus::Processing);
            *self
                .outstanding
                .entry(task.conversation_id.clone())
                .or_insert(0) += 1;
        }

        self.stats.batches_dispatched.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("parley_batches_dispatched_total").increment(1);
        let started = self.dispatcher.dispatch(batch);
        tracing::trace!(started, "工作单元已启动");
    }

    /// 一个出车道的任务结束或回到车道
    fn release_outstanding(&mut self, conversation_id: &str) {
        let Some(count) = self.outstanding.get_mut(conversation_id) else {
            return;
        };
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.outstanding.remove(conversation_id);
            self.closed_conversations.remove(conversation_id);
        }
    }

    // ------------------------------------------------------------------------
    // 回报与重试
    // ------------------------------------------------------------------------

    /// 处理一条回报，返回任务的结果状态
    fn handle_report(&mut self, report: WorkerReport) -> TaskStatus {
        match report {
            WorkerReport::TranslationCompleted { mut task, translation } => {
                self.transition(&mut task, TaskStatus::Completed);
                self.stats.tasks_completed.fetch_add(1, Ordering::Relaxed);
                self.stats
                    .add_processing_time(Duration::from_millis(translation.processing_time_ms));
                self.stats.add_chars_processed(task.char_count());
                if translation.from_cache {
                    self.stats.cache_hits.fetch_add(1, Ordering::Relaxed);
                }

                // 先投递再唤醒等待者，等待者醒来时视图已更新
                let events = self.fanout.deliver(&translation);
                self.stats.add_deliveries(events.len());
                let waiters = self.ledger.complete(translation.clone());
                self.release_outstanding(&task.conversation_id);

                tracing::debug!(
                    key = %task.ledger_key(),
                    waiters,
                    recipients = events.len(),
                    from_cache = translation.from_cache,
                    "翻译完成"
                );
                task.status
            }
            WorkerReport::TranslationFailed { mut task, error } => {
                task.retry_count += 1;
                let key = task.ledger_key();

                if error.is_retryable() && task.has_attempts_left() {
                    self.transition(&mut task, TaskStatus::Queued);
                    let status = task.status;
                    let delay = self.config.backoff_for(task.retry_count);
                    self.stats.tasks_retried.fetch_add(1, Ordering::Relaxed);
                    self.ledger.mark_pending(&key);
                    tracing::warn!(
                        %key,
                        attempt = task.retry_count,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "翻译失败，稍后重试"
                    );

                    let retry_tx = self.retry_tx.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        let _ = retry_tx.send(task).await;
                    });
                    status
                } else {
                    let conversation_id = task.conversation_id.clone();
                    let status = self.fail_task(task, error);
                    self.release_outstanding(&conversation_id);
                    status
                }
            }
        }
    }

    fn handle_retry(&mut self, task: TranslationTask) {
        let key = task.ledger_key();
        let closed = self.closed_conversations.contains(&task.conversation_id);
        self.release_outstanding(&task.conversation_id);

        // 等待期间被取消或会话关闭
        if closed {
            if self.ledger.cancel(&key) {
                self.stats.tasks_cancelled.fetch_add(1, Ordering::Relaxed);
            }
            return;
        }
        if self.ledger.status(&key) != Some(LedgerStatus::Pending) {
            tracing::debug!(%key, "重试任务已不再需要");
            return;
        }

        self.schedule(task);
    }

    /// 永久失败：通知等待者，原文带失败标记投递给参与者
    fn fail_task(&mut self, mut task: TranslationTask, error: TranslationError) -> TaskStatus {
        self.transition(&mut task, TaskStatus::Failed);
        self.stats.tasks_failed.fetch_add(1, Ordering::Relaxed);
        self.stats.record_error(&error);
        metrics::counter!("parley_tasks_failed_total", "category" => error.category().as_str())
            .increment(1);

        tracing::error!(
            key = %task.ledger_key(),
            attempts = task.retry_count,
            error = %error,
            "翻译永久失败"
        );

        let failure = FailedTranslation::from_task(&task, error);
        let events = self.fanout.deliver_failure(&failure);
        self.stats.add_deliveries(events.len());
        self.ledger.fail(failure);
        task.status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translation::core::fallback::LocalApproximation;
    use crate::translation::error::ErrorCategory;
    use crate::translation::model::{CompletedTranslation, Complexity, ModelTier};
    use chrono::Utc;

    fn scheduler(batch_size: usize, max_concurrency: usize) -> (Scheduler, SchedulerHandle) {
        let config = SchedulerConfig {
            batch_size,
            batch_timeout_ms: 60_000,
            max_concurrency,
            ..SchedulerConfig::default()
        };
        let adapter = Arc::new(BackendAdapter::new(
            Arc::new(LocalApproximation::new()),
            Duration::from_secs(1),
            true,
        ));
        let cache = Arc::new(HierarchicalCache::in_memory(16, Duration::from_secs(60)));
        Scheduler::new(
            config,
            adapter,
            cache,
            DeliveryFanout::new(16),
            Arc::new(ServiceStats::default()),
        )
    }

    fn task(id: u64, message_id: &str, priority: TaskPriority, status: TaskStatus) -> TranslationTask {
        TranslationTask {
            id,
            message_id: message_id.to_string(),
            conversation_id: "c1".to_string(),
            content: format!("text {}", id),
            source_language: "en".to_string(),
            target_language: "fr".to_string(),
            priority,
            complexity: Complexity::Simple,
            estimated_time_ms: 110,
            retry_count: 0,
            max_retries: 3,
            created_at: Utc::now(),
            requesting_user_id: None,
            is_last_message: false,
            status,
        }
    }

    fn completed(task: &TranslationTask) -> CompletedTranslation {
        CompletedTranslation {
            message_id: task.message_id.clone(),
            conversation_id: task.conversation_id.clone(),
            source_language: task.source_language.clone(),
            target_language: task.target_language.clone(),
            original_content: task.content.clone(),
            translated_content: format!("[fr] {}", task.content),
            confidence: 0.9,
            model_tier: ModelTier::Standard,
            from_cache: false,
            degraded: false,
            processing_time_ms: 5,
        }
    }

    /// 登记为进行中的任务，模拟已派发
    fn in_flight(scheduler: &mut Scheduler, task: &TranslationTask) {
        let key = task.ledger_key();
        scheduler.ledger.admit(&key, None);
        scheduler.ledger.mark_in_flight(&key);
    }

    fn admit(scheduler: &mut Scheduler, task: TranslationTask) {
        scheduler.admit(TaskRequest { task, waiter: None });
        scheduler.pump();
    }

    #[tokio::test]
    async fn test_completed_report_ends_in_completed() {
        let (mut scheduler, _handle) = scheduler(16, 2);
        let task = task(1, "m1", TaskPriority::Normal, TaskStatus::Processing);
        in_flight(&mut scheduler, &task);

        let status = scheduler.handle_report(WorkerReport::TranslationCompleted {
            translation: completed(&task),
            task: task.clone(),
        });

        assert_eq!(status, TaskStatus::Completed);
        assert_eq!(scheduler.ledger.status(&task.ledger_key()), Some(LedgerStatus::Completed));
        assert_eq!(scheduler.stats.error_stats().total_errors, 0);
    }

    #[tokio::test]
    async fn test_failed_report_retries_then_fails() {
        let (mut scheduler, _handle) = scheduler(16, 2);

        let transient = task(1, "m1", TaskPriority::Normal, TaskStatus::Processing);
        in_flight(&mut scheduler, &transient);
        let status = scheduler.handle_report(WorkerReport::TranslationFailed {
            task: transient.clone(),
            error: TranslationError::Network("reset".to_string()),
        });
        assert_eq!(status, TaskStatus::Queued);
        assert_eq!(scheduler.ledger.status(&transient.ledger_key()), Some(LedgerStatus::Pending));

        let mut exhausted = task(2, "m2", TaskPriority::Normal, TaskStatus::Processing);
        exhausted.retry_count = exhausted.max_retries - 1;
        in_flight(&mut scheduler, &exhausted);
        let status = scheduler.handle_report(WorkerReport::TranslationFailed {
            task: exhausted.clone(),
            error: TranslationError::Network("reset".to_string()),
        });
        assert_eq!(status, TaskStatus::Failed);
        assert_eq!(scheduler.ledger.status(&exhausted.ledger_key()), Some(LedgerStatus::Failed));

        let invalid = task(3, "m3", TaskPriority::Normal, TaskStatus::Processing);
        in_flight(&mut scheduler, &invalid);
        let status = scheduler.handle_report(WorkerReport::TranslationFailed {
            task: invalid,
            error: TranslationError::Validation("empty".to_string()),
        });
        assert_eq!(status, TaskStatus::Failed);

        let errors = scheduler.stats.error_stats();
        assert_eq!(errors.by_category.get(&ErrorCategory::Internal), None);
    }

    #[tokio::test]
    async fn test_illegal_transition_is_recorded_as_internal_error() {
        let (mut scheduler, _handle) = scheduler(16, 2);
        // 从未派发的任务不应直接完成
        let queued = task(1, "m1", TaskPriority::Normal, TaskStatus::Queued);
        in_flight(&mut scheduler, &queued);

        let status = scheduler.handle_report(WorkerReport::TranslationCompleted {
            translation: completed(&queued),
            task: queued,
        });

        assert_eq!(status, TaskStatus::Completed);
        let errors = scheduler.stats.error_stats();
        assert_eq!(errors.by_category.get(&ErrorCategory::Internal), Some(&1));
    }

    #[tokio::test]
    async fn test_backlog_stays_in_lanes_until_a_worker_is_free() {
        let (mut scheduler, _handle) = scheduler(1, 1);

        for id in 1..=3 {
            admit(
                &mut scheduler,
                task(id, &format!("m{}", id), TaskPriority::Normal, TaskStatus::Pending),
            );
        }

        assert_eq!(scheduler.dispatcher.available_workers(), 0);
        assert_eq!(scheduler.lanes.len(), 2);
        assert_eq!(scheduler.dispatcher.stats().tasks, 1);
    }

    #[tokio::test]
    async fn test_critical_task_skips_batch_wait() {
        let (mut scheduler, _handle) = scheduler(16, 1);

        admit(&mut scheduler, task(1, "m1", TaskPriority::Normal, TaskStatus::Pending));
        admit(&mut scheduler, task(2, "m2", TaskPriority::Normal, TaskStatus::Pending));
        assert_eq!(scheduler.dispatcher.stats().tasks, 0);

        admit(&mut scheduler, task(3, "m3", TaskPriority::Critical, TaskStatus::Pending));
        assert_eq!(scheduler.lanes.lane_len(TaskPriority::Critical), 0);
        assert_eq!(scheduler.lanes.len(), 2);
        assert_eq!(scheduler.stats.critical_dispatches.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_closed_conversation_is_forgotten_once_work_settles() {
        let (mut scheduler, _handle) = scheduler(1, 1);
        admit(&mut scheduler, task(1, "m1", TaskPriority::Normal, TaskStatus::Pending));
        admit(&mut scheduler, task(2, "m2", TaskPriority::Normal, TaskStatus::Pending));

        assert_eq!(scheduler.close_conversation("c1"), 1);
        assert_eq!(scheduler.status().closed_conversations, 1);

        let dispatched = task(1, "m1", TaskPriority::Normal, TaskStatus::Processing);
        scheduler.handle_report(WorkerReport::TranslationCompleted {
            translation: completed(&dispatched),
            task: dispatched,
        });

        assert_eq!(scheduler.status().closed_conversations, 0);
        assert!(scheduler.outstanding.is_empty());
    }

    #[tokio::test]
    async fn test_closing_idle_conversation_keeps_nothing() {
        let (mut scheduler, _handle) = scheduler(16, 1);
        admit(&mut scheduler, task(1, "m1", TaskPriority::Normal, TaskStatus::Pending));

        assert_eq!(scheduler.close_conversation("c1"), 1);
        assert_eq!(scheduler.status().closed_conversations, 0);
        assert!(scheduler.lanes.is_empty());
    }
}
