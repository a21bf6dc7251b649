//! 批次派发器
//!
//! 把调度器取出的一批任务按源语言分组，组内相同 (内容, 目标语言) 只翻译一次，
//! 结果由携带它的所有任务共享。先查分层缓存，未命中才调用后端。
//! 后端调用运行在由 `Semaphore` 限制的工作池中，结果通过有界通道回报给调度器。
//!
//! ## 工作槽位
//!
//! 许可在派发时同步取得，调度器只出队不超过 [`BatchDispatcher::available_workers`]
//! 的任务，工作池上没有排队者，积压始终留在优先级车道中。
//! 工作单元在发送回报之前归还许可，调度器收到回报时已能看到空出的槽位。

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore, TryAcquireError};

use crate::translation::core::backend::{BackendAdapter, BackendTranslation};
use crate::translation::error::TranslationError;
use crate::translation::model::{CompletedTranslation, TranslationTask};
use crate::translation::storage::{CacheEntry, CacheKey, HierarchicalCache};

/// 工作线程回报给调度器的结果
#[derive(Debug, Clone)]
pub enum WorkerReport {
    TranslationCompleted {
        task: TranslationTask,
        translation: CompletedTranslation,
    },
    TranslationFailed {
        task: TranslationTask,
        error: TranslationError,
    },
}

/// 一次实际翻译工作：同一源语言、内容和目标语言的所有任务
#[derive(Debug, Clone)]
pub struct WorkUnit {
    pub source_language: String,
    pub target_language: String,
    pub content: String,
    pub tasks: Vec<TranslationTask>,
}

impl WorkUnit {
    fn cache_key(&self) -> CacheKey {
        CacheKey::for_content(&self.source_language, &self.target_language, &self.content)
    }
}

/// 按源语言分组并在组内去重，保持首次出现的顺序
pub fn plan_units(batch: Vec<TranslationTask>) -> Vec<WorkUnit> {
    let mut groups: Vec<(String, Vec<WorkUnit>)> = Vec::new();
    let mut index: HashMap<(String, String, String), (usize, usize)> = HashMap::new();

    for task in batch {
        let unit_key = (
            task.source_language.clone(),
            task.content_hash(),
            task.target_language.clone(),
        );

        if let Some(&(group, unit)) = index.get(&unit_key) {
            groups[group].1[unit].tasks.push(task);
            continue;
        }

        let group = match groups.iter().position(|(source, _)| *source == task.source_language) {
            Some(group) => group,
            None => {
                groups.push((task.source_language.clone(), Vec::new()));
                groups.len() - 1
            }
        };

        let units = &mut groups[group].1;
        units.push(WorkUnit {
            source_language: task.source_language.clone(),
            target_language: task.target_language.clone(),
            content: task.content.clone(),
            tasks: vec![task],
        });
        index.insert(unit_key, (group, units.len() - 1));
    }

    groups.into_iter().flat_map(|(_, units)| units).collect()
}

/// 派发统计（线程安全）
#[derive(Debug, Default)]
pub struct DispatchStats {
    batches: AtomicU64,
    units: AtomicU64,
    tasks: AtomicU64,
    coalesced_in_batch: AtomicU64,
    cache_hits: AtomicU64,
    backend_calls: AtomicU64,
    backend_failures: AtomicU64,
}

/// 派发统计快照
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchStatsSnapshot {
    pub batches: u64,
    pub units: u64,
    pub tasks: u64,
    pub coalesced_in_batch: u64,
    pub cache_hits: u64,
    pub backend_calls: u64,
    pub backend_failures: u64,
}

impl DispatchStats {
    pub fn snapshot(&self) -> DispatchStatsSnapshot {
        DispatchStatsSnapshot {
            batches: self.batches.load(Ordering::Relaxed),
            units: self.units.load(Ordering::Relaxed),
            tasks: self.tasks.load(Ordering::Relaxed),
            coalesced_in_batch: self.coalesced_in_batch.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            backend_calls: self.backend_calls.load(Ordering::Relaxed),
            backend_failures: self.backend_failures.load(Ordering::Relaxed),
        }
    }
}

/// 工作单元执行所需的共享资源
#[derive(Clone)]
struct WorkerContext {
    adapter: Arc<BackendAdapter>,
    cache: Arc<HierarchicalCache>,
    reports: mpsc::Sender<WorkerReport>,
    stats: Arc<DispatchStats>,
}

/// 批次派发器
pub struct BatchDispatcher {
    context: WorkerContext,
    semaphore: Arc<Semaphore>,
    max_concurrency: usize,
    next_batch_id: AtomicU64,
}

impl BatchDispatcher {
    pub fn new(
        adapter: Arc<BackendAdapter>,
        cache: Arc<HierarchicalCache>,
        max_concurrency: usize,
        reports: mpsc::Sender<WorkerReport>,
    ) -> Self {
        let max_concurrency = max_concurrency.max(1);
        Self {
            context: WorkerContext {
                adapter,
                cache,
                reports,
                stats: Arc::new(DispatchStats::default()),
            },
            semaphore: Arc::new(Semaphore::new(max_concurrency)),
            max_concurrency,
            next_batch_id: AtomicU64::new(1),
        }
    }

    /// 派发一批任务，立即返回已启动的工作单元数；结果通过回报通道送达
    ///
    /// 调用方保证任务数不超过空闲槽位数，取不到许可的工作单元以失败回报。
    pub fn dispatch(&self, batch: Vec<TranslationTask>) -> usize {
        let batch_id = self.next_batch_id.fetch_add(1, Ordering::Relaxed);
        let task_count = batch.len();
        let units = plan_units(batch);

        let stats = &self.context.stats;
        stats.batches.fetch_add(1, Ordering::Relaxed);
        stats.tasks.fetch_add(task_count as u64, Ordering::Relaxed);
        stats.units.fetch_add(units.len() as u64, Ordering::Relaxed);
        stats
            .coalesced_in_batch
            .fetch_add((task_count - units.len()) as u64, Ordering::Relaxed);

        tracing::debug!(
            batch_id,
            tasks = task_count,
            units = units.len(),
            "派发翻译批次"
        );

        let mut started = 0;
        for unit in units {
            let context = self.context.clone();
            match Arc::clone(&self.semaphore).try_acquire_owned() {
                Ok(permit) => {
                    tokio::spawn(run_unit(unit, permit, context));
                    started += 1;
                }
                Err(TryAcquireError::Closed) => {
                    let error = TranslationError::ChannelClosed("工作池已关闭".to_string());
                    tokio::spawn(async move { report_failure(&context, unit, error).await });
                }
                Err(TryAcquireError::NoPermits) => {
                    tracing::error!(batch_id, "派发超过空闲工作槽位");
                    let error = TranslationError::Internal("没有空闲工作槽位".to_string());
                    tokio::spawn(async move { report_failure(&context, unit, error).await });
                }
            }
        }
        started
    }

    /// 关闭工作池，尚未获得许可的工作单元以失败回报
    pub fn close(&self) {
        self.semaphore.close();
    }

    pub fn available_workers(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    pub fn stats(&self) -> DispatchStatsSnapshot {
        self.context.stats.snapshot()
    }
}

/// 单个工作单元的结果
enum UnitOutcome {
    Translated(BackendTranslation),
    Failed(TranslationError),
}

async fn run_unit(unit: WorkUnit, permit: OwnedSemaphorePermit, context: WorkerContext) {
    let outcome = execute_unit(&unit, &context).await;
    // 先归还槽位再回报
    drop(permit);

    match outcome {
        UnitOutcome::Translated(translation) => report_success(&context, unit, translation).await,
        UnitOutcome::Failed(error) => report_failure(&context, unit, error).await,
    }
}

async fn execute_unit(unit: &WorkUnit, context: &WorkerContext) -> UnitOutcome {
    let started = Instant::now();
    let key = unit.cache_key();

    if let Some(entry) = context.cache.get(&key).await {
        context.stats.cache_hits.fetch_add(1, Ordering::Relaxed);
        return UnitOutcome::Translated(BackendTranslation {
            translated_text: entry.translated_content,
            source_language: unit.source_language.clone(),
            confidence: entry.confidence,
            model_tier: entry.model_tier,
            processing_time_ms: started.elapsed().as_millis() as u64,
            from_cache: true,
            degraded: false,
        });
    }

    context.stats.backend_calls.fetch_add(1, Ordering::Relaxed);
    match context
        .adapter
        .translate(&unit.content, &unit.source_language, &unit.target_language)
        .await
    {
        Ok(translation) => {
            // 降级结果不写缓存
            if !translation.degraded {
                let entry = CacheEntry::new(
                    &key,
                    &translation.translated_text,
                    translation.model_tier,
                    translation.confidence,
                );
                context.cache.set(&key, entry);
            }
            UnitOutcome::Translated(translation)
        }
        Err(error) => {
            context.stats.backend_failures.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                source = %unit.source_language,
                target = %unit.target_language,
                tasks = unit.tasks.len(),
                "翻译失败: {}",
                error
            );
            UnitOutcome::Failed(error)
        }
    }
}

async fn report_success(context: &WorkerContext, unit: WorkUnit, translation: BackendTranslation) {
    for task in unit.tasks {
        let completed = CompletedTranslation {
            message_id: task.message_id.clone(),
            conversation_id: task.conversation_id.clone(),
            source_language: task.source_language.clone(),
            target_language: task.target_language.clone(),
            original_content: task.content.clone(),
            translated_content: translation.translated_text.clone(),
            confidence: translation.confidence,
            model_tier: translation.model_tier,
            from_cache: translation.from_cache,
            degraded: translation.degraded,
            processing_time_ms: translation.processing_time_ms,
        };
        let report = WorkerReport::TranslationCompleted {
            task,
            translation: completed,
        };
        if context.reports.send(report).await.is_err() {
            tracing::debug!("调度器已停止，丢弃翻译结果");
            return;
        }
    }
}

async fn report_failure(context: &WorkerContext, unit: WorkUnit, error: TranslationError) {
    for task in unit.tasks {
        let report = WorkerReport::TranslationFailed {
            task,
            error: error.clone(),
        };
        if context.reports.send(report).await.is_err() {
            tracing::debug!("调度器已停止，丢弃失败回报");
            return;
        }
    }
}
