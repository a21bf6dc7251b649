//! 去重/幂等账本
//!
//! 以 `messageId:targetLanguage` 为键，保证同一键同时最多只有一次后端调用。
//! 并发请求同一键的调用方都挂在同一条目上等待结果。账本只由调度器actor修改。

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::translation::model::{CompletedTranslation, FailedTranslation, LedgerKey, TaskOutcome};

/// 等待结果的调用方
pub type Waiter = oneshot::Sender<TaskOutcome>;

/// 账本条目状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerStatus {
    Pending,
    InFlight,
    Completed,
    Failed,
}

impl LedgerStatus {
    pub fn is_settled(self) -> bool {
        matches!(self, LedgerStatus::Completed | LedgerStatus::Failed)
    }
}

/// 账本条目
#[derive(Debug)]
pub struct LedgerEntry {
    pub status: LedgerStatus,
    waiters: Vec<Waiter>,
    result: Option<CompletedTranslation>,
    updated_at: Instant,
}

impl LedgerEntry {
    fn pending() -> Self {
        Self {
            status: LedgerStatus::Pending,
            waiters: Vec::new(),
            result: None,
            updated_at: Instant::now(),
        }
    }

    fn set_status(&mut self, status: LedgerStatus) {
        self.status = status;
        self.updated_at = Instant::now();
    }

    pub fn waiter_count(&self) -> usize {
        self.waiters.len()
    }

    fn notify_all(&mut self, outcome: &TaskOutcome) -> usize {
        let mut notified = 0;
        for waiter in self.waiters.drain(..) {
            // 等待者可能已放弃
            if waiter.send(outcome.clone()).is_ok() {
                notified += 1;
            }
        }
        notified
    }
}

/// 准入结果
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    /// 新建条目，调用方需要入队
    Created,
    /// 已有进行中的条目，调用方作为等待者挂上
    Coalesced,
    /// 已完成，直接返回缓存的结果
    AlreadyCompleted(CompletedTranslation),
}

/// 账本快照
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LedgerSnapshot {
    pub pending: usize,
    pub in_flight: usize,
    pub completed: usize,
    pub failed: usize,
    pub waiters: usize,
}

/// 去重账本
#[derive(Debug, Default)]
pub struct Ledger {
    entries: HashMap<LedgerKey, LedgerEntry>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// 准入一个请求
    ///
    /// `Failed` 条目视为不存在，会被替换为新的 `Pending` 条目。
    pub fn admit(&mut self, key: &LedgerKey, waiter: Option<Waiter>) -> Admission {
        if let Some(entry) = self.entries.get_mut(key) {
            match entry.status {
                LedgerStatus::Completed => {
                    let result = entry.result.clone();
                    if let Some(result) = result {
                        if let Some(waiter) = waiter {
                            let _ = waiter.send(TaskOutcome::Completed(result.clone()));
                        }
                        return Admission::AlreadyCompleted(result);
                    }
                }
                LedgerStatus::Pending | LedgerStatus::InFlight => {
                    entry.waiters.extend(waiter);
                    return Admission::Coalesced;
                }
                LedgerStatus::Failed => {}
            }
        }

        let mut entry = LedgerEntry::pending();
        entry.waiters.extend(waiter);
        self.entries.insert(key.clone(), entry);
        Admission::Created
    }

    /// 派发时标记为进行中
    pub fn mark_in_flight(&mut self, key: &LedgerKey) -> bool {
        self.transition(key, LedgerStatus::InFlight)
    }

    /// 重试等待期间回到待处理
    pub fn mark_pending(&mut self, key: &LedgerKey) -> bool {
        self.transition(key, LedgerStatus::Pending)
    }

    fn transition(&mut self, key: &LedgerKey, status: LedgerStatus) -> bool {
        match self.entries.get_mut(key) {
            Some(entry) if !entry.status.is_settled() => {
                entry.set_status(status);
                true
            }
            _ => false,
        }
    }

    /// 标记完成并把唯一结果分发给所有等待者，返回通知的等待者数量
    pub fn complete(&mut self, result: CompletedTranslation) -> usize {
        let key = result.ledger_key();
        let entry = self.entries.entry(key).or_insert_with(LedgerEntry::pending);
        entry.set_status(LedgerStatus::Completed);
        let notified = entry.notify_all(&TaskOutcome::Completed(result.clone()));
        entry.result = Some(result);
        notified
    }

    /// 标记永久失败并通知所有等待者
    pub fn fail(&mut self, failure: FailedTranslation) -> usize {
        let key = failure.ledger_key();
        let entry = self.entries.entry(key).or_insert_with(LedgerEntry::pending);
        entry.set_status(LedgerStatus::Failed);
        entry.result = None;
        entry.notify_all(&TaskOutcome::Failed(failure))
    }

    /// 取消一个待处理条目，等待者收到 `Cancelled`
    pub fn cancel(&mut self, key: &LedgerKey) -> bool {
        match self.entries.get(key) {
            Some(entry) if entry.status == LedgerStatus::Pending => {}
            _ => return false,
        }

        if let Some(mut entry) = self.entries.remove(key) {
            entry.notify_all(&TaskOutcome::Cancelled(key.clone()));
        }
        true
    }

    /// 清理保留期之外的已完成/已失败条目
    pub fn purge_settled(&mut self, retention: Duration) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| !(entry.status.is_settled() && entry.updated_at.elapsed() >= retention));
        before - self.entries.len()
    }

    pub fn status(&self, key: &LedgerKey) -> Option<LedgerStatus> {
        self.entries.get(key).map(|entry| entry.status)
    }

    pub fn waiter_count(&self, key: &LedgerKey) -> usize {
        self.entries.get(key).map_or(0, LedgerEntry::waiter_count)
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        let mut snapshot = LedgerSnapshot::default();
        for entry in self.entries.values() {
            match entry.status {
                LedgerStatus::Pending => snapshot.pending += 1,
                LedgerStatus::InFlight => snapshot.in_flight += 1,
                LedgerStatus::Completed => snapshot.completed += 1,
                LedgerStatus::Failed => snapshot.failed += 1,
            }
            snapshot.waiters += entry.waiter_count();
        }
        snapshot
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translation::error::TranslationError;
    use crate::translation::model::ModelTier;

    fn completed(message_id: &str, target: &str) -> CompletedTranslation {
        CompletedTranslation {
            message_id: message_id.to_string(),
            conversation_id: "conv-1".to_string(),
            source_language: "en".to_string(),
            target_language: target.to_string(),
            original_content: "Hello".to_string(),
            translated_content: "Bonjour".to_string(),
            confidence: 0.9,
            model_tier: ModelTier::Standard,
            from_cache: false,
            degraded: false,
            processing_time_ms: 12,
        }
    }

    fn failed(message_id: &str, target: &str) -> FailedTranslation {
        FailedTranslation {
            message_id: message_id.to_string(),
            conversation_id: "conv-1".to_string(),
            source_language: "en".to_string(),
            target_language: target.to_string(),
            original_content: "Hello".to_string(),
            error: TranslationError::Network("down".to_string()),
            attempts: 3,
        }
    }

    #[tokio::test]
    async fn test_concurrent_requests_coalesce() {
        let mut ledger = Ledger::new();
        let key = LedgerKey::new("m1", "fr");

        let (tx1, rx1) = oneshot::channel();
        let (tx2, rx2) = oneshot::channel();
        let (tx3, rx3) = oneshot::channel();

        assert_eq!(ledger.admit(&key, Some(tx1)), Admission::Created);
        assert_eq!(ledger.admit(&key, Some(tx2)), Admission::Coalesced);
        ledger.mark_in_flight(&key);
        assert_eq!(ledger.admit(&key, Some(tx3)), Admission::Coalesced);
        assert_eq!(ledger.waiter_count(&key), 3);

        assert_eq!(ledger.complete(completed("m1", "fr")), 3);

        for rx in [rx1, rx2, rx3] {
            let outcome = rx.await.expect("waiter notified");
            assert_eq!(
                outcome.translation().map(|t| t.translated_content.as_str()),
                Some("Bonjour")
            );
        }
    }

    #[tokio::test]
    async fn test_completed_key_short_circuits() {
        let mut ledger = Ledger::new();
        let key = LedgerKey::new("m1", "fr");
        ledger.admit(&key, None);
        ledger.complete(completed("m1", "fr"));

        let (tx, rx) = oneshot::channel();
        match ledger.admit(&key, Some(tx)) {
            Admission::AlreadyCompleted(result) => assert_eq!(result.translated_content, "Bonjour"),
            other => panic!("expected completed, got {:?}", other),
        }
        assert!(rx.await.expect("immediate result").is_completed());
    }

    #[tokio::test]
    async fn test_failed_key_can_be_attempted_again() {
        let mut ledger = Ledger::new();
        let key = LedgerKey::new("m1", "fr");
        let (tx, rx) = oneshot::channel();
        ledger.admit(&key, Some(tx));
        assert_eq!(ledger.fail(failed("m1", "fr")), 1);
        assert!(matches!(rx.await, Ok(TaskOutcome::Failed(_))));

        assert_eq!(ledger.admit(&key, None), Admission::Created);
        assert_eq!(ledger.status(&key), Some(LedgerStatus::Pending));
    }

    #[tokio::test]
    async fn test_cancel_only_pending() {
        let mut ledger = Ledger::new();
        let key = LedgerKey::new("m1", "fr");
        let (tx, rx) = oneshot::channel();
        ledger.admit(&key, Some(tx));
        assert!(ledger.cancel(&key));
        assert!(matches!(rx.await, Ok(TaskOutcome::Cancelled(_))));

        ledger.admit(&key, None);
        ledger.mark_in_flight(&key);
        assert!(!ledger.cancel(&key));
    }

    #[test]
    fn test_purge_and_snapshot() {
        let mut ledger = Ledger::new();
        ledger.admit(&LedgerKey::new("m1", "fr"), None);
        ledger.admit(&LedgerKey::new("m1", "es"), None);
        ledger.mark_in_flight(&LedgerKey::new("m1", "es"));
        ledger.admit(&LedgerKey::new("m2", "fr"), None);
        ledger.complete(completed("m2", "fr"));

        let snapshot = ledger.snapshot();
        assert_eq!(snapshot.pending, 1);
        assert_eq!(snapshot.in_flight, 1);
        assert_eq!(snapshot.completed, 1);

        assert_eq!(ledger.purge_settled(Duration::from_secs(3600)), 0);
        assert_eq!(ledger.purge_settled(Duration::ZERO), 1);
        assert_eq!(ledger.len(), 2);
    }
}
