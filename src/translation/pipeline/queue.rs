//! 优先级车道
//!
//! 四条按优先级划分的FIFO车道。车道内按 `created_at` 稳定排序，
//! 总容量有上限，溢出时丢弃最旧的 LOW 任务；LOW 车道为空时拒绝新任务。

use std::collections::VecDeque;

use serde::Serialize;

use crate::translation::model::{LedgerKey, TaskPriority, TranslationTask};

/// 入队结果
#[derive(Debug, Clone, PartialEq)]
pub enum EnqueueOutcome {
    Enqueued,
    /// 入队成功，但为腾出空间丢弃了一个 LOW 任务
    EnqueuedWithDrop(TranslationTask),
    /// 队列已满且没有可丢弃的 LOW 任务
    Rejected(TranslationTask),
}

/// 队列状态快照
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStatus {
    pub critical: usize,
    pub high: usize,
    pub normal: usize,
    pub low: usize,
    pub total: usize,
    pub capacity: usize,
    pub dropped_total: u64,
    pub rejected_total: u64,
}

/// 优先级车道
#[derive(Debug)]
pub struct PriorityLanes {
    lanes: [VecDeque<TranslationTask>; 4],
    capacity: usize,
    dropped_total: u64,
    rejected_total: u64,
}

impl PriorityLanes {
    pub fn new(capacity: usize) -> Self {
        Self {
            lanes: Default::default(),
            capacity: capacity.max(1),
            dropped_total: 0,
            rejected_total: 0,
        }
    }

    /// 入队，状态迁移由调用方负责
    pub fn enqueue(&mut self, task: TranslationTask) -> EnqueueOutcome {
        let mut dropped = None;

        if self.len() >= self.capacity {
            match self.lanes[TaskPriority::Low.lane_index()].pop_front() {
                Some(oldest_low) => {
                    self.dropped_total += 1;
                    dropped = Some(oldest_low);
                }
                None => {
                    self.rejected_total += 1;
                    return EnqueueOutcome::Rejected(task);
                }
            }
        }

        let lane = &mut self.lanes[task.priority.lane_index()];
        // 通常是追加；乱序到达的旧任务插到较新任务之前
        let position = lane.partition_point(|queued| queued.created_at <= task.created_at);
        lane.insert(position, task);

        match dropped {
            Some(task) => EnqueueOutcome::EnqueuedWithDrop(task),
            None => EnqueueOutcome::Enqueued,
        }
    }

    /// 从单条车道取出至多 `n` 个最旧任务
    pub fn dequeue_batch(&mut self, priority: TaskPriority, n: usize) -> Vec<TranslationTask> {
        let lane = &mut self.lanes[priority.lane_index()];
        let take = n.min(lane.len());
        lane.drain(..take).collect()
    }

    /// 按优先级顺序取出至多 `n` 个任务
    pub fn dequeue_next_batch(&mut self, n: usize) -> Vec<TranslationTask> {
        let mut batch = Vec::with_capacity(n.min(self.len()));
        for priority in TaskPriority::ALL {
            if batch.len() >= n {
                break;
            }
            let remaining = n - batch.len();
            batch.extend(self.dequeue_batch(priority, remaining));
        }
        batch
    }

    /// 移除某个会话所有排队中的非关键任务
    pub fn remove_conversation(&mut self, conversation_id: &str) -> Vec<TranslationTask> {
        let mut removed = Vec::new();
        for priority in [TaskPriority::High, TaskPriority::Normal, TaskPriority::Low] {
            let lane = &mut self.lanes[priority.lane_index()];
            let (gone, kept): (VecDeque<_>, VecDeque<_>) = lane
                .drain(..)
                .partition(|task| task.conversation_id == conversation_id);
            *lane = kept;
            removed.extend(gone);
        }
        removed
    }

    /// 按账本键移除排队中的任务
    pub fn remove_key(&mut self, key: &LedgerKey) -> Option<TranslationTask> {
        for lane in self.lanes.iter_mut() {
            if let Some(position) = lane.iter().position(|task| task.ledger_key() == *key) {
                return lane.remove(position);
            }
        }
        None
    }

    pub fn len(&self) -> usize {
        self.lanes.iter().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.lanes.iter().all(VecDeque::is_empty)
    }

    pub fn lane_len(&self, priority: TaskPriority) -> usize {
        self.lanes[priority.lane_index()].len()
    }

    pub fn status(&self) -> QueueStatus {
        QueueStatus {
            critical: self.lane_len(TaskPriority::Critical),
            high: self.lane_len(TaskPriority::High),
            normal: self.lane_len(TaskPriority::Normal),
            low: self.lane_len(TaskPriority::Low),
            total: self.len(),
            capacity: self.capacity,
            dropped_total: self.dropped_total,
            rejected_total: self.rejected_total,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translation::model::{Complexity, TaskStatus};
    use chrono::{Duration as ChronoDuration, Utc};

    fn task(id: u64, priority: TaskPriority, offset_ms: i64) -> TranslationTask {
        TranslationTask {
            id,
            message_id: format!("msg-{}", id),
            conversation_id: "conv-1".to_string(),
            content: "Hello".to_string(),
            source_language: "en".to_string(),
            target_language: "fr".to_string(),
            priority,
            complexity: Complexity::Simple,
            estimated_time_ms: 110,
            retry_count: 0,
            max_retries: 3,
            created_at: Utc::now() + ChronoDuration::milliseconds(offset_ms),
            requesting_user_id: None,
            is_last_message: false,
            status: TaskStatus::Pending,
        }
    }

    #[test]
    fn test_high_dequeued_before_older_low() {
        let mut lanes = PriorityLanes::new(10);
        lanes.enqueue(task(1, TaskPriority::Low, 0));
        lanes.enqueue(task(2, TaskPriority::High, 1));

        let batch = lanes.dequeue_next_batch(10);
        let ids: Vec<u64> = batch.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![2, 1]);
    }

    #[test]
    fn test_fifo_within_lane_by_creation_time() {
        let mut lanes = PriorityLanes::new(10);
        lanes.enqueue(task(1, TaskPriority::Normal, 10));
        lanes.enqueue(task(2, TaskPriority::Normal, 20));
        lanes.enqueue(task(3, TaskPriority::Normal, 0));

        let ids: Vec<u64> = lanes
            .dequeue_batch(TaskPriority::Normal, 3)
            .iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(ids, vec![3, 1, 2]);
    }

    #[test]
    fn test_overflow_drops_oldest_low() {
        let mut lanes = PriorityLanes::new(2);
        lanes.enqueue(task(1, TaskPriority::Low, 0));
        lanes.enqueue(task(2, TaskPriority::Low, 1));

        match lanes.enqueue(task(3, TaskPriority::Normal, 2)) {
            EnqueueOutcome::EnqueuedWithDrop(dropped) => assert_eq!(dropped.id, 1),
            other => panic!("expected a drop, got {:?}", other),
        }
        assert_eq!(lanes.len(), 2);
        assert_eq!(lanes.status().dropped_total, 1);
    }

    #[test]
    fn test_overflow_without_low_rejects_incoming() {
        let mut lanes = PriorityLanes::new(1);
        lanes.enqueue(task(1, TaskPriority::High, 0));

        match lanes.enqueue(task(2, TaskPriority::Normal, 1)) {
            EnqueueOutcome::Rejected(rejected) => assert_eq!(rejected.id, 2),
            other => panic!("expected rejection, got {:?}", other),
        }
        assert_eq!(lanes.len(), 1);
        assert_eq!(lanes.status().rejected_total, 1);
    }

    #[test]
    fn test_remove_conversation_and_key() {
        let mut lanes = PriorityLanes::new(10);
        let mut other = task(1, TaskPriority::Normal, 0);
        other.conversation_id = "conv-2".to_string();
        lanes.enqueue(other);
        lanes.enqueue(task(2, TaskPriority::High, 1));
        lanes.enqueue(task(3, TaskPriority::Low, 2));

        let removed = lanes.remove_conversation("conv-1");
        assert_eq!(removed.len(), 2);
        assert_eq!(lanes.len(), 1);

        let key = LedgerKey::new("msg-1", "fr");
        assert_eq!(lanes.remove_key(&key).map(|t| t.id), Some(1));
        assert!(lanes.is_empty());
    }
}
