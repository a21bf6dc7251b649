//! 投递扇出
//!
//! 把完成的翻译映射到需要它的参与者，每个需要的语言发出一次投递事件，
//! 并以“按目标语言替换”的方式幂等合并进参与者视图。
//!
//! 消息状态机：
//!
//! ```text
//! Created -> Sent -> TranslationsPending(N) -> TranslationsPartial -> TranslationsComplete
//!                                                    |
//!                                                    +-> Settled（全部有结果，部分永久失败）
//! 任意非终止状态 -> Closed（会话关闭）
//! ```
//!
//! 修改只发生在调度器actor中（`&mut self`），查询通过 [`FanoutHandle`] 并发进行。

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::translation::model::{
    normalize_language, CompletedTranslation, FailedTranslation, IncomingMessage, ModelTier,
    ParticipantLanguagePreference,
};

// ============================================================================
// 投递计划
// ============================================================================

/// 单条消息的投递计划
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessagePlan {
    pub message_id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub source_language: String,
    pub original_content: String,
    /// 去重后的目标语言（不含源语言）
    pub targets: BTreeSet<String>,
    /// 目标语言 -> 需要该语言的参与者
    pub recipients: BTreeMap<String, Vec<String>>,
    /// 直接看原文的参与者（发送者、与源语言相同、关闭自动翻译）
    pub original_viewers: Vec<String>,
}

impl MessagePlan {
    pub fn expected_languages(&self) -> usize {
        self.targets.len()
    }

    /// 只保留满足条件的目标语言，返回被移除的语言
    ///
    /// 失去全部目标语言的参与者改为看原文。
    pub fn retain_targets<F>(&mut self, mut keep: F) -> Vec<String>
    where
        F: FnMut(&str) -> bool,
    {
        let removed: Vec<String> = self
            .targets
            .iter()
            .filter(|language| !keep(language.as_str()))
            .cloned()
            .collect();

        let mut affected: Vec<String> = Vec::new();
        for language in &removed {
            self.targets.remove(language);
            if let Some(users) = self.recipients.remove(language) {
                affected.extend(users);
            }
        }

        for participant in affected {
            let still_translated = self
                .recipients
                .values()
                .any(|users| users.contains(&participant));
            if !still_translated && !self.original_viewers.contains(&participant) {
                self.original_viewers.push(participant);
            }
        }
        removed
    }

    pub fn participants(&self) -> BTreeSet<&str> {
        self.original_viewers
            .iter()
            .chain(self.recipients.values().flatten())
            .map(String::as_str)
            .collect()
    }
}

/// 计算消息的投递计划
pub fn plan_message(
    message: &IncomingMessage,
    source_language: &str,
    roster: &[ParticipantLanguagePreference],
) -> MessagePlan {
    let source_language = normalize_language(source_language);
    let mut recipients: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut original_viewers = Vec::new();

    for participant in roster {
        if participant.user_id == message.sender_id {
            original_viewers.push(participant.user_id.clone());
            continue;
        }

        let languages = participant.active_languages();
        if languages.is_empty() || languages.contains(&source_language) {
            original_viewers.push(participant.user_id.clone());
            continue;
        }

        for language in languages {
            let users = recipients.entry(language).or_default();
            if !users.contains(&participant.user_id) {
                users.push(participant.user_id.clone());
            }
        }
    }

    if !original_viewers.contains(&message.sender_id) {
        original_viewers.push(message.sender_id.clone());
    }

    MessagePlan {
        message_id: message.message_id.clone(),
        conversation_id: message.conversation_id.clone(),
        sender_id: message.sender_id.clone(),
        source_language,
        original_content: message.content.clone(),
        targets: recipients.keys().cloned().collect(),
        recipients,
        original_viewers,
    }
}

// ============================================================================
// 事件与视图
// ============================================================================

/// 投递事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryEvent {
    pub participant_id: String,
    pub message_id: String,
    pub conversation_id: String,
    pub target_language: String,
    pub translated_content: String,
    pub confidence: f32,
    pub model_tier: Option<ModelTier>,
    pub translation_failed: bool,
}

/// 视图中的单条译文
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewTranslation {
    pub target_language: String,
    pub content: String,
    pub confidence: f32,
    pub model_tier: Option<ModelTier>,
    pub translation_failed: bool,
}

/// 参与者看到的消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantView {
    pub participant_id: String,
    pub message_id: String,
    pub conversation_id: String,
    pub source_language: String,
    pub original_content: String,
    /// 每个目标语言至多一条
    pub translations: Vec<ViewTranslation>,
}

impl ParticipantView {
    fn new(participant_id: &str, plan: &MessagePlan) -> Self {
        Self {
            participant_id: participant_id.to_string(),
            message_id: plan.message_id.clone(),
            conversation_id: plan.conversation_id.clone(),
            source_language: plan.source_language.clone(),
            original_content: plan.original_content.clone(),
            translations: Vec::new(),
        }
    }

    /// 按目标语言替换合并
    pub fn merge(&mut self, event: &DeliveryEvent) {
        let translation = ViewTranslation {
            target_language: event.target_language.clone(),
            content: event.translated_content.clone(),
            confidence: event.confidence,
            model_tier: event.model_tier,
            translation_failed: event.translation_failed,
        };

        match self
            .translations
            .iter_mut()
            .find(|existing| existing.target_language == event.target_language)
        {
            Some(existing) => *existing = translation,
            None => self.translations.push(translation),
        }
    }

    pub fn translation_for(&self, target_language: &str) -> Option<&ViewTranslation> {
        self.translations
            .iter()
            .find(|translation| translation.target_language == target_language)
    }
}

// ============================================================================
// 消息状态
// ============================================================================

/// 消息状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum MessageState {
    Created,
    Sent,
    TranslationsPending { expected: usize },
    TranslationsPartial { resolved: usize, expected: usize },
    TranslationsComplete,
    Settled { failed: usize },
    Closed,
}

impl MessageState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            MessageState::TranslationsComplete | MessageState::Settled { .. } | MessageState::Closed
        )
    }
}

/// 消息记录
#[derive(Debug, Clone)]
pub struct MessageRecord {
    pub plan: MessagePlan,
    pub state: MessageState,
    delivered: BTreeSet<String>,
    failed: BTreeSet<String>,
    updated_at: Instant,
}

impl MessageRecord {
    fn new(plan: MessagePlan) -> Self {
        Self {
            plan,
            state: MessageState::Created,
            delivered: BTreeSet::new(),
            failed: BTreeSet::new(),
            updated_at: Instant::now(),
        }
    }

    fn set_state(&mut self, state: MessageState) {
        self.state = state;
        self.updated_at = Instant::now();
    }

    fn refresh_state(&mut self) {
        let expected = self.plan.expected_languages();
        let resolved = self.delivered.len() + self.failed.len();

        let state = if resolved >= expected {
            if self.failed.is_empty() {
                MessageState::TranslationsComplete
            } else {
                MessageState::Settled {
                    failed: self.failed.len(),
                }
            }
        } else if resolved > 0 {
            MessageState::TranslationsPartial { resolved, expected }
        } else {
            MessageState::TranslationsPending { expected }
        };
        self.set_state(state);
    }

    pub fn delivered_languages(&self) -> &BTreeSet<String> {
        &self.delivered
    }

    pub fn failed_languages(&self) -> &BTreeSet<String> {
        &self.failed
    }
}

// ============================================================================
// 扇出
// ============================================================================

type ViewKey = (String, String);

/// 只读查询句柄
#[derive(Clone)]
pub struct FanoutHandle {
    messages: Arc<DashMap<String, MessageRecord>>,
    views: Arc<DashMap<ViewKey, ParticipantView>>,
    events: broadcast::Sender<DeliveryEvent>,
}

impl FanoutHandle {
    pub fn subscribe(&self) -> broadcast::Receiver<DeliveryEvent> {
        self.events.subscribe()
    }

    pub fn view(&self, participant_id: &str, message_id: &str) -> Option<ParticipantView> {
        self.views
            .get(&(participant_id.to_string(), message_id.to_string()))
            .map(|view| view.clone())
    }

    pub fn message_state(&self, message_id: &str) -> Option<MessageState> {
        self.messages.get(message_id).map(|record| record.state)
    }

    pub fn message_plan(&self, message_id: &str) -> Option<MessagePlan> {
        self.messages.get(message_id).map(|record| record.plan.clone())
    }

    pub fn tracked_messages(&self) -> usize {
        self.messages.len()
    }

    pub fn tracked_views(&self) -> usize {
        self.views.len()
    }
}

/// 投递扇出
pub struct DeliveryFanout {
    handle: FanoutHandle,
}

impl DeliveryFanout {
    pub fn new(event_capacity: usize) -> Self {
        let (events, _) = broadcast::channel(event_capacity.max(1));
        Self {
            handle: FanoutHandle {
                messages: Arc::new(DashMap::new()),
                views: Arc::new(DashMap::new()),
                events,
            },
        }
    }

    pub fn handle(&self) -> FanoutHandle {
        self.handle.clone()
    }

    /// 登记消息计划，所有参与者先看到原文
    ///
    /// 重复登记同一消息不会重置已有状态。
    pub fn register(&mut self, plan: MessagePlan) -> MessageState {
        if let Some(existing) = self.handle.messages.get(&plan.message_id) {
            return existing.state;
        }

        for participant in plan.participants() {
            self.handle
                .views
                .entry((participant.to_string(), plan.message_id.clone()))
                .or_insert_with(|| ParticipantView::new(participant, &plan));
        }

        let message_id = plan.message_id.clone();
        let mut record = MessageRecord::new(plan);
        record.set_state(MessageState::Sent);
        record.refresh_state();
        let state = record.state;
        self.handle.messages.insert(message_id, record);
        state
    }

    /// 投递一条完成的翻译，返回发出的事件
    pub fn deliver(&mut self, completed: &CompletedTranslation) -> Vec<DeliveryEvent> {
        let target = normalize_language(&completed.target_language);

        let recipients = {
            let Some(mut record) = self.handle.messages.get_mut(&completed.message_id) else {
                return Vec::new();
            };
            if record.state == MessageState::Closed || record.delivered.contains(&target) {
                return Vec::new();
            }
            record.failed.remove(&target);
            record.delivered.insert(target.clone());
            record.refresh_state();
            record.plan.recipients.get(&target).cloned().unwrap_or_default()
        };

        let events: Vec<DeliveryEvent> = recipients
            .into_iter()
            .map(|participant_id| DeliveryEvent {
                participant_id,
                message_id: completed.message_id.clone(),
                conversation_id: completed.conversation_id.clone(),
                target_language: target.clone(),
                translated_content: completed.translated_content.clone(),
                confidence: completed.confidence,
                model_tier: Some(completed.model_tier),
                translation_failed: false,
            })
            .collect();

        self.publish(&events);
        events
    }

    /// 投递永久失败：相同的接收者收到原文并带 `translation_failed = true`
    pub fn deliver_failure(&mut self, failed: &FailedTranslation) -> Vec<DeliveryEvent> {
        let target = normalize_language(&failed.target_language);

        let (recipients, original) = {
            let Some(mut record) = self.handle.messages.get_mut(&failed.message_id) else {
                return Vec::new();
            };
            if record.state == MessageState::Closed
                || record.delivered.contains(&target)
                || record.failed.contains(&target)
            {
                return Vec::new();
            }
            record.failed.insert(target.clone());
            record.refresh_state();
            (
                record.plan.recipients.get(&target).cloned().unwrap_or_default(),
                record.plan.original_content.clone(),
            )
        };

        let events: Vec<DeliveryEvent> = recipients
            .into_iter()
            .map(|participant_id| DeliveryEvent {
                participant_id,
                message_id: failed.message_id.clone(),
                conversation_id: failed.conversation_id.clone(),
                target_language: target.clone(),
                translated_content: original.clone(),
                confidence: 0.0,
                model_tier: None,
                translation_failed: true,
            })
            .collect();

        self.publish(&events);
        events
    }

    fn publish(&self, events: &[DeliveryEvent]) {
        for event in events {
            if let Some(mut view) = self
                .handle
                .views
                .get_mut(&(event.participant_id.clone(), event.message_id.clone()))
            {
                view.merge(event);
            }
            // 没有订阅者时发送失败，视图仍然可查询
            let _ = self.handle.events.send(event.clone());
        }
        metrics::counter!("parley_delivery_events_total").increment(events.len() as u64);
    }

    /// 关闭会话：其所有未结束的消息进入 `Closed`
    pub fn close_conversation(&mut self, conversation_id: &str) -> usize {
        let mut closed = 0;
        for mut record in self.handle.messages.iter_mut() {
            if record.plan.conversation_id == conversation_id && !record.state.is_terminal() {
                record.set_state(MessageState::Closed);
                closed += 1;
            }
        }
        closed
    }

    /// 清理保留期之外已结束的消息记录及其参与者视图
    pub fn purge_settled(&mut self, retention: Duration) -> usize {
        let expired: Vec<String> = self
            .handle
            .messages
            .iter()
            .filter(|record| record.state.is_terminal() && record.updated_at.elapsed() >= retention)
            .map(|record| record.key().clone())
            .collect();

        let mut purged = 0;
        for message_id in expired {
            let Some((_, record)) = self.handle.messages.remove(&message_id) else {
                continue;
            };
            for participant in record.plan.participants() {
                self.handle.views.remove(&(participant.to_string(), message_id.clone()));
            }
            purged += 1;
        }
        purged
    }
}
