//! 翻译编排数据模型
//!
//! 任务、优先级、复杂度、参与者语言偏好以及任务结果等核心类型。

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::translation::error::{TranslationError, TranslationResult};

// ============================================================================
// 优先级与复杂度
// ============================================================================

/// 任务优先级
///
/// 每档各占一条FIFO车道；`Critical` 车道最先出队，且不等批次条件。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Critical,
    High,
    Normal,
    Low,
}

impl TaskPriority {
    /// 车道下标，数值越小越先出队
    pub fn lane_index(self) -> usize {
        match self {
            TaskPriority::Critical => 0,
            TaskPriority::High => 1,
            TaskPriority::Normal => 2,
            TaskPriority::Low => 3,
        }
    }

    pub const ALL: [TaskPriority; 4] = [
        TaskPriority::Critical,
        TaskPriority::High,
        TaskPriority::Normal,
        TaskPriority::Low,
    ];

    /// 根据消息上下文推导优先级
    pub fn from_context(context: &MessageContext) -> Self {
        if context.is_last_message && context.conversation_visible {
            TaskPriority::Critical
        } else if context.is_last_message {
            TaskPriority::High
        } else if context.backfill {
            TaskPriority::Low
        } else {
            TaskPriority::Normal
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskPriority::Critical => "critical",
            TaskPriority::High => "high",
            TaskPriority::Normal => "normal",
            TaskPriority::Low => "low",
        }
    }
}

impl fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 消息复杂度
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Simple,
    Medium,
    Complex,
    Advanced,
}

impl Complexity {
    /// 预估耗时倍数
    pub fn multiplier(self) -> f64 {
        match self {
            Complexity::Simple => 1.0,
            Complexity::Medium => 1.5,
            Complexity::Complex => 2.0,
            Complexity::Advanced => 3.0,
        }
    }
}

/// 翻译模型档位
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelTier {
    Basic,
    Standard,
    Premium,
    /// 本地近似结果（后端不可达时）
    Fallback,
}

impl Default for ModelTier {
    fn default() -> Self {
        ModelTier::Standard
    }
}

// ============================================================================
// 任务状态
// ============================================================================

/// 任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Queued,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// 是否允许迁移到目标状态
    ///
    /// `Processing -> Queued` 是重试路径，`Queued -> Failed` 是溢出丢弃路径。
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, Queued)
                | (Pending, Processing)
                | (Pending, Cancelled)
                | (Pending, Failed)
                | (Queued, Processing)
                | (Queued, Cancelled)
                | (Queued, Failed)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Processing, Queued)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

// ============================================================================
// 翻译任务
// ============================================================================

/// 单条消息到单个目标语言的翻译任务
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslationTask {
    pub id: u64,
    pub message_id: String,
    pub conversation_id: String,
    pub content: String,
    pub source_language: String,
    pub target_language: String,
    pub priority: TaskPriority,
    pub complexity: Complexity,
    pub estimated_time_ms: u64,
    pub retry_count: u32,
    pub max_retries: u32,
    pub created_at: DateTime<Utc>,
    pub requesting_user_id: Option<String>,
    pub is_last_message: bool,
    pub status: TaskStatus,
}

impl TranslationTask {
    /// 幂等账本键
    pub fn ledger_key(&self) -> LedgerKey {
        LedgerKey::new(&self.message_id, &self.target_language)
    }

    /// 内容哈希，用于批内去重和缓存键
    pub fn content_hash(&self) -> String {
        content_hash(&self.content)
    }

    /// 状态迁移，非法迁移返回内部错误
    pub fn advance(&mut self, next: TaskStatus) -> TranslationResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(TranslationError::Internal(format!(
                "任务 {} 状态迁移非法: {:?} -> {:?}",
                self.id, self.status, next
            )));
        }
        self.status = next;
        Ok(())
    }

    /// 还能否再尝试一次
    pub fn has_attempts_left(&self) -> bool {
        self.retry_count < self.max_retries
    }

    pub fn char_count(&self) -> usize {
        self.content.chars().count()
    }
}

/// blake3 内容哈希（十六进制）
pub fn content_hash(content: &str) -> String {
    blake3::hash(content.as_bytes()).to_hex().to_string()
}

/// 规范化语言代码（小写、去空白）
pub fn normalize_language(code: &str) -> String {
    code.trim().to_lowercase()
}

// ============================================================================
// 账本键
// ============================================================================

/// 幂等账本键：`messageId:targetLanguage`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LedgerKey {
    pub message_id: String,
    pub target_language: String,
}

impl LedgerKey {
    pub fn new(message_id: &str, target_language: &str) -> Self {
        Self {
            message_id: message_id.to_string(),
            target_language: normalize_language(target_language),
        }
    }
}

impl fmt::Display for LedgerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.message_id, self.target_language)
    }
}

// ============================================================================
// 参与者与消息
// ============================================================================

/// 参与者语言偏好
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantLanguagePreference {
    pub user_id: String,
    pub system_language: String,
    #[serde(default)]
    pub regional_language: Option<String>,
    #[serde(default)]
    pub custom_destination_language: Option<String>,
    #[serde(default = "default_true")]
    pub auto_translate_enabled: bool,
    #[serde(default = "default_true")]
    pub use_system_language: bool,
    #[serde(default)]
    pub use_regional_language: bool,
    #[serde(default)]
    pub use_custom_destination: bool,
}

fn default_true() -> bool {
    true
}

impl ParticipantLanguagePreference {
    /// 只启用系统语言的偏好
    pub fn new(user_id: &str, system_language: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            system_language: normalize_language(system_language),
            regional_language: None,
            custom_destination_language: None,
            auto_translate_enabled: true,
            use_system_language: true,
            use_regional_language: false,
            use_custom_destination: false,
        }
    }

    pub fn with_regional(mut self, language: &str) -> Self {
        self.regional_language = Some(normalize_language(language));
        self.use_regional_language = true;
        self
    }

    pub fn with_custom_destination(mut self, language: &str) -> Self {
        self.custom_destination_language = Some(normalize_language(language));
        self.use_custom_destination = true;
        self
    }

    pub fn with_auto_translate(mut self, enabled: bool) -> Self {
        self.auto_translate_enabled = enabled;
        self
    }

    /// 当前激活的目标语言（去重，保持 系统/区域/自定义 顺序）
    ///
    /// 关闭自动翻译的参与者没有激活语言，只看原文。
    pub fn active_languages(&self) -> Vec<String> {
        if !self.auto_translate_enabled {
            return Vec::new();
        }

        let candidates = [
            self.use_system_language.then(|| Some(self.system_language.as_str())),
            self.use_regional_language
                .then(|| self.regional_language.as_deref()),
            self.use_custom_destination
                .then(|| self.custom_destination_language.as_deref()),
        ];

        let mut languages: Vec<String> = Vec::new();
        for language in candidates.into_iter().flatten().flatten() {
            let language = normalize_language(language);
            if !language.is_empty() && !languages.contains(&language) {
                languages.push(language);
            }
        }
        languages
    }
}

/// 进入系统的新消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncomingMessage {
    pub message_id: String,
    pub conversation_id: String,
    pub content: String,
    #[serde(default)]
    pub source_language: Option<String>,
    pub sender_id: String,
    pub created_at: DateTime<Utc>,
}

impl IncomingMessage {
    pub fn new(message_id: &str, conversation_id: &str, sender_id: &str, content: &str) -> Self {
        Self {
            message_id: message_id.to_string(),
            conversation_id: conversation_id.to_string(),
            content: content.to_string(),
            source_language: None,
            sender_id: sender_id.to_string(),
            created_at: Utc::now(),
        }
    }

    pub fn with_source_language(mut self, language: &str) -> Self {
        self.source_language = Some(normalize_language(language));
        self
    }
}

/// 消息上下文，决定任务优先级
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageContext {
    pub is_last_message: bool,
    pub conversation_visible: bool,
    pub backfill: bool,
}

impl MessageContext {
    /// 会话可见且为最新消息
    pub fn live() -> Self {
        Self {
            is_last_message: true,
            conversation_visible: true,
            backfill: false,
        }
    }

    /// 历史消息回填
    pub fn backfill() -> Self {
        Self {
            is_last_message: false,
            conversation_visible: false,
            backfill: true,
        }
    }
}

// ============================================================================
// 任务结果
// ============================================================================

/// 翻译成功结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedTranslation {
    pub message_id: String,
    pub conversation_id: String,
    pub source_language: String,
    pub target_language: String,
    pub original_content: String,
    pub translated_content: String,
    pub confidence: f32,
    pub model_tier: ModelTier,
    pub from_cache: bool,
    pub degraded: bool,
    pub processing_time_ms: u64,
}

impl CompletedTranslation {
    pub fn ledger_key(&self) -> LedgerKey {
        LedgerKey::new(&self.message_id, &self.target_language)
    }
}

/// 翻译永久失败
#[derive(Debug, Clone, PartialEq)]
pub struct FailedTranslation {
    pub message_id: String,
    pub conversation_id: String,
    pub source_language: String,
    pub target_language: String,
    pub original_content: String,
    pub error: TranslationError,
    pub attempts: u32,
}

impl FailedTranslation {
    pub fn from_task(task: &TranslationTask, error: TranslationError) -> Self {
        Self {
            message_id: task.message_id.clone(),
            conversation_id: task.conversation_id.clone(),
            source_language: task.source_language.clone(),
            target_language: task.target_language.clone(),
            original_content: task.content.clone(),
            error,
            attempts: task.retry_count,
        }
    }

    pub fn ledger_key(&self) -> LedgerKey {
        LedgerKey::new(&self.message_id, &self.target_language)
    }
}

/// 等待者最终收到的结果
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Completed(CompletedTranslation),
    Failed(FailedTranslation),
    Cancelled(LedgerKey),
}

impl TaskOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, TaskOutcome::Completed(_))
    }

    pub fn translation(&self) -> Option<&CompletedTranslation> {
        match self {
            TaskOutcome::Completed(translation) => Some(translation),
            _ => None,
        }
    }
}
