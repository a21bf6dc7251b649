//! 翻译编排统一错误处理
//!
//! 提供结构化错误类型和错误处理机制。调度器从不因单个任务的错误而退出，
//! 错误按任务隔离，并通过 `is_retryable` 决定是否进入重试路径。

use std::fmt;

use thiserror::Error;

use crate::env::EnvError;

/// 翻译错误类型
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TranslationError {
    /// 输入验证错误（不支持的语言代码、空内容等），立即拒绝，不重试
    #[error("输入无效: {0}")]
    Validation(String),

    /// 网络错误（连接失败、连接断开）
    #[error("网络错误: {0}")]
    Network(String),

    /// 超时错误（连接超时或单次调用超时）
    #[error("操作超时: {0}")]
    Timeout(String),

    /// 翻译后端返回了错误响应
    #[error("翻译后端错误: {0}")]
    Backend(String),

    /// 缓存写入错误，只记录日志，不影响第0层缓存
    #[error("缓存写入错误: {0}")]
    CacheWrite(String),

    /// 持久化存储错误
    #[error("存储错误: {0}")]
    Storage(String),

    /// 队列容量超限
    #[error("队列已满: {0}")]
    Overflow(String),

    /// 配置错误
    #[error("配置错误: {0}")]
    Config(String),

    /// 解析错误
    #[error("解析错误: {0}")]
    Parse(String),

    /// 序列化错误
    #[error("序列化错误: {0}")]
    Serialization(String),

    /// 调度器通道已关闭
    #[error("调度器已停止: {0}")]
    ChannelClosed(String),

    /// 内部错误
    #[error("内部错误: {0}")]
    Internal(String),
}

impl TranslationError {
    /// 检查错误是否可重试
    pub fn is_retryable(&self) -> bool {
        match self {
            TranslationError::Network(_) => true,
            TranslationError::Timeout(_) => true,
            TranslationError::Backend(_) => true,
            TranslationError::Storage(_) => true,
            TranslationError::CacheWrite(_) => false,
            TranslationError::Validation(_) => false,
            TranslationError::Overflow(_) => false,
            TranslationError::Config(_) => false,
            TranslationError::Parse(_) => false,
            TranslationError::Serialization(_) => false,
            TranslationError::ChannelClosed(_) => false,
            TranslationError::Internal(_) => false,
        }
    }

    /// 是否属于后端暂时性错误（超时、连接断开、后端异常）
    pub fn is_transient_backend(&self) -> bool {
        matches!(
            self,
            TranslationError::Network(_) | TranslationError::Timeout(_) | TranslationError::Backend(_)
        )
    }

    /// 获取错误的严重程度
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            TranslationError::Validation(_) => ErrorSeverity::Info,
            TranslationError::Network(_) => ErrorSeverity::Warning,
            TranslationError::Timeout(_) => ErrorSeverity::Warning,
            TranslationError::Backend(_) => ErrorSeverity::Error,
            TranslationError::CacheWrite(_) => ErrorSeverity::Warning,
            TranslationError::Storage(_) => ErrorSeverity::Warning,
            TranslationError::Overflow(_) => ErrorSeverity::Warning,
            TranslationError::Config(_) => ErrorSeverity::Critical,
            TranslationError::Parse(_) => ErrorSeverity::Error,
            TranslationError::Serialization(_) => ErrorSeverity::Error,
            TranslationError::ChannelClosed(_) => ErrorSeverity::Critical,
            TranslationError::Internal(_) => ErrorSeverity::Critical,
        }
    }

    /// 获取错误类别
    pub fn category(&self) -> ErrorCategory {
        match self {
            TranslationError::Validation(_) => ErrorCategory::Input,
            TranslationError::Network(_) => ErrorCategory::Network,
            TranslationError::Timeout(_) => ErrorCategory::Timeout,
            TranslationError::Backend(_) => ErrorCategory::Service,
            TranslationError::CacheWrite(_) => ErrorCategory::Cache,
            TranslationError::Storage(_) => ErrorCategory::Cache,
            TranslationError::Overflow(_) => ErrorCategory::Resource,
            TranslationError::Config(_) => ErrorCategory::Configuration,
            TranslationError::Parse(_) => ErrorCategory::Parsing,
            TranslationError::Serialization(_) => ErrorCategory::Serialization,
            TranslationError::ChannelClosed(_) => ErrorCategory::Concurrency,
            TranslationError::Internal(_) => ErrorCategory::Internal,
        }
    }

    /// 创建带上下文的错误
    pub fn with_context<T: fmt::Display>(mut self, context: T) -> Self {
        let new_msg = format!("{} (上下文: {})", self.message(), context);

        match &mut self {
            TranslationError::Validation(msg)
            | TranslationError::Network(msg)
            | TranslationError::Timeout(msg)
            | TranslationError::Backend(msg)
            | TranslationError::CacheWrite(msg)
            | TranslationError::Storage(msg)
            | TranslationError::Overflow(msg)
            | TranslationError::Config(msg)
            | TranslationError::Parse(msg)
            | TranslationError::Serialization(msg)
            | TranslationError::ChannelClosed(msg)
            | TranslationError::Internal(msg) => *msg = new_msg,
        }

        self
    }

    /// 错误携带的原始消息（不含类别前缀）
    pub fn message(&self) -> &str {
        match self {
            TranslationError::Validation(msg)
            | TranslationError::Network(msg)
            | TranslationError::Timeout(msg)
            | TranslationError::Backend(msg)
            | TranslationError::CacheWrite(msg)
            | TranslationError::Storage(msg)
            | TranslationError::Overflow(msg)
            | TranslationError::Config(msg)
            | TranslationError::Parse(msg)
            | TranslationError::Serialization(msg)
            | TranslationError::ChannelClosed(msg)
            | TranslationError::Internal(msg) => msg,
        }
    }
}

/// 错误严重程度
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

/// 错误类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Configuration,
    Network,
    Input,
    Cache,
    Service,
    Timeout,
    Parsing,
    Serialization,
    Concurrency,
    Resource,
    Internal,
}

impl From<std::io::Error> for TranslationError {
    fn from(error: std::io::Error) -> Self {
        TranslationError::Storage(format!("IO错误: {}", error))
    }
}

impl From<serde_json::Error> for TranslationError {
    fn from(error: serde_json::Error) -> Self {
        TranslationError::Serialization(format!("JSON序列化错误: {}", error))
    }
}

impl From<toml::de::Error> for TranslationError {
    fn from(error: toml::de::Error) -> Self {
        TranslationError::Parse(format!("TOML解析错误: {}", error))
    }
}

impl From<tokio::time::error::Elapsed> for TranslationError {
    fn from(error: tokio::time::error::Elapsed) -> Self {
        TranslationError::Timeout(format!("异步操作超时: {}", error))
    }
}

impl From<reqwest::Error> for TranslationError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            TranslationError::Timeout(format!("请求超时: {}", error))
        } else if error.is_connect() || error.is_request() {
            TranslationError::Network(format!("连接失败: {}", error))
        } else if error.is_decode() {
            TranslationError::Parse(format!("响应解析失败: {}", error))
        } else {
            TranslationError::Backend(error.to_string())
        }
    }
}

impl From<redb::Error> for TranslationError {
    fn from(error: redb::Error) -> Self {
        TranslationError::Storage(format!("redb错误: {}", error))
    }
}

impl From<EnvError> for TranslationError {
    fn from(error: EnvError) -> Self {
        TranslationError::Config(error.to_string())
    }
}

/// 错误结果类型别名
impl ErrorCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCategory::Configuration => "configuration",
            ErrorCategory::Network => "network",
            ErrorCategory::Input => "input",
            ErrorCategory::Cache => "cache",
            ErrorCategory::Service => "service",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::Parsing => "parsing",
            ErrorCategory::Serialization => "serialization",
            ErrorCategory::Concurrency => "concurrency",
            ErrorCategory::Resource => "resource",
            ErrorCategory::Internal => "internal",
        }
    }
}

pub type TranslationResult<T> = Result<T, TranslationError>;

/// 错误统计信息
#[derive(Debug, Clone, Default)]
pub struct ErrorStats {
    pub total_errors: usize,
    pub by_category: std::collections::HashMap<ErrorCategory, usize>,
    pub by_severity: std::collections::HashMap<ErrorSeverity, usize>,
    pub retryable_errors: usize,
    pub critical_errors: usize,
}

impl ErrorStats {
    /// 记录错误
    pub fn record_error(&mut self, error: &TranslationError) {
        self.total_errors += 1;

        *self.by_category.entry(error.category()).or_insert(0) += 1;

        let severity = error.severity();
        *self.by_severity.entry(severity).or_insert(0) += 1;

        if error.is_retryable() {
            self.retryable_errors += 1;
        }

        if severity == ErrorSeverity::Critical {
            self.critical_errors += 1;
        }
    }

    /// 获取错误率
    pub fn error_rate(&self, total_operations: usize) -> f64 {
        if total_operations == 0 {
            0.0
        } else {
            self.total_errors as f64 / total_operations as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        assert!(TranslationError::Timeout("t".into()).is_retryable());
        assert!(TranslationError::Network("n".into()).is_retryable());
        assert!(TranslationError::Backend("b".into()).is_retryable());
        assert!(!TranslationError::Validation("xx".into()).is_retryable());
        assert!(!TranslationError::Overflow("full".into()).is_retryable());
        assert!(!TranslationError::CacheWrite("disk".into()).is_retryable());
    }

    #[test]
    fn test_with_context_keeps_variant() {
        let error = TranslationError::Network("连接被重置".into()).with_context("msg-1:fr");
        assert!(matches!(error, TranslationError::Network(_)));
        assert!(error.message().contains("msg-1:fr"));
    }

    #[test]
    fn test_error_stats() {
        let mut stats = ErrorStats::default();
        stats.record_error(&TranslationError::Timeout("a".into()));
        stats.record_error(&TranslationError::Internal("b".into()));
        stats.record_error(&TranslationError::Validation("c".into()));

        assert_eq!(stats.total_errors, 3);
        assert_eq!(stats.retryable_errors, 1);
        assert_eq!(stats.critical_errors, 1);
        assert_eq!(stats.by_category.get(&ErrorCategory::Timeout), Some(&1));
        assert!((stats.error_rate(6) - 0.5).abs() < f64::EPSILON);
    }
}
