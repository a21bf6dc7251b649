// 集成测试公共模块
//
// 提供可编排的模拟后端、参与者名单和配置构建器

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::broadcast;

use parley::translation::core::backend::{BackendTranslation, DetectedLanguage, TranslationBackend};
use parley::translation::{
    CacheConfig, DeliveryEvent, ModelTier, OrchestratorConfig, ParticipantLanguagePreference,
    TranslationError, TranslationResult, TranslationService,
};

/// 一次后端调用记录
#[derive(Debug, Clone)]
pub struct BackendCall {
    pub text: String,
    pub source: String,
    pub target: String,
    pub at: Instant,
}

/// 可编排的模拟后端
///
/// 按顺序消费预设的失败，之后返回 `[target] text`。
pub struct ScriptedBackend {
    calls: Mutex<Vec<BackendCall>>,
    failures: Mutex<VecDeque<TranslationError>>,
    always_fail: Option<TranslationError>,
    delay: Duration,
    detected_language: String,
    detections: AtomicUsize,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            failures: Mutex::new(VecDeque::new()),
            always_fail: None,
            delay: Duration::ZERO,
            detected_language: "en".to_string(),
            detections: AtomicUsize::new(0),
        }
    }

    /// 每次调用前等待
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// 前几次调用依次返回这些错误
    pub fn failing_first(self, errors: Vec<TranslationError>) -> Self {
        *self.failures.lock().unwrap() = errors.into();
        self
    }

    /// 每次调用都返回该错误
    pub fn always_failing(mut self, error: TranslationError) -> Self {
        self.always_fail = Some(error);
        self
    }

    pub fn detecting(mut self, language: &str) -> Self {
        self.detected_language = language.to_string();
        self
    }

    pub fn calls(&self) -> Vec<BackendCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn targets_called(&self) -> Vec<String> {
        self.calls().into_iter().map(|call| call.target).collect()
    }

    pub fn detection_count(&self) -> usize {
        self.detections.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TranslationBackend for ScriptedBackend {
    async fn translate(
        &self,
        text: &str,
        source: &str,
        target: &str,
    ) -> TranslationResult<BackendTranslation> {
        self.calls.lock().unwrap().push(BackendCall {
            text: text.to_string(),
            source: source.to_string(),
            target: target.to_string(),
            at: Instant::now(),
        });

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        if let Some(error) = &self.always_fail {
            return Err(error.clone());
        }
        if let Some(error) = self.failures.lock().unwrap().pop_front() {
            return Err(error);
        }

        Ok(BackendTranslation {
            translated_text: format!("[{}] {}", target, text),
            source_language: source.to_string(),
            confidence: 0.9,
            model_tier: ModelTier::Standard,
            processing_time_ms: self.delay.as_millis() as u64,
            from_cache: false,
            degraded: false,
        })
    }

    async fn detect_language(&self, _text: &str) -> TranslationResult<DetectedLanguage> {
        self.detections.fetch_add(1, Ordering::SeqCst);
        Ok(DetectedLanguage {
            language: self.detected_language.clone(),
            confidence: 0.99,
        })
    }

    async fn ensure_connected(&self) -> TranslationResult<()> {
        Ok(())
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// 测试配置构建器
pub struct TestConfigBuilder {
    config: OrchestratorConfig,
}

impl TestConfigBuilder {
    /// 短批次超时、短退避、仅内存缓存
    pub fn new() -> Self {
        let mut config = OrchestratorConfig::default();
        config.scheduler.batch_size = 16;
        config.scheduler.batch_timeout_ms = 20;
        config.scheduler.retry_backoff_ms = 20;
        config.scheduler.max_retries = 3;
        config.scheduler.max_concurrency = 4;
        config.backend.request_timeout_ms = 2_000;
        config.cache = CacheConfig::memory_only(256);
        Self { config }
    }

    pub fn batch(mut self, size: usize, timeout_ms: u64) -> Self {
        self.config.scheduler.batch_size = size;
        self.config.scheduler.batch_timeout_ms = timeout_ms;
        self
    }

    pub fn concurrency(mut self, workers: usize) -> Self {
        self.config.scheduler.max_concurrency = workers;
        self
    }

    pub fn retries(mut self, max_retries: u32, backoff_ms: u64) -> Self {
        self.config.scheduler.max_retries = max_retries;
        self.config.scheduler.retry_backoff_ms = backoff_ms;
        self
    }

    pub fn max_pending(mut self, capacity: usize) -> Self {
        self.config.scheduler.max_pending_tasks = capacity;
        self
    }

    pub fn cache(mut self, cache: CacheConfig) -> Self {
        self.config.cache = cache;
        self
    }

    pub fn without_fallback(mut self) -> Self {
        self.config.backend.fallback_enabled = false;
        self
    }

    pub fn build(self) -> OrchestratorConfig {
        self.config
    }
}

/// 用模拟后端启动服务
pub fn start_service(config: OrchestratorConfig, backend: Arc<ScriptedBackend>) -> TranslationService {
    let backend: Arc<dyn TranslationBackend> = backend;
    TranslationService::new(config, backend).expect("service should start")
}

/// 参与者名单：(用户, 系统语言)
pub fn roster(members: &[(&str, &str)]) -> Vec<ParticipantLanguagePreference> {
    members
        .iter()
        .map(|(user, language)| ParticipantLanguagePreference::new(user, language))
        .collect()
}

/// 收集 `count` 个投递事件，超时则返回已收到的部分
pub async fn collect_events(
    events: &mut broadcast::Receiver<DeliveryEvent>,
    count: usize,
    timeout: Duration,
) -> Vec<DeliveryEvent> {
    let mut received = Vec::new();
    let deadline = tokio::time::Instant::now() + timeout;
    while received.len() < count {
        match tokio::time::timeout_at(deadline, events.recv()).await {
            Ok(Ok(event)) => received.push(event),
            _ => break,
        }
    }
    received
}

/// 等待条件成立
pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

pub const WAIT: Duration = Duration::from_secs(5);
