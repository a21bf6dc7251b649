//! 翻译后端适配器
//!
//! `TranslationBackend` 抽象远程翻译RPC；`HttpBackend` 是基于 reqwest 的实现，
//! 复用一个长连接客户端并在连接断开后按需重连；`BackendAdapter` 在任意后端外
//! 加上单次调用超时、调用统计和降级回退。

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::fallback::LocalApproximation;
use crate::translation::config::BackendConfig;
use crate::translation::error::{TranslationError, TranslationResult};
use crate::translation::model::{normalize_language, ModelTier};

// ============================================================================
// 后端抽象
// ============================================================================

/// 后端翻译结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendTranslation {
    pub translated_text: String,
    pub source_language: String,
    pub confidence: f32,
    pub model_tier: ModelTier,
    pub processing_time_ms: u64,
    pub from_cache: bool,
    /// 本地近似结果（后端不可达）
    pub degraded: bool,
}

/// 语言检测结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedLanguage {
    pub language: String,
    pub confidence: f32,
}

/// 远程翻译后端
#[async_trait]
pub trait TranslationBackend: Send + Sync {
    async fn translate(
        &self,
        text: &str,
        source: &str,
        target: &str,
    ) -> TranslationResult<BackendTranslation>;

    async fn detect_language(&self, text: &str) -> TranslationResult<DetectedLanguage>;

    /// 连接断开后按需重连
    async fn ensure_connected(&self) -> TranslationResult<()>;

    fn name(&self) -> &str;
}

// ============================================================================
// HTTP 后端
// ============================================================================

#[derive(Debug, Serialize)]
struct TranslateRequest<'a> {
    text: &'a str,
    source_lang: &'a str,
    target_lang: &'a str,
}

#[derive(Debug, Deserialize)]
struct TranslateResponse {
    translated_text: String,
    #[serde(default)]
    detected_source_lang: Option<String>,
    #[serde(default)]
    confidence: Option<f32>,
    #[serde(default)]
    model_tier: Option<ModelTier>,
}

#[derive(Debug, Serialize)]
struct DetectRequest<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct DetectResponse {
    language: String,
    #[serde(default)]
    confidence: Option<f32>,
}

/// 基于 HTTP/JSON 的翻译后端
pub struct HttpBackend {
    base_url: String,
    connect_timeout: Duration,
    request_timeout: Duration,
    client: RwLock<reqwest::Client>,
    connected: AtomicBool,
}

impl HttpBackend {
    pub fn new(config: &BackendConfig) -> TranslationResult<Self> {
        let connect_timeout = config.connect_timeout();
        let request_timeout = config.request_timeout();
        let client = Self::build_client(connect_timeout, request_timeout)?;

        Ok(Self {
            base_url: config.api_url.trim_end_matches('/').to_string(),
            connect_timeout,
            request_timeout,
            client: RwLock::new(client),
            connected: AtomicBool::new(false),
        })
    }

    fn build_client(connect_timeout: Duration, request_timeout: Duration) -> TranslationResult<reqwest::Client> {
        reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| TranslationError::Config(format!("创建HTTP客户端失败: {}", e)))
    }

    fn client(&self) -> reqwest::Client {
        self.client.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    /// 传输层错误后标记为断开，下次调用前重连
    fn on_transport_error(&self, error: reqwest::Error) -> TranslationError {
        if error.is_connect() || error.is_timeout() || error.is_request() {
            self.connected.store(false, Ordering::Relaxed);
        }
        TranslationError::from(error)
    }

    async fn check_status(response: reqwest::Response) -> TranslationResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = format!("HTTP {}: {}", status.as_u16(), body.trim());
        match status.as_u16() {
            400 | 422 => Err(TranslationError::Validation(message)),
            _ => Err(TranslationError::Backend(message)),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl TranslationBackend for HttpBackend {
    async fn translate(
        &self,
        text: &str,
        source: &str,
        target: &str,
    ) -> TranslationResult<BackendTranslation> {
        let started = Instant::now();
        let request = TranslateRequest {
            text,
            source_lang: source,
            target_lang: target,
        };

        let response = self
            .client()
            .post(self.endpoint("translate"))
            .json(&request)
            .send()
            .await
            .map_err(|e| self.on_transport_error(e))?;
        let response = Self::check_status(response).await?;
        let body: TranslateResponse = response.json().await?;

        Ok(BackendTranslation {
            translated_text: body.translated_text,
            source_language: normalize_language(body.detected_source_lang.as_deref().unwrap_or(source)),
            confidence: body.confidence.unwrap_or(0.9).clamp(0.0, 1.0),
            model_tier: body.model_tier.unwrap_or_default(),
            processing_time_ms: started.elapsed().as_millis() as u64,
            from_cache: false,
            degraded: false,
        })
    }

    async fn detect_language(&self, text: &str) -> TranslationResult<DetectedLanguage> {
        let response = self
            .client()
            .post(self.endpoint("detect"))
            .json(&DetectRequest { text })
            .send()
            .await
            .map_err(|e| self.on_transport_error(e))?;
        let response = Self::check_status(response).await?;
        let body: DetectResponse = response.json().await?;

        Ok(DetectedLanguage {
            language: normalize_language(&body.language),
            confidence: body.confidence.unwrap_or(0.5).clamp(0.0, 1.0),
        })
    }

    async fn ensure_connected(&self) -> TranslationResult<()> {
        if self.is_connected() {
            return Ok(());
        }

        // 重建客户端，丢弃可能已失效的连接池
        let client = Self::build_client(self.connect_timeout, self.request_timeout)?;
        *self.client.write().unwrap_or_else(PoisonError::into_inner) = client.clone();

        let response = client
            .get(self.endpoint("health"))
            .timeout(self.connect_timeout)
            .send()
            .await
            .map_err(TranslationError::from)?;
        Self::check_status(response).await?;

        self.connected.store(true, Ordering::Relaxed);
        tracing::info!("已连接翻译后端: {}", self.base_url);
        Ok(())
    }

    fn name(&self) -> &str {
        &self.base_url
    }
}

// ============================================================================
// 适配器
// ============================================================================

/// 后端调用统计
#[derive(Debug, Default)]
pub struct BackendStats {
    pub calls: AtomicU64,
    pub successes: AtomicU64,
    pub failures: AtomicU64,
    pub timeouts: AtomicU64,
    pub fallbacks: AtomicU64,
    pub detections: AtomicU64,
}

/// 后端调用统计快照
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BackendStatsSnapshot {
    pub calls: u64,
    pub successes: u64,
    pub failures: u64,
    pub timeouts: u64,
    pub fallbacks: u64,
    pub detections: u64,
}

impl BackendStats {
    pub fn snapshot(&self) -> BackendStatsSnapshot {
        BackendStatsSnapshot {
            calls: self.calls.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            fallbacks: self.fallbacks.load(Ordering::Relaxed),
            detections: self.detections.load(Ordering::Relaxed),
        }
    }
}

/// 后端适配器：超时、统计与降级
pub struct BackendAdapter {
    backend: Arc<dyn TranslationBackend>,
    call_timeout: Duration,
    fallback_enabled: bool,
    reachable: AtomicBool,
    stats: BackendStats,
}

impl BackendAdapter {
    pub fn new(backend: Arc<dyn TranslationBackend>, call_timeout: Duration, fallback_enabled: bool) -> Self {
        Self {
            backend,
            call_timeout,
            fallback_enabled,
            reachable: AtomicBool::new(true),
            stats: BackendStats::default(),
        }
    }

    pub fn from_config(backend: Arc<dyn TranslationBackend>, config: &BackendConfig) -> Self {
        Self::new(backend, config.request_timeout(), config.fallback_enabled)
    }

    /// 翻译，暂时性错误原样返回供调度器重试
    pub async fn translate(
        &self,
        text: &str,
        source: &str,
        target: &str,
    ) -> TranslationResult<BackendTranslation> {
        if text.trim().is_empty() {
            return Err(TranslationError::Validation("待翻译内容为空".to_string()));
        }

        self.stats.calls.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("parley_backend_calls_total").increment(1);
        let started = Instant::now();

        let call = async {
            self.backend.ensure_connected().await?;
            self.backend.translate(text, source, target).await
        };

        match tokio::time::timeout(self.call_timeout, call).await {
            Ok(Ok(mut translation)) => {
                self.stats.successes.fetch_add(1, Ordering::Relaxed);
                self.reachable.store(true, Ordering::Relaxed);
                translation.processing_time_ms = started.elapsed().as_millis() as u64;
                Ok(translation)
            }
            Ok(Err(error)) => {
                self.stats.failures.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("parley_backend_failures_total").increment(1);
                if error.is_transient_backend() {
                    self.reachable.store(false, Ordering::Relaxed);
                }
                tracing::debug!("后端 {} 翻译失败 ({} -> {}): {}", self.backend.name(), source, target, error);
                Err(error)
            }
            Err(_) => {
                self.stats.failures.fetch_add(1, Ordering::Relaxed);
                self.stats.timeouts.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("parley_backend_failures_total").increment(1);
                self.reachable.store(false, Ordering::Relaxed);
                Err(TranslationError::Timeout(format!(
                    "后端调用超过 {}ms",
                    self.call_timeout.as_millis()
                )))
            }
        }
    }

    /// 翻译，后端不可达时返回标记为降级的本地近似结果
    pub async fn translate_or_fallback(
        &self,
        text: &str,
        source: &str,
        target: &str,
    ) -> TranslationResult<BackendTranslation> {
        let started = Instant::now();
        match self.translate(text, source, target).await {
            Ok(translation) => Ok(translation),
            Err(error) if error.is_transient_backend() && self.fallback_enabled => {
                self.stats.fallbacks.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("parley_backend_fallbacks_total").increment(1);
                tracing::warn!("降级模式：后端不可达，使用本地近似结果 ({} -> {}): {}", source, target, error);
                Ok(LocalApproximation::approximate(text, source, started))
            }
            Err(error) => Err(error),
        }
    }

    /// 语言检测，后端失败时总是回退到本地文字系统检测
    pub async fn detect_language(&self, text: &str) -> DetectedLanguage {
        self.stats.detections.fetch_add(1, Ordering::Relaxed);

        let call = async {
            self.backend.ensure_connected().await?;
            self.backend.detect_language(text).await
        };

        match tokio::time::timeout(self.call_timeout, call).await {
            Ok(Ok(detected)) => {
                self.reachable.store(true, Ordering::Relaxed);
                detected
            }
            Ok(Err(error)) => {
                tracing::warn!("语言检测失败，使用本地检测: {}", error);
                if error.is_transient_backend() {
                    self.reachable.store(false, Ordering::Relaxed);
                }
                LocalApproximation::detect_script(text)
            }
            Err(_) => {
                tracing::warn!("语言检测超时，使用本地检测");
                self.stats.timeouts.fetch_add(1, Ordering::Relaxed);
                self.reachable.store(false, Ordering::Relaxed);
                LocalApproximation::detect_script(text)
            }
        }
    }

    /// 最近一次调用时后端是否可达
    pub fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> BackendStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }
}
