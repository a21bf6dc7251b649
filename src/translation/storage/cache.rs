//! 分层翻译缓存
//!
//! - 第0层：进程内 LRU + TTL，同步读写，始终是权威副本
//! - 第1层：设备级 redb，按总字节数 LRU 淘汰
//! - 第2层：共享 redb，按条目数 LRU 淘汰，并定期按存活时间清理
//!
//! 读穿透逐层查找，命中后提升到更快的层；写入同步进入第0层，
//! 持久层通过有界队列交给阻塞写线程异步落盘，写失败只记录日志。

use std::fmt;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use lru::LruCache;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::durable::{DurableBound, DurableTier};
use crate::translation::config::CacheConfig;
use crate::translation::error::{TranslationError, TranslationResult};
use crate::translation::model::{content_hash, normalize_language, ModelTier};

// ============================================================================
// 核心类型
// ============================================================================

/// 缓存层级
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheTier {
    Memory,
    Device,
    Shared,
}

impl CacheTier {
    pub fn index(self) -> usize {
        match self {
            CacheTier::Memory => 0,
            CacheTier::Device => 1,
            CacheTier::Shared => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CacheTier::Memory => "memory",
            CacheTier::Device => "device",
            CacheTier::Shared => "shared",
        }
    }
}

/// 键的区分部分：内容哈希或消息ID
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum KeySubject {
    Content(String),
    Message(String),
}

/// 缓存键：`sourceLang:targetLang:<blake3(content) | msg-<messageId>>`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    source_language: String,
    target_language: String,
    subject: KeySubject,
}

impl CacheKey {
    /// 基于内容哈希的键，不同消息的相同内容共享翻译
    pub fn for_content(source_language: &str, target_language: &str, content: &str) -> Self {
        Self {
            source_language: normalize_language(source_language),
            target_language: normalize_language(target_language),
            subject: KeySubject::Content(content_hash(content)),
        }
    }

    /// 基于消息ID的键
    pub fn for_message(source_language: &str, target_language: &str, message_id: &str) -> Self {
        Self {
            source_language: normalize_language(source_language),
            target_language: normalize_language(target_language),
            subject: KeySubject::Message(message_id.to_string()),
        }
    }

    pub fn target_language(&self) -> &str {
        &self.target_language
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.subject {
            KeySubject::Content(hash) => {
                write!(f, "{}:{}:{}", self.source_language, self.target_language, hash)
            }
            KeySubject::Message(id) => {
                write!(f, "{}:{}:msg-{}", self.source_language, self.target_language, id)
            }
        }
    }
}

/// 缓存条目
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub translated_content: String,
    pub model_tier: ModelTier,
    pub confidence: f32,
    pub cached_at: DateTime<Utc>,
    /// 返回该条目的层级
    pub tier_origin: CacheTier,
}

impl CacheEntry {
    pub fn new(key: &CacheKey, translated_content: &str, model_tier: ModelTier, confidence: f32) -> Self {
        Self {
            key: key.to_string(),
            translated_content: translated_content.to_string(),
            model_tier,
            confidence,
            cached_at: Utc::now(),
            tier_origin: CacheTier::Memory,
        }
    }

    fn served_from(mut self, tier: CacheTier) -> Self {
        self.tier_origin = tier;
        self
    }
}

/// 缓存统计信息
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub tier_hits: [u64; 3],
    pub misses: u64,
    pub total_requests: u64,
    pub writes: u64,
    pub write_errors: u64,
    pub evictions: u64,
    pub memory_entries: usize,
}

impl CacheStats {
    pub fn total_hits(&self) -> u64 {
        self.tier_hits.iter().sum()
    }

    pub fn hit_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.total_hits() as f64 / self.total_requests as f64
        }
    }
}

#[derive(Debug, Default)]
struct CacheCounters {
    tier_hits: [AtomicU64; 3],
    misses: AtomicU64,
    total_requests: AtomicU64,
    writes: AtomicU64,
    write_errors: AtomicU64,
    evictions: AtomicU64,
}

impl CacheCounters {
    fn record_hit(&self, tier: CacheTier) {
        self.tier_hits[tier.index()].fetch_add(1, Ordering::Relaxed);
        metrics::counter!("parley_cache_hits_total", "tier" => tier.as_str()).increment(1);
    }

    fn record_write_error(&self, error: &TranslationError) {
        self.write_errors.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("parley_cache_write_errors_total").increment(1);
        tracing::warn!("缓存写入失败（降级，不影响内存缓存）: {}", error);
    }
}

/// 持久化队列操作
enum PersistOp {
    Write {
        key: String,
        entry: CacheEntry,
        device_only: bool,
    },
    Sweep,
    Flush(oneshot::Sender<()>),
    Shutdown(oneshot::Sender<()>),
}

struct MemorySlot {
    entry: CacheEntry,
    inserted_at: Instant,
}

// ============================================================================
// 分层缓存
// ============================================================================

/// 分层缓存
pub struct HierarchicalCache {
    memory: Mutex<LruCache<String, MemorySlot>>,
    ttl: Duration,
    device: Option<Arc<DurableTier>>,
    shared: Option<Arc<DurableTier>>,
    persist_tx: Option<mpsc::Sender<PersistOp>>,
    writer: Mutex<Option<JoinHandle<()>>>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
    counters: Arc<CacheCounters>,
}

impl HierarchicalCache {
    /// 仅内存缓存，不需要运行时
    pub fn in_memory(capacity: usize, ttl: Duration) -> Self {
        Self {
            memory: Mutex::new(LruCache::new(Self::capacity(capacity))),
            ttl,
            device: None,
            shared: None,
            persist_tx: None,
            writer: Mutex::new(None),
            sweeper: Mutex::new(None),
            counters: Arc::new(CacheCounters::default()),
        }
    }

    /// 按配置打开缓存
    ///
    /// 配置了持久层路径时会启动写线程和清理任务，必须在 Tokio 运行时中调用。
    pub fn open(config: &CacheConfig) -> TranslationResult<Self> {
        let mut cache = Self::in_memory(config.memory_capacity, config.memory_ttl());
        if !config.has_durable_tiers() {
            return Ok(cache);
        }

        cache.device = match &config.device_store_path {
            Some(path) => Some(Arc::new(DurableTier::open(
                path,
                CacheTier::Device,
                DurableBound::MaxBytes(config.device_max_bytes),
            )?)),
            None => None,
        };
        cache.shared = match &config.shared_store_path {
            Some(path) => Some(Arc::new(DurableTier::open(
                path,
                CacheTier::Shared,
                DurableBound::MaxEntries(config.shared_max_entries),
            )?
            .with_max_age(config.shared_max_age()))),
            None => None,
        };

        let (tx, rx) = mpsc::channel(config.persist_queue_capacity.max(1));
        let writer = {
            let device = cache.device.clone();
            let shared = cache.shared.clone();
            let counters = Arc::clone(&cache.counters);
            tokio::task::spawn_blocking(move || run_writer(rx, device, shared, counters))
        };
        cache.writer = Mutex::new(Some(writer));

        if cache.shared.is_some() && !config.sweep_interval().is_zero() {
            let sweep_tx = tx.clone();
            let interval = config.sweep_interval();
            let sweeper = tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    if sweep_tx.send(PersistOp::Sweep).await.is_err() {
                        break;
                    }
                }
            });
            cache.sweeper = Mutex::new(Some(sweeper));
        }

        cache.persist_tx = Some(tx);
        Ok(cache)
    }

    fn capacity(capacity: usize) -> NonZeroUsize {
        NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN)
    }

    fn lock_memory(&self) -> std::sync::MutexGuard<'_, LruCache<String, MemorySlot>> {
        self.memory.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 读穿透查找
    pub async fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.counters.total_requests.fetch_add(1, Ordering::Relaxed);
        let key = key.to_string();

        if let Some(entry) = self.memory_get(&key) {
            self.counters.record_hit(CacheTier::Memory);
            return Some(entry.served_from(CacheTier::Memory));
        }

        if let Some(device) = &self.device {
            if let Some(entry) = read_tier(device, &key).await {
                self.counters.record_hit(CacheTier::Device);
                self.memory_put(&key, entry.clone());
                return Some(entry.served_from(CacheTier::Device));
            }
        }

        if let Some(shared) = &self.shared {
            if let Some(entry) = read_tier(shared, &key).await {
                self.counters.record_hit(CacheTier::Shared);
                self.memory_put(&key, entry.clone());
                if self.device.is_some() {
                    self.enqueue(PersistOp::Write {
                        key: key.clone(),
                        entry: entry.clone(),
                        device_only: true,
                    });
                }
                return Some(entry.served_from(CacheTier::Shared));
            }
        }

        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// 写穿透：同步写入内存层，异步持久化
    pub fn set(&self, key: &CacheKey, entry: CacheEntry) {
        let key = key.to_string();
        self.counters.writes.fetch_add(1, Ordering::Relaxed);
        self.memory_put(&key, entry.clone());

        if self.persist_tx.is_some() {
            self.enqueue(PersistOp::Write {
                key,
                entry,
                device_only: false,
            });
        }
    }

    fn enqueue(&self, op: PersistOp) {
        let Some(tx) = &self.persist_tx else {
            return;
        };
        if let Err(e) = tx.try_send(op) {
            let reason = match e {
                mpsc::error::TrySendError::Full(_) => "持久化队列已满",
                mpsc::error::TrySendError::Closed(_) => "持久化写线程已停止",
            };
            self.counters
                .record_write_error(&TranslationError::CacheWrite(reason.to_string()));
        }
    }

    fn memory_get(&self, key: &str) -> Option<CacheEntry> {
        let mut memory = self.lock_memory();
        let expired = match memory.get(key) {
            Some(slot) if slot.inserted_at.elapsed() <= self.ttl => return Some(slot.entry.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            memory.pop(key);
        }
        None
    }

    fn memory_put(&self, key: &str, entry: CacheEntry) {
        let slot = MemorySlot {
            entry: entry.served_from(CacheTier::Memory),
            inserted_at: Instant::now(),
        };
        let mut memory = self.lock_memory();
        if let Some((evicted_key, _)) = memory.push(key.to_string(), slot) {
            if evicted_key != key {
                self.counters.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// 清空内存层（持久层不受影响）
    pub fn clear_memory(&self) {
        self.lock_memory().clear();
    }

    /// 等待持久化队列中已有的写入完成
    pub async fn flush(&self) -> TranslationResult<()> {
        let Some(tx) = &self.persist_tx else {
            return Ok(());
        };
        let (done_tx, done_rx) = oneshot::channel();
        tx.send(PersistOp::Flush(done_tx))
            .await
            .map_err(|_| TranslationError::ChannelClosed("持久化写线程已停止".to_string()))?;
        done_rx
            .await
            .map_err(|_| TranslationError::ChannelClosed("持久化写线程已停止".to_string()))
    }

    /// 立即执行一次第2层存活时间清理
    pub async fn sweep_now(&self) -> TranslationResult<()> {
        if let Some(tx) = &self.persist_tx {
            tx.send(PersistOp::Sweep)
                .await
                .map_err(|_| TranslationError::ChannelClosed("持久化写线程已停止".to_string()))?;
        }
        self.flush().await
    }

    /// 停止清理任务并等待写线程落盘退出
    pub async fn close(&self) -> TranslationResult<()> {
        if let Some(sweeper) = self.sweeper.lock().unwrap_or_else(PoisonError::into_inner).take() {
            sweeper.abort();
        }

        let Some(tx) = &self.persist_tx else {
            return Ok(());
        };
        let (done_tx, done_rx) = oneshot::channel();
        if tx.send(PersistOp::Shutdown(done_tx)).await.is_ok() {
            let _ = done_rx.await;
        }

        let writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(writer) = writer {
            writer
                .await
                .map_err(|e| TranslationError::Internal(format!("持久化写线程异常退出: {}", e)))?;
        }
        Ok(())
    }

    /// 统计快照
    pub fn stats(&self) -> CacheStats {
        let counters = &self.counters;
        CacheStats {
            tier_hits: [
                counters.tier_hits[0].load(Ordering::Relaxed),
                counters.tier_hits[1].load(Ordering::Relaxed),
                counters.tier_hits[2].load(Ordering::Relaxed),
            ],
            misses: counters.misses.load(Ordering::Relaxed),
            total_requests: counters.total_requests.load(Ordering::Relaxed),
            writes: counters.writes.load(Ordering::Relaxed),
            write_errors: counters.write_errors.load(Ordering::Relaxed),
            evictions: counters.evictions.load(Ordering::Relaxed),
            memory_entries: self.lock_memory().len(),
        }
    }

    pub fn has_durable_tiers(&self) -> bool {
        self.device.is_some() || self.shared.is_some()
    }
}

impl Drop for HierarchicalCache {
    fn drop(&mut self) {
        let sweeper = self.sweeper.get_mut().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(sweeper) = sweeper {
            sweeper.abort();
        }
    }
}

/// 在阻塞线程池中读取持久层，错误按未命中处理
async fn read_tier(tier: &Arc<DurableTier>, key: &str) -> Option<CacheEntry> {
    let tier = Arc::clone(tier);
    let key = key.to_string();
    let tier_name = tier.tier();

    match tokio::task::spawn_blocking(move || tier.get(&key)).await {
        Ok(Ok(entry)) => entry,
        Ok(Err(e)) => {
            tracing::warn!("读取持久缓存层 {:?} 失败: {}", tier_name, e);
            None
        }
        Err(e) => {
            tracing::warn!("持久缓存读取任务异常: {}", e);
            None
        }
    }
}

/// 阻塞写线程主循环
fn run_writer(
    mut rx: mpsc::Receiver<PersistOp>,
    device: Option<Arc<DurableTier>>,
    shared: Option<Arc<DurableTier>>,
    counters: Arc<CacheCounters>,
) {
    tracing::debug!("持久缓存写线程启动");

    while let Some(op) = rx.blocking_recv() {
        match op {
            PersistOp::Write {
                key,
                entry,
                device_only,
            } => {
                let targets = [
                    device.as_ref(),
                    if device_only { None } else { shared.as_ref() },
                ];
                for tier in targets.into_iter().flatten() {
                    match tier.put(&key, &entry) {
                        Ok(evicted) => {
                            counters.evictions.fetch_add(evicted as u64, Ordering::Relaxed);
                        }
                        Err(e) => counters.record_write_error(
                            &TranslationError::CacheWrite(e.to_string())
                                .with_context(tier.tier().as_str()),
                        ),
                    }
                }
            }
            PersistOp::Sweep => {
                if let Some(shared) = &shared {
                    match shared.sweep_expired() {
                        Ok(0) => {}
                        Ok(swept) => {
                            counters.evictions.fetch_add(swept as u64, Ordering::Relaxed);
                            tracing::info!("共享缓存层清理过期条目: {}", swept);
                        }
                        Err(e) => tracing::warn!("共享缓存层清理失败: {}", e),
                    }
                }
            }
            PersistOp::Flush(done) => {
                let _ = done.send(());
            }
            PersistOp::Shutdown(done) => {
                let _ = done.send(());
                break;
            }
        }
    }

    tracing::debug!("持久缓存写线程退出");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry_for(key: &CacheKey, text: &str) -> CacheEntry {
        CacheEntry::new(key, text, ModelTier::Standard, 0.92)
    }

    #[test]
    fn test_key_rendering() {
        let by_message = CacheKey::for_message("EN", "fr", "42");
        assert_eq!(by_message.to_string(), "en:fr:msg-42");

        let by_content = CacheKey::for_content("en", "fr", "Hello world");
        let rendered = by_content.to_string();
        assert!(rendered.starts_with("en:fr:"));
        assert_eq!(rendered.len(), "en:fr:".len() + 64);
        assert_eq!(by_content, CacheKey::for_content("en", "FR", "Hello world"));
    }

    #[tokio::test]
    async fn test_memory_round_trip() {
        let cache = HierarchicalCache::in_memory(10, Duration::from_secs(60));
        let key = CacheKey::for_content("en", "fr", "Hello");

        assert!(cache.get(&key).await.is_none());
        cache.set(&key, entry_for(&key, "Bonjour"));

        let hit = cache.get(&key).await.expect("memory hit");
        assert_eq!(hit.translated_content, "Bonjour");
        assert_eq!(hit.tier_origin, CacheTier::Memory);

        let stats = cache.stats();
        assert_eq!(stats.tier_hits, [1, 0, 0]);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.total_requests, 2);
        assert_eq!(stats.writes, 1);
    }

    #[tokio::test]
    async fn test_memory_ttl_expiry() {
        let cache = HierarchicalCache::in_memory(10, Duration::from_millis(10));
        let key = CacheKey::for_content("en", "es", "Hello");
        cache.set(&key, entry_for(&key, "Hola"));

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(cache.get(&key).await.is_none());
        assert_eq!(cache.stats().memory_entries, 0);
    }

    #[tokio::test]
    async fn test_memory_lru_eviction_counted() {
        let cache = HierarchicalCache::in_memory(2, Duration::from_secs(60));
        for text in ["one", "two", "three"] {
            let key = CacheKey::for_content("en", "de", text);
            cache.set(&key, entry_for(&key, text));
        }

        let stats = cache.stats();
        assert_eq!(stats.evictions, 1);
        assert_eq!(stats.memory_entries, 2);
        assert!(cache
            .get(&CacheKey::for_content("en", "de", "one"))
            .await
            .is_none());
    }
}
