//! redb 持久缓存层
//!
//! 第1层（设备级，按总字节数限制）和第2层（共享，按条目数和存活时间限制）
//! 都使用同一个实现，只是容量约束不同。所有方法都是阻塞的，
//! 调用方需要在 `spawn_blocking` 或专用写线程中使用。
//!
//! 除条目表外还维护一张访问顺序表（访问序号 -> 键），淘汰时从最小序号弹出，
//! 不需要扫描整张条目表。

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use redb::{Database, ReadableTable, ReadableTableMetadata, Table, TableDefinition};
use serde::{Deserialize, Serialize};

use super::cache::{CacheEntry, CacheTier};
use crate::translation::error::{TranslationError, TranslationResult};

const ENTRIES: TableDefinition<&str, &[u8]> = TableDefinition::new("translations");
const ACCESS_ORDER: TableDefinition<u64, &str> = TableDefinition::new("access_order");

type EntryTable<'txn> = Table<'txn, &'static str, &'static [u8]>;
type OrderTable<'txn> = Table<'txn, u64, &'static str>;

/// 容量约束
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurableBound {
    MaxBytes(u64),
    MaxEntries(usize),
}

impl DurableBound {
    fn exceeded(self, total_bytes: u64, entries: u64) -> bool {
        match self {
            DurableBound::MaxBytes(max) => total_bytes > max,
            DurableBound::MaxEntries(max) => entries > max as u64,
        }
    }
}

/// 持久化记录（JSON编码）
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredRecord {
    entry: CacheEntry,
    access_seq: u64,
}

fn storage_error<E: Into<redb::Error>>(error: E) -> TranslationError {
    let error: redb::Error = error.into();
    TranslationError::from(error)
}

/// 记录占用的近似字节数
fn record_size(key: &str, entry: &CacheEntry) -> u64 {
    (key.len() + entry.translated_content.len() + entry.key.len()) as u64
}

fn decode(raw: &[u8]) -> TranslationResult<StoredRecord> {
    Ok(serde_json::from_slice(raw)?)
}

/// 写状态，由写锁保护
#[derive(Debug, Default)]
struct WriteState {
    total_bytes: u64,
    next_seq: u64,
}

impl WriteState {
    fn take_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }
}

/// redb 持久层
pub struct DurableTier {
    tier: CacheTier,
    db: Database,
    bound: DurableBound,
    /// 超过存活时间的条目读取时按未命中处理
    max_age: Option<Duration>,
    /// 所有写事务都在持锁期间完成
    state: Mutex<WriteState>,
}

impl DurableTier {
    /// 打开或创建数据库文件
    pub fn open(path: &Path, tier: CacheTier, bound: DurableBound) -> TranslationResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let db = Database::create(path).map_err(storage_error)?;
        let state = Self::recover(&db)?;

        tracing::info!(
            "打开持久缓存层 {:?}: {} ({} 字节)",
            tier,
            path.display(),
            state.total_bytes
        );

        Ok(Self {
            tier,
            db,
            bound,
            max_age: None,
            state: Mutex::new(state),
        })
    }

    /// 设置条目存活时间
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = (!max_age.is_zero()).then_some(max_age);
        self
    }

    /// 建表，统计字节数和最大访问序号，清掉损坏的记录和失效的索引
    fn recover(db: &Database) -> TranslationResult<WriteState> {
        let mut state = WriteState::default();
        let txn = db.begin_write().map_err(storage_error)?;
        {
            let mut entries = txn.open_table(ENTRIES).map_err(storage_error)?;
            let mut order = txn.open_table(ACCESS_ORDER).map_err(storage_error)?;

            let mut live = HashMap::new();
            let mut corrupt = Vec::new();
            for item in entries.iter().map_err(storage_error)? {
                let (key, value) = item.map_err(storage_error)?;
                let key = key.value().to_string();
                match decode(value.value()) {
                    Ok(record) => {
                        state.total_bytes += record_size(&key, &record.entry);
                        state.next_seq = state.next_seq.max(record.access_seq + 1);
                        live.insert(record.access_seq, key);
                    }
                    Err(e) => {
                        tracing::warn!("持久缓存记录损坏，已删除: {} ({})", key, e);
                        corrupt.push(key);
                    }
                }
            }
            for key in &corrupt {
                entries.remove(key.as_str()).map_err(storage_error)?;
            }

            let mut stale = Vec::new();
            for item in order.iter().map_err(storage_error)? {
                let (seq, key) = item.map_err(storage_error)?;
                let seq = seq.value();
                if live.get(&seq).map(String::as_str) != Some(key.value()) {
                    stale.push(seq);
                }
            }
            for seq in stale {
                order.remove(seq).map_err(storage_error)?;
            }
            for (seq, key) in &live {
                order.insert(*seq, key.as_str()).map_err(storage_error)?;
            }
        }
        txn.commit().map_err(storage_error)?;
        Ok(state)
    }

    fn lock_state(&self) -> MutexGuard<'_, WriteState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn tier(&self) -> CacheTier {
        self.tier
    }

    fn is_expired(&self, entry: &CacheEntry) -> bool {
        match self.max_age.and_then(|age| chrono::Duration::from_std(age).ok()) {
            Some(max_age) => entry.cached_at < Utc::now() - max_age,
            None => false,
        }
    }

    fn contains(&self, key: &str) -> TranslationResult<bool> {
        let txn = self.db.begin_read().map_err(storage_error)?;
        let table = txn.open_table(ENTRIES).map_err(storage_error)?;
        let found = table.get(key).map_err(storage_error)?.is_some();
        Ok(found)
    }

    /// 读取条目并更新访问顺序
    ///
    /// 读取和访问时间更新在同一个写事务里完成，不会覆盖并发写入的新值。
    /// 过期条目按未命中处理并当场删除。
    pub fn get(&self, key: &str) -> TranslationResult<Option<CacheEntry>> {
        if !self.contains(key)? {
            return Ok(None);
        }

        let mut state = self.lock_state();
        let txn = self.db.begin_write().map_err(storage_error)?;
        let (found, freed) = {
            let mut entries = txn.open_table(ENTRIES).map_err(storage_error)?;
            let mut order = txn.open_table(ACCESS_ORDER).map_err(storage_error)?;

            let raw = entries
                .get(key)
                .map_err(storage_error)?
                .map(|raw| raw.value().to_vec());
            match raw {
                // 两次事务之间被淘汰
                None => (None, 0),
                Some(raw) => {
                    let mut record = decode(&raw)?;
                    order.remove(record.access_seq).map_err(storage_error)?;

                    if self.is_expired(&record.entry) {
                        entries.remove(key).map_err(storage_error)?;
                        (None, record_size(key, &record.entry))
                    } else {
                        record.access_seq = state.take_seq();
                        let bytes = serde_json::to_vec(&record)?;
                        entries.insert(key, bytes.as_slice()).map_err(storage_error)?;
                        order.insert(record.access_seq, key).map_err(storage_error)?;
                        (Some(record.entry), 0)
                    }
                }
            }
        };
        txn.commit().map_err(storage_error)?;

        state.total_bytes = state.total_bytes.saturating_sub(freed);
        Ok(found)
    }

    /// 写入条目，返回因容量约束淘汰的条目数
    pub fn put(&self, key: &str, entry: &CacheEntry) -> TranslationResult<usize> {
        let mut state = self.lock_state();
        let record = StoredRecord {
            entry: entry.clone(),
            access_seq: state.take_seq(),
        };
        let bytes = serde_json::to_vec(&record)?;

        let txn = self.db.begin_write().map_err(storage_error)?;
        let (total, evicted) = {
            let mut entries = txn.open_table(ENTRIES).map_err(storage_error)?;
            let mut order = txn.open_table(ACCESS_ORDER).map_err(storage_error)?;
            let mut total = state.total_bytes;

            let previous = entries
                .insert(key, bytes.as_slice())
                .map_err(storage_error)?
                .map(|old| old.value().to_vec());
            if let Some(previous) = previous {
                if let Ok(old) = decode(&previous) {
                    order.remove(old.access_seq).map_err(storage_error)?;
                    total = total.saturating_sub(record_size(key, &old.entry));
                }
            }
            order.insert(record.access_seq, key).map_err(storage_error)?;
            total += record_size(key, entry);

            let evicted = self.evict_oldest(&mut entries, &mut order, &mut total)?;
            (total, evicted)
        };
        txn.commit().map_err(storage_error)?;

        state.total_bytes = total;
        if evicted > 0 {
            tracing::debug!("持久缓存层 {:?} 淘汰 {} 条记录", self.tier, evicted);
        }
        Ok(evicted)
    }

    /// 从访问顺序表头部弹出，直到满足容量约束
    fn evict_oldest(
        &self,
        entries: &mut EntryTable<'_>,
        order: &mut OrderTable<'_>,
        total: &mut u64,
    ) -> TranslationResult<usize> {
        let mut evicted = 0;
        while self
            .bound
            .exceeded(*total, entries.len().map_err(storage_error)?)
        {
            let popped = order
                .pop_first()
                .map_err(storage_error)?
                .map(|(seq, key)| (seq.value(), key.value().to_string()));
            let Some((seq, victim)) = popped else {
                break;
            };

            let current = entries
                .get(victim.as_str())
                .map_err(storage_error)?
                .map(|raw| raw.value().to_vec());
            let record = match current.as_deref().map(decode) {
                Some(Ok(record)) if record.access_seq == seq => record,
                // 失效的索引项
                _ => continue,
            };
            entries.remove(victim.as_str()).map_err(storage_error)?;
            *total = total.saturating_sub(record_size(&victim, &record.entry));
            evicted += 1;
        }
        Ok(evicted)
    }

    /// 删除一组条目及其访问顺序
    fn remove_many(&self, keys: &[String]) -> TranslationResult<usize> {
        if keys.is_empty() {
            return Ok(0);
        }

        let mut state = self.lock_state();
        let txn = self.db.begin_write().map_err(storage_error)?;
        let mut removed = 0;
        let mut freed = 0;
        {
            let mut entries = txn.open_table(ENTRIES).map_err(storage_error)?;
            let mut order = txn.open_table(ACCESS_ORDER).map_err(storage_error)?;
            for key in keys {
                let old = entries
                    .remove(key.as_str())
                    .map_err(storage_error)?
                    .map(|raw| raw.value().to_vec());
                if let Some(old) = old {
                    if let Ok(record) = decode(&old) {
                        order.remove(record.access_seq).map_err(storage_error)?;
                        freed += record_size(key, &record.entry);
                    }
                    removed += 1;
                }
            }
        }
        txn.commit().map_err(storage_error)?;

        state.total_bytes = state.total_bytes.saturating_sub(freed);
        Ok(removed)
    }

    /// 清理超过存活时间的条目；未设置存活时间时不做任何事
    pub fn sweep_expired(&self) -> TranslationResult<usize> {
        if self.max_age.is_none() {
            return Ok(0);
        }

        let expired: Vec<String> = {
            let txn = self.db.begin_read().map_err(storage_error)?;
            let table = txn.open_table(ENTRIES).map_err(storage_error)?;
            let mut expired = Vec::new();
            for item in table.iter().map_err(storage_error)? {
                let (key, value) = item.map_err(storage_error)?;
                let stale = decode(value.value()).map_or(true, |record| self.is_expired(&record.entry));
                if stale {
                    expired.push(key.value().to_string());
                }
            }
            expired
        };

        self.remove_many(&expired)
    }

    pub fn len(&self) -> TranslationResult<usize> {
        let txn = self.db.begin_read().map_err(storage_error)?;
        let table = txn.open_table(ENTRIES).map_err(storage_error)?;
        Ok(table.len().map_err(storage_error)? as usize)
    }

    pub fn is_empty(&self) -> TranslationResult<bool> {
        Ok(self.len()? == 0)
    }

    /// 访问顺序表的条目数，与条目表保持一致
    fn order_len(&self) -> TranslationResult<usize> {
        let txn = self.db.begin_read().map_err(storage_error)?;
        let table = txn.open_table(ACCESS_ORDER).map_err(storage_error)?;
        Ok(table.len().map_err(storage_error)? as usize)
    }

    pub fn total_bytes(&self) -> u64 {
        self.lock_state().total_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translation::model::ModelTier;
    use std::sync::Arc;

    fn entry(key: &str, text: &str) -> CacheEntry {
        CacheEntry {
            key: key.to_string(),
            translated_content: text.to_string(),
            model_tier: ModelTier::Standard,
            confidence: 0.9,
            cached_at: Utc::now(),
            tier_origin: CacheTier::Device,
        }
    }

    #[test]
    fn test_put_get_and_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("device.redb");

        {
            let tier = DurableTier::open(&path, CacheTier::Device, DurableBound::MaxBytes(1 << 20))
                .expect("open tier");
            tier.put("en:fr:abc", &entry("en:fr:abc", "Bonjour")).expect("put");
            assert_eq!(tier.len().expect("len"), 1);
        }

        let reopened = DurableTier::open(&path, CacheTier::Device, DurableBound::MaxBytes(1 << 20))
            .expect("reopen tier");
        let found = reopened.get("en:fr:abc").expect("get").expect("entry present");
        assert_eq!(found.translated_content, "Bonjour");
        assert!(reopened.total_bytes() > 0);
        assert!(reopened.get("en:fr:missing").expect("get").is_none());
    }

    #[test]
    fn test_entry_bound_evicts_least_recently_used() {
        let dir = tempfile::tempdir().expect("tempdir");
        let tier = DurableTier::open(
            &dir.path().join("shared.redb"),
            CacheTier::Shared,
            DurableBound::MaxEntries(2),
        )
        .expect("open tier");

        tier.put("k1", &entry("k1", "one")).expect("put k1");
        tier.put("k2", &entry("k2", "two")).expect("put k2");
        // 访问 k1，使 k2 成为最久未使用
        tier.get("k1").expect("touch k1");

        let evicted = tier.put("k3", &entry("k3", "three")).expect("put k3");
        assert_eq!(evicted, 1);
        assert!(tier.get("k2").expect("get k2").is_none());
        assert!(tier.get("k1").expect("get k1").is_some());
        assert!(tier.get("k3").expect("get k3").is_some());
        assert_eq!(tier.order_len().expect("order len"), 2);
    }

    #[test]
    fn test_access_order_survives_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("shared.redb");

        {
            let tier = DurableTier::open(&path, CacheTier::Shared, DurableBound::MaxEntries(2))
                .expect("open tier");
            tier.put("k1", &entry("k1", "one")).expect("put k1");
            tier.put("k2", &entry("k2", "two")).expect("put k2");
            tier.get("k1").expect("touch k1");
        }

        let tier = DurableTier::open(&path, CacheTier::Shared, DurableBound::MaxEntries(2))
            .expect("reopen tier");
        tier.put("k3", &entry("k3", "three")).expect("put k3");
        assert!(tier.get("k2").expect("get k2").is_none());
        assert!(tier.get("k1").expect("get k1").is_some());
    }

    #[test]
    fn test_byte_bound_and_age_sweep() {
        let dir = tempfile::tempdir().expect("tempdir");
        let tier = DurableTier::open(
            &dir.path().join("device.redb"),
            CacheTier::Device,
            DurableBound::MaxBytes(40),
        )
        .expect("open tier")
        .with_max_age(Duration::from_secs(86400));

        tier.put("a", &entry("a", &"x".repeat(30))).expect("put a");
        tier.put("b", &entry("b", &"y".repeat(30))).expect("put b");
        assert_eq!(tier.len().expect("len"), 1);
        assert!(tier.total_bytes() <= 40);

        let mut old = entry("c", "old");
        old.cached_at = Utc::now() - chrono::Duration::days(60);
        tier.put("c", &old).expect("put c");
        let swept = tier.sweep_expired().expect("sweep");
        assert_eq!(swept, 1);
        assert!(tier.get("c").expect("get c").is_none());
        assert_eq!(tier.order_len().expect("order len"), tier.len().expect("len"));
    }

    #[test]
    fn test_expired_entry_is_a_miss_before_sweep() {
        let dir = tempfile::tempdir().expect("tempdir");
        let tier = DurableTier::open(
            &dir.path().join("shared.redb"),
            CacheTier::Shared,
            DurableBound::MaxEntries(100),
        )
        .expect("open tier")
        .with_max_age(Duration::from_secs(3600));

        let mut stale = entry("k", "stale");
        stale.cached_at = Utc::now() - chrono::Duration::hours(2);
        tier.put("k", &stale).expect("put stale");
        tier.put("fresh", &entry("fresh", "fresh")).expect("put fresh");

        assert!(tier.get("k").expect("get stale").is_none());
        assert_eq!(tier.len().expect("len"), 1);
        assert_eq!(tier.total_bytes(), record_size("fresh", &entry("fresh", "fresh")));
        assert!(tier.get("fresh").expect("get fresh").is_some());
    }

    #[test]
    fn test_concurrent_reads_never_overwrite_newer_writes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let tier = Arc::new(
            DurableTier::open(
                &dir.path().join("device.redb"),
                CacheTier::Device,
                DurableBound::MaxBytes(1 << 20),
            )
            .expect("open tier"),
        );
        tier.put("k", &entry("k", "v0")).expect("seed");

        let reader = {
            let tier = Arc::clone(&tier);
            std::thread::spawn(move || {
                for _ in 0..200 {
                    tier.get("k").expect("get");
                }
            })
        };
        for round in 1..=50 {
            tier.put("k", &entry("k", &format!("v{}", round))).expect("put");
        }
        reader.join().expect("reader thread");

        let latest = tier.get("k").expect("get").expect("present");
        assert_eq!(latest.translated_content, "v50");
        assert_eq!(tier.total_bytes(), record_size("k", &latest));
        assert_eq!(tier.order_len().expect("order len"), 1);
    }
}
