use async_trait::async_trait;
use dashmap::DashMap;
use joule_core::cache::error::CacheError;
use joule_core::cache::port::Cache;
use std::time::{Duration, Instant};

struct Entry {
    value: Vec<u8>,
    // None 表示永不过期
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|t| now >= t)
    }
}

/// # Summary
/// 基于 DashMap 的内存缓存实现，支持按条目过期。
///
/// # Invariants
/// - 所有操作均通过并发哈希表 `DashMap` 执行，保证多线程安全。
/// - 过期条目在读取时惰性清除，不启动后台清理任务。
pub struct MemCache {
    storage: DashMap<String, Entry>,
}

impl MemCache {
    pub fn new() -> Self {
        Self {
            storage: DashMap::new(),
        }
    }

    /// 当前保存的条目数 (含尚未被惰性清除的过期条目)
    pub fn len(&self) -> usize {
        self.storage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }
}

impl Default for MemCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Cache for MemCache {
    async fn set_raw(&self, key: &str, value: Vec<u8>) -> Result<(), CacheError> {
        self.storage.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn set_raw_for(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let expires_at = Instant::now().checked_add(ttl);
        self.storage.insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    /// # Logic
    /// 命中过期条目时原子移除并返回 None。
    async fn get_raw(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let now = Instant::now();
        if let Some(entry) = self.storage.get(key) {
            if !entry.is_expired(now) {
                return Ok(Some(entry.value.clone()));
            }
        }
        // 读守卫已释放，这里再移除，避免同分片死锁
        self.storage.remove_if(key, |_, e| e.is_expired(now));
        Ok(None)
    }

    async fn del(&self, key: &str) -> Result<(), CacheError> {
        self.storage.remove(key);
        Ok(())
    }
}
