use dashmap::DashMap;
use joule_core::common::UserId;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

type LockTable = DashMap<UserId, Arc<Mutex<()>>>;

/// # Summary
/// 按用户划分的写锁注册表。
///
/// # Invariants
/// - 同一 `UserId` 在有人持有或等待时始终映射到同一把互斥锁，所有写操作因此严格串行。
/// - 不同用户持有不同的锁，彼此之间没有全局竞争点。
/// - 锁以 `UserGuard` 形式交出，可随任务一起移动，任意退出路径 (含 panic、取消) 都会释放。
/// - 最后一个持有者释放时条目被移除，表的大小只取决于当前活跃的用户数。
#[derive(Default)]
pub struct UserLocks {
    locks: Arc<LockTable>,
}

/// 某个用户的写锁，析构时释放并在无人等待时回收条目
pub struct UserGuard {
    user_id: UserId,
    table: Arc<LockTable>,
    _guard: OwnedMutexGuard<()>,
}

impl Drop for UserGuard {
    fn drop(&mut self) {
        // 表里一份、本 guard 一份；多出来的引用都是正在等待的 acquire
        self.table
            .remove_if(&self.user_id, |_, lock| Arc::strong_count(lock) <= 2);
    }
}

impl UserLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// # Logic
    /// 取出 (或首次插入) 用户对应的锁，在 DashMap 分片锁释放之后再异步等待，
    /// 等待期间不阻塞其他用户。
    pub async fn acquire(&self, user_id: UserId) -> UserGuard {
        let lock = self
            .locks
            .entry(user_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone();
        UserGuard {
            user_id,
            table: self.locks.clone(),
            _guard: lock.lock_owned().await,
        }
    }

    /// 当前有人持有或等待的用户数
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
