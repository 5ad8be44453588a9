use thiserror::Error;

/// # Summary
/// 存储层错误枚举，处理数据库连接、读写失败与唯一性冲突。
///
/// # Invariants
/// - 必须通过 `thiserror` 派生 `Error` trait。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// 数据库操作失败
    #[error("Database error: {0}")]
    Database(String),
    /// 记录未找到
    #[error("Not found: {0}")]
    NotFound(String),
    /// 唯一约束或状态前置条件冲突 (如邮箱重复、流水已离开 pending)
    #[error("Conflict: {0}")]
    Conflict(String),
    /// 初始化存储失败
    #[error("Initialization error: {0}")]
    InitError(String),
}
