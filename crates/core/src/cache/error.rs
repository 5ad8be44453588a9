use thiserror::Error;

/// # Summary
/// 缓存条目编解码错误，携带出错的键便于排查。
///
/// # Invariants
/// - 缓存错误从不影响结算正确性，调用方只记录日志并回退到持久层。
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("cannot encode cache entry '{key}': {reason}")]
    Encode { key: String, reason: String },
    #[error("cannot decode cache entry '{key}': {reason}")]
    Decode { key: String, reason: String },
}
