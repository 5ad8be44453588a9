use joule_core::config::DatabaseConfig;
use joule_core::store::error::StoreError;
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous},
};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// # Summary
/// 存储层的连接参数，由组合根显式构造并传入，不存在进程级全局句柄。
#[derive(Debug, Clone)]
pub struct StoreConfig {
    // 数据根目录
    pub data_dir: PathBuf,
    // 每个数据库文件的连接池上限
    pub max_connections: u32,
}

impl StoreConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            max_connections: 4,
        }
    }
}

impl From<&DatabaseConfig> for StoreConfig {
    fn from(c: &DatabaseConfig) -> Self {
        Self {
            data_dir: PathBuf::from(&c.data_dir),
            max_connections: c.max_connections.max(1),
        }
    }
}

/// 打开 (必要时创建) 一个 SQLite 数据库文件并返回连接池。
///
/// # Logic
/// 1. 确保数据根目录存在。
/// 2. 开启 WAL 与 busy_timeout，写事务排队等待而不是立刻报 BUSY。
/// 3. 外键约束默认开启，电池/资金账户必须挂在已存在的用户下。
pub(crate) async fn open_pool(
    config: &StoreConfig,
    file_name: &str,
) -> Result<SqlitePool, StoreError> {
    ensure_dir(&config.data_dir)?;
    let options = SqliteConnectOptions::new()
        .filename(config.data_dir.join(file_name))
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_secs(10));

    SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .connect_with(options)
        .await
        .map_err(|e| StoreError::InitError(e.to_string()))
}

fn ensure_dir(path: &Path) -> Result<(), StoreError> {
    if !path.exists() {
        std::fs::create_dir_all(path)
            .map_err(|e| StoreError::InitError(format!("Failed to create data dir: {}", e)))?;
    }
    Ok(())
}
