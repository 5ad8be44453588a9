use crate::config::{StoreConfig, open_pool};
use crate::row::{db_err, decimal};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use joule_core::common::time::to_millis;
use joule_core::market::entity::RecordedPrice;
use joule_core::market::port::MarketPriceStore;
use joule_core::store::error::StoreError;
use rust_decimal::Decimal;
use sqlx::SqlitePool;

/// 市场数据库文件名
const MARKET_DB: &str = "market.db";

/// MarketPriceStore 的 SQLite 实现。
///
/// # Summary
/// 以 `(market, period_start, resolution)` 为主键保存各交割时段的收盘价。
///
/// # Invariants
/// * `period_end` 冗余存储，使"时间点落在哪个时段"可以直接用区间条件查询。
pub struct SqliteMarketStore {
    pool: SqlitePool,
}

impl SqliteMarketStore {
    /// 打开市场数据库并初始化 `market_prices` 表。
    pub async fn open(config: &StoreConfig) -> Result<Self, StoreError> {
        let pool = open_pool(config, MARKET_DB).await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS market_prices (
                market TEXT NOT NULL,
                period_start INTEGER NOT NULL,
                period_end INTEGER NOT NULL,
                resolution INTEGER NOT NULL,
                price TEXT NOT NULL,
                PRIMARY KEY (market, period_start, resolution)
            );
            "#,
        )
        .execute(&pool)
        .await
        .map_err(|e| StoreError::InitError(e.to_string()))?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl MarketPriceStore for SqliteMarketStore {
    /// # Logic
    /// `INSERT OR REPLACE`，同一时段重复记录时以最后一次为准。
    async fn record_price(&self, price: &RecordedPrice) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT OR REPLACE INTO market_prices (market, period_start, period_end, resolution, price) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&price.market)
        .bind(to_millis(price.period_start))
        .bind(to_millis(price.period_end()))
        .bind(price.resolution.minutes())
        .bind(price.price.to_string())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn recorded_price(
        &self,
        market: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<Decimal>, StoreError> {
        let at = to_millis(at);
        let price: Option<(String,)> = sqlx::query_as(
            "SELECT price FROM market_prices WHERE market = ? AND period_start <= ? AND period_end > ? ORDER BY period_start DESC LIMIT 1",
        )
        .bind(market)
        .bind(at)
        .bind(at)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        price.map(|(raw,)| decimal(&raw, "price")).transpose()
    }
}
