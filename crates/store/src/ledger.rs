use crate::config::{StoreConfig, open_pool};
use crate::row::{
    self, BATTERY_COLUMNS, BatteryRow, PORTFOLIO_COLUMNS, PortfolioRow, TRADE_COLUMNS, TradeRow,
    USER_COLUMNS, UserRow, db_err,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use joule_core::common::time::to_millis;
use joule_core::common::{TradeId, UserId};
use joule_core::store::entity::{Battery, BatterySpec, NewUser, Portfolio, User};
use joule_core::store::error::StoreError;
use joule_core::store::port::{LedgerStore, SettlementReceipt, SettlementWrite, TradeWrite};
use joule_core::trade::entity::{NewTrade, Trade};
use rust_decimal::Decimal;
use sqlx::{Sqlite, SqlitePool, Transaction};
use tracing::{debug, info};

/// 账本数据库文件名
const LEDGER_DB: &str = "ledger.db";

/// LedgerStore 的 SQLite 实现。
///
/// # Summary
/// 在单个 SQLite 数据库 (`ledger.db`) 中管理用户、电池、资产组合与成交流水。
///
/// # Invariants
/// * `batteries.user_id` 与 `portfolios.user_id` 唯一，懒创建依赖该约束做条件插入。
/// * 结算写入在一个事务内完成，首条语句即为写语句，以便在 WAL 下排队拿写锁。
pub struct SqliteLedgerStore {
    pool: SqlitePool,
}

impl SqliteLedgerStore {
    /// 打开账本数据库并初始化表结构。
    ///
    /// # Logic
    /// 1. 按 `StoreConfig` 打开 `ledger.db` 连接池。
    /// 2. 执行 DDL 建表与索引。
    pub async fn open(config: &StoreConfig) -> Result<Self, StoreError> {
        let pool = open_pool(config, LEDGER_DB).await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                email TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL,
                credential_hash TEXT NOT NULL,
                is_active INTEGER NOT NULL,
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS batteries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL UNIQUE REFERENCES users(id),
                current_level TEXT NOT NULL,
                capacity TEXT NOT NULL,
                max_charge_rate TEXT NOT NULL,
                max_discharge_rate TEXT NOT NULL,
                efficiency TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS portfolios (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL UNIQUE REFERENCES users(id),
                balance TEXT NOT NULL,
                profit_loss TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS trades (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL REFERENCES users(id),
                type TEXT NOT NULL,
                quantity TEXT NOT NULL,
                price TEXT,
                status TEXT NOT NULL,
                execution_time INTEGER NOT NULL,
                executed_at INTEGER,
                created_at INTEGER NOT NULL,
                resolution INTEGER NOT NULL,
                market TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_trades_user_time ON trades (user_id, execution_time);
            "#,
        )
        .execute(&pool)
        .await
        .map_err(|e| StoreError::InitError(e.to_string()))?;

        Ok(Self { pool })
    }

    async fn select_battery(
        tx: &mut Transaction<'_, Sqlite>,
        user_id: UserId,
    ) -> Result<Battery, StoreError> {
        let sql = format!("SELECT {} FROM batteries WHERE user_id = ?", BATTERY_COLUMNS);
        let r = sqlx::query_as::<_, BatteryRow>(&sql)
            .bind(user_id.0)
            .fetch_optional(&mut **tx)
            .await
            .map_err(db_err)?
            .ok_or_else(|| StoreError::NotFound(format!("battery of user {}", user_id)))?;
        row::battery(r)
    }

    async fn select_trade(
        tx: &mut Transaction<'_, Sqlite>,
        id: TradeId,
    ) -> Result<Option<Trade>, StoreError> {
        let sql = format!("SELECT {} FROM trades WHERE id = ?", TRADE_COLUMNS);
        sqlx::query_as::<_, TradeRow>(&sql)
            .bind(id.0)
            .fetch_optional(&mut **tx)
            .await
            .map_err(db_err)?
            .map(row::trade)
            .transpose()
    }

    async fn insert_trade_in(
        tx: &mut Transaction<'_, Sqlite>,
        trade: &NewTrade,
    ) -> Result<Trade, StoreError> {
        let result = sqlx::query(
            "INSERT INTO trades (user_id, type, quantity, price, status, execution_time, executed_at, created_at, resolution, market) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(trade.user_id.0)
        .bind(trade.kind.as_str())
        .bind(trade.quantity.to_string())
        .bind(trade.price.map(|p| p.to_string()))
        .bind(trade.status.as_str())
        .bind(to_millis(trade.execution_time))
        .bind(trade.executed_at.map(to_millis))
        .bind(to_millis(trade.created_at))
        .bind(trade.resolution.minutes())
        .bind(&trade.market)
        .execute(&mut **tx)
        .await
        .map_err(db_err)?;

        // 回读以获得与落盘精度一致的时间字段
        let id = TradeId(result.last_insert_rowid());
        Self::select_trade(tx, id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("trade {}", id)))
    }
}

#[async_trait]
impl LedgerStore for SqliteLedgerStore {
    /// # Logic
    /// 同一事务内写入 `users` 与 `portfolios`，邮箱唯一约束冲突映射为 `Conflict`。
    async fn create_user(
        &self,
        user: &NewUser,
        initial_balance: Decimal,
    ) -> Result<User, StoreError> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let result = sqlx::query(
            "INSERT INTO users (email, name, credential_hash, is_active, created_at) VALUES (?, ?, ?, 1, ?)",
        )
        .bind(&user.email)
        .bind(&user.name)
        .bind(&user.credential_hash)
        .bind(to_millis(now))
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;
        let id = result.last_insert_rowid();

        sqlx::query(
            "INSERT INTO portfolios (user_id, balance, profit_loss, created_at, updated_at) VALUES (?, ?, '0', ?, ?)",
        )
        .bind(id)
        .bind(initial_balance.to_string())
        .bind(to_millis(now))
        .bind(to_millis(now))
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        info!("Registered user {} <{}>", id, user.email);

        Ok(User {
            id: UserId(id),
            email: user.email.clone(),
            name: user.name.clone(),
            credential_hash: user.credential_hash.clone(),
            is_active: true,
            created_at: row::timestamp(to_millis(now), "created_at")?,
        })
    }

    async fn get_user(&self, id: UserId) -> Result<Option<User>, StoreError> {
        let sql = format!("SELECT {} FROM users WHERE id = ?", USER_COLUMNS);
        sqlx::query_as::<_, UserRow>(&sql)
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .map(row::user)
            .transpose()
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let sql = format!("SELECT {} FROM users WHERE email = ?", USER_COLUMNS);
        sqlx::query_as::<_, UserRow>(&sql)
            .bind(email)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .map(row::user)
            .transpose()
    }

    async fn get_battery(&self, user_id: UserId) -> Result<Option<Battery>, StoreError> {
        let sql = format!("SELECT {} FROM batteries WHERE user_id = ?", BATTERY_COLUMNS);
        sqlx::query_as::<_, BatteryRow>(&sql)
            .bind(user_id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .map(row::battery)
            .transpose()
    }

    /// # Logic
    /// `INSERT OR IGNORE` 借助唯一约束完成条件插入，随后回读。
    /// 并发首访时只有一方真正插入，另一方读到同一行。
    async fn ensure_battery(
        &self,
        user_id: UserId,
        spec: &BatterySpec,
    ) -> Result<Battery, StoreError> {
        let now = to_millis(Utc::now());
        let result = sqlx::query(
            "INSERT OR IGNORE INTO batteries (user_id, current_level, capacity, max_charge_rate, max_discharge_rate, efficiency, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(user_id.0)
        .bind(spec.initial_level.to_string())
        .bind(spec.capacity.to_string())
        .bind(spec.max_charge_rate.to_string())
        .bind(spec.max_discharge_rate.to_string())
        .bind(spec.efficiency.to_string())
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 1 {
            info!("Created battery for user {}", user_id);
        }

        self.get_battery(user_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("battery of user {}", user_id)))
    }

    async fn set_battery_level(
        &self,
        user_id: UserId,
        level: Decimal,
        updated_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let result =
            sqlx::query("UPDATE batteries SET current_level = ?, updated_at = ? WHERE user_id = ?")
                .bind(level.to_string())
                .bind(to_millis(updated_at))
                .bind(user_id.0)
                .execute(&self.pool)
                .await
                .map_err(db_err)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("battery of user {}", user_id)));
        }
        Ok(())
    }

    async fn get_portfolio(&self, user_id: UserId) -> Result<Option<Portfolio>, StoreError> {
        let sql = format!("SELECT {} FROM portfolios WHERE user_id = ?", PORTFOLIO_COLUMNS);
        sqlx::query_as::<_, PortfolioRow>(&sql)
            .bind(user_id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .map(row::portfolio)
            .transpose()
    }

    async fn ensure_portfolio(
        &self,
        user_id: UserId,
        initial_balance: Decimal,
    ) -> Result<Portfolio, StoreError> {
        let now = to_millis(Utc::now());
        let result = sqlx::query(
            "INSERT OR IGNORE INTO portfolios (user_id, balance, profit_loss, created_at, updated_at) VALUES (?, ?, '0', ?, ?)",
        )
        .bind(user_id.0)
        .bind(initial_balance.to_string())
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 1 {
            info!("Created portfolio for user {}", user_id);
        }

        self.get_portfolio(user_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("portfolio of user {}", user_id)))
    }

    async fn insert_trade(&self, trade: &NewTrade) -> Result<Trade, StoreError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let trade = Self::insert_trade_in(&mut tx, trade).await?;
        tx.commit().await.map_err(db_err)?;
        Ok(trade)
    }

    async fn get_trade(&self, id: TradeId) -> Result<Option<Trade>, StoreError> {
        let sql = format!("SELECT {} FROM trades WHERE id = ?", TRADE_COLUMNS);
        sqlx::query_as::<_, TradeRow>(&sql)
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .map(row::trade)
            .transpose()
    }

    async fn cancel_trade(&self, id: TradeId) -> Result<Trade, StoreError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let result =
            sqlx::query("UPDATE trades SET status = 'cancelled' WHERE id = ? AND status = 'pending'")
                .bind(id.0)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;

        let trade = Self::select_trade(&mut tx, id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("trade {}", id)))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict(format!(
                "trade {} is already {}",
                id, trade.status
            )));
        }

        tx.commit().await.map_err(db_err)?;
        Ok(trade)
    }

    async fn list_trades(
        &self,
        user_id: UserId,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<Trade>, StoreError> {
        let start = start.map(to_millis);
        let end = end.map(to_millis);
        let sql = format!(
            "SELECT {} FROM trades WHERE user_id = ? \
             AND (? IS NULL OR execution_time >= ?) \
             AND (? IS NULL OR execution_time <= ?) \
             ORDER BY execution_time DESC, id DESC",
            TRADE_COLUMNS
        );
        let rows = sqlx::query_as::<_, TradeRow>(&sql)
            .bind(user_id.0)
            .bind(start)
            .bind(start)
            .bind(end)
            .bind(end)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

        debug!("Loaded {} trades for user {}", rows.len(), user_id);
        rows.into_iter().map(row::trade).collect()
    }

    /// # Logic
    /// 1. 覆写电量 (首条写语句，拿到写锁)。
    /// 2. 追加流水或迁移 pending 流水；流水已离开 pending 时返回 `Conflict`。
    /// 3. 读改写资金账户，金额溢出时返回 `Conflict`。
    /// 4. 回读电池后提交。任一步出错时事务随 `tx` 析构回滚。
    async fn apply_settlement(
        &self,
        write: &SettlementWrite,
    ) -> Result<SettlementReceipt, StoreError> {
        let user_id = write.user_id;
        let updated_at = to_millis(write.updated_at);
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let result =
            sqlx::query("UPDATE batteries SET current_level = ?, updated_at = ? WHERE user_id = ?")
                .bind(write.battery_level.to_string())
                .bind(updated_at)
                .bind(user_id.0)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("battery of user {}", user_id)));
        }

        let trade = match &write.trade {
            TradeWrite::Append(new_trade) => Self::insert_trade_in(&mut tx, new_trade).await?,
            TradeWrite::Execute {
                trade_id,
                price,
                executed_at,
            } => {
                let result = sqlx::query(
                    "UPDATE trades SET status = 'executed', price = ?, executed_at = ? WHERE id = ? AND user_id = ? AND status = 'pending'",
                )
                .bind(price.to_string())
                .bind(to_millis(*executed_at))
                .bind(trade_id.0)
                .bind(user_id.0)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
                if result.rows_affected() == 0 {
                    return Err(StoreError::Conflict(format!(
                        "trade {} is no longer pending",
                        trade_id
                    )));
                }
                Self::select_trade(&mut tx, *trade_id)
                    .await?
                    .ok_or_else(|| StoreError::NotFound(format!("trade {}", trade_id)))?
            }
        };

        let portfolio = match write.portfolio {
            Some(delta) => {
                let sql = format!("SELECT {} FROM portfolios WHERE user_id = ?", PORTFOLIO_COLUMNS);
                let current = sqlx::query_as::<_, PortfolioRow>(&sql)
                    .bind(user_id.0)
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(db_err)?
                    .ok_or_else(|| StoreError::NotFound(format!("portfolio of user {}", user_id)))?;
                let portfolio = delta
                    .apply(&row::portfolio(current)?, row::timestamp(updated_at, "updated_at")?)
                    .ok_or_else(|| {
                        StoreError::Conflict(format!("portfolio of user {} would overflow", user_id))
                    })?;

                sqlx::query(
                    "UPDATE portfolios SET balance = ?, profit_loss = ?, updated_at = ? WHERE user_id = ?",
                )
                .bind(portfolio.balance.to_string())
                .bind(portfolio.profit_loss.to_string())
                .bind(updated_at)
                .bind(user_id.0)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
                Some(portfolio)
            }
            None => None,
        };

        let battery = Self::select_battery(&mut tx, user_id).await?;
        tx.commit().await.map_err(db_err)?;

        Ok(SettlementReceipt {
            battery,
            trade,
            portfolio,
        })
    }
}
