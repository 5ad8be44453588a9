//! 行元组与领域实体之间的转换。金额与电量以 TEXT 落盘，时间以毫秒整数落盘。

use chrono::{DateTime, Utc};
use joule_core::common::time::from_millis;
use joule_core::common::{Resolution, TradeId, UserId};
use joule_core::store::entity::{Battery, Portfolio, User};
use joule_core::store::error::StoreError;
use joule_core::trade::entity::{Trade, TradeKind, TradeStatus};
use rust_decimal::Decimal;
use std::str::FromStr;

pub(crate) type UserRow = (i64, String, String, String, bool, i64);
pub(crate) type BatteryRow = (i64, i64, String, String, String, String, String, i64, i64);
pub(crate) type PortfolioRow = (i64, i64, String, String, i64, i64);
pub(crate) type TradeRow = (
    i64,
    i64,
    String,
    String,
    Option<String>,
    String,
    i64,
    Option<i64>,
    i64,
    i64,
    String,
);

pub(crate) const USER_COLUMNS: &str = "id, email, name, credential_hash, is_active, created_at";
pub(crate) const BATTERY_COLUMNS: &str = "id, user_id, current_level, capacity, max_charge_rate, max_discharge_rate, efficiency, created_at, updated_at";
pub(crate) const PORTFOLIO_COLUMNS: &str =
    "id, user_id, balance, profit_loss, created_at, updated_at";
pub(crate) const TRADE_COLUMNS: &str = "id, user_id, type, quantity, price, status, execution_time, executed_at, created_at, resolution, market";

/// 将 sqlx 错误映射为存储层错误，唯一约束与外键冲突单独归类。
pub(crate) fn db_err(e: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &e {
        if db.is_unique_violation() {
            return StoreError::Conflict(db.message().to_string());
        }
        if db.is_foreign_key_violation() {
            return StoreError::NotFound(db.message().to_string());
        }
    }
    StoreError::Database(e.to_string())
}

pub(crate) fn decimal(raw: &str, field: &str) -> Result<Decimal, StoreError> {
    Decimal::from_str(raw)
        .map_err(|e| StoreError::Database(format!("corrupt {} '{}': {}", field, raw, e)))
}

pub(crate) fn timestamp(ms: i64, field: &str) -> Result<DateTime<Utc>, StoreError> {
    from_millis(ms).ok_or_else(|| StoreError::Database(format!("corrupt {}: {}", field, ms)))
}

pub(crate) fn user(r: UserRow) -> Result<User, StoreError> {
    Ok(User {
        id: UserId(r.0),
        email: r.1,
        name: r.2,
        credential_hash: r.3,
        is_active: r.4,
        created_at: timestamp(r.5, "created_at")?,
    })
}

pub(crate) fn battery(r: BatteryRow) -> Result<Battery, StoreError> {
    Ok(Battery {
        id: r.0,
        user_id: UserId(r.1),
        current_level: decimal(&r.2, "current_level")?,
        capacity: decimal(&r.3, "capacity")?,
        max_charge_rate: decimal(&r.4, "max_charge_rate")?,
        max_discharge_rate: decimal(&r.5, "max_discharge_rate")?,
        efficiency: decimal(&r.6, "efficiency")?,
        created_at: timestamp(r.7, "created_at")?,
        updated_at: timestamp(r.8, "updated_at")?,
    })
}

pub(crate) fn portfolio(r: PortfolioRow) -> Result<Portfolio, StoreError> {
    Ok(Portfolio {
        id: r.0,
        user_id: UserId(r.1),
        balance: decimal(&r.2, "balance")?,
        profit_loss: decimal(&r.3, "profit_loss")?,
        created_at: timestamp(r.4, "created_at")?,
        updated_at: timestamp(r.5, "updated_at")?,
    })
}

pub(crate) fn trade(r: TradeRow) -> Result<Trade, StoreError> {
    Ok(Trade {
        id: TradeId(r.0),
        user_id: UserId(r.1),
        kind: TradeKind::from_str(&r.2).map_err(StoreError::Database)?,
        quantity: decimal(&r.3, "quantity")?,
        price: r.4.as_deref().map(|p| decimal(p, "price")).transpose()?,
        status: TradeStatus::from_str(&r.5).map_err(StoreError::Database)?,
        execution_time: timestamp(r.6, "execution_time")?,
        executed_at: r.7.map(|t| timestamp(t, "executed_at")).transpose()?,
        created_at: timestamp(r.8, "created_at")?,
        resolution: Resolution::try_from(r.9).map_err(StoreError::Database)?,
        market: r.10,
    })
}
