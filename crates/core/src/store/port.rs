use super::entity::{Battery, BatterySpec, NewUser, Portfolio, User};
use super::error::StoreError;
use crate::common::{TradeId, UserId};
use crate::trade::entity::{NewTrade, Trade};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

/// # Summary
/// 一次结算中对流水表的写入动作。
#[derive(Debug, Clone)]
pub enum TradeWrite {
    /// 追加一条新的已成交流水
    Append(NewTrade),
    /// 将一条 pending 流水迁移为 executed
    Execute {
        trade_id: TradeId,
        price: Decimal,
        executed_at: DateTime<Utc>,
    },
}

/// 资金账户的增量变动
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PortfolioDelta {
    pub balance: Decimal,
    pub profit_loss: Decimal,
}

impl PortfolioDelta {
    /// 把增量叠加到资金账户上，任一字段溢出时返回 `None`
    pub fn apply(&self, portfolio: &Portfolio, at: DateTime<Utc>) -> Option<Portfolio> {
        Some(Portfolio {
            balance: portfolio.balance.checked_add(self.balance)?,
            profit_loss: portfolio.profit_loss.checked_add(self.profit_loss)?,
            updated_at: at,
            ..portfolio.clone()
        })
    }
}

/// # Summary
/// 结算引擎提交给持久层的原子写集合。
///
/// # Invariants
/// - 电池电量、流水与资金账户三者要么全部生效，要么全部不生效。
#[derive(Debug, Clone)]
pub struct SettlementWrite {
    pub user_id: UserId,
    pub battery_level: Decimal,
    pub trade: TradeWrite,
    // 充放电没有资金变动
    pub portfolio: Option<PortfolioDelta>,
    pub updated_at: DateTime<Utc>,
}

/// 持久层对结算写集合的回执
#[derive(Debug, Clone)]
pub struct SettlementReceipt {
    pub battery: Battery,
    pub trade: Trade,
    pub portfolio: Option<Portfolio>,
}

/// # Summary
/// 账本存储接口：用户、电池、资产组合与成交流水的唯一事实来源。
///
/// # Invariants
/// - 实现者必须保证 `ensure_*` 的"不存在才插入"语义在并发下只产生一行。
/// - `apply_settlement` 必须是原子的。
#[async_trait]
pub trait LedgerStore: Send + Sync {
    // --- 用户域 ---

    /// # Summary
    /// 注册用户，并在同一原子单元内创建其资产组合。
    ///
    /// # Returns
    /// 邮箱重复时返回 `StoreError::Conflict`。
    async fn create_user(&self, user: &NewUser, initial_balance: Decimal)
    -> Result<User, StoreError>;

    async fn get_user(&self, id: UserId) -> Result<Option<User>, StoreError>;

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;

    // --- 电池域 ---

    async fn get_battery(&self, user_id: UserId) -> Result<Option<Battery>, StoreError>;

    /// # Summary
    /// 不存在才插入，并返回最终持久化的那一行。
    ///
    /// # Logic
    /// 依赖 `user_id` 唯一约束做条件插入，失败方回读已存在的记录。
    async fn ensure_battery(&self, user_id: UserId, spec: &BatterySpec)
    -> Result<Battery, StoreError>;

    /// # Summary
    /// 直接覆写电量，仅用于结算失败后的补偿回滚。
    async fn set_battery_level(
        &self,
        user_id: UserId,
        level: Decimal,
        updated_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    // --- 资金域 ---

    async fn get_portfolio(&self, user_id: UserId) -> Result<Option<Portfolio>, StoreError>;

    /// 不存在才插入资产组合
    async fn ensure_portfolio(
        &self,
        user_id: UserId,
        initial_balance: Decimal,
    ) -> Result<Portfolio, StoreError>;

    // --- 流水域 ---

    /// 写入一条新流水 (用于计划单)，返回带 id 的流水
    async fn insert_trade(&self, trade: &NewTrade) -> Result<Trade, StoreError>;

    async fn get_trade(&self, id: TradeId) -> Result<Option<Trade>, StoreError>;

    /// # Summary
    /// 将 pending 流水迁移为 cancelled。
    ///
    /// # Returns
    /// 流水已处于终态时返回 `StoreError::Conflict`。
    async fn cancel_trade(&self, id: TradeId) -> Result<Trade, StoreError>;

    /// # Summary
    /// 按计划执行时间降序返回用户流水，可选时间区间 `[start, end]`。
    async fn list_trades(
        &self,
        user_id: UserId,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<Trade>, StoreError>;

    // --- 结算 ---

    /// # Summary
    /// 原子地应用一次结算：电量、流水、资金账户。
    ///
    /// # Logic
    /// 1. 覆写电池电量。
    /// 2. 追加流水，或将 pending 流水迁移为 executed。
    /// 3. 按增量调整资金账户。
    /// 任一步失败则整体回滚。
    async fn apply_settlement(&self, write: &SettlementWrite)
    -> Result<SettlementReceipt, StoreError>;
}
