use super::entity::{
    BatteryStatus, PnlReport, Trade, TradeKind, TradeQuery, TradeRequest, TradeResult, TradeStatus,
};
use crate::common::{TradeId, UserId};
use crate::store::entity::Portfolio;
use crate::store::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

/// # Summary
/// 结算与查询环节中可能发生的错误。调用方可按种类分支处理。
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TradeError {
    #[error("请求参数非法: {0}")]
    InvalidInput(String),
    #[error("电池剩余容量不足. 请求: {requested} kWh, 可充入: {available} kWh")]
    InsufficientCapacity {
        requested: Decimal,
        available: Decimal,
    },
    #[error("电池存量不足. 请求: {requested} kWh, 可放出: {available} kWh")]
    InsufficientEnergy {
        requested: Decimal,
        available: Decimal,
    },
    #[error("实体不存在: {0}")]
    EntityNotFound(String),
    #[error("流水 {trade_id} 已处于 {status} 状态，不允许该操作")]
    InvalidTradeStatus {
        trade_id: TradeId,
        status: TradeStatus,
    },
    #[error("结算失败，未留下部分写入，请重新发起整笔操作: {0}")]
    SettlementFailed(String),
    #[error("存储读取失败: {0}")]
    Storage(#[from] StoreError),
}

impl TradeError {
    /// 只有结算失败允许调用方整体重试
    pub fn is_retryable(&self) -> bool {
        matches!(self, TradeError::SettlementFailed(_))
    }
}

/// # Summary
/// 结算引擎对请求层暴露的端口。
/// 请求层完成身份认证后，以已认证的 `UserId` 调用此端口。
///
/// # Invariants
/// - 同一用户的所有写操作严格串行；不同用户之间完全并行。
/// - 被拒绝的请求 (参数、容量、存量) 不产生任何副作用。
#[async_trait]
pub trait SettlementPort: Send + Sync {
    /// # Summary
    /// 立即执行一笔交易。
    ///
    /// # Logic
    /// 容量校验 → 询价 → 电池、流水、资金账户原子写入。
    ///
    /// # Returns
    /// * `Ok(TradeResult)` - 成交流水与写入后的电池/资金快照
    /// * `Err(TradeError)` - 参数非法、容量/存量不足或结算失败
    async fn execute_trade(
        &self,
        user_id: UserId,
        request: TradeRequest,
    ) -> Result<TradeResult, TradeError>;

    /// 记录一笔计划单 (pending)，不触碰电池和资金
    async fn schedule_trade(&self, user_id: UserId, request: TradeRequest)
    -> Result<Trade, TradeError>;

    /// 结算一笔 pending 计划单，只会生效一次
    async fn settle_trade(&self, user_id: UserId, trade_id: TradeId)
    -> Result<TradeResult, TradeError>;

    /// 撤销一笔 pending 计划单
    async fn cancel_trade(&self, user_id: UserId, trade_id: TradeId) -> Result<Trade, TradeError>;

    /// 查询电池状态 (不存在时懒创建)
    async fn battery_status(&self, user_id: UserId) -> Result<BatteryStatus, TradeError>;

    /// 查询资金账户 (不存在时懒创建)
    async fn portfolio(&self, user_id: UserId) -> Result<Portfolio, TradeError>;

    async fn buy(
        &self,
        user_id: UserId,
        quantity: Decimal,
        price: Option<Decimal>,
    ) -> Result<TradeResult, TradeError> {
        let mut request = TradeRequest::new(TradeKind::Buy, quantity);
        request.price = price;
        self.execute_trade(user_id, request).await
    }

    async fn sell(
        &self,
        user_id: UserId,
        quantity: Decimal,
        price: Option<Decimal>,
    ) -> Result<TradeResult, TradeError> {
        let mut request = TradeRequest::new(TradeKind::Sell, quantity);
        request.price = price;
        self.execute_trade(user_id, request).await
    }

    async fn charge(&self, user_id: UserId, quantity: Decimal) -> Result<TradeResult, TradeError> {
        self.execute_trade(user_id, TradeRequest::new(TradeKind::Charge, quantity))
            .await
    }

    async fn discharge(
        &self,
        user_id: UserId,
        quantity: Decimal,
    ) -> Result<TradeResult, TradeError> {
        self.execute_trade(user_id, TradeRequest::new(TradeKind::Discharge, quantity))
            .await
    }
}

/// # Summary
/// 账本只读查询端口。
#[async_trait]
pub trait LedgerQueryPort: Send + Sync {
    /// # Summary
    /// 按计划执行时间降序分页返回用户流水。
    ///
    /// # Invariants
    /// - 带时间过滤的查询不读取缓存。
    async fn list_trades(&self, user_id: UserId, query: TradeQuery)
    -> Result<Vec<Trade>, TradeError>;

    /// 单笔流水，归属其他用户时视为不存在
    async fn get_trade(&self, user_id: UserId, trade_id: TradeId) -> Result<Trade, TradeError>;

    /// 计算 `[start, end]` 内已成交买卖流水的盈亏
    async fn compute_pnl(
        &self,
        user_id: UserId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<PnlReport, TradeError>;
}
