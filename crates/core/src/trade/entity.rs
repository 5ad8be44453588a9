use crate::common::{Resolution, TradeId, UserId};
use crate::market::entity::PriceSource;
use crate::store::entity::{Battery, Portfolio};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 充放电流水使用的保留市场标签
pub const BATTERY_MARKET: &str = "Battery";

/// # Summary
/// 交易种类，在引擎边界上是封闭枚举。
/// 持久层以小写文本落盘 (`buy` / `sell` / `charge` / `discharge`)。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeKind {
    /// 买电，充入电池
    Buy,
    /// 卖电，从电池放出
    Sell,
    /// 纯充电，价格恒为 0
    Charge,
    /// 纯放电，价格恒为 0
    Discharge,
}

/// # Summary
/// 电池能量的流向，容量策略只关心这一点。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowDirection {
    Charge,
    Discharge,
}

impl TradeKind {
    pub fn flow(self) -> FlowDirection {
        match self {
            TradeKind::Buy | TradeKind::Charge => FlowDirection::Charge,
            TradeKind::Sell | TradeKind::Discharge => FlowDirection::Discharge,
        }
    }

    /// 是否是面向市场的买卖 (会影响资金账户)
    pub fn is_market_trade(self) -> bool {
        matches!(self, TradeKind::Buy | TradeKind::Sell)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TradeKind::Buy => "buy",
            TradeKind::Sell => "sell",
            TradeKind::Charge => "charge",
            TradeKind::Discharge => "discharge",
        }
    }
}

impl FromStr for TradeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "buy" => Ok(TradeKind::Buy),
            "sell" => Ok(TradeKind::Sell),
            "charge" => Ok(TradeKind::Charge),
            "discharge" => Ok(TradeKind::Discharge),
            _ => Err(format!("Unknown trade type: {}", s)),
        }
    }
}

impl fmt::Display for TradeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// # Summary
/// 成交流水的生命周期状态。
///
/// # Invariants
/// - `Executed` 与 `Cancelled` 为终态，不允许再次迁移。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeStatus {
    Pending,
    Executed,
    Cancelled,
}

impl TradeStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, TradeStatus::Pending)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TradeStatus::Pending => "pending",
            TradeStatus::Executed => "executed",
            TradeStatus::Cancelled => "cancelled",
        }
    }
}

impl FromStr for TradeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(TradeStatus::Pending),
            "executed" => Ok(TradeStatus::Executed),
            "cancelled" => Ok(TradeStatus::Cancelled),
            _ => Err(format!("Unknown trade status: {}", s)),
        }
    }
}

impl fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// # Summary
/// 仅追加的成交流水记录。
///
/// # Invariants
/// - `quantity > 0`。
/// - `status == Executed` 时 `price` 与 `executed_at` 非空，且
///   `executed_at >= execution_time >= created_at`。
/// - 进入终态后执行字段不可再修改。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Trade {
    pub id: TradeId,
    pub user_id: UserId,
    pub kind: TradeKind,
    // 成交量 (kWh)
    pub quantity: Decimal,
    // 成交价格，pending 状态下可能为空
    pub price: Option<Decimal>,
    pub status: TradeStatus,
    // 计划执行时间
    pub execution_time: DateTime<Utc>,
    pub executed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub resolution: Resolution,
    pub market: String,
}

impl Trade {
    /// 成交金额 = quantity × price，未定价或金额溢出时为 None
    pub fn value(&self) -> Option<Decimal> {
        self.price.and_then(|p| p.checked_mul(self.quantity))
    }
}

/// # Summary
/// 待写入的新流水，id 由持久层分配。
#[derive(Debug, Clone)]
pub struct NewTrade {
    pub user_id: UserId,
    pub kind: TradeKind,
    pub quantity: Decimal,
    pub price: Option<Decimal>,
    pub status: TradeStatus,
    pub execution_time: DateTime<Utc>,
    pub executed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub resolution: Resolution,
    pub market: String,
}

impl NewTrade {
    /// 由持久层分配的 id 补全为正式流水
    pub fn into_trade(self, id: TradeId) -> Trade {
        Trade {
            id,
            user_id: self.user_id,
            kind: self.kind,
            quantity: self.quantity,
            price: self.price,
            status: self.status,
            execution_time: self.execution_time,
            executed_at: self.executed_at,
            created_at: self.created_at,
            resolution: self.resolution,
            market: self.market,
        }
    }
}

/// # Summary
/// 请求层发往结算引擎的交易意图。
#[derive(Debug, Clone)]
pub struct TradeRequest {
    pub kind: TradeKind,
    pub quantity: Decimal,
    // 调用方指定的价格，存在时不询价
    pub price: Option<Decimal>,
    // 为空时买卖单使用默认市场；充放电始终使用 BATTERY_MARKET
    pub market: Option<String>,
    pub resolution: Resolution,
    // 仅对计划单有意义
    pub execution_time: Option<DateTime<Utc>>,
}

impl TradeRequest {
    /// # Logic
    /// 构造一笔立即执行的请求，粒度默认 60 分钟。
    pub fn new(kind: TradeKind, quantity: Decimal) -> Self {
        Self {
            kind,
            quantity,
            price: None,
            market: None,
            resolution: Resolution::default(),
            execution_time: None,
        }
    }

    pub fn with_price(mut self, price: Decimal) -> Self {
        self.price = Some(price);
        self
    }

    pub fn with_market(mut self, market: impl Into<String>) -> Self {
        self.market = Some(market.into());
        self
    }

    pub fn with_resolution(mut self, resolution: Resolution) -> Self {
        self.resolution = resolution;
        self
    }

    pub fn scheduled_at(mut self, at: DateTime<Utc>) -> Self {
        self.execution_time = Some(at);
        self
    }
}

/// # Summary
/// 电池状态及派生能量字段。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatteryStatus {
    pub battery: Battery,
    pub current_energy: Decimal,
    pub remaining_capacity: Decimal,
}

impl From<Battery> for BatteryStatus {
    fn from(battery: Battery) -> Self {
        Self {
            current_energy: battery.current_energy(),
            remaining_capacity: battery.remaining_capacity(),
            battery,
        }
    }
}

/// # Summary
/// 一次结算的完整结果。
#[derive(Debug, Clone)]
pub struct TradeResult {
    pub trade: Trade,
    pub battery: BatteryStatus,
    // 充放电不影响资金账户，此时为 None
    pub portfolio: Option<Portfolio>,
    pub price_source: PriceSource,
    // quantity × price
    pub total_value: Decimal,
}

/// # Summary
/// 成交历史查询条件。
#[derive(Debug, Clone)]
pub struct TradeQuery {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub limit: usize,
    pub offset: usize,
}

impl Default for TradeQuery {
    fn default() -> Self {
        Self {
            start: None,
            end: None,
            limit: 100,
            offset: 0,
        }
    }
}

impl TradeQuery {
    /// 是否带有时间过滤 (带过滤的查询绕过缓存)
    pub fn is_filtered(&self) -> bool {
        self.start.is_some() || self.end.is_some()
    }
}

/// # Summary
/// 区间盈亏报告，只统计已成交的买卖流水。
///
/// # Invariants
/// - 成交量为 0 时均价为 0，不会发生除零。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PnlReport {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    // 区间内全部流水数
    pub total_trades: usize,
    // 其中已成交的流水数
    pub executed_trades: usize,
    pub buy_volume: Decimal,
    pub buy_cost: Decimal,
    pub sell_volume: Decimal,
    pub sell_revenue: Decimal,
    // 正数为净买入
    pub net_volume: Decimal,
    // 正数为净支出
    pub net_cost: Decimal,
    pub avg_buy_price: Decimal,
    pub avg_sell_price: Decimal,
    pub profit_loss: Decimal,
    pub profit_loss_per_unit: Decimal,
}
