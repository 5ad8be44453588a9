use crate::lock::UserLocks;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use joule_core::cache::port::{Cache, CacheExt};
use joule_core::common::{TradeId, UserId};
use joule_core::store::port::LedgerStore;
use joule_core::trade::entity::{PnlReport, Trade, TradeKind, TradeQuery, TradeStatus};
use joule_core::trade::port::{LedgerQueryPort, TradeError};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// 用户全量流水在缓存中的键
pub fn trades_cache_key(user_id: UserId) -> String {
    format!("trades:user:{}", user_id)
}

/// # Summary
/// 账本只读查询服务，实现 `LedgerQueryPort`。
///
/// # Invariants
/// - 只有不带时间过滤的全量列表会读写缓存，带过滤的查询直接访问持久层。
/// - 回填缓存在用户写锁内完成，与结算引擎的 "提交 + 失效" 互斥，旧列表不会覆盖失效。
/// - 缓存读写失败只降级为直查持久层，不影响查询结果。
pub struct LedgerQueryService {
    store: Arc<dyn LedgerStore>,
    cache: Option<TradesCache>,
}

struct TradesCache {
    cache: Arc<dyn Cache>,
    ttl: Duration,
    locks: Arc<UserLocks>,
}

impl LedgerQueryService {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store, cache: None }
    }

    /// 挂载流水缓存与条目存活时长。
    ///
    /// `locks` 必须是结算引擎的同一份注册表 (`SettlementEngine::locks`)，
    /// 否则回填可能与引擎的失效交错。
    pub fn with_cache(mut self, cache: Arc<dyn Cache>, ttl: Duration, locks: Arc<UserLocks>) -> Self {
        self.cache = Some(TradesCache { cache, ttl, locks });
        self
    }

    /// # Logic
    /// 1. 先查缓存，命中直接返回。
    /// 2. 未命中 (或缓存故障) 时持有用户写锁读取持久层并回填。
    async fn all_trades(&self, user_id: UserId) -> Result<Vec<Trade>, TradeError> {
        let Some(TradesCache { cache, ttl, locks }) = &self.cache else {
            return Ok(self.store.list_trades(user_id, None, None).await?);
        };

        let key = trades_cache_key(user_id);
        match cache.get::<Vec<Trade>>(&key).await {
            Ok(Some(trades)) => {
                debug!("Trades cache hit for user {}", user_id);
                return Ok(trades);
            }
            Ok(None) => debug!("Trades cache miss for user {}", user_id),
            Err(e) => warn!("Trades cache read failed for user {}: {}", user_id, e),
        }

        let _guard = locks.acquire(user_id).await;
        let trades = self.store.list_trades(user_id, None, None).await?;
        if let Err(e) = cache.set_for(&key, &trades, *ttl).await {
            warn!("Trades cache write failed for user {}: {}", user_id, e);
        }
        Ok(trades)
    }
}

fn check_range(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Result<(), TradeError> {
    match (start, end) {
        (Some(s), Some(e)) if s > e => Err(TradeError::InvalidInput(format!(
            "start {} is after end {}",
            s, e
        ))),
        _ => Ok(()),
    }
}

fn overflow(what: &str) -> TradeError {
    TradeError::InvalidInput(format!("{} overflows the P&L report", what))
}

fn add(total: Decimal, amount: Decimal, what: &str) -> Result<Decimal, TradeError> {
    total.checked_add(amount).ok_or_else(|| overflow(what))
}

fn sub(lhs: Decimal, rhs: Decimal, what: &str) -> Result<Decimal, TradeError> {
    lhs.checked_sub(rhs).ok_or_else(|| overflow(what))
}

fn average(total: Decimal, volume: Decimal, what: &str) -> Result<Decimal, TradeError> {
    if volume.is_zero() {
        return Ok(Decimal::ZERO);
    }
    total.checked_div(volume).ok_or_else(|| overflow(what))
}

/// # Summary
/// 对区间内的流水计算盈亏报告。
///
/// # Logic
/// 只累计已成交的买卖流水；金额类指标四舍五入到两位小数，成交量保持原值。
/// 任何累加或均价溢出都返回 `InvalidInput`。
pub fn summarize(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    trades: &[Trade],
) -> Result<PnlReport, TradeError> {
    let mut executed_trades = 0;
    let mut buy_volume = Decimal::ZERO;
    let mut buy_cost = Decimal::ZERO;
    let mut sell_volume = Decimal::ZERO;
    let mut sell_revenue = Decimal::ZERO;

    for trade in trades.iter().filter(|t| t.status == TradeStatus::Executed) {
        executed_trades += 1;
        let value = match trade.price {
            Some(_) => trade
                .value()
                .ok_or_else(|| overflow(&format!("value of trade {}", trade.id)))?,
            None => Decimal::ZERO,
        };
        match trade.kind {
            TradeKind::Buy => {
                buy_volume = add(buy_volume, trade.quantity, "buy volume")?;
                buy_cost = add(buy_cost, value, "buy cost")?;
            }
            TradeKind::Sell => {
                sell_volume = add(sell_volume, trade.quantity, "sell volume")?;
                sell_revenue = add(sell_revenue, value, "sell revenue")?;
            }
            TradeKind::Charge | TradeKind::Discharge => {}
        }
    }

    let profit_loss = sub(sell_revenue, buy_cost, "profit/loss")?;
    let total_volume = add(buy_volume, sell_volume, "total volume")?;
    Ok(PnlReport {
        start,
        end,
        total_trades: trades.len(),
        executed_trades,
        buy_volume,
        buy_cost: buy_cost.round_dp(2),
        sell_volume,
        sell_revenue: sell_revenue.round_dp(2),
        net_volume: sub(buy_volume, sell_volume, "net volume")?,
        net_cost: sub(buy_cost, sell_revenue, "net cost")?.round_dp(2),
        avg_buy_price: average(buy_cost, buy_volume, "average buy price")?.round_dp(2),
        avg_sell_price: average(sell_revenue, sell_volume, "average sell price")?.round_dp(2),
        profit_loss: profit_loss.round_dp(2),
        profit_loss_per_unit: average(profit_loss, total_volume, "profit/loss per unit")?
            .round_dp(2),
    })
}

#[async_trait]
impl LedgerQueryPort for LedgerQueryService {
    /// # Logic
    /// 1. 校验分页与时间区间。
    /// 2. 无过滤时走缓存，有过滤时直查持久层。
    /// 3. 在过滤结果上做内存分页 (已按计划执行时间降序)。
    async fn list_trades(
        &self,
        user_id: UserId,
        query: TradeQuery,
    ) -> Result<Vec<Trade>, TradeError> {
        if query.limit == 0 {
            return Err(TradeError::InvalidInput("limit must be positive".into()));
        }
        check_range(query.start, query.end)?;

        let trades = if query.is_filtered() {
            self.store
                .list_trades(user_id, query.start, query.end)
                .await?
        } else {
            self.all_trades(user_id).await?
        };

        Ok(trades
            .into_iter()
            .skip(query.offset)
            .take(query.limit)
            .collect())
    }

    async fn get_trade(&self, user_id: UserId, trade_id: TradeId) -> Result<Trade, TradeError> {
        match self.store.get_trade(trade_id).await? {
            Some(trade) if trade.user_id == user_id => Ok(trade),
            _ => Err(TradeError::EntityNotFound(format!("trade {}", trade_id))),
        }
    }

    async fn compute_pnl(
        &self,
        user_id: UserId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<PnlReport, TradeError> {
        check_range(Some(start), Some(end))?;
        let trades = self
            .store
            .list_trades(user_id, Some(start), Some(end))
            .await?;
        summarize(start, end, &trades)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use joule_core::common::Resolution;
    use rust_decimal_macros::dec;

    fn trade(id: i64, kind: TradeKind, quantity: Decimal, price: Decimal, status: TradeStatus) -> Trade {
        let at = Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap();
        Trade {
            id: TradeId(id),
            user_id: UserId(1),
            kind,
            quantity,
            price: Some(price),
            status,
            execution_time: at,
            executed_at: Some(at),
            created_at: at,
            resolution: Resolution::Minute60,
            market: "Germany".into(),
        }
    }

    #[test]
    fn test_empty_range_is_all_zero() {
        let now = Utc::now();
        let report = summarize(now, now, &[]).unwrap();
        assert_eq!(report.total_trades, 0);
        assert_eq!(report.executed_trades, 0);
        assert_eq!(report.avg_buy_price, Decimal::ZERO);
        assert_eq!(report.avg_sell_price, Decimal::ZERO);
        assert_eq!(report.profit_loss, Decimal::ZERO);
        assert_eq!(report.profit_loss_per_unit, Decimal::ZERO);
    }

    #[test]
    fn test_summarize_mixed_trades() {
        let trades = vec![
            trade(1, TradeKind::Buy, dec!(10), dec!(40), TradeStatus::Executed),
            trade(2, TradeKind::Buy, dec!(30), dec!(60), TradeStatus::Executed),
            trade(3, TradeKind::Sell, dec!(20), dec!(70), TradeStatus::Executed),
            trade(4, TradeKind::Charge, dec!(5), dec!(0), TradeStatus::Executed),
            trade(5, TradeKind::Buy, dec!(99), dec!(99), TradeStatus::Pending),
            trade(6, TradeKind::Sell, dec!(99), dec!(99), TradeStatus::Cancelled),
        ];
        let now = Utc::now();
        let report = summarize(now, now, &trades).unwrap();

        assert_eq!(report.total_trades, 6);
        assert_eq!(report.executed_trades, 4);
        assert_eq!(report.buy_volume, dec!(40));
        assert_eq!(report.buy_cost, dec!(2200));
        assert_eq!(report.sell_volume, dec!(20));
        assert_eq!(report.sell_revenue, dec!(1400));
        assert_eq!(report.net_volume, dec!(20));
        assert_eq!(report.net_cost, dec!(800));
        assert_eq!(report.avg_buy_price, dec!(55));
        assert_eq!(report.avg_sell_price, dec!(70));
        assert_eq!(report.profit_loss, dec!(-800));
        // -800 / 60
        assert_eq!(report.profit_loss_per_unit, dec!(-13.33));
    }

    #[test]
    fn test_summarize_overflow_is_typed_error() {
        let huge = vec![
            trade(1, TradeKind::Sell, Decimal::MAX, dec!(1), TradeStatus::Executed),
            trade(2, TradeKind::Sell, Decimal::MAX, dec!(1), TradeStatus::Executed),
        ];
        let now = Utc::now();
        assert!(matches!(
            summarize(now, now, &huge),
            Err(TradeError::InvalidInput(_))
        ));

        let unpriceable = vec![trade(1, TradeKind::Buy, Decimal::MAX, dec!(2), TradeStatus::Executed)];
        assert!(matches!(
            summarize(now, now, &unpriceable),
            Err(TradeError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_trades_cache_key() {
        assert_eq!(trades_cache_key(UserId(42)), "trades:user:42");
    }
}
