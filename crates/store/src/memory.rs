use async_trait::async_trait;
use chrono::{DateTime, Utc};
use joule_core::common::{TradeId, UserId};
use joule_core::market::entity::RecordedPrice;
use joule_core::market::port::MarketPriceStore;
use joule_core::store::entity::{Battery, BatterySpec, NewUser, Portfolio, User};
use joule_core::store::error::StoreError;
use joule_core::store::port::{LedgerStore, SettlementReceipt, SettlementWrite, TradeWrite};
use joule_core::trade::entity::{NewTrade, Trade, TradeStatus};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

#[derive(Default)]
struct Tables {
    users: BTreeMap<i64, User>,
    batteries: HashMap<UserId, Battery>,
    portfolios: HashMap<UserId, Portfolio>,
    trades: BTreeMap<i64, Trade>,
    next_user_id: i64,
    next_battery_id: i64,
    next_portfolio_id: i64,
    next_trade_id: i64,
}

impl Tables {
    fn next(counter: &mut i64) -> i64 {
        *counter += 1;
        *counter
    }

    fn require_user(&self, user_id: UserId) -> Result<(), StoreError> {
        if self.users.contains_key(&user_id.0) {
            Ok(())
        } else {
            Err(StoreError::NotFound(format!("user {}", user_id)))
        }
    }

    fn push_trade(&mut self, trade: &NewTrade) -> Trade {
        let id = TradeId(Self::next(&mut self.next_trade_id));
        let trade = trade.clone().into_trade(id);
        self.trades.insert(id.0, trade.clone());
        trade
    }
}

/// # Summary
/// 基于内存的账本实现，语义与 SQLite 实现一致。
///
/// 所有表共用一把 `RwLock`，结算写集合先整体校验再统一落表，天然原子。
/// 主要用于测试与演示环境。
#[derive(Default)]
pub struct MemoryLedgerStore {
    tables: RwLock<Tables>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn create_user(
        &self,
        user: &NewUser,
        initial_balance: Decimal,
    ) -> Result<User, StoreError> {
        let mut t = self.tables.write().await;
        if t.users.values().any(|u| u.email == user.email) {
            return Err(StoreError::Conflict(format!("email {} already registered", user.email)));
        }

        let now = Utc::now();
        let id = UserId(Tables::next(&mut t.next_user_id));
        let created = User {
            id,
            email: user.email.clone(),
            name: user.name.clone(),
            credential_hash: user.credential_hash.clone(),
            is_active: true,
            created_at: now,
        };
        t.users.insert(id.0, created.clone());

        let portfolio_id = Tables::next(&mut t.next_portfolio_id);
        t.portfolios.insert(
            id,
            Portfolio {
                id: portfolio_id,
                user_id: id,
                balance: initial_balance,
                profit_loss: Decimal::ZERO,
                created_at: now,
                updated_at: now,
            },
        );
        Ok(created)
    }

    async fn get_user(&self, id: UserId) -> Result<Option<User>, StoreError> {
        Ok(self.tables.read().await.users.get(&id.0).cloned())
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let t = self.tables.read().await;
        Ok(t.users.values().find(|u| u.email == email).cloned())
    }

    async fn get_battery(&self, user_id: UserId) -> Result<Option<Battery>, StoreError> {
        Ok(self.tables.read().await.batteries.get(&user_id).cloned())
    }

    async fn ensure_battery(
        &self,
        user_id: UserId,
        spec: &BatterySpec,
    ) -> Result<Battery, StoreError> {
        let mut t = self.tables.write().await;
        if let Some(existing) = t.batteries.get(&user_id) {
            return Ok(existing.clone());
        }
        t.require_user(user_id)?;

        let now = Utc::now();
        let battery = Battery {
            id: Tables::next(&mut t.next_battery_id),
            user_id,
            current_level: spec.initial_level,
            capacity: spec.capacity,
            max_charge_rate: spec.max_charge_rate,
            max_discharge_rate: spec.max_discharge_rate,
            efficiency: spec.efficiency,
            created_at: now,
            updated_at: now,
        };
        t.batteries.insert(user_id, battery.clone());
        Ok(battery)
    }

    async fn set_battery_level(
        &self,
        user_id: UserId,
        level: Decimal,
        updated_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut t = self.tables.write().await;
        let battery = t
            .batteries
            .get_mut(&user_id)
            .ok_or_else(|| StoreError::NotFound(format!("battery of user {}", user_id)))?;
        battery.current_level = level;
        battery.updated_at = updated_at;
        Ok(())
    }

    async fn get_portfolio(&self, user_id: UserId) -> Result<Option<Portfolio>, StoreError> {
        Ok(self.tables.read().await.portfolios.get(&user_id).cloned())
    }

    async fn ensure_portfolio(
        &self,
        user_id: UserId,
        initial_balance: Decimal,
    ) -> Result<Portfolio, StoreError> {
        let mut t = self.tables.write().await;
        if let Some(existing) = t.portfolios.get(&user_id) {
            return Ok(existing.clone());
        }
        t.require_user(user_id)?;

        let now = Utc::now();
        let portfolio = Portfolio {
            id: Tables::next(&mut t.next_portfolio_id),
            user_id,
            balance: initial_balance,
            profit_loss: Decimal::ZERO,
            created_at: now,
            updated_at: now,
        };
        t.portfolios.insert(user_id, portfolio.clone());
        Ok(portfolio)
    }

    async fn insert_trade(&self, trade: &NewTrade) -> Result<Trade, StoreError> {
        let mut t = self.tables.write().await;
        t.require_user(trade.user_id)?;
        Ok(t.push_trade(trade))
    }

    async fn get_trade(&self, id: TradeId) -> Result<Option<Trade>, StoreError> {
        Ok(self.tables.read().await.trades.get(&id.0).cloned())
    }

    async fn cancel_trade(&self, id: TradeId) -> Result<Trade, StoreError> {
        let mut t = self.tables.write().await;
        let trade = t
            .trades
            .get_mut(&id.0)
            .ok_or_else(|| StoreError::NotFound(format!("trade {}", id)))?;
        if trade.status != TradeStatus::Pending {
            return Err(StoreError::Conflict(format!(
                "trade {} is already {}",
                id, trade.status
            )));
        }
        trade.status = TradeStatus::Cancelled;
        Ok(trade.clone())
    }

    async fn list_trades(
        &self,
        user_id: UserId,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<Trade>, StoreError> {
        let t = self.tables.read().await;
        let mut trades: Vec<Trade> = t
            .trades
            .values()
            .filter(|tr| tr.user_id == user_id)
            .filter(|tr| start.is_none_or(|s| tr.execution_time >= s))
            .filter(|tr| end.is_none_or(|e| tr.execution_time <= e))
            .cloned()
            .collect();
        trades.sort_by(|a, b| {
            b.execution_time
                .cmp(&a.execution_time)
                .then_with(|| b.id.cmp(&a.id))
        });
        Ok(trades)
    }

    /// # Logic
    /// 持有写锁期间先算出电池、资金账户的新值 (任何失败都发生在这里)，再统一落表。
    async fn apply_settlement(
        &self,
        write: &SettlementWrite,
    ) -> Result<SettlementReceipt, StoreError> {
        let mut t = self.tables.write().await;
        let user_id = write.user_id;

        let battery = t
            .batteries
            .get(&user_id)
            .map(|b| Battery {
                current_level: write.battery_level,
                updated_at: write.updated_at,
                ..b.clone()
            })
            .ok_or_else(|| StoreError::NotFound(format!("battery of user {}", user_id)))?;
        if let TradeWrite::Execute { trade_id, .. } = &write.trade {
            match t.trades.get(&trade_id.0) {
                Some(tr) if tr.user_id == user_id && tr.status == TradeStatus::Pending => {}
                Some(_) => {
                    return Err(StoreError::Conflict(format!(
                        "trade {} is no longer pending",
                        trade_id
                    )));
                }
                None => return Err(StoreError::NotFound(format!("trade {}", trade_id))),
            }
        }
        let portfolio = match write.portfolio {
            Some(delta) => {
                let current = t
                    .portfolios
                    .get(&user_id)
                    .ok_or_else(|| StoreError::NotFound(format!("portfolio of user {}", user_id)))?;
                let updated = delta.apply(current, write.updated_at).ok_or_else(|| {
                    StoreError::Conflict(format!("portfolio of user {} would overflow", user_id))
                })?;
                Some(updated)
            }
            None => None,
        };

        let trade = match &write.trade {
            TradeWrite::Append(new_trade) => t.push_trade(new_trade),
            TradeWrite::Execute {
                trade_id,
                price,
                executed_at,
            } => {
                let tr = t
                    .trades
                    .get_mut(&trade_id.0)
                    .ok_or_else(|| StoreError::NotFound(format!("trade {}", trade_id)))?;
                tr.status = TradeStatus::Executed;
                tr.price = Some(*price);
                tr.executed_at = Some(*executed_at);
                tr.clone()
            }
        };
        if let Some(p) = &portfolio {
            t.portfolios.insert(user_id, p.clone());
        }
        t.batteries.insert(user_id, battery.clone());

        Ok(SettlementReceipt {
            battery,
            trade,
            portfolio,
        })
    }
}

/// # Summary
/// 基于内存的市场价格仓储实现。
#[derive(Default)]
pub struct MemoryMarketStore {
    prices: RwLock<Vec<RecordedPrice>>,
}

impl MemoryMarketStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MarketPriceStore for MemoryMarketStore {
    async fn record_price(&self, price: &RecordedPrice) -> Result<(), StoreError> {
        let mut prices = self.prices.write().await;
        prices.retain(|p| {
            !(p.market == price.market
                && p.period_start == price.period_start
                && p.resolution == price.resolution)
        });
        prices.push(price.clone());
        Ok(())
    }

    async fn recorded_price(
        &self,
        market: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<Decimal>, StoreError> {
        let prices = self.prices.read().await;
        Ok(prices
            .iter()
            .filter(|p| p.market == market && p.covers(at))
            .max_by_key(|p| p.period_start)
            .map(|p| p.price))
    }
}
