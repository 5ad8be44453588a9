#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use joule_core::common::time::FakeClockProvider;
use joule_core::common::{TradeId, UserId};
use joule_core::store::entity::{Battery, BatterySpec, NewUser, Portfolio, User};
use joule_core::store::error::StoreError;
use joule_core::store::port::{LedgerStore, SettlementReceipt, SettlementWrite};
use joule_core::trade::entity::{NewTrade, Trade};
use joule_market::oracle::MarketPriceOracle;
use joule_market::synthetic::SyntheticPriceCurve;
use joule_store::memory::{MemoryLedgerStore, MemoryMarketStore};
use joule_trade::service::{EngineSettings, SettlementEngine};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Barrier, Notify};

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap()
}

pub fn settings(initial_level: Decimal) -> EngineSettings {
    EngineSettings {
        battery: BatterySpec {
            initial_level,
            capacity: dec!(100),
            max_charge_rate: dec!(10),
            max_discharge_rate: dec!(10),
            efficiency: dec!(0.95),
        },
        initial_balance: dec!(10000),
        default_market: "Germany".to_string(),
    }
}

pub async fn register(store: &dyn LedgerStore, email: &str) -> UserId {
    store
        .create_user(
            &NewUser {
                email: email.to_string(),
                name: email.to_string(),
                credential_hash: "hash".to_string(),
            },
            dec!(10000),
        )
        .await
        .unwrap()
        .id
}

/// 无扰动的合成曲线，8 点整的合成价格为 50 + 10·sin(2π/3)
pub fn flat_oracle(market: Arc<MemoryMarketStore>) -> Arc<MarketPriceOracle> {
    Arc::new(MarketPriceOracle::new(
        market,
        SyntheticPriceCurve::seeded(7).with_jitter(0.0),
    ))
}

pub struct Harness {
    pub store: Arc<MemoryLedgerStore>,
    pub market: Arc<MemoryMarketStore>,
    pub clock: Arc<FakeClockProvider>,
    pub engine: Arc<SettlementEngine>,
    pub user: UserId,
}

/// 内存账本 + 固定时钟 + 无扰动预言机，并注册一个用户
pub async fn harness(initial_level: Decimal) -> Harness {
    let store = Arc::new(MemoryLedgerStore::new());
    let market = Arc::new(MemoryMarketStore::new());
    let clock = Arc::new(FakeClockProvider::new(t0()));
    let user = register(store.as_ref(), "trader@joule.test").await;
    let engine = Arc::new(SettlementEngine::new(
        store.clone(),
        flat_oracle(market.clone()),
        clock.clone(),
        settings(initial_level),
    ));
    Harness {
        store,
        market,
        clock,
        engine,
        user,
    }
}

/// 对结算提交进行拦截的方式
pub enum Intercept {
    /// 先把电量写进去，再报告失败，模拟非事务存储的半写入
    FailAfterBatteryWrite,
    /// 所有提交在屏障处会合，只有并行到达才能继续
    Barrier(Arc<Barrier>),
    /// 进入提交后通知 `entered`，等待 `release` 再继续
    Gate {
        entered: Arc<Notify>,
        release: Arc<Notify>,
    },
    /// 首次列出流水时读完持久层后通知 `entered`，等待 `release` 再返回旧结果
    ListGate {
        entered: Arc<Notify>,
        release: Arc<Notify>,
        armed: AtomicBool,
    },
}

/// 包装内存账本，拦截 `apply_settlement` 与 `list_trades`
pub struct InterceptStore {
    pub inner: Arc<MemoryLedgerStore>,
    pub intercept: Intercept,
}

#[async_trait]
impl LedgerStore for InterceptStore {
    async fn create_user(
        &self,
        user: &NewUser,
        initial_balance: Decimal,
    ) -> Result<User, StoreError> {
        self.inner.create_user(user, initial_balance).await
    }

    async fn get_user(&self, id: UserId) -> Result<Option<User>, StoreError> {
        self.inner.get_user(id).await
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        self.inner.get_user_by_email(email).await
    }

    async fn get_battery(&self, user_id: UserId) -> Result<Option<Battery>, StoreError> {
        self.inner.get_battery(user_id).await
    }

    async fn ensure_battery(
        &self,
        user_id: UserId,
        spec: &BatterySpec,
    ) -> Result<Battery, StoreError> {
        self.inner.ensure_battery(user_id, spec).await
    }

    async fn set_battery_level(
        &self,
        user_id: UserId,
        level: Decimal,
        updated_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.inner.set_battery_level(user_id, level, updated_at).await
    }

    async fn get_portfolio(&self, user_id: UserId) -> Result<Option<Portfolio>, StoreError> {
        self.inner.get_portfolio(user_id).await
    }

    async fn ensure_portfolio(
        &self,
        user_id: UserId,
        initial_balance: Decimal,
    ) -> Result<Portfolio, StoreError> {
        self.inner.ensure_portfolio(user_id, initial_balance).await
    }

    async fn insert_trade(&self, trade: &NewTrade) -> Result<Trade, StoreError> {
        self.inner.insert_trade(trade).await
    }

    async fn get_trade(&self, id: TradeId) -> Result<Option<Trade>, StoreError> {
        self.inner.get_trade(id).await
    }

    async fn cancel_trade(&self, id: TradeId) -> Result<Trade, StoreError> {
        self.inner.cancel_trade(id).await
    }

    async fn list_trades(
        &self,
        user_id: UserId,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<Trade>, StoreError> {
        let trades = self.inner.list_trades(user_id, start, end).await?;
        match &self.intercept {
            Intercept::ListGate {
                entered,
                release,
                armed,
            } if armed.swap(false, Ordering::SeqCst) => {
                entered.notify_one();
                release.notified().await;
            }
            _ => {}
        }
        Ok(trades)
    }

    async fn apply_settlement(
        &self,
        write: &SettlementWrite,
    ) -> Result<SettlementReceipt, StoreError> {
        match &self.intercept {
            Intercept::FailAfterBatteryWrite => {
                self.inner
                    .set_battery_level(write.user_id, write.battery_level, write.updated_at)
                    .await?;
                Err(StoreError::Database("trade append failed".into()))
            }
            Intercept::Barrier(barrier) => {
                tokio::time::timeout(Duration::from_secs(2), barrier.wait())
                    .await
                    .map_err(|_| StoreError::Database("commits were serialized".into()))?;
                self.inner.apply_settlement(write).await
            }
            Intercept::Gate { entered, release } => {
                entered.notify_one();
                release.notified().await;
                self.inner.apply_settlement(write).await
            }
            Intercept::ListGate { .. } => self.inner.apply_settlement(write).await,
        }
    }
}
