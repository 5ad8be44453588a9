use crate::lock::{UserGuard, UserLocks};
use crate::policy;
use crate::query::trades_cache_key;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use joule_core::cache::port::Cache;
use joule_core::common::time::TimeProvider;
use joule_core::common::{TradeId, UserId};
use joule_core::config::AppConfig;
use joule_core::market::entity::PriceSource;
use joule_core::market::port::PriceOracle;
use joule_core::store::entity::{Battery, BatterySpec, Portfolio};
use joule_core::store::error::StoreError;
use joule_core::store::port::{
    LedgerStore, PortfolioDelta, SettlementReceipt, SettlementWrite, TradeWrite,
};
use joule_core::trade::entity::{
    BATTERY_MARKET, BatteryStatus, NewTrade, Trade, TradeKind, TradeRequest, TradeResult,
    TradeStatus,
};
use joule_core::trade::port::{SettlementPort, TradeError};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{Instrument, error, info, info_span, warn};
use uuid::Uuid;

/// # Summary
/// 结算引擎的静态参数：懒创建电池的出厂规格、资金账户初始余额与默认市场。
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub battery: BatterySpec,
    pub initial_balance: Decimal,
    pub default_market: String,
}

impl From<&AppConfig> for EngineSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            battery: BatterySpec::from(&config.battery),
            initial_balance: config.portfolio.initial_balance,
            default_market: config.market.default_market.clone(),
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

/// # Summary
/// 结算前确定的成交价格。
struct Pricing {
    price: Decimal,
    source: PriceSource,
}

/// # Summary
/// `SettlementEngine` 是电池、流水与资金账户的唯一写入者，实现 `SettlementPort`。
///
/// # Invariants
/// - 所有写操作都在用户锁内完成：读电量 → 容量校验 → 询价 → 原子提交。
/// - 容量校验只读取持久层的权威电量，从不读缓存。
/// - 进入提交阶段后，提交与补偿在独立任务中运行到底，调用方取消不会留下半完成状态。
pub struct SettlementEngine {
    store: Arc<dyn LedgerStore>,
    oracle: Arc<dyn PriceOracle>,
    cache: Option<Arc<dyn Cache>>,
    clock: Arc<dyn TimeProvider>,
    locks: Arc<UserLocks>,
    settings: EngineSettings,
}

impl SettlementEngine {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        oracle: Arc<dyn PriceOracle>,
        clock: Arc<dyn TimeProvider>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            store,
            oracle,
            cache: None,
            clock,
            locks: Arc::new(UserLocks::new()),
            settings,
        }
    }

    /// 挂载流水缓存，提交后按用户失效
    pub fn with_cache(mut self, cache: Arc<dyn Cache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// 用户写锁注册表，供需要与结算互斥的读路径 (如流水缓存回填) 共享
    pub fn locks(&self) -> Arc<UserLocks> {
        self.locks.clone()
    }

    /// # Logic
    /// 解析请求中的市场标签：充放电固定为保留标签，买卖单为空时取默认市场。
    fn market_for(&self, request: &TradeRequest) -> Result<String, TradeError> {
        if !request.kind.is_market_trade() {
            return Ok(BATTERY_MARKET.to_string());
        }
        match request.market.as_deref() {
            None => Ok(self.settings.default_market.clone()),
            Some(m) if m.trim().is_empty() => {
                Err(TradeError::InvalidInput("market must not be empty".into()))
            }
            Some(m) if m == BATTERY_MARKET => Err(TradeError::InvalidInput(format!(
                "market '{}' is reserved for charge/discharge",
                BATTERY_MARKET
            ))),
            Some(m) => Ok(m.to_string()),
        }
    }

    async fn ensure_battery(&self, user_id: UserId) -> Result<Battery, TradeError> {
        self.store
            .ensure_battery(user_id, &self.settings.battery)
            .await
            .map_err(|e| {
                TradeError::EntityNotFound(format!("battery of user {}: {}", user_id, e))
            })
    }

    async fn ensure_portfolio(&self, user_id: UserId) -> Result<Portfolio, TradeError> {
        self.store
            .ensure_portfolio(user_id, self.settings.initial_balance)
            .await
            .map_err(|e| {
                TradeError::EntityNotFound(format!("portfolio of user {}: {}", user_id, e))
            })
    }

    /// 读取流水并校验归属，不属于当前用户的流水视为不存在
    async fn owned_trade(&self, user_id: UserId, trade_id: TradeId) -> Result<Trade, TradeError> {
        match self.store.get_trade(trade_id).await? {
            Some(trade) if trade.user_id == user_id => Ok(trade),
            _ => Err(TradeError::EntityNotFound(format!("trade {}", trade_id))),
        }
    }

    /// # Logic
    /// 充放电固定零价；买卖单依次使用调用方价格、已记录价格、合成价格。
    async fn price_for(
        &self,
        kind: TradeKind,
        market: &str,
        at: DateTime<Utc>,
        explicit: Option<Decimal>,
    ) -> Pricing {
        if !kind.is_market_trade() {
            return Pricing {
                price: Decimal::ZERO,
                source: PriceSource::Fixed,
            };
        }
        let quote = self.oracle.resolve(market, at, explicit).await;
        Pricing {
            price: quote.price,
            source: quote.source,
        }
    }

    /// 买入支出记为负、卖出收入记为正；充放电不影响资金账户
    fn portfolio_delta(kind: TradeKind, value: Decimal) -> Option<PortfolioDelta> {
        match kind {
            TradeKind::Buy => Some(PortfolioDelta {
                balance: -value,
                profit_loss: -value,
            }),
            TradeKind::Sell => Some(PortfolioDelta {
                balance: value,
                profit_loss: value,
            }),
            TradeKind::Charge | TradeKind::Discharge => None,
        }
    }

    /// 写入成功后删除该用户的流水缓存，失败只记日志
    async fn invalidate(cache: Option<&Arc<dyn Cache>>, user_id: UserId) {
        let Some(cache) = cache else {
            return;
        };
        if let Err(e) = cache.del(&trades_cache_key(user_id)).await {
            warn!("Failed to invalidate trades cache for user {}: {}", user_id, e);
        }
    }

    /// # Summary
    /// 原子提交一次结算。
    ///
    /// # Logic
    /// 1. 将用户锁与写集合移入独立任务，调用方被取消也不会中断提交。
    /// 2. 提交失败时检查电池电量，若已偏离结算前的值则覆写回去 (补偿)。
    /// 3. 提交成功后失效缓存，随后才释放用户锁。
    ///
    /// # Returns
    /// 提交失败统一返回 `SettlementFailed`，调用方应重新发起整笔操作。
    async fn commit(
        &self,
        guard: UserGuard,
        write: SettlementWrite,
        previous_level: Decimal,
    ) -> Result<SettlementReceipt, TradeError> {
        let store = self.store.clone();
        let cache = self.cache.clone();
        let task = tokio::spawn(
            async move {
                let _guard = guard;
                match store.apply_settlement(&write).await {
                    Ok(receipt) => {
                        Self::invalidate(cache.as_ref(), write.user_id).await;
                        Ok(receipt)
                    }
                    Err(e) => {
                        warn!("Settlement commit failed for user {}: {}", write.user_id, e);
                        compensate(store.as_ref(), &write, previous_level).await;
                        Err(TradeError::SettlementFailed(e.to_string()))
                    }
                }
            }
            .in_current_span(),
        );

        task.await
            .map_err(|e| TradeError::SettlementFailed(format!("settlement task aborted: {}", e)))?
    }

    /// # Logic
    /// 计算成交金额并预演资金账户变动，任一步溢出都在提交前以 `InvalidInput` 拒绝。
    fn price_effect(
        kind: TradeKind,
        quantity: Decimal,
        price: Decimal,
        portfolio: Option<&Portfolio>,
        at: DateTime<Utc>,
    ) -> Result<(Decimal, Option<PortfolioDelta>), TradeError> {
        let value = quantity.checked_mul(price).ok_or_else(|| {
            TradeError::InvalidInput(format!("{} kWh at {} overflows the trade value", quantity, price))
        })?;
        let delta = Self::portfolio_delta(kind, value);
        match (delta, portfolio) {
            (Some(d), Some(p)) if d.apply(p, at).is_none() => Err(TradeError::InvalidInput(format!(
                "trade value {} would overflow the portfolio of user {}",
                value, p.user_id
            ))),
            _ => Ok((value, delta)),
        }
    }

    fn into_result(receipt: SettlementReceipt, pricing: &Pricing, total_value: Decimal) -> TradeResult {
        TradeResult {
            trade: receipt.trade,
            battery: BatteryStatus::from(receipt.battery),
            portfolio: receipt.portfolio,
            price_source: pricing.source,
            total_value,
        }
    }

    async fn execute_locked(
        &self,
        user_id: UserId,
        request: TradeRequest,
        market: String,
    ) -> Result<TradeResult, TradeError> {
        let guard = self.locks.acquire(user_id).await;

        let battery = self.ensure_battery(user_id).await?;
        let portfolio = if request.kind.is_market_trade() {
            Some(self.ensure_portfolio(user_id).await?)
        } else {
            None
        };

        let new_level = policy::plan(
            battery.current_level,
            battery.capacity,
            request.quantity,
            request.kind.flow(),
        )
        .inspect_err(|e| warn!("Trade rejected: {}", e))?;

        let now = self.clock.now();
        let pricing = self
            .price_for(request.kind, &market, now, request.price)
            .await;
        let (value, delta) = Self::price_effect(
            request.kind,
            request.quantity,
            pricing.price,
            portfolio.as_ref(),
            now,
        )
        .inspect_err(|e| warn!("Trade rejected: {}", e))?;

        let write = SettlementWrite {
            user_id,
            battery_level: new_level,
            trade: TradeWrite::Append(NewTrade {
                user_id,
                kind: request.kind,
                quantity: request.quantity,
                price: Some(pricing.price),
                status: TradeStatus::Executed,
                execution_time: now,
                executed_at: Some(now),
                created_at: now,
                resolution: request.resolution,
                market,
            }),
            portfolio: delta,
            updated_at: now,
        };

        let receipt = self.commit(guard, write, battery.current_level).await?;
        info!(
            "Executed {} {} kWh at {} ({:?}), battery {}% -> {}%",
            request.kind,
            request.quantity,
            pricing.price,
            pricing.source,
            battery.current_level,
            receipt.battery.current_level
        );
        Ok(Self::into_result(receipt, &pricing, value))
    }

    async fn settle_locked(
        &self,
        user_id: UserId,
        trade_id: TradeId,
    ) -> Result<TradeResult, TradeError> {
        let guard = self.locks.acquire(user_id).await;

        let trade = self.owned_trade(user_id, trade_id).await?;
        if trade.status.is_terminal() {
            warn!("Trade {} is already {}", trade_id, trade.status);
            return Err(TradeError::InvalidTradeStatus {
                trade_id,
                status: trade.status,
            });
        }

        let now = self.clock.now();
        if now < trade.execution_time {
            return Err(TradeError::InvalidInput(format!(
                "trade {} is scheduled for {}, cannot settle before then",
                trade_id, trade.execution_time
            )));
        }

        let battery = self.ensure_battery(user_id).await?;
        let portfolio = if trade.kind.is_market_trade() {
            Some(self.ensure_portfolio(user_id).await?)
        } else {
            None
        };

        let new_level = policy::plan(
            battery.current_level,
            battery.capacity,
            trade.quantity,
            trade.kind.flow(),
        )
        .inspect_err(|e| warn!("Settlement of trade {} rejected: {}", trade_id, e))?;

        let pricing = self
            .price_for(trade.kind, &trade.market, trade.execution_time, trade.price)
            .await;
        let (value, delta) = Self::price_effect(
            trade.kind,
            trade.quantity,
            pricing.price,
            portfolio.as_ref(),
            now,
        )
        .inspect_err(|e| warn!("Settlement of trade {} rejected: {}", trade_id, e))?;

        let write = SettlementWrite {
            user_id,
            battery_level: new_level,
            trade: TradeWrite::Execute {
                trade_id,
                price: pricing.price,
                executed_at: now,
            },
            portfolio: delta,
            updated_at: now,
        };

        let receipt = self.commit(guard, write, battery.current_level).await?;
        info!(
            "Settled pending trade {} ({} {} kWh at {}), battery {}% -> {}%",
            trade_id,
            trade.kind,
            trade.quantity,
            pricing.price,
            battery.current_level,
            receipt.battery.current_level
        );
        Ok(Self::into_result(receipt, &pricing, value))
    }
}

/// # Logic
/// 仅在电池电量已经偏离结算前的值时覆写回去；补偿本身失败只能记录错误。
async fn compensate(store: &dyn LedgerStore, write: &SettlementWrite, previous_level: Decimal) {
    match store.get_battery(write.user_id).await {
        Ok(Some(battery)) if battery.current_level != previous_level => {
            warn!(
                "Rolling battery of user {} back from {}% to {}%",
                write.user_id, battery.current_level, previous_level
            );
            if let Err(e) = store
                .set_battery_level(write.user_id, previous_level, write.updated_at)
                .await
            {
                error!(
                    "Compensation failed for user {}, battery left at {}%: {}",
                    write.user_id, battery.current_level, e
                );
            }
        }
        Ok(_) => {}
        Err(e) => {
            error!(
                "Compensation could not read battery of user {}: {}",
                write.user_id, e
            );
        }
    }
}

fn validate_quantity(quantity: Decimal) -> Result<(), TradeError> {
    if quantity <= Decimal::ZERO {
        return Err(TradeError::InvalidInput(format!(
            "quantity must be positive, got {}",
            quantity
        )));
    }
    Ok(())
}

/// 每次写操作一个 span，`settlement_id` 用于串联同一次结算的全部日志
fn settlement_span(
    user_id: UserId,
    operation: &'static str,
    kind: Option<TradeKind>,
) -> tracing::Span {
    let kind = kind.map(TradeKind::as_str).unwrap_or("-");
    info_span!(
        "settlement",
        settlement_id = %Uuid::new_v4(),
        user_id = %user_id,
        operation,
        kind
    )
}

#[async_trait]
impl SettlementPort for SettlementEngine {
    /// # Logic
    /// 1. 锁外完成参数校验 (数量、市场、不接受计划时间)，失败不触碰任何状态。
    /// 2. 锁内：懒创建电池/资金账户 → 容量策略 → 询价 → 原子提交。
    async fn execute_trade(
        &self,
        user_id: UserId,
        request: TradeRequest,
    ) -> Result<TradeResult, TradeError> {
        let span = settlement_span(user_id, "execute", Some(request.kind));
        async move {
            validate_quantity(request.quantity)?;
            if request.execution_time.is_some() {
                return Err(TradeError::InvalidInput(
                    "execution_time is only accepted by schedule_trade".into(),
                ));
            }
            let market = self.market_for(&request)?;
            self.execute_locked(user_id, request, market).await
        }
        .instrument(span)
        .await
    }

    /// # Logic
    /// 记录一笔 pending 流水。计划时间不得早于当前时间；充放电不保存价格。
    async fn schedule_trade(
        &self,
        user_id: UserId,
        request: TradeRequest,
    ) -> Result<Trade, TradeError> {
        let span = settlement_span(user_id, "schedule", Some(request.kind));
        async move {
            validate_quantity(request.quantity)?;
            let market = self.market_for(&request)?;
            let execution_time = request.execution_time.ok_or_else(|| {
                TradeError::InvalidInput("scheduled trade requires execution_time".into())
            })?;

            let _guard = self.locks.acquire(user_id).await;
            let now = self.clock.now();
            if execution_time < now {
                return Err(TradeError::InvalidInput(format!(
                    "execution_time {} is in the past",
                    execution_time
                )));
            }

            let price = if request.kind.is_market_trade() {
                request.price
            } else {
                None
            };
            let trade = self
                .store
                .insert_trade(&NewTrade {
                    user_id,
                    kind: request.kind,
                    quantity: request.quantity,
                    price,
                    status: TradeStatus::Pending,
                    execution_time,
                    executed_at: None,
                    created_at: now,
                    resolution: request.resolution,
                    market,
                })
                .await
                .map_err(|e| match e {
                    StoreError::NotFound(m) => TradeError::EntityNotFound(m),
                    other => TradeError::Storage(other),
                })?;
            Self::invalidate(self.cache.as_ref(), user_id).await;

            info!(
                "Scheduled trade {} ({} {} kWh) for {}",
                trade.id, trade.kind, trade.quantity, trade.execution_time
            );
            Ok(trade)
        }
        .instrument(span)
        .await
    }

    async fn settle_trade(
        &self,
        user_id: UserId,
        trade_id: TradeId,
    ) -> Result<TradeResult, TradeError> {
        self.settle_locked(user_id, trade_id)
            .instrument(settlement_span(user_id, "settle", None))
            .await
    }

    async fn cancel_trade(&self, user_id: UserId, trade_id: TradeId) -> Result<Trade, TradeError> {
        let span = settlement_span(user_id, "cancel", None);
        async move {
            let _guard = self.locks.acquire(user_id).await;
            let trade = self.owned_trade(user_id, trade_id).await?;
            if trade.status.is_terminal() {
                return Err(TradeError::InvalidTradeStatus {
                    trade_id,
                    status: trade.status,
                });
            }

            let cancelled = self.store.cancel_trade(trade_id).await.map_err(|e| match e {
                StoreError::Conflict(_) => TradeError::InvalidTradeStatus {
                    trade_id,
                    status: trade.status,
                },
                other => TradeError::Storage(other),
            })?;
            Self::invalidate(self.cache.as_ref(), user_id).await;

            info!("Cancelled trade {}", trade_id);
            Ok(cancelled)
        }
        .instrument(span)
        .await
    }

    async fn battery_status(&self, user_id: UserId) -> Result<BatteryStatus, TradeError> {
        let _guard = self.locks.acquire(user_id).await;
        Ok(BatteryStatus::from(self.ensure_battery(user_id).await?))
    }

    async fn portfolio(&self, user_id: UserId) -> Result<Portfolio, TradeError> {
        let _guard = self.locks.acquire(user_id).await;
        self.ensure_portfolio(user_id).await
    }
}
