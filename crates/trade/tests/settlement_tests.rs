mod common;

use chrono::Duration;
use common::{
    Harness, Intercept, InterceptStore, flat_oracle, harness, register, settings, t0,
};
use futures::future::join_all;
use joule_core::common::time::FakeClockProvider;
use joule_core::common::{Resolution, TradeId, UserId};
use joule_core::market::entity::{PriceSource, RecordedPrice};
use joule_core::market::port::MarketPriceStore;
use joule_core::store::port::LedgerStore;
use joule_core::trade::entity::{BATTERY_MARKET, TradeKind, TradeRequest, TradeStatus};
use joule_core::trade::port::{SettlementPort, TradeError};
use joule_store::memory::{MemoryLedgerStore, MemoryMarketStore};
use joule_trade::service::SettlementEngine;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use tokio::sync::{Barrier, Notify};

async fn level(h: &Harness) -> Decimal {
    h.engine.battery_status(h.user).await.unwrap().battery.current_level
}

async fn trade_count(h: &Harness) -> usize {
    h.store.list_trades(h.user, None, None).await.unwrap().len()
}

#[tokio::test]
async fn test_buy_rejected_over_capacity_then_accepted() {
    let h = harness(dec!(50)).await;

    let err = h.engine.buy(h.user, dec!(60), None).await.unwrap_err();
    assert_eq!(
        err,
        TradeError::InsufficientCapacity {
            requested: dec!(60),
            available: dec!(50),
        }
    );
    assert_eq!(level(&h).await, dec!(50));
    assert_eq!(trade_count(&h).await, 0);
    let untouched = h.engine.portfolio(h.user).await.unwrap();
    assert_eq!(untouched.balance, dec!(10000));

    let result = h.engine.buy(h.user, dec!(40), None).await.unwrap();
    assert_eq!(result.battery.battery.current_level, dec!(90));
    assert_eq!(result.battery.current_energy, dec!(90));
    assert_eq!(result.battery.remaining_capacity, dec!(10));
    assert_eq!(result.trade.kind, TradeKind::Buy);
    assert_eq!(result.trade.quantity, dec!(40));
    assert_eq!(result.trade.status, TradeStatus::Executed);
    assert_eq!(result.trade.market, "Germany");
    assert_eq!(result.price_source, PriceSource::Synthetic);
    // 8 点整的合成价格 50 + 10·sin(2π/3)
    assert_eq!(result.trade.price, Some(dec!(58.66)));
    assert_eq!(result.total_value, dec!(2346.40));

    let portfolio = result.portfolio.unwrap();
    assert_eq!(portfolio.balance, dec!(7653.60));
    assert_eq!(portfolio.profit_loss, dec!(-2346.40));
    assert_eq!(trade_count(&h).await, 1);
}

#[tokio::test]
async fn test_sell_rejected_over_energy_then_drains_battery() {
    let h = harness(dec!(20)).await;

    let err = h.engine.sell(h.user, dec!(25), None).await.unwrap_err();
    assert!(matches!(err, TradeError::InsufficientEnergy { .. }));
    assert!(!err.is_retryable());
    assert_eq!(level(&h).await, dec!(20));
    assert_eq!(trade_count(&h).await, 0);

    let result = h.engine.sell(h.user, dec!(20), Some(dec!(70))).await.unwrap();
    assert_eq!(result.battery.battery.current_level, dec!(0));
    assert_eq!(result.trade.kind, TradeKind::Sell);
    assert_eq!(result.price_source, PriceSource::Explicit);
    assert_eq!(result.total_value, dec!(1400));

    let portfolio = result.portfolio.unwrap();
    assert_eq!(portfolio.balance, dec!(11400));
    assert_eq!(portfolio.profit_loss, dec!(1400));
}

#[tokio::test]
async fn test_charge_and_discharge_are_free_and_skip_portfolio() {
    let h = harness(dec!(50)).await;

    let charged = h.engine.charge(h.user, dec!(10)).await.unwrap();
    assert_eq!(charged.battery.battery.current_level, dec!(60));
    assert_eq!(charged.trade.price, Some(Decimal::ZERO));
    assert_eq!(charged.trade.market, BATTERY_MARKET);
    assert_eq!(charged.price_source, PriceSource::Fixed);
    assert!(charged.portfolio.is_none());

    // 充放电单即使带了市场与价格也会被忽略
    let request = TradeRequest::new(TradeKind::Discharge, dec!(30))
        .with_market("Germany")
        .with_price(dec!(99));
    let discharged = h.engine.execute_trade(h.user, request).await.unwrap();
    assert_eq!(discharged.battery.battery.current_level, dec!(30));
    assert_eq!(discharged.trade.market, BATTERY_MARKET);
    assert_eq!(discharged.total_value, Decimal::ZERO);

    let portfolio = h.engine.portfolio(h.user).await.unwrap();
    assert_eq!(portfolio.balance, dec!(10000));
    assert_eq!(portfolio.profit_loss, Decimal::ZERO);
    assert_eq!(trade_count(&h).await, 2);
}

#[tokio::test]
async fn test_invalid_input_touches_no_state() {
    let h = harness(dec!(50)).await;

    for quantity in [dec!(0), dec!(-5)] {
        let err = h.engine.buy(h.user, quantity, None).await.unwrap_err();
        assert!(matches!(err, TradeError::InvalidInput(_)));
    }

    let reserved = TradeRequest::new(TradeKind::Buy, dec!(1)).with_market(BATTERY_MARKET);
    assert!(matches!(
        h.engine.execute_trade(h.user, reserved).await,
        Err(TradeError::InvalidInput(_))
    ));

    let blank = TradeRequest::new(TradeKind::Sell, dec!(1)).with_market("  ");
    assert!(matches!(
        h.engine.execute_trade(h.user, blank).await,
        Err(TradeError::InvalidInput(_))
    ));

    let scheduled = TradeRequest::new(TradeKind::Buy, dec!(1)).scheduled_at(t0());
    assert!(matches!(
        h.engine.execute_trade(h.user, scheduled).await,
        Err(TradeError::InvalidInput(_))
    ));

    // 校验发生在任何状态访问之前，电池也不会被懒创建
    assert!(h.store.get_battery(h.user).await.unwrap().is_none());
    assert_eq!(trade_count(&h).await, 0);
}

#[tokio::test]
async fn test_unknown_user_is_entity_not_found() {
    let h = harness(dec!(50)).await;
    let err = h.engine.charge(UserId(9999), dec!(1)).await.unwrap_err();
    assert!(matches!(err, TradeError::EntityNotFound(_)));
}

#[tokio::test]
async fn test_recorded_price_is_used_for_market_trades() {
    let h = harness(dec!(50)).await;
    h.market
        .record_price(&RecordedPrice {
            market: "Germany".into(),
            period_start: t0(),
            resolution: Resolution::Minute60,
            price: dec!(81.25),
        })
        .await
        .unwrap();

    let result = h.engine.buy(h.user, dec!(2), None).await.unwrap();
    assert_eq!(result.price_source, PriceSource::Recorded);
    assert_eq!(result.trade.price, Some(dec!(81.25)));
    assert_eq!(result.total_value, dec!(162.5));
}

#[tokio::test]
async fn test_execution_timestamps_are_ordered() {
    let h = harness(dec!(50)).await;

    let immediate = h.engine.buy(h.user, dec!(1), None).await.unwrap().trade;
    assert_eq!(immediate.created_at, t0());
    assert_eq!(immediate.execution_time, t0());
    assert_eq!(immediate.executed_at, Some(t0()));

    let at = t0() + Duration::hours(1);
    let pending = h
        .engine
        .schedule_trade(
            h.user,
            TradeRequest::new(TradeKind::Sell, dec!(5))
                .with_resolution(Resolution::Minute15)
                .scheduled_at(at),
        )
        .await
        .unwrap();
    assert_eq!(pending.status, TradeStatus::Pending);
    assert_eq!(pending.price, None);
    assert_eq!(pending.resolution, Resolution::Minute15);

    h.clock.advance(Duration::minutes(90));
    let settled = h.engine.settle_trade(h.user, pending.id).await.unwrap().trade;
    let executed_at = settled.executed_at.unwrap();
    assert_eq!(settled.status, TradeStatus::Executed);
    assert!(settled.price.is_some());
    assert!(executed_at >= settled.execution_time);
    assert!(settled.execution_time >= settled.created_at);
}

#[tokio::test]
async fn test_pending_trade_settles_exactly_once() {
    let h = harness(dec!(50)).await;
    let at = t0() + Duration::hours(2);
    let pending = h
        .engine
        .schedule_trade(
            h.user,
            TradeRequest::new(TradeKind::Buy, dec!(10))
                .with_price(dec!(30))
                .scheduled_at(at),
        )
        .await
        .unwrap();
    // 计划单不影响电池与资金
    assert_eq!(level(&h).await, dec!(50));

    let early = h.engine.settle_trade(h.user, pending.id).await.unwrap_err();
    assert!(matches!(early, TradeError::InvalidInput(_)));

    h.clock.set_time(at);
    let settled = h.engine.settle_trade(h.user, pending.id).await.unwrap();
    assert_eq!(settled.trade.id, pending.id);
    assert_eq!(settled.price_source, PriceSource::Explicit);
    assert_eq!(settled.battery.battery.current_level, dec!(60));
    assert_eq!(settled.portfolio.unwrap().balance, dec!(9700));

    let again = h.engine.settle_trade(h.user, pending.id).await.unwrap_err();
    assert_eq!(
        again,
        TradeError::InvalidTradeStatus {
            trade_id: pending.id,
            status: TradeStatus::Executed,
        }
    );
    assert_eq!(level(&h).await, dec!(60));
    assert_eq!(h.engine.portfolio(h.user).await.unwrap().balance, dec!(9700));

    let cancel = h.engine.cancel_trade(h.user, pending.id).await.unwrap_err();
    assert!(matches!(cancel, TradeError::InvalidTradeStatus { .. }));
}

#[tokio::test]
async fn test_cancelled_trade_cannot_settle() {
    let h = harness(dec!(50)).await;
    let pending = h
        .engine
        .schedule_trade(
            h.user,
            TradeRequest::new(TradeKind::Charge, dec!(5)).scheduled_at(t0()),
        )
        .await
        .unwrap();
    assert_eq!(pending.market, BATTERY_MARKET);

    let cancelled = h.engine.cancel_trade(h.user, pending.id).await.unwrap();
    assert_eq!(cancelled.status, TradeStatus::Cancelled);

    let err = h.engine.settle_trade(h.user, pending.id).await.unwrap_err();
    assert_eq!(
        err,
        TradeError::InvalidTradeStatus {
            trade_id: pending.id,
            status: TradeStatus::Cancelled,
        }
    );
    assert_eq!(level(&h).await, dec!(50));
}

#[tokio::test]
async fn test_schedule_validation() {
    let h = harness(dec!(50)).await;

    let past = TradeRequest::new(TradeKind::Buy, dec!(1)).scheduled_at(t0() - Duration::seconds(1));
    assert!(matches!(
        h.engine.schedule_trade(h.user, past).await,
        Err(TradeError::InvalidInput(_))
    ));

    let missing_time = TradeRequest::new(TradeKind::Buy, dec!(1));
    assert!(matches!(
        h.engine.schedule_trade(h.user, missing_time).await,
        Err(TradeError::InvalidInput(_))
    ));

    let stranger = TradeRequest::new(TradeKind::Buy, dec!(1)).scheduled_at(t0());
    assert!(matches!(
        h.engine.schedule_trade(UserId(4242), stranger).await,
        Err(TradeError::EntityNotFound(_))
    ));
    assert_eq!(trade_count(&h).await, 0);
}

#[tokio::test]
async fn test_foreign_trade_is_not_found() {
    let h = harness(dec!(50)).await;
    let other = register(h.store.as_ref(), "other@joule.test").await;
    let pending = h
        .engine
        .schedule_trade(
            other,
            TradeRequest::new(TradeKind::Buy, dec!(1)).scheduled_at(t0()),
        )
        .await
        .unwrap();

    assert!(matches!(
        h.engine.settle_trade(h.user, pending.id).await,
        Err(TradeError::EntityNotFound(_))
    ));
    assert!(matches!(
        h.engine.cancel_trade(h.user, pending.id).await,
        Err(TradeError::EntityNotFound(_))
    ));
    assert!(matches!(
        h.engine.settle_trade(h.user, TradeId(123_456)).await,
        Err(TradeError::EntityNotFound(_))
    ));
}

/// 20 笔买 1.5 与 10 笔卖 2 交错排列，无论以何种顺序执行都不会触发容量拒绝
fn mixed_requests() -> Vec<TradeRequest> {
    (0..30)
        .map(|i| {
            if i % 3 == 2 {
                TradeRequest::new(TradeKind::Sell, dec!(2)).with_price(dec!(20))
            } else {
                TradeRequest::new(TradeKind::Buy, dec!(1.5)).with_price(dec!(10))
            }
        })
        .collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_mutations_match_sequential_replay() {
    let requests = mixed_requests();
    assert_eq!(requests.iter().filter(|r| r.kind == TradeKind::Buy).count(), 20);

    let concurrent = harness(dec!(50)).await;
    let tasks = requests.iter().cloned().map(|request| {
        let engine = concurrent.engine.clone();
        let user = concurrent.user;
        tokio::spawn(async move { engine.execute_trade(user, request).await })
    });
    for joined in join_all(tasks).await {
        joined.unwrap().unwrap();
    }

    let sequential = harness(dec!(50)).await;
    for request in requests {
        sequential
            .engine
            .execute_trade(sequential.user, request)
            .await
            .unwrap();
    }

    assert_eq!(level(&concurrent).await, dec!(60));
    assert_eq!(level(&concurrent).await, level(&sequential).await);
    assert_eq!(trade_count(&concurrent).await, 30);

    let a = concurrent.engine.portfolio(concurrent.user).await.unwrap();
    let b = sequential.engine.portfolio(sequential.user).await.unwrap();
    assert_eq!(a.balance, dec!(10100));
    assert_eq!(a.balance, b.balance);
    assert_eq!(a.profit_loss, b.profit_loss);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_lazy_creation_yields_one_battery() {
    let h = harness(dec!(50)).await;
    let tasks = (0..16).map(|_| {
        let engine = h.engine.clone();
        let user = h.user;
        tokio::spawn(async move { engine.battery_status(user).await })
    });
    let ids: Vec<i64> = join_all(tasks)
        .await
        .into_iter()
        .map(|r| r.unwrap().unwrap().battery.id)
        .collect();
    assert!(ids.windows(2).all(|w| w[0] == w[1]));
}

#[tokio::test]
async fn test_failed_commit_is_compensated() {
    let inner = Arc::new(MemoryLedgerStore::new());
    let user = register(inner.as_ref(), "flaky@joule.test").await;
    let store = Arc::new(InterceptStore {
        inner: inner.clone(),
        intercept: Intercept::FailAfterBatteryWrite,
    });
    let engine = SettlementEngine::new(
        store,
        flat_oracle(Arc::new(MemoryMarketStore::new())),
        Arc::new(FakeClockProvider::new(t0())),
        settings(dec!(50)),
    );

    let err = engine.buy(user, dec!(40), Some(dec!(10))).await.unwrap_err();
    assert!(matches!(err, TradeError::SettlementFailed(_)));
    assert!(err.is_retryable());

    // 电量被补偿回结算前的值，且没有留下流水或资金变动
    let battery = inner.get_battery(user).await.unwrap().unwrap();
    assert_eq!(battery.current_level, dec!(50));
    assert!(inner.list_trades(user, None, None).await.unwrap().is_empty());
    assert_eq!(
        inner.get_portfolio(user).await.unwrap().unwrap().balance,
        dec!(10000)
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_different_users_settle_in_parallel() {
    let inner = Arc::new(MemoryLedgerStore::new());
    let alice = register(inner.as_ref(), "alice@joule.test").await;
    let bob = register(inner.as_ref(), "bob@joule.test").await;
    let store = Arc::new(InterceptStore {
        inner: inner.clone(),
        intercept: Intercept::Barrier(Arc::new(Barrier::new(2))),
    });
    let engine = Arc::new(SettlementEngine::new(
        store,
        flat_oracle(Arc::new(MemoryMarketStore::new())),
        Arc::new(FakeClockProvider::new(t0())),
        settings(dec!(50)),
    ));

    // 两个用户的提交必须同时停在屏障处，串行执行会超时失败
    let (a, b) = tokio::join!(engine.charge(alice, dec!(10)), engine.charge(bob, dec!(20)));
    assert_eq!(a.unwrap().battery.battery.current_level, dec!(60));
    assert_eq!(b.unwrap().battery.battery.current_level, dec!(70));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_commit_survives_caller_cancellation() {
    let inner = Arc::new(MemoryLedgerStore::new());
    let user = register(inner.as_ref(), "cancel@joule.test").await;
    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let store = Arc::new(InterceptStore {
        inner: inner.clone(),
        intercept: Intercept::Gate {
            entered: entered.clone(),
            release: release.clone(),
        },
    });
    let engine = Arc::new(SettlementEngine::new(
        store,
        flat_oracle(Arc::new(MemoryMarketStore::new())),
        Arc::new(FakeClockProvider::new(t0())),
        settings(dec!(50)),
    ));

    let caller = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.charge(user, dec!(25)).await })
    };
    entered.notified().await;
    caller.abort();
    release.notify_one();

    // battery_status 需要同一把用户锁，返回时提交任务必然已经结束
    let status = engine.battery_status(user).await.unwrap();
    assert_eq!(status.battery.current_level, dec!(75));
    let trades = inner.list_trades(user, None, None).await.unwrap();
    assert_eq!(trades.len(), 1);
    assert_eq!(trades[0].kind, TradeKind::Charge);
}

#[tokio::test]
async fn test_overflowing_amounts_are_rejected_without_side_effects() {
    let h = harness(dec!(50)).await;

    // 1 × MAX 本身不溢出，但叠加到余额上会溢出
    let err = h.engine.sell(h.user, dec!(1), Some(Decimal::MAX)).await.unwrap_err();
    assert!(matches!(err, TradeError::InvalidInput(_)), "{:?}", err);

    let err = h.engine.buy(h.user, dec!(2), Some(Decimal::MAX)).await.unwrap_err();
    assert!(matches!(err, TradeError::InvalidInput(_)), "{:?}", err);

    let err = h.engine.charge(h.user, Decimal::MAX).await.unwrap_err();
    assert!(matches!(err, TradeError::InsufficientCapacity { .. }), "{:?}", err);

    assert_eq!(level(&h).await, dec!(50));
    assert_eq!(trade_count(&h).await, 0);
    assert_eq!(h.engine.portfolio(h.user).await.unwrap().balance, dec!(10000));

    // 拒绝之后引擎照常工作
    let ok = h.engine.sell(h.user, dec!(1), Some(dec!(10))).await.unwrap();
    assert_eq!(ok.portfolio.map(|p| p.balance), Some(dec!(10010)));
}

#[tokio::test]
async fn test_filled_battery_with_uneven_capacity_drains_exactly() {
    let store = Arc::new(MemoryLedgerStore::new());
    let user = register(store.as_ref(), "uneven@joule.test").await;
    let mut engine_settings = settings(dec!(0));
    engine_settings.battery.capacity = dec!(3);
    let engine = SettlementEngine::new(
        store.clone(),
        flat_oracle(Arc::new(MemoryMarketStore::new())),
        Arc::new(FakeClockProvider::new(t0())),
        engine_settings,
    );

    for _ in 0..3 {
        engine.charge(user, dec!(1)).await.unwrap();
    }
    let full = engine.battery_status(user).await.unwrap();
    assert_eq!(full.battery.current_level, dec!(100));
    assert_eq!(full.current_energy, dec!(3));

    let drained = engine.discharge(user, dec!(3)).await.unwrap();
    assert_eq!(drained.battery.battery.current_level, dec!(0));
    assert_eq!(drained.battery.remaining_capacity, dec!(3));
}
