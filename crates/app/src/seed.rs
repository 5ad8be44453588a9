use chrono::{DateTime, Duration, NaiveTime, Utc};
use joule_core::common::{Resolution, UserId};
use joule_core::config::SeedConfig;
use joule_core::market::entity::RecordedPrice;
use joule_core::market::port::MarketPriceStore;
use joule_core::store::entity::NewUser;
use joule_core::store::port::LedgerStore;
use joule_core::trade::port::{SettlementPort, TradeError};
use joule_market::synthetic::SyntheticPriceCurve;
use rust_decimal::Decimal;
use tracing::info;

/// 种子数据所需的依赖
pub struct SeedContext<'a> {
    pub ledger: &'a dyn LedgerStore,
    pub prices: &'a dyn MarketPriceStore,
    pub engine: &'a dyn SettlementPort,
    pub curve: &'a SyntheticPriceCurve,
    pub market: &'a str,
    pub initial_balance: Decimal,
}

/// # Summary
/// 写入演示数据，可重复执行。
///
/// # Logic
/// 1. 按邮箱查找种子用户，不存在才注册 (同时创建资金账户)。
/// 2. 通过结算引擎懒创建其电池。
/// 3. 按合成曲线为当天 (UTC) 的 24 个整点写入默认市场价格，重复写入覆盖旧值。
pub async fn run(
    config: &SeedConfig,
    ctx: &SeedContext<'_>,
    now: DateTime<Utc>,
) -> Result<UserId, TradeError> {
    let user = match ctx.ledger.get_user_by_email(&config.email).await? {
        Some(user) => user,
        None => {
            let user = ctx
                .ledger
                .create_user(
                    &NewUser {
                        email: config.email.clone(),
                        name: config.name.clone(),
                        credential_hash: config.credential_hash.clone(),
                    },
                    ctx.initial_balance,
                )
                .await?;
            info!("Seed user {} registered as {}", user.email, user.id);
            user
        }
    };

    let battery = ctx.engine.battery_status(user.id).await?;

    let midnight = now.date_naive().and_time(NaiveTime::MIN).and_utc();
    for hour in 0..24 {
        let period_start = midnight + Duration::hours(hour);
        ctx.prices
            .record_price(&RecordedPrice {
                market: ctx.market.to_string(),
                period_start,
                resolution: Resolution::Minute60,
                price: ctx.curve.price_at(period_start),
            })
            .await?;
    }

    info!(
        "Seed data ready: user {} battery at {}%, 24 hourly prices recorded for {} on {}",
        user.id,
        battery.battery.current_level,
        ctx.market,
        midnight.date_naive()
    );
    Ok(user.id)
}
