mod logging;
mod seed;
mod settings;

use std::sync::Arc;
use std::time::Duration;

use joule_cache::mem::MemCache;
use joule_core::cache::port::Cache;
use joule_core::common::time::{RealTimeProvider, TimeProvider};
use joule_core::store::port::LedgerStore;
use joule_core::trade::port::{LedgerQueryPort, SettlementPort};
use joule_market::oracle::MarketPriceOracle;
use joule_market::synthetic::SyntheticPriceCurve;
use joule_store::config::StoreConfig;
use joule_store::ledger::SqliteLedgerStore;
use joule_store::market::SqliteMarketStore;
use joule_trade::query::LedgerQueryService;
use joule_trade::service::{EngineSettings, SettlementEngine};
use tracing::info;

/// 构造合成价格曲线，配置了种子时结果可复现
fn price_curve(seed: Option<u64>) -> SyntheticPriceCurve {
    match seed {
        Some(seed) => SyntheticPriceCurve::seeded(seed),
        None => SyntheticPriceCurve::from_entropy(),
    }
}

/// # Summary
/// 应用启动入口，纯粹的 DI 容器。
/// 负责实例化所有具体实现组件并通过 Arc<dyn Trait> 注入到结算引擎与查询服务。
///
/// # Logic
/// 1. 加载分层配置并初始化日志。
/// 2. 实例化基础设施层 (SQLite 账本、行情存储、内存缓存)。
/// 3. 实例化领域实现层 (价格预言机、结算引擎、查询服务)。
/// 4. 按需写入演示数据。
/// 5. 挂起等待外部信号退出。
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. 配置与日志
    let config = settings::load(&settings::config_path())?;
    let _log_guard = logging::init(&config.log);
    info!("Joule settlement backend starting...");

    // 2. 基础设施层
    let store_config = StoreConfig::from(&config.database);
    let ledger: Arc<dyn LedgerStore> = Arc::new(SqliteLedgerStore::open(&store_config).await?);
    let prices = Arc::new(SqliteMarketStore::open(&store_config).await?);
    let cache: Arc<dyn Cache> = Arc::new(MemCache::new());
    let clock: Arc<dyn TimeProvider> = Arc::new(RealTimeProvider);

    // 3. 领域实现层
    let oracle = Arc::new(MarketPriceOracle::new(
        prices.clone(),
        price_curve(config.market.price_seed),
    ));
    let engine = Arc::new(
        SettlementEngine::new(
            ledger.clone(),
            oracle,
            clock.clone(),
            EngineSettings::from(&config),
        )
        .with_cache(cache.clone()),
    );
    let query = Arc::new(LedgerQueryService::new(ledger.clone()).with_cache(
        cache,
        Duration::from_secs(config.cache.trades_ttl_secs),
        engine.locks(),
    ));

    // 4. 演示数据
    if config.seed.enabled {
        let curve = price_curve(config.market.price_seed);
        let ctx = seed::SeedContext {
            ledger: ledger.as_ref(),
            prices: prices.as_ref(),
            engine: engine.as_ref(),
            curve: &curve,
            market: &config.market.default_market,
            initial_balance: config.portfolio.initial_balance,
        };
        seed::run(&config.seed, &ctx, clock.now()).await?;
    }

    // 请求层只看到端口
    let _settlement: Arc<dyn SettlementPort> = engine;
    let _ledger_query: Arc<dyn LedgerQueryPort> = query;
    info!(
        "Settlement engine ready (data dir: {}, default market: {}). Waiting for signals...",
        config.database.data_dir, config.market.default_market
    );

    // 5. 挂起主线程，等待外部退出信号
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received. Exiting...");

    Ok(())
}
