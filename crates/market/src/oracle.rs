use crate::synthetic::SyntheticPriceCurve;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use joule_core::market::entity::{PriceSource, Quote};
use joule_core::market::port::{MarketPriceStore, PriceOracle};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, warn};

/// # Summary
/// 基于已记录市场数据与合成曲线的价格预言机。
///
/// # Invariants
/// - 询价永不失败，存储出错时降级为合成价格并记录告警。
pub struct MarketPriceOracle {
    store: Arc<dyn MarketPriceStore>,
    curve: SyntheticPriceCurve,
}

impl MarketPriceOracle {
    pub fn new(store: Arc<dyn MarketPriceStore>, curve: SyntheticPriceCurve) -> Self {
        Self { store, curve }
    }
}

#[async_trait]
impl PriceOracle for MarketPriceOracle {
    async fn resolve(&self, market: &str, at: DateTime<Utc>, explicit: Option<Decimal>) -> Quote {
        let quote = |price, source| Quote {
            market: market.to_string(),
            at,
            price,
            source,
        };

        if let Some(price) = explicit {
            return quote(price, PriceSource::Explicit);
        }

        match self.store.recorded_price(market, at).await {
            Ok(Some(price)) => return quote(price, PriceSource::Recorded),
            Ok(None) => {
                debug!("No recorded price for {} at {}, using synthetic curve", market, at);
            }
            Err(e) => {
                warn!(
                    "Recorded price lookup failed for {} at {}: {}. Falling back to synthetic curve",
                    market, at, e
                );
            }
        }

        quote(self.curve.price_at(at), PriceSource::Synthetic)
    }
}
