use super::entity::{Quote, RecordedPrice};
use crate::store::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

/// # Summary
/// 已记录市场价格的持久化接口。
///
/// # Invariants
/// - 同一 `(market, period_start, resolution)` 只保留最后一次写入。
#[async_trait]
pub trait MarketPriceStore: Send + Sync {
    /// # Summary
    /// 记录一个交割时段的价格 (Upsert)。
    async fn record_price(&self, price: &RecordedPrice) -> Result<(), StoreError>;

    /// # Summary
    /// 查询覆盖指定时间点的已记录价格。
    ///
    /// # Logic
    /// 在 `market` 下寻找 `period_start <= at < period_end` 的时段，
    /// 多个时段重叠时取开始时间最晚的一个。
    ///
    /// # Returns
    /// 命中返回 `Some(price)`，否则返回 `None`。
    async fn recorded_price(
        &self,
        market: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<Decimal>, StoreError>;
}

/// # Summary
/// 价格预言机。给定市场与时间点，总能返回一个可用价格。
///
/// # Invariants
/// - 永不失败：底层查询出错时回退到合成价格。
/// - 调用方显式给出价格时原样返回，不访问市场数据。
#[async_trait]
pub trait PriceOracle: Send + Sync {
    /// # Summary
    /// 解析成交价格。
    ///
    /// # Logic
    /// 1. `explicit` 存在时直接使用 (`PriceSource::Explicit`)。
    /// 2. 否则查询已记录价格 (`PriceSource::Recorded`)。
    /// 3. 仍无结果则按合成曲线生成 (`PriceSource::Synthetic`)。
    async fn resolve(&self, market: &str, at: DateTime<Utc>, explicit: Option<Decimal>) -> Quote;
}
