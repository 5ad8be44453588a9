use crate::common::Resolution;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// # Summary
/// 市场数据中记录的一个交割时段价格。
///
/// # Invariants
/// - 覆盖区间为 `[period_start, period_start + resolution)`。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecordedPrice {
    // 市场标识 (例如: Germany)
    pub market: String,
    // 交割时段开始时间
    pub period_start: DateTime<Utc>,
    // 交割时段粒度
    pub resolution: Resolution,
    // 时段收盘价
    pub price: Decimal,
}

impl RecordedPrice {
    pub fn period_end(&self) -> DateTime<Utc> {
        self.period_start + Duration::minutes(self.resolution.minutes())
    }

    /// 判断时间点是否落在本时段内
    pub fn covers(&self, at: DateTime<Utc>) -> bool {
        self.period_start <= at && at < self.period_end()
    }
}

/// 成交价格的来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PriceSource {
    /// 调用方显式指定
    Explicit,
    /// 市场数据中已记录的价格
    Recorded,
    /// 无记录时的合成曲线
    Synthetic,
    /// 充放电的固定零价
    Fixed,
}

/// # Summary
/// 询价结果，携带价格来源以便调用方区分真实价格与合成价格。
#[derive(Debug, Clone, PartialEq)]
pub struct Quote {
    pub market: String,
    pub at: DateTime<Utc>,
    pub price: Decimal,
    pub source: PriceSource,
}
