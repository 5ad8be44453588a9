use chrono::{DateTime, Timelike, Utc};
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use rust_decimal::Decimal;
use std::f64::consts::PI;
use std::sync::Mutex;

/// 合成价格无法表示时使用的兜底价格
pub const FALLBACK_PRICE: Decimal = Decimal::from_parts(4500, 0, 0, false, 2);

/// 默认随机扰动幅度
const DEFAULT_JITTER: f64 = 5.0;

/// # Summary
/// 按一天中的小时生成合成电价：`50 + 10·sin(hour/12·π)`，叠加 `[-jitter, jitter]` 的均匀扰动，保留两位小数。
///
/// # Invariants
/// - 随机源可注入：测试中使用固定种子，结果完全可复现。
/// - 价格始终落在 `[40 - jitter, 60 + jitter]` 内。
pub struct SyntheticPriceCurve {
    rng: Mutex<Box<dyn RngCore + Send>>,
    jitter: f64,
}

impl SyntheticPriceCurve {
    /// 使用注入的随机源创建曲线
    pub fn with_rng(rng: impl RngCore + Send + 'static) -> Self {
        Self {
            rng: Mutex::new(Box::new(rng)),
            jitter: DEFAULT_JITTER,
        }
    }

    /// 固定种子，保证同一序列的询价结果可复现
    pub fn seeded(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    /// 取系统熵作为种子
    pub fn from_entropy() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// 调整扰动幅度，0 表示关闭扰动
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.abs();
        self
    }

    /// 不含扰动的基准价
    pub fn base_price(hour: u32) -> f64 {
        50.0 + 10.0 * (f64::from(hour) / 12.0 * PI).sin()
    }

    /// # Logic
    /// 1. 取时间点的 UTC 小时计算基准价。
    /// 2. 从随机源抽取扰动 (锁中毒时沿用内部状态继续使用)。
    /// 3. 四舍五入到两位小数；无法表示时返回 `FALLBACK_PRICE`。
    pub fn price_at(&self, at: DateTime<Utc>) -> Decimal {
        let base = Self::base_price(at.hour());
        let variation = if self.jitter > 0.0 {
            let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
            rng.gen_range(-self.jitter..=self.jitter)
        } else {
            0.0
        };

        Decimal::from_f64_retain(base + variation)
            .map(|p| p.round_dp(2))
            .unwrap_or(FALLBACK_PRICE)
    }
}
