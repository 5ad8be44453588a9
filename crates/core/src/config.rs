use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// 全局应用配置
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub battery: BatteryConfig,
    pub portfolio: PortfolioConfig,
    pub market: MarketConfig,
    pub cache: CacheConfig,
    pub log: LogConfig,
    pub seed: SeedConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub data_dir: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            data_dir: "data".to_string(),
            max_connections: 4,
        }
    }
}

/// # Summary
/// 懒创建电池时使用的出厂参数。
///
/// # Invariants
/// - `capacity` > 0, `0 < efficiency <= 1`, `0 <= initial_level <= 100`。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatteryConfig {
    // 初始电量百分比
    pub initial_level: Decimal,
    // 容量 (kWh)
    pub capacity: Decimal,
    // 最大充电功率 (kW)
    pub max_charge_rate: Decimal,
    // 最大放电功率 (kW)
    pub max_discharge_rate: Decimal,
    // 充放电效率
    pub efficiency: Decimal,
}

impl Default for BatteryConfig {
    fn default() -> Self {
        Self {
            initial_level: Decimal::from(50),
            capacity: Decimal::from(100),
            max_charge_rate: Decimal::from(10),
            max_discharge_rate: Decimal::from(10),
            efficiency: Decimal::new(95, 2),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PortfolioConfig {
    pub initial_balance: Decimal,
}

impl Default for PortfolioConfig {
    fn default() -> Self {
        Self {
            initial_balance: Decimal::from(10000),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketConfig {
    // 买卖单未指定市场时使用的默认市场
    pub default_market: String,
    // 合成价格随机源的种子，为空时取系统熵
    pub price_seed: Option<u64>,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            default_market: "Germany".to_string(),
            price_seed: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub trades_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { trades_ttl_secs: 300 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    // 为空时只输出到终端
    pub dir: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            dir: None,
        }
    }
}

/// 启动时写入的演示账户
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SeedConfig {
    pub enabled: bool,
    pub email: String,
    pub name: String,
    pub credential_hash: String,
}

impl Default for SeedConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            email: "demo@joule.local".to_string(),
            name: "Demo Trader".to_string(),
            credential_hash: "!".to_string(),
        }
    }
}
