use crate::common::UserId;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// # Summary
/// 用户实体，身份锚点。
///
/// # Invariants
/// - `email` 全局唯一。
/// - 一个用户恰好拥有一块电池与一个资产组合。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub name: String,
    // 凭证摘要，由外部鉴权模块生成，存储层不解析
    pub credential_hash: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// 注册用户时的输入
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub name: String,
    pub credential_hash: String,
}

/// # Summary
/// 单个用户的储能电池状态。
///
/// # Invariants
/// - `0 <= current_level <= 100`。
/// - `capacity > 0`，`0 < efficiency <= 1`。
/// - 只允许结算引擎修改 `current_level`。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Battery {
    pub id: i64,
    pub user_id: UserId,
    // 当前电量百分比
    pub current_level: Decimal,
    // 容量 (kWh)
    pub capacity: Decimal,
    pub max_charge_rate: Decimal,
    pub max_discharge_rate: Decimal,
    pub efficiency: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Battery {
    /// 当前储存的能量 (kWh) = level / 100 × capacity
    pub fn current_energy(&self) -> Decimal {
        (self.current_level / Decimal::ONE_HUNDRED).saturating_mul(self.capacity)
    }

    /// 剩余可充入的能量 (kWh)
    pub fn remaining_capacity(&self) -> Decimal {
        self.capacity.saturating_sub(self.current_energy())
    }
}

/// 懒创建电池时写入的出厂参数
#[derive(Debug, Clone)]
pub struct BatterySpec {
    pub initial_level: Decimal,
    pub capacity: Decimal,
    pub max_charge_rate: Decimal,
    pub max_discharge_rate: Decimal,
    pub efficiency: Decimal,
}

impl From<&crate::config::BatteryConfig> for BatterySpec {
    fn from(c: &crate::config::BatteryConfig) -> Self {
        Self {
            initial_level: c.initial_level,
            capacity: c.capacity,
            max_charge_rate: c.max_charge_rate,
            max_discharge_rate: c.max_discharge_rate,
            efficiency: c.efficiency,
        }
    }
}

/// # Summary
/// 用户的资金账户。
///
/// # Invariants
/// - `profit_loss` 是累计值，可以为负。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Portfolio {
    pub id: i64,
    pub user_id: UserId,
    pub balance: Decimal,
    pub profit_loss: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
