use serde::{Deserialize, Serialize};
use std::fmt;

pub mod time;

/// # Summary
/// 用户的系统内唯一标识，由持久层自增分配。
///
/// # Invariants
/// - 电池、资产组合与成交流水均以此作为外键归属。
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// # Summary
/// 成交流水的系统内唯一标识。
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct TradeId(pub i64);

impl fmt::Display for TradeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// # Summary
/// 电力市场的交割时间粒度。
///
/// # Invariants
/// - 只允许 15 / 30 / 60 分钟三档。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum Resolution {
    // 15 分钟
    Minute15,
    // 30 分钟
    Minute30,
    // 1 小时
    #[default]
    Minute60,
}

impl Resolution {
    /// 粒度对应的分钟数
    pub fn minutes(self) -> i64 {
        match self {
            Resolution::Minute15 => 15,
            Resolution::Minute30 => 30,
            Resolution::Minute60 => 60,
        }
    }
}

impl TryFrom<i64> for Resolution {
    type Error = String;

    fn try_from(minutes: i64) -> Result<Self, Self::Error> {
        match minutes {
            15 => Ok(Resolution::Minute15),
            30 => Ok(Resolution::Minute30),
            60 => Ok(Resolution::Minute60),
            _ => Err(format!("Unsupported resolution: {} minutes", minutes)),
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}m", self.minutes())
    }
}
