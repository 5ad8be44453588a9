//! # `joule-trade` - 结算引擎
//!
//! 容量策略、按用户串行的锁注册表、结算引擎与账本查询服务。

pub mod lock;
pub mod policy;
pub mod query;
pub mod service;
