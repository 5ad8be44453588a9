//! # `joule-store` - 持久化适配器
//!
//! `LedgerStore` / `MarketPriceStore` 的 SQLite 实现 (sqlx) 与内存实现。

pub mod config;
pub mod ledger;
pub mod market;
pub mod memory;

mod row;
