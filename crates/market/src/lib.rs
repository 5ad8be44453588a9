//! # `joule-market` - 价格预言机
//!
//! 显式价格 → 已记录价格 → 合成曲线 的三级询价实现。

pub mod oracle;
pub mod synthetic;
