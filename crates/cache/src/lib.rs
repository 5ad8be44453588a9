//! # `joule-cache` - 缓存适配器
//!
//! `Cache` 端口的内存实现。

pub mod mem;
