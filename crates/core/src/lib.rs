//! # `joule-core` - 领域内核
//!
//! 储能交易后端的实体、端口 (Trait) 与错误定义。
//! 本 crate 不做任何 I/O，具体实现由 store / market / cache / trade 等 crate 注入。

pub mod common;
pub mod config;

pub mod cache {
    pub mod error;
    pub mod port;
}

pub mod market {
    pub mod entity;
    pub mod port;
}

pub mod store {
    pub mod entity;
    pub mod error;
    pub mod port;
}

pub mod trade {
    pub mod entity;
    pub mod port;
}
