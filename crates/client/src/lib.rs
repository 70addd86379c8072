//! # `mt5-client`
//!
//! MT5 管理端 Web API 网关的认证客户端。
//!
//! 自底向上的分层：
//! - `hash`：握手摘要
//! - `transport`：HTTPS 传输
//! - `session`：认证状态与亲和 Cookie
//! - `auth`：两轮握手
//! - `dispatcher`：已认证调用，会话丢失时重试一次
//! - `fallback`：凭据编码策略链
//! - `client`：类型化的业务操作

pub mod auth;
pub mod client;
pub mod dispatcher;
pub mod fallback;
pub mod hash;
pub mod session;
pub mod transport;

#[cfg(test)]
mod testing;

pub use client::{ClientOptions, Mt5Client};
pub use transport::{ReqwestTransport, TransportOptions};
