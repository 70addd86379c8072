//! # `mt5-core`
//!
//! 网关客户端的公共词汇层：配置描述、线上实体（信封、凭据、业务载荷）、
//! 错误分类以及 `Transport` 端口。本 crate 不执行任何 I/O。

pub mod config;
pub mod gateway;
