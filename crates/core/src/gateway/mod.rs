//! # 网关领域
//!
//! 管理网关协议的实体、错误与端口定义。

pub mod entity;
pub mod error;
pub mod port;
