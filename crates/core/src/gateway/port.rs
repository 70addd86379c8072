use crate::gateway::error::GatewayError;
use async_trait::async_trait;
use serde_json::Value;
use std::fmt;

/// 网关支持的 HTTP 方法
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Post,
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HttpMethod::Get => f.write_str("GET"),
            HttpMethod::Post => f.write_str("POST"),
        }
    }
}

/// 线上发送的请求体
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Empty,
    /// 表单编码 `application/x-www-form-urlencoded`
    Form(Vec<(String, String)>),
    /// JSON 编码 `application/json`
    Json(Value),
}

/// # Summary
/// 一次已完整编码的出站请求。
///
/// # Invariants
/// - `path` 为绝对路径（`/api/...`），不含查询串。
/// - 查询参数放在 `query` 中，由传输层负责 URL 编码。
#[derive(Debug, Clone, PartialEq)]
pub struct TransportRequest {
    pub method: HttpMethod,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: RequestBody,
    /// 需要回传的会话亲和 Cookie（`name=value`）
    pub cookie: Option<String>,
}

impl TransportRequest {
    /// # Summary
    /// 构造一个无请求体的 GET 请求。
    ///
    /// # Arguments
    /// * `path` - 绝对路径
    /// * `query` - 查询参数
    ///
    /// # Returns
    /// 未附带 Cookie 的请求。
    pub fn get(path: impl Into<String>, query: Vec<(String, String)>) -> Self {
        Self {
            method: HttpMethod::Get,
            path: path.into(),
            query,
            body: RequestBody::Empty,
            cookie: None,
        }
    }
}

/// 原始响应：状态码、全部 `Set-Cookie` 头以及正文
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransportResponse {
    pub status: u16,
    pub set_cookie: Vec<String>,
    pub body: String,
}

impl TransportResponse {
    /// 状态码是否为 2xx
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// # Summary
/// 与网关主机之间的底层请求/响应交换端口。
///
/// # Invariants
/// - 实现方不感知信封、会话或重试。
/// - 非 2xx 状态作为响应返回而不是错误，只有完全没有响应的失败才成为 `GatewayError::Transport`。
/// - 必须是 `Send + Sync`，同一实例被所有并发调用共享。
#[async_trait]
pub trait Transport: Send + Sync {
    /// # Summary
    /// 发送一次请求并读取完整响应。
    ///
    /// # Arguments
    /// * `request` - 已编码的请求
    ///
    /// # Returns
    /// * `Ok(TransportResponse)` - 只要服务端有应答
    /// * `Err(GatewayError::Transport)` - 连接、TLS、超时或读取失败
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, GatewayError>;
}
