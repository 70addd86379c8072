use async_trait::async_trait;
use mt5_core::gateway::error::GatewayError;
use mt5_core::gateway::port::{HttpMethod, RequestBody, Transport, TransportRequest, TransportResponse};
use reqwest::header::{CONNECTION, COOKIE, SET_COOKIE};
use reqwest::{Client, Url};
use std::time::Duration;
use tracing::trace;

/// # Summary
/// HTTPS 客户端的可调参数。
///
/// # Invariants
/// - `timeout == None` 表示请求不设超时。
#[derive(Debug, Clone, Copy)]
pub struct TransportOptions {
    pub timeout: Option<Duration>,
    pub accept_invalid_certs: bool,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            timeout: Some(Duration::from_secs(10)),
            accept_invalid_certs: true,
        }
    }
}

/// # Summary
/// 基于 `reqwest` 的 `Transport` 实现。
///
/// # Invariants
/// - 每个网关端点使用一个带连接池的长连接客户端。
/// - 与协议无关：主机返回什么状态与正文就原样交出。
#[derive(Clone)]
pub struct ReqwestTransport {
    /// 共享的 HTTP 客户端
    client: Client,
    /// 网关的协议、主机与端口
    base_url: Url,
}

impl ReqwestTransport {
    /// # Summary
    /// 为 `base_url` 构造传输。
    ///
    /// # Logic
    /// 1. 校验 URL（http/https 且带主机）。
    /// 2. 若尚未安装，则安装 rustls 的 `ring` 加密实现。
    /// 3. 为新的 `reqwest` 客户端设置超时与证书策略。
    ///
    /// # Arguments
    /// * `base_url` - 例如 `https://10.0.0.5:1950`
    /// * `options` - 超时与 TLS 策略
    ///
    /// # Returns
    /// * `Ok(ReqwestTransport)` - 构造成功
    /// * `Err(GatewayError::Config)` - URL 非法或客户端构造失败
    pub fn new(base_url: &str, options: TransportOptions) -> Result<Self, GatewayError> {
        let base_url = parse_base_url(base_url)?;

        if rustls::crypto::ring::default_provider().install_default().is_err() {
            trace!("rustls crypto provider already installed");
        }

        let mut builder = Client::builder().danger_accept_invalid_certs(options.accept_invalid_certs);
        if let Some(timeout) = options.timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| GatewayError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client, base_url })
    }
}

/// # Summary
/// 解析并校验网关基础 URL。
///
/// # Arguments
/// * `base_url` - 配置中的 URL 文本
///
/// # Returns
/// * `Ok(Url)` - http/https 且带主机
/// * `Err(GatewayError::Config)` - 其它情况
pub fn parse_base_url(base_url: &str) -> Result<Url, GatewayError> {
    let url = Url::parse(base_url)
        .map_err(|e| GatewayError::Config(format!("Invalid base URL {}: {}", base_url, e)))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(GatewayError::Config(format!(
            "Unsupported scheme in base URL: {}",
            base_url
        )));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(GatewayError::Config(format!("Base URL has no host: {}", base_url)));
    }
    Ok(url)
}

#[async_trait]
impl Transport for ReqwestTransport {
    /// # Summary
    /// 向网关主机发送一次请求。
    ///
    /// # Logic
    /// 1. 将路径拼接到基础 URL 上并附加查询参数。
    /// 2. 附加 keep-alive 头、亲和 Cookie 与编码后的请求体。
    /// 3. 收集状态码、全部 `Set-Cookie` 值与正文。
    ///
    /// # Arguments
    /// * `request` - 已编码的请求
    ///
    /// # Returns
    /// 原始响应；无响应时返回 `Transport` 错误。
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, GatewayError> {
        let path = request.path;
        let url = self
            .base_url
            .join(&path)
            .map_err(|e| GatewayError::network(&path, format!("Invalid request path: {}", e)))?;

        let mut builder = match request.method {
            HttpMethod::Get => self.client.get(url),
            HttpMethod::Post => self.client.post(url),
        };
        builder = builder.header(CONNECTION, "keep-alive");
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(cookie) = request.cookie.as_deref() {
            builder = builder.header(COOKIE, cookie);
        }
        builder = match request.body {
            RequestBody::Empty => builder,
            RequestBody::Form(pairs) => builder.form(&pairs),
            RequestBody::Json(value) => builder.json(&value),
        };

        let response = builder
            .send()
            .await
            .map_err(|e| GatewayError::network(&path, format!("Request error: {}", e)))?;

        let status = response.status().as_u16();
        let set_cookie = response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .map(str::to_string)
            .collect();
        let body = response
            .text()
            .await
            .map_err(|e| GatewayError::network(&path, format!("Failed to read body: {}", e)))?;

        Ok(TransportResponse {
            status,
            set_cookie,
            body,
        })
    }
}
