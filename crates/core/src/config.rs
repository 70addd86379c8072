use serde::{Deserialize, Serialize};
use std::fmt;

/// 握手时声明的默认协议版本号
pub const DEFAULT_BUILD: &str = "2000";

/// 握手时声明的默认客户端代理标识
pub const DEFAULT_AGENT: &str = "WebAPI";

/// 全局应用配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub gateway: GatewayConfig,
}

/// # Summary
/// 单个管理网关端点的描述。
///
/// # Invariants
/// - 仅在客户端构造时读取一次，不支持运行时热加载。
/// - `base_url` 必须包含协议头，例如 `https://10.0.0.5:443`。
/// - `Debug` 输出中密码始终被遮蔽。
#[derive(Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_id")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub base_url: String,
    pub login: String,
    pub password: String,
    /// 单次请求超时（毫秒），`None` 表示不设上限
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default = "default_build")]
    pub build: String,
    #[serde(default = "default_agent")]
    pub agent: String,
    /// 网关是私有交易服务器，通常没有公共证书链
    #[serde(default = "default_true")]
    pub accept_invalid_certs: bool,
    /// 凭据类操作是否允许退化到查询字符串编码
    #[serde(default = "default_true")]
    pub allow_password_in_query: bool,
}

fn default_id() -> String {
    "default".to_string()
}

fn default_build() -> String {
    DEFAULT_BUILD.to_string()
}

fn default_agent() -> String {
    DEFAULT_AGENT.to_string()
}

fn default_true() -> bool {
    true
}

impl fmt::Debug for GatewayConfig {
    /// # Summary
    /// 输出端点描述，遮蔽密码字段。
    ///
    /// # Logic
    /// 1. 逐字段输出，`password` 固定替换为 `<redacted>`。
    ///
    /// # Arguments
    /// * `f` - 格式化器
    ///
    /// # Returns
    /// 格式化结果。
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("base_url", &self.base_url)
            .field("login", &self.login)
            .field("password", &"<redacted>")
            .field("timeout_ms", &self.timeout_ms)
            .field("build", &self.build)
            .field("agent", &self.agent)
            .field("accept_invalid_certs", &self.accept_invalid_certs)
            .field("allow_password_in_query", &self.allow_password_in_query)
            .finish()
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            id: default_id(),
            name: String::new(),
            base_url: "https://127.0.0.1:443".to_string(),
            login: String::new(),
            password: String::new(),
            timeout_ms: Some(10_000),
            build: default_build(),
            agent: default_agent(),
            accept_invalid_certs: true,
            allow_password_in_query: true,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            gateway: GatewayConfig::default(),
        }
    }
}
