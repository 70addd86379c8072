use thiserror::Error;

/// # Summary
/// 与管理网关通讯过程中产生的错误。
///
/// # Invariants
/// - 只有 [`GatewayError::is_session_loss`] 为真的错误会被自动恢复（作废会话后重试一次），
///   其余错误原样返回给调用方。
/// - 必须通过 `thiserror` 派生 `Error` trait。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    // 网络失败 (`status == None`) 或非 2xx 的 HTTP 状态
    #[error("Transport error on {path}: {}", display_status(.status, .message))]
    Transport {
        status: Option<u16>,
        path: String,
        message: String,
    },

    // 握手未能建立可信会话
    #[error("Handshake failed: {0}")]
    Handshake(#[from] HandshakeError),

    // 网关对普通调用返回了非成功结果码
    #[error("Gateway error: {retcode}")]
    Application { retcode: String },

    // 响应体或载荷结构与预期不符
    #[error("Decode error: {0}")]
    Decode(String),

    // 端点描述不可用
    #[error("Configuration error: {0}")]
    Config(String),

    // 调用方在发送前违反了操作约定
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

fn display_status(status: &Option<u16>, message: &str) -> String {
    match status {
        Some(code) => format!("HTTP {}: {}", code, message),
        None => message.to_string(),
    }
}

/// # Summary
/// 单次握手尝试的失败原因。
///
/// # Invariants
/// - 对本次尝试总是致命的，下一次调用会重新发起握手。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    // `/api/auth/start` 拒绝了登录或缺少 `srv_rand`
    #[error("auth/start rejected: {0}")]
    Start(String),

    // `/api/auth/answer` 拒绝了客户端证明
    #[error("auth/answer rejected: {0}")]
    Answer(String),

    // 握手响应不是 JSON 信封
    #[error("malformed {step} response: {raw}")]
    MalformedResponse { step: &'static str, raw: String },

    // 服务端随机数不是合法十六进制
    #[error("invalid server nonce: {0}")]
    InvalidNonce(String),

    // 服务端无法证明其持有密码
    #[error("server failed mutual authentication")]
    MutualAuth,
}

/// 网关用于表示会话丢失或被拒绝的结果码区间（按前导整数）
const SESSION_LOSS_CODES: std::ops::RangeInclusive<i64> = 1000..=1099;

impl GatewayError {
    /// # Summary
    /// 为非 2xx 响应构造传输错误。
    ///
    /// # Arguments
    /// * `path` - 请求路径
    /// * `status` - HTTP 状态码
    /// * `body` - 响应正文
    ///
    /// # Returns
    /// 携带状态码的 `Transport` 错误。
    pub fn status(path: &str, status: u16, body: impl Into<String>) -> Self {
        GatewayError::Transport {
            status: Some(status),
            path: path.to_string(),
            message: body.into(),
        }
    }

    /// # Summary
    /// 为未得到任何响应的请求构造传输错误。
    ///
    /// # Arguments
    /// * `path` - 请求路径
    /// * `message` - 底层错误描述
    ///
    /// # Returns
    /// `status` 为 `None` 的 `Transport` 错误。
    pub fn network(path: &str, message: impl Into<String>) -> Self {
        GatewayError::Transport {
            status: None,
            path: path.to_string(),
            message: message.into(),
        }
    }

    /// 是否为传输层失败，回退链只跳过这一类错误。
    pub fn is_transport(&self) -> bool {
        matches!(self, GatewayError::Transport { .. })
    }

    /// # Summary
    /// 判断该错误是否表示网关已不再识别当前会话。
    ///
    /// # Logic
    /// 1. HTTP 401 与 403 一律视为会话丢失。
    /// 2. 处于管理授权区间的应用结果码视为会话丢失。
    /// 3. 结果描述中提及会话或未授权的，同样视为会话丢失（部分网关使用通用结果码）。
    ///
    /// # Returns
    /// 是会话丢失时返回 `true`。
    pub fn is_session_loss(&self) -> bool {
        match self {
            GatewayError::Transport {
                status: Some(401 | 403),
                ..
            } => true,
            GatewayError::Application { retcode } => retcode_signals_session_loss(retcode),
            _ => false,
        }
    }
}

/// # Summary
/// 解析结果码的前导整数，例如 `"3006 Invalid account password"` 得到 3006。
///
/// # Arguments
/// * `retcode` - 网关返回的结果码文本
///
/// # Returns
/// 前导整数；没有数字前缀时返回 `None`。
pub fn retcode_number(retcode: &str) -> Option<i64> {
    let digits: &str = retcode
        .trim_start()
        .split(|c: char| !c.is_ascii_digit())
        .next()
        .unwrap_or_default();
    digits.parse().ok()
}

fn retcode_signals_session_loss(retcode: &str) -> bool {
    if retcode_number(retcode).is_some_and(|code| SESSION_LOSS_CODES.contains(&code)) {
        return true;
    }
    let lower = retcode.to_ascii_lowercase();
    lower.contains("session") || lower.contains("not authorized") || lower.contains("unauthorized")
}
