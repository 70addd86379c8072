use crate::dispatcher::{BodyEncoding, Dispatcher, Params};
use mt5_core::gateway::entity::{Envelope, PasswordType};
use mt5_core::gateway::error::GatewayError;
use mt5_core::gateway::port::HttpMethod;
use tracing::debug;

/// 校验密码接口
pub const CHECK_PASSWORD_PATH: &str = "/api/user/check_password";
/// 修改密码接口
pub const CHANGE_PASSWORD_PATH: &str = "/api/user/change_password";

/// 策略使用的字段名大小写
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldCase {
    /// 小写：`login`、`type`、`password`
    Lower,
    /// 首字母大写：`Login`、`Type`、`Password`
    Upper,
}

/// # Summary
/// 凭据请求的一种编码方式。
///
/// # Invariants
/// - 只描述编码，不包含任何发送逻辑。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FallbackStrategy {
    pub label: &'static str,
    pub method: HttpMethod,
    pub encoding: BodyEncoding,
    pub case: FieldCase,
}

impl FallbackStrategy {
    /// 该策略是否把密码放进查询串
    pub fn puts_password_in_query(&self) -> bool {
        self.method == HttpMethod::Get
    }

    /// # Summary
    /// 按本策略的字段大小写构造参数。
    ///
    /// # Logic
    /// 1. 按 `case` 选择字段名。
    /// 2. 密码类型始终以小写发送。
    ///
    /// # Arguments
    /// * `request` - 凭据请求
    ///
    /// # Returns
    /// 有序参数表。
    fn params(&self, request: &CredentialRequest<'_>) -> Params {
        let (login, kind, password) = match self.case {
            FieldCase::Lower => ("login", "type", "password"),
            FieldCase::Upper => ("Login", "Type", "Password"),
        };
        Params::new()
            .with(login, request.login)
            .with(kind, request.password_type.as_str())
            .with(password, request.password)
    }
}

/// 凭据操作的编码优先顺序
const STRATEGIES: [FallbackStrategy; 5] = [
    FallbackStrategy {
        label: "json-post",
        method: HttpMethod::Post,
        encoding: BodyEncoding::Json,
        case: FieldCase::Upper,
    },
    FallbackStrategy {
        label: "get-lower",
        method: HttpMethod::Get,
        encoding: BodyEncoding::Form,
        case: FieldCase::Lower,
    },
    FallbackStrategy {
        label: "get-upper",
        method: HttpMethod::Get,
        encoding: BodyEncoding::Form,
        case: FieldCase::Upper,
    },
    FallbackStrategy {
        label: "form-post-lower",
        method: HttpMethod::Post,
        encoding: BodyEncoding::Form,
        case: FieldCase::Lower,
    },
    FallbackStrategy {
        label: "form-post-upper",
        method: HttpMethod::Post,
        encoding: BodyEncoding::Form,
        case: FieldCase::Upper,
    },
];

/// # Summary
/// 返回策略链。
///
/// # Arguments
/// * `allow_password_in_query` - 为 `false` 时去掉两个 GET 策略
///
/// # Returns
/// 按优先顺序排列的策略。
pub fn credential_strategies(allow_password_in_query: bool) -> Vec<FallbackStrategy> {
    STRATEGIES
        .iter()
        .filter(|s| allow_password_in_query || !s.puts_password_in_query())
        .copied()
        .collect()
}

/// # Summary
/// 校验或修改密码的请求字段。
///
/// # Invariants
/// - `Debug` 输出中密码始终被遮蔽。
#[derive(Clone, Copy)]
pub struct CredentialRequest<'a> {
    pub login: u64,
    pub password: &'a str,
    pub password_type: PasswordType,
}

impl std::fmt::Debug for CredentialRequest<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialRequest")
            .field("login", &self.login)
            .field("password", &"<redacted>")
            .field("password_type", &self.password_type)
            .finish()
    }
}

/// # Summary
/// 发送凭据操作，沿策略链依次尝试直到得到应答。
///
/// # Logic
/// 1. 每个策略都经调度器的原始路径发送，享有会话重试策略。
/// 2. 收到的第一个信封原样返回，`3006 Invalid account password` 这类非成功结果码属于应答而非失败。
/// 3. 握手失败立即结束，后续策略依赖同一会话。
/// 4. 全部策略失败时返回第一个策略的错误。
///
/// # Arguments
/// * `dispatcher` - 调度器
/// * `path` - 凭据接口路径
/// * `strategies` - 策略链
/// * `request` - 凭据请求
///
/// # Returns
/// * `Ok(Envelope)` - 第一个得到应答的策略的信封
/// * `Err(GatewayError)` - 没有任何应答时，第一个策略的错误
pub async fn send_with_fallback(
    dispatcher: &Dispatcher,
    path: &str,
    strategies: &[FallbackStrategy],
    request: &CredentialRequest<'_>,
) -> Result<Envelope, GatewayError> {
    let mut first_error: Option<GatewayError> = None;
    for strategy in strategies {
        let params = strategy.params(request);
        match dispatcher
            .execute(path, strategy.method, strategy.encoding, &params, false)
            .await
        {
            Ok(envelope) => {
                debug!(path, strategy = strategy.label, retcode = %envelope.retcode, "credential request answered");
                return Ok(envelope);
            }
            Err(err) => {
                debug!(path, strategy = strategy.label, error = %err, "credential strategy failed");
                let fatal = matches!(err, GatewayError::Handshake(_));
                let err = first_error.get_or_insert(err);
                if fatal {
                    return Err(err.clone());
                }
            }
        }
    }
    Err(first_error.unwrap_or_else(|| {
        GatewayError::InvalidRequest(format!("no encoding strategy enabled for {}", path))
    }))
}
