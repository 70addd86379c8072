use crate::gateway::error::{GatewayError, retcode_number};
use serde::de::{DeserializeOwned, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// 网关表示成功的唯一结果码
pub const SUCCESS_RETCODE: &str = "0 Done";

/// # Summary
/// 网关每个响应都携带的外层信封。
///
/// # Invariants
/// - `retcode == "0 Done"` 是唯一的成功标志。
/// - `retcode`/`answer` 之外的顶层字段（如 `trans_id`、`srv_rand`）保存在 `extra` 中，不丢弃任何内容。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub retcode: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Envelope {
    /// # Summary
    /// 解析原始响应正文。
    ///
    /// # Arguments
    /// * `raw` - HTTP 响应正文
    ///
    /// # Returns
    /// * `Ok(Envelope)` - 解析成功
    /// * `Err(GatewayError::Decode)` - 正文不是 JSON 信封
    pub fn parse(raw: &str) -> Result<Self, GatewayError> {
        serde_json::from_str(raw)
            .map_err(|e| GatewayError::Decode(format!("invalid envelope ({}): {}", e, raw)))
    }

    /// 结果码是否为成功标志
    pub fn is_success(&self) -> bool {
        self.retcode == SUCCESS_RETCODE
    }

    /// 结果码的前导整数
    pub fn code(&self) -> Option<i64> {
        retcode_number(&self.retcode)
    }

    /// 读取 `answer` 之外的顶层字段
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.extra.get(name)
    }

    /// 以文本形式读取顶层字段，兼容字符串与数字两种形态
    pub fn field_text(&self, name: &str) -> Option<String> {
        self.field(name).and_then(value_text)
    }

    /// # Summary
    /// 将信封转换为结果：成功时原样返回，否则转为应用错误。
    ///
    /// # Returns
    /// * `Ok(Envelope)` - 结果码为成功标志
    /// * `Err(GatewayError::Application)` - 携带原始结果码
    pub fn into_result(self) -> Result<Self, GatewayError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(GatewayError::Application {
                retcode: self.retcode,
            })
        }
    }

    /// # Summary
    /// 将 `answer` 解码为 `T`。
    ///
    /// # Logic
    /// 1. 缺失的 `answer` 按 `null` 处理，适配 `()` 与 `Option<_>` 载荷。
    /// 2. 结构不符时返回 `Decode` 错误。
    pub fn decode_answer<T: DeserializeOwned>(self) -> Result<T, GatewayError> {
        let answer = self.answer.unwrap_or(Value::Null);
        serde_json::from_value(answer).map_err(|e| GatewayError::Decode(e.to_string()))
    }
}

/// # Summary
/// 将标量 JSON 值渲染为文本。
///
/// # Arguments
/// * `value` - 任意 JSON 值
///
/// # Returns
/// 字符串、数字与布尔值（`"1"`/`"0"`）返回文本，其余返回 `None`。
pub fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(if *b { "1".to_string() } else { "0".to_string() }),
        _ => None,
    }
}

/// # Summary
/// 单个网关端点的登录凭据。
///
/// # Invariants
/// - 构造后不可变，由单个客户端独占。
/// - `Debug` 输出绝不包含密码。
#[derive(Clone)]
pub struct Credentials {
    pub host: String,
    pub port: u16,
    pub login: String,
    pub password: String,
    pub build: String,
    pub agent: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("login", &self.login)
            .field("password", &"<redacted>")
            .field("build", &self.build)
            .field("agent", &self.agent)
            .finish()
    }
}

/// 凭据操作所针对的密码类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PasswordType {
    Main,
    Investor,
    Api,
}

impl PasswordType {
    /// 线上形式，网关只接受小写
    pub fn as_str(&self) -> &'static str {
        match self {
            PasswordType::Main => "main",
            PasswordType::Investor => "investor",
            PasswordType::Api => "api",
        }
    }
}

impl FromStr for PasswordType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "main" => Ok(PasswordType::Main),
            "investor" => Ok(PasswordType::Investor),
            "api" => Ok(PasswordType::Api),
            _ => Err(format!("Unknown password type: {}", s)),
        }
    }
}

impl fmt::Display for PasswordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `/api/trade/balance` 接受的资金操作类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalanceOperation {
    Balance = 2,
    Credit = 3,
    Charge = 4,
    Correction = 5,
    Bonus = 6,
}

impl BalanceOperation {
    /// 线上数值编码
    pub fn code(&self) -> u8 {
        *self as u8
    }
}

impl TryFrom<u8> for BalanceOperation {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            2 => Ok(BalanceOperation::Balance),
            3 => Ok(BalanceOperation::Credit),
            4 => Ok(BalanceOperation::Charge),
            5 => Ok(BalanceOperation::Correction),
            6 => Ok(BalanceOperation::Bonus),
            other => Err(format!("Unsupported balance operation type: {}", other)),
        }
    }
}

/// # Summary
/// 出入金请求参数。
///
/// # Invariants
/// - `amount` 必须是有限数，正数为入金，负数为出金。
#[derive(Debug, Clone)]
pub struct TradeBalanceParams {
    pub login: u64,
    pub operation: BalanceOperation,
    pub amount: f64,
    pub comment: Option<String>,
    pub check_margin: Option<bool>,
}

/// # Summary
/// 批量用户查询条件。
///
/// # Invariants
/// - `logins` 与 `groups` 必须且只能有一个非空。
#[derive(Debug, Clone, Default)]
pub struct UserBatchQuery {
    pub logins: Vec<u64>,
    pub groups: Vec<String>,
}

/// 将字符串或数字字段统一反序列化为文本，网关对数字的编码并不一致
fn lenient_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(value_text))
}

/// # Summary
/// 管理端视角下的交易账户持有人信息。
///
/// # Invariants
/// - 字段名为 PascalCase，未识别的字段保存在 `extra` 中。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UserInfo {
    #[serde(default, deserialize_with = "lenient_text")]
    pub login: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub leverage: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub balance: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub credit: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// `/api/user/add` 与 `/api/user/update` 接受的字段，缺省字段不发送
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct UserParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub login: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pass_main: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pass_investor: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub leverage: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rights: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    /// 其它网关可识别的字段，原样发送
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// 挂单或历史订单
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct OrderInfo {
    #[serde(default, deserialize_with = "lenient_text")]
    pub order: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub login: Option<String>,
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default, rename = "Type", deserialize_with = "lenient_text")]
    pub type_: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub volume_current: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub price_order: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// 持仓
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PositionInfo {
    #[serde(default, deserialize_with = "lenient_text")]
    pub position: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub login: Option<String>,
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub volume: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub price_open: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub profit: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// 品种的最新报价
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PriceQuote {
    #[serde(default)]
    pub symbol: String,
    #[serde(default, deserialize_with = "lenient_text")]
    pub datetime: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub bid: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub ask: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub last: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// # Summary
/// `/api/tick/last` 的结果。
///
/// # Invariants
/// - `trans_id` 为增量事务号，供下一次增量查询使用。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickLast {
    pub trans_id: Option<String>,
    pub answer: Vec<PriceQuote>,
}

/// 资金操作结果
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TradeBalanceResult {
    #[serde(default, deserialize_with = "lenient_text")]
    pub ticket: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// `/api/user/check_balance` 的单项比对结果
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BalanceHistory {
    #[serde(default, deserialize_with = "lenient_text")]
    pub user: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub history: Option<String>,
}

/// `/api/user/check_balance` 的结果
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CheckBalance {
    #[serde(default)]
    pub balance: Option<BalanceHistory>,
    #[serde(default)]
    pub credit: Option<BalanceHistory>,
}
