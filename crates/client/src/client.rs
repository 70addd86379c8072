use crate::auth::Authenticator;
use crate::dispatcher::{Dispatcher, Params};
use crate::fallback::{
    CHANGE_PASSWORD_PATH, CHECK_PASSWORD_PATH, CredentialRequest, FallbackStrategy,
    credential_strategies, send_with_fallback,
};
use crate::transport::{ReqwestTransport, TransportOptions, parse_base_url};
use futures::future::try_join_all;
use mt5_core::config::GatewayConfig;
use mt5_core::gateway::entity::{
    CheckBalance, Credentials, Envelope, OrderInfo, PasswordType, PositionInfo, PriceQuote,
    TickLast, TradeBalanceParams, TradeBalanceResult, UserBatchQuery, UserInfo, UserParams,
    value_text,
};
use mt5_core::gateway::error::GatewayError;
use mt5_core::gateway::port::{HttpMethod, Transport};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// 不属于传输层的行为开关
#[derive(Debug, Clone, Copy)]
pub struct ClientOptions {
    /// 凭据操作是否允许退化到查询字符串编码
    pub allow_password_in_query: bool,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            allow_password_in_query: true,
        }
    }
}

struct ClientInner {
    credentials: Arc<Credentials>,
    dispatcher: Dispatcher,
    credential_strategies: Vec<FallbackStrategy>,
}

/// # Summary
/// 单个网关端点的管理客户端。
///
/// # Invariants
/// - 克隆成本低，所有克隆共享同一会话与连接池。
/// - 每个操作都经过调度器，因此均已认证，并在会话丢失时重试一次。
/// - `Debug` 输出不包含密码。
#[derive(Clone)]
pub struct Mt5Client {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for Mt5Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mt5Client")
            .field("credentials", &self.inner.credentials)
            .finish_non_exhaustive()
    }
}

impl Mt5Client {
    /// # Summary
    /// 由网关端点描述构造客户端。
    ///
    /// # Logic
    /// 1. 校验 `base_url` 与 `login`。
    /// 2. 派生 `Credentials`，端口缺省时按协议推断。
    /// 3. 按描述中的超时与 TLS 策略构造 reqwest 传输。
    ///
    /// # Arguments
    /// * `config` - 网关端点描述
    ///
    /// # Returns
    /// * `Ok(Mt5Client)` - 持有空会话的客户端
    /// * `Err(GatewayError::Config)` - 描述不可用
    pub fn from_config(config: &GatewayConfig) -> Result<Self, GatewayError> {
        let url = parse_base_url(&config.base_url)?;
        if config.login.trim().is_empty() {
            return Err(GatewayError::Config(format!(
                "Gateway {} has no login",
                config.id
            )));
        }

        let credentials = Credentials {
            host: url.host_str().unwrap_or_default().to_string(),
            port: url.port_or_known_default().unwrap_or(443),
            login: config.login.trim().to_string(),
            password: config.password.clone(),
            build: config.build.clone(),
            agent: config.agent.clone(),
        };
        let transport = ReqwestTransport::new(
            &config.base_url,
            TransportOptions {
                timeout: config.timeout_ms.map(Duration::from_millis),
                accept_invalid_certs: config.accept_invalid_certs,
            },
        )?;
        if !config.allow_password_in_query {
            info!(gateway = %config.id, "query-string credential encodings disabled");
        }

        Ok(Self::with_transport(
            credentials,
            Arc::new(transport),
            ClientOptions {
                allow_password_in_query: config.allow_password_in_query,
            },
        ))
    }

    /// # Summary
    /// 在任意传输之上构造客户端。
    ///
    /// # Arguments
    /// * `credentials` - 登录凭据
    /// * `transport` - 注入的传输实现
    /// * `options` - 行为开关
    ///
    /// # Returns
    /// 持有空会话的客户端。
    pub fn with_transport(
        credentials: Credentials,
        transport: Arc<dyn Transport>,
        options: ClientOptions,
    ) -> Self {
        let credentials = Arc::new(credentials);
        let authenticator = Authenticator::new(credentials.clone());
        Self {
            inner: Arc::new(ClientInner {
                credentials,
                dispatcher: Dispatcher::new(transport, authenticator),
                credential_strategies: credential_strategies(options.allow_password_in_query),
            }),
        }
    }

    /// 客户端使用的登录凭据
    pub fn credentials(&self) -> &Credentials {
        &self.inner.credentials
    }

    fn dispatcher(&self) -> &Dispatcher {
        &self.inner.dispatcher
    }

    // ---- 会话控制 ----

    /// # Summary
    /// 尚无会话时执行握手。
    ///
    /// # Returns
    /// * `Ok(())` - 已持有会话
    /// * `Err(GatewayError)` - 握手或传输失败
    pub async fn ensure_authenticated(&self) -> Result<(), GatewayError> {
        self.dispatcher().ensure_authenticated().await.map(|_| ())
    }

    /// 丢弃当前会话，下一次调用会重新认证
    pub async fn invalidate_session(&self) {
        self.dispatcher().session().invalidate().await;
    }

    /// 当前是否持有已认证会话
    pub async fn is_authenticated(&self) -> bool {
        self.dispatcher().session().is_authenticated().await
    }

    // ---- 用户 ----

    /// # Summary
    /// 查询单个账户信息。
    ///
    /// # Arguments
    /// * `login` - 账户号
    ///
    /// # Returns
    /// * `Ok(UserInfo)` - 账户信息
    /// * `Err(GatewayError::Application)` - 网关返回非成功结果码
    pub async fn get_user(&self, login: u64) -> Result<UserInfo, GatewayError> {
        self.dispatcher()
            .call("/api/user/get", HttpMethod::Get, login_params(login))
            .await
    }

    /// # Summary
    /// 查询账户所属分组。
    ///
    /// # Arguments
    /// * `login` - 账户号
    ///
    /// # Returns
    /// 分组名；应答中没有 `Group` 时返回空字符串。
    pub async fn get_user_group(&self, login: u64) -> Result<String, GatewayError> {
        let answer: Value = self
            .dispatcher()
            .call("/api/user/group", HttpMethod::Get, login_params(login))
            .await?;
        Ok(pick_text(&answer, &["Group", "group"]).unwrap_or_default())
    }

    /// # Summary
    /// 查询账户所属分组，返回原始信封。
    ///
    /// # Arguments
    /// * `login` - 账户号
    ///
    /// # Returns
    /// 任意结果码的信封。
    pub async fn get_user_group_raw(&self, login: u64) -> Result<Envelope, GatewayError> {
        self.dispatcher()
            .call_raw("/api/user/group", HttpMethod::Get, login_params(login))
            .await
    }

    /// # Summary
    /// 查询服务器上的账户总数。
    ///
    /// # Returns
    /// 账户数，解析规则见 `parse_total`。
    pub async fn get_user_total(&self) -> Result<u64, GatewayError> {
        let answer: Value = self
            .dispatcher()
            .call("/api/user/total", HttpMethod::Get, Params::new())
            .await?;
        Ok(parse_total(&answer))
    }

    /// # Summary
    /// 查询账户总数，返回原始信封。
    ///
    /// # Returns
    /// 任意结果码的信封。
    pub async fn get_user_total_raw(&self) -> Result<Envelope, GatewayError> {
        self.dispatcher()
            .call_raw("/api/user/total", HttpMethod::Get, Params::new())
            .await
    }

    /// # Summary
    /// 查询账户的交易状态（余额、净值、保证金等）。
    ///
    /// # Arguments
    /// * `login` - 账户号
    ///
    /// # Returns
    /// 网关返回的 `answer` 原样 JSON。
    pub async fn get_user_account(&self, login: u64) -> Result<Value, GatewayError> {
        self.dispatcher()
            .call("/api/user/account/get", HttpMethod::Get, login_params(login))
            .await
    }

    /// # Summary
    /// 查询账户交易状态，返回原始信封。
    ///
    /// # Arguments
    /// * `login` - 账户号
    ///
    /// # Returns
    /// 任意结果码的信封。
    pub async fn get_user_account_raw(&self, login: u64) -> Result<Envelope, GatewayError> {
        self.dispatcher()
            .call_raw("/api/user/account/get", HttpMethod::Get, login_params(login))
            .await
    }

    /// # Summary
    /// 查询属于任一 `groups` 的账户号。
    ///
    /// # Logic
    /// 1. `groups` 为空时直接返回空列表，不访问网关。
    /// 2. 多个分组以逗号拼接。
    /// 3. 跳过非数字的条目。
    ///
    /// # Arguments
    /// * `groups` - 分组名或分组掩码
    ///
    /// # Returns
    /// 账户号列表。
    pub async fn get_user_logins(&self, groups: &[String]) -> Result<Vec<u64>, GatewayError> {
        if groups.is_empty() {
            return Ok(Vec::new());
        }
        let answer: Option<Vec<Value>> = self
            .dispatcher()
            .call(
                "/api/user/logins",
                HttpMethod::Get,
                Params::new().with("group", groups.join(",")),
            )
            .await?;
        Ok(answer
            .unwrap_or_default()
            .iter()
            .filter_map(value_text)
            .filter_map(|text| text.trim().parse().ok())
            .collect())
    }

    /// # Summary
    /// 按分组查询账户号，返回原始信封。
    ///
    /// # Arguments
    /// * `groups` - 分组名，为空时不发送 `group` 参数
    ///
    /// # Returns
    /// 任意结果码的信封。
    pub async fn get_user_logins_raw(&self, groups: &[String]) -> Result<Envelope, GatewayError> {
        let group = (!groups.is_empty()).then(|| groups.join(","));
        self.dispatcher()
            .call_raw(
                "/api/user/logins",
                HttpMethod::Get,
                Params::new().with_opt("group", group),
            )
            .await
    }

    /// # Summary
    /// 查询账户证书。
    ///
    /// # Arguments
    /// * `login` - 账户号
    ///
    /// # Returns
    /// 证书列表，没有时为空。
    pub async fn get_user_certificate(&self, login: u64) -> Result<Vec<String>, GatewayError> {
        let answer: Option<Vec<String>> = self
            .dispatcher()
            .call("/api/user/certificate/get", HttpMethod::Get, login_params(login))
            .await?;
        Ok(answer.unwrap_or_default())
    }

    /// # Summary
    /// 查询账户证书，返回原始信封。
    ///
    /// # Arguments
    /// * `login` - 账户号
    ///
    /// # Returns
    /// 任意结果码的信封。
    pub async fn get_user_certificate_raw(&self, login: u64) -> Result<Envelope, GatewayError> {
        self.dispatcher()
            .call_raw("/api/user/certificate/get", HttpMethod::Get, login_params(login))
            .await
    }

    /// # Summary
    /// 查询账户的 OTP 密钥。
    ///
    /// # Arguments
    /// * `login` - 账户号
    ///
    /// # Returns
    /// 密钥文本，未设置时返回空字符串。
    pub async fn get_user_otp_secret(&self, login: u64) -> Result<String, GatewayError> {
        let answer: Value = self
            .dispatcher()
            .call("/api/user/otp_secret/get", HttpMethod::Get, login_params(login))
            .await?;
        Ok(pick_text(&answer, &["OTP_SECRET", "otp_secret"]).unwrap_or_default())
    }

    /// # Summary
    /// 查询 OTP 密钥，返回原始信封。
    ///
    /// # Arguments
    /// * `login` - 账户号
    ///
    /// # Returns
    /// 任意结果码的信封。
    pub async fn get_user_otp_secret_raw(&self, login: u64) -> Result<Envelope, GatewayError> {
        self.dispatcher()
            .call_raw("/api/user/otp_secret/get", HttpMethod::Get, login_params(login))
            .await
    }

    /// # Summary
    /// 比对账户余额与成交历史。
    ///
    /// # Arguments
    /// * `login` - 账户号
    /// * `fixflag` - 为 1 时让网关修正不一致的余额
    ///
    /// # Returns
    /// 余额与信用两项的比对结果。
    pub async fn get_user_check_balance(
        &self,
        login: u64,
        fixflag: Option<u8>,
    ) -> Result<CheckBalance, GatewayError> {
        self.dispatcher()
            .call(
                "/api/user/check_balance",
                HttpMethod::Get,
                login_params(login).with_opt("fixflag", fixflag),
            )
            .await
    }

    /// # Summary
    /// 比对余额，返回原始信封。
    ///
    /// # Arguments
    /// * `login` - 账户号
    /// * `fixflag` - 修正标志
    ///
    /// # Returns
    /// 任意结果码的信封。
    pub async fn get_user_check_balance_raw(
        &self,
        login: u64,
        fixflag: Option<u8>,
    ) -> Result<Envelope, GatewayError> {
        self.dispatcher()
            .call_raw(
                "/api/user/check_balance",
                HttpMethod::Get,
                login_params(login).with_opt("fixflag", fixflag),
            )
            .await
    }

    /// # Summary
    /// 按账户号或分组批量查询用户。
    ///
    /// # Logic
    /// 1. 两个选择条件必须且只能有一个非空，否则不发送请求。
    /// 2. 多个值以逗号拼接。
    ///
    /// # Arguments
    /// * `query` - 批量查询条件
    ///
    /// # Returns
    /// * `Ok(Vec<UserInfo>)` - 用户列表
    /// * `Err(GatewayError::InvalidRequest)` - 选择条件为空或同时给出
    pub async fn get_user_batch(&self, query: &UserBatchQuery) -> Result<Vec<UserInfo>, GatewayError> {
        let params = match (query.logins.is_empty(), query.groups.is_empty()) {
            (false, false) => {
                return Err(GatewayError::InvalidRequest(
                    "Cannot combine login and group selectors".into(),
                ));
            }
            (true, true) => {
                return Err(GatewayError::InvalidRequest(
                    "Either login or group must be provided".into(),
                ));
            }
            (false, true) => Params::new().with("login", join_numbers(&query.logins)),
            (true, false) => Params::new().with("group", query.groups.join(",")),
        };
        let answer: Option<Vec<UserInfo>> = self
            .dispatcher()
            .call("/api/user/get_batch", HttpMethod::Get, params)
            .await?;
        Ok(answer.unwrap_or_default())
    }

    /// # Summary
    /// 创建账户。
    ///
    /// # Arguments
    /// * `user` - 账户字段，缺省字段不发送
    ///
    /// # Returns
    /// 网关返回的新账户信息。
    pub async fn add_user(&self, user: &UserParams) -> Result<UserInfo, GatewayError> {
        self.dispatcher()
            .call("/api/user/add", HttpMethod::Post, Params::from_serialize(user)?)
            .await
    }

    /// # Summary
    /// 更新账户。
    ///
    /// # Arguments
    /// * `user` - 账户字段，必须包含 `Login`
    ///
    /// # Returns
    /// * `Ok(UserInfo)` - 更新后的账户信息
    /// * `Err(GatewayError::InvalidRequest)` - 缺少 `Login`
    pub async fn update_user(&self, user: &UserParams) -> Result<UserInfo, GatewayError> {
        if user.login.is_none() {
            return Err(GatewayError::InvalidRequest("update_user requires Login".into()));
        }
        self.dispatcher()
            .call("/api/user/update", HttpMethod::Post, Params::from_serialize(user)?)
            .await
    }

    /// # Summary
    /// 删除账户。
    ///
    /// # Arguments
    /// * `login` - 账户号
    ///
    /// # Returns
    /// 成功时返回 `()`。
    pub async fn delete_user(&self, login: u64) -> Result<(), GatewayError> {
        let _answer: Value = self
            .dispatcher()
            .call("/api/user/delete", HttpMethod::Get, login_params(login))
            .await?;
        Ok(())
    }

    // ---- 凭据 ----

    /// # Summary
    /// 校验账户密码。
    ///
    /// # Logic
    /// 1. 沿凭据编码策略链依次尝试，直到得到应答。
    ///
    /// # Arguments
    /// * `login` - 账户号
    /// * `password` - 待校验的密码
    /// * `password_type` - 密码类型
    ///
    /// # Returns
    /// * `Ok(Envelope)` - 原样信封：匹配时为 `0 Done`，否则为 `3006 Invalid account password` 等结果码
    /// * `Err(GatewayError)` - 所有策略都未得到应答
    pub async fn check_password(
        &self,
        login: u64,
        password: &str,
        password_type: PasswordType,
    ) -> Result<Envelope, GatewayError> {
        let request = CredentialRequest {
            login,
            password,
            password_type,
        };
        send_with_fallback(
            self.dispatcher(),
            CHECK_PASSWORD_PATH,
            &self.inner.credential_strategies,
            &request,
        )
        .await
    }

    /// # Summary
    /// 修改账户密码。
    ///
    /// # Logic
    /// 1. 与 `check_password` 使用同一策略链。
    /// 2. 网关拒绝时记录 warn 日志，信封仍原样返回。
    ///
    /// # Arguments
    /// * `login` - 账户号
    /// * `password` - 新密码
    /// * `password_type` - 密码类型
    ///
    /// # Returns
    /// 与 `check_password` 相同。
    pub async fn change_password(
        &self,
        login: u64,
        password: &str,
        password_type: PasswordType,
    ) -> Result<Envelope, GatewayError> {
        let request = CredentialRequest {
            login,
            password,
            password_type,
        };
        let envelope = send_with_fallback(
            self.dispatcher(),
            CHANGE_PASSWORD_PATH,
            &self.inner.credential_strategies,
            &request,
        )
        .await?;
        if !envelope.is_success() {
            warn!(login, retcode = %envelope.retcode, "password change rejected");
        }
        Ok(envelope)
    }

    // ---- 报价 ----

    /// # Summary
    /// 查询 `symbols` 的最新报价。
    ///
    /// # Arguments
    /// * `symbols` - 品种列表
    /// * `trans_id` - 上次返回的事务号，给出时只返回更新的报价
    ///
    /// # Returns
    /// 报价及下一次增量查询使用的事务号。
    pub async fn get_tick_last(
        &self,
        symbols: &[&str],
        trans_id: Option<&str>,
    ) -> Result<TickLast, GatewayError> {
        let envelope = self
            .dispatcher()
            .call_envelope("/api/tick/last", HttpMethod::Get, tick_params(symbols, trans_id))
            .await?;
        let trans_id = envelope.field_text("trans_id");
        let answer: Option<Vec<PriceQuote>> = envelope.decode_answer()?;
        Ok(TickLast {
            trans_id,
            answer: answer.unwrap_or_default(),
        })
    }

    /// # Summary
    /// 查询最新报价，返回原始信封。
    ///
    /// # Arguments
    /// * `symbols` - 品种列表
    /// * `trans_id` - 增量事务号
    ///
    /// # Returns
    /// 任意结果码的信封。
    pub async fn get_tick_last_raw(
        &self,
        symbols: &[&str],
        trans_id: Option<&str>,
    ) -> Result<Envelope, GatewayError> {
        self.dispatcher()
            .call_raw("/api/tick/last", HttpMethod::Get, tick_params(symbols, trans_id))
            .await
    }

    // ---- 订单与历史 ----

    /// # Summary
    /// 查询挂单。
    ///
    /// # Arguments
    /// * `ticket` - 订单号
    ///
    /// # Returns
    /// 订单信息。
    pub async fn get_order(&self, ticket: u64) -> Result<OrderInfo, GatewayError> {
        self.dispatcher()
            .call("/api/order/get", HttpMethod::Get, ticket_params(ticket))
            .await
    }

    /// # Summary
    /// 批量查询挂单。
    ///
    /// # Logic
    /// 1. 所有订单并发查询，任一失败则整体失败。
    ///
    /// # Arguments
    /// * `tickets` - 订单号列表
    ///
    /// # Returns
    /// 与 `tickets` 顺序一致的订单信息。
    pub async fn get_order_batch(&self, tickets: &[u64]) -> Result<Vec<OrderInfo>, GatewayError> {
        try_join_all(tickets.iter().map(|ticket| self.get_order(*ticket))).await
    }

    /// # Summary
    /// 查询账户的挂单数量。
    ///
    /// # Arguments
    /// * `login` - 账户号
    ///
    /// # Returns
    /// 挂单数，解析规则见 `parse_total`。
    pub async fn get_order_total(&self, login: u64) -> Result<u64, GatewayError> {
        let answer: Value = self
            .dispatcher()
            .call("/api/order/get_total", HttpMethod::Get, login_params(login))
            .await?;
        Ok(parse_total(&answer))
    }

    /// # Summary
    /// 查询挂单数量，返回原始信封。
    ///
    /// # Arguments
    /// * `login` - 账户号
    ///
    /// # Returns
    /// 任意结果码的信封。
    pub async fn get_order_total_raw(&self, login: u64) -> Result<Envelope, GatewayError> {
        self.dispatcher()
            .call_raw("/api/order/get_total", HttpMethod::Get, login_params(login))
            .await
    }

    /// # Summary
    /// 查询历史订单。
    ///
    /// # Arguments
    /// * `ticket` - 订单号
    ///
    /// # Returns
    /// 订单信息。
    pub async fn get_history_order(&self, ticket: u64) -> Result<OrderInfo, GatewayError> {
        self.dispatcher()
            .call("/api/history/get", HttpMethod::Get, ticket_params(ticket))
            .await
    }

    /// # Summary
    /// 并发批量查询历史订单。
    ///
    /// # Arguments
    /// * `tickets` - 订单号列表
    ///
    /// # Returns
    /// 与 `tickets` 顺序一致的订单信息，任一失败则整体失败。
    pub async fn get_history_order_batch(
        &self,
        tickets: &[u64],
    ) -> Result<Vec<OrderInfo>, GatewayError> {
        try_join_all(tickets.iter().map(|ticket| self.get_history_order(*ticket))).await
    }

    // ---- 持仓 ----

    /// # Summary
    /// 查询账户在某品种上的持仓。
    ///
    /// # Arguments
    /// * `login` - 账户号
    /// * `symbol` - 品种
    ///
    /// # Returns
    /// 持仓信息。
    pub async fn get_position(&self, login: u64, symbol: &str) -> Result<PositionInfo, GatewayError> {
        self.dispatcher()
            .call(
                "/api/position/get",
                HttpMethod::Get,
                login_params(login).with("symbol", symbol),
            )
            .await
    }

    /// # Summary
    /// 查询账户在某品种上的全部持仓，对冲账户可能有多笔。
    ///
    /// # Arguments
    /// * `login` - 账户号
    /// * `symbol` - 品种
    ///
    /// # Returns
    /// 持仓列表，没有时为空。
    pub async fn get_position_batch(
        &self,
        login: u64,
        symbol: &str,
    ) -> Result<Vec<PositionInfo>, GatewayError> {
        let answer: Option<Vec<PositionInfo>> = self
            .dispatcher()
            .call(
                "/api/position/get_batch",
                HttpMethod::Get,
                login_params(login).with("symbol", symbol),
            )
            .await?;
        Ok(answer.unwrap_or_default())
    }

    // ---- 交易 ----

    /// # Summary
    /// 提交资金操作（入金、信用、扣费、修正、赠金）。
    ///
    /// # Logic
    /// 1. 金额必须是有限数，否则不发送请求。
    /// 2. 记录 info 日志后发送。
    ///
    /// # Arguments
    /// * `params` - 资金操作参数
    ///
    /// # Returns
    /// * `Ok(TradeBalanceResult)` - 成交单号等结果
    /// * `Err(GatewayError::InvalidRequest)` - 金额非有限数
    pub async fn trade_balance(
        &self,
        params: &TradeBalanceParams,
    ) -> Result<TradeBalanceResult, GatewayError> {
        if !params.amount.is_finite() {
            return Err(GatewayError::InvalidRequest(format!(
                "Invalid balance amount: {}",
                params.amount
            )));
        }
        let query = login_params(params.login)
            .with("type", params.operation.code())
            .with("balance", params.amount)
            .with_opt("comment", params.comment.clone())
            .with_opt("check_margin", params.check_margin);
        info!(
            login = params.login,
            operation = ?params.operation,
            amount = params.amount,
            "submitting balance operation"
        );
        self.dispatcher()
            .call("/api/trade/balance", HttpMethod::Get, query)
            .await
    }
}

/// 仅含 `login` 的参数表
fn login_params(login: u64) -> Params {
    Params::new().with("login", login)
}

fn ticket_params(ticket: u64) -> Params {
    Params::new().with("ticket", ticket)
}

fn tick_params(symbols: &[&str], trans_id: Option<&str>) -> Params {
    Params::new()
        .with("symbol", symbols.join(","))
        .with_opt("trans_id", trans_id)
}

fn join_numbers(values: &[u64]) -> String {
    values
        .iter()
        .map(u64::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

/// 按 `keys` 顺序取应答对象中第一个存在的字段，转为文本
fn pick_text(answer: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|key| answer.get(*key).and_then(value_text))
}

/// # Summary
/// 将 `Total`/`total` 解析为计数。
///
/// # Logic
/// 1. 字段缺失时为 0。
/// 2. 只保留数字、`-` 与 `.`，其余字符丢弃。
/// 3. 保留后的文本不是合法数字时为 0。
/// 4. 小数向零截断，负数按 0 计。
///
/// # Arguments
/// * `answer` - 应答对象
///
/// # Returns
/// 非负计数。
fn parse_total(answer: &Value) -> u64 {
    let Some(text) = pick_text(answer, &["Total", "total"]) else {
        return 0;
    };
    let kept: String = text
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '-' || *c == '.')
        .collect();
    if kept.parse::<f64>().is_err() {
        return 0;
    }
    let integral = kept.split('.').next().unwrap_or_default();
    let whole: i64 = match integral {
        "" | "-" => 0,
        digits => digits.parse().unwrap_or(0),
    };
    u64::try_from(whole).unwrap_or(0)
}
