use crate::hash::{self, ClientNonce, ServerNonce};
use crate::session::{ExchangeOrigin, SessionStore};
use mt5_core::gateway::entity::{Credentials, Envelope};
use mt5_core::gateway::error::{GatewayError, HandshakeError};
use mt5_core::gateway::port::{Transport, TransportRequest};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// 握手第一轮路径
pub const AUTH_START_PATH: &str = "/api/auth/start";
/// 握手第二轮路径
pub const AUTH_ANSWER_PATH: &str = "/api/auth/answer";

/// `auth/start` 声明的角色
const MANAGER_ROLE: &str = "manager";

/// 单次握手尝试的进度
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Idle,
    AwaitingServerNonce,
    AwaitingMutualProof,
    Authenticated,
    Failed,
}

/// # Summary
/// 执行两轮挑战/应答握手。
///
/// # Invariants
/// - 密码永不离开进程，只有由它派生的摘要会上线。
/// - 随机数只在单次尝试内有效。
/// - 双向证明不匹配对本次尝试是最终结果，这里不会重试。
#[derive(Clone)]
pub struct Authenticator {
    credentials: Arc<Credentials>,
}

impl Authenticator {
    /// # Summary
    /// 以端点凭据创建认证器。
    ///
    /// # Arguments
    /// * `credentials` - 共享的登录凭据
    ///
    /// # Returns
    /// 新的 `Authenticator`。
    pub fn new(credentials: Arc<Credentials>) -> Self {
        Self { credentials }
    }

    /// # Summary
    /// 依次执行 `auth/start` 与 `auth/answer`，并校验服务端证明。
    ///
    /// # Logic
    /// 1. 携带 login、build、agent 与角色请求 `auth/start`，期望得到 `srv_rand`。
    /// 2. 派生内部密钥，应答服务端随机数，同时发送客户端随机数。
    /// 3. 比较返回的 `cli_rand_answer` 与本地计算值。
    /// 4. 途中下发的 Cookie 由 `session` 记录，第二轮及之后的请求携带同一亲和 Cookie。
    ///
    /// # Arguments
    /// * `transport` - 底层传输
    /// * `session` - 当前正在握手的会话
    ///
    /// # Returns
    /// * `Ok(())` - 双方均已证明持有密码
    /// * `Err(GatewayError::Handshake)` - 被拒绝或证明不匹配
    /// * `Err(GatewayError::Transport)` - 任一轮的传输错误原样返回
    pub async fn authenticate(
        &self,
        transport: &dyn Transport,
        session: &SessionStore,
    ) -> Result<(), GatewayError> {
        let mut state = HandshakeState::Idle;
        let result = self.run(transport, session, &mut state).await;
        match &result {
            Ok(()) => info!(login = %self.credentials.login, "manager session established"),
            Err(GatewayError::Handshake(HandshakeError::MutualAuth)) => {
                warn!(login = %self.credentials.login, "gateway failed to prove password knowledge")
            }
            Err(e) => debug!(?state, error = %e, "handshake failed"),
        }
        result
    }

    /// # Summary
    /// 握手主体，逐步推进 `state`。
    ///
    /// # Logic
    /// 1. 第一轮：结果码非零返回 `Start`，缺少 `srv_rand` 返回 `Start`，非法十六进制返回 `InvalidNonce`。
    /// 2. 第二轮：结果码非零返回 `Answer`，证明不匹配返回 `MutualAuth`。
    /// 3. 任何失败都将 `state` 置为 `Failed`。
    async fn run(
        &self,
        transport: &dyn Transport,
        session: &SessionStore,
        state: &mut HandshakeState,
    ) -> Result<(), GatewayError> {
        let creds = &self.credentials;

        *state = HandshakeState::AwaitingServerNonce;
        let start = TransportRequest::get(
            AUTH_START_PATH,
            vec![
                ("version".to_string(), creds.build.clone()),
                ("agent".to_string(), creds.agent.clone()),
                ("login".to_string(), creds.login.clone()),
                ("type".to_string(), MANAGER_ROLE.to_string()),
            ],
        );
        let start_env = self.round(transport, session, start, "auth/start", state).await?;
        if !handshake_ok(&start_env) {
            *state = HandshakeState::Failed;
            return Err(HandshakeError::Start(start_env.retcode).into());
        }
        let srv_rand = match start_env.field_text("srv_rand") {
            Some(value) if !value.is_empty() => value,
            _ => {
                *state = HandshakeState::Failed;
                return Err(HandshakeError::Start("missing srv_rand".into()).into());
            }
        };
        let server_nonce = ServerNonce::from_hex(&srv_rand).inspect_err(|_| {
            *state = HandshakeState::Failed;
        })?;

        *state = HandshakeState::AwaitingMutualProof;
        let inner = hash::derive_inner(&creds.password);
        let our_answer = hash::server_answer(&inner, &server_nonce);
        let client_nonce = ClientNonce::random();
        let answer = TransportRequest::get(
            AUTH_ANSWER_PATH,
            vec![
                ("srv_rand_answer".to_string(), our_answer.to_hex()),
                ("cli_rand".to_string(), client_nonce.to_hex()),
            ],
        );
        let answer_env = self.round(transport, session, answer, "auth/answer", state).await?;
        if !handshake_ok(&answer_env) {
            *state = HandshakeState::Failed;
            return Err(HandshakeError::Answer(answer_env.retcode).into());
        }

        let expected = hash::client_answer(&inner, &client_nonce);
        let received = answer_env.field_text("cli_rand_answer").unwrap_or_default();
        if !hash::answer_matches(&expected, &received) {
            *state = HandshakeState::Failed;
            return Err(HandshakeError::MutualAuth.into());
        }

        *state = HandshakeState::Authenticated;
        Ok(())
    }

    /// # Summary
    /// 执行一轮握手请求并解析信封。
    ///
    /// # Arguments
    /// * `step` - 用于错误信息的步骤名
    ///
    /// # Returns
    /// * `Ok(Envelope)` - 正文是 JSON 信封
    /// * `Err(HandshakeError::MalformedResponse)` - 正文不是 JSON
    /// * `Err(GatewayError::Transport)` - 传输错误原样返回
    async fn round(
        &self,
        transport: &dyn Transport,
        session: &SessionStore,
        request: TransportRequest,
        step: &'static str,
        state: &mut HandshakeState,
    ) -> Result<Envelope, GatewayError> {
        let raw = session.exchange(transport, request, ExchangeOrigin::Handshake).await.inspect_err(|_| {
            *state = HandshakeState::Failed;
        })?;
        match serde_json::from_str::<Envelope>(&raw) {
            Ok(envelope) => Ok(envelope),
            Err(_) => {
                *state = HandshakeState::Failed;
                Err(HandshakeError::MalformedResponse { step, raw }.into())
            }
        }
    }
}

/// 握手轮次以零结果码表示成功，带不带 `Done` 后缀均可
fn handshake_ok(envelope: &Envelope) -> bool {
    envelope.code() == Some(0)
}
