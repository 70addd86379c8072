use mt5_core::gateway::error::GatewayError;
use mt5_core::gateway::port::{Transport, TransportRequest};
use std::future::Future;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, trace};

/// # Summary
/// 标识请求发出时所属的已认证会话。
///
/// # Invariants
/// - 由 [`SessionStore::ensure_authenticated`] 发放，失败的请求只能作废它自己使用的会话，
///   不会波及更新的会话。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTicket(u64);

/// # Summary
/// 一次交换请求的发起方。
///
/// # Invariants
/// - 只有当前仍然有效的发起方才能更新亲和 Cookie。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeOrigin {
    /// 持有单飞锁的握手流程
    Handshake,
    /// 在某个已认证会话下发出的普通调用
    Session(SessionTicket),
}

#[derive(Debug, Default)]
struct SessionState {
    authenticated: bool,
    affinity: Option<String>,
    // 每次握手成功递增
    epoch: u64,
}

impl SessionState {
    /// 发起方是否仍有权更新亲和 Cookie
    fn accepts(&self, origin: ExchangeOrigin) -> bool {
        match origin {
            ExchangeOrigin::Handshake => !self.authenticated,
            ExchangeOrigin::Session(ticket) => self.authenticated && self.epoch == ticket.0,
        }
    }
}

/// # Summary
/// 同一客户端上所有调用共享的会话状态。
///
/// # Invariants
/// - 仅当 `authenticated` 为真时 `affinity` 才标识一个存活会话；握手期间它保存 `auth/start` 下发的 Cookie。
/// - 作废操作在同一把写锁下同时清空两个字段。
/// - 同一时刻至多一个握手在执行，发现未认证的调用方在 `flight` 上排队，拿到锁后重新检查。
/// - 亲和 Cookie 只接受当前会话或当前握手的响应，迟到的旧会话响应被忽略。
#[derive(Debug, Default)]
pub struct SessionStore {
    state: RwLock<SessionState>,
    flight: Mutex<()>,
}

impl SessionStore {
    /// # Summary
    /// 创建一个未认证的空会话。
    ///
    /// # Arguments
    /// * None
    ///
    /// # Returns
    /// 新的 `SessionStore`。
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前是否持有已认证会话
    pub async fn is_authenticated(&self) -> bool {
        self.state.read().await.authenticated
    }

    /// 当前的亲和 Cookie（`name=value`）
    pub async fn affinity_token(&self) -> Option<String> {
        self.state.read().await.affinity.clone()
    }

    /// # Summary
    /// 按发起方有效性更新亲和 Cookie。
    ///
    /// # Logic
    /// 1. 在写锁下检查发起方是否仍是当前会话或当前握手。
    /// 2. 有效且值发生变化时写入，否则丢弃。
    ///
    /// # Arguments
    /// * `token` - 从 `Set-Cookie` 提取的 `name=value`
    /// * `origin` - 响应对应请求的发起方
    ///
    /// # Returns
    /// 无返回值，失效发起方的 Cookie 被丢弃。
    async fn adopt_affinity(&self, token: String, origin: ExchangeOrigin) {
        let mut state = self.state.write().await;
        if !state.accepts(origin) {
            debug!(?origin, epoch = state.epoch, "ignoring affinity token from a replaced session");
            return;
        }
        if state.affinity.as_deref() != Some(token.as_str()) {
            trace!("session affinity token refreshed");
            state.affinity = Some(token);
        }
    }

    /// # Summary
    /// 返回当前会话的票据，没有会话时先执行 `handshake`。
    ///
    /// # Logic
    /// 1. 快速路径：已认证则直接返回。
    /// 2. 获取单飞锁后重新检查，等待期间可能已有并发调用方完成握手。
    /// 3. 清除残留的亲和 Cookie 并执行握手。
    /// 4. 成功则以新的 epoch 标记为已认证；失败则保持清空状态并返回错误。
    ///
    /// # Arguments
    /// * `handshake` - 实际执行握手的异步闭包
    ///
    /// # Returns
    /// * `Ok(SessionTicket)` - 当前会话票据
    /// * `Err(GatewayError)` - 握手错误原样返回
    pub async fn ensure_authenticated<F, Fut>(&self, handshake: F) -> Result<SessionTicket, GatewayError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), GatewayError>>,
    {
        if let Some(ticket) = self.current_ticket().await {
            return Ok(ticket);
        }

        let _flight = self.flight.lock().await;
        if let Some(ticket) = self.current_ticket().await {
            trace!("session established by a concurrent caller");
            return Ok(ticket);
        }

        self.state.write().await.affinity = None;

        match handshake().await {
            Ok(()) => {
                let mut state = self.state.write().await;
                state.authenticated = true;
                state.epoch += 1;
                debug!(epoch = state.epoch, "session authenticated");
                Ok(SessionTicket(state.epoch))
            }
            Err(err) => {
                self.state.write().await.affinity = None;
                Err(err)
            }
        }
    }

    async fn current_ticket(&self) -> Option<SessionTicket> {
        let state = self.state.read().await;
        state.authenticated.then_some(SessionTicket(state.epoch))
    }

    /// 无条件丢弃会话，可重复调用
    pub async fn invalidate(&self) {
        let mut state = self.state.write().await;
        state.authenticated = false;
        state.affinity = None;
    }

    /// # Summary
    /// 仅当会话仍是 `ticket` 对应的那一个时才丢弃。
    ///
    /// # Arguments
    /// * `ticket` - 失败请求所使用的会话票据
    ///
    /// # Returns
    /// 本次调用确实清空了会话时返回 `true`。
    pub async fn invalidate_ticket(&self, ticket: SessionTicket) -> bool {
        let mut state = self.state.write().await;
        if state.authenticated && state.epoch == ticket.0 {
            state.authenticated = false;
            state.affinity = None;
            true
        } else {
            false
        }
    }

    /// # Summary
    /// 在本会话下发送请求，返回 2xx 响应的正文。
    ///
    /// # Logic
    /// 1. 将当前亲和 Cookie 附加到请求上。
    /// 2. 经传输层发送，连接失败原样返回。
    /// 3. 2xx 时，若发起方仍然有效则采用 `Set-Cookie` 中的亲和 Cookie，然后返回正文。
    /// 4. 其它状态返回携带状态码与正文的传输错误。
    ///
    /// # Arguments
    /// * `transport` - 底层传输
    /// * `request` - 已编码的请求
    /// * `origin` - 发起方：握手流程或某个会话票据
    ///
    /// # Returns
    /// * `Ok(String)` - 响应正文
    /// * `Err(GatewayError::Transport)` - 无响应或非 2xx
    pub async fn exchange(
        &self,
        transport: &dyn Transport,
        mut request: TransportRequest,
        origin: ExchangeOrigin,
    ) -> Result<String, GatewayError> {
        request.cookie = self.affinity_token().await;
        let path = request.path.clone();
        trace!(method = %request.method, path = %path, "gateway request");

        let response = transport.send(request).await?;
        if !response.is_success() {
            debug!(status = response.status, path = %path, "gateway returned non-2xx");
            return Err(GatewayError::status(&path, response.status, response.body));
        }

        if let Some(token) = affinity_from_set_cookie(&response.set_cookie) {
            self.adopt_affinity(token, origin).await;
        }
        Ok(response.body)
    }
}

/// # Summary
/// 从 `Set-Cookie` 头中提取亲和 Cookie。
///
/// # Logic
/// 1. 多个 Cookie 可能被折叠成一个逗号分隔的值，只取第一个。
/// 2. 只保留开头的 `name=value`，丢弃属性。
///
/// # Arguments
/// * `headers` - 全部 `Set-Cookie` 头的值
///
/// # Returns
/// 提取到的 `name=value`，没有时返回 `None`。
pub fn affinity_from_set_cookie(headers: &[String]) -> Option<String> {
    let first = headers.first()?;
    let cookie = first.split(',').next()?;
    let pair = cookie.split(|c: char| c == ';' || c.is_whitespace()).next()?;
    if pair.is_empty() {
        None
    } else {
        Some(pair.to_string())
    }
}
