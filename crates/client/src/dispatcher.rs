use crate::auth::Authenticator;
use crate::session::{ExchangeOrigin, SessionStore, SessionTicket};
use mt5_core::gateway::entity::{Envelope, value_text};
use mt5_core::gateway::error::GatewayError;
use mt5_core::gateway::port::{HttpMethod, RequestBody, Transport, TransportRequest};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, warn};

/// POST 请求体的编码方式，GET 总是使用查询串
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyEncoding {
    Form,
    Json,
}

/// # Summary
/// 单次网关调用的扁平有序参数。
///
/// # Invariants
/// - 任何编码下都不发送 `null` 值。
/// - 线上顺序与插入顺序一致。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params(Vec<(String, Value)>);

impl Params {
    /// 空参数表
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一个参数
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.0.push((key.to_string(), value.into()));
        self
    }

    /// 仅在有值时追加参数
    pub fn with_opt<V: Into<Value>>(self, key: &str, value: Option<V>) -> Self {
        match value {
            Some(v) => self.with(key, v),
            None => self,
        }
    }

    /// # Summary
    /// 将可序列化结构的顶层字段展开为参数。
    ///
    /// # Arguments
    /// * `value` - 序列化后必须是 JSON 对象
    ///
    /// # Returns
    /// * `Ok(Params)` - 保留字段顺序
    /// * `Err(GatewayError::InvalidRequest)` - 序列化失败或不是对象
    pub fn from_serialize<T: Serialize>(value: &T) -> Result<Self, GatewayError> {
        match serde_json::to_value(value).map_err(|e| GatewayError::InvalidRequest(e.to_string()))? {
            Value::Object(map) => Ok(Self(map.into_iter().collect())),
            other => Err(GatewayError::InvalidRequest(format!(
                "parameters must be an object, got {}",
                other
            ))),
        }
    }

    /// 用于查询串与表单的文本键值对，嵌套值以 JSON 文本发送
    pub fn to_pairs(&self) -> Vec<(String, String)> {
        self.0
            .iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| (k.clone(), value_text(v).unwrap_or_else(|| v.to_string())))
            .collect()
    }

    /// 保留值类型的 JSON 对象请求体
    pub fn to_json(&self) -> Value {
        let map: Map<String, Value> = self
            .0
            .iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Value::Object(map)
    }
}

/// # Summary
/// 为单次尝试构造传输请求。
///
/// # Logic
/// 1. GET：参数进入查询串，无请求体。
/// 2. POST 表单：参数进入表单体，没有参数时不带请求体。
/// 3. POST JSON：参数作为 JSON 对象发送。
///
/// # Arguments
/// * `path` - 绝对路径
/// * `method` - HTTP 方法
/// * `encoding` - POST 请求体编码
/// * `params` - 调用参数
///
/// # Returns
/// 未附带 Cookie 的 `TransportRequest`。
pub fn encode_request(
    path: &str,
    method: HttpMethod,
    encoding: BodyEncoding,
    params: &Params,
) -> TransportRequest {
    let (query, body) = match (method, encoding) {
        (HttpMethod::Get, _) => (params.to_pairs(), RequestBody::Empty),
        (HttpMethod::Post, BodyEncoding::Form) => {
            let pairs = params.to_pairs();
            if pairs.is_empty() {
                (Vec::new(), RequestBody::Empty)
            } else {
                (Vec::new(), RequestBody::Form(pairs))
            }
        }
        (HttpMethod::Post, BodyEncoding::Json) => (Vec::new(), RequestBody::Json(params.to_json())),
    };
    TransportRequest {
        method,
        path: path.to_string(),
        query,
        body,
        cookie: None,
    }
}

/// # Summary
/// 在已认证会话下执行网关操作。
///
/// # Invariants
/// - 每个请求都先经过 `ensure_authenticated`。
/// - 会话丢失时恰好作废并重试一次，第二次失败原样返回。
/// - 请求以其所属会话票据发出，旧会话的迟到响应不会改写新会话的 Cookie。
pub struct Dispatcher {
    transport: Arc<dyn Transport>,
    session: SessionStore,
    authenticator: Authenticator,
}

impl Dispatcher {
    /// # Summary
    /// 以注入的传输与认证器创建调度器。
    ///
    /// # Arguments
    /// * `transport` - 共享传输
    /// * `authenticator` - 握手执行者
    ///
    /// # Returns
    /// 持有空会话的 `Dispatcher`。
    pub fn new(transport: Arc<dyn Transport>, authenticator: Authenticator) -> Self {
        Self {
            transport,
            session: SessionStore::new(),
            authenticator,
        }
    }

    /// 共享的会话状态
    pub fn session(&self) -> &SessionStore {
        &self.session
    }

    /// # Summary
    /// 按需认证，并发调用方共享同一次握手。
    ///
    /// # Returns
    /// * `Ok(SessionTicket)` - 当前会话票据
    /// * `Err(GatewayError)` - 握手失败
    pub async fn ensure_authenticated(&self) -> Result<SessionTicket, GatewayError> {
        self.session
            .ensure_authenticated(|| {
                self.authenticator
                    .authenticate(self.transport.as_ref(), &self.session)
            })
            .await
    }

    /// # Summary
    /// 表单/查询串调用，任何非成功结果码都视为错误。
    ///
    /// # Arguments
    /// * `path` - 接口路径
    /// * `method` - HTTP 方法
    /// * `params` - 调用参数
    ///
    /// # Returns
    /// 解码后的 `answer`。
    pub async fn call<T: DeserializeOwned>(
        &self,
        path: &str,
        method: HttpMethod,
        params: Params,
    ) -> Result<T, GatewayError> {
        self.execute(path, method, BodyEncoding::Form, &params, true)
            .await?
            .decode_answer()
    }

    /// # Summary
    /// 与 `call` 相同，但返回整个信封，供需要 `trans_id` 等顶层字段的调用方使用。
    ///
    /// # Returns
    /// 成功的信封。
    pub async fn call_envelope(
        &self,
        path: &str,
        method: HttpMethod,
        params: Params,
    ) -> Result<Envelope, GatewayError> {
        self.execute(path, method, BodyEncoding::Form, &params, true).await
    }

    /// # Summary
    /// 表单/查询串调用，无论结果码如何都返回信封。
    ///
    /// # Returns
    /// 原始信封，只有传输层会话丢失才触发重试。
    pub async fn call_raw(
        &self,
        path: &str,
        method: HttpMethod,
        params: Params,
    ) -> Result<Envelope, GatewayError> {
        self.execute(path, method, BodyEncoding::Form, &params, false).await
    }

    /// # Summary
    /// JSON 请求体调用，任何非成功结果码都视为错误。
    ///
    /// # Returns
    /// 解码后的 `answer`。
    pub async fn call_json<T: DeserializeOwned>(
        &self,
        path: &str,
        method: HttpMethod,
        params: Params,
    ) -> Result<T, GatewayError> {
        self.execute(path, method, BodyEncoding::Json, &params, true)
            .await?
            .decode_answer()
    }

    /// # Summary
    /// JSON 请求体调用，无论结果码如何都返回信封。
    ///
    /// # Returns
    /// 原始信封。
    pub async fn call_json_raw(
        &self,
        path: &str,
        method: HttpMethod,
        params: Params,
    ) -> Result<Envelope, GatewayError> {
        self.execute(path, method, BodyEncoding::Json, &params, false).await
    }

    /// # Summary
    /// 按“重试一次”策略执行单个操作。
    ///
    /// # Logic
    /// 1. 确保会话存在并记下所用票据。
    /// 2. 以该票据发出请求。
    /// 3. 会话丢失时作废该票据对应的会话；首次失败则重试一次，否则返回错误。
    ///
    /// # Arguments
    /// * `require_success` - 是否把非成功结果码转为应用错误
    ///
    /// # Returns
    /// 信封或最终错误。
    pub(crate) async fn execute(
        &self,
        path: &str,
        method: HttpMethod,
        encoding: BodyEncoding,
        params: &Params,
        require_success: bool,
    ) -> Result<Envelope, GatewayError> {
        let mut retried = false;
        loop {
            let ticket = self.ensure_authenticated().await?;
            match self.attempt(ticket, path, method, encoding, params, require_success).await {
                Ok(envelope) => return Ok(envelope),
                Err(err) if err.is_session_loss() => {
                    self.session.invalidate_ticket(ticket).await;
                    if retried {
                        return Err(err);
                    }
                    warn!(path, error = %err, "session lost, re-authenticating and retrying once");
                    retried = true;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// 以 `ticket` 所属会话执行一次请求
    async fn attempt(
        &self,
        ticket: SessionTicket,
        path: &str,
        method: HttpMethod,
        encoding: BodyEncoding,
        params: &Params,
        require_success: bool,
    ) -> Result<Envelope, GatewayError> {
        let request = encode_request(path, method, encoding, params);
        let raw = self
            .session
            .exchange(self.transport.as_ref(), request, ExchangeOrigin::Session(ticket))
            .await?;
        let envelope = Envelope::parse(&raw)?;
        if !envelope.is_success() {
            debug!(path, retcode = %envelope.retcode, "gateway returned non-success code");
        }
        if require_success {
            envelope.into_result()
        } else {
            Ok(envelope)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedGateway, credentials, done, reply, reply_with_cookie};
    use serde_json::json;

    fn dispatcher(gateway: Arc<ScriptedGateway>) -> Dispatcher {
        Dispatcher::new(gateway, Authenticator::new(credentials()))
    }

    #[test]
    fn absent_values_are_omitted() {
        let params = Params::new()
            .with("login", 1005)
            .with_opt::<u8>("fixflag", None)
            .with("comment", Value::Null)
            .with("symbol", "EURUSD");
        assert_eq!(
            params.to_pairs(),
            vec![
                ("login".to_string(), "1005".to_string()),
                ("symbol".to_string(), "EURUSD".to_string())
            ]
        );
        assert_eq!(params.to_json(), json!({"login": 1005, "symbol": "EURUSD"}));
    }

    #[test]
    fn get_goes_to_query_and_post_to_body() {
        let params = Params::new().with("login", 7);

        let get = encode_request("/api/user/get", HttpMethod::Get, BodyEncoding::Form, &params);
        assert_eq!(get.query, vec![("login".to_string(), "7".to_string())]);
        assert_eq!(get.body, RequestBody::Empty);

        let form = encode_request("/api/user/add", HttpMethod::Post, BodyEncoding::Form, &params);
        assert!(form.query.is_empty());
        assert_eq!(form.body, RequestBody::Form(vec![("login".to_string(), "7".to_string())]));

        let json = encode_request("/api/user/add", HttpMethod::Post, BodyEncoding::Json, &params);
        assert_eq!(json.body, RequestBody::Json(json!({"login": 7})));
    }

    #[test]
    fn empty_form_post_sends_no_body() {
        let req = encode_request("/api/x", HttpMethod::Post, BodyEncoding::Form, &Params::new());
        assert_eq!(req.body, RequestBody::Empty);
    }

    #[test]
    fn from_serialize_flattens_objects_only() {
        #[derive(Serialize)]
        struct Q {
            login: u64,
            group: Option<String>,
        }
        let params = Params::from_serialize(&Q { login: 3, group: None }).unwrap();
        assert_eq!(params.to_pairs(), vec![("login".to_string(), "3".to_string())]);
        assert!(Params::from_serialize(&vec![1, 2]).is_err());
    }

    #[tokio::test]
    async fn forbidden_is_retried_once_under_a_new_session() {
        let gateway = ScriptedGateway::new(|_, index| match index {
            0 => reply(403, json!({"error": "forbidden"})),
            _ => done(json!({"Total": "12"})),
        });
        let dispatcher = dispatcher(gateway.clone());

        let answer: Value = dispatcher
            .call("/api/user/total", HttpMethod::Get, Params::new())
            .await
            .unwrap();

        assert_eq!(answer, json!({"Total": "12"}));
        assert_eq!(gateway.calls().len(), 2);
        assert_eq!(gateway.handshakes(), 2);
        assert_eq!(gateway.calls()[1].cookie.as_deref(), Some("_mt5=2"));
    }

    #[tokio::test]
    async fn second_session_loss_propagates() {
        let gateway = ScriptedGateway::new(|_, _| reply(401, json!({"error": "unauthorized"})));
        let dispatcher = dispatcher(gateway.clone());

        let err = dispatcher
            .call_raw("/api/user/total", HttpMethod::Get, Params::new())
            .await
            .unwrap_err();

        assert!(matches!(err, GatewayError::Transport { status: Some(401), .. }));
        assert_eq!(gateway.calls().len(), 2);
        assert_eq!(gateway.handshakes(), 2);
        assert!(!dispatcher.session().is_authenticated().await);
    }

    #[tokio::test]
    async fn session_loss_code_is_retried_on_call() {
        let gateway = ScriptedGateway::new(|_, index| match index {
            0 => reply(200, json!({"retcode": "1010 Session expired"})),
            _ => done(json!([])),
        });
        let dispatcher = dispatcher(gateway.clone());

        let answer: Vec<Value> = dispatcher
            .call("/api/position/get_batch", HttpMethod::Get, Params::new().with("login", 7))
            .await
            .unwrap();

        assert!(answer.is_empty());
        assert_eq!(gateway.calls().len(), 2);
    }

    #[tokio::test]
    async fn ordinary_application_error_is_not_retried() {
        let gateway = ScriptedGateway::new(|_, _| {
            reply(200, json!({"retcode": "13 Not found"}))
        });
        let dispatcher = dispatcher(gateway.clone());

        let err = dispatcher
            .call::<Value>("/api/user/get", HttpMethod::Get, Params::new().with("login", 7))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            GatewayError::Application {
                retcode: "13 Not found".into()
            }
        );

        let raw = dispatcher
            .call_raw("/api/user/get", HttpMethod::Get, Params::new().with("login", 7))
            .await
            .unwrap();
        assert_eq!(raw.retcode, "13 Not found");
        assert_eq!(gateway.calls().len(), 2);
        assert_eq!(gateway.handshakes(), 1);
    }

    #[tokio::test]
    async fn late_response_from_replaced_session_keeps_new_cookie() {
        let gateway = ScriptedGateway::gated("/api/slow", |request, _| match request.path.as_str() {
            "/api/slow" => reply_with_cookie("_mt5=1", json!({"retcode": "0 Done"})),
            _ if request.cookie.as_deref() == Some("_mt5=1") => reply(403, json!({"error": "forbidden"})),
            _ => done(json!({})),
        });
        let dispatcher = Arc::new(dispatcher(gateway.clone()));
        dispatcher.ensure_authenticated().await.unwrap();

        // 第一个会话下的慢请求挂起
        let slow = {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move {
                dispatcher
                    .call_raw("/api/slow", HttpMethod::Get, Params::new())
                    .await
            })
        };
        while gateway.calls().is_empty() {
            tokio::task::yield_now().await;
        }

        // 快请求遇到 403，重新握手后拿到 _mt5=2
        dispatcher
            .call_raw("/api/fast", HttpMethod::Get, Params::new())
            .await
            .unwrap();
        assert_eq!(gateway.handshakes(), 2);
        assert_eq!(dispatcher.session().affinity_token().await.as_deref(), Some("_mt5=2"));

        // 慢请求此时才返回，并带回旧会话的 Cookie
        gateway.release();
        let late = slow.await.unwrap().unwrap();
        assert!(late.is_success());
        assert_eq!(dispatcher.session().affinity_token().await.as_deref(), Some("_mt5=2"));
        assert!(dispatcher.session().is_authenticated().await);

        dispatcher
            .call_raw("/api/fast", HttpMethod::Get, Params::new())
            .await
            .unwrap();
        let calls = gateway.calls();
        assert_eq!(calls.last().unwrap().cookie.as_deref(), Some("_mt5=2"));
        assert_eq!(gateway.handshakes(), 2);
    }
}
