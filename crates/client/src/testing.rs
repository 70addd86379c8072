//! # 单元测试用的进程内网关替身

use crate::auth::{AUTH_ANSWER_PATH, AUTH_START_PATH};
use crate::hash::{self, CLIENT_NONCE_LEN, ClientNonce};
use async_trait::async_trait;
use mt5_core::gateway::entity::Credentials;
use mt5_core::gateway::error::GatewayError;
use mt5_core::gateway::port::{Transport, TransportRequest, TransportResponse};
use serde_json::{Value, json};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

pub(crate) const TEST_PASSWORD: &str = "Passw0rd!";
const SRV_RAND: &str = "00112233445566778899aabbccddeeff";

type Handler = dyn Fn(&TransportRequest, usize) -> Result<TransportResponse, GatewayError> + Send + Sync;

/// # Summary
/// 脚本化网关：默认以真实摘要应答握手，其余请求连同从零开始的序号交给 `handler`。
///
/// # Invariants
/// - 设置 `handshake` 后，两个握手路径改由它应答，序号为握手请求的累计次数。
/// - 设置 `gate` 后，命中该路径的请求在记录之后挂起，直到调用 [`ScriptedGateway::release`]。
pub(crate) struct ScriptedGateway {
    handler: Box<Handler>,
    handshake: Option<Box<Handler>>,
    gate: Option<(String, Notify)>,
    handshakes: AtomicUsize,
    auth_requests: AtomicUsize,
    calls: Mutex<Vec<TransportRequest>>,
}

impl ScriptedGateway {
    fn build(handler: Box<Handler>, handshake: Option<Box<Handler>>, gate: Option<String>) -> Arc<Self> {
        Arc::new(Self {
            handler,
            handshake,
            gate: gate.map(|path| (path, Notify::new())),
            handshakes: AtomicUsize::new(0),
            auth_requests: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn new(
        handler: impl Fn(&TransportRequest, usize) -> Result<TransportResponse, GatewayError>
        + Send
        + Sync
        + 'static,
    ) -> Arc<Self> {
        Self::build(Box::new(handler), None, None)
    }

    /// 握手请求交给 `handshake` 应答，用于构造各类握手失败
    pub(crate) fn with_handshake(
        handshake: impl Fn(&TransportRequest, usize) -> Result<TransportResponse, GatewayError>
        + Send
        + Sync
        + 'static,
    ) -> Arc<Self> {
        Self::build(
            Box::new(|request: &TransportRequest, _: usize| {
                Err(GatewayError::network(&request.path, "unexpected request"))
            }),
            Some(Box::new(handshake)),
            None,
        )
    }

    /// 发往 `path` 的请求挂起，直到 [`ScriptedGateway::release`]
    pub(crate) fn gated(
        path: &str,
        handler: impl Fn(&TransportRequest, usize) -> Result<TransportResponse, GatewayError>
        + Send
        + Sync
        + 'static,
    ) -> Arc<Self> {
        Self::build(Box::new(handler), None, Some(path.to_string()))
    }

    /// 放行一个被挂起的请求
    pub(crate) fn release(&self) {
        if let Some((_, notify)) = &self.gate {
            notify.notify_one();
        }
    }

    pub(crate) fn handshakes(&self) -> usize {
        self.handshakes.load(Ordering::SeqCst)
    }

    pub(crate) fn calls(&self) -> Vec<TransportRequest> {
        self.calls.lock().unwrap().clone()
    }
}

pub(crate) fn reply(status: u16, body: Value) -> Result<TransportResponse, GatewayError> {
    Ok(TransportResponse {
        status,
        set_cookie: Vec::new(),
        body: body.to_string(),
    })
}

pub(crate) fn done(answer: Value) -> Result<TransportResponse, GatewayError> {
    reply(200, json!({"retcode": "0 Done", "answer": answer}))
}

/// 下发指定 Cookie 的 200 响应
pub(crate) fn reply_with_cookie(cookie: &str, body: Value) -> Result<TransportResponse, GatewayError> {
    Ok(TransportResponse {
        status: 200,
        set_cookie: vec![format!("{}; path=/; HttpOnly", cookie)],
        body: body.to_string(),
    })
}

pub(crate) fn credentials() -> Arc<Credentials> {
    Arc::new(Credentials {
        host: "127.0.0.1".into(),
        port: 443,
        login: "1005".into(),
        password: TEST_PASSWORD.into(),
        build: "2000".into(),
        agent: "WebAPI".into(),
    })
}

pub(crate) fn query_value<'a>(request: &'a TransportRequest, key: &str) -> Option<&'a str> {
    request
        .query
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

/// `auth/start` 的正常应答，附带服务端随机数与会话 Cookie
pub(crate) fn start_reply(cookie: &str) -> Result<TransportResponse, GatewayError> {
    reply_with_cookie(cookie, json!({"retcode": "0 Done", "srv_rand": SRV_RAND}))
}

/// `auth/answer` 的正常应答，按请求中的 `cli_rand` 计算真实证明
pub(crate) fn answer_reply(request: &TransportRequest) -> Result<TransportResponse, GatewayError> {
    let cli_rand = hex::decode(query_value(request, "cli_rand").unwrap_or_default()).unwrap();
    let mut bytes = [0u8; CLIENT_NONCE_LEN];
    bytes.copy_from_slice(&cli_rand);
    let inner = hash::derive_inner(TEST_PASSWORD);
    let proof = hash::client_answer(&inner, &ClientNonce::from_bytes(bytes));
    reply(200, json!({"retcode": "0 Done", "cli_rand_answer": proof.to_hex()}))
}

#[async_trait]
impl Transport for ScriptedGateway {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, GatewayError> {
        let path = request.path.as_str();
        if path == AUTH_START_PATH || path == AUTH_ANSWER_PATH {
            if path == AUTH_START_PATH {
                self.handshakes.fetch_add(1, Ordering::SeqCst);
            }
            let index = self.auth_requests.fetch_add(1, Ordering::SeqCst);
            if let Some(handshake) = &self.handshake {
                return handshake(&request, index);
            }
            return if path == AUTH_START_PATH {
                start_reply(&format!("_mt5={}", self.handshakes()))
            } else {
                answer_reply(&request)
            };
        }

        let index = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(request.clone());
            calls.len() - 1
        };
        if let Some((gated_path, notify)) = &self.gate {
            if gated_path == path {
                notify.notified().await;
            }
        }
        (self.handler)(&request, index)
    }
}
