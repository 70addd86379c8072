use axum::Router;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Json;
use mt5_client::Mt5Client;
use mt5_client::hash::{self, CLIENT_NONCE_LEN, ClientNonce, ServerNonce};
use mt5_core::config::GatewayConfig;
use mt5_core::gateway::entity::PasswordType;
use mt5_core::gateway::error::{GatewayError, HandshakeError};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

const PASSWORD: &str = "Passw0rd!";

struct Session {
    srv_rand: String,
    authenticated: bool,
}

/// # Summary
/// 最小化的管理网关替身：真实握手摘要、基于 Cookie 的会话以及少量业务接口。
///
/// # Invariants
/// - 通过 `forbid_next`、`tamper_proof` 等开关制造异常行为。
#[derive(Default)]
struct GatewayDouble {
    sessions: Mutex<HashMap<String, Session>>,
    handshakes: AtomicUsize,
    operations: AtomicUsize,
    credential_calls: AtomicUsize,
    forbid_next: AtomicUsize,
    tamper_proof: AtomicBool,
    seen_cookies: Mutex<Vec<Option<String>>>,
}

impl GatewayDouble {
    fn handshakes(&self) -> usize {
        self.handshakes.load(Ordering::SeqCst)
    }

    fn operations(&self) -> usize {
        self.operations.load(Ordering::SeqCst)
    }

    fn drop_sessions(&self) {
        self.sessions.lock().unwrap().clear();
    }

    fn authorize(&self, headers: &HeaderMap) -> Result<(), Response> {
        let token = cookie(headers);
        self.seen_cookies.lock().unwrap().push(token.clone());
        if self
            .forbid_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err((StatusCode::FORBIDDEN, "forbidden").into_response());
        }
        let live = token
            .and_then(|t| self.sessions.lock().unwrap().get(&t).map(|s| s.authenticated))
            .unwrap_or(false);
        if live {
            Ok(())
        } else {
            Err((StatusCode::FORBIDDEN, "no session").into_response())
        }
    }
}

fn cookie(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::COOKIE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

async fn auth_start(
    State(gw): State<Arc<GatewayDouble>>,
    Query(q): Query<HashMap<String, String>>,
) -> Response {
    if q.get("type").map(String::as_str) != Some("manager") || !q.contains_key("login") {
        return Json(json!({"retcode": "3 Invalid parameters"})).into_response();
    }
    let id = gw.handshakes.fetch_add(1, Ordering::SeqCst) + 1;
    let srv_rand = format!("{:032x}", id * 0x1234_5678 + 7);
    let token = format!("_mt5={}", id);
    gw.sessions.lock().unwrap().insert(
        token.clone(),
        Session {
            srv_rand: srv_rand.clone(),
            authenticated: false,
        },
    );
    (
        [(header::SET_COOKIE, format!("{}; path=/; HttpOnly", token))],
        Json(json!({"retcode": "0 Done", "srv_rand": srv_rand})),
    )
        .into_response()
}

async fn auth_answer(
    State(gw): State<Arc<GatewayDouble>>,
    headers: HeaderMap,
    Query(q): Query<HashMap<String, String>>,
) -> Response {
    let mut sessions = gw.sessions.lock().unwrap();
    let Some(session) = cookie(&headers).and_then(|t| sessions.get_mut(&t)) else {
        return (StatusCode::FORBIDDEN, "no session").into_response();
    };

    let inner = hash::derive_inner(PASSWORD);
    let srv_nonce = ServerNonce::from_hex(&session.srv_rand).unwrap();
    let expected = hash::server_answer(&inner, &srv_nonce);
    let received = q.get("srv_rand_answer").cloned().unwrap_or_default();
    if !hash::answer_matches(&expected, &received) {
        return Json(json!({"retcode": "1003 Invalid password"})).into_response();
    }

    let cli_rand = hex::decode(q.get("cli_rand").cloned().unwrap_or_default()).unwrap();
    let bytes: [u8; CLIENT_NONCE_LEN] = cli_rand.try_into().unwrap();
    let mut proof = hash::client_answer(&inner, &ClientNonce::from_bytes(bytes)).to_hex();
    if gw.tamper_proof.load(Ordering::SeqCst) {
        let flipped = if proof.starts_with('0') { "1" } else { "0" };
        proof.replace_range(0..1, flipped);
    }
    session.authenticated = true;
    Json(json!({"retcode": "0 Done", "cli_rand_answer": proof})).into_response()
}

async fn user_total(State(gw): State<Arc<GatewayDouble>>, headers: HeaderMap) -> Response {
    if let Err(denied) = gw.authorize(&headers) {
        return denied;
    }
    gw.operations.fetch_add(1, Ordering::SeqCst);
    Json(json!({"retcode": "0 Done", "answer": {"Total": "3"}})).into_response()
}

async fn tick_last(
    State(gw): State<Arc<GatewayDouble>>,
    headers: HeaderMap,
    Query(q): Query<HashMap<String, String>>,
) -> Response {
    if let Err(denied) = gw.authorize(&headers) {
        return denied;
    }
    gw.operations.fetch_add(1, Ordering::SeqCst);
    let quotes: Vec<_> = q
        .get("symbol")
        .map(|s| s.split(',').map(|sym| json!({"Symbol": sym, "Bid": "1.1", "Ask": 1.2})).collect())
        .unwrap_or_default();
    Json(json!({"retcode": "0 Done", "trans_id": 901, "answer": quotes})).into_response()
}

async fn check_password_get(State(gw): State<Arc<GatewayDouble>>, headers: HeaderMap) -> Response {
    if let Err(denied) = gw.authorize(&headers) {
        return denied;
    }
    gw.credential_calls.fetch_add(1, Ordering::SeqCst);
    Json(json!({"retcode": "3006 Invalid account password"})).into_response()
}

async fn check_password_post(State(gw): State<Arc<GatewayDouble>>, headers: HeaderMap) -> Response {
    if let Err(denied) = gw.authorize(&headers) {
        return denied;
    }
    gw.credential_calls.fetch_add(1, Ordering::SeqCst);
    let is_json = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("application/json"));
    if is_json {
        return (StatusCode::UNSUPPORTED_MEDIA_TYPE, "json not accepted").into_response();
    }
    Json(json!({"retcode": "3006 Invalid account password"})).into_response()
}

/// # Summary
/// 在随机端口上启动网关替身。
///
/// # Returns
/// 基础 URL 与替身的共享句柄。
async fn spawn_gateway() -> (String, Arc<GatewayDouble>) {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init()
        .ok();

    let gw = Arc::new(GatewayDouble::default());
    let app = Router::new()
        .route("/api/auth/start", get(auth_start))
        .route("/api/auth/answer", get(auth_answer))
        .route("/api/user/total", get(user_total))
        .route("/api/tick/last", get(tick_last))
        .route(
            "/api/user/check_password",
            get(check_password_get).post(check_password_post),
        )
        .with_state(gw.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, gw)
}

fn client_for(base_url: &str) -> Mt5Client {
    let config = GatewayConfig {
        base_url: base_url.to_string(),
        login: "1005".into(),
        password: PASSWORD.into(),
        timeout_ms: Some(5_000),
        ..GatewayConfig::default()
    };
    Mt5Client::from_config(&config).unwrap()
}

#[tokio::test]
async fn handshake_then_operation_carries_affinity_cookie() {
    let (addr, gw) = spawn_gateway().await;
    let client = client_for(&addr);

    assert_eq!(client.get_user_total().await.unwrap(), 3);
    assert!(client.is_authenticated().await);
    assert_eq!(gw.handshakes(), 1);
    assert_eq!(
        gw.seen_cookies.lock().unwrap().as_slice(),
        &[Some("_mt5=1".to_string())]
    );
}

#[tokio::test]
async fn tampered_server_proof_fails_closed() {
    let (addr, gw) = spawn_gateway().await;
    gw.tamper_proof.store(true, Ordering::SeqCst);
    let client = client_for(&addr);

    let err = client.get_user_total().await.unwrap_err();
    assert_eq!(err, GatewayError::Handshake(HandshakeError::MutualAuth));
    assert!(!client.is_authenticated().await);
    assert_eq!(gw.operations(), 0);
}

#[tokio::test]
async fn wrong_password_is_a_handshake_error() {
    let (addr, gw) = spawn_gateway().await;
    let client = Mt5Client::from_config(&GatewayConfig {
        base_url: addr,
        login: "1005".into(),
        password: "not-it".into(),
        ..GatewayConfig::default()
    })
    .unwrap();

    let err = client.ensure_authenticated().await.unwrap_err();
    assert!(matches!(err, GatewayError::Handshake(HandshakeError::Answer(_))));
    assert_eq!(gw.handshakes(), 1);
}

#[tokio::test]
async fn forbidden_is_retried_exactly_once() {
    let (addr, gw) = spawn_gateway().await;
    let client = client_for(&addr);

    gw.forbid_next.store(1, Ordering::SeqCst);
    assert_eq!(client.get_user_total().await.unwrap(), 3);
    assert_eq!(gw.handshakes(), 2);

    gw.forbid_next.store(2, Ordering::SeqCst);
    let err = client.get_user_total().await.unwrap_err();
    assert!(matches!(err, GatewayError::Transport { status: Some(403), .. }));
    assert_eq!(gw.handshakes(), 3);
    assert_eq!(gw.operations(), 1);
}

#[tokio::test]
async fn dropped_session_triggers_one_rehandshake() {
    let (addr, gw) = spawn_gateway().await;
    let client = client_for(&addr);
    client.ensure_authenticated().await.unwrap();

    gw.drop_sessions();
    assert_eq!(client.get_user_total().await.unwrap(), 3);

    assert_eq!(gw.handshakes(), 2);
    assert_eq!(
        gw.seen_cookies.lock().unwrap().as_slice(),
        &[Some("_mt5=1".to_string()), Some("_mt5=2".to_string())]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_first_calls_share_one_handshake() {
    let (addr, gw) = spawn_gateway().await;
    let client = client_for(&addr);

    let mut handles = Vec::new();
    for _ in 0..8 {
        let client = client.clone();
        handles.push(tokio::spawn(async move { client.get_user_total().await }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap(), 3);
    }
    assert_eq!(gw.handshakes(), 1);
    assert_eq!(gw.operations(), 8);
}

#[tokio::test]
async fn check_password_returns_first_answered_envelope() {
    let (addr, gw) = spawn_gateway().await;
    let client = client_for(&addr);

    let envelope = client
        .check_password(1005, "guess", PasswordType::Main)
        .await
        .unwrap();

    assert_eq!(envelope.retcode, "3006 Invalid account password");
    assert!(!envelope.is_success());
    // JSON 被拒绝后，小写 GET 得到应答
    assert_eq!(gw.credential_calls.load(Ordering::SeqCst), 2);
    assert!(client.is_authenticated().await);
}

#[tokio::test]
async fn tick_last_keeps_transaction_id() -> anyhow::Result<()> {
    let (addr, _gw) = spawn_gateway().await;
    let client = client_for(&addr);

    let ticks = client.get_tick_last(&["EURUSD", "XAUUSD"], None).await?;
    assert_eq!(ticks.trans_id.as_deref(), Some("901"));
    assert_eq!(ticks.answer.len(), 2);
    assert_eq!(ticks.answer[1].symbol, "XAUUSD");
    assert_eq!(ticks.answer[0].ask.as_deref(), Some("1.2"));
    Ok(())
}
