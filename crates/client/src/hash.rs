//! # 握手摘要
//!
//! 双向证明都由同一个内部密钥派生：`inner = MD5(MD5(utf16le(password)) || agent)`。
//! 服务端以 `MD5(inner || client_nonce)` 证明自身，客户端以 `MD5(inner || server_nonce)` 证明自身。
//! 随机数与摘要在内部始终以字节形式存在，十六进制只出现在线上边界。

use md5::{Digest as _, Md5};
use mt5_core::gateway::error::HandshakeError;

/// 第二轮 MD5 前追加在密码摘要后的固定盐
const AGENT_SALT: &[u8] = b"WebAPI";

/// 本地生成的随机数长度
pub const CLIENT_NONCE_LEN: usize = 16;

/// # Summary
/// 16 字节的 MD5 输出。
///
/// # Invariants
/// - `Debug` 不输出内容，摘要等同于口令材料。
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Md5Digest([u8; 16]);

impl Md5Digest {
    /// 原始字节
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// 小写十六进制，网关要求的形式
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl std::fmt::Debug for Md5Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Md5Digest(..)")
    }
}

/// 由密码派生的内部密钥，永不上线传输
pub type InnerSecret = Md5Digest;

/// 服务端挑战，由 `srv_rand` 十六进制字段解码而来
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerNonce(Vec<u8>);

impl ServerNonce {
    /// # Summary
    /// 解码服务端随机数。
    ///
    /// # Arguments
    /// * `text` - `srv_rand` 字段原文
    ///
    /// # Returns
    /// * `Ok(ServerNonce)` - 非空且为合法十六进制
    /// * `Err(HandshakeError::InvalidNonce)` - 为空或非法十六进制
    pub fn from_hex(text: &str) -> Result<Self, HandshakeError> {
        let bytes = hex::decode(text.trim())
            .map_err(|e| HandshakeError::InvalidNonce(format!("{}: {}", e, text)))?;
        if bytes.is_empty() {
            return Err(HandshakeError::InvalidNonce("empty srv_rand".into()));
        }
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// 客户端发给服务端的挑战，仅使用一次
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientNonce([u8; CLIENT_NONCE_LEN]);

impl ClientNonce {
    /// 由系统随机源生成
    pub fn random() -> Self {
        Self(rand::random::<[u8; CLIENT_NONCE_LEN]>())
    }

    pub fn from_bytes(bytes: [u8; CLIENT_NONCE_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; CLIENT_NONCE_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

fn md5_of(parts: &[&[u8]]) -> Md5Digest {
    let mut hasher = Md5::new();
    for part in parts {
        hasher.update(part);
    }
    let digest = hasher.finalize();
    let mut out = [0u8; 16];
    out.copy_from_slice(&digest);
    Md5Digest(out)
}

/// # Summary
/// 由明文密码派生内部密钥。
///
/// # Logic
/// 1. 将密码编码为 UTF-16LE 并计算 MD5。
/// 2. 在摘要后追加 `WebAPI` 再计算一次 MD5。
///
/// # Arguments
/// * `password` - 明文密码
///
/// # Returns
/// 内部密钥。
pub fn derive_inner(password: &str) -> InnerSecret {
    let utf16: Vec<u8> = password.encode_utf16().flat_map(u16::to_le_bytes).collect();
    let password_digest = md5_of(&[utf16.as_slice()]);
    md5_of(&[password_digest.as_bytes().as_slice(), AGENT_SALT])
}

/// 客户端持有密码的证明，作为 `srv_rand_answer` 发送
pub fn server_answer(inner: &InnerSecret, nonce: &ServerNonce) -> Md5Digest {
    md5_of(&[inner.as_bytes().as_slice(), nonce.as_bytes()])
}

/// 期望服务端以 `cli_rand_answer` 返回的证明
pub fn client_answer(inner: &InnerSecret, nonce: &ClientNonce) -> Md5Digest {
    md5_of(&[inner.as_bytes().as_slice(), nonce.as_bytes().as_slice()])
}

/// # Summary
/// 校验服务端返回的十六进制证明。
///
/// # Logic
/// 1. 不是恰好 16 字节的十六进制一律视为不匹配。
/// 2. 逐字节比较，不提前退出。
///
/// # Arguments
/// * `expected` - 本地计算的期望摘要
/// * `received_hex` - 服务端返回的十六进制文本
///
/// # Returns
/// 完全一致时返回 `true`。
pub fn answer_matches(expected: &Md5Digest, received_hex: &str) -> bool {
    let Ok(received) = hex::decode(received_hex.trim()) else {
        return false;
    };
    if received.len() != expected.0.len() {
        return false;
    }
    expected
        .0
        .iter()
        .zip(received.iter())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}
