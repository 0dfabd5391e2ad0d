//! ECDH (P-256) 密钥交换
//!
//! 每个会话生成一次临时密钥对，会话结束即丢弃。
//!
//! 关键说明：
//! 1. 公钥以 X.509 SubjectPublicKeyInfo (DER) 格式发送，
//!    解码时同时接受 65 字节 SEC1 uncompressed 格式
//! 2. 会话密钥 = HKDF-SHA256(原始 ECDH 共享密钥)，**不**直接截断共享密钥

use crate::error::{Result, TransferError};
use hkdf::Hkdf;
use p256::pkcs8::{DecodePublicKey, EncodePublicKey};
use p256::{PublicKey, ecdh::EphemeralSecret};
use rand::rngs::OsRng;
use sha2::Sha256;
use std::fmt;

/// 会话密钥长度 (AES-256)
pub const SHARED_KEY_LEN: usize = 32;

const HKDF_INFO: &[u8] = b"sorene stream key v1";

/// 会话对称密钥
///
/// 只由对应会话的 [`StreamCipher`](super::StreamCipher) 持有。
#[derive(Clone, PartialEq, Eq)]
pub struct SharedKey([u8; SHARED_KEY_LEN]);

impl SharedKey {
    pub fn from_bytes(bytes: [u8; SHARED_KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SHARED_KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for SharedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SharedKey(..)")
    }
}

/// 本地临时密钥对
pub struct KeyExchange {
    secret: EphemeralSecret,
    public_key: Vec<u8>,
}

impl KeyExchange {
    /// 生成本地 ECDH 密钥对
    pub fn generate() -> Result<Self> {
        let secret = EphemeralSecret::random(&mut OsRng);
        let public_key = secret
            .public_key()
            .to_public_key_der()
            .map_err(|e| TransferError::KeyAgreement(format!("cannot encode public key: {e}")))?
            .as_bytes()
            .to_vec();

        Ok(Self { secret, public_key })
    }

    /// 获取编码后的公钥（握手时发送给对端）
    pub fn public_key_bytes(&self) -> &[u8] {
        &self.public_key
    }

    /// 使用对方公钥派生会话密钥
    ///
    /// 消耗自身：每个临时私钥只参与一次密钥协商。
    pub fn derive_shared(self, peer_public_key: &[u8]) -> Result<SharedKey> {
        let peer_public = decode_public_key(peer_public_key)?;

        let shared_secret = self.secret.diffie_hellman(&peer_public);

        let hkdf = Hkdf::<Sha256>::new(None, shared_secret.raw_secret_bytes().as_slice());
        let mut key = [0u8; SHARED_KEY_LEN];
        hkdf.expand(HKDF_INFO, &mut key)
            .map_err(|e| TransferError::KeyAgreement(format!("key derivation failed: {e}")))?;

        Ok(SharedKey(key))
    }
}

fn decode_public_key(bytes: &[u8]) -> Result<PublicKey> {
    if bytes.len() == 65 && bytes[0] == 0x04 {
        // SEC1 uncompressed format
        PublicKey::from_sec1_bytes(bytes)
            .map_err(|e| TransferError::KeyAgreement(format!("invalid SEC1 public key: {e}")))
    } else {
        // X.509 SubjectPublicKeyInfo format
        PublicKey::from_public_key_der(bytes)
            .map_err(|e| TransferError::KeyAgreement(format!("invalid SPKI public key: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use p256::elliptic_curve::sec1::ToEncodedPoint;

    #[test]
    fn test_ecdh_symmetry() {
        let alice = KeyExchange::generate().unwrap();
        let bob = KeyExchange::generate().unwrap();
        let alice_pub = alice.public_key_bytes().to_vec();
        let bob_pub = bob.public_key_bytes().to_vec();

        let k1 = alice.derive_shared(&bob_pub).unwrap();
        let k2 = bob.derive_shared(&alice_pub).unwrap();
        assert_eq!(k1, k2);
    }

    #[test]
    fn test_distinct_sessions_get_distinct_keys() {
        let a = KeyExchange::generate().unwrap();
        let b = KeyExchange::generate().unwrap();
        let c = KeyExchange::generate().unwrap();
        let b_pub = b.public_key_bytes().to_vec();
        let c_pub = c.public_key_bytes().to_vec();
        let a2 = KeyExchange::generate().unwrap();

        let ab = a.derive_shared(&b_pub).unwrap();
        let ac = a2.derive_shared(&c_pub).unwrap();
        assert_ne!(ab, ac);
    }

    #[test]
    fn test_public_key_is_spki() {
        let kx = KeyExchange::generate().unwrap();
        let bytes = kx.public_key_bytes();
        // SEQUENCE
        assert_eq!(bytes[0], 0x30);
        assert_eq!(bytes.len(), 91);
    }

    #[test]
    fn test_accepts_sec1_peer_key() {
        let local = KeyExchange::generate().unwrap();
        let peer = EphemeralSecret::random(&mut OsRng);
        let sec1 = peer.public_key().to_encoded_point(false);
        assert_eq!(sec1.as_bytes().len(), 65);
        assert!(local.derive_shared(sec1.as_bytes()).is_ok());
    }

    #[test]
    fn test_rejects_garbage_peer_key() {
        let local = KeyExchange::generate().unwrap();
        let err = local.derive_shared(&[0x30, 0x01, 0x02]).unwrap_err();
        assert!(matches!(err, TransferError::KeyAgreement(_)));

        let local = KeyExchange::generate().unwrap();
        // 0x04 前缀但不在曲线上
        let mut bogus = [0xffu8; 65];
        bogus[0] = 0x04;
        assert!(local.derive_shared(&bogus).is_err());
    }

    #[test]
    fn test_shared_key_debug_is_redacted() {
        let key = SharedKey::from_bytes([7u8; 32]);
        assert_eq!(format!("{key:?}"), "SharedKey(..)");
    }
}
