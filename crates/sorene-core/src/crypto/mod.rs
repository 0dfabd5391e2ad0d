//! 加密模块
//!
//! - **key_exchange**: ECDH (P-256) 临时密钥交换 + HKDF 派生会话密钥
//! - **stream_cipher**: AES-256-GCM 分块认证加密流

pub mod key_exchange;
pub mod stream_cipher;

pub use key_exchange::{KeyExchange, SHARED_KEY_LEN, SharedKey};
pub use stream_cipher::{DecryptingReader, EncryptingWriter, StreamCipher};
