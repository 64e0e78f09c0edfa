//! 字符串对称加解密
//!
//! 容器头部的加密标记是全局的：置位后，所有 String 列的值以及 footer 中的
//! schema 文档都先经过 [`StringCipher::encrypt`] 再做长度前缀编码，读取时反向还原。

use std::fmt;

use crate::common::{DataFileError, Result};

pub trait StringCipher: Send + Sync + fmt::Debug {
    fn encrypt(&self, plain: &str) -> Result<String>;
    fn decrypt(&self, cipher_text: &str) -> Result<String>;
}

const DEFAULT_KEY: &[u8] = b"etl-datafile/default-key";

/// 密钥循环异或 + 十六进制文本
///
/// 只做混淆，不提供保密性；需要真实加密时实现 [`StringCipher`] 替换之。
#[derive(Clone)]
pub struct XorHexCipher {
    key: Vec<u8>,
}

impl XorHexCipher {
    pub fn new(key: impl Into<Vec<u8>>) -> Result<Self> {
        let key = key.into();
        if key.is_empty() {
            return Err(DataFileError::Config("cipher key must not be empty".into()));
        }
        Ok(Self { key })
    }

    fn apply(&self, data: &mut [u8]) {
        for (b, k) in data.iter_mut().zip(self.key.iter().cycle()) {
            *b ^= k;
        }
    }
}

impl Default for XorHexCipher {
    fn default() -> Self {
        Self { key: DEFAULT_KEY.to_vec() }
    }
}

impl fmt::Debug for XorHexCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("XorHexCipher").field("key_len", &self.key.len()).finish()
    }
}

impl StringCipher for XorHexCipher {
    fn encrypt(&self, plain: &str) -> Result<String> {
        let mut data = plain.as_bytes().to_vec();
        self.apply(&mut data);
        Ok(hex::encode(data))
    }

    fn decrypt(&self, cipher_text: &str) -> Result<String> {
        let mut data = hex::decode(cipher_text)
            .map_err(|e| DataFileError::Cipher(format!("invalid cipher text: {e}")))?;
        self.apply(&mut data);
        String::from_utf8(data)
            .map_err(|_| DataFileError::Cipher("decrypted bytes are not valid UTF-8".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_then_decrypt() {
        let c = XorHexCipher::default();
        let secret = c.encrypt("account 4471 — Zoë").unwrap();
        assert_ne!(secret, "account 4471 — Zoë");
        assert!(secret.bytes().all(|b| b.is_ascii_hexdigit()));
        assert_eq!(c.decrypt(&secret).unwrap(), "account 4471 — Zoë");
    }

    #[test]
    fn wrong_key_or_garbage_fails() {
        let a = XorHexCipher::new("alpha").unwrap();
        assert!(a.decrypt("zz").is_err());
        assert!(a.decrypt("abc").is_err());
        assert!(XorHexCipher::new(Vec::new()).is_err());
    }
}
