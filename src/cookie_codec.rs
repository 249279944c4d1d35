//! Tamper-evident, optionally encrypted cookie values.
//!
//! A token is `base64url("<unix-ts>|<base64url(payload)>|" ++ mac)` where the
//! mac is HMAC-SHA256 over `"<name>|<unix-ts>|<base64url(payload)>"`. With a
//! block key the payload is `nonce || AES-GCM(value)` with the cookie name as
//! associated data. Binding the name means a token minted for one cookie is
//! rejected under any other name.

mod block_cipher;

use std::fmt::{Debug, Formatter};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::Utc;
use hmac::{Hmac, Mac};
use rand::{rngs::OsRng, RngCore};
use sha2::Sha256;

use crate::ConfigurationError;
use block_cipher::BlockCipher;

type HmacSha256 = Hmac<Sha256>;

/// Token lifetime used when none is configured: 30 days.
pub const DEFAULT_MAX_AGE: u64 = 86400 * 30;

/// Browsers drop cookies beyond this size.
pub const MAX_TOKEN_LEN: usize = 4096;

#[derive(Debug, thiserror::Error)]
pub enum CookieError {
    #[error("Cookie value is malformed: {0}")]
    Format(&'static str),
    #[error("Cookie value failed authentication")]
    Authentication,
    #[error("Cookie value has expired")]
    Expired,
    #[error("Cookie value could not be decrypted")]
    Decryption,
    #[error("Cookie value could not be encrypted")]
    Encryption,
    #[error("Cookie value is {0} bytes long, the limit is 4096")]
    TooLong(usize),
}

/// Returns `len` bytes from the operating system's CSPRNG.
pub fn generate_random_key(len: usize) -> Vec<u8> {
    let mut key = vec![0u8; len];
    OsRng.fill_bytes(&mut key);
    key
}

#[derive(Clone)]
pub struct CookieCodec {
    mac: HmacSha256,
    block: Option<BlockCipher>,
    max_age: u64,
}

impl CookieCodec {
    /// Builds a codec from a hash key and an optional block key.
    ///
    /// The hash key authenticates every token and must not be empty. The
    /// block key turns on encryption and must be 16, 24 or 32 bytes long,
    /// selecting AES-128, AES-192 or AES-256.
    pub fn new(hash_key: &[u8], block_key: Option<&[u8]>) -> Result<Self, ConfigurationError> {
        if hash_key.is_empty() {
            return Err(ConfigurationError::MissingHashKey);
        }
        let mac = HmacSha256::new_from_slice(hash_key)
            .map_err(|_| ConfigurationError::MissingHashKey)?;
        let block = block_key.map(BlockCipher::new).transpose()?;
        Ok(Self {
            mac,
            block,
            max_age: DEFAULT_MAX_AGE,
        })
    }

    /// A codec with a random 64 byte hash key and a random AES-256 key.
    /// Tokens it issues do not survive a restart.
    pub fn generate() -> Result<Self, ConfigurationError> {
        Self::new(&generate_random_key(64), Some(&generate_random_key(32)))
    }

    /// Tokens older than `seconds` fail to decode. Zero disables the check.
    pub fn with_max_age(mut self, seconds: u64) -> Self {
        self.max_age = seconds;
        self
    }

    pub fn max_age(&self) -> u64 {
        self.max_age
    }

    pub fn is_encrypted(&self) -> bool {
        self.block.is_some()
    }

    pub fn encode(&self, name: &str, value: &[u8]) -> Result<String, CookieError> {
        self.encode_at(name, value, Utc::now().timestamp())
    }

    fn encode_at(&self, name: &str, value: &[u8], timestamp: i64) -> Result<String, CookieError> {
        let payload = match &self.block {
            Some(cipher) => cipher.seal(name.as_bytes(), value)?,
            None => value.to_vec(),
        };
        let payload = URL_SAFE_NO_PAD.encode(payload);
        let timestamp = timestamp.to_string();
        let tag = self
            .keyed_mac(name, timestamp.as_bytes(), payload.as_bytes())
            .finalize()
            .into_bytes();

        let mut token = format!("{timestamp}|{payload}|").into_bytes();
        token.extend_from_slice(&tag);
        let token = URL_SAFE_NO_PAD.encode(token);
        if token.len() > MAX_TOKEN_LEN {
            return Err(CookieError::TooLong(token.len()));
        }
        Ok(token)
    }

    pub fn decode(&self, name: &str, token: &str) -> Result<Vec<u8>, CookieError> {
        if token.len() > MAX_TOKEN_LEN {
            return Err(CookieError::TooLong(token.len()));
        }
        let raw = URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|_| CookieError::Format("invalid base64"))?;

        let mut parts = raw.splitn(3, |b| *b == b'|');
        let (Some(timestamp), Some(payload), Some(tag)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(CookieError::Format("expected three fields"));
        };

        self.keyed_mac(name, timestamp, payload)
            .verify_slice(tag)
            .map_err(|_| CookieError::Authentication)?;

        let timestamp = std::str::from_utf8(timestamp)
            .ok()
            .and_then(|t| t.parse::<i64>().ok())
            .ok_or(CookieError::Format("invalid timestamp"))?;
        if self.max_age > 0 {
            let oldest = Utc::now()
                .timestamp()
                .saturating_sub(i64::try_from(self.max_age).unwrap_or(i64::MAX));
            if timestamp < oldest {
                return Err(CookieError::Expired);
            }
        }

        let payload = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|_| CookieError::Format("invalid payload encoding"))?;
        match &self.block {
            Some(cipher) => cipher.open(name.as_bytes(), &payload),
            None => Ok(payload),
        }
    }

    fn keyed_mac(&self, name: &str, timestamp: &[u8], payload: &[u8]) -> HmacSha256 {
        let mut mac = self.mac.clone();
        mac.update(name.as_bytes());
        mac.update(b"|");
        mac.update(timestamp);
        mac.update(b"|");
        mac.update(payload);
        mac
    }
}

impl Debug for CookieCodec {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CookieCodec")
            .field("encrypted", &self.is_encrypted())
            .field("max_age", &self.max_age)
            .finish_non_exhaustive()
    }
}
