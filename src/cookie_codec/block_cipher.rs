use aes_gcm::{
    aead::{consts::U12, Aead, AeadCore, KeyInit, Nonce, Payload},
    aes::Aes192,
    Aes128Gcm, Aes256Gcm, AesGcm,
};
use rand::{rngs::OsRng, RngCore};

use crate::{cookie_codec::CookieError, ConfigurationError};

type Aes192Gcm = AesGcm<Aes192, U12>;

const NONCE_LEN: usize = 12;

/// AES-GCM keyed by the block key. The variant follows the key length.
#[derive(Clone)]
pub(super) enum BlockCipher {
    Aes128(Aes128Gcm),
    Aes192(Aes192Gcm),
    Aes256(Aes256Gcm),
}

impl BlockCipher {
    pub(super) fn new(key: &[u8]) -> Result<Self, ConfigurationError> {
        let invalid = |_| ConfigurationError::InvalidBlockKey(key.len());
        match key.len() {
            16 => Aes128Gcm::new_from_slice(key)
                .map(Self::Aes128)
                .map_err(invalid),
            24 => Aes192Gcm::new_from_slice(key)
                .map(Self::Aes192)
                .map_err(invalid),
            32 => Aes256Gcm::new_from_slice(key)
                .map(Self::Aes256)
                .map_err(invalid),
            len => Err(ConfigurationError::InvalidBlockKey(len)),
        }
    }

    /// Returns `nonce || ciphertext`, with `aad` authenticated alongside.
    pub(super) fn seal(&self, aad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CookieError> {
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        let ciphertext = match self {
            Self::Aes128(cipher) => encrypt(cipher, &nonce, aad, plaintext),
            Self::Aes192(cipher) => encrypt(cipher, &nonce, aad, plaintext),
            Self::Aes256(cipher) => encrypt(cipher, &nonce, aad, plaintext),
        }
        .map_err(|_| CookieError::Encryption)?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    pub(super) fn open(&self, aad: &[u8], sealed: &[u8]) -> Result<Vec<u8>, CookieError> {
        if sealed.len() < NONCE_LEN {
            return Err(CookieError::Format("ciphertext too short"));
        }
        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);

        match self {
            Self::Aes128(cipher) => decrypt(cipher, nonce, aad, ciphertext),
            Self::Aes192(cipher) => decrypt(cipher, nonce, aad, ciphertext),
            Self::Aes256(cipher) => decrypt(cipher, nonce, aad, ciphertext),
        }
        .map_err(|_| CookieError::Decryption)
    }
}

fn encrypt<C>(cipher: &C, nonce: &[u8], aad: &[u8], msg: &[u8]) -> Result<Vec<u8>, aes_gcm::Error>
where
    C: Aead + AeadCore<NonceSize = U12>,
{
    cipher.encrypt(Nonce::<C>::from_slice(nonce), Payload { msg, aad })
}

fn decrypt<C>(cipher: &C, nonce: &[u8], aad: &[u8], msg: &[u8]) -> Result<Vec<u8>, aes_gcm::Error>
where
    C: Aead + AeadCore<NonceSize = U12>,
{
    cipher.decrypt(Nonce::<C>::from_slice(nonce), Payload { msg, aad })
}
