//! Envelope encryption under the platform KEK
//!
//! AES-256-GCM with a fresh random 96-bit IV per call. The serialized form is
//! [`EncryptedPayload`]: base64 IV, auth tag and ciphertext plus a format
//! version. Keys for other purposes (HMAC, future sub-keys) are derived from
//! the KEK with HKDF-SHA256 and never stored.
//!
//! A missing KEK is not a panic or a startup failure: every operation returns
//! [`CryptoError::Unavailable`] and the caller decides what to do.

use crate::error::{CryptoError, CryptoResult};
use crate::kek::KeyEncryptionKey;
use crate::security::SecureString;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use brokkr_core::types::CryptoConfig;
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::fmt;
use std::sync::Arc;
use tracing::warn;
use zeroize::Zeroizing;

/// Current payload format version
pub const PAYLOAD_VERSION: u8 = 1;

const IV_LEN: usize = 12;
const TAG_LEN: usize = 16;
const DERIVED_KEY_LEN: usize = 32;

type HmacSha256 = Hmac<Sha256>;

/// An AES-256-GCM ciphertext with everything needed to decrypt it
///
/// Unknown fields are rejected so that plain JSON objects are never mistaken
/// for an encrypted payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct EncryptedPayload {
    pub version: u8,
    /// Base64 96-bit IV
    pub iv: String,
    /// Base64 128-bit GCM tag
    pub auth_tag: String,
    /// Base64 ciphertext, tag excluded
    pub ciphertext: String,
}

/// A 32-byte key derived from the KEK for one `(purpose, context)` pair
pub struct DerivedKey(Zeroizing<[u8; DERIVED_KEY_LEN]>);

impl DerivedKey {
    pub fn as_bytes(&self) -> &[u8; DERIVED_KEY_LEN] {
        &self.0
    }
}

impl PartialEq for DerivedKey {
    fn eq(&self, other: &Self) -> bool {
        self.0[..] == other.0[..]
    }
}

impl fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DerivedKey([REDACTED])")
    }
}

/// Envelope crypto engine
///
/// Cheap to clone; the KEK is shared behind an `Arc`.
#[derive(Clone, Default)]
pub struct EnvelopeCrypto {
    kek: Option<Arc<KeyEncryptionKey>>,
}

impl EnvelopeCrypto {
    /// Engine with no KEK; every operation returns `Unavailable`
    pub fn disabled() -> Self {
        Self { kek: None }
    }

    pub fn with_kek(kek: KeyEncryptionKey) -> Self {
        Self {
            kek: Some(Arc::new(kek)),
        }
    }

    /// Load the KEK described by `config`, falling back to a disabled engine
    pub fn from_config(config: &CryptoConfig) -> Self {
        match KeyEncryptionKey::load(config) {
            Some(kek) => Self::with_kek(kek),
            None => Self::disabled(),
        }
    }

    pub fn is_available(&self) -> bool {
        self.kek.is_some()
    }

    fn kek(&self) -> CryptoResult<&KeyEncryptionKey> {
        self.kek.as_deref().ok_or(CryptoError::Unavailable)
    }

    fn cipher(&self) -> CryptoResult<Aes256Gcm> {
        let kek = self.kek()?;
        Ok(Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(kek.as_bytes())))
    }

    /// Encrypt `plaintext` under a fresh random IV
    pub fn encrypt(&self, plaintext: &[u8]) -> CryptoResult<EncryptedPayload> {
        let cipher = self.cipher()?;

        let mut iv = [0u8; IV_LEN];
        OsRng.fill_bytes(&mut iv);

        let mut sealed = cipher
            .encrypt(Nonce::from_slice(&iv), plaintext)
            .map_err(|_| CryptoError::EncryptionFailed)?;

        // aes-gcm appends the tag to the ciphertext
        let tag = sealed.split_off(sealed.len() - TAG_LEN);

        Ok(EncryptedPayload {
            version: PAYLOAD_VERSION,
            iv: BASE64.encode(iv),
            auth_tag: BASE64.encode(tag),
            ciphertext: BASE64.encode(sealed),
        })
    }

    /// Decrypt a payload
    ///
    /// Tag mismatch, malformed base64, wrong lengths, an unknown version and a
    /// wrong key all yield the same `DecryptionFailed`.
    pub fn decrypt(&self, payload: &EncryptedPayload) -> CryptoResult<Zeroizing<Vec<u8>>> {
        let cipher = self.cipher()?;

        let result = Self::open_payload(&cipher, payload);
        if result.is_none() {
            warn!(version = payload.version, "Envelope decryption failed");
        }
        result.ok_or(CryptoError::DecryptionFailed)
    }

    fn open_payload(cipher: &Aes256Gcm, payload: &EncryptedPayload) -> Option<Zeroizing<Vec<u8>>> {
        if payload.version != PAYLOAD_VERSION {
            return None;
        }

        let iv = BASE64.decode(&payload.iv).ok()?;
        let tag = BASE64.decode(&payload.auth_tag).ok()?;
        let mut combined = BASE64.decode(&payload.ciphertext).ok()?;
        if iv.len() != IV_LEN || tag.len() != TAG_LEN {
            return None;
        }

        combined.extend_from_slice(&tag);
        cipher
            .decrypt(Nonce::from_slice(&iv), combined.as_slice())
            .ok()
            .map(Zeroizing::new)
    }

    pub fn encrypt_str(&self, plaintext: &str) -> CryptoResult<EncryptedPayload> {
        self.encrypt(plaintext.as_bytes())
    }

    pub fn decrypt_str(&self, payload: &EncryptedPayload) -> CryptoResult<SecureString> {
        let bytes = self.decrypt(payload)?;
        let text = std::str::from_utf8(&bytes).map_err(|_| CryptoError::DecryptionFailed)?;
        Ok(SecureString::from(text))
    }

    /// Encrypt the JSON form of `value`
    pub fn encrypt_json<T: Serialize>(&self, value: &T) -> CryptoResult<EncryptedPayload> {
        // checked first so an unavailable engine never serializes the secret
        self.kek()?;
        let json = Zeroizing::new(
            serde_json::to_vec(value).map_err(|e| CryptoError::Serialization(e.to_string()))?,
        );
        self.encrypt(&json)
    }

    pub fn decrypt_json<T: DeserializeOwned>(&self, payload: &EncryptedPayload) -> CryptoResult<T> {
        let bytes = self.decrypt(payload)?;
        serde_json::from_slice(&bytes).map_err(|e| CryptoError::Serialization(e.to_string()))
    }

    /// HKDF-SHA256 with `purpose` as salt and `context` as info
    ///
    /// Deterministic for a given KEK; distinct pairs give independent keys.
    pub fn derive_key(&self, purpose: &str, context: &str) -> CryptoResult<DerivedKey> {
        let kek = self.kek()?;
        let hk = Hkdf::<Sha256>::new(Some(purpose.as_bytes()), kek.as_bytes());

        let mut okm = Zeroizing::new([0u8; DERIVED_KEY_LEN]);
        hk.expand(context.as_bytes(), &mut okm[..])
            .map_err(|_| CryptoError::EncryptionFailed)?;
        Ok(DerivedKey(okm))
    }

    fn mac(&self, purpose: &str) -> CryptoResult<HmacSha256> {
        let key = self.derive_key("hmac", purpose)?;
        <HmacSha256 as Mac>::new_from_slice(key.as_bytes())
            .map_err(|_| CryptoError::EncryptionFailed)
    }

    /// Hex HMAC-SHA256 of `data` under a key derived for `purpose`
    pub fn hmac_sha256(&self, purpose: &str, data: &[u8]) -> CryptoResult<String> {
        let mut mac = self.mac(purpose)?;
        mac.update(data);
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Constant-time check of a hex tag produced by [`Self::hmac_sha256`]
    pub fn verify_hmac(&self, purpose: &str, data: &[u8], tag_hex: &str) -> CryptoResult<bool> {
        let mut mac = self.mac(purpose)?;
        let Ok(tag) = hex::decode(tag_hex) else {
            return Ok(false);
        };
        mac.update(data);
        Ok(mac.verify_slice(&tag).is_ok())
    }
}

impl fmt::Debug for EnvelopeCrypto {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvelopeCrypto")
            .field("available", &self.is_available())
            .finish()
    }
}
