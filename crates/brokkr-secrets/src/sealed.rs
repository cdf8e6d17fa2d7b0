//! Values that may or may not be encrypted at rest
//!
//! Records written before encryption was configured hold plain values; newer
//! ones hold an [`EncryptedPayload`]. `Sealed<T>` makes the distinction
//! explicit instead of sniffing objects at every read.

use crate::envelope::{EncryptedPayload, EnvelopeCrypto};
use crate::error::CryptoResult;
use crate::security::SecureString;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Either an encrypted payload or a legacy plain value
///
/// Serialized untagged: an encrypted value is the bare payload object, a
/// plain value is `T` itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Sealed<T> {
    Encrypted(EncryptedPayload),
    Plain(T),
}

impl<T> Sealed<T> {
    pub fn is_encrypted(&self) -> bool {
        matches!(self, Sealed::Encrypted(_))
    }

    pub fn payload(&self) -> Option<&EncryptedPayload> {
        match self {
            Sealed::Encrypted(payload) => Some(payload),
            Sealed::Plain(_) => None,
        }
    }
}

impl<T: Serialize + DeserializeOwned + Clone> Sealed<T> {
    /// Encrypt `value`
    pub fn seal(value: &T, crypto: &EnvelopeCrypto) -> CryptoResult<Self> {
        crypto.encrypt_json(value).map(Sealed::Encrypted)
    }

    /// Encrypt a plain value; an encrypted one is returned unchanged
    pub fn sealed(self, crypto: &EnvelopeCrypto) -> CryptoResult<Self> {
        match self {
            Sealed::Encrypted(_) => Ok(self),
            Sealed::Plain(value) => Self::seal(&value, crypto),
        }
    }

    /// Read the value, decrypting if needed
    pub fn open(&self, crypto: &EnvelopeCrypto) -> CryptoResult<T> {
        match self {
            Sealed::Plain(value) => Ok(value.clone()),
            Sealed::Encrypted(payload) => crypto.decrypt_json(payload),
        }
    }
}

impl Sealed<String> {
    /// Read a secret string into a zeroizing wrapper
    pub fn open_secret(&self, crypto: &EnvelopeCrypto) -> CryptoResult<SecureString> {
        self.open(crypto).map(SecureString::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CryptoError;
    use crate::kek::KeyEncryptionKey;
    use serde_json::json;

    fn crypto() -> EnvelopeCrypto {
        EnvelopeCrypto::with_kek(KeyEncryptionKey::from_bytes([9; 32]))
    }

    #[test]
    fn test_seal_is_idempotent() {
        let crypto = crypto();
        let once = Sealed::Plain("key material".to_string())
            .sealed(&crypto)
            .unwrap();
        let twice = once.clone().sealed(&crypto).unwrap();

        assert!(once.is_encrypted());
        assert_eq!(once, twice);
        assert_eq!(twice.open(&crypto).unwrap(), "key material");
    }

    #[test]
    fn test_legacy_plain_value_reads_through() {
        let legacy: Sealed<serde_json::Value> =
            serde_json::from_value(json!({"token": "abc"})).unwrap();
        assert!(!legacy.is_encrypted());
        assert_eq!(
            legacy.open(&EnvelopeCrypto::disabled()).unwrap(),
            json!({"token": "abc"})
        );
    }

    #[test]
    fn test_payload_object_deserializes_as_encrypted() {
        let crypto = crypto();
        let sealed = Sealed::seal(&json!({"a": 1}), &crypto).unwrap();
        let text = serde_json::to_string(&sealed).unwrap();

        let back: Sealed<serde_json::Value> = serde_json::from_str(&text).unwrap();
        assert!(back.is_encrypted());
        assert_eq!(back.open(&crypto).unwrap(), json!({"a": 1}));
    }

    #[test]
    fn test_lookalike_object_stays_plain() {
        let value = json!({
            "iv": "x",
            "authTag": "y",
            "ciphertext": "z",
            "version": 1,
            "extra": true
        });
        let sealed: Sealed<serde_json::Value> = serde_json::from_value(value.clone()).unwrap();
        assert!(!sealed.is_encrypted());
        assert_eq!(sealed.open(&crypto()).unwrap(), value);
    }

    #[test]
    fn test_open_secret_without_kek() {
        let sealed = Sealed::seal(&"pem".to_string(), &crypto()).unwrap();
        assert_eq!(
            sealed.open_secret(&EnvelopeCrypto::disabled()).unwrap_err(),
            CryptoError::Unavailable
        );
        assert_eq!(sealed.open_secret(&crypto()).unwrap().as_str(), "pem");
    }
}
