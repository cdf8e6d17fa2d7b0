//! Platform key-encryption-key
//!
//! The KEK is a single 32-byte secret, configured as 64 hex characters either
//! in an environment variable or in a file. It is loaded once and shared.

use crate::error::KekError;
use brokkr_core::types::CryptoConfig;
use std::fmt;
use std::path::Path;
use tracing::{debug, warn};
use zeroize::Zeroizing;

/// Length of the KEK in bytes (AES-256)
pub const KEK_LEN: usize = 32;

/// The platform key-encryption-key
///
/// Key bytes are zeroed on drop and never printed.
pub struct KeyEncryptionKey {
    bytes: Zeroizing<[u8; KEK_LEN]>,
}

impl KeyEncryptionKey {
    pub fn from_bytes(bytes: [u8; KEK_LEN]) -> Self {
        Self {
            bytes: Zeroizing::new(bytes),
        }
    }

    /// Parse 64 hex characters (surrounding whitespace ignored)
    pub fn from_hex(value: &str) -> Result<Self, KekError> {
        let trimmed = value.trim();
        if trimmed.len() != KEK_LEN * 2 {
            return Err(KekError::BadLength(trimmed.len()));
        }

        let mut bytes = Zeroizing::new([0u8; KEK_LEN]);
        hex::decode_to_slice(trimmed, &mut bytes[..]).map_err(|_| KekError::NotHex)?;
        Ok(Self { bytes })
    }

    pub fn from_env(var: &str) -> Result<Self, KekError> {
        let value = Zeroizing::new(
            std::env::var(var).map_err(|_| KekError::NotSet(var.to_string()))?,
        );
        Self::from_hex(&value)
    }

    /// Read the KEK from a file; `~` is expanded
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, KekError> {
        let raw = path.as_ref().to_string_lossy();
        let expanded = shellexpand::tilde(&raw).to_string();
        let content = Zeroizing::new(std::fs::read_to_string(&expanded).map_err(|source| {
            KekError::Read {
                path: expanded.clone(),
                source,
            }
        })?);
        Self::from_hex(&content)
    }

    /// Resolve the KEK from configuration: the env var wins, then the file
    ///
    /// Returns `None` (with a warning naming the reason, never the value) if
    /// no usable KEK is found. Callers construct a disabled crypto engine.
    pub fn load(config: &CryptoConfig) -> Option<Self> {
        match Self::from_env(&config.kek_env_var) {
            Ok(kek) => {
                debug!(source = %config.kek_env_var, "Loaded platform KEK");
                return Some(kek);
            }
            Err(KekError::NotSet(_)) => {}
            Err(e) => {
                warn!(source = %config.kek_env_var, reason = %e, "Ignoring malformed platform KEK");
                return None;
            }
        }

        if let Some(path) = &config.kek_file {
            return match Self::from_file(path) {
                Ok(kek) => {
                    debug!(source = %path, "Loaded platform KEK");
                    Some(kek)
                }
                Err(e) => {
                    warn!(source = %path, reason = %e, "Ignoring unusable platform KEK file");
                    None
                }
            };
        }

        warn!(
            "No platform KEK configured ({} unset); encryption is unavailable",
            config.kek_env_var
        );
        None
    }

    pub(crate) fn as_bytes(&self) -> &[u8; KEK_LEN] {
        &self.bytes
    }
}

impl fmt::Debug for KeyEncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyEncryptionKey([REDACTED])")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    const HEX_KEK: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

    #[test]
    fn test_from_hex() {
        let kek = KeyEncryptionKey::from_hex(HEX_KEK).unwrap();
        assert_eq!(kek.as_bytes()[31], 0x1f);

        assert!(matches!(
            KeyEncryptionKey::from_hex("abcd"),
            Err(KekError::BadLength(4))
        ));
        let not_hex = "z".repeat(64);
        assert!(matches!(
            KeyEncryptionKey::from_hex(&not_hex),
            Err(KekError::NotHex)
        ));
    }

    #[test]
    fn test_debug_is_redacted() {
        let kek = KeyEncryptionKey::from_hex(HEX_KEK).unwrap();
        let debug = format!("{:?}", kek);
        assert!(debug.contains("REDACTED"));
        assert!(!debug.contains("0001"));
    }

    #[test]
    fn test_from_file_trims_newline() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{}", HEX_KEK).unwrap();

        let kek = KeyEncryptionKey::from_file(file.path()).unwrap();
        assert_eq!(kek.as_bytes()[0], 0x00);
    }

    #[test]
    #[serial]
    fn test_load_prefers_env() {
        let config = CryptoConfig {
            kek_env_var: "BROKKR_TEST_KEK_LOAD".to_string(),
            kek_file: Some("/nonexistent/kek".to_string()),
        };

        std::env::set_var("BROKKR_TEST_KEK_LOAD", HEX_KEK);
        assert!(KeyEncryptionKey::load(&config).is_some());

        std::env::set_var("BROKKR_TEST_KEK_LOAD", "short");
        assert!(KeyEncryptionKey::load(&config).is_none());

        std::env::remove_var("BROKKR_TEST_KEK_LOAD");
        // falls through to the missing file
        assert!(KeyEncryptionKey::load(&config).is_none());
    }
}
