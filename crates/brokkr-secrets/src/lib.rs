//! Key management for Brokkr
//!
//! - **Envelope encryption**: AES-256-GCM under a single platform KEK, HKDF
//!   sub-keys, HMAC
//! - **Sealed values**: explicit plain/encrypted union for records at rest
//! - **Organization identity**: versioned Ed25519 keys with rotation and revocation
//! - **Security**: zeroizing strings, audit logging, error sanitization

pub mod envelope;
pub mod error;
pub mod identity;
pub mod kek;
pub mod sealed;
pub mod security;

pub use envelope::{DerivedKey, EncryptedPayload, EnvelopeCrypto};
pub use error::{CryptoError, IdentityError, KekError};
pub use identity::{
    InMemoryKeyPairStore, KeyPairStore, KeyStatus, OrganizationIdentityService,
    OrganizationKeyPair, SignedPayload,
};
pub use kek::KeyEncryptionKey;
pub use sealed::Sealed;
pub use security::{sanitize_error, AuditLog, SecureString};
