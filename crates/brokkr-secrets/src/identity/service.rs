//! Organization identity service: generation, signing, verification

use super::store::{CommitMode, KeyPairStore, NewKeyPair};
use super::{KeyStatus, OrganizationKeyPair};
use crate::envelope::{EncryptedPayload, EnvelopeCrypto};
use crate::error::{CryptoError, IdentityError, IdentityResult};
use crate::security::AuditLog;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;
use zeroize::Zeroizing;

/// A signature together with the key version that produced it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedPayload {
    pub key_version: u32,
    /// Base64 64-byte Ed25519 signature
    pub signature: String,
}

/// Manages Ed25519 identity keys per organization
pub struct OrganizationIdentityService {
    crypto: EnvelopeCrypto,
    store: Arc<dyn KeyPairStore>,
}

impl OrganizationIdentityService {
    pub fn new(crypto: EnvelopeCrypto, store: Arc<dyn KeyPairStore>) -> Self {
        Self { crypto, store }
    }

    /// Generate the first key pair for an organization
    ///
    /// Fails with `ActiveKeyExists` if one is already active.
    pub async fn provision(&self, organization_id: Uuid) -> IdentityResult<OrganizationKeyPair> {
        self.commit_new(organization_id, CommitMode::Provision, "identity.provision")
            .await
    }

    /// Replace the active key with version N+1; acts as provision if none is active
    pub async fn rotate(&self, organization_id: Uuid) -> IdentityResult<OrganizationKeyPair> {
        self.commit_new(organization_id, CommitMode::Rotate, "identity.rotate")
            .await
    }

    /// Revoke every non-revoked key; returns the number changed
    pub async fn revoke(&self, organization_id: Uuid) -> IdentityResult<usize> {
        let revoked = self.store.revoke_all(organization_id).await?;
        AuditLog::new("identity.revoke", format!("{} keys", revoked))
            .for_organization(organization_id)
            .log();
        Ok(revoked)
    }

    async fn commit_new(
        &self,
        organization_id: Uuid,
        mode: CommitMode,
        operation: &'static str,
    ) -> IdentityResult<OrganizationKeyPair> {
        let draft = match self.generate(organization_id) {
            Ok(draft) => draft,
            Err(e) => {
                AuditLog::new(operation, "org-key")
                    .for_organization(organization_id)
                    .failed(&e)
                    .log();
                return Err(e);
            }
        };

        let record = self.store.commit(draft, mode).await?;
        info!(
            organization_id = %organization_id,
            key_version = record.key_version,
            "Committed organization identity key"
        );
        AuditLog::new(operation, record.label())
            .for_organization(organization_id)
            .log();
        Ok(record)
    }

    fn generate(&self, organization_id: Uuid) -> IdentityResult<NewKeyPair> {
        if !self.crypto.is_available() {
            return Err(CryptoError::Unavailable.into());
        }

        let signing_key = SigningKey::generate(&mut OsRng);
        let seed = Zeroizing::new(signing_key.to_bytes());
        let encrypted_private_key = self.crypto.encrypt(seed.as_slice())?;

        Ok(NewKeyPair {
            organization_id,
            public_key: BASE64.encode(signing_key.verifying_key().to_bytes()),
            encrypted_private_key,
        })
    }

    /// Sign with an encrypted private key; the plaintext key lives for this call only
    pub fn sign(
        &self,
        payload: &[u8],
        encrypted_private_key: &EncryptedPayload,
    ) -> IdentityResult<String> {
        let seed = self.crypto.decrypt(encrypted_private_key)?;
        let seed: Zeroizing<[u8; 32]> = Zeroizing::new(
            seed.as_slice()
                .try_into()
                .map_err(|_| IdentityError::InvalidKeyMaterial("seed is not 32 bytes".into()))?,
        );

        let signing_key = SigningKey::from_bytes(&seed);
        Ok(BASE64.encode(signing_key.sign(payload).to_bytes()))
    }

    /// Check a base64 signature against a base64 public key
    ///
    /// Pure; malformed input verifies as false.
    pub fn verify(payload: &[u8], signature: &str, public_key: &str) -> bool {
        let Some(key) = decode_array::<32>(public_key) else {
            return false;
        };
        let Some(sig) = decode_array::<64>(signature) else {
            return false;
        };
        let Ok(verifying_key) = VerifyingKey::from_bytes(&key) else {
            return false;
        };
        verifying_key
            .verify(payload, &Signature::from_bytes(&sig))
            .is_ok()
    }

    pub async fn active_key(&self, organization_id: Uuid) -> IdentityResult<OrganizationKeyPair> {
        self.store
            .active(organization_id)
            .await?
            .ok_or(IdentityError::NoActiveKey(organization_id))
    }

    pub async fn list_keys(
        &self,
        organization_id: Uuid,
    ) -> IdentityResult<Vec<OrganizationKeyPair>> {
        self.store.list(organization_id).await
    }

    /// Sign with the organization's active key
    pub async fn sign_for_organization(
        &self,
        organization_id: Uuid,
        payload: &[u8],
    ) -> IdentityResult<SignedPayload> {
        let key = self.active_key(organization_id).await?;
        let audit = AuditLog::new("identity.sign", key.label()).for_organization(organization_id);

        match self.sign(payload, &key.encrypted_private_key) {
            Ok(signature) => {
                audit.log();
                Ok(SignedPayload {
                    key_version: key.key_version,
                    signature,
                })
            }
            Err(e) => {
                audit.failed(&e).log();
                Err(e)
            }
        }
    }

    /// Verify against the key version named in `signed`
    ///
    /// Rotated keys still verify; revoked keys never do.
    pub async fn verify_for_organization(
        &self,
        organization_id: Uuid,
        payload: &[u8],
        signed: &SignedPayload,
    ) -> IdentityResult<bool> {
        let key = self
            .store
            .by_version(organization_id, signed.key_version)
            .await?
            .ok_or(IdentityError::VersionNotFound {
                organization_id,
                version: signed.key_version,
            })?;

        if key.status == KeyStatus::Revoked {
            debug!(
                organization_id = %organization_id,
                key_version = key.key_version,
                "Refusing verification against revoked key"
            );
            return Ok(false);
        }

        Ok(Self::verify(payload, &signed.signature, &key.public_key))
    }
}

fn decode_array<const N: usize>(value: &str) -> Option<[u8; N]> {
    BASE64.decode(value).ok()?.try_into().ok()
}
