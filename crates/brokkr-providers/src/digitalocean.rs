//! DigitalOcean REST adapter
//!
//! Uses the v2 API with a bearer token:
//! - `POST /v2/account/keys`, `DELETE /v2/account/keys/{id}`
//! - `POST /v2/droplets`, `GET /v2/droplets/{id}`, `DELETE /v2/droplets/{id}`

use crate::error::ProviderError;
use crate::traits::{CloudProvider, CreateVmRequest, RegisteredKey, VmInfo};
use async_trait::async_trait;
use brokkr_core::types::NetworkConfig;
use brokkr_secrets::{sanitize_error, SecureString};
use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

const PROVIDER: &str = "digitalocean";

/// Environment variable holding the API token
pub const TOKEN_ENV_VAR: &str = "DIGITALOCEAN_TOKEN";

/// Error bodies longer than this are cut before being stored
const MAX_ERROR_BODY: usize = 2048;

/// DigitalOcean droplet provider
pub struct DigitalOceanProvider {
    client: reqwest::Client,
    api_url: String,
    token: SecureString,
}

impl DigitalOceanProvider {
    pub fn new(
        token: impl Into<SecureString>,
        network: &NetworkConfig,
    ) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .user_agent(&network.user_agent)
            .timeout(Duration::from_secs(network.http_timeout_secs))
            .build()
            .map_err(|e| ProviderError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_url: network.provider_api_url.trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    /// Read the token from `DIGITALOCEAN_TOKEN`
    pub fn from_env(network: &NetworkConfig) -> Result<Self, ProviderError> {
        let token = std::env::var(TOKEN_ENV_VAR).map_err(|_| {
            ProviderError::Config(format!(
                "{} is not set; export an API token with droplet and ssh_key scopes",
                TOKEN_ENV_VAR
            ))
        })?;
        Self::new(token, network)
    }

    /// Point at a different API base (tests, proxies)
    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into().trim_end_matches('/').to_string();
        self
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<reqwest::Response, ProviderError> {
        let url = format!("{}{}", self.api_url, path);
        debug!(%method, %url, "DigitalOcean request");

        let mut request = self
            .client
            .request(method, &url)
            .header(AUTHORIZATION, format!("Bearer {}", self.token.as_str()))
            .header(ACCEPT, "application/json");
        if let Some(body) = body {
            request = request.json(&body);
        }

        request.send().await.map_err(|e| ProviderError::Transport {
            provider: PROVIDER,
            message: sanitize_error(&e.to_string()),
        })
    }

    async fn expect_json<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ProviderError> {
        let response = Self::check(response).await?;
        response.json().await.map_err(|e| ProviderError::Decode {
            provider: PROVIDER,
            message: e.to_string(),
        })
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let mut body = sanitize_error(&response.text().await.unwrap_or_default());
        if body.len() > MAX_ERROR_BODY {
            let mut cut = MAX_ERROR_BODY;
            while !body.is_char_boundary(cut) {
                cut -= 1;
            }
            body.truncate(cut);
        }

        Err(ProviderError::Api {
            provider: PROVIDER,
            status: status.as_u16(),
            body,
        })
    }

    /// DELETE where 404 means someone already did it
    async fn delete(&self, path: &str, what: &str) -> Result<(), ProviderError> {
        let response = self.send(Method::DELETE, path, None).await?;
        if response.status() == StatusCode::NOT_FOUND {
            warn!(path, "{} already gone", what);
            return Ok(());
        }
        Self::check(response).await.map(|_| ())
    }
}

#[derive(Deserialize)]
struct SshKeyEnvelope {
    ssh_key: SshKey,
}

#[derive(Deserialize)]
struct SshKey {
    id: u64,
    #[serde(default)]
    fingerprint: String,
}

#[derive(Deserialize)]
struct DropletEnvelope {
    droplet: Droplet,
}

#[derive(Deserialize)]
struct Droplet {
    id: u64,
    name: String,
    status: String,
    #[serde(default)]
    networks: Networks,
}

#[derive(Deserialize, Default)]
struct Networks {
    #[serde(default)]
    v4: Vec<NetworkV4>,
}

#[derive(Deserialize)]
struct NetworkV4 {
    ip_address: String,
    #[serde(rename = "type")]
    kind: String,
}

impl From<Droplet> for VmInfo {
    fn from(droplet: Droplet) -> Self {
        let public_ipv4 = droplet
            .networks
            .v4
            .into_iter()
            .find(|n| n.kind == "public")
            .map(|n| n.ip_address);

        VmInfo {
            external_id: droplet.id.to_string(),
            name: droplet.name,
            status: droplet.status,
            public_ipv4,
        }
    }
}

/// Numeric ids go over the wire as numbers, anything else (fingerprints) as strings
fn key_reference(id: &str) -> Value {
    id.parse::<u64>().map(Value::from).unwrap_or_else(|_| Value::from(id))
}

#[async_trait]
impl CloudProvider for DigitalOceanProvider {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    async fn register_ssh_key(
        &self,
        name: &str,
        public_key: &str,
    ) -> Result<RegisteredKey, ProviderError> {
        let body = json!({ "name": name, "public_key": public_key });
        let response = self.send(Method::POST, "/v2/account/keys", Some(body)).await?;
        let envelope: SshKeyEnvelope = Self::expect_json(response).await?;

        Ok(RegisteredKey {
            external_id: envelope.ssh_key.id.to_string(),
            fingerprint: envelope.ssh_key.fingerprint,
        })
    }

    async fn create_vm(&self, request: &CreateVmRequest) -> Result<VmInfo, ProviderError> {
        let ssh_keys: Vec<Value> = request.ssh_key_ids.iter().map(|id| key_reference(id)).collect();
        let body = json!({
            "name": request.name,
            "region": request.region,
            "size": request.size,
            "image": request.image,
            "ssh_keys": ssh_keys,
            "user_data": request.user_data,
            "tags": request.tags,
            "monitoring": false,
            "ipv6": false,
        });

        let response = self.send(Method::POST, "/v2/droplets", Some(body)).await?;
        let envelope: DropletEnvelope = Self::expect_json(response).await?;
        Ok(envelope.droplet.into())
    }

    async fn get_vm(&self, external_id: &str) -> Result<VmInfo, ProviderError> {
        let path = format!("/v2/droplets/{}", external_id);
        let response = self.send(Method::GET, &path, None).await?;
        let envelope: DropletEnvelope = Self::expect_json(response).await?;
        Ok(envelope.droplet.into())
    }

    async fn delete_vm(&self, external_id: &str) -> Result<(), ProviderError> {
        self.delete(&format!("/v2/droplets/{}", external_id), "droplet")
            .await
    }

    async fn delete_ssh_key(&self, external_id: &str) -> Result<(), ProviderError> {
        self.delete(&format!("/v2/account/keys/{}", external_id), "ssh key")
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_droplet_public_ip_selection() {
        let droplet: Droplet = serde_json::from_value(json!({
            "id": 77,
            "name": "brokkr-x",
            "status": "active",
            "networks": {"v4": [
                {"ip_address": "10.0.0.5", "type": "private"},
                {"ip_address": "203.0.113.9", "type": "public"}
            ]}
        }))
        .unwrap();

        let vm: VmInfo = droplet.into();
        assert_eq!(vm.external_id, "77");
        assert_eq!(vm.public_ipv4.as_deref(), Some("203.0.113.9"));
        assert!(vm.is_ready());
    }

    #[test]
    fn test_new_droplet_without_networks() {
        let droplet: Droplet =
            serde_json::from_value(json!({"id": 1, "name": "n", "status": "new"})).unwrap();
        let vm: VmInfo = droplet.into();
        assert!(vm.public_ipv4.is_none());
        assert!(!vm.is_ready());
    }

    #[test]
    fn test_key_reference() {
        assert_eq!(key_reference("512190"), json!(512190));
        assert_eq!(key_reference("3b:16:bf"), json!("3b:16:bf"));
    }
}
