//! Shared helpers for provider integration tests

#![allow(dead_code)]

use brokkr_core::types::NetworkConfig;
use brokkr_providers::DigitalOceanProvider;
use serde_json::{json, Value};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const TEST_TOKEN: &str = "dop_v1_test_token";

/// Provider pointed at the mock server
pub fn provider(server: &MockServer) -> DigitalOceanProvider {
    DigitalOceanProvider::new(TEST_TOKEN, &NetworkConfig::default())
        .unwrap()
        .with_api_url(server.uri())
}

pub fn droplet_json(id: u64, status: &str, public_ip: Option<&str>) -> Value {
    let v4: Vec<Value> = public_ip
        .map(|ip| vec![json!({"ip_address": ip, "type": "public", "netmask": "255.255.240.0"})])
        .unwrap_or_default();
    json!({
        "droplet": {
            "id": id,
            "name": format!("brokkr-{}", id),
            "status": status,
            "networks": {"v4": v4, "v6": []}
        }
    })
}

/// `POST /v2/account/keys` answering with the given id
pub async fn mock_register_key(server: &MockServer, id: u64) {
    Mock::given(method("POST"))
        .and(path("/v2/account/keys"))
        .and(header("authorization", format!("Bearer {}", TEST_TOKEN).as_str()))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "ssh_key": {
                "id": id,
                "fingerprint": "3b:16:bf:e4:8b:00:8b:b8:59:8c:a9:d3:f0:19:45:fa",
                "public_key": "ssh-ed25519 AAAA test",
                "name": "brokkr"
            }
        })))
        .mount(server)
        .await;
}

/// `GET /v2/droplets/{id}` answering with a fixed status
pub async fn mock_get_droplet(server: &MockServer, id: u64, status: &str, public_ip: Option<&str>) {
    Mock::given(method("GET"))
        .and(path(format!("/v2/droplets/{}", id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(droplet_json(id, status, public_ip)))
        .mount(server)
        .await;
}

/// `DELETE` on `route` answering with `status`
pub async fn mock_delete(server: &MockServer, route: &str, status: u16) {
    Mock::given(method("DELETE"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(status))
        .mount(server)
        .await;
}
