//! HTTP client for the remote inventory API.
//!
//! Wire shapes follow the Snipe-IT REST API: asset lookups by tag, user
//! search by credential, and checkout/checkin transition endpoints. The
//! remote reports logical rejections as HTTP 200 with a `status: "error"`
//! envelope, so success needs both a 2xx and a clean payload.
//!
//! Connect and total timeouts are configured independently and must stay
//! below the client-facing request timeout (enforced by config validation),
//! so a hung remote degrades to a reported error.

use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::config::schema::InventoryConfig;
use crate::inventory::types::{
    AssetState, AssetStatus, InventoryApi, InventoryError, RemoteIdentity,
};
use crate::observability::metrics;

/// Paginated list envelope used by the remote for search endpoints.
#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
struct Rows<T> {
    #[serde(default)]
    rows: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct WireStatusLabel {
    #[serde(default)]
    status_meta: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireAssignee {
    id: u64,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireAsset {
    id: u64,
    asset_tag: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    status_label: Option<WireStatusLabel>,
    #[serde(default)]
    assigned_to: Option<WireAssignee>,
}

#[derive(Debug, Deserialize)]
struct WireUser {
    id: u64,
    name: String,
    #[serde(default)]
    vip: serde_json::Value,
}

impl WireUser {
    // The remote reports vip as true/false or 0/1 depending on version.
    fn is_vip(&self) -> bool {
        match &self.vip {
            serde_json::Value::Bool(b) => *b,
            serde_json::Value::Number(n) => n.as_i64() == Some(1),
            _ => false,
        }
    }
}

fn map_asset(wire: WireAsset) -> AssetState {
    let status_meta = wire
        .status_label
        .as_ref()
        .and_then(|s| s.status_meta.as_deref());
    let status = if wire.assigned_to.is_some() || status_meta == Some("deployed") {
        AssetStatus::CheckedOut
    } else if status_meta == Some("deployable") {
        AssetStatus::Available
    } else {
        AssetStatus::Unknown
    };

    AssetState {
        id: wire.id,
        asset_tag: wire.asset_tag,
        name: wire.name,
        status,
        holder_id: wire.assigned_to.as_ref().map(|a| a.id),
        holder_name: wire.assigned_to.and_then(|a| a.name),
    }
}

/// Reqwest-backed inventory client.
#[derive(Clone)]
pub struct InventoryClient {
    http: reqwest::Client,
    base_url: Url,
    api_token: String,
    request_timeout: Duration,
}

impl InventoryClient {
    pub fn new(config: &InventoryConfig) -> Result<Self, InventoryError> {
        let mut base_url = Url::parse(&config.base_url)
            .map_err(|e| InventoryError::Configuration(format!("invalid base URL: {}", e)))?;
        // Url::join treats a path without a trailing slash as a file and
        // would drop the last segment.
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| InventoryError::Configuration(e.to_string()))?;

        Ok(Self {
            http,
            base_url,
            api_token: config.api_token.clone(),
            request_timeout: Duration::from_millis(config.request_timeout_ms),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, InventoryError> {
        self.base_url
            .join(path)
            .map_err(|e| InventoryError::Configuration(format!("bad endpoint {}: {}", path, e)))
    }

    fn map_transport_error(&self, e: reqwest::Error) -> InventoryError {
        if e.is_timeout() {
            InventoryError::Timeout(self.request_timeout)
        } else {
            InventoryError::Unavailable(e.to_string())
        }
    }

    /// Classify an HTTP-level failure status. 404 is handled per call site
    /// since its meaning depends on the endpoint.
    async fn fail_from_status(resp: reqwest::Response) -> InventoryError {
        let status = resp.status();
        let detail = resp.text().await.unwrap_or_default();
        let detail = detail.chars().take(200).collect::<String>();
        if status.as_u16() == 429 || status.is_server_error() {
            InventoryError::Unavailable(format!("status {}", status.as_u16()))
        } else if status.as_u16() == 409 || status.as_u16() == 422 {
            InventoryError::Conflict(detail)
        } else {
            InventoryError::Api {
                status: status.as_u16(),
                detail,
            }
        }
    }

    async fn get_json(&self, path: &str, query: &[(&str, &str)]) -> Result<serde_json::Value, InventoryError> {
        let url = self.endpoint(path)?;
        let resp = self
            .http
            .get(url)
            .query(query)
            .bearer_auth(&self.api_token)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        if !resp.status().is_success() {
            return Err(Self::fail_from_status(resp).await);
        }
        resp.json::<serde_json::Value>()
            .await
            .map_err(|e| InventoryError::Api {
                status: 200,
                detail: format!("malformed payload: {}", e),
            })
    }

    /// POST a transition and interpret both HTTP and logical envelopes.
    async fn post_transition(
        &self,
        path: &str,
        payload: serde_json::Value,
    ) -> Result<(), InventoryError> {
        let url = self.endpoint(path)?;
        let resp = self
            .http
            .post(url)
            .json(&payload)
            .bearer_auth(&self.api_token)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        if !resp.status().is_success() {
            return Err(Self::fail_from_status(resp).await);
        }

        let body: serde_json::Value = resp.json().await.map_err(|e| InventoryError::Api {
            status: 200,
            detail: format!("malformed payload: {}", e),
        })?;
        if body.get("status").and_then(|s| s.as_str()) == Some("error") {
            let messages = body
                .get("messages")
                .map(|m| m.to_string())
                .unwrap_or_else(|| "rejected".to_string());
            return Err(InventoryError::Conflict(messages));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl InventoryApi for InventoryClient {
    async fn get_identity(&self, credential: &str) -> Result<RemoteIdentity, InventoryError> {
        let result = self
            .get_json("users", &[("search", credential), ("limit", "1")])
            .await;
        metrics::record_remote_call("get_identity", result.is_ok());
        let body = result?;

        let rows: Rows<WireUser> =
            serde_json::from_value(body).map_err(|e| InventoryError::Api {
                status: 200,
                detail: format!("malformed user rows: {}", e),
            })?;
        let user = rows.rows.into_iter().next().ok_or(InventoryError::IdentityNotFound)?;
        Ok(RemoteIdentity {
            subject_id: user.id,
            elevated: user.is_vip(),
            name: user.name,
        })
    }

    async fn get_asset(&self, tag: &str) -> Result<AssetState, InventoryError> {
        let url = self.endpoint(&format!("hardware/bytag/{}", tag))?;
        let resp = self
            .http
            .get(url)
            .bearer_auth(&self.api_token)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| {
                metrics::record_remote_call("get_asset", false);
                self.map_transport_error(e)
            })?;

        if resp.status().as_u16() == 404 {
            metrics::record_remote_call("get_asset", true);
            return Err(InventoryError::AssetNotFound(tag.to_string()));
        }
        if !resp.status().is_success() {
            metrics::record_remote_call("get_asset", false);
            return Err(Self::fail_from_status(resp).await);
        }

        let body: serde_json::Value = resp.json().await.map_err(|e| InventoryError::Api {
            status: 200,
            detail: format!("malformed payload: {}", e),
        })?;
        metrics::record_remote_call("get_asset", true);

        // Some remote versions report a missing tag as a 200 error envelope.
        if body.get("status").and_then(|s| s.as_str()) == Some("error") {
            return Err(InventoryError::AssetNotFound(tag.to_string()));
        }

        let wire: WireAsset = serde_json::from_value(body).map_err(|e| InventoryError::Api {
            status: 200,
            detail: format!("malformed asset record: {}", e),
        })?;
        Ok(map_asset(wire))
    }

    async fn checkout(
        &self,
        asset_id: u64,
        subject_id: u64,
        note: &str,
    ) -> Result<(), InventoryError> {
        let payload = serde_json::json!({
            "status_id": 2,
            "checkout_to_type": "user",
            "assigned_user": subject_id,
            "note": note,
        });
        let result = self
            .post_transition(&format!("hardware/{}/checkout", asset_id), payload)
            .await;
        metrics::record_remote_call("checkout", result.is_ok());
        result
    }

    async fn checkin(&self, asset_id: u64, note: &str) -> Result<(), InventoryError> {
        let payload = serde_json::json!({ "note": note });
        let result = self
            .post_transition(&format!("hardware/{}/checkin", asset_id), payload)
            .await;
        metrics::record_remote_call("checkin", result.is_ok());
        result
    }

    async fn transfer(
        &self,
        asset_id: u64,
        from_subject: u64,
        to_subject: u64,
        note: &str,
    ) -> Result<(), InventoryError> {
        // No first-class transfer on the remote: release, then reassign.
        // If the reassignment is rejected, put the asset back with the
        // original holder so the pair reads all-or-nothing to callers.
        self.checkin(asset_id, note).await?;
        match self.checkout(asset_id, to_subject, note).await {
            Ok(()) => {
                metrics::record_remote_call("transfer", true);
                Ok(())
            }
            Err(e) => {
                metrics::record_remote_call("transfer", false);
                tracing::error!(
                    asset_id,
                    to_subject,
                    error = %e,
                    "Transfer reassignment rejected, rolling back to original holder"
                );
                if let Err(rollback) = self.checkout(asset_id, from_subject, note).await {
                    tracing::error!(
                        asset_id,
                        from_subject,
                        error = %rollback,
                        "Transfer rollback failed; asset left available"
                    );
                }
                Err(e)
            }
        }
    }

    async fn assets_for_holder(&self, subject_id: u64) -> Result<Vec<AssetState>, InventoryError> {
        let result = self
            .get_json(&format!("users/{}/assets", subject_id), &[])
            .await;
        metrics::record_remote_call("assets_for_holder", result.is_ok());
        let body = result?;

        let rows: Rows<WireAsset> =
            serde_json::from_value(body).map_err(|e| InventoryError::Api {
                status: 200,
                detail: format!("malformed asset rows: {}", e),
            })?;
        Ok(rows.rows.into_iter().map(map_asset).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::InventoryConfig;

    fn wire_asset(json: serde_json::Value) -> AssetState {
        map_asset(serde_json::from_value(json).unwrap())
    }

    #[test]
    fn test_assigned_asset_maps_to_checked_out() {
        let asset = wire_asset(serde_json::json!({
            "id": 31,
            "asset_tag": "KIOSK-0031",
            "name": "iPad 11",
            "status_label": { "status_meta": "deployed" },
            "assigned_to": { "id": 7, "name": "Sam Doe" }
        }));
        assert_eq!(asset.status, AssetStatus::CheckedOut);
        assert_eq!(asset.holder_id, Some(7));
        assert!(asset.is_held_by(7));
    }

    #[test]
    fn test_deployable_asset_maps_to_available() {
        let asset = wire_asset(serde_json::json!({
            "id": 31,
            "asset_tag": "KIOSK-0031",
            "status_label": { "status_meta": "deployable" }
        }));
        assert_eq!(asset.status, AssetStatus::Available);
        assert_eq!(asset.holder_id, None);
    }

    #[test]
    fn test_unmapped_status_is_unknown() {
        let asset = wire_asset(serde_json::json!({
            "id": 31,
            "asset_tag": "KIOSK-0031",
            "status_label": { "status_meta": "archived" }
        }));
        assert_eq!(asset.status, AssetStatus::Unknown);
    }

    #[test]
    fn test_assignment_wins_over_status_meta() {
        // Seen in the wild: still "deployable" but already assigned.
        let asset = wire_asset(serde_json::json!({
            "id": 31,
            "asset_tag": "KIOSK-0031",
            "status_label": { "status_meta": "deployable" },
            "assigned_to": { "id": 9 }
        }));
        assert_eq!(asset.status, AssetStatus::CheckedOut);
        assert_eq!(asset.holder_id, Some(9));
    }

    #[test]
    fn test_base_url_gets_trailing_slash() {
        let mut config = InventoryConfig::default();
        config.base_url = "https://inventory.example.edu/api/v1".into();
        let client = InventoryClient::new(&config).unwrap();
        let url = client.endpoint("hardware/bytag/A1").unwrap();
        assert_eq!(
            url.as_str(),
            "https://inventory.example.edu/api/v1/hardware/bytag/A1"
        );
    }

    #[test]
    fn test_vip_accepts_bool_and_int() {
        let user: WireUser =
            serde_json::from_value(serde_json::json!({ "id": 1, "name": "a", "vip": true }))
                .unwrap();
        assert!(user.is_vip());
        let user: WireUser =
            serde_json::from_value(serde_json::json!({ "id": 1, "name": "a", "vip": 1 })).unwrap();
        assert!(user.is_vip());
        let user: WireUser =
            serde_json::from_value(serde_json::json!({ "id": 1, "name": "a" })).unwrap();
        assert!(!user.is_vip());
    }
}
