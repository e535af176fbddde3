//! Request handlers for the operation surface.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Deserialize;
use serde_json::json;

use crate::audit::{hash_client_ip, AuditEvent, AuditResult};
use crate::coordinator::{AssetOperationRequest, Operation};
use crate::decoder::{DecodeFailure, ScanInput};
use crate::error::{EngineError, EngineResult};
use crate::http::server::AppState;
use crate::security::rate_limit::{Action, Decision};
use crate::security::session::Session;

const SESSION_HEADER: &str = "x-session-token";
const CSRF_HEADER: &str = "x-csrf-token";

/// Engine error wrapped for the wire: stable reason code, matching status,
/// no internal detail.
pub struct ApiError(EngineError);

impl<E: Into<EngineError>> From<E> for ApiError {
    fn from(e: E) -> Self {
        Self(e.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            EngineError::Decode(DecodeFailure::InvalidInput(_)) => StatusCode::BAD_REQUEST,
            EngineError::Decode(_) => StatusCode::UNPROCESSABLE_ENTITY,
            EngineError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            EngineError::Unauthenticated | EngineError::SessionExpired => StatusCode::UNAUTHORIZED,
            EngineError::CsrfMismatch => StatusCode::FORBIDDEN,
            EngineError::InvalidTransition { .. } | EngineError::RemoteConflict { .. } => {
                StatusCode::CONFLICT
            }
            EngineError::RemoteUnavailable { retryable: true, .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            EngineError::RemoteUnavailable { retryable: false, .. } => StatusCode::BAD_GATEWAY,
            EngineError::Validation(_) => StatusCode::BAD_REQUEST,
            EngineError::NotFound(_) => StatusCode::NOT_FOUND,
        };

        let mut body = json!({
            "success": false,
            "error": self.0.reason_code(),
        });
        if let EngineError::RateLimited { retry_after } = &self.0 {
            body["retry_after_secs"] = json!(retry_after.as_secs());
        }
        tracing::debug!(code = self.0.reason_code(), "Request denied");
        (status, Json(body)).into_response()
    }
}

fn client_ip_hash(state: &AppState, addr: &SocketAddr) -> Option<String> {
    let config = state.config.load();
    Some(hash_client_ip(addr.ip(), &config.security.ip_hash_salt))
}

/// Resolve the caller's session from headers. State-changing endpoints pass
/// `require_csrf` so the CSRF token is checked against the session's
/// current one.
fn authenticated_session(
    state: &AppState,
    headers: &HeaderMap,
    require_csrf: bool,
) -> EngineResult<Session> {
    let session_id = headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(EngineError::Unauthenticated)?;

    let csrf = if require_csrf {
        Some(
            headers
                .get(CSRF_HEADER)
                .and_then(|v| v.to_str().ok())
                .ok_or(EngineError::CsrfMismatch)?,
        )
    } else {
        None
    };

    state.sessions.validate(session_id, csrf)
}

fn admit(state: &AppState, identity: &str, action: Action) -> EngineResult<()> {
    match state.limiter.admit(identity, action) {
        Decision::Allow => Ok(()),
        Decision::Deny { retry_after } => Err(EngineError::RateLimited { retry_after }),
    }
}

pub async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

#[derive(Deserialize)]
pub struct SignInRequest {
    credential: String,
}

pub async fn sign_in(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(request): Json<SignInRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    // Pre-auth actions are limited per client address.
    admit(&state, &format!("ip:{}", addr.ip()), Action::SignIn)?;

    let ip_hash = client_ip_hash(&state, &addr);
    let session = state.sessions.authenticate(&request.credential, ip_hash).await?;

    Ok(Json(json!({
        "success": true,
        "session_token": session.id,
        "csrf_token": session.csrf_token,
        "user": {
            "id": session.subject_id,
            "name": session.display_name,
            "elevated": session.elevated,
        },
    })))
}

pub async fn logout(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    let session = authenticated_session(&state, &headers, true)?;
    state.sessions.revoke(&session.id);
    state.audit.record(
        AuditEvent::new("auth.logout", AuditResult::Success)
            .actor(session.subject_id)
            .client_ip_hash(client_ip_hash(&state, &addr)),
    );
    Ok(Json(json!({ "success": true })))
}

#[derive(Deserialize)]
pub struct ScanRequest {
    /// Base64 image payload, with or without a `data:image/...;base64,`
    /// prefix.
    image: Option<String>,
    /// Hardware-scanner keystroke payload.
    text: Option<String>,
}

/// Decode a scan and resolve it against the inventory in one round trip.
pub async fn scan(
    State(state): State<AppState>,
    ConnectInfo(_addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(request): Json<ScanRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let session = authenticated_session(&state, &headers, true)?;
    admit(&state, &format!("user:{}", session.subject_id), Action::Scan)?;

    let input = match (request.image, request.text) {
        (Some(image), _) => {
            let encoded = match image.rsplit_once(',') {
                Some((prefix, data)) if prefix.starts_with("data:") => data.to_string(),
                _ => image,
            };
            let bytes = BASE64.decode(encoded.trim()).map_err(|_| {
                EngineError::Decode(DecodeFailure::InvalidInput("invalid base64 payload".into()))
            })?;
            ScanInput::Image(bytes)
        }
        (None, Some(text)) => ScanInput::Text(text),
        (None, None) => {
            return Err(EngineError::Validation("scan requires image or text".into()).into())
        }
    };

    // Decoding is CPU-bound; keep it off the async workers.
    let decoder = state.decoder.clone();
    let code = tokio::task::spawn_blocking(move || decoder.decode(input))
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Decode task failed");
            EngineError::RemoteUnavailable {
                retryable: false,
                detail: "internal task failure".into(),
            }
        })??;

    // Scan-and-resolve: surface what the inventory knows about the code.
    let asset = match state.inventory.get_asset(&code.value).await {
        Ok(asset) => Some(asset),
        Err(e) if matches!(e, crate::inventory::InventoryError::AssetNotFound(_)) => None,
        Err(e) => return Err(ApiError::from(EngineError::from(e))),
    };

    Ok(Json(json!({
        "success": true,
        "code": code,
        "asset": asset,
    })))
}

pub async fn my_assets(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    let session = authenticated_session(&state, &headers, false)?;
    admit(&state, &format!("user:{}", session.subject_id), Action::Lookup)?;

    let assets = state.inventory.assets_for_holder(session.subject_id).await?;
    Ok(Json(json!({ "success": true, "assets": assets })))
}

pub async fn asset_info(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(tag): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let session = authenticated_session(&state, &headers, false)?;
    admit(&state, &format!("user:{}", session.subject_id), Action::Lookup)?;

    let config = state.config.load();
    let tag = crate::security::validate::validate_code(&tag, config.decoder.max_code_len)?;
    let asset = state.inventory.get_asset(&tag).await?;
    Ok(Json(json!({ "success": true, "asset": asset })))
}

/// Unauthenticated lookup for the kiosk attract screen. Tighter limit,
/// keyed by client address.
pub async fn public_asset_info(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Path(tag): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    admit(&state, &format!("ip:{}", addr.ip()), Action::Lookup)?;

    let config = state.config.load();
    let tag = crate::security::validate::validate_code(&tag, config.decoder.max_code_len)?;
    let asset = state.inventory.get_asset(&tag).await?;
    // Public callers get the status, not the holder.
    Ok(Json(json!({
        "success": true,
        "asset": {
            "asset_tag": asset.asset_tag,
            "name": asset.name,
            "status": asset.status,
        },
    })))
}

#[derive(Deserialize)]
pub struct OperationBody {
    asset_tag: String,
    target_user_id: Option<u64>,
    note: Option<String>,
}

async fn run_operation(
    state: AppState,
    addr: SocketAddr,
    headers: HeaderMap,
    operation: Operation,
    body: OperationBody,
) -> Result<Json<serde_json::Value>, ApiError> {
    let session = authenticated_session(&state, &headers, true)?;
    let receipt = state
        .coordinator
        .execute(
            &session,
            AssetOperationRequest {
                operation,
                asset_tag: body.asset_tag,
                target_subject_id: body.target_user_id,
                note: body.note,
            },
            client_ip_hash(&state, &addr),
        )
        .await?;

    Ok(Json(json!({
        "success": true,
        "message": receipt.message,
        "receipt": receipt,
    })))
}

pub async fn checkout(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(body): Json<OperationBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    run_operation(state, addr, headers, Operation::Checkout, body).await
}

pub async fn checkin(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(body): Json<OperationBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    run_operation(state, addr, headers, Operation::Checkin, body).await
}

pub async fn transfer(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(body): Json<OperationBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    run_operation(state, addr, headers, Operation::Transfer, body).await
}
