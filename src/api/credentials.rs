//! Credential management API endpoints.
//!
//! Lets a signed-in user add, list, relabel, deactivate and delete their own
//! platform API keys. Keys are only ever returned masked. The resolve endpoint
//! reports which credential an analytics request would use without exposing it.

use super::error::{from_store_error, AppError};
use crate::auth::{extract_user_id, optional_user_id};
use crate::credentials::{mask_key, CredentialStore, CredentialSummary, CredentialUpdate, Platform};
use crate::resolver::{CredentialResolver, CredentialSource};
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::{get, patch},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;


/// Shared application state for credential API
#[derive(Clone)]
pub struct CredentialAppState {
    pub store: Arc<CredentialStore>,
    pub resolver: CredentialResolver,
}

/// Request body for POST /api/credentials
#[derive(Deserialize)]
pub struct AddCredentialRequest {
    pub platform: Platform,
    pub key: String,
    #[serde(default)]
    pub label: Option<String>,
}

/// List credentials response
#[derive(Serialize)]
pub struct ListCredentialsResponse {
    pub credentials: Vec<CredentialSummary>,
}

/// Response for DELETE /api/credentials/:id
#[derive(Serialize)]
pub struct DeleteCredentialResponse {
    pub success: bool,
}

/// Query for GET /api/credentials/resolve
#[derive(Deserialize)]
pub struct ResolveQuery {
    pub platform: String,
    #[serde(default)]
    pub key_id: Option<Uuid>,
}

/// Which credential a request would use, masked
#[derive(Serialize, Debug, PartialEq)]
pub struct ResolvePreview {
    pub platform: Platform,
    pub source: CredentialSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_id: Option<Uuid>,
    pub masked_key: String,
    /// Set when the requested key was unavailable and the system key was used
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_from: Option<Uuid>,
}

/// Create credential API router
pub fn create_credential_router(state: CredentialAppState) -> Router {
    Router::new()
        .route("/api/credentials", get(list_credentials).post(add_credential))
        .route("/api/credentials/resolve", get(resolve_credential))
        .route(
            "/api/credentials/:id",
            patch(update_credential).delete(delete_credential),
        )
        .with_state(Arc::new(state))
}

/// GET /api/credentials - List the caller's keys, masked
async fn list_credentials(
    State(state): State<Arc<CredentialAppState>>,
    headers: HeaderMap,
) -> Result<Json<ListCredentialsResponse>, AppError> {
    let user_id = extract_user_id(&headers)?;

    debug!(user_id = %user_id, "Listing credentials");

    let credentials = state
        .store
        .list_by_owner(&user_id)
        .map_err(|e| from_store_error(e, "list credentials"))?;

    Ok(Json(ListCredentialsResponse { credentials }))
}

/// POST /api/credentials - Encrypt and store a new key
///
/// Key derivation blocks, so the store call waits for a KDF slot and runs on a
/// blocking thread.
async fn add_credential(
    State(state): State<Arc<CredentialAppState>>,
    headers: HeaderMap,
    Json(body): Json<AddCredentialRequest>,
) -> Result<(StatusCode, Json<CredentialSummary>), AppError> {
    let user_id = extract_user_id(&headers)?;

    debug!(
        user_id = %user_id,
        platform = %body.platform,
        "Storing credential"
    );

    let store = Arc::clone(&state.store);
    let owner_id = user_id.clone();
    let summary = state
        .store
        .cipher()
        .run_blocking(move || {
            store.add(&owner_id, body.platform, &body.key, body.label.as_deref())
        })
        .await
        .map_err(|e| from_store_error(e, "store credential"))?
        .map_err(|e| from_store_error(e, "store credential"))?;

    info!(
        user_id = %user_id,
        record_id = %summary.id,
        platform = %summary.platform,
        masked_key = %summary.masked_key,
        "Credential stored"
    );

    Ok((StatusCode::CREATED, Json(summary)))
}

/// PATCH /api/credentials/:id - Relabel or (de)activate a key
async fn update_credential(
    State(state): State<Arc<CredentialAppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(update): Json<CredentialUpdate>,
) -> Result<Json<CredentialSummary>, AppError> {
    let user_id = extract_user_id(&headers)?;

    let summary = state
        .store
        .update(&user_id, id, &update)
        .map_err(|e| from_store_error(e, "update credential"))?
        .ok_or_else(|| AppError::NotFound(format!("Credential '{}' not found", id)))?;

    info!(
        user_id = %user_id,
        record_id = %id,
        is_active = summary.is_active,
        "Credential updated"
    );

    Ok(Json(summary))
}

/// DELETE /api/credentials/:id - Remove a key permanently
async fn delete_credential(
    State(state): State<Arc<CredentialAppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<DeleteCredentialResponse>, AppError> {
    let user_id = extract_user_id(&headers)?;

    let deleted = state
        .store
        .delete(&user_id, id)
        .map_err(|e| from_store_error(e, "delete credential"))?;

    if !deleted {
        return Err(AppError::NotFound(format!(
            "Credential '{}' not found",
            id
        )));
    }

    info!(user_id = %user_id, record_id = %id, "Credential deleted");

    Ok(Json(DeleteCredentialResponse { success: true }))
}

/// GET /api/credentials/resolve - Preview which key a request would use
///
/// Anonymous callers may ask about the system key; selecting a stored key
/// requires an identity.
async fn resolve_credential(
    State(state): State<Arc<CredentialAppState>>,
    headers: HeaderMap,
    Query(query): Query<ResolveQuery>,
) -> Result<Json<ResolvePreview>, AppError> {
    let platform: Platform = query
        .platform
        .parse()
        .map_err(|e: crate::credentials::UnknownPlatform| AppError::BadRequest(e.to_string()))?;
    let user_id = optional_user_id(&headers)?;

    let resolved = state
        .resolver
        .resolve(platform, query.key_id, user_id.as_deref())
        .await?;

    Ok(Json(ResolvePreview {
        platform,
        source: resolved.source,
        record_id: resolved.record_id,
        masked_key: mask_key(resolved.plaintext()),
        fallback_from: resolved.fallback_from,
    }))
}
