use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::auth::AuthManager;
use crate::config::Config;
use crate::error::ApiError;
use crate::http_client::FicHttpClient;
use crate::models::fic::{InvoiceCreated, InvoiceForm, IssuedDocumentPayload};

/// Application version from Cargo.toml
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub auth: Arc<AuthManager>,
    pub fic: Arc<FicHttpClient>,
}

/// Health check routes
pub fn health_routes() -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
}

/// Invoice and lookup routes backed by the provider API
pub fn api_routes(state: AppState) -> Router {
    Router::new()
        .route("/api/invoices", post(create_invoice_handler))
        .route("/api/vat-types", get(vat_types_handler))
        .with_state(state)
}

/// OAuth lifecycle routes
pub fn oauth_routes(state: AppState) -> Router {
    Router::new()
        .route("/oauth/authorize", post(oauth_authorize_handler))
        .route("/oauth/refresh", post(oauth_refresh_handler))
        .with_state(state)
}

/// GET / - Simple health check
async fn root_handler() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "message": "FIC Gateway is running",
        "version": VERSION
    }))
}

/// GET /health - Detailed health check
async fn health_handler() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339(),
        "version": VERSION
    }))
}

/// POST /api/invoices - Create an issued document
///
/// Marshals the submitted form into the provider payload and posts it
/// through the authenticated client; the token lifecycle (proactive
/// refresh, 401-refresh-retry) is handled underneath.
async fn create_invoice_handler(
    State(state): State<AppState>,
    Json(form): Json<InvoiceForm>,
) -> Result<Json<Value>, ApiError> {
    form.validate()?;

    tracing::info!(
        "Creating invoice: causale={}, importo={}",
        form.causale,
        form.importo
    );

    let payload = IssuedDocumentPayload::from_form(&form, Utc::now().date_naive());
    let path = format!("/c/{}/issued_documents", state.config.fic_company_id);

    let response = state.fic.post_json(&path, &payload).await?;
    let created: InvoiceCreated = response
        .json()
        .await
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("invalid provider response: {}", e)))?;

    tracing::info!("Invoice created: number={:?}", created.data.number);

    Ok(Json(json!({ "invoiceNumber": created.data.number })))
}

/// GET /api/vat-types - List the company's VAT types
///
/// Pass-through of the provider's response body.
async fn vat_types_handler(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let path = format!("/c/{}/info/vat_types", state.config.fic_company_id);

    let response = state.fic.get(&path).await?;
    let body: Value = response
        .json()
        .await
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("invalid provider response: {}", e)))?;

    Ok(Json(body))
}

#[derive(Debug, Deserialize)]
struct AuthorizeRequest {
    code: String,
    #[allow(dead_code)]
    state: Option<String>,
}

/// POST /oauth/authorize - Initial authorization-code exchange
///
/// Exchanges the code and persists the resulting credential. The
/// tokens themselves stay in the store and are never echoed back.
async fn oauth_authorize_handler(
    State(state): State<AppState>,
    Json(request): Json<AuthorizeRequest>,
) -> Result<Json<Value>, ApiError> {
    if request.code.trim().is_empty() {
        return Err(ApiError::Validation(
            "Authorization code is required".to_string(),
        ));
    }

    let credential = state.auth.authorize(request.code.trim()).await?;

    Ok(Json(json!({
        "message": "Authorization successful, tokens stored",
        "expiresAt": credential.expires_at.map(|t| t.to_rfc3339()),
        "issuedAt": credential.issued_at.to_rfc3339(),
    })))
}

/// POST /oauth/refresh - Manual refresh trigger
async fn oauth_refresh_handler(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let current = state.auth.current().await?.ok_or_else(|| {
        ApiError::NotConfigured(
            "OAuth tokens not configured. Please authorize the system first.".to_string(),
        )
    })?;

    let fresh = state.auth.refresh_after(&current.access_token).await?;

    Ok(Json(json!({
        "message": "Token refreshed and stored successfully",
        "expiresAt": fresh.expires_at.map(|t| t.to_rfc3339()),
    })))
}
