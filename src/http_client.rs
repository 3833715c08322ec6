use anyhow::{Context, Result};
use reqwest::header::{HeaderValue, AUTHORIZATION};
use reqwest::{Client, Request, Response};
use std::sync::Arc;
use std::time::Duration;

use crate::auth::AuthManager;
use crate::error::ApiError;

/// Authenticated HTTP client for the Fatture in Cloud API.
///
/// Wraps outbound calls with bearer-token handling: a stale token is
/// refreshed before the call, and a 401 answer triggers exactly one
/// refresh followed by one retry. The retry's outcome is final; a
/// provider that keeps answering 401 can never cause a refresh loop.
pub struct FicHttpClient {
    /// Shared HTTP client with connection pooling
    client: Client,

    /// Credential lifecycle manager
    auth: Arc<AuthManager>,

    /// Provider API base URL, e.g. https://api-v2.fattureincloud.it
    api_base: String,
}

impl FicHttpClient {
    pub fn new(
        auth: Arc<AuthManager>,
        api_base: impl Into<String>,
        max_connections: usize,
        connect_timeout: u64,
        request_timeout: u64,
    ) -> Result<Self> {
        let client = Client::builder()
            .pool_max_idle_per_host(max_connections)
            .connect_timeout(Duration::from_secs(connect_timeout))
            .timeout(Duration::from_secs(request_timeout))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            auth,
            api_base: api_base.into(),
        })
    }

    /// GET a provider path ("/c/{company}/info/vat_types", ...)
    pub async fn get(&self, path: &str) -> Result<Response, ApiError> {
        let request = self
            .client
            .get(format!("{}{}", self.api_base, path))
            .header("Accept", "application/json")
            .build()
            .map_err(|e| ApiError::Internal(e.into()))?;
        self.execute(request).await
    }

    /// POST a JSON body to a provider path
    pub async fn post_json<T: serde::Serialize>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<Response, ApiError> {
        let request = self
            .client
            .post(format!("{}{}", self.api_base, path))
            .header("Accept", "application/json")
            .json(body)
            .build()
            .map_err(|e| ApiError::Internal(e.into()))?;
        self.execute(request).await
    }

    /// Execute a request with bearer auth and the single-retry rule.
    ///
    /// At most two provider requests and at most one refresh are issued
    /// per logical call:
    /// 1. Obtain a token; a stale one is refreshed proactively first.
    /// 2. Send. 2xx is terminal success; non-401 errors are terminal.
    /// 3. On 401 with the refresh budget unspent, refresh and reissue
    ///    the original request once. Whatever comes back is final.
    pub async fn execute(&self, mut request: Request) -> Result<Response, ApiError> {
        let access = self.auth.access_token().await?;

        // Clone up front; retry is impossible for a non-cloneable body
        let retry_request = request.try_clone();

        let method = request.method().clone();
        let url = request.url().clone();
        tracing::debug!(method = %method, url = %url, "Sending provider request");

        set_bearer(&mut request, &access.token)?;
        let response = self.send(request).await?;
        let status = response.status();

        if status.is_success() {
            tracing::debug!(status = %status, "Provider request successful");
            return Ok(response);
        }

        if status.as_u16() == 401 && !access.refreshed {
            tracing::warn!(url = %url, "Received 401, refreshing token and retrying once...");

            // Refresh failure is terminal for this call
            let fresh = self.auth.refresh_after(&access.token).await?;

            let mut retry = retry_request.ok_or_else(|| {
                ApiError::Internal(anyhow::anyhow!("Request body is not cloneable"))
            })?;
            set_bearer(&mut retry, &fresh.access_token)?;

            let response = self.send(retry).await?;
            let status = response.status();
            if status.is_success() {
                tracing::debug!(status = %status, "Retry after refresh successful");
                return Ok(response);
            }

            // No second refresh: a 401 here means the provider rejects
            // even freshly issued tokens
            let body = response.text().await.unwrap_or_default();
            tracing::error!(
                status = status.as_u16(),
                url = %url,
                response_body = %body,
                "Retry after refresh failed"
            );
            return Err(ApiError::Provider {
                status: status.as_u16(),
                body,
            });
        }

        // Non-auth failure (or 401 right after a proactive refresh):
        // surfaced verbatim without a refresh attempt
        let body = response.text().await.unwrap_or_default();
        tracing::error!(
            status = status.as_u16(),
            url = %url,
            response_body = %body,
            "Provider request failed"
        );
        Err(ApiError::Provider {
            status: status.as_u16(),
            body,
        })
    }

    async fn send(&self, request: Request) -> Result<Response, ApiError> {
        let url = request.url().clone();
        self.client.execute(request).await.map_err(|e| {
            if e.is_timeout() {
                tracing::warn!(url = %url, "Provider request timed out");
                return ApiError::Timeout(format!("provider call timed out: {}", e));
            }

            let error_kind = if e.is_connect() {
                "connection_failed"
            } else if e.is_request() {
                "request_error"
            } else if e.is_body() {
                "body_error"
            } else if e.is_decode() {
                "decode_error"
            } else {
                "unknown"
            };

            tracing::error!(
                error_kind = error_kind,
                error = %e,
                url = %url,
                "Provider request error"
            );
            ApiError::Internal(anyhow::anyhow!(
                "HTTP request failed: {} (kind: {})",
                e,
                error_kind
            ))
        })
    }
}

fn set_bearer(request: &mut Request, token: &str) -> Result<(), ApiError> {
    let value = HeaderValue::from_str(&format!("Bearer {}", token))
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("invalid bearer token: {}", e)))?;
    request.headers_mut().insert(AUTHORIZATION, value);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::store::SqliteStore;
    use crate::auth::types::Credential;
    use crate::auth::{OAuthConfig, TokenStore};
    use chrono::{Duration as ChronoDuration, Utc};

    async fn client_with_credential(
        dir: &tempfile::TempDir,
        base_url: String,
        expires_in_secs: i64,
        request_timeout_secs: u64,
    ) -> FicHttpClient {
        let store = TokenStore::Sqlite(SqliteStore::new(dir.path().join("tokens.db")));
        let now = Utc::now();
        store
            .put(&Credential {
                access_token: "A1".to_string(),
                refresh_token: "R1".to_string(),
                expires_at: Some(now + ChronoDuration::seconds(expires_in_secs)),
                issued_at: now,
            })
            .await
            .unwrap();

        let oauth = OAuthConfig {
            token_url: format!("{}/oauth/token", base_url),
            client_id: "client-id".to_string(),
            client_secret: "client-secret".to_string(),
            redirect_uri: "https://example.test/callback".to_string(),
            max_retries: 0,
            base_delay_ms: 10,
        };
        let auth = Arc::new(
            AuthManager::new(store, oauth, Duration::from_secs(10), 300).unwrap(),
        );
        FicHttpClient::new(auth, base_url, 20, 10, request_timeout_secs).unwrap()
    }

    /// Listener that accepts connections but never answers them
    async fn silent_server() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut open = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                open.push(socket);
            }
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_success_passes_through() {
        let mut server = mockito::Server::new_async().await;
        let resource = server
            .mock("GET", "/c/1/info/vat_types")
            .match_header("authorization", "Bearer A1")
            .with_status(200)
            .with_body(r#"{"data": []}"#)
            .expect(1)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let client = client_with_credential(&dir, server.url(), 3600, 10).await;

        let response = client.get("/c/1/info/vat_types").await.unwrap();
        assert_eq!(response.status().as_u16(), 200);
        resource.assert_async().await;
    }

    #[tokio::test]
    async fn test_unresponsive_provider_surfaces_timeout() {
        let base_url = silent_server().await;

        let dir = tempfile::tempdir().unwrap();
        let client = client_with_credential(&dir, base_url, 3600, 1).await;

        // The deadline is reported as a timeout, not a generic failure
        let result = client.get("/c/1/info/vat_types").await;
        assert!(matches!(result, Err(ApiError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_non_auth_error_is_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let token_endpoint = server
            .mock("POST", "/oauth/token")
            .expect(0)
            .create_async()
            .await;
        let resource = server
            .mock("GET", "/c/1/info/vat_types")
            .with_status(422)
            .with_body("unprocessable")
            .expect(1)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let client = client_with_credential(&dir, server.url(), 3600, 10).await;

        let result = client.get("/c/1/info/vat_types").await;
        match result {
            Err(ApiError::Provider { status, body }) => {
                assert_eq!(status, 422);
                assert_eq!(body, "unprocessable");
            }
            other => panic!("expected provider error, got {:?}", other.map(|_| ())),
        }
        resource.assert_async().await;
        token_endpoint.assert_async().await;
    }

    #[tokio::test]
    async fn test_401_triggers_one_refresh_and_retry() {
        let mut server = mockito::Server::new_async().await;
        let token_endpoint = server
            .mock("POST", "/oauth/token")
            .with_status(200)
            .with_body(r#"{"access_token": "A2", "refresh_token": "R2", "expires_in": 86400}"#)
            .expect(1)
            .create_async()
            .await;
        // The stale token is rejected, the refreshed one accepted
        let stale = server
            .mock("GET", "/c/1/info/vat_types")
            .match_header("authorization", "Bearer A1")
            .with_status(401)
            .expect(1)
            .create_async()
            .await;
        let fresh = server
            .mock("GET", "/c/1/info/vat_types")
            .match_header("authorization", "Bearer A2")
            .with_status(200)
            .with_body(r#"{"data": []}"#)
            .expect(1)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let client = client_with_credential(&dir, server.url(), 3600, 10).await;

        let response = client.get("/c/1/info/vat_types").await.unwrap();
        assert_eq!(response.status().as_u16(), 200);
        stale.assert_async().await;
        fresh.assert_async().await;
        token_endpoint.assert_async().await;
    }
}
