// Token refresh and authorization-code exchange

use chrono::Utc;
use reqwest::Client;
use std::time::Duration;

use super::types::{CodeExchangeRequest, Credential, TokenResponse};
use crate::error::{ApiError, RefreshError};

/// OAuth client settings for the provider token endpoint
#[derive(Debug, Clone)]
pub struct OAuthConfig {
    /// Full token endpoint URL, e.g. https://api-v2.fattureincloud.it/oauth/token
    pub token_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    /// Extra attempts after a transient refresh failure
    pub max_retries: u32,
    /// Base delay for exponential backoff between attempts
    pub base_delay_ms: u64,
}

/// Exchange a refresh token for a new credential pair.
///
/// Issues a single form-encoded POST with `grant_type=refresh_token`.
/// HTTP 400/401 means the refresh token itself is dead and must never
/// be retried; any other failure is reported as transient.
pub async fn refresh(
    client: &Client,
    config: &OAuthConfig,
    refresh_token: &str,
) -> Result<Credential, ApiError> {
    tracing::debug!("Refreshing access token...");

    let form = [
        ("grant_type", "refresh_token"),
        ("client_id", config.client_id.as_str()),
        ("client_secret", config.client_secret.as_str()),
        ("refresh_token", refresh_token),
    ];

    let response = client
        .post(&config.token_url)
        .form(&form)
        .send()
        .await
        .map_err(classify_transport_error)?;

    parse_token_response(response).await
}

/// Refresh with bounded retry for transient failures.
///
/// `InvalidGrant` and timeouts break out immediately; only network
/// failures are retried, with exponential backoff.
pub async fn refresh_with_retry(
    client: &Client,
    config: &OAuthConfig,
    refresh_token: &str,
) -> Result<Credential, ApiError> {
    let mut attempt = 0;
    loop {
        match refresh(client, config, refresh_token).await {
            Ok(credential) => return Ok(credential),
            Err(ApiError::Refresh(RefreshError::Network(reason))) if attempt < config.max_retries => {
                let delay = backoff_delay(config.base_delay_ms, attempt);
                tracing::warn!(
                    "Token refresh failed ({}), retrying after {}ms (attempt {}/{})",
                    reason,
                    delay,
                    attempt + 1,
                    config.max_retries
                );
                tokio::time::sleep(Duration::from_millis(delay)).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Exchange an authorization code for the initial credential.
/// The provider accepts a JSON body for this grant.
pub async fn exchange_code(
    client: &Client,
    config: &OAuthConfig,
    code: &str,
) -> Result<Credential, ApiError> {
    tracing::info!("Exchanging authorization code for tokens...");

    let request = CodeExchangeRequest {
        grant_type: "authorization_code",
        client_id: config.client_id.clone(),
        client_secret: config.client_secret.clone(),
        redirect_uri: config.redirect_uri.clone(),
        code: code.to_string(),
    };

    let response = client
        .post(&config.token_url)
        .json(&request)
        .send()
        .await
        .map_err(classify_transport_error)?;

    parse_token_response(response).await
}

async fn parse_token_response(response: reqwest::Response) -> Result<Credential, ApiError> {
    let status = response.status();

    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        // 400/401 from the token endpoint: the grant itself is invalid,
        // expired, or already consumed by a concurrent refresh
        if status.as_u16() == 400 || status.as_u16() == 401 {
            tracing::error!("Refresh token rejected: {} - {}", status, body);
            return Err(RefreshError::InvalidGrant {
                status: status.as_u16(),
                body,
            }
            .into());
        }
        tracing::warn!("Token endpoint transient failure: {} - {}", status, body);
        return Err(RefreshError::Network(format!("{} - {}", status, body)).into());
    }

    let data: TokenResponse = response
        .json()
        .await
        .map_err(|e| RefreshError::Network(format!("invalid token response: {}", e)))?;

    if data.access_token.is_empty() {
        return Err(RefreshError::Network("token response has no access_token".to_string()).into());
    }

    let credential = Credential::from_token_response(data, Utc::now());
    if let Some(expires_at) = credential.expires_at {
        tracing::info!("Token refreshed, expires: {}", expires_at.to_rfc3339());
    }
    Ok(credential)
}

/// Timeouts get their own error so callers can tell a slow provider
/// from an unreachable one
fn classify_transport_error(e: reqwest::Error) -> ApiError {
    if e.is_timeout() {
        ApiError::Timeout(format!("token endpoint call timed out: {}", e))
    } else {
        RefreshError::Network(e.to_string()).into()
    }
}

/// Exponential backoff with jitter to avoid thundering herd
fn backoff_delay(base_delay_ms: u64, attempt: u32) -> u64 {
    let delay = base_delay_ms * 2_u64.pow(attempt);
    let jitter = (delay as f64 * 0.1 * jitter_fraction()) as u64;
    delay + jitter
}

fn jitter_fraction() -> f64 {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hash, Hasher};

    let state = RandomState::new();
    let mut hasher = state.build_hasher();
    std::time::SystemTime::now().hash(&mut hasher);
    (hasher.finish() % 1000) as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(token_url: String) -> OAuthConfig {
        OAuthConfig {
            token_url,
            client_id: "client-id".to_string(),
            client_secret: "client-secret".to_string(),
            redirect_uri: "https://example.test/callback".to_string(),
            max_retries: 2,
            base_delay_ms: 10,
        }
    }

    #[test]
    fn test_backoff_delay_doubles() {
        let delay0 = backoff_delay(1000, 0);
        let delay1 = backoff_delay(1000, 1);
        let delay2 = backoff_delay(1000, 2);

        assert!((1000..=1100).contains(&delay0));
        assert!((2000..=2200).contains(&delay1));
        assert!((4000..=4400).contains(&delay2));
    }

    #[tokio::test]
    async fn test_refresh_success_builds_credential() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/oauth/token")
            .match_header("content-type", "application/x-www-form-urlencoded")
            .with_status(200)
            .with_body(
                r#"{"access_token": "A2", "refresh_token": "R2", "expires_in": 86400, "token_type": "bearer"}"#,
            )
            .expect(1)
            .create_async()
            .await;

        let config = test_config(format!("{}/oauth/token", server.url()));
        let credential = refresh(&Client::new(), &config, "R1").await.unwrap();

        assert_eq!(credential.access_token, "A2");
        assert_eq!(credential.refresh_token, "R2");
        assert!(credential.expires_at.unwrap() > Utc::now());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_refresh_rejects_dead_token() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/oauth/token")
            .with_status(400)
            .with_body(r#"{"error": "invalid_grant"}"#)
            .expect(1)
            .create_async()
            .await;

        let config = test_config(format!("{}/oauth/token", server.url()));
        let result = refresh_with_retry(&Client::new(), &config, "dead").await;

        // Dead refresh token is never retried
        assert!(matches!(
            result,
            Err(ApiError::Refresh(RefreshError::InvalidGrant { status: 400, .. }))
        ));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_refresh_401_is_invalid_grant() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/oauth/token")
            .with_status(401)
            .with_body("unauthorized")
            .create_async()
            .await;

        let config = test_config(format!("{}/oauth/token", server.url()));
        let result = refresh(&Client::new(), &config, "dead").await;

        assert!(matches!(
            result,
            Err(ApiError::Refresh(RefreshError::InvalidGrant { status: 401, .. }))
        ));
    }

    #[tokio::test]
    async fn test_refresh_retries_transient_failures_bounded() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/oauth/token")
            .with_status(503)
            .with_body("unavailable")
            .expect(3) // initial attempt + 2 retries
            .create_async()
            .await;

        let config = test_config(format!("{}/oauth/token", server.url()));
        let result = refresh_with_retry(&Client::new(), &config, "R1").await;

        assert!(matches!(
            result,
            Err(ApiError::Refresh(RefreshError::Network(_)))
        ));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_token_endpoint_timeout_is_distinct() {
        // Listener that accepts connections but never answers them
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut open = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                open.push(socket);
            }
        });

        let client = Client::builder()
            .timeout(Duration::from_secs(1))
            .build()
            .unwrap();
        let config = test_config(format!("http://{}/oauth/token", addr));

        // A slow token endpoint is a timeout, not a network failure,
        // so it is never retried by refresh_with_retry
        let result = refresh_with_retry(&client, &config, "R1").await;
        assert!(matches!(result, Err(ApiError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_exchange_code_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/oauth/token")
            .match_header("content-type", "application/json")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "grant_type": "authorization_code",
                "code": "auth-code-1",
            })))
            .with_status(200)
            .with_body(r#"{"access_token": "A1", "refresh_token": "R1", "expires_in": 86400}"#)
            .expect(1)
            .create_async()
            .await;

        let config = test_config(format!("{}/oauth/token", server.url()));
        let credential = exchange_code(&Client::new(), &config, "auth-code-1")
            .await
            .unwrap();

        assert_eq!(credential.access_token, "A1");
        assert_eq!(credential.refresh_token, "R1");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_empty_access_token_is_rejected() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/oauth/token")
            .with_status(200)
            .with_body(r#"{"access_token": "", "refresh_token": "R1"}"#)
            .create_async()
            .await;

        let config = test_config(format!("{}/oauth/token", server.url()));
        let result = refresh(&Client::new(), &config, "R1").await;
        assert!(matches!(
            result,
            Err(ApiError::Refresh(RefreshError::Network(_)))
        ));
    }
}
