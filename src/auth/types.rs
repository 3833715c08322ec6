// Credential and OAuth wire types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Safety buffer applied before the real expiry instant.
/// A token inside the buffer is treated as already expired so that a
/// refresh happens before the provider starts answering 401.
pub const DEFAULT_EXPIRY_BUFFER_SECS: i64 = 300;

/// The persisted OAuth credential.
///
/// Access and refresh token are always replaced as a pair; the provider
/// invalidates the previous refresh token on every successful refresh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,
    pub refresh_token: String,
    /// Absolute expiry instant, computed at issuance as now + expires_in.
    /// Absent or unparseable expiry is treated as already expired.
    pub expires_at: Option<DateTime<Utc>>,
    /// For audit and debugging only
    pub issued_at: DateTime<Utc>,
}

impl Credential {
    /// Build a credential from a token endpoint response, stamping the
    /// expiry from the provider-reported lifetime.
    pub fn from_token_response(response: TokenResponse, now: DateTime<Utc>) -> Self {
        // Observed lifetime on Fatture in Cloud is 24 hours
        let expires_in = response.expires_in.unwrap_or(86400);
        Self {
            access_token: response.access_token,
            refresh_token: response.refresh_token,
            expires_at: Some(now + chrono::Duration::seconds(expires_in as i64)),
            issued_at: now,
        }
    }
}

/// Response from the provider token endpoint, for both the
/// authorization-code and refresh-token grants
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: Option<u64>,
    #[allow(dead_code)]
    pub token_type: Option<String>,
}

/// Authorization-code exchange request body.
/// The provider accepts JSON for this grant.
#[derive(Debug, Serialize)]
pub struct CodeExchangeRequest {
    pub grant_type: &'static str,
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub code: String,
}

/// Decide whether a credential must be refreshed before use.
///
/// Pure function: true when the credential is absent, carries no expiry,
/// or `now + buffer` has reached the expiry instant.
pub fn is_expired(credential: Option<&Credential>, now: DateTime<Utc>, buffer_secs: i64) -> bool {
    match credential.and_then(|c| c.expires_at) {
        None => true,
        Some(expires_at) => now + chrono::Duration::seconds(buffer_secs) >= expires_at,
    }
}
