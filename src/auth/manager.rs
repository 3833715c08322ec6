use anyhow::{Context, Result};
use chrono::Utc;
use reqwest::Client;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};

use super::refresh::{self, OAuthConfig};
use super::store::TokenStore;
use super::types::{is_expired, Credential};
use crate::error::ApiError;

/// A bearer token handed to the authenticated client, carrying whether
/// obtaining it already spent the one refresh allowed per logical call
pub struct AccessToken {
    pub token: String,
    pub refreshed: bool,
}

/// Credential lifecycle manager
///
/// Owns the durable store and an in-process cache of the current
/// credential. Refreshes are serialized through a single lock so that
/// concurrent callers observing the same stale token await one
/// in-flight refresh instead of racing the provider, which rotates the
/// refresh token on every use.
pub struct AuthManager {
    /// Durable credential store shared across instances
    store: TokenStore,

    /// OAuth client settings for the token endpoint
    oauth: OAuthConfig,

    /// HTTP client for token endpoint requests
    client: Client,

    /// In-process copy of the current credential
    cached: RwLock<Option<Credential>>,

    /// Serializes refreshes (single-flight)
    refresh_lock: Mutex<()>,

    /// Seconds before expiry at which a token is treated as stale
    expiry_buffer_secs: i64,
}

impl AuthManager {
    pub fn new(
        store: TokenStore,
        oauth: OAuthConfig,
        request_timeout: Duration,
        expiry_buffer_secs: i64,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            store,
            oauth,
            client,
            cached: RwLock::new(None),
            refresh_lock: Mutex::new(()),
            expiry_buffer_secs,
        })
    }

    /// Current credential: in-process cache first, then the store
    pub async fn current(&self) -> Result<Option<Credential>, ApiError> {
        if let Some(credential) = self.cached.read().await.clone() {
            return Ok(Some(credential));
        }

        let stored = self.store.get().await?;
        if let Some(ref credential) = stored {
            *self.cached.write().await = Some(credential.clone());
        }
        Ok(stored)
    }

    /// Get a bearer token valid for immediate use.
    ///
    /// Proactive path: a credential inside the expiry buffer is
    /// refreshed before any provider call is attempted.
    pub async fn access_token(&self) -> Result<AccessToken, ApiError> {
        let credential = self.current().await?;

        if is_expired(credential.as_ref(), Utc::now(), self.expiry_buffer_secs) {
            let observed = credential
                .map(|c| c.access_token)
                .unwrap_or_default();
            let fresh = self.refresh_after(&observed).await?;
            return Ok(AccessToken {
                token: fresh.access_token,
                refreshed: true,
            });
        }

        // is_expired is true for an absent credential, so it exists here
        let credential = credential.ok_or_else(not_configured)?;
        Ok(AccessToken {
            token: credential.access_token,
            refreshed: false,
        })
    }

    /// Refresh the credential after `observed_token` failed or went stale.
    ///
    /// Single-flight: callers queue on the refresh lock, and whoever
    /// arrives after a completed refresh gets the fresh credential back
    /// without a second provider round-trip.
    pub async fn refresh_after(&self, observed_token: &str) -> Result<Credential, ApiError> {
        let _guard = self.refresh_lock.lock().await;

        let current = self.current().await?;
        let current = current.ok_or_else(not_configured)?;

        // Another caller may have refreshed while we waited on the lock
        if current.access_token != observed_token
            && !is_expired(Some(&current), Utc::now(), self.expiry_buffer_secs)
        {
            tracing::debug!("Credential already refreshed by a concurrent caller");
            return Ok(current);
        }

        let fresh =
            refresh::refresh_with_retry(&self.client, &self.oauth, &current.refresh_token).await?;

        // Persist before handing the credential out; a failed write must
        // not leave callers using a token the store does not know about
        self.store.put(&fresh).await?;
        *self.cached.write().await = Some(fresh.clone());

        Ok(fresh)
    }

    /// Initial authorization-code exchange; persists the first credential
    pub async fn authorize(&self, code: &str) -> Result<Credential, ApiError> {
        let credential = refresh::exchange_code(&self.client, &self.oauth, code).await?;

        self.store.put(&credential).await?;
        *self.cached.write().await = Some(credential.clone());

        tracing::info!("Authorization complete, credential stored");
        Ok(credential)
    }

    /// Explicit revocation: destroy the stored credential
    pub async fn clear(&self) -> Result<(), ApiError> {
        self.store.clear().await?;
        *self.cached.write().await = None;
        tracing::info!("Stored credential cleared");
        Ok(())
    }
}

fn not_configured() -> ApiError {
    ApiError::NotConfigured(
        "OAuth tokens not configured. Please authorize the system first.".to_string(),
    )
}
