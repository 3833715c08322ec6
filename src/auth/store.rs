// Durable credential storage
//
// Two interchangeable backends persist the single active credential:
// a local SQLite key-value table, and the deployment platform's
// environment-variable management API. The whole credential is stored
// as one JSON value under one key, so a put either lands completely or
// leaves the previous credential in place.

use reqwest::Client;
use serde_json::json;
use std::path::{Path, PathBuf};

use super::types::Credential;
use crate::error::ApiError;

/// Key under which the credential JSON is stored, in both backends
const CREDENTIAL_KEY: &str = "FIC_OAUTH_CREDENTIAL";

/// SQLite table holding gateway key-value state
const KV_TABLE_DDL: &str =
    "CREATE TABLE IF NOT EXISTS oauth_kv (key TEXT PRIMARY KEY, value TEXT NOT NULL)";

/// Persistent credential store
pub enum TokenStore {
    Sqlite(SqliteStore),
    EnvApi(EnvApiStore),
}

impl TokenStore {
    /// Read the current credential, if one has been stored
    pub async fn get(&self) -> Result<Option<Credential>, ApiError> {
        match self {
            TokenStore::Sqlite(store) => store.get(),
            TokenStore::EnvApi(store) => store.get().await,
        }
    }

    /// Replace the stored credential wholesale
    pub async fn put(&self, credential: &Credential) -> Result<(), ApiError> {
        match self {
            TokenStore::Sqlite(store) => store.put(credential),
            TokenStore::EnvApi(store) => store.put(credential).await,
        }
    }

    /// Destroy the stored credential (explicit revocation/logout)
    pub async fn clear(&self) -> Result<(), ApiError> {
        match self {
            TokenStore::Sqlite(store) => store.clear(),
            TokenStore::EnvApi(store) => store.clear().await,
        }
    }
}

/// Credential store backed by a local SQLite database
pub struct SqliteStore {
    path: PathBuf,
}

impl SqliteStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn open(&self) -> Result<rusqlite::Connection, ApiError> {
        let conn = rusqlite::Connection::open(&self.path).map_err(|e| {
            ApiError::Storage(format!(
                "failed to open token database {}: {}",
                self.path.display(),
                e
            ))
        })?;
        conn.execute(KV_TABLE_DDL, [])
            .map_err(|e| ApiError::Storage(format!("failed to initialize token table: {}", e)))?;
        Ok(conn)
    }

    fn get(&self) -> Result<Option<Credential>, ApiError> {
        let conn = self.open()?;
        let row: Option<String> = conn
            .query_row(
                "SELECT value FROM oauth_kv WHERE key = ?",
                [CREDENTIAL_KEY],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(ApiError::Storage(format!(
                    "failed to read credential: {}",
                    other
                ))),
            })?;

        match row {
            None => Ok(None),
            Some(value) => {
                let credential = serde_json::from_str(&value).map_err(|e| {
                    ApiError::Storage(format!("stored credential is not valid JSON: {}", e))
                })?;
                Ok(Some(credential))
            }
        }
    }

    fn put(&self, credential: &Credential) -> Result<(), ApiError> {
        let value = serde_json::to_string(credential)
            .map_err(|e| ApiError::Storage(format!("failed to serialize credential: {}", e)))?;
        let conn = self.open()?;
        // Single upsert: the previous credential stays intact unless the
        // whole write succeeds
        conn.execute(
            "INSERT INTO oauth_kv (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            rusqlite::params![CREDENTIAL_KEY, value],
        )
        .map_err(|e| ApiError::Storage(format!("failed to write credential: {}", e)))?;
        Ok(())
    }

    fn clear(&self) -> Result<(), ApiError> {
        let conn = self.open()?;
        conn.execute("DELETE FROM oauth_kv WHERE key = ?", [CREDENTIAL_KEY])
            .map_err(|e| ApiError::Storage(format!("failed to clear credential: {}", e)))?;
        Ok(())
    }
}

/// Credential store backed by the deployment platform's env-var API.
///
/// Mirrors the platform's REST surface: the account slug is resolved
/// from the site, then a single env var is read or upserted with
/// `site_id` scoping.
pub struct EnvApiStore {
    client: Client,
    base_url: String,
    site_id: String,
    api_token: String,
}

impl EnvApiStore {
    pub fn new(
        client: Client,
        base_url: impl Into<String>,
        site_id: impl Into<String>,
        api_token: impl Into<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            site_id: site_id.into(),
            api_token: api_token.into(),
        }
    }

    /// Resolve the account slug owning the site
    async fn account_slug(&self) -> Result<String, ApiError> {
        let url = format!("{}/api/v1/sites/{}", self.base_url, self.site_id);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_token)
            .send()
            .await
            .map_err(|e| ApiError::Storage(format!("deploy API unreachable: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Storage(format!(
                "failed to resolve site {}: {} - {}",
                self.site_id, status, body
            )));
        }

        let site: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ApiError::Storage(format!("invalid site info response: {}", e)))?;

        site.get("account_slug")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| ApiError::Storage("site info has no account_slug".to_string()))
    }

    fn env_var_url(&self, account: &str) -> String {
        format!(
            "{}/api/v1/accounts/{}/env/{}?site_id={}",
            self.base_url, account, CREDENTIAL_KEY, self.site_id
        )
    }

    async fn get(&self) -> Result<Option<Credential>, ApiError> {
        let account = self.account_slug().await?;
        let response = self
            .client
            .get(self.env_var_url(&account))
            .bearer_auth(&self.api_token)
            .send()
            .await
            .map_err(|e| ApiError::Storage(format!("deploy API unreachable: {}", e)))?;

        let status = response.status();
        if status.as_u16() == 404 {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Storage(format!(
                "failed to read credential var: {} - {}",
                status, body
            )));
        }

        let var: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ApiError::Storage(format!("invalid env var response: {}", e)))?;

        let value = var
            .get("values")
            .and_then(|v| v.as_array())
            .and_then(|values| values.first())
            .and_then(|entry| entry.get("value"))
            .and_then(|v| v.as_str());

        match value {
            None => Ok(None),
            Some(raw) => {
                let credential = serde_json::from_str(raw).map_err(|e| {
                    ApiError::Storage(format!("stored credential is not valid JSON: {}", e))
                })?;
                Ok(Some(credential))
            }
        }
    }

    async fn put(&self, credential: &Credential) -> Result<(), ApiError> {
        let account = self.account_slug().await?;
        let value = serde_json::to_string(credential)
            .map_err(|e| ApiError::Storage(format!("failed to serialize credential: {}", e)))?;

        let body = json!({
            "key": CREDENTIAL_KEY,
            "scopes": ["builds", "functions", "runtime", "post_processing"],
            "values": [{ "context": "all", "value": value }],
        });

        // Update in place; fall back to creation when the var is missing
        let response = self
            .client
            .patch(self.env_var_url(&account))
            .bearer_auth(&self.api_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| ApiError::Storage(format!("deploy API unreachable: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            tracing::debug!("Credential env var updated");
            return Ok(());
        }
        if status.as_u16() != 404 {
            let text = response.text().await.unwrap_or_default();
            return Err(ApiError::Storage(format!(
                "failed to update credential var: {} - {}",
                status, text
            )));
        }

        let create_url = format!(
            "{}/api/v1/accounts/{}/env?site_id={}",
            self.base_url, account, self.site_id
        );
        let response = self
            .client
            .post(&create_url)
            .bearer_auth(&self.api_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| ApiError::Storage(format!("deploy API unreachable: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ApiError::Storage(format!(
                "failed to create credential var: {} - {}",
                status, text
            )));
        }

        tracing::debug!("Credential env var created");
        Ok(())
    }

    async fn clear(&self) -> Result<(), ApiError> {
        let account = self.account_slug().await?;
        let response = self
            .client
            .delete(self.env_var_url(&account))
            .bearer_auth(&self.api_token)
            .send()
            .await
            .map_err(|e| ApiError::Storage(format!("deploy API unreachable: {}", e)))?;

        let status = response.status();
        // Deleting an absent var is not an error
        if !status.is_success() && status.as_u16() != 404 {
            let text = response.text().await.unwrap_or_default();
            return Err(ApiError::Storage(format!(
                "failed to delete credential var: {} - {}",
                status, text
            )));
        }
        Ok(())
    }
}

/// Open a SQLite-backed store, checking the parent directory exists
pub fn open_sqlite_store(path: &Path) -> Result<TokenStore, ApiError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            return Err(ApiError::Storage(format!(
                "token database directory does not exist: {}",
                parent.display()
            )));
        }
    }
    Ok(TokenStore::Sqlite(SqliteStore::new(path)))
}
