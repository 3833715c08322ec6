use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use crate::auth::OAuthConfig;

/// Fatture in Cloud Invoice Gateway
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Server host address
    #[arg(short = 'H', long, env = "SERVER_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Server port
    #[arg(short, long, env = "SERVER_PORT", default_value = "8788")]
    pub port: u16,

    /// Fatture in Cloud API base URL
    #[arg(long, env = "FIC_API_BASE", default_value = "https://api-v2.fattureincloud.it")]
    pub api_base: String,

    /// OAuth client ID
    #[arg(long, env = "FIC_CLIENT_ID")]
    pub client_id: Option<String>,

    /// OAuth client secret
    #[arg(long, env = "FIC_CLIENT_SECRET")]
    pub client_secret: Option<String>,

    /// OAuth redirect URI registered with the provider
    #[arg(long, env = "FIC_REDIRECT_URI")]
    pub redirect_uri: Option<String>,

    /// Company ID invoices are issued for
    #[arg(long, env = "FIC_COMPANY_ID")]
    pub company_id: Option<String>,

    /// Token store backend (sqlite, env-api)
    #[arg(long, env = "TOKEN_STORE", default_value = "sqlite")]
    pub token_store: String,

    /// Path to the SQLite token database (sqlite backend)
    #[arg(short = 'd', long, env = "FIC_TOKEN_DB_FILE", default_value = "fic-tokens.db")]
    pub token_db_file: String,

    /// Deploy platform API base URL (env-api backend)
    #[arg(long, env = "DEPLOY_API_BASE", default_value = "https://api.netlify.com")]
    pub deploy_api_base: String,

    /// Deploy platform site ID (env-api backend)
    #[arg(long, env = "DEPLOY_SITE_ID")]
    pub site_id: Option<String>,

    /// Deploy platform API token (env-api backend)
    #[arg(long, env = "DEPLOY_API_TOKEN")]
    pub deploy_api_token: Option<String>,

    /// HTTP request timeout in seconds
    #[arg(long, env = "HTTP_REQUEST_TIMEOUT", default_value = "10")]
    pub http_timeout: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

/// Selected token store backend.
///
/// Two persistence strategies exist for deployments (local SQLite file,
/// deploy-platform env API); neither supersedes the other, so the
/// target is an explicit configuration choice.
#[derive(Clone, Debug, PartialEq)]
pub enum StoreBackend {
    Sqlite,
    EnvApi,
}

#[derive(Clone, Debug)]
pub struct Config {
    // Server settings
    pub server_host: String,
    pub server_port: u16,

    // Provider OAuth client
    pub fic_api_base: String,
    pub fic_client_id: String,
    pub fic_client_secret: String,
    pub fic_redirect_uri: String,
    pub fic_company_id: String,

    // Token store
    pub store_backend: StoreBackend,
    pub token_db_file: PathBuf,
    pub deploy_api_base: String,
    pub deploy_site_id: Option<String>,
    pub deploy_api_token: Option<String>,

    // Token lifecycle
    pub expiry_buffer_secs: i64,
    pub refresh_max_retries: u32,
    pub refresh_base_delay_ms: u64,

    // HTTP client
    pub http_max_connections: usize,
    pub http_connect_timeout: u64,
    pub http_request_timeout: u64,

    pub log_level: String,
}

impl Config {
    /// Load configuration from all sources with priority: CLI > ENV > defaults
    pub fn load() -> Result<Self> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        // Parse CLI arguments
        let args = CliArgs::parse();

        let config = Config {
            server_host: args.host,
            server_port: args.port,

            fic_api_base: args.api_base.trim_end_matches('/').to_string(),

            fic_client_id: args
                .client_id
                .context("FIC_CLIENT_ID is required (use --client-id or set FIC_CLIENT_ID)")?,

            fic_client_secret: args.client_secret.context(
                "FIC_CLIENT_SECRET is required (use --client-secret or set FIC_CLIENT_SECRET)",
            )?,

            fic_redirect_uri: args.redirect_uri.context(
                "FIC_REDIRECT_URI is required (use --redirect-uri or set FIC_REDIRECT_URI)",
            )?,

            fic_company_id: args
                .company_id
                .context("FIC_COMPANY_ID is required (use --company-id or set FIC_COMPANY_ID)")?,

            store_backend: parse_store_backend(&args.token_store)?,

            token_db_file: expand_tilde(&args.token_db_file),

            deploy_api_base: args.deploy_api_base.trim_end_matches('/').to_string(),
            deploy_site_id: args.site_id,
            deploy_api_token: args.deploy_api_token,

            expiry_buffer_secs: std::env::var("TOKEN_EXPIRY_BUFFER")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(300),

            refresh_max_retries: std::env::var("TOKEN_REFRESH_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(2),

            refresh_base_delay_ms: std::env::var("TOKEN_REFRESH_BASE_DELAY_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(1000),

            http_max_connections: std::env::var("HTTP_MAX_CONNECTIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(20),

            http_connect_timeout: std::env::var("HTTP_CONNECT_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),

            http_request_timeout: args.http_timeout,

            log_level: args.log_level,
        };

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.store_backend == StoreBackend::EnvApi {
            // The env-api backend cannot run without its identifying
            // configuration; defaulting silently would strand tokens
            if self.deploy_site_id.is_none() {
                anyhow::bail!("DEPLOY_SITE_ID is required for the env-api token store");
            }
            if self.deploy_api_token.is_none() {
                anyhow::bail!("DEPLOY_API_TOKEN is required for the env-api token store");
            }
        }

        Ok(())
    }

    /// OAuth client settings for the token endpoint
    pub fn oauth_config(&self) -> OAuthConfig {
        OAuthConfig {
            token_url: format!("{}/oauth/token", self.fic_api_base),
            client_id: self.fic_client_id.clone(),
            client_secret: self.fic_client_secret.clone(),
            redirect_uri: self.fic_redirect_uri.clone(),
            max_retries: self.refresh_max_retries,
            base_delay_ms: self.refresh_base_delay_ms,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.http_request_timeout)
    }
}

/// Parse the token store backend selector
pub fn parse_store_backend(s: &str) -> Result<StoreBackend> {
    match s.to_lowercase().as_str() {
        "sqlite" => Ok(StoreBackend::Sqlite),
        "env-api" | "env_api" => Ok(StoreBackend::EnvApi),
        other => anyhow::bail!("unknown token store backend: {} (expected sqlite or env-api)", other),
    }
}

/// Expand tilde (~) in file paths to user's home directory
fn expand_tilde(path: &str) -> PathBuf {
    if path.starts_with("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(&path[2..]);
        }
    }
    PathBuf::from(path)
}
