use anyhow::Result;
use std::sync::Arc;

use fic_gateway::auth::store::{open_sqlite_store, EnvApiStore, TokenStore};
use fic_gateway::auth::AuthManager;
use fic_gateway::config::{Config, StoreBackend};
use fic_gateway::http_client::FicHttpClient;
use fic_gateway::{middleware, routes};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (for log level)
    let config = Config::load()?;
    config.validate()?;

    // Initialize logging with a configured level
    let log_level = config.log_level.to_lowercase();
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::info!("FIC Gateway starting...");
    tracing::info!(
        "Server configured: {}:{}",
        config.server_host,
        config.server_port
    );

    // Build the token store for the configured backend
    let store = build_token_store(&config)?;

    // Initialize the credential lifecycle manager
    let auth_manager = Arc::new(AuthManager::new(
        store,
        config.oauth_config(),
        config.request_timeout(),
        config.expiry_buffer_secs,
    )?);

    // Probe the store; the gateway starts either way, but an operator
    // should know whether authorization is still pending
    match auth_manager.current().await {
        Ok(Some(credential)) => {
            tracing::info!(
                "Credential loaded, expires: {}",
                credential
                    .expires_at
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "unknown".to_string())
            );
        }
        Ok(None) => {
            tracing::warn!(
                "No stored credential; invoice calls will fail until POST /oauth/authorize"
            );
        }
        Err(e) => {
            tracing::error!("Token store probe failed: {}", e);
            anyhow::bail!("Startup failed: token store is unreachable or misconfigured");
        }
    }

    // Initialize the authenticated provider client
    let fic_client = Arc::new(FicHttpClient::new(
        auth_manager.clone(),
        config.fic_api_base.clone(),
        config.http_max_connections,
        config.http_connect_timeout,
        config.http_request_timeout,
    )?);
    tracing::info!("Provider client initialized: {}", config.fic_api_base);

    let app_state = routes::AppState {
        config: Arc::new(config.clone()),
        auth: auth_manager,
        fic: fic_client,
    };

    // Build the application with routes and middleware
    let app = build_app(app_state);

    // Bind to configured host and port
    let addr = format!("{}:{}", config.server_host, config.server_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutdown complete");

    Ok(())
}

/// Construct the token store for the configured backend
fn build_token_store(config: &Config) -> Result<TokenStore> {
    match config.store_backend {
        StoreBackend::Sqlite => {
            tracing::info!(
                "Token store: SQLite at {}",
                config.token_db_file.display()
            );
            let store = open_sqlite_store(&config.token_db_file)
                .map_err(|e| anyhow::anyhow!("{}", e))?;
            Ok(store)
        }
        StoreBackend::EnvApi => {
            // validate() guarantees both values are present
            let site_id = config
                .deploy_site_id
                .clone()
                .ok_or_else(|| anyhow::anyhow!("DEPLOY_SITE_ID is required"))?;
            let api_token = config
                .deploy_api_token
                .clone()
                .ok_or_else(|| anyhow::anyhow!("DEPLOY_API_TOKEN is required"))?;

            tracing::info!("Token store: deploy env API for site {}", site_id);
            let client = reqwest::Client::builder()
                .timeout(config.request_timeout())
                .build()?;
            Ok(TokenStore::EnvApi(EnvApiStore::new(
                client,
                config.deploy_api_base.clone(),
                site_id,
                api_token,
            )))
        }
    }
}

/// Build the application with all routes and middleware
fn build_app(state: routes::AppState) -> axum::Router {
    use axum::Router;

    let health_routes = routes::health_routes();
    let api_routes = routes::api_routes(state.clone());
    let oauth_routes = routes::oauth_routes(state);

    Router::new()
        .merge(health_routes)
        .merge(api_routes)
        .merge(oauth_routes)
        .layer(middleware::cors_layer())
        .layer(axum::middleware::from_fn(
            middleware::request_log_middleware,
        ))
}

/// Handle graceful shutdown signal
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal, initiating graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown...");
        },
    }
}
