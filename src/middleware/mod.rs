// CORS and request logging middleware

use axum::{body::Body, http::Request, middleware::Next, response::Response};
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};

/// Create CORS middleware layer
///
/// The form UI is served from a different origin, so all origins,
/// methods, and headers are allowed; OPTIONS preflight is handled
/// automatically.
pub fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Log each request with a short correlation id and its latency
pub async fn request_log_middleware(request: Request<Body>, next: Next) -> Response {
    let request_id = uuid::Uuid::new_v4().to_string()[..8].to_string();
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let start = Instant::now();

    let response = next.run(request).await;

    let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
    tracing::info!(
        "[{}] {} {} -> {} ({:.1}ms)",
        request_id,
        method,
        path,
        response.status(),
        latency_ms
    );
    response
}
