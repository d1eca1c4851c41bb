use tower_http::cors::{Any, CorsLayer};

/// Permissive CORS for the dashboard frontend; the proxy itself carries no
/// browser credentials (tokens travel in explicit headers or chunked
/// cookies handled server-side).
pub fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
}
