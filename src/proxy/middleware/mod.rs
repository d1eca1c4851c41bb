// Middleware module - axum layers

pub mod cors;

pub use cors::cors_layer;
