// proxy module - aggregating reverse proxy for Veeam product REST APIs

pub mod config;
pub mod cookie_chunks;
pub mod debounce;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod platform;
pub mod rate_limit;
pub mod server;
pub mod source_store;
pub mod token_manager;
pub mod upstream;

pub use config::ProxyConfig;
pub use platform::Platform;
pub use server::AxumServer;
pub use source_store::SourceStore;
pub use token_manager::TokenManager;
