use std::sync::Arc;

use veehub::modules;
use veehub::proxy;

#[tokio::main]
async fn main() -> Result<(), String> {
    modules::logger::init_logger();

    let mut proxy_config = match modules::config::load_web_config() {
        Ok(cfg) => cfg,
        Err(err) => {
            tracing::warn!("failed to load web config: {}. using defaults", err);
            let cfg = proxy::ProxyConfig::default();
            let _ = modules::config::save_web_config(&cfg);
            cfg
        }
    };

    if let Ok(value) = std::env::var("VEEHUB_ALLOW_LAN") {
        let enabled = matches!(value.as_str(), "1" | "true" | "yes" | "on");
        if enabled {
            proxy_config.allow_lan_access = true;
        }
    }

    if let Ok(value) = std::env::var("VEEHUB_PORT") {
        match value.parse::<u16>() {
            Ok(port) => proxy_config.port = port,
            Err(_) => tracing::warn!("ignoring invalid VEEHUB_PORT value: {}", value),
        }
    }

    let bind_address = if let Ok(addr) = std::env::var("VEEHUB_BIND") {
        if addr != "127.0.0.1" && addr != "localhost" {
            proxy_config.allow_lan_access = true;
        }
        addr
    } else {
        proxy_config.get_bind_address().to_string()
    };

    let data_dir = modules::sources::get_data_dir()?;

    let source_store = Arc::new(proxy::SourceStore::new(Some(data_dir)));
    let configured = source_store
        .load()
        .map_err(|e| format!("failed to load data sources: {}", e))?;

    if configured == 0 {
        tracing::warn!("no data sources configured; add one via POST /api/sources");
    } else {
        tracing::info!("loaded {} configured data source(s)", configured);
    }

    let upstream = Arc::new(proxy::upstream::client::UpstreamClient::new(
        proxy_config.request_timeout,
        proxy_config.verify_tls,
    ));

    let token_manager = Arc::new(proxy::TokenManager::new(
        source_store.clone(),
        upstream.clone(),
    ));

    let (server, handle) = proxy::AxumServer::start(
        bind_address.clone(),
        proxy_config.port,
        source_store,
        token_manager,
        upstream,
    )
    .await
    .map_err(|e| format!("failed to start proxy server: {}", e))?;

    tracing::info!(
        "veehub listening on http://{}:{}",
        bind_address,
        server.local_addr().port()
    );

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| format!("failed to listen for shutdown signal: {}", e))?;

    tracing::info!("shutdown requested, stopping server...");
    server.stop();
    let _ = handle.await;

    Ok(())
}
