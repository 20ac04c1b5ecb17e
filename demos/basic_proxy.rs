//! Start a dialect-proxy server programmatically.
//!
//! Usage:
//!   export GEMINI_API_KEY=your_key
//!   cargo run --example basic_proxy

use dialect_proxy::{build_router, AppState, HttpUpstream, Proxy, ProxyConfig};
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = match ProxyConfig::find_and_load(None) {
        Ok(config) => config,
        Err(_) => ProxyConfig::for_upstream("gemini"),
    };
    let base_url = config.effective_base_url()?;

    println!(
        "Upstream: {} ({}, {})",
        config.upstream.name,
        config.upstream_dialect()?,
        base_url
    );
    println!("Models mapped: {}", config.models.len());

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(300))
        .build()?;
    let upstream = HttpUpstream::from_config(&config, client)?;
    let proxy = Proxy::new(config.converter()?, Arc::new(upstream), config.models.clone());

    let port = config.port;
    let state = Arc::new(AppState { config, proxy });

    let app = build_router(state);
    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    println!("Listening on http://{}", addr);
    println!();
    println!("  OPENAI_BASE_URL=http://localhost:{}/v1", port);
    println!("  ANTHROPIC_BASE_URL=http://localhost:{}", port);

    axum::serve(listener, app).await?;
    Ok(())
}
