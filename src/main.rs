use clap::Parser;
use dialect_proxy::config::describe_search_paths;
use dialect_proxy::{build_router, AppState, HttpUpstream, Proxy, ProxyConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "dialect-proxy",
    about = "Serve OpenAI, Anthropic and Gemini clients from a single upstream",
    version
)]
struct Cli {
    /// Path to config file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Upstream preset name (overrides config)
    #[arg(long)]
    upstream: Option<String>,

    /// Print config search paths and exit
    #[arg(long)]
    show_config_paths: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dialect_proxy=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if cli.show_config_paths {
        println!("Config search paths:");
        for (i, path) in describe_search_paths().iter().enumerate() {
            println!("  {}. {}", i + 1, path);
        }
        return Ok(());
    }

    let mut config = ProxyConfig::find_and_load(cli.config.as_deref())?;

    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(upstream) = cli.upstream {
        // A new preset brings its own URL, dialect and key variable.
        config.upstream.name = upstream;
        config.upstream.base_url = None;
        config.upstream.dialect = None;
        config.upstream.api_key_env = None;
    }

    // Validate config eagerly
    let converter = config.converter()?;
    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(300))
        .build()?;
    let upstream = HttpUpstream::from_config(&config, client)?;

    info!("dialect-proxy v{}", env!("CARGO_PKG_VERSION"));
    info!("  Upstream:  {} ({})", config.upstream.name, config.upstream_dialect()?);
    info!("  Base URL:  {}", config.effective_base_url()?);
    info!("  Port:      {}", config.port);
    info!("  Models:    {} mapped", config.models.len());
    if !config.conversion.deny.is_empty() {
        info!("  Denied:    {}", config.conversion.deny.join(", "));
    }

    let proxy = Proxy::new(converter, Arc::new(upstream), config.models.clone());
    let state = Arc::new(AppState {
        config: config.clone(),
        proxy,
    });

    let app = build_router(state);
    let bind_addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    info!("Listening on http://{}", bind_addr);
    info!("  OpenAI clients:    http://localhost:{}/v1", config.port);
    info!("  Anthropic clients: http://localhost:{}", config.port);
    info!("  Gemini clients:    http://localhost:{}/v1beta", config.port);

    axum::serve(listener, app).await?;

    Ok(())
}
