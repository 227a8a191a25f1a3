//! unidl server
//!
//! Accepts download requests over HTTP, runs them on the remote host and
//! reports completion over WebSocket and web push.

use clap::{Parser, ValueEnum};
use tower_http::services::{ServeDir, ServeFile};
use tracing::info;

mod config;
mod routes;
mod state;

use config::Config;
use state::AppState;

const DEFAULT_LOG_FILTER: &str = "info,unidl=debug,unidl_core=debug";

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// unidl server
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to bind to
    #[arg(short, long, env = "UNIDL_ADDR", default_value = "0.0.0.0:3000")]
    addr: String,

    /// Path to configuration file
    #[arg(short, long, env = "UNIDL_CONFIG")]
    config: Option<String>,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());

    match format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables before clap reads its env fallbacks
    dotenvy::dotenv().ok();

    let args = Args::parse();
    init_tracing(args.log_format);

    let config = Config::load(args.config.as_deref())?;
    info!(addr = %args.addr, remote = %config.remote.host, "Starting unidl server");

    let client_dir = config.client_dir.clone();
    let state = AppState::new(config)?;

    let mut app = routes::app_routes(state);

    if let Some(dir) = client_dir {
        info!(dir = %dir, "Serving web client");
        let index = std::path::Path::new(&dir).join("index.html");
        app = app.fallback_service(ServeDir::new(&dir).fallback(ServeFile::new(index)));
    }

    let app = app
        .layer(
            tower_http::trace::TraceLayer::new_for_http().make_span_with(
                |request: &axum::http::Request<_>| {
                    tracing::info_span!(
                        "http_request",
                        method = %request.method(),
                        uri = %request.uri(),
                    )
                },
            ),
        )
        .layer(tower_http::compression::CompressionLayer::new())
        .layer(tower_http::cors::CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(&args.addr).await?;
    info!(addr = %args.addr, "Server listening");

    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}
