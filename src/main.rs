//! unit-bridge - Rust handlers inside a native application server
//!
//! Main CLI entry point for serving the demo router and inspecting the
//! effective configuration.

use anyhow::{Context, Result};
use bytes::Bytes;
use clap::{Parser, Subcommand};
use http::{Request, StatusCode};
use std::path::PathBuf;
use std::sync::Arc;
use unit_bridge::config::{BridgeConfig, LIBRARY_ENV};
use unit_bridge::{handler_fn, text_response, Bridge, Handler, RemoteAddr, Router};

#[derive(Parser)]
#[command(name = "unit-bridge")]
#[command(version)]
#[command(about = "Serve Rust handlers from a native application server", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the effective configuration as TOML
    Config {
        /// Config file (default: unit-bridge.toml, searched upward)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Serve the demo router
    Serve {
        /// Listen address, used by the fallback server
        #[arg(short, long, default_value = "127.0.0.1:8080")]
        addr: String,

        /// Config file (default: unit-bridge.toml, searched upward)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Native runtime library, overrides the config file
        #[arg(short, long)]
        library: Option<String>,

        /// Exit with an error instead of falling back when the native
        /// runtime cannot start
        #[arg(long)]
        no_fallback: bool,
    },
}

fn main() -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Config { config } => cmd_config(config.as_ref()),
        Commands::Serve {
            addr,
            config,
            library,
            no_fallback,
        } => cmd_serve(&addr, config.as_ref(), library, no_fallback),
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<BridgeConfig> {
    let config = match path {
        Some(path) => {
            let config = BridgeConfig::load(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?;
            config.with_library_override(std::env::var(LIBRARY_ENV).ok())
        }
        None => BridgeConfig::load_from_cwd().context("Failed to load configuration")?,
    };
    Ok(config)
}

fn cmd_config(path: Option<&PathBuf>) -> Result<()> {
    let config = load_config(path)?;
    print!("{}", config.to_toml()?);
    Ok(())
}

fn cmd_serve(
    addr: &str,
    path: Option<&PathBuf>,
    library: Option<String>,
    no_fallback: bool,
) -> Result<()> {
    let mut config = load_config(path)?.with_library_override(library);
    if no_fallback {
        config.fallback.enabled = false;
    }

    match &config.native.library {
        Some(library) => tracing::info!(library = %library, "using native runtime"),
        None => tracing::info!("no native runtime configured"),
    }

    let handler: Arc<dyn Handler> = Arc::new(demo_router());
    Bridge::from_config(&config)
        .serve(addr, Some(handler))
        .with_context(|| format!("Failed to serve on {}", addr))
}

fn demo_router() -> Router {
    Router::new()
        .route(
            "/",
            handler_fn(|req: Request<Bytes>| {
                let peer = req
                    .extensions()
                    .get::<RemoteAddr>()
                    .map(|RemoteAddr(addr)| addr.as_str())
                    .unwrap_or("unknown");
                text_response(
                    StatusCode::OK,
                    format!("Hello from unit-bridge {} ({})\n", unit_bridge::VERSION, peer),
                )
            }),
        )
        .route(
            "/echo",
            handler_fn(|req: Request<Bytes>| text_response(StatusCode::OK, req.into_body())),
        )
}
