//! Binary entry point: load configuration, wire the context, start the
//! sampler and the HTTP/SSE server, shut down cleanly on ctrl-c.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;

use traq_lib::settings::{self, TraqSettings};
use traq_lib::{AppContext, Backends};

/// Activity tracking backend with real-time AI event coordination
#[derive(Parser, Debug)]
#[command(name = "traq")]
#[command(version, about, long_about = None)]
struct Args {
    /// Settings file (default: ~/.traq/settings.toml)
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Override the listen port from settings
    #[arg(short = 'p', long)]
    port: Option<u16>,

    /// Override the data directory from settings
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Show verbose output (debug information)
    #[arg(short = 'v', long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // .env is optional; credentials may come from the environment.
    let _ = dotenvy::dotenv();

    let default_directive = if args.verbose { "traq=debug" } else { "traq=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(default_directive.parse().context("invalid log directive")?),
        )
        .init();

    let settings_file = args.config.unwrap_or_else(settings::settings_path);
    let mut settings: TraqSettings = settings::load(&settings_file).await?;
    if let Some(port) = args.port {
        settings.server.port = port;
    }
    if let Some(data_dir) = args.data_dir {
        settings.data.dir = data_dir;
    }

    let backends = Backends::from_settings(&settings);
    let addr: SocketAddr = format!("{}:{}", settings.server.host, settings.server.port)
        .parse()
        .context("invalid server address")?;

    let ctx = AppContext::new(settings, backends);
    ctx.artifacts
        .ensure_layout()
        .await
        .context("failed to create data directories")?;

    // The sampler lives for the whole process.
    let sampler_cancel = CancellationToken::new();
    let sampler_task = tokio::spawn(ctx.sampler().run(sampler_cancel.clone()));

    let (bound, shutdown) = traq_lib::server::start_server(ctx.clone(), addr).await?;
    tracing::info!("traq backend ready on http://{bound}");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    tracing::info!("shutting down");

    shutdown.cancel();
    sampler_cancel.cancel();
    ctx.shutdown().await;
    let _ = sampler_task.await;

    Ok(())
}
