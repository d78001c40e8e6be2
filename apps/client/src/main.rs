//! chunkstream upload client entry point.

mod config;

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use chunkstream_data_channel::TcpUploadClient;
use chunkstream_protocol::UploadResponse;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use crate::config::{Config, DEFAULT_CONFIG_PATH};

/// Uploads a file to a chunkstream server.
#[derive(Parser, Debug)]
#[command(name = "chunkstream-client", version, about)]
struct Args {
    /// File to upload.
    file: PathBuf,

    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Upload server address (`host:port`).
    #[arg(short, long)]
    server: Option<String>,

    /// Chunk payload size in bytes.
    #[arg(short, long)]
    block_size: Option<usize>,

    /// Print the server response as JSON.
    #[arg(long)]
    json: bool,
}

impl Args {
    fn apply(&self, config: &mut Config) {
        if let Some(server) = &self.server {
            config.server_addr = server.clone();
        }
        if let Some(block_size) = self.block_size {
            config.block_size = block_size;
        }
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,chunkstream=debug")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let mut config = Config::load(&args.config)?;
    args.apply(&mut config);

    let rt = tokio::runtime::Runtime::new()?;
    let response = rt.block_on(run(&args, &config))?;

    if args.json {
        println!("{}", serde_json::to_string(&response)?);
    } else {
        println!("{}", response.message);
    }
    Ok(())
}

async fn run(args: &Args, config: &Config) -> anyhow::Result<UploadResponse> {
    let addr = resolve(&config.server_addr).await?;

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, cancelling upload");
            interrupt.cancel();
        }
    });

    tracing::info!(
        file = %args.file.display(),
        server = %addr,
        block_size = config.block_size,
        "uploading"
    );

    match TcpUploadClient::upload_file(addr, &args.file, config.block_size, &cancel).await {
        Ok(response) => Ok(response),
        Err(e) => {
            tracing::error!(kind = ?e.kind(), error = %e, "upload failed");
            Err(e.into())
        }
    }
}

async fn resolve(server: &str) -> anyhow::Result<SocketAddr> {
    tokio::net::lookup_host(server)
        .await
        .with_context(|| format!("failed to resolve {server}"))?
        .next()
        .with_context(|| format!("no address found for {server}"))
}
