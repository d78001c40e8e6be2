//! chunkstream upload server entry point.

mod config;

use std::path::PathBuf;

use chunkstream_data_channel::UploadServer;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use crate::config::{Config, DEFAULT_CONFIG_PATH};

/// Receives chunked file uploads and reassembles them on disk.
#[derive(Parser, Debug)]
#[command(name = "chunkstream-server", version, about)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Address to listen on.
    #[arg(short, long)]
    listen: Option<String>,

    /// Root directory for per-session chunk artifacts.
    #[arg(long)]
    scratch_dir: Option<PathBuf>,

    /// Where the reassembled file is written.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Remove chunk artifacts after a successful merge.
    #[arg(long)]
    cleanup_after_merge: bool,

    /// Remove chunk artifacts of aborted sessions.
    #[arg(long)]
    cleanup_on_abort: bool,
}

impl Args {
    fn apply(&self, config: &mut Config) {
        if let Some(listen) = &self.listen {
            config.listen_addr = listen.clone();
        }
        if let Some(scratch_dir) = &self.scratch_dir {
            config.scratch_dir = scratch_dir.clone();
        }
        if let Some(output) = &self.output {
            config.output_path = output.clone();
        }
        config.cleanup.after_merge |= self.cleanup_after_merge;
        config.cleanup.on_abort |= self.cleanup_on_abort;
    }
}

fn main() -> anyhow::Result<()> {
    // Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,chunkstream=debug")),
        )
        .init();

    let args = Args::parse();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "starting chunkstream server"
    );

    let mut config = Config::load(&args.config)?;
    args.apply(&mut config);
    tracing::info!(
        listen = %config.listen_addr,
        scratch_dir = %config.scratch_dir.display(),
        output = %config.output_path.display(),
        cleanup_after_merge = config.cleanup.after_merge,
        cleanup_on_abort = config.cleanup.on_abort,
        "configuration loaded"
    );

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(config))?;

    tracing::info!("server shut down cleanly");
    Ok(())
}

async fn run(config: Config) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    let listener = UploadServer::bind(config.listen_addr.as_str()).await?;
    let server = UploadServer::new(config.receiver_config(), cancel.clone());

    let shutdown = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("interrupt received, shutting down"),
            Err(e) => tracing::warn!(error = %e, "failed to listen for interrupt"),
        }
        shutdown.cancel();
    });

    server.serve(listener).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_config() {
        let args = Args::parse_from([
            "chunkstream-server",
            "--listen",
            "127.0.0.1:7000",
            "--output",
            "/tmp/out.bin",
            "--cleanup-on-abort",
        ]);
        let mut config = Config::default();
        args.apply(&mut config);

        assert_eq!(config.listen_addr, "127.0.0.1:7000");
        assert_eq!(config.output_path, PathBuf::from("/tmp/out.bin"));
        assert_eq!(config.scratch_dir, Config::default().scratch_dir);
        assert!(config.cleanup.on_abort);
        assert!(!config.cleanup.after_merge);
    }

    #[test]
    fn absent_flags_keep_file_values() {
        let args = Args::parse_from(["chunkstream-server"]);
        assert_eq!(args.config, PathBuf::from(DEFAULT_CONFIG_PATH));

        let mut config = Config {
            listen_addr: "10.0.0.1:1234".into(),
            ..Config::default()
        };
        config.cleanup.after_merge = true;
        args.apply(&mut config);

        assert_eq!(config.listen_addr, "10.0.0.1:1234");
        assert!(config.cleanup.after_merge);
    }
}
