//! rtl-bridge: serves one text file to bidirectional editor views.
//!
//! Each WebSocket connection is a view. Saves go through the bridge; writes
//! by other programs are reported to the views as external changes.

use anyhow::{Context, Result, bail};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use rtl_bridge::server::{ServerEvent, ViewServer};
use rtl_bridge::{BridgeConfig, DocumentBridge, NativeFs};

#[derive(Parser, Debug)]
#[command(name = "rtl-bridge")]
#[command(about = "Document bridge for the RTL/LTR text editor")]
struct Args {
    /// Path to the file to edit (created on first save if missing)
    #[arg(short, long)]
    file: PathBuf,

    /// Address to listen on for view connections
    #[arg(short, long, default_value = "127.0.0.1:8080")]
    listen: String,

    /// Do not watch the file for external changes
    #[arg(long)]
    no_watch: bool,

    /// Milliseconds the internal-save flag stays raised after a save
    #[arg(long)]
    save_grace_ms: Option<u64>,

    /// Minimum mtime advance, in milliseconds, for an external change
    #[arg(long)]
    guard_ms: Option<u64>,

    /// File watcher debounce in milliseconds
    #[arg(long)]
    debounce_ms: Option<u64>,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,
}

impl Args {
    /// Environment first, flags on top.
    fn config(&self) -> Result<BridgeConfig> {
        let mut config = BridgeConfig::from_env().context("Invalid bridge configuration")?;
        if let Some(ms) = self.save_grace_ms {
            config.save_grace = Duration::from_millis(ms);
        }
        if let Some(ms) = self.guard_ms {
            config.guard_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = self.debounce_ms {
            config.watch_debounce = Duration::from_millis(ms);
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging - respects RUST_LOG env var, defaults to info (or debug with --verbose)
    let default_filter = if args.verbose {
        "debug,rtl_bridge=debug,rtl_core=debug"
    } else {
        "info,rtl_bridge=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = args.config()?;

    let file = std::path::absolute(&args.file)
        .with_context(|| format!("Cannot resolve {}", args.file.display()))?;
    let (Some(root), Some(name)) = (file.parent(), file.file_name()) else {
        bail!("{} is not a file path", file.display());
    };
    let name = name.to_string_lossy().into_owned();

    info!("Starting rtl-bridge");
    info!("File: {}", file.display());
    info!("Listen address: {}", args.listen);
    info!(
        "Save grace {:?}, guard interval {:?}, watch debounce {:?}",
        config.save_grace, config.guard_interval, config.watch_debounce
    );

    let bridge = Arc::new(DocumentBridge::new(NativeFs::new(root.to_path_buf()), config));

    // Keep the document alive between views so they all share it
    let _document = bridge
        .load_document(&name)
        .await
        .with_context(|| format!("Failed to open {}", file.display()))?;

    let watch_path = if args.no_watch {
        info!("File watching disabled");
        None
    } else {
        Some(file.clone())
    };

    let mut server = ViewServer::new(Arc::clone(&bridge), name, watch_path);
    let listener = ViewServer::<NativeFs>::bind(&args.listen).await?;

    info!("Bridge running. Press Ctrl+C to stop.");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        server.accept_connection(stream, addr).await;
                    }
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                    }
                }
            }

            Some(event) = server.poll_event() => {
                match event {
                    ServerEvent::ViewClosed { view_id } => {
                        info!("View closed: {} ({} remaining)", view_id, server.view_count());
                    }
                }
            }

            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    info!("Shutting down");
    Ok(())
}
