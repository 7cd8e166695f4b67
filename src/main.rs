mod dap;
mod io;
mod logging;
mod session;
mod wire;

#[cfg(test)]
mod test_utils;

use clap::Parser;
use io::StreamTransport;
use logging::{FrontEndMode, LogConfig, init_logging};
use session::DebugSession;

use std::path::PathBuf;
use tokio::net::TcpListener;
use tracing::{error, info};

/// Debug adapter bridging DAP front ends to the ikp3db Python debugger
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Serve front ends on 127.0.0.1:<PORT>, one at a time, instead of stdin/stdout
    #[arg(long, value_name = "PORT")]
    port: Option<u16>,

    /// Log level (overrides RUST_LOG env var)
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Log file path (overrides IKPDB_DAP_LOG_FILE env var)
    #[arg(long, value_name = "FILE")]
    log_file: Option<PathBuf>,
}

/// Accept front-end connections and serve each to completion
async fn serve(port: u16, adapter_dir: PathBuf) -> std::io::Result<()> {
    let listener = TcpListener::bind(("127.0.0.1", port)).await?;
    info!("Waiting for front ends on {}", listener.local_addr()?);

    loop {
        let (stream, peer) = listener.accept().await?;
        info!("Front end connected from {}", peer);
        DebugSession::new(StreamTransport::from_tcp(stream), adapter_dir.clone())
            .run()
            .await;
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mode = FrontEndMode::from_port(args.port);
    let log_config = LogConfig::from_env().with_overrides(args.log_level, args.log_file);

    if let Err(e) = init_logging(log_config, mode) {
        eprintln!("Failed to initialize logging: {e}");
        std::process::exit(1);
    }

    let adapter_dir = std::env::current_dir().unwrap_or_else(|e| {
        eprintln!("Failed to get current directory: {e}");
        std::process::exit(1);
    });

    match mode {
        FrontEndMode::Tcp(port) => {
            if let Err(e) = serve(port, adapter_dir).await {
                error!("Front-end server failed: {}", e);
                return Err(e.into());
            }
        }
        FrontEndMode::Stdio => {
            info!("Waiting for a front end on stdin/stdout");
            DebugSession::new(StreamTransport::stdio(), adapter_dir)
                .run()
                .await;
        }
    }

    info!("ikpdb-dap shutting down");
    Ok(())
}
