use clap::Parser;
use env_logger::Env;
use log::{error, info};
use server::commands::CommandTable;
use server::config::{OverflowPolicy, ServerConfig};
use server::network::Server;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser, Debug)]
#[command(author, version, about = "Relays messages between connected clients", long_about = None)]
struct Args {
    /// Port to listen on
    port: u16,

    /// Runtime worker threads for connection I/O
    worker_threads: usize,

    /// Address to bind to
    #[arg(short = 'H', long, default_value = "0.0.0.0")]
    host: IpAddr,

    /// Concurrent command workers
    #[arg(long, default_value = "1")]
    command_workers: usize,

    /// Frames a client may have waiting before the overflow policy applies
    #[arg(long)]
    max_queued_frames: Option<usize>,

    /// What to do with a client whose queue is full
    #[arg(long, value_enum, default_value_t = OverflowPolicy::Disconnect)]
    overflow_policy: OverflowPolicy,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    if args.worker_threads == 0 {
        return Err("worker thread count must be at least 1".into());
    }

    let config = ServerConfig {
        worker_threads: args.worker_threads,
        command_workers: args.command_workers,
        max_queued_frames: args.max_queued_frames,
        overflow_policy: args.overflow_policy,
        ..ServerConfig::new(SocketAddr::new(args.host, args.port))
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.worker_threads)
        .enable_all()
        .build()?;

    let result = runtime.block_on(serve(config));
    runtime.shutdown_timeout(Duration::from_secs(1));
    result
}

async fn serve(config: ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    info!(
        "Starting relay with {} worker threads and {} command workers",
        config.worker_threads, config.command_workers
    );
    let server = Server::bind(config, CommandTable::with_defaults()).await?;
    info!("Press Enter to stop the server");

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();

    tokio::select! {
        _ = server.run() => {}
        line = stdin.next_line() => {
            if let Err(e) = line {
                error!("Failed to read stdin: {}", e);
            }
            info!("Stop requested, shutting down...");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
    }

    server.dispatcher().shutdown().await;
    Ok(())
}
