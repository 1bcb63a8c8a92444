use clap::Parser;
use client::network::ChatClient;
use env_logger::Env;
use log::info;
use tokio::io::BufReader;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:8080")]
    server: String,

    /// Name shown to other clients
    #[arg(short = 'n', long, default_value = "anonymous")]
    name: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    info!("Connecting to {} as '{}'", args.server, args.name);
    info!("Type a line to send it, /dir to list the server's directory");

    let client = ChatClient::connect(&args.server, args.name).await?;
    client
        .run(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
        .await?;

    Ok(())
}
