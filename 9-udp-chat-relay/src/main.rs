use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::UdpSocket;
use tracing::{error, info};

use udp_chat_relay::{
    cli::{Cli, Command, ServerArgs},
    client,
    relay::Relay,
};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    match Cli::parse().command {
        Command::Server(args) => serve(args).await,
        Command::Client(args) => client::run(args).await,
    }
}

async fn serve(args: ServerArgs) -> Result<()> {
    let socket = UdpSocket::bind(args.listen)
        .await
        .with_context(|| format!("failed to bind {}", args.listen))?;
    let relay = Relay::with_config(socket, args.relay_config());

    // The e2e test reads the address as the last word of this line.
    info!("relay listening on {}", relay.local_addr()?);
    relay
        .run_until_ctrl_c()
        .await
        .inspect_err(|err| error!("relay stopped: {err:#}"))
}
