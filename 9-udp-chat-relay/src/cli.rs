use std::{
    net::{Ipv4Addr, Ipv6Addr, SocketAddr},
    time::Duration,
};

use clap::{Args, Parser, Subcommand};

use crate::relay::RelayConfig;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the chat relay on a UDP socket.
    Server(ServerArgs),
    /// Join a relay and chat from the terminal.
    Client(ClientArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServerArgs {
    /// Socket address the relay should bind to. Use port 0 for an ephemeral port.
    #[arg(long, default_value = "0.0.0.0:5000")]
    pub listen: SocketAddr,

    /// Forget participants that have sent nothing for this many seconds.
    #[arg(long)]
    pub idle_timeout_secs: Option<u64>,
}

impl ServerArgs {
    pub fn relay_config(&self) -> RelayConfig {
        match self.idle_timeout_secs {
            Some(secs) => RelayConfig::with_idle_timeout(Duration::from_secs(secs)),
            None => RelayConfig::default(),
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Display name announced to the relay.
    #[arg(long)]
    pub name: String,

    /// Address of the relay.
    #[arg(long, default_value = "127.0.0.1:5000")]
    pub server: SocketAddr,

    /// Local address to send from. Defaults to an ephemeral port on the
    /// unspecified address of the relay's family.
    #[arg(long)]
    pub bind: Option<SocketAddr>,
}

impl ClientArgs {
    pub fn bind_addr(&self) -> SocketAddr {
        self.bind.unwrap_or_else(|| match self.server {
            SocketAddr::V4(_) => SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
            SocketAddr::V6(_) => SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0)),
        })
    }
}
