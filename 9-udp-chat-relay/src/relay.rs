use std::{future::Future, io, net::SocketAddr, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use tokio::{
    net::UdpSocket,
    select,
    time::{self, MissedTickBehavior},
};
use tracing::{info, warn};

use crate::{
    registry::Registry,
    router::{Outbound, Router},
    transport::{RECEIVE_BUFFER_LEN, Transport},
};

const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(5);
const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    /// Evict endpoints silent for this long. `None` keeps every entry for the
    /// lifetime of the process.
    pub idle_timeout: Option<Duration>,
    /// How often idle entries are looked for when `idle_timeout` is set.
    pub sweep_interval: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            idle_timeout: None,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}

impl RelayConfig {
    pub fn with_idle_timeout(idle_timeout: Duration) -> Self {
        Self {
            idle_timeout: Some(idle_timeout),
            sweep_interval: (idle_timeout / 2).clamp(MIN_SWEEP_INTERVAL, DEFAULT_SWEEP_INTERVAL),
        }
    }
}

/// The chat relay: one socket, one receive loop, one router.
///
/// Each datagram is routed and its replies sent before the next receive, so
/// the router never sees two messages at once.
pub struct Relay {
    transport: Transport,
    router: Router,
    config: RelayConfig,
}

impl Relay {
    pub fn new(socket: UdpSocket) -> Self {
        Self::with_config(socket, RelayConfig::default())
    }

    pub fn with_config(socket: UdpSocket, config: RelayConfig) -> Self {
        Self {
            transport: Transport::new(socket),
            router: Router::new(Arc::new(Registry::new())),
            config,
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.transport.local_addr()
    }

    /// Shared handle for readers outside the receive loop.
    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(self.router.registry())
    }

    /// Runs until `shutdown` resolves. A receive error ends the loop with an error.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Relay {
            transport,
            router,
            config,
        } = self;
        tokio::pin!(shutdown);

        let mut buffer = vec![0u8; RECEIVE_BUFFER_LEN];
        let mut sweep = time::interval(config.sweep_interval.max(MIN_SWEEP_INTERVAL));
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            select! {
                _ = &mut shutdown => {
                    handle_shutdown(&transport, &router).await;
                    break;
                }
                received = transport.recv_from(&mut buffer) => {
                    let (len, peer) = received.context("failed to receive datagram")?;
                    let outbound = router.route_datagram(peer, &buffer[..len]);
                    deliver_all(&transport, &outbound).await;
                }
                _ = sweep.tick(), if config.idle_timeout.is_some() => {
                    if let Some(idle_timeout) = config.idle_timeout {
                        deliver_all(&transport, &router.evict_idle(idle_timeout)).await;
                    }
                }
            }
        }

        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

async fn handle_shutdown(transport: &Transport, router: &Router) {
    info!("relay shutting down");
    deliver_all(transport, &router.shutdown_notice()).await;
}

async fn deliver_all(transport: &Transport, outbound: &[Outbound]) {
    for message in outbound {
        transport.deliver(message).await;
    }
}
