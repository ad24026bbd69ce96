//! Gateway - TCP listener that accepts incoming command connections.
//!
//! The Gateway binds to a socket and spawns one task per incoming
//! connection. Each connection carries exactly one command.

use crate::network::connection;
use crate::store::IpStore;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, instrument, warn};

/// Accepts incoming TCP connections and spawns command handlers.
pub struct Gateway {
    listener: TcpListener,
    store: Arc<IpStore>,
}

impl Gateway {
    /// Bind the gateway to `0.0.0.0:port`. Port 0 picks an ephemeral port.
    pub async fn bind(port: u16, store: Arc<IpStore>) -> std::io::Result<Self> {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        let listener = TcpListener::bind(addr).await?;
        info!(addr = %listener.local_addr()?, "gateway listening");
        Ok(Self { listener, store })
    }

    /// The address the gateway actually bound.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Run the gateway, accepting connections forever.
    #[instrument(skip(self), name = "gateway")]
    pub async fn run(self) -> std::io::Result<()> {
        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    let store = Arc::clone(&self.store);
                    tokio::spawn(async move {
                        if let Err(e) = connection::handle(stream, addr, store).await {
                            warn!(%addr, error = %e, "connection dropped");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "failed to accept connection");
                }
            }
        }
    }
}
