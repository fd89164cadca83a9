//! Control-plane listener
//!
//! Accepts loopback connections and spawns one handler task per
//! connection. A single connection failing never takes the accept loop
//! down; failing to bind at startup is fatal for the daemon.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::dispatch::handler;
use crate::error::NodeError;
use crate::state::NodeState;

/// Loopback listener for session lifecycle requests
pub struct ControlListener {
    listener: TcpListener,
    state: Arc<NodeState>,
}

impl ControlListener {
    /// Bind the control listener at the configured loopback port
    pub async fn bind(state: Arc<NodeState>) -> Result<Self, NodeError> {
        let address = state.config.control_address();
        let listener = TcpListener::bind(&address).await?;
        tracing::info!("Control listener on {}", address);
        Ok(Self { listener, state })
    }

    /// Address the listener actually bound to
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept loop; runs until cancelled
    pub async fn run(self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        let state = Arc::clone(&self.state);
                        tokio::spawn(async move {
                            if let Err(e) = handler::handle_control(state, stream).await {
                                tracing::warn!("Control connection error: {}", e);
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!("Failed to accept control connection: {}", e);
                    }
                },
            }
        }
    }
}
