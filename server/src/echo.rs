use crate::error::{Protocol, TransportError};
use log::{debug, info, warn};
use shared::MAX_DATAGRAM_SIZE;
use std::net::SocketAddr;
use tokio::net::UdpSocket;
use tokio::sync::watch;

/// Launcher reachability check: echoes every datagram back to its sender
pub struct LivenessEcho {
    socket: UdpSocket,
}

impl LivenessEcho {
    pub async fn bind(addr: SocketAddr) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|e| TransportError::from_bind(e, Protocol::Udp, addr))?;
        info!("Liveness echo listening on {}", addr);
        Ok(Self { socket })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.socket.local_addr()?)
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut buffer = [0u8; MAX_DATAGRAM_SIZE];

        loop {
            tokio::select! {
                result = self.socket.recv_from(&mut buffer) => {
                    match result {
                        Ok((len, addr)) => {
                            if let Err(e) = self.socket.send_to(&buffer[..len], addr).await {
                                warn!("Failed to echo to {}: {}", addr, e);
                            } else {
                                debug!("Echoed {} bytes to {}", len, addr);
                            }
                        }
                        Err(e) => warn!("Liveness echo receive error: {}", e),
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Liveness echo shutting down");
                        break;
                    }
                }
            }
        }
    }
}
