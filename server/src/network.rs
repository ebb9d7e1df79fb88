//! Session server: UDP transport in front of the player tasks
//!
//! The receive loop only decodes datagrams and routes them. A `Connect`
//! creates a player and spawns its task; every other packet is forwarded as a
//! [`PlayerEvent`] to the task owning the sender's address.

use crate::config::LobbyConfig;
use crate::controller::ControllerKind;
use crate::dispatcher::PlayerTask;
use crate::error::{Protocol, TransportError};
use crate::outbound::{spawn_writer, OutboundQueue};
use crate::player::{Player, Session};
use crate::registry::{ConnectionRegistry, PlayerEvent, SharedRegistry};
use crate::services::Services;
use crate::states::initial_states;
use bincode::{deserialize, serialize};
use log::{debug, error, info, warn};
use shared::{Packet, MAX_DATAGRAM_SIZE, PROTOCOL_VERSION};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;

/// Requests buffered per player before new ones are dropped
const PLAYER_EVENT_CAPACITY: usize = 64;

pub struct SessionServer {
    socket: Arc<UdpSocket>,
    registry: SharedRegistry,
    services: Arc<Services>,
    controller: ControllerKind,
    idle_timeout: Duration,
    players: JoinSet<()>,
}

impl SessionServer {
    pub async fn bind(
        addr: SocketAddr,
        lobby: &LobbyConfig,
        services: Arc<Services>,
    ) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|e| TransportError::from_bind(e, Protocol::Udp, addr))?;
        info!(
            "Session server listening on {} ({} controller, {} players max)",
            addr, lobby.controller, lobby.max_players
        );

        Ok(Self {
            socket: Arc::new(socket),
            registry: ConnectionRegistry::shared(lobby.max_players),
            services,
            controller: lobby.controller,
            idle_timeout: lobby.idle_timeout,
            players: JoinSet::new(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.socket.local_addr()?)
    }

    pub fn registry(&self) -> SharedRegistry {
        Arc::clone(&self.registry)
    }

    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut buffer = [0u8; MAX_DATAGRAM_SIZE];

        loop {
            tokio::select! {
                result = self.socket.recv_from(&mut buffer) => {
                    match result {
                        Ok((len, addr)) => self.handle_datagram(&buffer[..len], addr).await,
                        Err(e) => {
                            error!("Error receiving packet: {}", e);
                            tokio::time::sleep(Duration::from_millis(10)).await;
                        }
                    }
                }
                Some(result) = self.players.join_next(), if !self.players.is_empty() => {
                    if let Err(e) = result {
                        error!("Player task failed: {}", e);
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        self.close_all().await;
    }

    async fn handle_datagram(&mut self, data: &[u8], addr: SocketAddr) {
        match deserialize::<Packet>(data) {
            Ok(packet) => self.handle_packet(packet, addr).await,
            Err(_) => {
                let handle = self.registry.read().await.find_by_addr(addr).cloned();
                match handle {
                    Some(handle) => {
                        let _ = handle.events.try_send(PlayerEvent::Malformed);
                    }
                    None => warn!("Failed to deserialize packet from {}", addr),
                }
            }
        }
    }

    async fn handle_packet(&mut self, packet: Packet, addr: SocketAddr) {
        match packet {
            Packet::Connect { client_version } => self.connect(client_version, addr).await,

            Packet::Request { sequence, payload } => {
                self.forward(addr, PlayerEvent::Request { sequence, payload })
                    .await
            }

            Packet::Disconnect => {
                self.forward(
                    addr,
                    PlayerEvent::Close {
                        reason: "Client disconnected".to_string(),
                        notify: false,
                    },
                )
                .await
            }

            _ => warn!("Unexpected packet type from client at {}", addr),
        }
    }

    async fn connect(&mut self, client_version: u32, addr: SocketAddr) {
        info!(
            "Client connecting from {} (version: {})",
            addr, client_version
        );

        if client_version != PROTOCOL_VERSION {
            self.send_packet(
                &Packet::Disconnected {
                    reason: format!(
                        "Version mismatch: server speaks {}, client {}",
                        PROTOCOL_VERSION, client_version
                    ),
                },
                addr,
            )
            .await;
            return;
        }

        let (events_tx, events_rx) = mpsc::channel(PLAYER_EVENT_CAPACITY);
        let id = {
            let mut registry = self.registry.write().await;

            // A reconnect from the same address replaces the old session
            let existing = registry.find_by_addr(addr).map(|handle| handle.id);
            if let Some(existing) = existing {
                info!("Replacing player {} from {}", existing, addr);
                if let Some(handle) = registry.remove(existing) {
                    let _ = handle.events.try_send(PlayerEvent::Close {
                        reason: "Replaced by a new connection".to_string(),
                        notify: false,
                    });
                }
            }

            registry.register(addr, events_tx)
        };

        let Some(id) = id else {
            self.send_packet(
                &Packet::Disconnected {
                    reason: "Server full".to_string(),
                },
                addr,
            )
            .await;
            return;
        };

        self.send_packet(&Packet::Connected { player_id: id.0 }, addr)
            .await;

        let (outbound, outbound_rx) = OutboundQueue::new(id);
        let writer = spawn_writer(id, addr, Arc::clone(&self.socket), outbound_rx);
        let session = Session::new(
            id,
            addr,
            self.controller,
            outbound,
            Arc::clone(&self.services),
        );
        let mut player = Player::new(session);
        player.set_controller(self.controller, initial_states(self.controller));

        let task = PlayerTask::new(
            player,
            events_rx,
            Arc::clone(&self.registry),
            Arc::clone(&self.socket),
            writer,
            self.idle_timeout,
        );
        self.players.spawn(task.run());
    }

    async fn forward(&self, addr: SocketAddr, event: PlayerEvent) {
        let handle = self.registry.read().await.find_by_addr(addr).cloned();
        let Some(handle) = handle else {
            debug!("Dropping packet from unknown address {}", addr);
            return;
        };

        match handle.events.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("Player {} is falling behind, dropping request", handle.id)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("Player {} is already shutting down", handle.id)
            }
        }
    }

    async fn send_packet(&self, packet: &Packet, addr: SocketAddr) {
        if let Err(e) = Self::send_packet_impl(&self.socket, packet, addr).await {
            error!("Failed to send packet to {}: {}", addr, e);
        }
    }

    async fn send_packet_impl(
        socket: &UdpSocket,
        packet: &Packet,
        addr: SocketAddr,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let data = serialize(packet)?;
        socket.send_to(&data, addr).await?;
        Ok(())
    }

    /// Closes every session and waits for the exit hooks to finish.
    async fn close_all(&mut self) {
        let handles = self.registry.read().await.handles();
        info!("Session server shutting down, closing {} session(s)", handles.len());

        for handle in handles {
            let _ = handle
                .events
                .send(PlayerEvent::Close {
                    reason: "Server shutting down".to_string(),
                    notify: true,
                })
                .await;
        }

        while let Some(result) = self.players.join_next().await {
            if let Err(e) = result {
                error!("Player task failed: {}", e);
            }
        }
    }
}
