//! Per-player outbound queue
//!
//! Each queued payload is tagged with the last request sequence number the
//! server had received from that player when the payload was queued. A writer
//! task drains the queue in order and wraps every entry into a
//! `Packet::Data` datagram.

use crate::error::SessionError;
use crate::player::PlayerId;
use bincode::serialize;
use log::{debug, error};
use shared::Packet;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub ack: u32,
    pub payload: Vec<u8>,
}

pub type OutboundReceiver = mpsc::UnboundedReceiver<Outbound>;

#[derive(Debug, Clone)]
pub struct OutboundQueue {
    player: PlayerId,
    tx: mpsc::UnboundedSender<Outbound>,
}

impl OutboundQueue {
    pub fn new(player: PlayerId) -> (Self, OutboundReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { player, tx }, rx)
    }

    /// Appends `payload` tagged with `ack`. Never blocks.
    pub fn push(&self, payload: Vec<u8>, ack: u32) -> Result<(), SessionError> {
        self.tx
            .send(Outbound { ack, payload })
            .map_err(|_| SessionError::QueueClosed(self.player))
    }
}

/// Spawns the task draining `rx` to `addr`. It finishes once every sender is
/// dropped and the queue is empty.
pub fn spawn_writer(
    player: PlayerId,
    addr: SocketAddr,
    socket: Arc<UdpSocket>,
    mut rx: OutboundReceiver,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut sent = 0u64;
        while let Some(outbound) = rx.recv().await {
            if let Err(e) = send_outbound(&socket, outbound, addr).await {
                error!("Failed to send to player {} at {}: {}", player, addr, e);
                continue;
            }
            sent += 1;
        }
        debug!("Writer for player {} finished after {} packets", player, sent);
    })
}

async fn send_outbound(
    socket: &UdpSocket,
    outbound: Outbound,
    addr: SocketAddr,
) -> Result<(), Box<dyn std::error::Error>> {
    let data = serialize(&Packet::Data {
        ack: outbound.ack,
        payload: outbound.payload,
    })?;
    socket.send_to(&data, addr).await?;
    Ok(())
}
