use crate::auth_code::unspecified_for;
use crate::error::ClientError;
use bincode::{deserialize, serialize};
use log::{debug, info, warn};
use shared::{Packet, SessionRequest, SessionResponse, MAX_DATAGRAM_SIZE, PROTOCOL_VERSION};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;

/// Scripted client for the session server
pub struct SessionClient {
    socket: UdpSocket,
    server_addr: SocketAddr,
    player_id: u32,
    sequence: u32,
    timeout: Duration,
}

impl SessionClient {
    /// Connects and waits for the server to assign a player id.
    pub async fn connect(server_addr: SocketAddr, timeout: Duration) -> Result<Self, ClientError> {
        let socket = UdpSocket::bind(unspecified_for(server_addr)).await?;
        info!("Connecting to server at {}...", server_addr);

        let mut client = SessionClient {
            socket,
            server_addr,
            player_id: 0,
            sequence: 0,
            timeout,
        };
        client
            .send_packet(&Packet::Connect {
                client_version: PROTOCOL_VERSION,
            })
            .await?;

        match client.recv_packet().await? {
            Packet::Connected { player_id } => {
                info!("Connected as player {}", player_id);
                client.player_id = player_id;
                Ok(client)
            }
            Packet::Disconnected { reason } => Err(ClientError::Disconnected(reason)),
            other => Err(ClientError::Unexpected(format!("{:?}", other))),
        }
    }

    pub fn player_id(&self) -> u32 {
        self.player_id
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ClientError> {
        Ok(self.socket.local_addr()?)
    }

    /// Sends `body` with the next sequence number and returns that number.
    pub async fn send_request(&mut self, body: &SessionRequest) -> Result<u32, ClientError> {
        self.sequence += 1;
        let packet = Packet::Request {
            sequence: self.sequence,
            payload: serialize(body)?,
        };
        self.send_packet(&packet).await?;
        debug!("Sent {} #{}", body.kind(), self.sequence);
        Ok(self.sequence)
    }

    /// Waits for the next response and the sequence number it acknowledges.
    pub async fn next_response(&mut self) -> Result<(u32, SessionResponse), ClientError> {
        loop {
            match self.recv_packet().await? {
                Packet::Data { ack, payload } => return Ok((ack, deserialize(&payload)?)),
                Packet::Disconnected { reason } => return Err(ClientError::Disconnected(reason)),
                other => warn!("Ignoring unexpected packet: {:?}", other),
            }
        }
    }

    /// Sends `body` and returns the first response to it.
    pub async fn call(&mut self, body: &SessionRequest) -> Result<SessionResponse, ClientError> {
        let sequence = self.send_request(body).await?;
        loop {
            let (ack, response) = self.next_response().await?;
            if ack >= sequence {
                return Ok(response);
            }
            debug!("Skipping response to earlier request #{}", ack);
        }
    }

    pub async fn disconnect(self) -> Result<(), ClientError> {
        self.send_packet(&Packet::Disconnect).await?;
        info!("Disconnected from {}", self.server_addr);
        Ok(())
    }

    async fn send_packet(&self, packet: &Packet) -> Result<(), ClientError> {
        let data = serialize(packet)?;
        self.socket.send_to(&data, self.server_addr).await?;
        Ok(())
    }

    async fn recv_packet(&self) -> Result<Packet, ClientError> {
        let mut buffer = [0u8; MAX_DATAGRAM_SIZE];
        let data = tokio::time::timeout(self.timeout, async {
            loop {
                let (len, from) = self.socket.recv_from(&mut buffer).await?;
                if from == self.server_addr {
                    return Ok::<_, ClientError>(buffer[..len].to_vec());
                }
                debug!("Ignoring datagram from {}", from);
            }
        })
        .await
        .map_err(|_| ClientError::Timeout(self.timeout))??;

        Ok(deserialize(&data)?)
    }
}
