use crate::error::ClientError;
use log::debug;
use shared::wire::{decode_auth_reply, encode_auth_request};
use shared::MAX_DATAGRAM_SIZE;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;
use tokio::net::UdpSocket;

/// Requests a one-time auth code for `username` from a fresh local socket.
pub async fn request_auth_code(
    server: SocketAddr,
    username: &str,
    timeout: Duration,
) -> Result<String, ClientError> {
    let socket = UdpSocket::bind(unspecified_for(server)).await?;
    request_auth_code_with(&socket, server, username, timeout).await
}

/// Sends the request from `socket` and waits for the reply.
///
/// Datagrams from any address other than `server` are skipped; only the first
/// reply from the exact server address counts.
pub async fn request_auth_code_with(
    socket: &UdpSocket,
    server: SocketAddr,
    username: &str,
    timeout: Duration,
) -> Result<String, ClientError> {
    let request = encode_auth_request(username)?;
    socket.send_to(&request, server).await?;

    let mut buffer = [0u8; MAX_DATAGRAM_SIZE];
    let reply = tokio::time::timeout(timeout, async {
        loop {
            let (len, from) = socket.recv_from(&mut buffer).await?;
            if from == server {
                return Ok::<_, ClientError>(buffer[..len].to_vec());
            }
            debug!("Ignoring {} bytes from {} while waiting for {}", len, from, server);
        }
    })
    .await
    .map_err(|_| ClientError::Timeout(timeout))??;

    Ok(decode_auth_reply(&reply)?)
}

pub(crate) fn unspecified_for(addr: SocketAddr) -> SocketAddr {
    match addr {
        SocketAddr::V4(_) => SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
        SocketAddr::V6(_) => SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0)),
    }
}
