use crate::auth_code::unspecified_for;
use crate::error::ClientError;
use shared::MAX_DATAGRAM_SIZE;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;

pub const PING_PAYLOAD: &[u8] = b"PING";

/// Pings the liveness echo and returns the round-trip time.
pub async fn ping(server: SocketAddr, timeout: Duration) -> Result<Duration, ClientError> {
    let socket = UdpSocket::bind(unspecified_for(server)).await?;
    let started = Instant::now();
    socket.send_to(PING_PAYLOAD, server).await?;

    let mut buffer = [0u8; MAX_DATAGRAM_SIZE];
    let len = tokio::time::timeout(timeout, async {
        loop {
            let (len, from) = socket.recv_from(&mut buffer).await?;
            if from == server {
                return Ok::<_, ClientError>(len);
            }
        }
    })
    .await
    .map_err(|_| ClientError::Timeout(timeout))??;

    if &buffer[..len] != PING_PAYLOAD {
        return Err(ClientError::Unexpected(format!(
            "echo returned {} bytes that do not match",
            len
        )));
    }
    Ok(started.elapsed())
}
