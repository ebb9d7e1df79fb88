use shared::wire::WireError;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("bad frame: {0}")]
    Wire(#[from] WireError),

    #[error("failed to encode or decode packet: {0}")]
    Codec(#[from] bincode::Error),

    #[error("no reply within {0:?}")]
    Timeout(Duration),

    #[error("disconnected by server: {0}")]
    Disconnected(String),

    #[error("unexpected reply: {0}")]
    Unexpected(String),
}
