use crate::player::PlayerId;
use std::fmt;
use std::net::IpAddr;
use thiserror::Error;

/// Errors raised by the session machinery for a single player.
///
/// Every variant is scoped to one connection: the dispatcher turns them into
/// a forced disconnect of that player only.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no active state on state manager")]
    NoActiveState,

    #[error("state stack is empty")]
    EmptyStateStack,

    #[error("{controller} does not support {transition} transitions")]
    UnsupportedTransition {
        controller: &'static str,
        transition: &'static str,
    },

    #[error("player is not authenticated")]
    NotAuthenticated,

    #[error("game server {0} is full")]
    GameServerFull(String),

    #[error("unknown game server {0}")]
    UnknownGameServer(String),

    #[error("outbound queue for player {0} is closed")]
    QueueClosed(PlayerId),

    #[error("malformed request: {0}")]
    MalformedRequest(String),

    #[error("failed to encode response: {0}")]
    Encode(#[from] bincode::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Tcp,
    Udp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "TCP"),
            Protocol::Udp => write!(f, "UDP"),
        }
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("{protocol} port {port} on {addr} is already in use")]
    PortInUse {
        protocol: Protocol,
        addr: IpAddr,
        port: u16,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Maps a bind failure, singling out `AddrInUse` so operators can tell it
    /// apart from other OS errors.
    pub fn from_bind(err: std::io::Error, protocol: Protocol, addr: std::net::SocketAddr) -> Self {
        if err.kind() == std::io::ErrorKind::AddrInUse {
            TransportError::PortInUse {
                protocol,
                addr: addr.ip(),
                port: addr.port(),
            }
        } else {
            TransportError::Io(err)
        }
    }
}

#[derive(Debug, Error)]
pub enum FirewallError {
    #[error("failed to connect to firewall control at {addr}: {source}")]
    Connect {
        addr: std::net::SocketAddr,
        source: std::io::Error,
    },

    #[error("failed to send firewall rule: {0}")]
    Write(std::io::Error),

    #[error("firewall control only accepts IPv4 addresses, got {0}")]
    UnsupportedAddress(IpAddr),

    #[error("firewall delivery task has stopped")]
    Stopped,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse INI: {0}")]
    Ini(#[from] ini::ParseError),

    #[error("invalid value {value:?} for [{section}] {key}")]
    InvalidValue {
        section: String,
        key: String,
        value: String,
    },
}
