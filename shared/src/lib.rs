use serde::{Deserialize, Serialize};

pub mod wire;

pub const PROTOCOL_VERSION: u32 = 1;
pub const MAX_DATAGRAM_SIZE: usize = 2048;

pub const DEFAULT_SESSION_PORT: u16 = 7777;
pub const DEFAULT_LAUNCHER_PING_PORT: u16 = 7778;
pub const DEFAULT_AUTH_CODE_PORT: u16 = 7779;
pub const DEFAULT_FIREWALL_CONTROL_PORT: u16 = 5000;

/// Session datagram exchanged between a client and the session server.
///
/// `Request` and `Data` carry bincode-encoded [`SessionRequest`] and
/// [`SessionResponse`] payloads respectively.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub enum Packet {
    Connect {
        client_version: u32,
    },
    Request {
        sequence: u32,
        payload: Vec<u8>,
    },
    Disconnect,

    Connected {
        player_id: u32,
    },
    Data {
        ack: u32,
        payload: Vec<u8>,
    },
    Disconnected {
        reason: String,
    },
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub enum SessionRequest {
    Login {
        login_name: String,
        password_hash: String,
        display_name: String,
        auth_code: Option<String>,
    },
    SetTag {
        tag: String,
    },
    Vote {
        choice: u32,
    },
    Chat {
        text: String,
    },
    ListServers,
    JoinServer {
        server: String,
    },
    LeaveServer,
    Logout,
}

impl SessionRequest {
    pub fn kind(&self) -> &'static str {
        match self {
            SessionRequest::Login { .. } => "login",
            SessionRequest::SetTag { .. } => "set_tag",
            SessionRequest::Vote { .. } => "vote",
            SessionRequest::Chat { .. } => "chat",
            SessionRequest::ListServers => "list_servers",
            SessionRequest::JoinServer { .. } => "join_server",
            SessionRequest::LeaveServer => "leave_server",
            SessionRequest::Logout => "logout",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ServerInfo {
    pub key: String,
    pub name: String,
    pub addr: String,
    /// Sessions currently bound to the server
    pub players: u32,
    pub max_players: u32,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub enum SessionResponse {
    LoginAccepted {
        player_id: u32,
        display_name: String,
        motd: String,
    },
    LoginRejected {
        reason: String,
    },
    TagChanged {
        tag: String,
    },
    VoteRecorded {
        choice: u32,
    },
    Notice {
        from: String,
        text: String,
    },
    ServerList {
        servers: Vec<ServerInfo>,
    },
    Joined {
        server: String,
        addr: String,
    },
    Left {
        server: String,
    },
    LoggedOut,
    Rejected {
        request: String,
        reason: String,
    },
}
