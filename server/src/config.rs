//! Server configuration
//!
//! Two files feed the server:
//! - an INI file with the `[lobby]` and `[firewall]` sections plus one
//!   `[server.<key>]` section per game-server instance
//! - a JSON settings file mapping integer setting ids to values
//!
//! A missing file of either kind falls back to built-in defaults. Settings are
//! never fatal; an INI value that does not parse is reported with its section
//! and key.

use crate::controller::ControllerKind;
use crate::error::ConfigError;
use ini::{Ini, Properties};
use log::{info, warn};
use shared::{ServerInfo, DEFAULT_AUTH_CODE_PORT, DEFAULT_FIREWALL_CONTROL_PORT};
use shared::{DEFAULT_LAUNCHER_PING_PORT, DEFAULT_SESSION_PORT};
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

const SERVER_SECTION_PREFIX: &str = "server.";

#[derive(Debug, Clone, PartialEq)]
pub struct LobbyConfig {
    pub host: IpAddr,
    pub port: u16,
    /// Address players see for this host; used as the server side of login rules
    pub public_ip: Option<IpAddr>,
    pub launcher_ping_port: u16,
    pub auth_code_port: u16,
    pub max_players: usize,
    pub controller: ControllerKind,
    pub idle_timeout: Duration,
}

impl Default for LobbyConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_SESSION_PORT,
            public_ip: None,
            launcher_ping_port: DEFAULT_LAUNCHER_PING_PORT,
            auth_code_port: DEFAULT_AUTH_CODE_PORT,
            max_players: 64,
            controller: ControllerKind::Stack,
            idle_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FirewallConfig {
    pub enabled: bool,
    pub control_addr: SocketAddr,
    pub connect_timeout: Duration,
}

impl Default for FirewallConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            control_addr: SocketAddr::new(
                IpAddr::V4(Ipv4Addr::LOCALHOST),
                DEFAULT_FIREWALL_CONTROL_PORT,
            ),
            connect_timeout: Duration::from_millis(500),
        }
    }
}

/// One game-server instance players can be sent to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameServer {
    pub key: String,
    pub name: String,
    pub addr: SocketAddr,
    pub max_players: u32,
}

impl GameServer {
    /// Describes the server for a `ServerList` reply, with `players` bound to it.
    pub fn info(&self, players: u32) -> ServerInfo {
        ServerInfo {
            key: self.key.clone(),
            name: self.name.clone(),
            addr: self.addr.to_string(),
            players,
            max_players: self.max_players,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerConfig {
    pub lobby: LobbyConfig,
    pub firewall: FirewallConfig,
    pub servers: Vec<GameServer>,
}

impl ServerConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Config {} not found, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.display().to_string(),
                    source,
                })
            }
        };

        let config = Self::from_ini_str(&text)?;
        info!(
            "Loaded {} with {} game server(s)",
            path.display(),
            config.servers.len()
        );
        Ok(config)
    }

    pub fn from_ini_str(text: &str) -> Result<Self, ConfigError> {
        let ini = Ini::load_from_str(text)?;
        let mut config = Self::default();

        if let Some(lobby) = ini.section(Some("lobby")) {
            let defaults = LobbyConfig::default();
            config.lobby = LobbyConfig {
                host: value(lobby, "lobby", "host", defaults.host)?,
                port: value(lobby, "lobby", "port", defaults.port)?,
                public_ip: optional(lobby, "lobby", "public_ip")?,
                launcher_ping_port: value(
                    lobby,
                    "lobby",
                    "launcher_ping_port",
                    defaults.launcher_ping_port,
                )?,
                auth_code_port: value(lobby, "lobby", "auth_code_port", defaults.auth_code_port)?,
                max_players: value(lobby, "lobby", "max_players", defaults.max_players)?,
                controller: value(lobby, "lobby", "controller", defaults.controller)?,
                idle_timeout: Duration::from_secs(value(
                    lobby,
                    "lobby",
                    "idle_timeout_secs",
                    defaults.idle_timeout.as_secs(),
                )?),
            };
        }

        if let Some(firewall) = ini.section(Some("firewall")) {
            let defaults = FirewallConfig::default();
            config.firewall = FirewallConfig {
                enabled: value(firewall, "firewall", "enabled", defaults.enabled)?,
                control_addr: value(firewall, "firewall", "control_addr", defaults.control_addr)?,
                connect_timeout: Duration::from_millis(value(
                    firewall,
                    "firewall",
                    "connect_timeout_ms",
                    defaults.connect_timeout.as_millis() as u64,
                )?),
            };
        }

        for (section, props) in ini.iter() {
            let Some(key) = section.and_then(|s| s.strip_prefix(SERVER_SECTION_PREFIX)) else {
                continue;
            };
            let section = format!("{}{}", SERVER_SECTION_PREFIX, key);

            let ip: IpAddr = required(props, &section, "ip")?;
            let port: u16 = required(props, &section, "port")?;
            config.servers.push(GameServer {
                key: key.to_string(),
                name: props.get("name").unwrap_or(key).to_string(),
                addr: SocketAddr::new(ip, port),
                max_players: value(props, &section, "max_players", 16)?,
            });
        }

        Ok(config)
    }

    pub fn session_addr(&self) -> SocketAddr {
        SocketAddr::new(self.lobby.host, self.lobby.port)
    }

    pub fn launcher_ping_addr(&self) -> SocketAddr {
        SocketAddr::new(self.lobby.host, self.lobby.launcher_ping_port)
    }

    pub fn auth_code_addr(&self) -> SocketAddr {
        SocketAddr::new(self.lobby.host, self.lobby.auth_code_port)
    }
}

fn parse<T: FromStr>(section: &str, key: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
        section: section.to_string(),
        key: key.to_string(),
        value: raw.to_string(),
    })
}

fn value<T: FromStr>(
    props: &Properties,
    section: &str,
    key: &str,
    default: T,
) -> Result<T, ConfigError> {
    match props.get(key) {
        Some(raw) => parse(section, key, raw),
        None => Ok(default),
    }
}

fn optional<T: FromStr>(
    props: &Properties,
    section: &str,
    key: &str,
) -> Result<Option<T>, ConfigError> {
    props.get(key).map(|raw| parse(section, key, raw)).transpose()
}

fn required<T: FromStr>(props: &Properties, section: &str, key: &str) -> Result<T, ConfigError> {
    let raw = props.get(key).ok_or_else(|| ConfigError::InvalidValue {
        section: section.to_string(),
        key: key.to_string(),
        value: String::new(),
    })?;
    parse(section, key, raw)
}

/// Numeric ids used as keys in the settings file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum SettingId {
    Motd = 1,
    AuthCodeLength = 2,
    RequireAuthCode = 3,
    MalformedLimit = 4,
    MaxTagLength = 5,
    AuthCodeTtlSecs = 6,
    MaxAuthCodes = 7,
}

impl SettingId {
    pub fn from_id(id: u32) -> Option<Self> {
        match id {
            1 => Some(SettingId::Motd),
            2 => Some(SettingId::AuthCodeLength),
            3 => Some(SettingId::RequireAuthCode),
            4 => Some(SettingId::MalformedLimit),
            5 => Some(SettingId::MaxTagLength),
            6 => Some(SettingId::AuthCodeTtlSecs),
            7 => Some(SettingId::MaxAuthCodes),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub motd: String,
    pub auth_code_length: usize,
    pub require_auth_code: bool,
    /// Malformed requests tolerated per player before a kick; 0 disables the limit
    pub malformed_limit: u32,
    pub max_tag_length: usize,
    /// How long an issued auth code stays redeemable
    pub auth_code_ttl: Duration,
    /// Outstanding auth codes kept at once; the oldest is dropped beyond this
    pub max_auth_codes: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            motd: "Welcome!".to_string(),
            auth_code_length: 8,
            require_auth_code: false,
            malformed_limit: 10,
            max_tag_length: 4,
            auth_code_ttl: Duration::from_secs(300),
            max_auth_codes: 1024,
        }
    }
}

impl Settings {
    /// Loads settings, falling back to defaults on any problem.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(text) => Self::from_json_str(&text),
            Err(e) => {
                warn!(
                    "Settings {} unavailable ({}), using defaults",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    pub fn from_json_str(text: &str) -> Self {
        let mut settings = Self::default();

        let entries: HashMap<String, serde_json::Value> = match serde_json::from_str(text) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Invalid settings JSON ({}), using defaults", e);
                return settings;
            }
        };

        for (raw_id, value) in entries {
            let Some(id) = raw_id.trim().parse().ok().and_then(SettingId::from_id) else {
                warn!("Ignoring unknown setting id {:?}", raw_id);
                continue;
            };
            if !settings.apply(id, &value) {
                warn!("Ignoring setting {} with unexpected value {}", raw_id, value);
            }
        }

        settings
    }

    fn apply(&mut self, id: SettingId, value: &serde_json::Value) -> bool {
        match id {
            SettingId::Motd => value.as_str().map(|v| self.motd = v.to_string()).is_some(),
            SettingId::AuthCodeLength => match value.as_u64() {
                Some(len @ 1..=64) => {
                    self.auth_code_length = len as usize;
                    true
                }
                _ => false,
            },
            SettingId::RequireAuthCode => value
                .as_bool()
                .map(|v| self.require_auth_code = v)
                .is_some(),
            SettingId::MalformedLimit => value
                .as_u64()
                .and_then(|v| u32::try_from(v).ok())
                .map(|v| self.malformed_limit = v)
                .is_some(),
            SettingId::MaxTagLength => value
                .as_u64()
                .map(|v| self.max_tag_length = v as usize)
                .is_some(),
            SettingId::AuthCodeTtlSecs => match value.as_u64() {
                Some(secs @ 1..) => {
                    self.auth_code_ttl = Duration::from_secs(secs);
                    true
                }
                _ => false,
            },
            SettingId::MaxAuthCodes => match value.as_u64() {
                Some(max @ 1..) => {
                    self.max_auth_codes = max as usize;
                    true
                }
                _ => false,
            },
        }
    }
}
