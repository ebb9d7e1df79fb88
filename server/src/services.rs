//! Process-wide collaborators shared by every session

use crate::auth_code::AuthCodes;
use crate::config::{GameServer, Settings};
use crate::error::SessionError;
use crate::firewall::{DisabledFirewall, FirewallGateway, WhitelistLeases};
use log::debug;
use shared::ServerInfo;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

#[derive(Debug)]
struct Listing {
    server: Arc<GameServer>,
    players: AtomicU32,
}

/// Game servers players may join, in configuration order
///
/// Also tracks how many sessions are bound to each server. A session reserves
/// a slot before it binds to a server and releases it when it leaves, so the
/// count never exceeds the server's `max_players`.
#[derive(Debug, Default)]
pub struct ServerDirectory {
    servers: Vec<Listing>,
}

impl ServerDirectory {
    pub fn new(servers: Vec<GameServer>) -> Self {
        Self {
            servers: servers
                .into_iter()
                .map(|server| Listing {
                    server: Arc::new(server),
                    players: AtomicU32::new(0),
                })
                .collect(),
        }
    }

    /// Looks a server up by key, or by display name ignoring case.
    pub fn find(&self, server: &str) -> Option<Arc<GameServer>> {
        self.servers
            .iter()
            .find(|l| l.server.key == server)
            .or_else(|| {
                self.servers
                    .iter()
                    .find(|l| l.server.name.eq_ignore_ascii_case(server))
            })
            .map(|l| Arc::clone(&l.server))
    }

    /// Server descriptions with their current player counts
    pub fn infos(&self) -> Vec<ServerInfo> {
        self.servers
            .iter()
            .map(|l| l.server.info(l.players.load(Ordering::Relaxed)))
            .collect()
    }

    /// Takes one slot on the server with `key`.
    ///
    /// Fails with `GameServerFull` when every slot is taken and with
    /// `UnknownGameServer` for a key that is not listed.
    pub fn reserve(&self, key: &str) -> Result<(), SessionError> {
        let listing = self.listing(key)?;
        let max = listing.server.max_players;
        listing
            .players
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |players| {
                (players < max).then_some(players + 1)
            })
            .map(|_| ())
            .map_err(|_| SessionError::GameServerFull(key.to_string()))
    }

    /// Gives back a slot taken with [`reserve`](Self::reserve).
    pub fn release(&self, key: &str) {
        let Ok(listing) = self.listing(key) else {
            debug!("Releasing slot on unknown game server {}", key);
            return;
        };
        let _ = listing
            .players
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |players| {
                players.checked_sub(1)
            });
    }

    /// Sessions currently bound to the server with `key`
    pub fn players(&self, key: &str) -> Option<u32> {
        self.listing(key)
            .ok()
            .map(|l| l.players.load(Ordering::Acquire))
    }

    fn listing(&self, key: &str) -> Result<&Listing, SessionError> {
        self.servers
            .iter()
            .find(|l| l.server.key == key)
            .ok_or_else(|| SessionError::UnknownGameServer(key.to_string()))
    }
}

/// Process-wide collaborators every session can reach
pub struct Services {
    pub firewall: Arc<dyn FirewallGateway>,
    pub directory: ServerDirectory,
    pub settings: Settings,
    pub auth_codes: AuthCodes,
    pub public_ip: Option<IpAddr>,
    /// Whitelist entries held by live sessions
    pub whitelist: WhitelistLeases,
}

impl Services {
    pub fn new(firewall: Arc<dyn FirewallGateway>) -> Self {
        Self {
            firewall,
            directory: ServerDirectory::default(),
            settings: Settings::default(),
            auth_codes: AuthCodes::new(),
            public_ip: None,
            whitelist: WhitelistLeases::new(),
        }
    }

    pub fn with_directory(mut self, directory: ServerDirectory) -> Self {
        self.directory = directory;
        self
    }

    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_auth_codes(mut self, auth_codes: AuthCodes) -> Self {
        self.auth_codes = auth_codes;
        self
    }

    pub fn with_public_ip(mut self, public_ip: Option<IpAddr>) -> Self {
        self.public_ip = public_ip;
        self
    }

    /// Whitelists `player_ip` for `server_ip` unless another session already did.
    pub fn grant_whitelist(&self, player_ip: IpAddr, server_ip: Option<IpAddr>) {
        self.whitelist
            .acquire(self.firewall.as_ref(), player_ip, server_ip);
    }

    /// Lifts the whitelist entry once no other session holds it.
    pub fn revoke_whitelist(&self, player_ip: IpAddr, server_ip: Option<IpAddr>) {
        self.whitelist
            .release(self.firewall.as_ref(), player_ip, server_ip);
    }
}

impl Default for Services {
    fn default() -> Self {
        Self::new(Arc::new(DisabledFirewall))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn directory() -> ServerDirectory {
        ServerDirectory::new(vec![
            GameServer {
                key: "alpha".to_string(),
                name: "Alpha Arena".to_string(),
                addr: "10.0.0.2:7800".parse().unwrap(),
                max_players: 8,
            },
            GameServer {
                key: "beta".to_string(),
                name: "Beta".to_string(),
                addr: "10.0.0.3:7801".parse().unwrap(),
                max_players: 4,
            },
        ])
    }

    #[test]
    fn test_find_by_key_or_name() {
        let directory = directory();

        assert_eq!(directory.find("alpha").unwrap().key, "alpha");
        assert_eq!(directory.find("alpha arena").unwrap().key, "alpha");
        assert_eq!(directory.find("BETA").unwrap().key, "beta");
        assert!(directory.find("gamma").is_none());
    }

    #[test]
    fn test_infos_keep_order() {
        let infos = directory().infos();

        assert_eq!(infos.len(), 2);
        assert_eq!(infos[0].key, "alpha");
        assert_eq!(infos[0].addr, "10.0.0.2:7800");
        assert_eq!(infos[1].max_players, 4);
        assert_eq!(infos[1].players, 0);
    }

    #[test]
    fn test_reserve_stops_at_max_players() {
        let directory = directory();

        for _ in 0..4 {
            directory.reserve("beta").unwrap();
        }
        assert!(matches!(
            directory.reserve("beta"),
            Err(SessionError::GameServerFull(key)) if key == "beta"
        ));
        assert_eq!(directory.players("beta"), Some(4));

        directory.release("beta");
        assert_eq!(directory.players("beta"), Some(3));
        directory.reserve("beta").unwrap();
        assert_eq!(directory.infos()[1].players, 4);
    }

    #[test]
    fn test_release_never_underflows() {
        let directory = directory();

        directory.release("alpha");
        directory.release("gamma");

        assert_eq!(directory.players("alpha"), Some(0));
        assert!(matches!(
            directory.reserve("gamma"),
            Err(SessionError::UnknownGameServer(_))
        ));
    }
}
