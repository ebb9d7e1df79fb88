//! Connection registry for the session server
//!
//! This module owns the process-wide mapping of connected players:
//! - player id allocation and capacity limits
//! - address to player lookup for incoming datagrams
//! - the event channel feeding each player's task
//!
//! The registry never touches a player's states directly. Everything a player
//! does happens inside its own task; the registry only knows how to reach it.

use crate::player::PlayerId;
use log::info;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, RwLock};

pub type SharedRegistry = Arc<RwLock<ConnectionRegistry>>;

/// Events delivered to a player's task, in arrival order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerEvent {
    /// A request datagram, still encoded
    Request { sequence: u32, payload: Vec<u8> },
    /// A datagram from this player's address that did not decode as a packet
    Malformed,
    /// Ends the session. With `notify` the client is told why.
    Close { reason: String, notify: bool },
}

/// How the receive loop reaches one connected player
#[derive(Debug, Clone)]
pub struct PlayerHandle {
    pub id: PlayerId,
    pub addr: SocketAddr,
    pub events: mpsc::Sender<PlayerEvent>,
    pub connected_at: Instant,
}

impl PlayerHandle {
    pub fn connected_for(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

/// Tracks every connected player
///
/// Ids start at 1 and are never reused while the process runs, so a task
/// removing its own id can never evict a newer player.
pub struct ConnectionRegistry {
    players: HashMap<PlayerId, PlayerHandle>,
    by_addr: HashMap<SocketAddr, PlayerId>,
    next_id: u32,
    max_players: usize,
}

impl ConnectionRegistry {
    pub fn new(max_players: usize) -> Self {
        Self {
            players: HashMap::new(),
            by_addr: HashMap::new(),
            next_id: 1,
            max_players,
        }
    }

    pub fn shared(max_players: usize) -> SharedRegistry {
        Arc::new(RwLock::new(Self::new(max_players)))
    }

    /// Registers a player reachable through `events`.
    ///
    /// Returns None when the server is full. The caller removes any previous
    /// player on the same address first.
    pub fn register(
        &mut self,
        addr: SocketAddr,
        events: mpsc::Sender<PlayerEvent>,
    ) -> Option<PlayerId> {
        if self.is_full() {
            return None;
        }

        let id = PlayerId(self.next_id);
        self.next_id += 1;

        self.by_addr.insert(addr, id);
        self.players.insert(
            id,
            PlayerHandle {
                id,
                addr,
                events,
                connected_at: Instant::now(),
            },
        );
        info!("Player {} connected from {}", id, addr);
        Some(id)
    }

    /// Removes a player. Returns the handle if it was still registered.
    pub fn remove(&mut self, id: PlayerId) -> Option<PlayerHandle> {
        let handle = self.players.remove(&id)?;
        if self.by_addr.get(&handle.addr) == Some(&id) {
            self.by_addr.remove(&handle.addr);
        }
        info!(
            "Player {} removed after {:.1}s",
            id,
            handle.connected_for().as_secs_f32()
        );
        Some(handle)
    }

    pub fn find_by_addr(&self, addr: SocketAddr) -> Option<&PlayerHandle> {
        self.by_addr.get(&addr).and_then(|id| self.players.get(id))
    }

    pub fn get(&self, id: PlayerId) -> Option<&PlayerHandle> {
        self.players.get(&id)
    }

    /// Connected player ids in ascending order
    pub fn ids(&self) -> Vec<PlayerId> {
        let mut ids: Vec<PlayerId> = self.players.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn handles(&self) -> Vec<PlayerHandle> {
        self.players.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.players.len() >= self.max_players
    }

    pub fn max_players(&self) -> usize {
        self.max_players
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn events() -> mpsc::Sender<PlayerEvent> {
        mpsc::channel(4).0
    }

    #[test]
    fn test_register_allocates_increasing_ids() {
        let mut registry = ConnectionRegistry::new(4);

        assert_eq!(registry.register(addr(1000), events()), Some(PlayerId(1)));
        assert_eq!(registry.register(addr(1001), events()), Some(PlayerId(2)));
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.ids(), vec![PlayerId(1), PlayerId(2)]);
    }

    #[test]
    fn test_capacity_limit() {
        let mut registry = ConnectionRegistry::new(1);

        assert!(registry.register(addr(1000), events()).is_some());
        assert!(registry.is_full());
        assert_eq!(registry.register(addr(1001), events()), None);
    }

    #[test]
    fn test_find_by_addr() {
        let mut registry = ConnectionRegistry::new(4);
        let id = registry.register(addr(1000), events()).unwrap();

        assert_eq!(registry.find_by_addr(addr(1000)).map(|h| h.id), Some(id));
        assert!(registry.find_by_addr(addr(1001)).is_none());
        assert_eq!(registry.get(id).unwrap().addr, addr(1000));
    }

    #[test]
    fn test_ids_are_not_reused() {
        let mut registry = ConnectionRegistry::new(4);
        let first = registry.register(addr(1000), events()).unwrap();
        assert!(registry.remove(first).is_some());

        let second = registry.register(addr(1000), events()).unwrap();
        assert_ne!(first, second);

        // A late removal of the old id leaves the new player alone
        assert!(registry.remove(first).is_none());
        assert_eq!(registry.find_by_addr(addr(1000)).map(|h| h.id), Some(second));
    }

    #[test]
    fn test_remove_frees_capacity() {
        let mut registry = ConnectionRegistry::new(1);
        let id = registry.register(addr(1000), events()).unwrap();

        registry.remove(id);

        assert!(registry.is_empty());
        assert!(registry.find_by_addr(addr(1000)).is_none());
        assert!(registry.register(addr(1001), events()).is_some());
    }

    #[tokio::test]
    async fn test_events_reach_player() {
        let registry = ConnectionRegistry::shared(2);
        let (tx, mut rx) = mpsc::channel(4);
        let id = registry.write().await.register(addr(1000), tx).unwrap();

        let handle = registry.read().await.get(id).cloned().unwrap();
        handle.events.send(PlayerEvent::Malformed).await.unwrap();

        assert_eq!(rx.recv().await, Some(PlayerEvent::Malformed));
    }
}
