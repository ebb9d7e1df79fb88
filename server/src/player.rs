//! Server-side record of one connected player
//!
//! A [`Player`] is split in two: the [`Session`] carries identity, attributes
//! and the outbound queue, and the [`Controller`] owns the active states. States
//! receive `&mut Session` in their hooks, so they can change attributes and send
//! data while the controller is borrowed for dispatch.
//!
//! Session invariants are kept by the mutating methods:
//! - `authenticated` implies a login name and password hash are set
//! - a game server binding implies `authenticated`
//!
//! Authentication and game-server changes are mirrored to the firewall gateway
//! on a best-effort basis, through the shared whitelist leases so sessions
//! behind one address do not revoke each other's entries. Joining a game
//! server takes one of its slots and leaving gives it back.

use crate::config::GameServer;
use crate::controller::{Controller, ControllerKind};
use crate::error::SessionError;
use crate::outbound::OutboundQueue;
use crate::services::Services;
use crate::state::{Handled, Request, StateBuilder};
use bincode::serialize;
use log::{debug, info};
use shared::SessionResponse;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlayerId(pub u32);

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub struct Session {
    id: PlayerId,
    addr: SocketAddr,
    login_name: Option<String>,
    display_name: String,
    password_hash: Option<String>,
    tag: String,
    authenticated: bool,
    last_received_seq: u32,
    pending_vote: Option<u32>,
    game_server: Option<Arc<GameServer>>,
    controller_kind: ControllerKind,
    outbound: OutboundQueue,
    services: Arc<Services>,
}

impl Session {
    pub fn new(
        id: PlayerId,
        addr: SocketAddr,
        controller_kind: ControllerKind,
        outbound: OutboundQueue,
        services: Arc<Services>,
    ) -> Self {
        Self {
            id,
            addr,
            login_name: None,
            display_name: String::new(),
            password_hash: None,
            tag: String::new(),
            authenticated: false,
            last_received_seq: 0,
            pending_vote: None,
            game_server: None,
            controller_kind,
            outbound,
            services,
        }
    }

    pub fn id(&self) -> PlayerId {
        self.id
    }

    /// Source address the player connected from
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Source IP, the player side of every firewall rule
    pub fn ip(&self) -> IpAddr {
        self.addr.ip()
    }

    /// Login name, set once the player has authenticated
    pub fn login_name(&self) -> Option<&str> {
        self.login_name.as_deref()
    }

    /// Name shown to other players; defaults to the login name
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn password_hash(&self) -> Option<&str> {
        self.password_hash.as_deref()
    }

    /// Short clan tag, empty until set
    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// Highest request sequence accepted so far, 0 before the first request.
    ///
    /// Every outbound entry is tagged with this value at enqueue time.
    pub fn last_received_seq(&self) -> u32 {
        self.last_received_seq
    }

    pub fn pending_vote(&self) -> Option<u32> {
        self.pending_vote
    }

    /// Game server the session is bound to, if any
    pub fn game_server(&self) -> Option<&Arc<GameServer>> {
        self.game_server.as_ref()
    }

    /// Controller kind the player currently runs under
    pub fn controller_kind(&self) -> ControllerKind {
        self.controller_kind
    }

    /// Process-wide collaborators: firewall, directory, settings, auth codes
    pub fn services(&self) -> &Services {
        &self.services
    }

    /// Records an incoming request sequence number.
    ///
    /// Returns false for duplicates and anything older than the last accepted
    /// sequence. Client sequences therefore start at 1.
    pub fn record_received(&mut self, sequence: u32) -> bool {
        if sequence <= self.last_received_seq {
            return false;
        }
        self.last_received_seq = sequence;
        true
    }

    /// Queues `data` tagged with the last received sequence number.
    pub fn send(&self, data: Vec<u8>) -> Result<(), SessionError> {
        self.outbound.push(data, self.last_received_seq)
    }

    /// Encodes `response` with bincode and queues it like [`send`](Self::send).
    pub fn send_response(&self, response: &SessionResponse) -> Result<(), SessionError> {
        self.send(serialize(response)?)
    }

    /// Marks the session as authenticated. The firewall is told only on the
    /// false to true edge.
    pub fn authenticate(&mut self, login_name: String, password_hash: String) {
        if self.display_name.is_empty() {
            self.display_name = login_name.clone();
        }
        self.login_name = Some(login_name);
        self.password_hash = Some(password_hash);

        if self.authenticated {
            return;
        }
        self.authenticated = true;
        info!(
            "Player {} authenticated as {}",
            self.id,
            self.login_name.as_deref().unwrap_or_default()
        );
        self.services
            .grant_whitelist(self.ip(), self.services.public_ip);
    }

    /// Drops authentication, leaving any game server first.
    pub fn deauthenticate(&mut self) {
        self.leave_game_server();
        self.pending_vote = None;

        if !self.authenticated {
            return;
        }
        self.authenticated = false;
        info!("Player {} logged out", self.id);
        self.services
            .revoke_whitelist(self.ip(), self.services.public_ip);
    }

    /// Binds the session to `server`, replacing any previous binding.
    ///
    /// A slot on the new server is reserved before the old binding is
    /// released, so a full server leaves the current binding untouched.
    /// Rejoining the server the session is already bound to is a no-op.
    ///
    /// # Errors
    ///
    /// `NotAuthenticated` before login, `GameServerFull` when no slot is
    /// free, `UnknownGameServer` for a server missing from the directory.
    pub fn join_game_server(&mut self, server: Arc<GameServer>) -> Result<(), SessionError> {
        if !self.authenticated {
            return Err(SessionError::NotAuthenticated);
        }
        if self.game_server.as_ref().map(|s| s.key.as_str()) == Some(server.key.as_str()) {
            return Ok(());
        }
        self.services.directory.reserve(&server.key)?;
        self.leave_game_server();

        info!("Player {} joined game server {}", self.id, server.key);
        self.services
            .grant_whitelist(self.ip(), Some(server.addr.ip()));
        self.game_server = Some(server);
        Ok(())
    }

    /// Unbinds the session from its game server, freeing the slot it held.
    /// Returns the server it was bound to, if any.
    pub fn leave_game_server(&mut self) -> Option<Arc<GameServer>> {
        let server = self.game_server.take()?;

        info!("Player {} left game server {}", self.id, server.key);
        self.services.directory.release(&server.key);
        self.services
            .revoke_whitelist(self.ip(), Some(server.addr.ip()));
        Some(server)
    }

    pub fn set_tag(&mut self, tag: String) {
        self.tag = tag;
    }

    pub fn set_display_name(&mut self, display_name: String) {
        self.display_name = display_name;
    }

    pub fn set_pending_vote(&mut self, choice: u32) {
        self.pending_vote = Some(choice);
    }

    pub fn take_pending_vote(&mut self) -> Option<u32> {
        self.pending_vote.take()
    }
}

pub struct Player {
    session: Session,
    controller: Controller,
}

impl Player {
    /// Creates a player with an empty controller of the session's kind.
    pub fn new(session: Session) -> Self {
        let controller = Controller::new(session.controller_kind());
        Self {
            session,
            controller,
        }
    }

    /// (Re)initialises the controller with `states`, outermost first. Every
    /// state of the previous controller is exited beforehand.
    pub fn set_controller(&mut self, kind: ControllerKind, states: Vec<StateBuilder>) {
        self.controller.shutdown(&mut self.session);
        self.controller = Controller::new(kind);
        self.session.controller_kind = kind;

        for builder in states {
            self.controller.enter(&mut self.session, builder);
        }
    }

    /// Enters one more state: replaces the current state of a manager or
    /// becomes the innermost state of a stack.
    pub fn enter(&mut self, builder: StateBuilder) {
        self.controller.enter(&mut self.session, builder);
    }

    /// Runs `request` through the controller and applies the resulting
    /// transitions. Sequence filtering is left to the dispatcher.
    pub fn handle_request(&mut self, request: &Request) -> Result<Handled, SessionError> {
        self.controller.handle_request(request, &mut self.session)
    }

    /// Queues `data` for the player, see [`Session::send`].
    pub fn send(&self, data: Vec<u8>) -> Result<(), SessionError> {
        self.session.send(data)
    }

    /// Runs every exit hook, innermost first, then drops authentication.
    pub fn disconnect(&mut self) {
        debug!(
            "Player {} disconnecting from states {:?}",
            self.session.id(),
            self.controller.state_names()
        );
        self.controller.shutdown(&mut self.session);
        self.session.deauthenticate();
    }

    pub fn id(&self) -> PlayerId {
        self.session.id()
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    pub fn controller_kind(&self) -> ControllerKind {
        self.controller.kind()
    }

    /// Names of the active states, outermost first
    pub fn state_names(&self) -> Vec<&'static str> {
        self.controller.state_names()
    }
}
