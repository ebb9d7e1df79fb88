//! # Lobby Session Server Library
//!
//! This library provides the player-session core of a multiplayer game server
//! emulator. It tracks every connected player through a sequence of protocol
//! states, routes incoming requests to the active state logic, and delivers
//! outgoing data to each player in order, tagged with the last request
//! sequence number received from that player.
//!
//! ## Core Responsibilities
//!
//! ### Session State Machines
//! Each player owns exactly one mode controller, chosen per deployment:
//! - [`state_manager::StateManager`] keeps a single active state and switches
//!   with exit-before-enter ordering
//! - [`state_stack::StateStack`] keeps layered states; every request is offered
//!   to each state from the outermost to the innermost, and only the innermost
//!   handles it authoritatively
//!
//! States never mutate their controller. They return a [`state::Transition`]
//! that is applied once the current request has been seen by every state.
//!
//! ### Ordered Delivery
//! Replies go through a per-player outbound queue drained by a writer task.
//! Entries are sent in enqueue order, each tagged with the sequence number
//! that was current when it was queued.
//!
//! ### Firewall Sync
//! Logins, logouts and game-server joins are mirrored into firewall rules via
//! [`firewall::FirewallGateway`]. Sync is best-effort: a failed rule is logged
//! and the session change stands.
//!
//! ## Architecture Design
//!
//! ### Actor Per Player
//! The UDP receive loop in [`network`] only decodes datagrams and routes them.
//! Every player runs in its own task ([`dispatcher::PlayerTask`]) fed by an
//! ordered channel, so requests for one player are handled one at a time while
//! different players never wait on each other.
//!
//! ### Failure Isolation
//! A broken state flow (no state on a manager, an empty stack) ends only the
//! affected session. Its exit hooks still run, so game-server slots and
//! firewall rules are released exactly once.
//!
//! ## Module Organization
//!
//! - `player`, `state`, `state_manager`, `state_stack`, `controller`: the session machinery
//! - `outbound`, `registry`, `dispatcher`, `network`: transport and scheduling
//! - `states`: the built-in login, lobby and match flow
//! - `firewall`, `echo`, `auth_code`: external collaborators
//! - `config`, `services`, `error`: configuration and shared plumbing
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::network::SessionServer;
//! use server::services::Services;
//! use std::sync::Arc;
//! use tokio::sync::watch;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig::default();
//!     let services = Arc::new(Services::default());
//!
//!     let server = SessionServer::bind(config.session_addr(), &config.lobby, services).await?;
//!     let (_shutdown_tx, shutdown_rx) = watch::channel(false);
//!     server.run(shutdown_rx).await;
//!
//!     Ok(())
//! }
//! ```

pub mod auth_code;
pub mod config;
pub mod controller;
pub mod dispatcher;
pub mod echo;
pub mod error;
pub mod firewall;
pub mod network;
pub mod outbound;
pub mod player;
pub mod registry;
pub mod services;
pub mod state;
pub mod state_manager;
pub mod state_stack;
pub mod states;
