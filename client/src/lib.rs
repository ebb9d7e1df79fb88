//! # Launcher Client Library
//!
//! Client-side tooling for the lobby session server. It covers the three
//! things a launcher does before and during a session:
//!
//! ### Reachability Check (`ping`)
//! Sends a datagram to the liveness echo port and measures the round trip.
//!
//! ### Auth Codes (`auth_code`)
//! Requests a one-time code for a username. The request and the reply are both
//! a little-endian `u16` length followed by UTF-8 bytes. Replies are only
//! accepted from the exact address the request was sent to.
//!
//! ### Session Client (`network`)
//! Connects to the session server, sends sequence-numbered requests and reads
//! the responses together with the sequence number they acknowledge.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::network::SessionClient;
//! use shared::SessionRequest;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = "127.0.0.1:7777".parse()?;
//!     let mut session = SessionClient::connect(server, Duration::from_secs(2)).await?;
//!
//!     let servers = session.call(&SessionRequest::ListServers).await?;
//!     println!("{:?}", servers);
//!
//!     session.disconnect().await?;
//!     Ok(())
//! }
//! ```

pub mod auth_code;
pub mod error;
pub mod network;
pub mod ping;
