//! Auth-code responder
//!
//! Launchers ask for a one-time code by sending a length-prefixed username to
//! the auth-code port. The service answers with a fresh random code in the
//! same framing and remembers it, so the login state can require it.
//!
//! The port is unauthenticated, so the table is bounded: codes expire after a
//! configured lifetime and, once the table is full, issuing a new code drops
//! the oldest outstanding one.

use crate::config::Settings;
use crate::error::{Protocol, TransportError};
use log::{debug, info, warn};
use rand::distributions::Alphanumeric;
use rand::Rng;
use shared::wire::{decode_auth_request, encode_auth_reply};
use shared::MAX_DATAGRAM_SIZE;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::watch;

#[derive(Debug)]
struct IssuedCode {
    code: String,
    issued_at: Instant,
}

/// Codes issued per login name, shared between the responder and the login state
#[derive(Debug, Clone)]
pub struct AuthCodes {
    codes: Arc<Mutex<HashMap<String, IssuedCode>>>,
    ttl: Duration,
    capacity: usize,
}

impl Default for AuthCodes {
    fn default() -> Self {
        let settings = Settings::default();
        Self::with_limits(settings.auth_code_ttl, settings.max_auth_codes)
    }
}

impl AuthCodes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a table whose codes live for `ttl` and which holds at most
    /// `capacity` codes (at least one).
    pub fn with_limits(ttl: Duration, capacity: usize) -> Self {
        Self {
            codes: Arc::new(Mutex::new(HashMap::new())),
            ttl,
            capacity: capacity.max(1),
        }
    }

    /// Issues a new code for `username`, replacing any earlier one.
    ///
    /// Expired codes are purged first. If the table is still full, the oldest
    /// outstanding code is dropped to make room.
    pub fn issue(&self, username: &str, length: usize) -> String {
        let code: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(length)
            .map(char::from)
            .collect();

        let mut codes = self.lock();
        let ttl = self.ttl;
        codes.retain(|_, issued| issued.issued_at.elapsed() < ttl);

        if codes.len() >= self.capacity && !codes.contains_key(username) {
            let oldest = codes
                .iter()
                .min_by_key(|(_, issued)| issued.issued_at)
                .map(|(name, _)| name.clone());
            if let Some(oldest) = oldest {
                debug!("Auth-code table full, dropping code for {}", oldest);
                codes.remove(&oldest);
            }
        }

        codes.insert(
            username.to_string(),
            IssuedCode {
                code: code.clone(),
                issued_at: Instant::now(),
            },
        );
        code
    }

    /// Returns whether `code` is the outstanding, unexpired code for
    /// `username`, consuming it on success. An expired code is dropped.
    pub fn redeem(&self, username: &str, code: &str) -> bool {
        let mut codes = self.lock();
        let Some(issued) = codes.get(username) else {
            return false;
        };

        if issued.issued_at.elapsed() >= self.ttl {
            codes.remove(username);
            return false;
        }
        if issued.code != code {
            return false;
        }
        codes.remove(username);
        true
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, IssuedCode>> {
        // Every critical section leaves the map consistent, so poisoning is harmless
        self.codes.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

pub struct AuthCodeService {
    socket: UdpSocket,
    codes: AuthCodes,
    code_length: usize,
}

impl AuthCodeService {
    pub async fn bind(
        addr: SocketAddr,
        codes: AuthCodes,
        code_length: usize,
    ) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|e| TransportError::from_bind(e, Protocol::Udp, addr))?;
        info!("Auth-code service listening on {}", addr);

        Ok(Self {
            socket,
            codes,
            code_length,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.socket.local_addr()?)
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut buffer = [0u8; MAX_DATAGRAM_SIZE];

        loop {
            tokio::select! {
                result = self.socket.recv_from(&mut buffer) => {
                    match result {
                        Ok((len, addr)) => self.handle_datagram(&buffer[..len], addr).await,
                        Err(e) => warn!("Auth-code receive error: {}", e),
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Auth-code service shutting down");
                        break;
                    }
                }
            }
        }
    }

    async fn handle_datagram(&self, data: &[u8], addr: SocketAddr) {
        let username = match decode_auth_request(data) {
            Ok(username) if !username.is_empty() => username,
            Ok(_) => {
                warn!("Empty auth-code request from {}", addr);
                return;
            }
            Err(e) => {
                warn!("Malformed auth-code request from {}: {}", addr, e);
                return;
            }
        };

        let code = self.codes.issue(&username, self.code_length);
        let reply = match encode_auth_reply(&code) {
            Ok(reply) => reply,
            Err(e) => {
                warn!("Failed to encode auth code for {}: {}", username, e);
                return;
            }
        };

        match self.socket.send_to(&reply, addr).await {
            Ok(_) => debug!("Issued auth code to {} at {}", username, addr),
            Err(e) => warn!("Failed to send auth code to {}: {}", addr, e),
        }
    }
}
