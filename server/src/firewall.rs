//! Best-effort mirroring of session transitions into firewall rules
//!
//! The session calls a [`FirewallGateway`] from inside its player task whenever
//! a player authenticates, joins or leaves a game server, or logs out, so
//! gateways must return without waiting on the network. [`RemoteFirewall`]
//! only queues the frame; a delivery task sends queued frames one at a time in
//! the order they were queued.
//!
//! Whitelist entries are reference counted by [`WhitelistLeases`]: several
//! sessions behind one address share a single entry, which is only removed
//! when the last of them lets go. Failures are logged and swallowed by
//! [`apply_best_effort`]; they never undo the session change that triggered
//! them.

use crate::error::FirewallError;
use log::{debug, info, warn};
use shared::wire::{encode_firewall_frame, FirewallAction, FIREWALL_FRAME_LEN};
use std::collections::HashMap;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleAction {
    Add,
    Remove,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleScope {
    Whitelist,
    Blacklist,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirewallRule {
    pub action: RuleAction,
    pub scope: RuleScope,
    pub player_ip: IpAddr,
    pub server_ip: Option<IpAddr>,
}

impl FirewallRule {
    pub fn whitelist(action: RuleAction, player_ip: IpAddr, server_ip: Option<IpAddr>) -> Self {
        Self {
            action,
            scope: RuleScope::Whitelist,
            player_ip,
            server_ip,
        }
    }

    pub fn blacklist(player_ip: IpAddr) -> Self {
        Self {
            action: RuleAction::Add,
            scope: RuleScope::Blacklist,
            player_ip,
            server_ip: None,
        }
    }
}

impl fmt::Display for FirewallRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let action = match self.action {
            RuleAction::Add => "add",
            RuleAction::Remove => "remove",
        };
        let scope = match self.scope {
            RuleScope::Whitelist => "whitelist",
            RuleScope::Blacklist => "blacklist",
        };
        write!(f, "{} {} {}", action, scope, self.player_ip)?;
        if let Some(server_ip) = self.server_ip {
            write!(f, " for {}", server_ip)?;
        }
        Ok(())
    }
}

pub trait FirewallGateway: Send + Sync {
    fn apply_rule(&self, rule: &FirewallRule) -> Result<(), FirewallError>;
}

/// Applies `rule`, logging instead of propagating a failure. Returns whether it succeeded.
pub fn apply_best_effort(gateway: &dyn FirewallGateway, rule: &FirewallRule) -> bool {
    match gateway.apply_rule(rule) {
        Ok(()) => {
            debug!("Firewall rule applied: {}", rule);
            true
        }
        Err(e) => {
            warn!("Firewall rule '{}' failed: {}", rule, e);
            false
        }
    }
}

/// Gateway used when firewall sync is turned off
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledFirewall;

impl FirewallGateway for DisabledFirewall {
    fn apply_rule(&self, rule: &FirewallRule) -> Result<(), FirewallError> {
        debug!("Firewall sync disabled, skipping '{}'", rule);
        Ok(())
    }
}

/// Reference counts for whitelist entries
///
/// Keyed by player address and the server side of the rule, so two sessions
/// from the same address (NAT, or a reconnect racing the old session's
/// teardown) share one entry. The `Add` rule goes out when the count leaves
/// zero and the `Remove` rule when it returns to zero.
#[derive(Debug, Default)]
pub struct WhitelistLeases {
    counts: Mutex<HashMap<(IpAddr, Option<IpAddr>), usize>>,
}

impl WhitelistLeases {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes a lease on the `(player_ip, server_ip)` entry, whitelisting it
    /// on the first one.
    pub fn acquire(
        &self,
        gateway: &dyn FirewallGateway,
        player_ip: IpAddr,
        server_ip: Option<IpAddr>,
    ) {
        // Rules are issued under the lock so the gateway sees them in count order
        let mut counts = self.lock();
        let count = counts.entry((player_ip, server_ip)).or_insert(0);
        *count += 1;
        if *count == 1 {
            let rule = FirewallRule::whitelist(RuleAction::Add, player_ip, server_ip);
            apply_best_effort(gateway, &rule);
        }
    }

    /// Drops a lease, removing the whitelist entry once nobody holds it.
    pub fn release(
        &self,
        gateway: &dyn FirewallGateway,
        player_ip: IpAddr,
        server_ip: Option<IpAddr>,
    ) {
        let mut counts = self.lock();
        let key = (player_ip, server_ip);
        let Some(count) = counts.get_mut(&key) else {
            warn!("Releasing unknown whitelist lease for {}", player_ip);
            return;
        };
        *count -= 1;
        if *count == 0 {
            counts.remove(&key);
            let rule = FirewallRule::whitelist(RuleAction::Remove, player_ip, server_ip);
            apply_best_effort(gateway, &rule);
        }
    }

    /// Number of sessions holding the `(player_ip, server_ip)` entry
    pub fn holders(&self, player_ip: IpAddr, server_ip: Option<IpAddr>) -> usize {
        self.lock()
            .get(&(player_ip, server_ip))
            .copied()
            .unwrap_or(0)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<(IpAddr, Option<IpAddr>), usize>> {
        self.counts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Gateway speaking the firewall control protocol over TCP
///
/// The remote side maintains an IPv4 whitelist. Adding to the blacklist is sent
/// as a whitelist removal and vice versa. The target server address is not part
/// of the frame: one control endpoint guards one host.
///
/// `apply_rule` only encodes and queues the frame. The delivery task started
/// by [`RemoteFirewall::spawn`] opens one connection per frame, bounded by the
/// connect timeout, and exits once every handle to the gateway is dropped and
/// the queue is drained.
#[derive(Debug, Clone)]
pub struct RemoteFirewall {
    frames: mpsc::UnboundedSender<Delivery>,
}

#[derive(Debug)]
struct Delivery {
    rule: FirewallRule,
    frame: [u8; FIREWALL_FRAME_LEN],
}

impl RemoteFirewall {
    /// Starts the delivery task for `control_addr`. Must be called from
    /// within a tokio runtime.
    pub fn spawn(control_addr: SocketAddr, connect_timeout: Duration) -> (Self, JoinHandle<()>) {
        let (frames, queue) = mpsc::unbounded_channel();
        let task = tokio::spawn(deliver_all(control_addr, connect_timeout, queue));
        (Self { frames }, task)
    }

    pub fn frame_for(rule: &FirewallRule) -> Result<[u8; FIREWALL_FRAME_LEN], FirewallError> {
        let ip = match rule.player_ip {
            IpAddr::V4(ip) => ip,
            IpAddr::V6(ip) => match ip.to_ipv4_mapped() {
                Some(ip) => ip,
                None => return Err(FirewallError::UnsupportedAddress(rule.player_ip)),
            },
        };

        let action = match (rule.scope, rule.action) {
            (RuleScope::Whitelist, RuleAction::Add)
            | (RuleScope::Blacklist, RuleAction::Remove) => FirewallAction::Add,
            (RuleScope::Whitelist, RuleAction::Remove)
            | (RuleScope::Blacklist, RuleAction::Add) => FirewallAction::Remove,
        };

        Ok(encode_firewall_frame(action, ip))
    }
}

impl FirewallGateway for RemoteFirewall {
    fn apply_rule(&self, rule: &FirewallRule) -> Result<(), FirewallError> {
        let frame = Self::frame_for(rule)?;
        self.frames
            .send(Delivery {
                rule: rule.clone(),
                frame,
            })
            .map_err(|_| FirewallError::Stopped)
    }
}

async fn deliver_all(
    control_addr: SocketAddr,
    connect_timeout: Duration,
    mut queue: mpsc::UnboundedReceiver<Delivery>,
) {
    while let Some(delivery) = queue.recv().await {
        match deliver(control_addr, connect_timeout, &delivery.frame).await {
            Ok(()) => debug!("Firewall rule delivered: {}", delivery.rule),
            Err(e) => warn!("Firewall rule '{}' not delivered: {}", delivery.rule, e),
        }
    }
    info!("Firewall delivery to {} stopped", control_addr);
}

/// Sends one frame on a fresh connection, then closes it.
async fn deliver(
    control_addr: SocketAddr,
    connect_timeout: Duration,
    frame: &[u8],
) -> Result<(), FirewallError> {
    let connect = tokio::time::timeout(connect_timeout, TcpStream::connect(control_addr));
    let mut stream = match connect.await {
        Ok(Ok(stream)) => stream,
        Ok(Err(source)) => {
            return Err(FirewallError::Connect {
                addr: control_addr,
                source,
            })
        }
        Err(_) => {
            return Err(FirewallError::Connect {
                addr: control_addr,
                source: std::io::ErrorKind::TimedOut.into(),
            })
        }
    };

    let write = async {
        stream.write_all(frame).await?;
        stream.shutdown().await
    };
    match tokio::time::timeout(connect_timeout, write).await {
        Ok(result) => result.map_err(FirewallError::Write),
        Err(_) => Err(FirewallError::Write(std::io::ErrorKind::TimedOut.into())),
    }
}


#[cfg(test)]
mod tests {
    use super::testing::RecordingFirewall;
    use super::*;
    use std::net::Ipv4Addr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Instant;
    use tokio::io::AsyncReadExt;

    fn player_ip() -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(1, 2, 3, 4))
    }

    #[test]
    fn test_whitelist_frames() {
        let add = FirewallRule::whitelist(RuleAction::Add, player_ip(), None);
        assert_eq!(RemoteFirewall::frame_for(&add).unwrap(), [b'a', 1, 2, 3, 4]);

        let remove = FirewallRule::whitelist(RuleAction::Remove, player_ip(), None);
        assert_eq!(RemoteFirewall::frame_for(&remove).unwrap(), [b'r', 1, 2, 3, 4]);
    }

    #[test]
    fn test_blacklist_inverts_action() {
        let ban = FirewallRule::blacklist(player_ip());
        assert_eq!(RemoteFirewall::frame_for(&ban).unwrap(), [b'r', 1, 2, 3, 4]);
    }

    #[test]
    fn test_ipv6_rejected_unless_mapped() {
        let v6: IpAddr = "2001:db8::1".parse().unwrap();
        let rule = FirewallRule::whitelist(RuleAction::Add, v6, None);
        assert!(matches!(
            RemoteFirewall::frame_for(&rule),
            Err(FirewallError::UnsupportedAddress(_))
        ));

        let mapped: IpAddr = "::ffff:10.0.0.2".parse().unwrap();
        let rule = FirewallRule::whitelist(RuleAction::Add, mapped, None);
        assert_eq!(RemoteFirewall::frame_for(&rule).unwrap(), [b'a', 10, 0, 0, 2]);
    }

    /// A listener whose accept queue is full, so further connects hang
    async fn stalled_endpoint() -> (tokio::net::TcpListener, Vec<TcpStream>) {
        let socket = tokio::net::TcpSocket::new_v4().unwrap();
        socket.bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let listener = socket.listen(1).unwrap();
        let addr = listener.local_addr().unwrap();

        let mut held = Vec::new();
        for _ in 0..16 {
            let connect = TcpStream::connect(addr);
            match tokio::time::timeout(Duration::from_millis(100), connect).await {
                Ok(Ok(stream)) => held.push(stream),
                _ => break,
            }
        }
        (listener, held)
    }

    #[tokio::test]
    async fn test_remote_firewall_sends_frames_in_order() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (firewall, task) = RemoteFirewall::spawn(addr, Duration::from_millis(500));

        firewall
            .apply_rule(&FirewallRule::whitelist(RuleAction::Add, player_ip(), None))
            .unwrap();
        firewall
            .apply_rule(&FirewallRule::whitelist(RuleAction::Remove, player_ip(), None))
            .unwrap();

        let mut received = Vec::new();
        for _ in 0..2 {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut frame = Vec::new();
            stream.read_to_end(&mut frame).await.unwrap();
            received.push(frame);
        }
        assert_eq!(
            received,
            vec![vec![b'a', 1, 2, 3, 4], vec![b'r', 1, 2, 3, 4]]
        );

        drop(firewall);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_deliver_reports_connect_failure() {
        // Bind then drop to get a port with nothing listening
        let addr = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap();

        let result = deliver(addr, Duration::from_millis(200), &[b'a', 1, 2, 3, 4]).await;
        assert!(matches!(result, Err(FirewallError::Connect { .. })));
    }

    #[tokio::test]
    async fn test_stalled_endpoint_does_not_block_callers() {
        let (listener, _held) = stalled_endpoint().await;
        let addr = listener.local_addr().unwrap();
        let (firewall, _task) = RemoteFirewall::spawn(addr, Duration::from_secs(5));

        let ticks = Arc::new(AtomicUsize::new(0));
        let ticker = {
            let ticks = Arc::clone(&ticks);
            tokio::spawn(async move {
                loop {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    ticks.fetch_add(1, Ordering::Relaxed);
                }
            })
        };

        let started = Instant::now();
        for _ in 0..10 {
            let rule = FirewallRule::whitelist(RuleAction::Add, player_ip(), None);
            assert!(apply_best_effort(&firewall, &rule));
        }
        assert!(started.elapsed() < Duration::from_millis(100));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(ticks.load(Ordering::Relaxed) >= 5);
        ticker.abort();
    }

    #[tokio::test]
    async fn test_stopped_delivery_is_reported() {
        let addr = "127.0.0.1:9".parse().unwrap();
        let (firewall, task) = RemoteFirewall::spawn(addr, Duration::from_millis(100));
        task.abort();
        let _ = task.await;

        let rule = FirewallRule::whitelist(RuleAction::Add, player_ip(), None);
        assert!(matches!(
            firewall.apply_rule(&rule),
            Err(FirewallError::Stopped)
        ));
    }

    #[test]
    fn test_leases_share_one_entry() {
        let firewall = RecordingFirewall::default();
        let leases = WhitelistLeases::new();
        let server_ip = Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)));

        leases.acquire(&firewall, player_ip(), None);
        leases.acquire(&firewall, player_ip(), None);
        leases.acquire(&firewall, player_ip(), server_ip);
        assert_eq!(leases.holders(player_ip(), None), 2);

        leases.release(&firewall, player_ip(), None);
        assert_eq!(firewall.rules().len(), 2);

        leases.release(&firewall, player_ip(), None);
        leases.release(&firewall, player_ip(), None);
        assert_eq!(
            firewall.rules(),
            vec![
                FirewallRule::whitelist(RuleAction::Add, player_ip(), None),
                FirewallRule::whitelist(RuleAction::Add, player_ip(), server_ip),
                FirewallRule::whitelist(RuleAction::Remove, player_ip(), None),
            ]
        );
        assert_eq!(leases.holders(player_ip(), None), 0);
        assert_eq!(leases.holders(player_ip(), server_ip), 1);
    }

    #[test]
    fn test_best_effort_swallows_failure() {
        let firewall = RecordingFirewall::failing();
        let rule = FirewallRule::whitelist(RuleAction::Add, player_ip(), None);

        assert!(!apply_best_effort(&firewall, &rule));
        assert_eq!(firewall.rules(), vec![rule]);
    }

    #[test]
    fn test_rule_display() {
        let rule = FirewallRule::whitelist(
            RuleAction::Remove,
            player_ip(),
            Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))),
        );
        assert_eq!(rule.to_string(), "remove whitelist 1.2.3.4 for 10.0.0.1");
    }
}
