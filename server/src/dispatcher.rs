//! Request dispatch and the per-player task
//!
//! Every connected player runs as one [`PlayerTask`]. The task owns the
//! [`Player`] and drains a channel of [`PlayerEvent`]s, so requests for one
//! player are handled strictly one after another while different players run
//! independently.
//!
//! Controller errors (no state on a manager, an empty stack, an unsupported
//! transition) end only the affected session: they are logged at error level
//! and the player is disconnected with its exit hooks run as usual.
//!
//! Shutdown is always announced with an explicit `Close` event. A channel
//! that closes on its own means the registry released the handle, usually
//! because a new connection took over the address, so nothing is sent to it.

use crate::error::SessionError;
use crate::firewall::{apply_best_effort, FirewallRule};
use crate::player::Player;
use crate::registry::{PlayerEvent, SharedRegistry};
use crate::state::{Handled, Request};
use bincode::{deserialize, serialize};
use log::{debug, error, info, warn};
use shared::{Packet, SessionRequest};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Handled,
    /// Duplicate or stale sequence number; the controller never saw it
    Ignored,
    Disconnect(String),
}

pub fn decode_request(sequence: u32, payload: &[u8]) -> Result<Request, SessionError> {
    let body = deserialize::<SessionRequest>(payload)
        .map_err(|e| SessionError::MalformedRequest(e.to_string()))?;
    Ok(Request::new(sequence, body))
}

/// Feeds `request` to the player's controller unless its sequence number was already seen.
pub fn dispatch(player: &mut Player, request: Request) -> Result<DispatchOutcome, SessionError> {
    if !player.session_mut().record_received(request.sequence) {
        debug!(
            "Player {} ignoring stale request {} (last {})",
            player.id(),
            request.sequence,
            player.session().last_received_seq()
        );
        return Ok(DispatchOutcome::Ignored);
    }

    debug!(
        "Player {} dispatching {} #{} to {:?}",
        player.id(),
        request.kind(),
        request.sequence,
        player.state_names()
    );
    match player.handle_request(&request)? {
        Handled::Continue => Ok(DispatchOutcome::Handled),
        Handled::Disconnect(reason) => Ok(DispatchOutcome::Disconnect(reason)),
    }
}

/// Why a player task ended
#[derive(Debug, Clone, PartialEq, Eq)]
struct Ending {
    reason: String,
    notify: bool,
}

impl Ending {
    fn notify(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            notify: true,
        }
    }
}

pub struct PlayerTask {
    player: Player,
    events: mpsc::Receiver<PlayerEvent>,
    registry: SharedRegistry,
    socket: Arc<UdpSocket>,
    writer: JoinHandle<()>,
    idle_timeout: Duration,
    malformed_limit: u32,
    malformed: u32,
}

impl PlayerTask {
    pub fn new(
        player: Player,
        events: mpsc::Receiver<PlayerEvent>,
        registry: SharedRegistry,
        socket: Arc<UdpSocket>,
        writer: JoinHandle<()>,
        idle_timeout: Duration,
    ) -> Self {
        let malformed_limit = player.session().services().settings.malformed_limit;
        Self {
            player,
            events,
            registry,
            socket,
            writer,
            idle_timeout,
            malformed_limit,
            malformed: 0,
        }
    }

    pub async fn run(mut self) {
        let ending = loop {
            let event = match tokio::time::timeout(self.idle_timeout, self.events.recv()).await {
                Ok(Some(event)) => event,
                Ok(None) => {
                    break Ending {
                        reason: "Connection handle released".to_string(),
                        notify: false,
                    }
                }
                Err(_) => {
                    info!("Player {} timed out", self.player.id());
                    break Ending::notify("Timed out");
                }
            };

            if let Some(ending) = self.handle_event(event) {
                break ending;
            }
        };

        self.finish(ending).await;
    }

    fn handle_event(&mut self, event: PlayerEvent) -> Option<Ending> {
        match event {
            PlayerEvent::Request { sequence, payload } => {
                let request = match decode_request(sequence, &payload) {
                    Ok(request) => request,
                    Err(e) => {
                        warn!("Player {} sent {}", self.player.id(), e);
                        return self.note_malformed();
                    }
                };

                match dispatch(&mut self.player, request) {
                    Ok(DispatchOutcome::Handled) | Ok(DispatchOutcome::Ignored) => None,
                    Ok(DispatchOutcome::Disconnect(reason)) => Some(Ending::notify(reason)),
                    Err(e) => {
                        error!("Player {} session error: {}", self.player.id(), e);
                        Some(Ending::notify(format!("Session error: {}", e)))
                    }
                }
            }
            PlayerEvent::Malformed => self.note_malformed(),
            PlayerEvent::Close { reason, notify } => Some(Ending { reason, notify }),
        }
    }

    fn note_malformed(&mut self) -> Option<Ending> {
        self.malformed += 1;
        if self.malformed_limit == 0 || self.malformed < self.malformed_limit {
            return None;
        }

        warn!(
            "Player {} kicked after {} malformed requests",
            self.player.id(),
            self.malformed
        );
        let session = self.player.session();
        let rule = FirewallRule::blacklist(session.ip());
        apply_best_effort(session.services().firewall.as_ref(), &rule);
        Some(Ending::notify("Too many malformed requests"))
    }

    async fn finish(self, ending: Ending) {
        let PlayerTask {
            mut player,
            registry,
            socket,
            writer,
            ..
        } = self;
        let id = player.id();
        let addr = player.session().addr();

        player.disconnect();
        registry.write().await.remove(id);

        // Dropping the player closes the queue; the writer flushes what is left
        drop(player);
        if let Err(e) = writer.await {
            error!("Writer for player {} failed: {}", id, e);
        }

        info!("Player {} disconnected: {}", id, ending.reason);
        if !ending.notify {
            return;
        }
        let packet = Packet::Disconnected {
            reason: ending.reason,
        };
        match serialize(&packet) {
            Ok(data) => {
                if let Err(e) = socket.send_to(&data, addr).await {
                    warn!("Failed to notify player {} of disconnect: {}", id, e);
                }
            }
            Err(e) => error!("Failed to encode disconnect for player {}: {}", id, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::controller::ControllerKind;
    use crate::firewall::testing::RecordingFirewall;
    use crate::firewall::{FirewallGateway, RuleScope};
    use crate::outbound::{spawn_writer, OutboundQueue};
    use crate::player::testing::session;
    use crate::player::{PlayerId, Session};
    use crate::registry::ConnectionRegistry;
    use crate::services::Services;
    use crate::state::testing::{chat, events, journal, Event, Recorder};
    use crate::state::{StateBuilder, Transition};
    use crate::states::initial_states;
    use crate::states::testing::login;
    use shared::SessionResponse;
    use tokio_test::assert_ok;

    fn player_with(kind: ControllerKind, journal: &crate::state::testing::Journal) -> Player {
        let (session, _rx) = session();
        let mut player = Player::new(session);
        player.set_controller(kind, vec![Recorder::builder("root", journal)]);
        player
    }

    #[test]
    fn test_decode_request() {
        let payload = serialize(&SessionRequest::ListServers).unwrap();
        let request = assert_ok!(decode_request(3, &payload));

        assert_eq!(request.sequence, 3);
        assert_eq!(request.body, SessionRequest::ListServers);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            decode_request(1, &[0xff, 0xff, 0xff, 0xff, 0x01]),
            Err(SessionError::MalformedRequest(_))
        ));
    }

    #[test]
    fn test_dispatch_ignores_stale_sequences() {
        let journal = journal();
        let mut player = player_with(ControllerKind::Stack, &journal);

        assert_eq!(dispatch(&mut player, chat(2)).unwrap(), DispatchOutcome::Handled);
        assert_eq!(dispatch(&mut player, chat(2)).unwrap(), DispatchOutcome::Ignored);
        assert_eq!(dispatch(&mut player, chat(1)).unwrap(), DispatchOutcome::Ignored);

        let handled = events(&journal)
            .iter()
            .filter(|e| matches!(e, Event::Handle { .. }))
            .count();
        assert_eq!(handled, 1);
        assert_eq!(player.session().last_received_seq(), 2);
    }

    #[test]
    fn test_dispatch_surfaces_controller_errors() {
        let (session, _rx) = session();
        let mut player = Player::new(session);

        assert!(matches!(
            dispatch(&mut player, chat(1)),
            Err(SessionError::EmptyStateStack)
        ));

        player.set_controller(ControllerKind::Manager, Vec::new());
        assert!(matches!(
            dispatch(&mut player, chat(2)),
            Err(SessionError::NoActiveState)
        ));
    }

    #[test]
    fn test_dispatch_reports_disconnect() {
        let (session, _rx) = session();
        let journal = journal();
        let mut player = Player::new(session);
        player.set_controller(
            ControllerKind::Manager,
            vec![Recorder::scripted("root", &journal, |_, _| {
                Transition::Disconnect("bye".to_string())
            })],
        );

        assert_eq!(
            dispatch(&mut player, chat(1)).unwrap(),
            DispatchOutcome::Disconnect("bye".to_string())
        );
    }

    struct Harness {
        events: mpsc::Sender<PlayerEvent>,
        registry: SharedRegistry,
        client: UdpSocket,
        task: JoinHandle<()>,
        id: PlayerId,
    }

    async fn spawn_task(
        services: Services,
        journal: &crate::state::testing::Journal,
        idle_timeout: Duration,
    ) -> Harness {
        let registry = ConnectionRegistry::shared(4);
        let states = vec![Recorder::builder("root", journal)];
        spawn_in(&registry, Arc::new(services), states, idle_timeout).await
    }

    /// Starts a player task registered in `registry` with its own client socket.
    async fn spawn_in(
        registry: &SharedRegistry,
        services: Arc<Services>,
        states: Vec<StateBuilder>,
        idle_timeout: Duration,
    ) -> Harness {
        let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let client_addr = client.local_addr().unwrap();

        let (events_tx, events_rx) = mpsc::channel(16);
        let id = registry
            .write()
            .await
            .register(client_addr, events_tx.clone())
            .unwrap();

        let (outbound, outbound_rx) = OutboundQueue::new(id);
        let writer = spawn_writer(id, client_addr, Arc::clone(&socket), outbound_rx);
        let session = Session::new(id, client_addr, ControllerKind::Stack, outbound, services);
        let mut player = Player::new(session);
        player.set_controller(ControllerKind::Stack, states);

        let task = PlayerTask::new(
            player,
            events_rx,
            Arc::clone(registry),
            socket,
            writer,
            idle_timeout,
        );
        Harness {
            events: events_tx,
            registry: Arc::clone(registry),
            client,
            task: tokio::spawn(task.run()),
            id,
        }
    }

    async fn recv_packet(client: &UdpSocket) -> Packet {
        let mut buffer = [0u8; 2048];
        let (len, _) = tokio::time::timeout(Duration::from_secs(1), client.recv_from(&mut buffer))
            .await
            .unwrap()
            .unwrap();
        deserialize(&buffer[..len]).unwrap()
    }

    fn request_event(sequence: u32, body: &SessionRequest) -> PlayerEvent {
        PlayerEvent::Request {
            sequence,
            payload: serialize(body).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_controller_error_ends_only_that_session() {
        let registry = ConnectionRegistry::shared(4);
        let services = Arc::new(Services::default());
        let journal = journal();
        let timeout = Duration::from_secs(5);
        let broken_states = vec![Recorder::scripted("root", &journal, |_, _| Transition::Pop)];
        let broken = spawn_in(&registry, Arc::clone(&services), broken_states, timeout).await;
        let healthy_states = initial_states(ControllerKind::Stack);
        let healthy = spawn_in(&registry, services, healthy_states, timeout).await;

        let list = request_event(1, &SessionRequest::ListServers);
        broken.events.send(list).await.unwrap();
        assert_eq!(
            recv_packet(&broken.client).await,
            Packet::Disconnected {
                reason: "Session error: state stack is empty".to_string()
            }
        );
        broken.task.await.unwrap();
        assert!(registry.read().await.get(broken.id).is_none());

        let login_event = request_event(1, &login("alice", None));
        healthy.events.send(login_event).await.unwrap();
        match recv_packet(&healthy.client).await {
            Packet::Data { ack, payload } => {
                assert_eq!(ack, 1);
                assert!(matches!(
                    deserialize::<SessionResponse>(&payload).unwrap(),
                    SessionResponse::LoginAccepted { .. }
                ));
            }
            other => panic!("Unexpected packet: {:?}", other),
        }
        assert!(registry.read().await.get(healthy.id).is_some());
        assert!(!healthy.task.is_finished());
    }

    #[tokio::test]
    async fn test_released_handle_ends_without_notification() {
        let journal = journal();
        let harness = spawn_task(Services::default(), &journal, Duration::from_secs(5)).await;
        let Harness {
            events: sender,
            registry,
            client,
            task,
            id,
        } = harness;

        registry.write().await.remove(id);
        drop(sender);
        task.await.unwrap();

        assert!(events(&journal).contains(&Event::Exit("root")));
        let mut buffer = [0u8; 64];
        let silence =
            tokio::time::timeout(Duration::from_millis(100), client.recv_from(&mut buffer)).await;
        assert!(silence.is_err(), "No Disconnected after the handle was released");
    }

    #[tokio::test]
    async fn test_close_runs_exit_hooks_and_unregisters() {
        let journal = journal();
        let harness = spawn_task(Services::default(), &journal, Duration::from_secs(5)).await;

        harness
            .events
            .send(PlayerEvent::Close {
                reason: "Kicked".to_string(),
                notify: true,
            })
            .await
            .unwrap();

        assert_eq!(
            recv_packet(&harness.client).await,
            Packet::Disconnected {
                reason: "Kicked".to_string()
            }
        );
        harness.task.await.unwrap();
        assert!(events(&journal).contains(&Event::Exit("root")));
        assert!(harness.registry.read().await.get(harness.id).is_none());
    }

    #[tokio::test]
    async fn test_idle_timeout_disconnects() {
        let journal = journal();
        let harness = spawn_task(Services::default(), &journal, Duration::from_millis(50)).await;

        assert_eq!(
            recv_packet(&harness.client).await,
            Packet::Disconnected {
                reason: "Timed out".to_string()
            }
        );
        harness.task.await.unwrap();
        assert!(harness.registry.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_limit_kicks_and_blacklists() {
        let firewall = Arc::new(RecordingFirewall::default());
        let gateway: Arc<dyn FirewallGateway> = firewall.clone();
        let settings = Settings {
            malformed_limit: 2,
            ..Settings::default()
        };
        let services = Services::new(gateway).with_settings(settings);
        let journal = journal();
        let harness = spawn_task(services, &journal, Duration::from_secs(5)).await;

        harness.events.send(PlayerEvent::Malformed).await.unwrap();
        harness
            .events
            .send(PlayerEvent::Request {
                sequence: 1,
                payload: vec![0xff; 3],
            })
            .await
            .unwrap();

        assert_eq!(
            recv_packet(&harness.client).await,
            Packet::Disconnected {
                reason: "Too many malformed requests".to_string()
            }
        );
        harness.task.await.unwrap();

        let rules = firewall.rules();
        assert!(rules.iter().any(|rule| rule.scope == RuleScope::Blacklist));
        // The controller never saw the malformed requests
        assert!(!events(&journal)
            .iter()
            .any(|e| matches!(e, Event::Handle { .. })));
    }
}
