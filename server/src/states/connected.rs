use super::{reject, AwaitingLogin};
use crate::player::{PlayerId, Session};
use crate::state::{Request, State, StateBuilder, Transition};
use log::{debug, info};
use std::time::Instant;

/// Stack root present for the whole connection
///
/// Observes every request for bookkeeping. It only becomes authoritative when
/// every state above it has been popped, in which case it restarts the login.
pub struct Connected {
    player: PlayerId,
    since: Instant,
    requests: u64,
    last_kind: Option<&'static str>,
}

impl Connected {
    pub const NAME: &'static str = "connected";

    pub fn builder() -> StateBuilder {
        StateBuilder::new(Self::NAME, |player| Connected {
            player,
            since: Instant::now(),
            requests: 0,
            last_kind: None,
        })
    }
}

impl State for Connected {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn on_exit(&mut self, _session: &mut Session) {
        info!(
            "Player {} session closed after {} requests in {:.1}s (last: {})",
            self.player,
            self.requests,
            self.since.elapsed().as_secs_f32(),
            self.last_kind.unwrap_or("none")
        );
    }

    fn handle_request(
        &mut self,
        request: &Request,
        session: &mut Session,
        inherited: bool,
    ) -> Transition {
        self.requests += 1;
        self.last_kind = Some(request.kind());

        if inherited {
            return Transition::Stay;
        }

        debug!("Player {} has no active flow, restarting login", self.player);
        reject(session, request, "Session restarted, log in again");
        Transition::Push(AwaitingLogin::builder())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::testing::session;
    use crate::state::testing::chat;
    use shared::SessionResponse;

    #[test]
    fn test_observer_only_counts() {
        let (mut session, mut rx) = session();
        let mut state = Connected::builder().build(PlayerId(1));

        let transition = state.handle_request(&chat(1), &mut session, true);

        assert!(matches!(transition, Transition::Stay));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_authoritative_restarts_login() {
        let (mut session, mut rx) = session();
        let mut state = Connected::builder().build(PlayerId(1));

        let transition = state.handle_request(&chat(1), &mut session, false);

        match transition {
            Transition::Push(builder) => assert_eq!(builder.name(), AwaitingLogin::NAME),
            other => panic!("Unexpected transition: {:?}", other),
        }
        let payload = rx.try_recv().unwrap().payload;
        let reply: SessionResponse = bincode::deserialize(&payload).unwrap();
        assert!(matches!(reply, SessionResponse::Rejected { .. }));
    }

    #[test]
    fn test_counts_every_request() {
        let (mut session, _rx) = session();
        let mut state = Connected {
            player: PlayerId(1),
            since: Instant::now(),
            requests: 0,
            last_kind: None,
        };

        state.handle_request(&chat(1), &mut session, true);
        state.handle_request(&chat(2), &mut session, true);

        assert_eq!(state.requests, 2);
        assert_eq!(state.last_kind, Some("chat"));
    }
}
