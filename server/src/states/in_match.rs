use super::lobby::change_tag;
use super::{leave_match, reject, reply};
use crate::controller::ControllerKind;
use crate::player::{PlayerId, Session};
use crate::state::{Request, State, StateBuilder, Transition};
use log::info;
use shared::{SessionRequest, SessionResponse};

/// Player bound to a game server
pub struct InMatch {
    player: PlayerId,
    server: String,
}

impl InMatch {
    pub const NAME: &'static str = "in_match";

    pub fn builder(server: String) -> StateBuilder {
        StateBuilder::new(Self::NAME, move |player| InMatch { player, server })
    }
}

impl State for InMatch {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn on_enter(&mut self, _session: &mut Session) {
        info!("Player {} entered match on {}", self.player, self.server);
    }

    fn on_exit(&mut self, session: &mut Session) {
        // No-op when the player already left through LeaveServer
        session.leave_game_server();
    }

    fn handle_request(
        &mut self,
        request: &Request,
        session: &mut Session,
        _inherited: bool,
    ) -> Transition {
        match &request.body {
            SessionRequest::LeaveServer => {
                session.leave_game_server();
                reply(
                    session,
                    SessionResponse::Left {
                        server: self.server.clone(),
                    },
                );
                return leave_match(session);
            }
            SessionRequest::Chat { text } => reply(
                session,
                SessionResponse::Notice {
                    from: format!("{}@{}", session.display_name(), self.server),
                    text: text.clone(),
                },
            ),
            SessionRequest::Vote { choice } => {
                session.set_pending_vote(*choice);
                reply(session, SessionResponse::VoteRecorded { choice: *choice });
            }
            // On a stack the lobby underneath already answered
            SessionRequest::SetTag { tag } => {
                if session.controller_kind() == ControllerKind::Manager {
                    change_tag(session, request, tag);
                }
            }
            _ => reject(session, request, "Not available during a match"),
        }
        Transition::Stay
    }
}
