use super::{enter_match, reject, reply, AwaitingLogin};
use crate::player::{PlayerId, Session};
use crate::state::{Request, State, StateBuilder, Transition};
use log::debug;
use shared::{SessionRequest, SessionResponse};

/// Authenticated player outside of any match
///
/// When a match is layered on top, the lobby keeps handling tag changes and
/// leaves everything else to the match.
pub struct Lobby {
    player: PlayerId,
}

impl Lobby {
    pub const NAME: &'static str = "lobby";

    pub fn builder() -> StateBuilder {
        StateBuilder::new(Self::NAME, |player| Lobby { player })
    }
}

/// Validates and applies a tag change, replying either way.
pub(super) fn change_tag(session: &mut Session, request: &Request, tag: &str) {
    let max = session.services().settings.max_tag_length;
    if tag.chars().count() > max {
        reject(session, request, &format!("Tag longer than {} characters", max));
        return;
    }

    session.set_tag(tag.to_string());
    reply(
        session,
        SessionResponse::TagChanged {
            tag: tag.to_string(),
        },
    );
}

impl State for Lobby {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn handle_request(
        &mut self,
        request: &Request,
        session: &mut Session,
        inherited: bool,
    ) -> Transition {
        if inherited {
            if let SessionRequest::SetTag { tag } = &request.body {
                change_tag(session, request, tag);
            }
            return Transition::Stay;
        }

        match &request.body {
            SessionRequest::SetTag { tag } => change_tag(session, request, tag),
            SessionRequest::Vote { choice } => {
                session.set_pending_vote(*choice);
                reply(session, SessionResponse::VoteRecorded { choice: *choice });
            }
            SessionRequest::Chat { text } => reply(
                session,
                SessionResponse::Notice {
                    from: session.display_name().to_string(),
                    text: text.clone(),
                },
            ),
            SessionRequest::ListServers => reply(
                session,
                SessionResponse::ServerList {
                    servers: session.services().directory.infos(),
                },
            ),
            SessionRequest::JoinServer { server } => {
                let found = session.services().directory.find(server);
                let Some(game_server) = found else {
                    reject(session, request, "Unknown server");
                    return Transition::Stay;
                };

                let key = game_server.key.clone();
                let addr = game_server.addr.to_string();
                if let Err(e) = session.join_game_server(game_server) {
                    reject(session, request, &e.to_string());
                    return Transition::Stay;
                }

                debug!("Player {} heading to {}", self.player, key);
                reply(
                    session,
                    SessionResponse::Joined {
                        server: key.clone(),
                        addr,
                    },
                );
                return enter_match(session, key);
            }
            SessionRequest::Logout => {
                session.deauthenticate();
                reply(session, SessionResponse::LoggedOut);
                return Transition::Switch(AwaitingLogin::builder());
            }
            SessionRequest::Login { .. } => reject(session, request, "Already logged in"),
            SessionRequest::LeaveServer => reject(session, request, "Not in a game server"),
        }
        Transition::Stay
    }
}
