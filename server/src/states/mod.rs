//! Built-in session states
//!
//! A small login → lobby → match flow that runs under either controller:
//!
//! ```text
//! stack:    [Connected, AwaitingLogin] → [Connected, Lobby] → [Connected, Lobby, InMatch]
//! manager:  AwaitingLogin → Lobby → InMatch → Lobby
//! ```
//!
//! On a stack, `Connected` observes every request and `Lobby` keeps handling
//! tag changes while a match is layered on top of it.

mod connected;
mod in_match;
mod lobby;
mod login;

pub use connected::Connected;
pub use in_match::InMatch;
pub use lobby::Lobby;
pub use login::AwaitingLogin;

use crate::controller::ControllerKind;
use crate::player::Session;
use crate::state::{Request, StateBuilder, Transition};
use log::warn;
use shared::SessionResponse;

/// The states a freshly connected player starts in, outermost first
pub fn initial_states(kind: ControllerKind) -> Vec<StateBuilder> {
    match kind {
        ControllerKind::Stack => vec![Connected::builder(), AwaitingLogin::builder()],
        ControllerKind::Manager => vec![AwaitingLogin::builder()],
    }
}

fn reply(session: &Session, response: SessionResponse) {
    if let Err(e) = session.send_response(&response) {
        warn!("Failed to reply to player {}: {}", session.id(), e);
    }
}

fn reject(session: &Session, request: &Request, reason: &str) {
    reply(
        session,
        SessionResponse::Rejected {
            request: request.kind().to_string(),
            reason: reason.to_string(),
        },
    );
}

fn enter_match(session: &Session, server_key: String) -> Transition {
    let builder = InMatch::builder(server_key);
    match session.controller_kind() {
        ControllerKind::Stack => Transition::Push(builder),
        ControllerKind::Manager => Transition::Switch(builder),
    }
}

fn leave_match(session: &Session) -> Transition {
    match session.controller_kind() {
        ControllerKind::Stack => Transition::Pop,
        ControllerKind::Manager => Transition::Switch(Lobby::builder()),
    }
}
