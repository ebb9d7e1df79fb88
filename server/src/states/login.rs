use super::{reject, reply, Lobby};
use crate::player::{PlayerId, Session};
use crate::state::{Request, State, StateBuilder, Transition};
use log::info;
use shared::{SessionRequest, SessionResponse};

/// Waits for valid credentials, then moves the player to the lobby
pub struct AwaitingLogin {
    player: PlayerId,
}

impl AwaitingLogin {
    pub const NAME: &'static str = "awaiting_login";

    pub fn builder() -> StateBuilder {
        StateBuilder::new(Self::NAME, |player| AwaitingLogin { player })
    }

    fn login(
        &self,
        session: &mut Session,
        login_name: &str,
        password_hash: &str,
        display_name: &str,
        auth_code: Option<&str>,
    ) -> Result<(), &'static str> {
        if login_name.trim().is_empty() || password_hash.is_empty() {
            return Err("Missing credentials");
        }

        let services = session.services();
        if services.settings.require_auth_code {
            let redeemed = auth_code
                .map(|code| services.auth_codes.redeem(login_name, code))
                .unwrap_or(false);
            if !redeemed {
                info!("Player {} gave an invalid auth code", self.player);
                return Err("Invalid auth code");
            }
        }

        session.authenticate(login_name.to_string(), password_hash.to_string());
        if !display_name.trim().is_empty() {
            session.set_display_name(display_name.trim().to_string());
        }
        Ok(())
    }
}

impl State for AwaitingLogin {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn handle_request(
        &mut self,
        request: &Request,
        session: &mut Session,
        _inherited: bool,
    ) -> Transition {
        match &request.body {
            SessionRequest::Login {
                login_name,
                password_hash,
                display_name,
                auth_code,
            } => {
                match self.login(
                    session,
                    login_name,
                    password_hash,
                    display_name,
                    auth_code.as_deref(),
                ) {
                    Ok(()) => {
                        reply(
                            session,
                            SessionResponse::LoginAccepted {
                                player_id: session.id().0,
                                display_name: session.display_name().to_string(),
                                motd: session.services().settings.motd.clone(),
                            },
                        );
                        Transition::Switch(Lobby::builder())
                    }
                    Err(reason) => {
                        reply(
                            session,
                            SessionResponse::LoginRejected {
                                reason: reason.to_string(),
                            },
                        );
                        Transition::Stay
                    }
                }
            }
            SessionRequest::Logout => Transition::Disconnect("Client logged out".to_string()),
            _ => {
                reject(session, request, "Not logged in");
                Transition::Stay
            }
        }
    }
}
