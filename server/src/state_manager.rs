//! Single-active-state controller
//!
//! Holds at most one state for a player. Transitions exit the previous state
//! before the next one is built and entered, and the new state only becomes
//! current once its `on_enter` has returned.

use crate::error::SessionError;
use crate::player::Session;
use crate::state::{Handled, Request, State, StateBuilder, Transition};
use log::debug;

#[derive(Default)]
pub struct StateManager {
    current: Option<Box<dyn State>>,
}

impl StateManager {
    pub fn new() -> Self {
        Self { current: None }
    }

    /// Replaces the current state with the one `builder` produces.
    ///
    /// The previous state's `on_exit` runs before the new state is even
    /// built, and the new state becomes current once its `on_enter` has
    /// returned. Works on an empty manager as well.
    pub fn set_state(&mut self, session: &mut Session, builder: StateBuilder) {
        if let Some(mut previous) = self.current.take() {
            debug!("Player {} exiting state {}", session.id(), previous.name());
            previous.on_exit(session);
        }

        let mut next = builder.build(session.id());
        debug!("Player {} entering state {}", session.id(), next.name());
        next.on_enter(session);
        self.current = Some(next);
    }

    /// Forwards `request` to the current state and applies the transition
    /// it returns.
    ///
    /// The state always sees the request as authoritative. `Switch` replaces
    /// the state, `Disconnect` is handed back to the caller, and `Push` or
    /// `Pop` fail with `UnsupportedTransition`.
    ///
    /// # Errors
    ///
    /// `NoActiveState` when no state has been set.
    pub fn handle_request(
        &mut self,
        request: &Request,
        session: &mut Session,
    ) -> Result<Handled, SessionError> {
        let state = self.current.as_mut().ok_or(SessionError::NoActiveState)?;
        let transition = state.handle_request(request, session, false);
        self.apply(transition, session)
    }

    fn apply(
        &mut self,
        transition: Transition,
        session: &mut Session,
    ) -> Result<Handled, SessionError> {
        match transition {
            Transition::Stay => Ok(Handled::Continue),
            Transition::Switch(builder) => {
                self.set_state(session, builder);
                Ok(Handled::Continue)
            }
            Transition::Disconnect(reason) => Ok(Handled::Disconnect(reason)),
            other @ (Transition::Push(_) | Transition::Pop) => {
                Err(SessionError::UnsupportedTransition {
                    controller: "state manager",
                    transition: other.label(),
                })
            }
        }
    }

    /// Exits the current state, leaving the manager empty.
    pub fn exit(&mut self, session: &mut Session) {
        if let Some(mut state) = self.current.take() {
            debug!("Player {} exiting state {}", session.id(), state.name());
            state.on_exit(session);
        }
    }

    /// Name of the current state, `None` while empty
    pub fn current_name(&self) -> Option<&'static str> {
        self.current.as_ref().map(|state| state.name())
    }

    pub fn is_empty(&self) -> bool {
        self.current.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::testing::session;
    use crate::state::testing::{chat, events, journal, Event, Recorder};

    #[test]
    fn test_empty_manager_rejects_requests() {
        let (mut session, _rx) = session();
        let mut manager = StateManager::new();

        assert!(manager.is_empty());
        assert!(matches!(
            manager.handle_request(&chat(1), &mut session),
            Err(SessionError::NoActiveState)
        ));
    }

    #[test]
    fn test_set_state_exits_before_enter() {
        let (mut session, _rx) = session();
        let journal = journal();
        let mut manager = StateManager::new();

        manager.set_state(&mut session, Recorder::builder("login", &journal));
        manager.set_state(&mut session, Recorder::builder("lobby", &journal));
        manager.set_state(&mut session, Recorder::builder("match", &journal));

        assert_eq!(
            events(&journal),
            vec![
                Event::Enter("login"),
                Event::Exit("login"),
                Event::Enter("lobby"),
                Event::Exit("lobby"),
                Event::Enter("match"),
            ]
        );
        assert_eq!(manager.current_name(), Some("match"));
    }

    #[test]
    fn test_handle_request_is_authoritative() {
        let (mut session, _rx) = session();
        let journal = journal();
        let mut manager = StateManager::new();
        manager.set_state(&mut session, Recorder::builder("lobby", &journal));

        let handled = manager.handle_request(&chat(1), &mut session).unwrap();

        assert_eq!(handled, Handled::Continue);
        assert_eq!(
            events(&journal)[1],
            Event::Handle {
                state: "lobby",
                request: "chat",
                inherited: false
            }
        );
    }

    #[test]
    fn test_self_transition_from_handler() {
        let (mut session, _rx) = session();
        let journal = journal();
        let next = journal.clone();
        let mut manager = StateManager::new();
        manager.set_state(
            &mut session,
            Recorder::scripted("login", &journal, move |_, _| {
                Transition::Switch(Recorder::builder("lobby", &next))
            }),
        );

        manager.handle_request(&chat(1), &mut session).unwrap();

        assert_eq!(manager.current_name(), Some("lobby"));
        let recorded = events(&journal);
        let exit = recorded.iter().position(|e| *e == Event::Exit("login")).unwrap();
        let enter = recorded.iter().position(|e| *e == Event::Enter("lobby")).unwrap();
        assert!(exit < enter);
    }

    #[test]
    fn test_stack_transitions_are_rejected() {
        let (mut session, _rx) = session();
        let journal = journal();
        let mut manager = StateManager::new();
        manager.set_state(
            &mut session,
            Recorder::scripted("lobby", &journal, |_, _| Transition::Pop),
        );

        let result = manager.handle_request(&chat(1), &mut session);
        assert!(matches!(
            result,
            Err(SessionError::UnsupportedTransition {
                transition: "pop",
                ..
            })
        ));
        assert_eq!(manager.current_name(), Some("lobby"));
    }

    #[test]
    fn test_disconnect_keeps_state() {
        let (mut session, _rx) = session();
        let journal = journal();
        let mut manager = StateManager::new();
        manager.set_state(
            &mut session,
            Recorder::scripted("lobby", &journal, |_, _| {
                Transition::Disconnect("kicked".to_string())
            }),
        );

        let handled = manager.handle_request(&chat(1), &mut session).unwrap();
        assert_eq!(handled, Handled::Disconnect("kicked".to_string()));
        assert_eq!(manager.current_name(), Some("lobby"));
    }

    #[test]
    fn test_exit_runs_once() {
        let (mut session, _rx) = session();
        let journal = journal();
        let mut manager = StateManager::new();
        manager.set_state(&mut session, Recorder::builder("lobby", &journal));

        manager.exit(&mut session);
        manager.exit(&mut session);

        assert_eq!(
            events(&journal),
            vec![Event::Enter("lobby"), Event::Exit("lobby")]
        );
        assert!(manager.is_empty());
    }
}
