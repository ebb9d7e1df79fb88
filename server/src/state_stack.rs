//! Layered state controller
//!
//! Keeps an ordered set of simultaneously active states for a player, outermost
//! first. Every request is offered to each state from the outermost to the
//! innermost; all but the innermost see it with `inherited == true` and act as
//! observers, the innermost handles it authoritatively.
//!
//! Handlers cannot reach the stack itself. The transitions they return are
//! collected during the pass and applied afterwards in the order they were
//! produced, so a dispatch always works on a stable snapshot of the stack.

use crate::error::SessionError;
use crate::player::Session;
use crate::state::{Handled, Request, State, StateBuilder, Transition};
use log::debug;

#[derive(Default)]
pub struct StateStack {
    states: Vec<Box<dyn State>>,
}

impl StateStack {
    pub fn new() -> Self {
        Self { states: Vec::new() }
    }

    /// Builds a state and pushes it as the new innermost state.
    ///
    /// `on_enter` runs before the push, so the state sees the stack as it
    /// was without itself.
    pub fn enter_state(&mut self, session: &mut Session, builder: StateBuilder) {
        let mut state = builder.build(session.id());
        debug!(
            "Player {} entering state {} at depth {}",
            session.id(),
            state.name(),
            self.states.len()
        );
        state.on_enter(session);
        self.states.push(state);
    }

    /// Pops the innermost state and runs its `on_exit`.
    ///
    /// # Errors
    ///
    /// `EmptyStateStack` when there is nothing to pop.
    pub fn exit_state(&mut self, session: &mut Session) -> Result<(), SessionError> {
        let mut state = self.states.pop().ok_or(SessionError::EmptyStateStack)?;
        debug!(
            "Player {} exiting state {} at depth {}",
            session.id(),
            state.name(),
            self.states.len()
        );
        state.on_exit(session);
        Ok(())
    }

    /// Offers `request` to every state, outermost first, then applies the
    /// collected transitions in order.
    ///
    /// `Switch` replaces the innermost state. `Disconnect` stops the
    /// remaining transitions and is handed back to the caller.
    ///
    /// # Errors
    ///
    /// `EmptyStateStack` when the stack is empty before the pass, or ends up
    /// empty after the transitions are applied.
    pub fn handle_request(
        &mut self,
        request: &Request,
        session: &mut Session,
    ) -> Result<Handled, SessionError> {
        if self.states.is_empty() {
            return Err(SessionError::EmptyStateStack);
        }

        let top = self.states.len() - 1;
        let mut transitions = Vec::new();
        for (depth, state) in self.states.iter_mut().enumerate() {
            match state.handle_request(request, session, depth != top) {
                Transition::Stay => {}
                transition => transitions.push(transition),
            }
        }

        self.apply(transitions, session)
    }

    fn apply(
        &mut self,
        transitions: Vec<Transition>,
        session: &mut Session,
    ) -> Result<Handled, SessionError> {
        for transition in transitions {
            match transition {
                Transition::Stay => {}
                Transition::Push(builder) => self.enter_state(session, builder),
                Transition::Pop => self.exit_state(session)?,
                Transition::Switch(builder) => {
                    self.exit_state(session)?;
                    self.enter_state(session, builder);
                }
                Transition::Disconnect(reason) => return Ok(Handled::Disconnect(reason)),
            }
        }

        // A pass that leaves nothing to dispatch to is a broken state flow
        if self.states.is_empty() {
            return Err(SessionError::EmptyStateStack);
        }
        Ok(Handled::Continue)
    }

    /// Exits every state, innermost first.
    pub fn exit_all(&mut self, session: &mut Session) {
        while !self.states.is_empty() {
            let _ = self.exit_state(session);
        }
    }

    /// Number of active states
    pub fn depth(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// State names, outermost first
    pub fn names(&self) -> Vec<&'static str> {
        self.states.iter().map(|state| state.name()).collect()
    }
}
