use crate::error::SessionError;
use crate::player::Session;
use crate::state::{Handled, Request, StateBuilder};
use crate::state_manager::StateManager;
use crate::state_stack::StateStack;
use std::fmt;
use std::str::FromStr;

/// Which controller a deployment runs its players under
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerKind {
    Manager,
    Stack,
}

impl FromStr for ControllerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "manager" | "single" => Ok(ControllerKind::Manager),
            "stack" | "layered" => Ok(ControllerKind::Stack),
            other => Err(format!("unknown controller kind: {}", other)),
        }
    }
}

impl fmt::Display for ControllerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControllerKind::Manager => write!(f, "manager"),
            ControllerKind::Stack => write!(f, "stack"),
        }
    }
}

/// The mode controller owned by a player
///
/// Dispatches every call to either a [`StateManager`] or a [`StateStack`], so
/// the player and the dispatcher never care which one is in use.
pub enum Controller {
    Manager(StateManager),
    Stack(StateStack),
}

impl Controller {
    /// Creates an empty controller of the given kind.
    pub fn new(kind: ControllerKind) -> Self {
        match kind {
            ControllerKind::Manager => Controller::Manager(StateManager::new()),
            ControllerKind::Stack => Controller::Stack(StateStack::new()),
        }
    }

    pub fn kind(&self) -> ControllerKind {
        match self {
            Controller::Manager(_) => ControllerKind::Manager,
            Controller::Stack(_) => ControllerKind::Stack,
        }
    }

    /// Makes `builder` the active state: replaces the current state of a
    /// manager, or becomes the new innermost state of a stack.
    pub fn enter(&mut self, session: &mut Session, builder: StateBuilder) {
        match self {
            Controller::Manager(manager) => manager.set_state(session, builder),
            Controller::Stack(stack) => stack.enter_state(session, builder),
        }
    }

    /// Dispatches `request` and applies the resulting transitions.
    ///
    /// # Errors
    ///
    /// `NoActiveState` for an empty manager, `EmptyStateStack` for a stack
    /// that is or becomes empty, and `UnsupportedTransition` for a manager
    /// state asking to push or pop.
    pub fn handle_request(
        &mut self,
        request: &Request,
        session: &mut Session,
    ) -> Result<Handled, SessionError> {
        match self {
            Controller::Manager(manager) => manager.handle_request(request, session),
            Controller::Stack(stack) => stack.handle_request(request, session),
        }
    }

    /// Exits every active state, innermost first.
    pub fn shutdown(&mut self, session: &mut Session) {
        match self {
            Controller::Manager(manager) => manager.exit(session),
            Controller::Stack(stack) => stack.exit_all(session),
        }
    }

    /// Names of the active states, outermost first. A manager has at most
    /// one.
    pub fn state_names(&self) -> Vec<&'static str> {
        match self {
            Controller::Manager(manager) => manager.current_name().into_iter().collect(),
            Controller::Stack(stack) => stack.names(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Controller::Manager(manager) => manager.is_empty(),
            Controller::Stack(stack) => stack.is_empty(),
        }
    }
}
