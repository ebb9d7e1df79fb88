//! Pluggable per-player behaviour units
//!
//! A [`State`] handles requests for one player while it is active. States never
//! mutate their controller directly: `handle_request` returns a [`Transition`]
//! that the owning [`StateManager`](crate::state_manager::StateManager) or
//! [`StateStack`](crate::state_stack::StateStack) applies once the dispatch of
//! the current request has finished.

use crate::player::{PlayerId, Session};
use shared::SessionRequest;
use std::fmt;

/// A decoded request together with the client sequence number it arrived with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub sequence: u32,
    pub body: SessionRequest,
}

impl Request {
    pub fn new(sequence: u32, body: SessionRequest) -> Self {
        Self { sequence, body }
    }

    pub fn kind(&self) -> &'static str {
        self.body.kind()
    }
}

pub trait State: Send {
    fn name(&self) -> &'static str;

    fn on_enter(&mut self, _session: &mut Session) {}

    fn on_exit(&mut self, _session: &mut Session) {}

    /// Handles `request` for the owning player.
    ///
    /// `inherited` is true when the state sits below the top of a stack and is
    /// only observing; the topmost state is called last with `inherited == false`.
    fn handle_request(
        &mut self,
        request: &Request,
        session: &mut Session,
        inherited: bool,
    ) -> Transition;
}

/// Deferred constructor for a state, bound to a player when it is applied
pub struct StateBuilder {
    name: &'static str,
    build: Box<dyn FnOnce(PlayerId) -> Box<dyn State> + Send>,
}

impl StateBuilder {
    pub fn new<S, F>(name: &'static str, build: F) -> Self
    where
        S: State + 'static,
        F: FnOnce(PlayerId) -> S + Send + 'static,
    {
        Self {
            name,
            build: Box::new(move |player| Box::new(build(player)) as Box<dyn State>),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn build(self, player: PlayerId) -> Box<dyn State> {
        (self.build)(player)
    }
}

impl fmt::Debug for StateBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("StateBuilder").field(&self.name).finish()
    }
}

#[derive(Debug)]
pub enum Transition {
    Stay,
    /// Replace the current state (manager) or the topmost state (stack).
    Switch(StateBuilder),
    /// Enter a new innermost state. Stack only.
    Push(StateBuilder),
    /// Exit the innermost state. Stack only.
    Pop,
    Disconnect(String),
}

impl Transition {
    pub fn switch<S, F>(name: &'static str, build: F) -> Self
    where
        S: State + 'static,
        F: FnOnce(PlayerId) -> S + Send + 'static,
    {
        Transition::Switch(StateBuilder::new(name, build))
    }

    pub fn push<S, F>(name: &'static str, build: F) -> Self
    where
        S: State + 'static,
        F: FnOnce(PlayerId) -> S + Send + 'static,
    {
        Transition::Push(StateBuilder::new(name, build))
    }

    pub fn label(&self) -> &'static str {
        match self {
            Transition::Stay => "stay",
            Transition::Switch(_) => "switch",
            Transition::Push(_) => "push",
            Transition::Pop => "pop",
            Transition::Disconnect(_) => "disconnect",
        }
    }
}

/// What a controller reports back after applying the transitions of one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Handled {
    Continue,
    Disconnect(String),
}

#[cfg(test)]
pub(crate) mod testing {
    //! Recording states shared by the controller tests

    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Event {
        Enter(&'static str),
        Exit(&'static str),
        Handle {
            state: &'static str,
            request: &'static str,
            inherited: bool,
        },
    }

    pub type Journal = Arc<Mutex<Vec<Event>>>;

    pub fn journal() -> Journal {
        Arc::new(Mutex::new(Vec::new()))
    }

    pub fn events(journal: &Journal) -> Vec<Event> {
        journal.lock().unwrap().clone()
    }

    /// State that records every hook and answers with a scripted transition
    pub struct Recorder {
        pub name: &'static str,
        pub journal: Journal,
        pub player: PlayerId,
        pub on_request: Option<Box<dyn FnMut(&Request, bool) -> Transition + Send>>,
    }

    impl Recorder {
        pub fn builder(name: &'static str, journal: &Journal) -> StateBuilder {
            let journal = Arc::clone(journal);
            StateBuilder::new(name, move |player| Recorder {
                name,
                journal,
                player,
                on_request: None,
            })
        }

        pub fn scripted<F>(name: &'static str, journal: &Journal, script: F) -> StateBuilder
        where
            F: FnMut(&Request, bool) -> Transition + Send + 'static,
        {
            let journal = Arc::clone(journal);
            StateBuilder::new(name, move |player| Recorder {
                name,
                journal,
                player,
                on_request: Some(Box::new(script)),
            })
        }
    }

    impl State for Recorder {
        fn name(&self) -> &'static str {
            self.name
        }

        fn on_enter(&mut self, _session: &mut Session) {
            self.journal.lock().unwrap().push(Event::Enter(self.name));
        }

        fn on_exit(&mut self, _session: &mut Session) {
            self.journal.lock().unwrap().push(Event::Exit(self.name));
        }

        fn handle_request(
            &mut self,
            request: &Request,
            _session: &mut Session,
            inherited: bool,
        ) -> Transition {
            self.journal.lock().unwrap().push(Event::Handle {
                state: self.name,
                request: request.kind(),
                inherited,
            });
            match self.on_request.as_mut() {
                Some(script) => script(request, inherited),
                None => Transition::Stay,
            }
        }
    }

    pub fn chat(sequence: u32) -> Request {
        Request::new(
            sequence,
            SessionRequest::Chat {
                text: "hi".to_string(),
            },
        )
    }
}
