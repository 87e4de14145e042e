use game_types::Player;
use tracing::debug;

use crate::session::SessionState;

/// A named event with a typed payload.
pub trait Event: Send + 'static {
    const NAME: &'static str;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Propagation {
    Continue,
    Stop,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HookError {
    #[error("{event} vetoed: {reason}")]
    Vetoed { event: &'static str, reason: String },
}

impl HookError {
    pub fn veto<E: Event>(reason: impl Into<String>) -> Self {
        HookError::Vetoed {
            event: E::NAME,
            reason: reason.into(),
        }
    }
}

/// Listener for one event type. Listeners may edit the payload, stop later
/// listeners from running, or veto the action with an error.
pub trait Listener<E: Event>: Send + Sync {
    fn handle(&self, event: &mut E) -> Result<Propagation, HookError>;
}

impl<E, F> Listener<E> for F
where
    E: Event,
    F: Fn(&mut E) -> Result<Propagation, HookError> + Send + Sync,
{
    fn handle(&self, event: &mut E) -> Result<Propagation, HookError> {
        self(event)
    }
}

struct Subscription<E: Event> {
    priority: i32,
    listener: Box<dyn Listener<E>>,
}

/// Ordered listeners for one event type. Lower priorities run first; equal
/// priorities run in registration order.
pub struct Hook<E: Event> {
    subscriptions: Vec<Subscription<E>>,
}

impl<E: Event> Hook<E> {
    pub fn new() -> Self {
        Self {
            subscriptions: Vec::new(),
        }
    }

    pub fn listen(&mut self, priority: i32, listener: impl Listener<E> + 'static) {
        let at = self
            .subscriptions
            .iter()
            .position(|s| s.priority > priority)
            .unwrap_or(self.subscriptions.len());
        self.subscriptions.insert(
            at,
            Subscription {
                priority,
                listener: Box::new(listener),
            },
        );
    }

    pub fn dispatch(&self, event: &mut E) -> Result<(), HookError> {
        for (index, subscription) in self.subscriptions.iter().enumerate() {
            match subscription.listener.handle(event)? {
                Propagation::Continue => {}
                Propagation::Stop => {
                    debug!("{} propagation stopped by listener {}", E::NAME, index);
                    break;
                }
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }
}

impl<E: Event> Default for Hook<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct PreRegister {
    pub username: String,
    pub email: String,
}

impl Event for PreRegister {
    const NAME: &'static str = "PreRegister";
}

#[derive(Debug, Clone)]
pub struct Registered {
    pub player: Player,
}

impl Event for Registered {
    const NAME: &'static str = "Register";
}

/// Listeners may amend the session before it is sealed into the cookie.
#[derive(Debug, Clone)]
pub struct LoggedIn {
    pub player: Player,
    pub session: SessionState,
}

impl Event for LoggedIn {
    const NAME: &'static str = "Login";
}

#[derive(Debug, Clone)]
pub struct LoggedOut {
    pub session: SessionState,
}

impl Event for LoggedOut {
    const NAME: &'static str = "Logout";
}

#[derive(Debug, Clone)]
pub struct Updated {
    pub old: Player,
    pub new: Player,
}

impl Event for Updated {
    const NAME: &'static str = "Update";
}

#[derive(Debug, Clone)]
pub struct Deleted {
    pub player: Player,
}

impl Event for Deleted {
    const NAME: &'static str = "Delete";
}

/// Every account lifecycle hook, built once at startup.
#[derive(Default)]
pub struct PlayerHooks {
    pub pre_register: Hook<PreRegister>,
    pub registered: Hook<Registered>,
    pub logged_in: Hook<LoggedIn>,
    pub logged_out: Hook<LoggedOut>,
    pub updated: Hook<Updated>,
    pub deleted: Hook<Deleted>,
}

impl PlayerHooks {
    pub fn new() -> Self {
        Self::default()
    }
}
