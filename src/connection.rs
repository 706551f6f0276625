use std::fmt;
use tokio_util::sync::CancellationToken;
use ulid::Ulid;

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct ConnectionId(Ulid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Both calls must be non-blocking and safe to repeat.
pub trait Connection: Send + Sync + 'static {
    fn end_gracefully(&self);

    fn destroy_now(&self);
}

#[derive(Clone, Debug, Default)]
pub struct ConnectionHandle {
    graceful: CancellationToken,
    destroy: CancellationToken,
}

impl ConnectionHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn graceful_token(&self) -> CancellationToken {
        self.graceful.clone()
    }

    pub fn destroy_token(&self) -> CancellationToken {
        self.destroy.clone()
    }

    pub fn is_ending(&self) -> bool {
        self.graceful.is_cancelled()
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroy.is_cancelled()
    }
}

impl Connection for ConnectionHandle {
    fn end_gracefully(&self) {
        self.graceful.cancel();
    }

    fn destroy_now(&self) {
        self.destroy.cancel();
    }
}
