use std::io;
use std::sync::Arc;
use thiserror::Error;

pub const ERR_SERVER_NOT_RUNNING: &str = "ERR_SERVER_NOT_RUNNING";

#[derive(Error, Debug, Clone)]
pub enum ListenerError {
    #[error("listener is not running")]
    NotRunning,
    #[error("listener io error: {0}")]
    Io(Arc<io::Error>),
}

impl From<io::Error> for ListenerError {
    fn from(err: io::Error) -> Self {
        ListenerError::Io(Arc::new(err))
    }
}

#[derive(Error, Debug, Clone)]
pub enum ShutdownError {
    #[error("server is not running")]
    NotRunning,
    #[error("listener close failed: {0}")]
    Listener(ListenerError),
    #[error("shutdown task ended without reporting an outcome")]
    Interrupted,
}

impl ShutdownError {
    pub fn kind(&self) -> &'static str {
        match self {
            ShutdownError::NotRunning | ShutdownError::Listener(ListenerError::NotRunning) => {
                ERR_SERVER_NOT_RUNNING
            }
            ShutdownError::Listener(ListenerError::Io(_)) => "ERR_LISTENER_CLOSE",
            ShutdownError::Interrupted => "ERR_SHUTDOWN_INTERRUPTED",
        }
    }

    pub fn is_not_running(&self) -> bool {
        self.kind() == ERR_SERVER_NOT_RUNNING
    }
}

impl From<ListenerError> for ShutdownError {
    fn from(err: ListenerError) -> Self {
        match err {
            ListenerError::NotRunning => ShutdownError::NotRunning,
            other => ShutdownError::Listener(other),
        }
    }
}

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("fail bind server: {0}")]
    Bind(#[from] io::Error),
}
