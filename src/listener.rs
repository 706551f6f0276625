use async_trait::async_trait;
use std::sync::Arc;

use crate::error::ListenerError;

#[async_trait]
pub trait Listener: Send + Sync {
    /// Resolves once every accepted connection is gone.
    async fn close(&self) -> Result<(), ListenerError>;
}

pub type DynListener = Arc<dyn Listener>;
