use std::sync::Arc;
use crate::connection::ConnectionRegistry;
use crate::core::Result;
use super::flow::SessionFlow;

/// Opens session flows over a shared connection registry.
#[derive(Debug, Clone)]
pub struct SessionFactory {
    registry: Arc<ConnectionRegistry>,
}

impl SessionFactory {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Starts a flow over the connections named in `names`, or over every
    /// registered connection when `names` is empty.
    ///
    /// Fails with a configuration error if no connection matches.
    pub async fn start_session<T>(&self, names: &[&str]) -> Result<SessionFlow<T>>
    where
        T: Clone + Send + Sync + 'static,
    {
        SessionFlow::open(self.registry.matching(names)).await
    }
}
