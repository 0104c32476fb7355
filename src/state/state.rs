use std::sync::Arc;

use tokio::sync::RwLock;

use crate::channel::JobChannel;

#[derive(Debug, Clone)]
pub struct AppState {
    /// WebSocket registry and relay
    pub channel: Arc<JobChannel>,
    /// Current configuration
    pub config: Arc<RwLock<super::Config>>,
}

impl AppState {
    pub fn new(config: super::Config) -> Self {
        Self {
            channel: JobChannel::new(config.channel.settings()),
            config: Arc::new(RwLock::new(config)),
        }
    }
}
