use std::sync::Arc;
use std::time::Duration;

use metron_common::PayloadDecoder;
use metron_storage::MetricStore;

use crate::config::ServerConfig;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn MetricStore>,
    pub decoder: Arc<PayloadDecoder>,
    pub request_timeout: Duration,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(store: Arc<dyn MetricStore>, decoder: PayloadDecoder, config: ServerConfig) -> Self {
        Self {
            store,
            decoder: Arc::new(decoder),
            request_timeout: config.request_timeout(),
            config: Arc::new(config),
        }
    }
}
