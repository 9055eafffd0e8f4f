use std::sync::Arc;

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::engine::service::RequestService;
use crate::observability::metrics::Metrics;
use crate::store::{InMemoryRequestStore, RequestStore};

pub struct AppState {
    pub service: RequestService,
    pub metrics: Metrics,
}

impl AppState {
    pub fn new(config: &Config) -> Self {
        Self::with_store(
            config,
            Arc::new(InMemoryRequestStore::new()),
            Arc::new(SystemClock),
        )
    }

    pub fn with_store(
        config: &Config,
        store: Arc<dyn RequestStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let metrics = Metrics::new();
        let service = RequestService::new(config, store, clock, metrics.clone());

        Self { service, metrics }
    }
}
