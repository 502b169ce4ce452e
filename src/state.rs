use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusHandle;
use tracing::info;

use crate::config::WorkerConfig;
use crate::services::publisher::MessagePublisher;
use crate::stores::{InMemoryStateStore, MatchStore, QueueStore, UnitOfWorkFactory};

/// Application state shared across HTTP requests. Needs to be thread-safe.
pub struct AppState {
    /// Authoritative waiting queue.
    pub queue: Arc<dyn QueueStore>,
    /// Read side of the durable match store.
    pub matches: MatchStore,
    /// Per-process user state.
    pub states: Arc<InMemoryStateStore>,
    /// Broker publish side, used by the toggle endpoint.
    pub publisher: Arc<dyn MessagePublisher>,
    /// Transactional writes for the HTTP surface.
    pub uow_factory: Arc<dyn UnitOfWorkFactory>,
    /// Rendered by the metrics endpoint.
    pub metrics_handle: PrometheusHandle,
    pub config: WorkerConfig,
}

impl AppState {
    pub fn new(
        queue: Arc<dyn QueueStore>,
        matches: MatchStore,
        states: Arc<InMemoryStateStore>,
        publisher: Arc<dyn MessagePublisher>,
        uow_factory: Arc<dyn UnitOfWorkFactory>,
        metrics_handle: PrometheusHandle,
        config: WorkerConfig,
    ) -> Self {
        info!("Initializing application state");

        Self {
            queue,
            matches,
            states,
            publisher,
            uow_factory,
            metrics_handle,
            config,
        }
    }
}
