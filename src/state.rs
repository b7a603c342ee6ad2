use std::sync::Arc;

use crate::config::Settings;
use crate::observability::MetricsRegistry;
use crate::repo::MessageRepository;
use crate::store::BufferStore;

/// Application state passed to handlers via Axum's `State` extractor.
///
/// Holds the shared handles to the Metrics Store and the relational store,
/// plus the ambient metrics registry and resolved settings. The ingestion
/// endpoint and the telemetry broadcaster both read `buffer`; only the
/// Batch Coordinator task pops from it.
#[derive(Clone)]
pub struct AppState {
	pub buffer: Arc<dyn BufferStore>,
	pub repo: Arc<dyn MessageRepository>,
	pub metrics: Arc<MetricsRegistry>,
	pub settings: Arc<Settings>,
}
