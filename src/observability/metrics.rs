use prometheus::{Histogram, HistogramOpts, IntCounter, IntGauge, Opts, Registry, TextEncoder};
use std::sync::Arc;

/// Central registry for all Prometheus metrics.
pub struct MetricsRegistry {
	registry: Registry,

	// Ingestion endpoint metrics
	pub ingest_requests_total: IntCounter,
	pub ingest_records_total: IntCounter,
	pub ingest_errors_total: IntCounter,
	pub ingest_duration_seconds: Histogram,

	// Batch coordinator metrics
	pub ingest_batches_total: IntCounter,
	pub ingest_batch_failures_total: IntCounter,
	pub ingest_batch_commit_latency_seconds: Histogram,
	pub ingest_queue_length: IntGauge,
}

impl MetricsRegistry {
	pub fn new() -> Self {
		let registry = Registry::new();

		let ingest_requests_total = IntCounter::with_opts(
			Opts::new(
				"flowline_ingest_requests_total",
				"Total number of ingest requests received",
			)
			.namespace("flowline"),
		)
		.unwrap();

		let ingest_records_total = IntCounter::with_opts(
			Opts::new(
				"flowline_ingest_records_total",
				"Total number of records ingested",
			)
			.namespace("flowline"),
		)
		.unwrap();

		let ingest_errors_total = IntCounter::with_opts(
			Opts::new(
				"flowline_ingest_errors_total",
				"Total number of ingest errors",
			)
			.namespace("flowline"),
		)
		.unwrap();

		let ingest_duration_seconds = Histogram::with_opts(
			HistogramOpts::new(
				"flowline_ingest_duration_seconds",
				"Duration of ingest requests in seconds",
			)
			.namespace("flowline")
			.buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
		)
		.unwrap();

		let ingest_batches_total = IntCounter::with_opts(
			Opts::new(
				"flowline_ingest_batches_total",
				"Number of batches committed to the relational store",
			)
			.namespace("flowline"),
		)
		.unwrap();

		let ingest_batch_failures_total = IntCounter::with_opts(
			Opts::new(
				"flowline_ingest_batch_failures_total",
				"Number of batches that failed commit on both attempts",
			)
			.namespace("flowline"),
		)
		.unwrap();

		let ingest_batch_commit_latency_seconds = Histogram::with_opts(
			HistogramOpts::new(
				"flowline_ingest_batch_commit_latency_seconds",
				"Batch commit latency in seconds",
			)
			.namespace("flowline")
			.buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0]),
		)
		.unwrap();

		let ingest_queue_length = IntGauge::with_opts(
			Opts::new(
				"flowline_ingest_queue_length",
				"Last observed length of the buffer list",
			)
			.namespace("flowline"),
		)
		.unwrap();

		registry
			.register(Box::new(ingest_requests_total.clone()))
			.unwrap();
		registry
			.register(Box::new(ingest_records_total.clone()))
			.unwrap();
		registry
			.register(Box::new(ingest_errors_total.clone()))
			.unwrap();
		registry
			.register(Box::new(ingest_duration_seconds.clone()))
			.unwrap();
		registry
			.register(Box::new(ingest_batches_total.clone()))
			.unwrap();
		registry
			.register(Box::new(ingest_batch_failures_total.clone()))
			.unwrap();
		registry
			.register(Box::new(ingest_batch_commit_latency_seconds.clone()))
			.unwrap();
		registry
			.register(Box::new(ingest_queue_length.clone()))
			.unwrap();

		Self {
			registry,
			ingest_requests_total,
			ingest_records_total,
			ingest_errors_total,
			ingest_duration_seconds,
			ingest_batches_total,
			ingest_batch_failures_total,
			ingest_batch_commit_latency_seconds,
			ingest_queue_length,
		}
	}

	/// Encode metrics in Prometheus text format.
	pub fn encode(&self) -> String {
		let encoder = TextEncoder::new();
		let metric_families = self.registry.gather();
		match encoder.encode_to_string(&metric_families) {
			Ok(s) => s,
			Err(e) => {
				eprintln!("Failed to encode metrics: {}", e);
				String::new()
			}
		}
	}
}

impl Default for MetricsRegistry {
	fn default() -> Self {
		Self::new()
	}
}

/// Initialize the global metrics registry.
pub fn init_metrics() -> anyhow::Result<Arc<MetricsRegistry>> {
	Ok(Arc::new(MetricsRegistry::new()))
}

#[cfg(feature = "unit-tests")]
mod tests {
	#[test]
	fn metrics_registry_creation() {
		let registry = super::MetricsRegistry::new();
		assert!(!registry.encode().is_empty());
	}

	#[test]
	fn metrics_increment() {
		let registry = super::MetricsRegistry::new();
		registry.ingest_requests_total.inc();
		registry.ingest_records_total.inc_by(10);
		registry.ingest_batches_total.inc();
		assert!(!registry.encode().is_empty());
	}
}
