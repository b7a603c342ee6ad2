use flowline::observability::{MetricsRegistry, init_metrics};

#[cfg(feature = "unit-tests")]
#[test]
fn test_metrics_registry_creation() {
	let registry = MetricsRegistry::new();
	let output = registry.encode();

	assert!(output.contains("flowline_ingest_requests_total"));
	assert!(output.contains("flowline_ingest_records_total"));
	assert!(output.contains("flowline_ingest_batches_total"));
	assert!(output.contains("flowline_ingest_batch_failures_total"));
}

#[cfg(feature = "unit-tests")]
#[test]
fn test_metrics_increment() {
	let registry = MetricsRegistry::new();

	registry.ingest_requests_total.inc();
	registry.ingest_records_total.inc_by(5);
	registry.ingest_batches_total.inc_by(2);

	let output = registry.encode();

	assert!(output.contains("flowline_ingest_requests_total 1"));
	assert!(output.contains("flowline_ingest_records_total 5"));
	assert!(output.contains("flowline_ingest_batches_total 2"));
}

#[cfg(feature = "unit-tests")]
#[test]
fn test_metrics_gauge_operations() {
	let registry = MetricsRegistry::new();

	registry.ingest_queue_length.set(50);
	let output = registry.encode();
	assert!(output.contains("flowline_ingest_queue_length 50"));

	registry.ingest_queue_length.inc();
	registry.ingest_queue_length.dec();
	let output2 = registry.encode();
	assert!(output2.contains("flowline_ingest_queue_length 50"));
}

#[cfg(feature = "unit-tests")]
#[test]
fn test_metrics_histogram_observations() {
	let registry = MetricsRegistry::new();

	registry.ingest_batch_commit_latency_seconds.observe(0.1);
	registry.ingest_batch_commit_latency_seconds.observe(0.5);
	registry.ingest_batch_commit_latency_seconds.observe(1.2);

	let output = registry.encode();

	assert!(output.contains("flowline_ingest_batch_commit_latency_seconds_bucket"));
	assert!(output.contains("flowline_ingest_batch_commit_latency_seconds_sum"));
	assert!(output.contains("flowline_ingest_batch_commit_latency_seconds_count"));
}

#[cfg(feature = "unit-tests")]
#[test]
fn test_init_metrics() {
	let result = init_metrics();
	assert!(result.is_ok());
	let metrics = result.unwrap();
	assert!(!metrics.encode().is_empty());
}

#[cfg(feature = "integration-tests")]
#[tokio::test]
async fn test_batch_commit_updates_metrics() {
	use flowline::coordinator::{self, CoordinatorConfig};
	use flowline::repo::MessageRepository;
	use flowline::store::BufferStore;
	use flowline::testutil::{InMemoryBufferStore, InMemoryMessageRepository};
	use std::sync::Arc;
	use std::time::Duration;

	let buffer = Arc::new(InMemoryBufferStore::new()) as Arc<dyn BufferStore>;
	let repo = Arc::new(InMemoryMessageRepository::new()) as Arc<dyn MessageRepository>;
	let metrics = Arc::new(MetricsRegistry::new());

	buffer
		.push(&flowline::model::Message {
			tracking_id: "t1".into(),
			user_id: 1,
			channel_id: 1,
			content: "hello".into(),
			created_at: chrono::Utc::now(),
		})
		.await
		.unwrap();

	let config = CoordinatorConfig {
		batch_size: 1,
		batch_timeout: Duration::from_secs(30),
		rps_window: Duration::from_secs(10),
	};
	let handle = coordinator::spawn(buffer.clone(), repo.clone(), metrics.clone(), config);

	tokio::time::sleep(Duration::from_millis(200)).await;
	handle.abort();

	let output = metrics.encode();
	assert!(output.contains("flowline_ingest_batches_total 1"));
}
