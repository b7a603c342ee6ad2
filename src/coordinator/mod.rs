use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use uuid::Uuid;

use crate::model::{Message, PersistenceEvent};
use crate::observability::MetricsRegistry;
use crate::repo::MessageRepository;
use crate::store::{BufferStore, PopOutcome};

/// Idle poll interval when the staging area is empty: the buffer-pop
/// timeout has to be bounded even when nothing is accumulating, or a dead
/// connection would block the loop forever.
const IDLE_POLL: Duration = Duration::from_secs(1);
/// Backoff before the single commit retry on transaction failure.
const COMMIT_RETRY_BACKOFF: Duration = Duration::from_millis(200);

pub struct CoordinatorConfig {
	pub batch_size: usize,
	pub batch_timeout: Duration,
	pub rps_window: Duration,
}

/// O(1)-state sliding-window RPS estimator: a running count and a
/// window-start instant, reset once the window has elapsed.
struct RpsEstimator {
	window: Duration,
	count: u64,
	window_start: Instant,
}

impl RpsEstimator {
	fn new(window: Duration) -> Self {
		Self {
			window,
			count: 0,
			window_start: Instant::now(),
		}
	}

	/// Adds `n` to the running count and returns the RPS value to publish.
	/// Resets count and window-start once the window has elapsed;
	/// otherwise reports the intermediate estimate without resetting.
	fn record(&mut self, n: u64) -> f64 {
		self.count += n;
		let elapsed = self.window_start.elapsed();
		let elapsed_secs = elapsed.as_secs_f64().max(0.001);
		let rps = self.count as f64 / elapsed_secs;
		if elapsed >= self.window {
			self.count = 0;
			self.window_start = Instant::now();
		}
		rps
	}
}

fn epoch_now() -> f64 {
	let now = Utc::now();
	now.timestamp() as f64 + now.timestamp_subsec_nanos() as f64 / 1_000_000_000.0
}

/// Spawn the coordinator's resident task. It has no public contract beyond
/// its side effects: writes to the relational store, counter updates on the
/// Metrics Store, and pub/sub publications.
pub fn spawn(
	buffer: Arc<dyn BufferStore>,
	repo: Arc<dyn MessageRepository>,
	metrics: Arc<MetricsRegistry>,
	config: CoordinatorConfig,
) -> tokio::task::JoinHandle<()> {
	tokio::spawn(run(buffer, repo, metrics, config))
}

async fn update_visibility(
	buffer: &Arc<dyn BufferStore>,
	metrics: &Arc<MetricsRegistry>,
	staging_len: usize,
	batch_start_wall: Option<f64>,
) {
	if let Err(e) = buffer.set_worker_buffer_size(staging_len as i64).await {
		tracing::warn!(error = %e, "failed to publish worker_buffer_size");
	}
	if let Err(e) = buffer.set_batch_start_time(batch_start_wall).await {
		tracing::warn!(error = %e, "failed to publish batch_start_time");
	}
	metrics.ingest_queue_length.set(staging_len as i64);
}

pub async fn run(
	buffer: Arc<dyn BufferStore>,
	repo: Arc<dyn MessageRepository>,
	metrics: Arc<MetricsRegistry>,
	config: CoordinatorConfig,
) {
	let mut staging: Vec<Message> = Vec::new();
	// Instant anchors the timeout decision (monotonic); the wall-clock
	// mirror is what gets published as `batch_start_time`.
	let mut batch_start_instant: Option<Instant> = None;
	let mut batch_start_wall: Option<f64> = None;
	let mut rps = RpsEstimator::new(config.rps_window);

	loop {
		let wait = match batch_start_instant {
			Some(start) => {
				let elapsed = start.elapsed();
				if elapsed >= config.batch_timeout {
					Duration::ZERO
				} else {
					config.batch_timeout - elapsed
				}
			}
			None => IDLE_POLL,
		};

		match buffer.pop_front(wait).await {
			Ok(PopOutcome::Message(message)) => {
				if staging.is_empty() {
					batch_start_instant = Some(Instant::now());
					batch_start_wall = Some(epoch_now());
				}
				staging.push(message);
				update_visibility(&buffer, &metrics, staging.len(), batch_start_wall).await;

				if staging.len() >= config.batch_size {
					flush(
						&buffer,
						&repo,
						&metrics,
						&mut staging,
						&mut batch_start_instant,
						&mut batch_start_wall,
						&mut rps,
					)
					.await;
				}
			}
			Ok(PopOutcome::Empty) => {
				if let Some(start) = batch_start_instant {
					if start.elapsed() >= config.batch_timeout && !staging.is_empty() {
						flush(
							&buffer,
							&repo,
							&metrics,
							&mut staging,
							&mut batch_start_instant,
							&mut batch_start_wall,
							&mut rps,
						)
						.await;
					}
				}
			}
			Ok(PopOutcome::Malformed(detail)) => {
				tracing::warn!(detail = %detail, "discarding malformed buffer entry");
			}
			Err(e) => {
				tracing::warn!(error = %e, "buffer pop failed; backing off");
				tokio::time::sleep(Duration::from_millis(500)).await;
			}
		}
	}
}

#[allow(clippy::too_many_arguments)]
async fn flush(
	buffer: &Arc<dyn BufferStore>,
	repo: &Arc<dyn MessageRepository>,
	metrics: &Arc<MetricsRegistry>,
	staging: &mut Vec<Message>,
	batch_start_instant: &mut Option<Instant>,
	batch_start_wall: &mut Option<f64>,
	rps: &mut RpsEstimator,
) {
	let batch: Vec<Message> = staging.drain(..).collect();
	*batch_start_instant = None;
	*batch_start_wall = None;
	update_visibility(buffer, metrics, 0, None).await;

	if batch.is_empty() {
		return;
	}

	let batch_len = batch.len();
	let started = Instant::now();
	let mut attempt = 0u32;

	loop {
		match repo.insert_batch(&batch).await {
			Ok(_rows) => {
				let elapsed = started.elapsed();
				metrics.ingest_batches_total.inc();
				metrics
					.ingest_batch_commit_latency_seconds
					.observe(elapsed.as_secs_f64());

				if let Err(e) = buffer.incr_totals(batch_len as i64, 1).await {
					tracing::warn!(error = %e, "failed to increment totals counters");
				}
				let current_rps = rps.record(batch_len as u64);
				if let Err(e) = buffer.set_current_rps(current_rps).await {
					tracing::warn!(error = %e, "failed to publish current_rps");
				}

				let event = PersistenceEvent {
					batch_id: Uuid::now_v7().to_string(),
					ids: batch.iter().map(|m| m.tracking_id.clone()).collect(),
					batch_size: batch_len,
					timestamp: Utc::now(),
				};
				if let Err(e) = buffer.publish(&event).await {
					tracing::warn!(error = %e, batch_id = %event.batch_id, "publish failed; commit already happened");
				}

				tracing::info!(
					batch_id = %event.batch_id,
					batch_size = batch_len,
					latency_ms = elapsed.as_millis() as u64,
					"batch committed"
				);
				return;
			}
			Err(e) => {
				attempt += 1;
				if attempt > 1 {
					metrics.ingest_batch_failures_total.inc();
					if let Err(e2) = buffer.push_front_many(&batch).await {
						tracing::error!(error = %e2, original_error = %e, "dropped batch after failed requeue");
					} else {
						tracing::warn!(error = %e, batch_size = batch_len, "commit failed twice; requeued to buffer head");
					}
					return;
				}
				tracing::warn!(error = %e, "commit failed; retrying once after backoff");
				tokio::time::sleep(COMMIT_RETRY_BACKOFF).await;
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testutil::{InMemoryBufferStore, InMemoryMessageRepository};
	use std::sync::Arc;
	use tokio::time::{advance, pause};

	fn sample(tracking_id: &str) -> Message {
		Message {
			tracking_id: tracking_id.to_string(),
			user_id: 1,
			channel_id: 1,
			content: "hi".into(),
			created_at: Utc::now(),
		}
	}

	#[tokio::test]
	async fn volume_trigger_flushes_at_batch_size() {
		let buffer: Arc<dyn BufferStore> = Arc::new(InMemoryBufferStore::new());
		let repo: Arc<dyn MessageRepository> = Arc::new(InMemoryMessageRepository::new());
		for i in 0..3 {
			buffer.push(&sample(&format!("m{i}"))).await.unwrap();
		}

		let config = CoordinatorConfig {
			batch_size: 3,
			batch_timeout: Duration::from_secs(30),
			rps_window: Duration::from_secs(10),
		};
		let metrics = Arc::new(MetricsRegistry::new());
		let handle = spawn(buffer.clone(), repo.clone(), metrics, config);

		tokio::time::sleep(Duration::from_millis(100)).await;
		handle.abort();

		let rows = repo.recent(10).await.unwrap();
		assert_eq!(rows.len(), 3);
		assert_eq!(buffer.buffer_len().await.unwrap(), 0);
	}

	#[tokio::test(start_paused = true)]
	async fn time_trigger_flushes_without_reaching_batch_size() {
		let buffer: Arc<dyn BufferStore> = Arc::new(InMemoryBufferStore::new());
		let repo: Arc<dyn MessageRepository> = Arc::new(InMemoryMessageRepository::new());
		buffer.push(&sample("solo")).await.unwrap();

		let config = CoordinatorConfig {
			batch_size: 50,
			batch_timeout: Duration::from_secs(5),
			rps_window: Duration::from_secs(10),
		};
		let metrics = Arc::new(MetricsRegistry::new());
		let handle = spawn(buffer.clone(), repo.clone(), metrics, config);

		pause();
		advance(Duration::from_secs(6)).await;
		tokio::time::sleep(Duration::from_millis(50)).await;
		handle.abort();

		let rows = repo.recent(10).await.unwrap();
		assert_eq!(rows.len(), 1);
	}

	#[test]
	fn rps_estimator_reports_intermediate_then_resets() {
		let mut estimator = RpsEstimator::new(Duration::from_millis(10));
		let first = estimator.record(5);
		assert!(first >= 0.0);
		std::thread::sleep(Duration::from_millis(15));
		let _ = estimator.record(5);
		// after the window elapsed the internal count resets; a subsequent
		// immediate record reflects only the new addition.
		let third = estimator.record(1);
		assert!(third > 0.0);
	}
}
