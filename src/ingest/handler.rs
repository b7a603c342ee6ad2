use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Utc};
use futures_util::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::ApiError;
use crate::model::Message;
use crate::state::AppState;

const MAX_SIMULATE_CONCURRENCY: usize = 16;

#[derive(Deserialize)]
pub struct EnqueueRequest {
	user_id: Option<i64>,
	channel_id: Option<i64>,
	content: Option<String>,
	created_at: Option<DateTime<Utc>>,
}

#[cfg(any(test, feature = "integration-tests"))]
impl EnqueueRequest {
	pub fn for_test(user_id: i64, channel_id: i64, content: &str) -> Self {
		Self {
			user_id: Some(user_id),
			channel_id: Some(channel_id),
			content: Some(content.to_string()),
			created_at: None,
		}
	}
}

#[derive(Serialize)]
pub struct EnqueueResponse {
	tracking_id: String,
	queued_at: DateTime<Utc>,
}

/// `POST /messages` — Enqueue-one. Assigns a UUIDv7 tracking id, stamps
/// `created_at` if absent, and appends to the buffer before acknowledging.
pub async fn enqueue_one(
	State(state): State<AppState>,
	Json(req): Json<EnqueueRequest>,
) -> Result<impl IntoResponse, ApiError> {
	let started = std::time::Instant::now();

	let result = enqueue_one_inner(&state, req).await;
	if result.is_err() {
		state.metrics.ingest_errors_total.inc();
	}
	state
		.metrics
		.ingest_duration_seconds
		.observe(started.elapsed().as_secs_f64());
	result
}

async fn enqueue_one_inner(
	state: &AppState,
	req: EnqueueRequest,
) -> Result<impl IntoResponse, ApiError> {
	let user_id = req
		.user_id
		.ok_or_else(|| ApiError::InvalidPayload("user_id is required".into()))?;
	let channel_id = req
		.channel_id
		.ok_or_else(|| ApiError::InvalidPayload("channel_id is required".into()))?;
	let content = req
		.content
		.filter(|c| !c.is_empty())
		.ok_or_else(|| ApiError::InvalidPayload("content is required".into()))?;
	let created_at = req.created_at.unwrap_or_else(Utc::now);

	let tracking_id = Uuid::now_v7().to_string();
	let message = Message {
		tracking_id: tracking_id.clone(),
		user_id,
		channel_id,
		content,
		created_at,
	};

	state
		.buffer
		.push(&message)
		.await
		.map_err(|e| ApiError::UpstreamUnavailable(e.to_string()))?;

	state.metrics.ingest_requests_total.inc();
	state.metrics.ingest_records_total.inc();

	let queued_at = Utc::now();
	Ok((
		StatusCode::ACCEPTED,
		Json(EnqueueResponse {
			tracking_id,
			queued_at,
		}),
	))
}

#[derive(Deserialize)]
pub struct SimulateRequest {
	count: i64,
}

#[derive(Serialize)]
pub struct SimulateResponse {
	tracking_ids: Vec<String>,
	count: i64,
	expected_complete_batches: i64,
	expected_remaining_queued: i64,
}

/// `POST /simulate` — Simulate-bulk. Generates `count` synthetic messages
/// with bounded-concurrency fan-out; only tracking ids whose append was
/// acknowledged are returned.
pub async fn simulate_bulk(
	State(state): State<AppState>,
	Json(req): Json<SimulateRequest>,
) -> Result<impl IntoResponse, ApiError> {
	let started = std::time::Instant::now();
	let result = simulate_bulk_inner(&state, req).await;
	if result.is_err() {
		state.metrics.ingest_errors_total.inc();
	}
	state
		.metrics
		.ingest_duration_seconds
		.observe(started.elapsed().as_secs_f64());
	result
}

async fn simulate_bulk_inner(
	state: &AppState,
	req: SimulateRequest,
) -> Result<impl IntoResponse, ApiError> {
	let count = req.count;
	if !(1..=10_000).contains(&count) {
		return Err(ApiError::InvalidPayload(format!(
			"count must be in [1, 10000], got {count}"
		)));
	}

	let buffer = state.buffer.clone();
	let results: Vec<anyhow::Result<String>> = stream::iter(0..count)
		.map(|_| {
			let buffer = buffer.clone();
			async move {
				let tracking_id = Uuid::now_v7().to_string();
				let message = Message {
					tracking_id: tracking_id.clone(),
					user_id: 0,
					channel_id: 0,
					content: "simulated".to_string(),
					created_at: Utc::now(),
				};
				buffer.push(&message).await?;
				Ok(tracking_id)
			}
		})
		.buffer_unordered(MAX_SIMULATE_CONCURRENCY)
		.collect()
		.await;

	let mut tracking_ids = Vec::with_capacity(count as usize);
	for result in results {
		match result {
			Ok(tracking_id) => tracking_ids.push(tracking_id),
			Err(e) => return Err(ApiError::UpstreamUnavailable(e.to_string())),
		}
	}

	state.metrics.ingest_requests_total.inc();
	state.metrics.ingest_records_total.inc_by(count as u64);

	let threshold = state.settings.batch_size as i64;
	let expected_complete_batches = count / threshold.max(1);
	let expected_remaining_queued = count % threshold.max(1);

	Ok((
		StatusCode::ACCEPTED,
		Json(SimulateResponse {
			tracking_ids,
			count,
			expected_complete_batches,
			expected_remaining_queued,
		}),
	))
}

#[derive(Deserialize, Default)]
pub struct RecentQuery {
	limit: Option<i64>,
}

/// `GET /messages?limit=N` — Retrieve-recent. Defaults to 50, capped at 500.
pub async fn retrieve_recent(
	State(state): State<AppState>,
	Query(q): Query<RecentQuery>,
) -> Result<impl IntoResponse, ApiError> {
	let limit = q.limit.unwrap_or(50).clamp(1, 500);
	let rows = state
		.repo
		.recent(limit)
		.await
		.map_err(|e| ApiError::StoreUnavailable(e.to_string()))?;
	Ok(Json(rows))
}

#[derive(Serialize)]
pub struct QueueStatusResponse {
	buffer_length: i64,
	worker_buffer_size: i64,
	batch_start_time: Option<f64>,
}

/// `GET /queue/status` — buffer list length plus the coordinator's reported
/// `worker_buffer_size`/`batch_start_time` visibility counters.
pub async fn queue_status(State(state): State<AppState>) -> impl IntoResponse {
	let buffer_length = state.buffer.buffer_len().await.unwrap_or(0);
	let counters = state.buffer.read_counters().await.unwrap_or_default();
	Json(QueueStatusResponse {
		buffer_length,
		worker_buffer_size: counters.worker_buffer_size,
		batch_start_time: counters.batch_start_time,
	})
}

#[derive(Serialize)]
pub struct ResetResponse {
	deleted_messages: u64,
	cleared_queue: i64,
}

/// `DELETE /reset` — Administrative-reset. Truncates the persisted table
/// and drains the buffer; does not touch `total_messages`/`total_batches`
/// (see the open-question resolution in DESIGN.md).
pub async fn administrative_reset(
	State(state): State<AppState>,
) -> Result<impl IntoResponse, ApiError> {
	let deleted_messages = state
		.repo
		.reset()
		.await
		.map_err(|e| ApiError::StoreUnavailable(e.to_string()))?;
	let cleared_queue = state
		.buffer
		.drain_buffer()
		.await
		.map_err(|e| ApiError::UpstreamUnavailable(e.to_string()))?;
	Ok(Json(ResetResponse {
		deleted_messages,
		cleared_queue,
	}))
}

#[cfg(feature = "ingest-tests")]
mod tests {
	use super::*;
	use crate::config::Settings;
	use crate::observability::MetricsRegistry;
	use crate::repo::MessageRepository;
	use crate::store::BufferStore;
	use crate::testutil::{InMemoryBufferStore, InMemoryMessageRepository};
	use std::sync::Arc;

	fn test_state() -> AppState {
		AppState {
			buffer: Arc::new(InMemoryBufferStore::new()) as Arc<dyn BufferStore>,
			repo: Arc::new(InMemoryMessageRepository::new()) as Arc<dyn MessageRepository>,
			metrics: Arc::new(MetricsRegistry::new()),
			settings: Arc::new(Settings::default()),
		}
	}

	#[tokio::test]
	async fn enqueue_one_rejects_missing_fields() {
		let state = test_state();
		let req = EnqueueRequest {
			user_id: None,
			channel_id: Some(1),
			content: Some("hi".into()),
			created_at: None,
		};
		let result = enqueue_one(State(state), Json(req)).await;
		assert!(result.is_err());
	}

	#[tokio::test]
	async fn enqueue_one_appends_and_returns_tracking_id() {
		let state = test_state();
		let req = EnqueueRequest {
			user_id: Some(1),
			channel_id: Some(2),
			content: Some("hello".into()),
			created_at: None,
		};
		let response = enqueue_one(State(state.clone()), Json(req))
			.await
			.unwrap()
			.into_response();
		assert_eq!(response.status(), StatusCode::ACCEPTED);
		assert_eq!(state.buffer.buffer_len().await.unwrap(), 1);
	}

	#[tokio::test]
	async fn simulate_bulk_rejects_out_of_range_count() {
		let state = test_state();
		let result = simulate_bulk(State(state), Json(SimulateRequest { count: 0 })).await;
		assert!(result.is_err());
	}

	#[tokio::test]
	async fn simulate_bulk_computes_batch_hints() {
		let state = test_state();
		let response = simulate_bulk(State(state.clone()), Json(SimulateRequest { count: 127 }))
			.await
			.unwrap()
			.into_response();
		assert_eq!(response.status(), StatusCode::ACCEPTED);
		assert_eq!(state.buffer.buffer_len().await.unwrap(), 127);
	}

	#[tokio::test]
	async fn administrative_reset_drains_both_stores() {
		let state = test_state();
		state
			.buffer
			.push(&Message {
				tracking_id: "a".into(),
				user_id: 1,
				channel_id: 1,
				content: "x".into(),
				created_at: Utc::now(),
			})
			.await
			.unwrap();
		state
			.repo
			.insert_batch(&[Message {
				tracking_id: "b".into(),
				user_id: 1,
				channel_id: 1,
				content: "y".into(),
				created_at: Utc::now(),
			}])
			.await
			.unwrap();

		let response = administrative_reset(State(state)).await.unwrap().into_response();
		assert_eq!(response.status(), StatusCode::OK);
	}
}
