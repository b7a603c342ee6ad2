use axum::{extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
struct HealthBody {
	status: &'static str,
	buffer: &'static str,
	queue_length: i64,
}

/// `GET /health`: reports buffer connectivity and its current length. Never
/// fails the request itself — a disconnected buffer is reported in the
/// body with a 200, since health checks should not themselves be flaky.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
	match state.buffer.ping().await {
		Ok(()) => {
			let queue_length = state.buffer.buffer_len().await.unwrap_or(0);
			(
				StatusCode::OK,
				axum::Json(HealthBody {
					status: "ok",
					buffer: "connected",
					queue_length,
				}),
			)
		}
		Err(_) => (
			StatusCode::OK,
			axum::Json(HealthBody {
				status: "degraded",
				buffer: "disconnected",
				queue_length: 0,
			}),
		),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::observability::MetricsRegistry;
	use crate::repo::MessageRepository;
	use crate::testutil::{InMemoryBufferStore, InMemoryMessageRepository};
	use axum::response::IntoResponse;
	use std::sync::Arc;

	fn state_with(buffer: Arc<dyn crate::store::BufferStore>) -> AppState {
		AppState {
			buffer,
			repo: Arc::new(InMemoryMessageRepository::new()) as Arc<dyn MessageRepository>,
			metrics: Arc::new(MetricsRegistry::new()),
			settings: Arc::new(crate::config::Settings::default()),
		}
	}

	#[tokio::test]
	async fn health_reports_connected_buffer() {
		let buffer = Arc::new(InMemoryBufferStore::new());
		let response = health(State(state_with(buffer))).await.into_response();
		assert_eq!(response.status(), StatusCode::OK);
	}
}
