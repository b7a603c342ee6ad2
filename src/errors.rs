use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// The error taxonomy at the ingestion boundary. `CommitFailed` and
/// `MalformedBufferEntry` are internal-only and never cross the HTTP
/// boundary; they are logged and handled by the Batch Coordinator.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
	#[error("invalid payload: {0}")]
	InvalidPayload(String),

	#[error("upstream buffer unavailable: {0}")]
	UpstreamUnavailable(String),

	#[error("store unavailable: {0}")]
	StoreUnavailable(String),

	#[error("commit failed: {0}")]
	#[allow(dead_code)]
	CommitFailed(String),

	#[error("observer write stalled")]
	ObserverWriteStalled,

	#[error("malformed buffer entry: {0}")]
	#[allow(dead_code)]
	MalformedBufferEntry(String),
}

impl ApiError {
	fn kind(&self) -> &'static str {
		match self {
			ApiError::InvalidPayload(_) => "invalid_payload",
			ApiError::UpstreamUnavailable(_) => "upstream_unavailable",
			ApiError::StoreUnavailable(_) => "store_unavailable",
			ApiError::CommitFailed(_) => "commit_failed",
			ApiError::ObserverWriteStalled => "observer_write_stalled",
			ApiError::MalformedBufferEntry(_) => "malformed_buffer_entry",
		}
	}

	fn status(&self) -> StatusCode {
		match self {
			ApiError::InvalidPayload(_) => StatusCode::BAD_REQUEST,
			ApiError::UpstreamUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
			ApiError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
			// internal-only variants; a handler should never construct these,
			// but map them conservatively if one ever escapes.
			ApiError::CommitFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
			ApiError::ObserverWriteStalled => StatusCode::INTERNAL_SERVER_ERROR,
			ApiError::MalformedBufferEntry(_) => StatusCode::INTERNAL_SERVER_ERROR,
		}
	}

	fn retriable(&self) -> bool {
		matches!(
			self,
			ApiError::UpstreamUnavailable(_) | ApiError::StoreUnavailable(_)
		)
	}
}

#[derive(Serialize)]
struct ErrorBody {
	error: ErrorPayload,
}

#[derive(Serialize)]
struct ErrorPayload {
	kind: &'static str,
	message: String,
	retriable: bool,
}

impl IntoResponse for ApiError {
	fn into_response(self) -> Response {
		let status = self.status();
		let body = ErrorBody {
			error: ErrorPayload {
				kind: self.kind(),
				message: self.to_string(),
				retriable: self.retriable(),
			},
		};
		(status, axum::Json(body)).into_response()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn invalid_payload_maps_to_400() {
		let err = ApiError::InvalidPayload("missing user_id".into());
		assert_eq!(err.status(), StatusCode::BAD_REQUEST);
		assert!(!err.retriable());
	}

	#[test]
	fn upstream_unavailable_is_retriable_503() {
		let err = ApiError::UpstreamUnavailable("buffer unreachable".into());
		assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
		assert!(err.retriable());
	}
}
