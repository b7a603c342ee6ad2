pub mod config;
pub mod coordinator;
pub mod devops;
pub mod errors;
pub mod health;
pub mod ingest;
pub mod model;
pub mod observability;
pub mod repo;
pub mod state;
pub mod store;
pub mod telemetry;

#[cfg(any(feature = "unit-tests", feature = "integration-tests", test))]
pub mod testutil;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::http::header::{HeaderName, HeaderValue};
use axum::{
	Router,
	routing::{delete, get, post},
};
use tokio::net::TcpListener;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::normalize_path::NormalizePathLayer;
use tower_http::sensitive_headers::{
	SetSensitiveRequestHeadersLayer, SetSensitiveResponseHeadersLayer,
};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::timeout::RequestBodyTimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::coordinator::CoordinatorConfig;
use crate::repo::{MessageRepository, PgMessageRepository};
use crate::state::AppState;
use crate::store::{BufferStore, RedisBufferStore};

/// Connect to the Metrics Store, retrying with a fixed backoff. Redis is
/// expected to come up quickly in any deployment topology; a bounded retry
/// count avoids spinning forever on a genuine misconfiguration.
async fn connect_buffer_with_retry(
	host: &str,
	port: u16,
	max_retries: u32,
	backoff_ms: u64,
) -> anyhow::Result<RedisBufferStore> {
	let mut last_err = None;
	for attempt in 1..=max_retries {
		match RedisBufferStore::connect(host, port).await {
			Ok(store) => return Ok(store),
			Err(e) => {
				tracing::warn!(attempt, max_retries, error = %e, "buffer connect attempt failed");
				last_err = Some(e);
				if attempt < max_retries {
					tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
				}
			}
		}
	}
	Err(last_err.unwrap_or_else(|| anyhow::anyhow!("buffer connect failed with no recorded error")))
}

/// Connect to the relational store, retrying with a fixed backoff.
async fn connect_repo_with_retry(
	database_url: &str,
	max_retries: u32,
	backoff_ms: u64,
) -> anyhow::Result<PgMessageRepository> {
	let mut last_err = None;
	for attempt in 1..=max_retries {
		match PgMessageRepository::connect(database_url).await {
			Ok(repo) => return Ok(repo),
			Err(e) => {
				tracing::warn!(attempt, max_retries, error = %e, "store connect attempt failed");
				last_err = Some(e);
				if attempt < max_retries {
					tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
				}
			}
		}
	}
	Err(last_err.unwrap_or_else(|| anyhow::anyhow!("store connect failed with no recorded error")))
}

/// Start the hardened HTTP+WebSocket server and the resident Batch
/// Coordinator task. Logs and returns on unrecoverable startup failure rather
/// than panicking, so `main` can decide how to report it.
pub async fn run() {
	let obs_state = match crate::observability::init_observability().await {
		Ok(s) => s,
		Err(e) => {
			eprintln!("warning: failed to initialize observability: {}", e);
			crate::observability::ObservabilityState::default()
		}
	};

	let settings = match crate::config::load() {
		Ok(s) => s,
		Err(e) => {
			eprintln!("warning: failed to load config: {}", e);
			crate::config::Settings::default()
		}
	};

	let max_retries: u32 = std::env::var("FLOWLINE_CONNECT_RETRIES")
		.ok()
		.and_then(|s| s.parse().ok())
		.unwrap_or(30);
	let backoff_ms: u64 = std::env::var("FLOWLINE_CONNECT_BACKOFF_MS")
		.ok()
		.and_then(|s| s.parse().ok())
		.unwrap_or(1000);

	let buffer = match connect_buffer_with_retry(
		&settings.buffer_host,
		settings.buffer_port,
		max_retries,
		backoff_ms,
	)
	.await
	{
		Ok(store) => Arc::new(store) as Arc<dyn BufferStore>,
		Err(e) => {
			eprintln!("failed to connect to buffer store: {}", e);
			return;
		}
	};

	let repo = match connect_repo_with_retry(&settings.database_url(), max_retries, backoff_ms).await {
		Ok(repo) => Arc::new(repo) as Arc<dyn MessageRepository>,
		Err(e) => {
			eprintln!("failed to connect to relational store: {}", e);
			return;
		}
	};

	let settings = Arc::new(settings);
	let app_state = AppState {
		buffer: buffer.clone(),
		repo: repo.clone(),
		metrics: obs_state.metrics.clone(),
		settings: settings.clone(),
	};

	let coordinator_config = CoordinatorConfig {
		batch_size: settings.batch_size,
		batch_timeout: settings.batch_timeout(),
		rps_window: settings.rps_window(),
	};
	let metrics = obs_state.metrics.clone();
	crate::coordinator::spawn(buffer, repo, metrics, coordinator_config);

	let app = Router::new()
		.route(
			"/messages",
			post(crate::ingest::enqueue_one).get(crate::ingest::retrieve_recent),
		)
		.route("/simulate", post(crate::ingest::simulate_bulk))
		.route("/queue/status", get(crate::ingest::queue_status))
		.route("/reset", delete(crate::ingest::administrative_reset))
		.route("/health", get(crate::health::health))
		.route("/ws/stats", get(crate::telemetry::stats_socket))
		.route(
			"/metrics",
			get({
				let metrics = obs_state.metrics.clone();
				move || {
					let metrics = metrics.clone();
					async move { metrics.encode() }
				}
			}),
		)
		.layer(TraceLayer::new_for_http())
		.layer(NormalizePathLayer::trim_trailing_slash())
		.layer(SetResponseHeaderLayer::if_not_present(
			HeaderName::from_static("strict-transport-security"),
			HeaderValue::from_static("max-age=63072000; includeSubDomains; preload"),
		))
		.layer(SetResponseHeaderLayer::if_not_present(
			HeaderName::from_static("x-frame-options"),
			HeaderValue::from_static("DENY"),
		))
		.layer(SetResponseHeaderLayer::if_not_present(
			HeaderName::from_static("x-content-type-options"),
			HeaderValue::from_static("nosniff"),
		))
		.layer(SetResponseHeaderLayer::if_not_present(
			HeaderName::from_static("referrer-policy"),
			HeaderValue::from_static("strict-origin-when-cross-origin"),
		))
		.layer(CatchPanicLayer::new())
		.layer(RequestBodyLimitLayer::new(10 * 1024 * 1024))
		.layer(RequestBodyTimeoutLayer::new(Duration::from_secs(30)))
		.layer(crate::devops::SharedRateLimitLayer::new(
			settings.rate_limit_burst as usize,
			settings.rate_limit_rps,
		))
		.layer(SetSensitiveRequestHeadersLayer::from_shared(Arc::from(
			vec![
				HeaderName::from_static("authorization"),
				HeaderName::from_static("cookie"),
			]
			.into_boxed_slice(),
		)))
		.layer(SetSensitiveResponseHeadersLayer::from_shared(Arc::from(
			vec![HeaderName::from_static("set-cookie")].into_boxed_slice(),
		)))
		.with_state(app_state);

	let bind_addr: SocketAddr = match format!("{}:{}", settings.host, settings.port).parse() {
		Ok(a) => a,
		Err(e) => {
			eprintln!("invalid listen address: {}", e);
			return;
		}
	};

	let listener = match TcpListener::bind(bind_addr).await {
		Ok(l) => l,
		Err(e) => {
			eprintln!("failed to bind {}: {}", bind_addr, e);
			return;
		}
	};

	tracing::info!(address = %bind_addr, "flowline listening");

	if let Err(e) = axum::serve(listener, app.into_make_service()).await {
		eprintln!("server error: {}", e);
	}
}
