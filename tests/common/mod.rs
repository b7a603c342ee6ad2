/// Common test utilities for the integration test suite.
use std::env;
use tokio::time::{Duration, sleep};

/// Check if integration tests against real Redis/Postgres instances are
/// enabled via environment variable.
pub fn is_live_backends_enabled() -> bool {
	env::var("RUN_LIVE_BACKEND_TESTS").is_ok()
}

/// Skip the test with a message if live-backend tests are not enabled.
/// Returns true if the test should proceed, false if it should be skipped.
pub fn check_live_backends_enabled() -> bool {
	if !is_live_backends_enabled() {
		eprintln!("Skipping live-backend test; set RUN_LIVE_BACKEND_TESTS=1 to enable");
		return false;
	}
	true
}

/// Wait for Postgres to accept connections with a maximum retry count.
pub async fn wait_for_postgres(
	connection_string: &str,
	max_retries: u32,
) -> Result<sqlx::PgPool, String> {
	let mut attempts = 0;
	loop {
		match sqlx::PgPool::connect(connection_string).await {
			Ok(pool) => return Ok(pool),
			Err(e) => {
				attempts += 1;
				if attempts >= max_retries {
					return Err(format!(
						"Postgres did not become ready after {} attempts: {}",
						max_retries, e
					));
				}
				sleep(Duration::from_secs(1)).await;
			}
		}
	}
}

/// Wait for the Metrics Store (Redis) to accept connections.
pub async fn wait_for_buffer(host: &str, port: u16, max_retries: u32) -> Result<(), String> {
	let mut attempts = 0;
	loop {
		match flowline::store::RedisBufferStore::connect(host, port).await {
			Ok(_) => return Ok(()),
			Err(e) => {
				attempts += 1;
				if attempts >= max_retries {
					return Err(format!(
						"buffer store did not become ready after {} attempts: {}",
						max_retries, e
					));
				}
				sleep(Duration::from_secs(1)).await;
			}
		}
	}
}
