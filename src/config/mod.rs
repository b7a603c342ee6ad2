use std::time::Duration;

use anyhow::Result;
use serde::Deserialize;

/// Runtime configuration for the ingestion pipeline.
///
/// Values are loaded from (in order): an optional `config` file, then the
/// explicit environment variables named below. There is no shared prefix
/// across these variables, so each is read directly rather than through a
/// single `config::Environment` source.
#[derive(Debug, Deserialize, PartialEq, Clone)]
pub struct Settings {
	pub host: String,
	pub port: u16,

	pub batch_size: usize,
	pub batch_timeout_secs: u64,

	pub buffer_host: String,
	pub buffer_port: u16,

	pub store_host: String,
	pub store_port: u16,
	pub store_db: String,
	pub store_user: String,
	pub store_password: String,

	pub broadcast_interval_ms: u64,
	pub rps_window_secs: u64,

	pub rate_limit_burst: u32,
	pub rate_limit_rps: u32,

	pub log_level: Option<String>,
}

impl Default for Settings {
	fn default() -> Self {
		Self {
			host: "0.0.0.0".to_string(),
			port: 8080,
			batch_size: 50,
			batch_timeout_secs: 30,
			buffer_host: "127.0.0.1".to_string(),
			buffer_port: 6379,
			store_host: "127.0.0.1".to_string(),
			store_port: 5432,
			store_db: "flowline".to_string(),
			store_user: "flowline".to_string(),
			store_password: "flowline".to_string(),
			broadcast_interval_ms: 500,
			rps_window_secs: 10,
			rate_limit_burst: 100,
			rate_limit_rps: 50,
			log_level: Some("info".to_string()),
		}
	}
}

impl Settings {
	pub fn database_url(&self) -> String {
		format!(
			"postgres://{}:{}@{}:{}/{}",
			self.store_user, self.store_password, self.store_host, self.store_port, self.store_db
		)
	}

	pub fn batch_timeout(&self) -> Duration {
		Duration::from_secs(self.batch_timeout_secs)
	}

	pub fn broadcast_interval(&self) -> Duration {
		Duration::from_millis(self.broadcast_interval_ms)
	}

	pub fn rps_window(&self) -> Duration {
		Duration::from_secs(self.rps_window_secs)
	}
}

/// Partial settings used to overlay a config file on top of defaults.
#[derive(Debug, Deserialize)]
struct PartialSettings {
	host: Option<String>,
	port: Option<u16>,
	batch_size: Option<usize>,
	batch_timeout_secs: Option<u64>,
	buffer_host: Option<String>,
	buffer_port: Option<u16>,
	store_host: Option<String>,
	store_port: Option<u16>,
	store_db: Option<String>,
	store_user: Option<String>,
	store_password: Option<String>,
	broadcast_interval_ms: Option<u64>,
	rps_window_secs: Option<u64>,
	rate_limit_burst: Option<u32>,
	rate_limit_rps: Option<u32>,
	log_level: Option<String>,
}

/// Load settings from an optional config file, then the explicit
/// environment variables the pipeline names.
pub fn load() -> Result<Settings> {
	let builder = config::Config::builder().add_source(config::File::with_name("config").required(false));
	let cfg = builder.build()?;
	let partial: PartialSettings = cfg.try_deserialize().unwrap_or(PartialSettings {
		host: None,
		port: None,
		batch_size: None,
		batch_timeout_secs: None,
		buffer_host: None,
		buffer_port: None,
		store_host: None,
		store_port: None,
		store_db: None,
		store_user: None,
		store_password: None,
		broadcast_interval_ms: None,
		rps_window_secs: None,
		rate_limit_burst: None,
		rate_limit_rps: None,
		log_level: None,
	});

	let mut s = Settings::default();
	if let Some(v) = partial.host {
		s.host = v;
	}
	if let Some(v) = partial.port {
		s.port = v;
	}
	if let Some(v) = partial.batch_size {
		s.batch_size = v;
	}
	if let Some(v) = partial.batch_timeout_secs {
		s.batch_timeout_secs = v;
	}
	if let Some(v) = partial.buffer_host {
		s.buffer_host = v;
	}
	if let Some(v) = partial.buffer_port {
		s.buffer_port = v;
	}
	if let Some(v) = partial.store_host {
		s.store_host = v;
	}
	if let Some(v) = partial.store_port {
		s.store_port = v;
	}
	if let Some(v) = partial.store_db {
		s.store_db = v;
	}
	if let Some(v) = partial.store_user {
		s.store_user = v;
	}
	if let Some(v) = partial.store_password {
		s.store_password = v;
	}
	if let Some(v) = partial.broadcast_interval_ms {
		s.broadcast_interval_ms = v;
	}
	if let Some(v) = partial.rps_window_secs {
		s.rps_window_secs = v;
	}
	if let Some(v) = partial.rate_limit_burst {
		s.rate_limit_burst = v;
	}
	if let Some(v) = partial.rate_limit_rps {
		s.rate_limit_rps = v;
	}
	if let Some(v) = partial.log_level {
		s.log_level = Some(v);
	}

	// Explicit environment reads take precedence. Some environments (CI,
	// test harnesses) set env vars in ways the `config` crate doesn't map
	// as expected; read the named variables directly to be sure overrides
	// take effect.
	if let Ok(v) = std::env::var("HOST") {
		if !v.is_empty() {
			s.host = v;
		}
	}
	if let Ok(v) = std::env::var("PORT") {
		if let Ok(n) = v.parse() {
			s.port = n;
		}
	}
	if let Ok(v) = std::env::var("BATCH_SIZE") {
		if let Ok(n) = v.parse() {
			s.batch_size = n;
		}
	}
	if let Ok(v) = std::env::var("BATCH_TIMEOUT") {
		if let Ok(n) = v.parse() {
			s.batch_timeout_secs = n;
		}
	}
	if let Ok(v) = std::env::var("BUFFER_HOST") {
		if !v.is_empty() {
			s.buffer_host = v;
		}
	}
	if let Ok(v) = std::env::var("BUFFER_PORT") {
		if let Ok(n) = v.parse() {
			s.buffer_port = n;
		}
	}
	if let Ok(v) = std::env::var("STORE_HOST") {
		if !v.is_empty() {
			s.store_host = v;
		}
	}
	if let Ok(v) = std::env::var("STORE_PORT") {
		if let Ok(n) = v.parse() {
			s.store_port = n;
		}
	}
	if let Ok(v) = std::env::var("STORE_DB") {
		if !v.is_empty() {
			s.store_db = v;
		}
	}
	if let Ok(v) = std::env::var("STORE_USER") {
		if !v.is_empty() {
			s.store_user = v;
		}
	}
	if let Ok(v) = std::env::var("STORE_PASSWORD") {
		if !v.is_empty() {
			s.store_password = v;
		}
	}
	if let Ok(v) = std::env::var("BROADCAST_INTERVAL_MS") {
		if let Ok(n) = v.parse() {
			s.broadcast_interval_ms = n;
		}
	}
	if let Ok(v) = std::env::var("RPS_WINDOW_SECONDS") {
		if let Ok(n) = v.parse() {
			s.rps_window_secs = n;
		}
	}
	if let Ok(v) = std::env::var("LOG_LEVEL") {
		if !v.is_empty() {
			s.log_level = Some(v);
		}
	}

	Ok(s)
}

#[cfg(feature = "unit-tests")]
mod tests {
	use super::*;
	use std::env;

	const VARS: &[&str] = &[
		"HOST",
		"PORT",
		"BATCH_SIZE",
		"BATCH_TIMEOUT",
		"BUFFER_HOST",
		"BUFFER_PORT",
		"STORE_HOST",
		"STORE_PORT",
		"STORE_DB",
		"STORE_USER",
		"STORE_PASSWORD",
		"BROADCAST_INTERVAL_MS",
		"RPS_WINDOW_SECONDS",
		"LOG_LEVEL",
	];

	#[test]
	fn test_load_defaults_and_env_overlay() {
		let originals: Vec<(&str, Option<std::ffi::OsString>)> =
			VARS.iter().map(|v| (*v, env::var_os(v))).collect();
		for v in VARS {
			unsafe { env::remove_var(v) };
		}

		let s = load().expect("load should succeed with defaults");
		let d = Settings::default();
		assert_eq!(s, d);

		unsafe { env::set_var("BATCH_SIZE", "75") };
		unsafe { env::set_var("BATCH_TIMEOUT", "12") };
		unsafe { env::set_var("STORE_HOST", "db.internal") };
		unsafe { env::set_var("BROADCAST_INTERVAL_MS", "250") };

		let s2 = load().expect("load should succeed with env");
		assert_eq!(s2.batch_size, 75);
		assert_eq!(s2.batch_timeout_secs, 12);
		assert_eq!(s2.store_host, "db.internal");
		assert_eq!(s2.broadcast_interval_ms, 250);

		for (name, value) in originals {
			match value {
				Some(v) => unsafe { env::set_var(name, v) },
				None => unsafe { env::remove_var(name) },
			}
		}
	}

	#[test]
	fn database_url_composes_store_fields() {
		let mut s = Settings::default();
		s.store_user = "u".into();
		s.store_password = "p".into();
		s.store_host = "h".into();
		s.store_port = 1234;
		s.store_db = "d".into();
		assert_eq!(s.database_url(), "postgres://u:p@h:1234/d");
	}
}
