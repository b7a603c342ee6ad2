use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use redis::AsyncCommands;
use redis::aio::{ConnectionManager, MultiplexedConnection};
use tokio::sync::Mutex;

use crate::model::{CounterSnapshot, Message, PersistenceEvent};

const BUFFER_KEY: &str = "pending_messages";
const TOTAL_MESSAGES_KEY: &str = "total_messages";
const TOTAL_BATCHES_KEY: &str = "total_batches";
const CURRENT_RPS_KEY: &str = "current_rps";
const WORKER_BUFFER_SIZE_KEY: &str = "worker_buffer_size";
const BATCH_START_TIME_KEY: &str = "batch_start_time";
const NOTIFICATIONS_CHANNEL: &str = "batch_notifications";

/// Outcome of a single destructive buffer read. `Malformed` is discarded by
/// the caller with a log entry and never affects the batch timer.
pub enum PopOutcome {
	Empty,
	Message(Message),
	Malformed(String),
}

/// The Metrics Store contract: a buffer list, scalar counters, and a
/// best-effort pub/sub channel, behind one object-safe trait so the
/// coordinator, ingestion endpoint, and telemetry broadcaster depend on an
/// interface rather than a concrete Redis client.
#[async_trait]
pub trait BufferStore: Send + Sync + 'static {
	async fn push(&self, message: &Message) -> Result<()>;
	/// Re-queue messages to the head of the buffer, preserving their
	/// original relative order, so the next pop sees them before newer
	/// arrivals.
	async fn push_front_many(&self, messages: &[Message]) -> Result<()>;
	/// Block for up to `timeout` waiting for one entry; returns `Empty` on
	/// timeout rather than an error so the coordinator can re-evaluate its
	/// flush condition.
	async fn pop_front(&self, timeout: Duration) -> Result<PopOutcome>;
	async fn buffer_len(&self) -> Result<i64>;
	/// Drain the entire buffer, returning the number of entries removed.
	async fn drain_buffer(&self) -> Result<i64>;

	async fn read_counters(&self) -> Result<CounterSnapshot>;
	async fn set_worker_buffer_size(&self, n: i64) -> Result<()>;
	/// `None` clears the counter to the empty sentinel.
	async fn set_batch_start_time(&self, t: Option<f64>) -> Result<()>;
	async fn incr_totals(&self, messages: i64, batches: i64) -> Result<()>;
	async fn set_current_rps(&self, rps: f64) -> Result<()>;

	async fn publish(&self, event: &PersistenceEvent) -> Result<()>;
	async fn subscribe(&self) -> Result<BoxStream<'static, PersistenceEvent>>;

	async fn ping(&self) -> Result<()>;
}

/// Redis-backed `BufferStore`. Blocking pops run on their own dedicated
/// connection so they never stall counter writes or publishes that share
/// the connection manager.
pub struct RedisBufferStore {
	client: redis::Client,
	conn: Mutex<ConnectionManager>,
	pop_conn: Mutex<MultiplexedConnection>,
}

impl RedisBufferStore {
	pub async fn connect(host: &str, port: u16) -> Result<Self> {
		let url = format!("redis://{host}:{port}");
		let client = redis::Client::open(url)?;
		let conn = client.get_connection_manager().await?;
		let pop_conn = client.get_multiplexed_async_connection().await?;
		Ok(Self {
			client,
			conn: Mutex::new(conn),
			pop_conn: Mutex::new(pop_conn),
		})
	}
}

#[async_trait]
impl BufferStore for RedisBufferStore {
	async fn push(&self, message: &Message) -> Result<()> {
		let payload = serde_json::to_string(message)?;
		let mut conn = self.conn.lock().await;
		let _: i64 = conn.rpush(BUFFER_KEY, payload).await?;
		Ok(())
	}

	async fn push_front_many(&self, messages: &[Message]) -> Result<()> {
		if messages.is_empty() {
			return Ok(());
		}
		let mut conn = self.conn.lock().await;
		// LPUSH k v1 v2 places v_last at the head first; pushing the slice in
		// reverse restores the original relative order at the head.
		for message in messages.iter().rev() {
			let payload = serde_json::to_string(message)?;
			let _: i64 = conn.lpush(BUFFER_KEY, payload).await?;
		}
		Ok(())
	}

	async fn pop_front(&self, timeout: Duration) -> Result<PopOutcome> {
		let mut conn = self.pop_conn.lock().await;
		let result: Option<(String, String)> =
			conn.blpop(BUFFER_KEY, timeout.as_secs_f64()).await?;
		match result {
			None => Ok(PopOutcome::Empty),
			Some((_, payload)) => match serde_json::from_str::<Message>(&payload) {
				Ok(message) => Ok(PopOutcome::Message(message)),
				Err(e) => Ok(PopOutcome::Malformed(format!("{e}: {payload}"))),
			},
		}
	}

	async fn buffer_len(&self) -> Result<i64> {
		let mut conn = self.conn.lock().await;
		let len: i64 = conn.llen(BUFFER_KEY).await?;
		Ok(len)
	}

	async fn drain_buffer(&self) -> Result<i64> {
		let mut conn = self.conn.lock().await;
		let (len, _): (i64, ()) = redis::pipe()
			.llen(BUFFER_KEY)
			.del(BUFFER_KEY)
			.query_async(&mut *conn)
			.await?;
		Ok(len)
	}

	async fn read_counters(&self) -> Result<CounterSnapshot> {
		let mut conn = self.conn.lock().await;
		let values: (Option<i64>, Option<i64>, Option<f64>, Option<i64>, Option<f64>) = redis::pipe()
			.get(TOTAL_MESSAGES_KEY)
			.get(TOTAL_BATCHES_KEY)
			.get(CURRENT_RPS_KEY)
			.get(WORKER_BUFFER_SIZE_KEY)
			.get(BATCH_START_TIME_KEY)
			.query_async(&mut *conn)
			.await?;
		Ok(CounterSnapshot {
			total_messages: values.0.unwrap_or(0),
			total_batches: values.1.unwrap_or(0),
			current_rps: values.2.unwrap_or(0.0),
			worker_buffer_size: values.3.unwrap_or(0),
			batch_start_time: values.4,
		})
	}

	async fn set_worker_buffer_size(&self, n: i64) -> Result<()> {
		let mut conn = self.conn.lock().await;
		let _: () = conn.set(WORKER_BUFFER_SIZE_KEY, n).await?;
		Ok(())
	}

	async fn set_batch_start_time(&self, t: Option<f64>) -> Result<()> {
		let mut conn = self.conn.lock().await;
		match t {
			Some(epoch) => {
				let _: () = conn.set(BATCH_START_TIME_KEY, epoch).await?;
			}
			None => {
				let _: () = conn.del(BATCH_START_TIME_KEY).await?;
			}
		}
		Ok(())
	}

	async fn incr_totals(&self, messages: i64, batches: i64) -> Result<()> {
		let mut conn = self.conn.lock().await;
		let _: ((), ()) = redis::pipe()
			.incr(TOTAL_MESSAGES_KEY, messages)
			.incr(TOTAL_BATCHES_KEY, batches)
			.query_async(&mut *conn)
			.await?;
		Ok(())
	}

	async fn set_current_rps(&self, rps: f64) -> Result<()> {
		let mut conn = self.conn.lock().await;
		let _: () = conn.set(CURRENT_RPS_KEY, rps).await?;
		Ok(())
	}

	async fn publish(&self, event: &PersistenceEvent) -> Result<()> {
		let payload = serde_json::to_string(event)?;
		let mut conn = self.conn.lock().await;
		let _: i64 = conn.publish(NOTIFICATIONS_CHANNEL, payload).await?;
		Ok(())
	}

	async fn subscribe(&self) -> Result<BoxStream<'static, PersistenceEvent>> {
		use futures_util::StreamExt;

		let mut pubsub = self.client.get_async_pubsub().await?;
		pubsub.subscribe(NOTIFICATIONS_CHANNEL).await?;
		let stream = pubsub.into_on_message().filter_map(|msg| async move {
			let payload: String = msg.get_payload().ok()?;
			serde_json::from_str::<PersistenceEvent>(&payload).ok()
		});
		Ok(Box::pin(stream))
	}

	async fn ping(&self) -> Result<()> {
		let mut conn = self.conn.lock().await;
		let _: String = redis::cmd("PING").query_async(&mut *conn).await?;
		Ok(())
	}
}

#[cfg(feature = "integration-tests")]
mod tests {
	use super::RedisBufferStore;

	// Compile-time smoke test only; does not require a reachable Redis.
	#[tokio::test]
	async fn client_smoke() {
		let _ = RedisBufferStore::connect("localhost", 6379).await;
	}
}
