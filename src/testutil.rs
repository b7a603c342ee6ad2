//! In-memory fakes for `BufferStore` and `MessageRepository`, so the
//! coordinator's dual-trigger timing and the ingestion handlers are
//! testable without a live Redis/Postgres pair.
#![cfg(any(feature = "unit-tests", feature = "integration-tests", test))]

use std::collections::VecDeque;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use futures_util::stream::BoxStream;
use tokio::sync::{Mutex, Notify, broadcast};
use tokio::time::Instant;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;

use crate::model::{CounterSnapshot, Message, PersistedRow, PersistenceEvent};
use crate::repo::MessageRepository;
use crate::store::{BufferStore, PopOutcome};

struct InMemoryState {
	buffer: VecDeque<Message>,
	total_messages: i64,
	total_batches: i64,
	current_rps: f64,
	worker_buffer_size: i64,
	batch_start_time: Option<f64>,
}

pub struct InMemoryBufferStore {
	state: Mutex<InMemoryState>,
	notify: Notify,
	events: broadcast::Sender<PersistenceEvent>,
}

impl InMemoryBufferStore {
	pub fn new() -> Self {
		let (events, _) = broadcast::channel(256);
		Self {
			state: Mutex::new(InMemoryState {
				buffer: VecDeque::new(),
				total_messages: 0,
				total_batches: 0,
				current_rps: 0.0,
				worker_buffer_size: 0,
				batch_start_time: None,
			}),
			notify: Notify::new(),
			events,
		}
	}
}

impl Default for InMemoryBufferStore {
	fn default() -> Self {
		Self::new()
	}
}

#[async_trait]
impl BufferStore for InMemoryBufferStore {
	async fn push(&self, message: &Message) -> Result<()> {
		let mut state = self.state.lock().await;
		state.buffer.push_back(message.clone());
		drop(state);
		self.notify.notify_waiters();
		Ok(())
	}

	async fn push_front_many(&self, messages: &[Message]) -> Result<()> {
		let mut state = self.state.lock().await;
		for message in messages.iter().rev() {
			state.buffer.push_front(message.clone());
		}
		drop(state);
		self.notify.notify_waiters();
		Ok(())
	}

	async fn pop_front(&self, timeout: Duration) -> Result<PopOutcome> {
		let deadline = Instant::now() + timeout;
		loop {
			{
				let mut state = self.state.lock().await;
				if let Some(message) = state.buffer.pop_front() {
					return Ok(PopOutcome::Message(message));
				}
			}
			let remaining = deadline.saturating_duration_since(Instant::now());
			if remaining.is_zero() {
				return Ok(PopOutcome::Empty);
			}
			let _ = tokio::time::timeout(remaining, self.notify.notified()).await;
		}
	}

	async fn buffer_len(&self) -> Result<i64> {
		let state = self.state.lock().await;
		Ok(state.buffer.len() as i64)
	}

	async fn drain_buffer(&self) -> Result<i64> {
		let mut state = self.state.lock().await;
		let n = state.buffer.len() as i64;
		state.buffer.clear();
		Ok(n)
	}

	async fn read_counters(&self) -> Result<CounterSnapshot> {
		let state = self.state.lock().await;
		Ok(CounterSnapshot {
			total_messages: state.total_messages,
			total_batches: state.total_batches,
			current_rps: state.current_rps,
			worker_buffer_size: state.worker_buffer_size,
			batch_start_time: state.batch_start_time,
		})
	}

	async fn set_worker_buffer_size(&self, n: i64) -> Result<()> {
		let mut state = self.state.lock().await;
		state.worker_buffer_size = n;
		Ok(())
	}

	async fn set_batch_start_time(&self, t: Option<f64>) -> Result<()> {
		let mut state = self.state.lock().await;
		state.batch_start_time = t;
		Ok(())
	}

	async fn incr_totals(&self, messages: i64, batches: i64) -> Result<()> {
		let mut state = self.state.lock().await;
		state.total_messages += messages;
		state.total_batches += batches;
		Ok(())
	}

	async fn set_current_rps(&self, rps: f64) -> Result<()> {
		let mut state = self.state.lock().await;
		state.current_rps = rps;
		Ok(())
	}

	async fn publish(&self, event: &PersistenceEvent) -> Result<()> {
		// No subscribers is not an error; events are best-effort.
		let _ = self.events.send(event.clone());
		Ok(())
	}

	async fn subscribe(&self) -> Result<BoxStream<'static, PersistenceEvent>> {
		let receiver = self.events.subscribe();
		let stream = BroadcastStream::new(receiver).filter_map(|item| item.ok());
		Ok(Box::pin(stream))
	}

	async fn ping(&self) -> Result<()> {
		Ok(())
	}
}

pub struct InMemoryMessageRepository {
	rows: Mutex<Vec<PersistedRow>>,
	next_id: Mutex<i64>,
}

impl InMemoryMessageRepository {
	pub fn new() -> Self {
		Self {
			rows: Mutex::new(Vec::new()),
			next_id: Mutex::new(1),
		}
	}
}

impl Default for InMemoryMessageRepository {
	fn default() -> Self {
		Self::new()
	}
}

#[async_trait]
impl MessageRepository for InMemoryMessageRepository {
	async fn insert_batch(&self, messages: &[Message]) -> Result<Vec<PersistedRow>> {
		let mut rows = self.rows.lock().await;
		let mut next_id = self.next_id.lock().await;
		let inserted_at = Utc::now();
		let mut out = Vec::with_capacity(messages.len());
		for message in messages {
			let row = PersistedRow {
				id: *next_id,
				user_id: message.user_id,
				channel_id: message.channel_id,
				content: message.content.clone(),
				created_at: message.created_at,
				inserted_at,
			};
			*next_id += 1;
			rows.push(row.clone());
			out.push(row);
		}
		Ok(out)
	}

	async fn recent(&self, limit: i64) -> Result<Vec<PersistedRow>> {
		let rows = self.rows.lock().await;
		let mut sorted: Vec<PersistedRow> = rows.clone();
		sorted.sort_by(|a, b| b.inserted_at.cmp(&a.inserted_at).then(b.id.cmp(&a.id)));
		sorted.truncate(limit.max(0) as usize);
		Ok(sorted)
	}

	async fn reset(&self) -> Result<u64> {
		let mut rows = self.rows.lock().await;
		let n = rows.len() as u64;
		rows.clear();
		Ok(n)
	}

	async fn ping(&self) -> Result<()> {
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn sample_message(tracking_id: &str) -> Message {
		Message {
			tracking_id: tracking_id.to_string(),
			user_id: 1,
			channel_id: 2,
			content: "hello".to_string(),
			created_at: Utc::now(),
		}
	}

	#[tokio::test]
	async fn pop_front_waits_then_returns_pushed_message() {
		let store = std::sync::Arc::new(InMemoryBufferStore::new());
		let waiter = store.clone();
		let handle = tokio::spawn(async move { waiter.pop_front(Duration::from_secs(1)).await });
		tokio::time::sleep(Duration::from_millis(20)).await;
		store.push(&sample_message("late")).await.unwrap();
		let outcome = handle.await.unwrap().unwrap();
		assert!(matches!(outcome, PopOutcome::Message(_)));
	}

	#[tokio::test]
	async fn pop_front_times_out_when_empty() {
		let store = InMemoryBufferStore::new();
		let outcome = store.pop_front(Duration::from_millis(20)).await.unwrap();
		assert!(matches!(outcome, PopOutcome::Empty));
	}

	#[tokio::test]
	async fn push_front_many_preserves_relative_order() {
		let store = InMemoryBufferStore::new();
		store.push(&sample_message("a")).await.unwrap();
		store
			.push_front_many(&[sample_message("x"), sample_message("y")])
			.await
			.unwrap();
		let first = store.pop_front(Duration::from_millis(10)).await.unwrap();
		let second = store.pop_front(Duration::from_millis(10)).await.unwrap();
		match (first, second) {
			(PopOutcome::Message(m1), PopOutcome::Message(m2)) => {
				assert_eq!(m1.tracking_id, "x");
				assert_eq!(m2.tracking_id, "y");
			}
			_ => panic!("expected two messages"),
		}
	}

	#[tokio::test]
	async fn insert_batch_assigns_monotonic_ids() {
		let repo = InMemoryMessageRepository::new();
		let rows = repo
			.insert_batch(&[sample_message("a"), sample_message("b")])
			.await
			.unwrap();
		assert_eq!(rows[0].id, 1);
		assert_eq!(rows[1].id, 2);
		assert_eq!(repo.recent(10).await.unwrap().len(), 2);
	}
}
