use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single message as it exists on the buffer: the self-describing record
/// an observer correlates with a later persistence event via `tracking_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
	pub tracking_id: String,
	pub user_id: i64,
	pub channel_id: i64,
	pub content: String,
	pub created_at: DateTime<Utc>,
}

/// The row shape assigned by the relational store on bulk insert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedRow {
	pub id: i64,
	pub user_id: i64,
	pub channel_id: i64,
	pub content: String,
	pub created_at: DateTime<Utc>,
	pub inserted_at: DateTime<Utc>,
}

/// Published on `batch_notifications` once a batch commits. Ephemeral: never
/// retained past fan-out to already-subscribed sessions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceEvent {
	pub batch_id: String,
	pub ids: Vec<String>,
	pub batch_size: usize,
	pub timestamp: DateTime<Utc>,
}

/// A snapshot of the Metrics Store's scalar counters, read once per
/// broadcaster tick. A missing key at the store layer decodes to the zero
/// value here (see `BufferStore::read_counters`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CounterSnapshot {
	pub total_messages: i64,
	pub total_batches: i64,
	pub current_rps: f64,
	pub worker_buffer_size: i64,
	pub batch_start_time: Option<f64>,
}

/// The two WebSocket frame shapes the Telemetry Broadcaster emits, unified
/// under one tagged enum so a single serializer produces the wire format.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
	StatsUpdate {
		total_messages: i64,
		current_rps: f64,
		queue_depth: i64,
		total_batches: i64,
		avg_batch_size: f64,
		batch_threshold: i64,
		batch_progress: i64,
		batch_progress_percent: f64,
		timestamp: DateTime<Utc>,
	},
	BatchPersisted {
		batch_id: String,
		ids: Vec<String>,
		batch_size: usize,
		worker_timestamp: DateTime<Utc>,
	},
}

impl Frame {
	pub fn stats_update(snapshot: &CounterSnapshot, batch_threshold: i64, buffer_length: i64) -> Self {
		let queue_depth = buffer_length + snapshot.worker_buffer_size;
		let avg_batch_size = snapshot.total_messages as f64 / snapshot.total_batches.max(1) as f64;
		let batch_progress = snapshot.worker_buffer_size;
		let batch_progress_percent = if batch_threshold > 0 {
			100.0 * batch_progress as f64 / batch_threshold as f64
		} else {
			0.0
		};
		Frame::StatsUpdate {
			total_messages: snapshot.total_messages,
			current_rps: snapshot.current_rps,
			queue_depth,
			total_batches: snapshot.total_batches,
			avg_batch_size,
			batch_threshold,
			batch_progress,
			batch_progress_percent,
			timestamp: Utc::now(),
		}
	}

	pub fn from_event(event: PersistenceEvent) -> Self {
		Frame::BatchPersisted {
			batch_id: event.batch_id,
			ids: event.ids,
			batch_size: event.batch_size,
			worker_timestamp: event.timestamp,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn stats_update_derives_fields_from_snapshot() {
		let snapshot = CounterSnapshot {
			total_messages: 120,
			total_batches: 3,
			current_rps: 4.5,
			worker_buffer_size: 12,
			batch_start_time: Some(1_700_000_000.0),
		};
		let frame = Frame::stats_update(&snapshot, 50, 8);
		match frame {
			Frame::StatsUpdate {
				queue_depth,
				avg_batch_size,
				batch_progress_percent,
				..
			} => {
				assert_eq!(queue_depth, 20);
				assert_eq!(avg_batch_size, 40.0);
				assert_eq!(batch_progress_percent, 24.0);
			}
			_ => panic!("expected StatsUpdate"),
		}
	}

	#[test]
	fn frame_tags_match_wire_format() {
		let event = PersistenceEvent {
			batch_id: "b1".into(),
			ids: vec!["t1".into(), "t2".into()],
			batch_size: 2,
			timestamp: Utc::now(),
		};
		let frame = Frame::from_event(event);
		let json = serde_json::to_value(&frame).unwrap();
		assert_eq!(json["type"], "batch_persisted");
		assert_eq!(json["batch_size"], 2);
	}
}
