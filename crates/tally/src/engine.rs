// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Delivery engine: channel fallback plus the retry queue.
//!
//! ```text
//! Pending -> Dispatching -> Delivered
//!                        -> Queued -> Dispatching -> Delivered
//!                                                 -> Queued (retry_count + 1)
//!                                                 -> Dropped (retry_count >= max_retries)
//! ```
//!
//! A record that exhausts every channel is queued once. Drains take a
//! snapshot of the queue and retry entries serially in FIFO order; only one
//! drain runs at a time.
//!
//! Fire-and-forget channels cannot observe failure, so they are skipped by
//! dispatch and drains and used only by [`DeliveryEngine::flush_on_exit`].

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tally_core::{EventRecord, QueuedRecord, WirePayload};
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info, trace, warn};

use crate::clock::Clock;
use crate::store::StateStore;
use crate::transport::{ChannelKind, ChannelOutcome, TransportChannel};

/// Lifecycle of one record inside the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
	Pending,
	Dispatching,
	Delivered,
	Queued,
	Dropped,
}

/// Result of [`DeliveryEngine::dispatch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
	Delivered { channel: String },
	Queued,
}

impl DeliveryOutcome {
	pub fn state(&self) -> DeliveryState {
		match self {
			DeliveryOutcome::Delivered { .. } => DeliveryState::Delivered,
			DeliveryOutcome::Queued => DeliveryState::Queued,
		}
	}
}

/// What one drain pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
	pub attempted: usize,
	pub delivered: usize,
	pub requeued: usize,
	pub dropped: usize,
	/// Another drain was already running; nothing was touched.
	pub skipped: bool,
}

impl DrainReport {
	pub fn skipped() -> Self {
		Self {
			skipped: true,
			..Default::default()
		}
	}
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
	pub max_retries: u32,
	pub max_queue_len: usize,
	pub debug: bool,
}

impl Default for EngineConfig {
	fn default() -> Self {
		Self {
			max_retries: 3,
			max_queue_len: 1000,
			debug: false,
		}
	}
}

/// Counter snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryStats {
	pub delivered: u64,
	/// Records that entered the queue after failing dispatch. Requeues and
	/// restores are not counted again.
	pub queued: u64,
	pub dropped: u64,
}

#[derive(Debug, Default)]
struct Counters {
	delivered: AtomicU64,
	queued: AtomicU64,
	dropped: AtomicU64,
}

/// Mirrors the retry queue into the state store as JSON.
pub struct QueuePersistence {
	store: Arc<dyn StateStore>,
	key: String,
	write_lock: Mutex<()>,
}

impl QueuePersistence {
	pub fn new(store: Arc<dyn StateStore>, key: impl Into<String>) -> Self {
		Self {
			store,
			key: key.into(),
			write_lock: Mutex::new(()),
		}
	}

	async fn save(&self, entries: &[QueuedRecord], debug: bool) {
		let _guard = self.write_lock.lock().await;
		let result = match serde_json::to_string(entries) {
			Ok(json) => self.store.set(&self.key, &json).await,
			Err(e) => Err(e.into()),
		};
		if let Err(e) = result {
			if debug {
				warn!(key = %self.key, error = %e, "Failed to persist retry queue");
			}
		}
	}

	async fn load(&self, debug: bool) -> Vec<QueuedRecord> {
		let raw = match self.store.get(&self.key).await {
			Ok(Some(raw)) if !raw.trim().is_empty() => raw,
			Ok(_) => return Vec::new(),
			Err(e) => {
				if debug {
					warn!(key = %self.key, error = %e, "Failed to read persisted retry queue");
				}
				return Vec::new();
			}
		};
		match serde_json::from_str(&raw) {
			Ok(entries) => entries,
			Err(e) => {
				warn!(key = %self.key, error = %e, "Discarding corrupt persisted retry queue");
				Vec::new()
			}
		}
	}
}

pub struct DeliveryEngine {
	channels: Vec<Arc<dyn TransportChannel>>,
	config: EngineConfig,
	clock: Arc<dyn Clock>,
	queue: Mutex<VecDeque<QueuedRecord>>,
	drain_lock: Mutex<()>,
	persistence: Option<QueuePersistence>,
	counters: Counters,
	shutdown: AtomicBool,
	drain_notify: Notify,
}

impl DeliveryEngine {
	pub fn new(
		channels: Vec<Arc<dyn TransportChannel>>,
		config: EngineConfig,
		clock: Arc<dyn Clock>,
	) -> Self {
		Self {
			channels,
			config,
			clock,
			queue: Mutex::new(VecDeque::new()),
			drain_lock: Mutex::new(()),
			persistence: None,
			counters: Counters::default(),
			shutdown: AtomicBool::new(false),
			drain_notify: Notify::new(),
		}
	}

	/// Enables durable queue mode.
	pub fn with_persistence(mut self, persistence: QueuePersistence) -> Self {
		self.persistence = Some(persistence);
		self
	}

	/// Tries every channel in order; queues the record if none succeeds.
	pub async fn dispatch(&self, record: &EventRecord) -> DeliveryOutcome {
		trace!(event = %record.event_name, state = ?DeliveryState::Pending, "Record accepted");
		let payload = WirePayload::from_record(record);
		trace!(event = %record.event_name, state = ?DeliveryState::Dispatching, "Dispatching record");

		if let Some(channel) = self.try_channels(&payload).await {
			self.counters.delivered.fetch_add(1, Ordering::Relaxed);
			return DeliveryOutcome::Delivered { channel };
		}

		if self.config.debug {
			debug!(event = %record.event_name, "All channels failed, queueing record");
		}
		self.counters.queued.fetch_add(1, Ordering::Relaxed);
		self.enqueue(QueuedRecord::new(record.clone(), self.clock.now())).await;
		DeliveryOutcome::Queued
	}

	/// Adds an entry, evicting the oldest when the queue is full.
	pub async fn enqueue(&self, entry: QueuedRecord) {
		let snapshot = {
			let mut queue = self.queue.lock().await;
			self.push(&mut queue, entry);
			self.persistence.as_ref().map(|_| queue.iter().cloned().collect::<Vec<_>>())
		};
		if let (Some(persistence), Some(entries)) = (&self.persistence, snapshot) {
			persistence.save(&entries, self.config.debug).await;
		}
	}

	/// Retries every queued entry once.
	pub async fn drain_queue(&self) -> DrainReport {
		let Ok(_guard) = self.drain_lock.try_lock() else {
			trace!("Drain already in progress");
			return DrainReport::skipped();
		};

		let entries: Vec<QueuedRecord> = {
			let mut queue = self.queue.lock().await;
			queue.drain(..).collect()
		};
		if entries.is_empty() {
			return DrainReport::default();
		}

		let mut report = DrainReport::default();
		for entry in entries {
			if entry.is_exhausted(self.config.max_retries) {
				report.dropped += 1;
				self.counters.dropped.fetch_add(1, Ordering::Relaxed);
				if self.config.debug {
					debug!(
						event = %entry.record.event_name,
						retry_count = entry.retry_count,
						state = ?DeliveryState::Dropped,
						"Dropping record after max retries"
					);
				}
				continue;
			}

			report.attempted += 1;
			let payload = WirePayload::from_record(&entry.record);
			if self.try_channels(&payload).await.is_some() {
				report.delivered += 1;
				self.counters.delivered.fetch_add(1, Ordering::Relaxed);
				continue;
			}

			report.requeued += 1;
			let requeued = QueuedRecord::requeue(entry.record, entry.retry_count, self.clock.now());
			let mut queue = self.queue.lock().await;
			self.push(&mut queue, requeued);
		}

		self.persist_snapshot().await;
		if self.config.debug {
			debug!(
				attempted = report.attempted,
				delivered = report.delivered,
				requeued = report.requeued,
				dropped = report.dropped,
				"Retry queue drained"
			);
		}
		report
	}

	/// Loads entries persisted by a previous process ahead of anything
	/// queued since startup. Returns how many were restored.
	pub async fn restore_persisted(&self) -> usize {
		let Some(persistence) = &self.persistence else {
			return 0;
		};
		let restored = persistence.load(self.config.debug).await;
		let count = restored.len();
		if count == 0 {
			return 0;
		}

		{
			let mut queue = self.queue.lock().await;
			let pending: Vec<QueuedRecord> = queue.drain(..).collect();
			for entry in restored.into_iter().chain(pending) {
				self.push(&mut queue, entry);
			}
		}
		info!(count, "Restored persisted retry queue");
		count
	}

	/// Best-effort send of `pending` plus the whole queue through
	/// fire-and-forget channels only. Nothing is awaited beyond the hand-off.
	///
	/// Returns how many records were handed off. Without a fire-and-forget
	/// channel nothing is sent and the queue is left untouched.
	pub async fn flush_on_exit(&self, pending: Vec<EventRecord>) -> usize {
		let Some(channel) = self
			.channels
			.iter()
			.find(|c| c.kind() == ChannelKind::FireAndForget)
		else {
			for record in pending {
				self.enqueue(QueuedRecord::new(record, self.clock.now())).await;
			}
			return 0;
		};

		let queued: Vec<QueuedRecord> = {
			let mut queue = self.queue.lock().await;
			queue.drain(..).collect()
		};

		let mut sent = 0;
		let mut unsent = Vec::new();
		let records = pending
			.into_iter()
			.map(|r| QueuedRecord::new(r, self.clock.now()))
			.chain(queued);
		for entry in records {
			let payload = WirePayload::from_record(&entry.record);
			match tokio::time::timeout(channel.timeout(), channel.attempt(&payload)).await {
				Ok(ChannelOutcome::Success) => sent += 1,
				Ok(ChannelOutcome::Failure(_)) | Err(_) => unsent.push(entry),
			}
		}

		{
			let mut queue = self.queue.lock().await;
			for entry in unsent {
				self.push(&mut queue, entry);
			}
		}
		self.persist_snapshot().await;
		debug!(sent, channel = channel.name(), "Flushed on exit");
		sent
	}

	pub async fn queue_len(&self) -> usize {
		self.queue.lock().await.len()
	}

	/// Copy of the queue in FIFO order.
	pub async fn queued(&self) -> Vec<QueuedRecord> {
		self.queue.lock().await.iter().cloned().collect()
	}

	pub fn stats(&self) -> DeliveryStats {
		DeliveryStats {
			delivered: self.counters.delivered.load(Ordering::Relaxed),
			queued: self.counters.queued.load(Ordering::Relaxed),
			dropped: self.counters.dropped.load(Ordering::Relaxed),
		}
	}

	/// Wakes the drain loop for an immediate pass.
	pub fn request_drain(&self) {
		self.drain_notify.notify_one();
	}

	pub fn shutdown(&self) {
		self.shutdown.store(true, Ordering::SeqCst);
		self.drain_notify.notify_one();
	}

	pub fn is_shutdown(&self) -> bool {
		self.shutdown.load(Ordering::SeqCst)
	}

	/// Periodic drain loop. Exits after [`DeliveryEngine::shutdown`].
	pub async fn run(&self, interval: Duration) {
		info!(interval_ms = interval.as_millis() as u64, "Starting retry queue drain loop");

		loop {
			tokio::select! {
				_ = tokio::time::sleep(interval) => {}
				_ = self.drain_notify.notified() => {}
			}
			if self.is_shutdown() {
				break;
			}
			self.drain_queue().await;
		}

		info!("Retry queue drain loop stopped");
	}

	async fn try_channels(&self, payload: &WirePayload) -> Option<String> {
		let observable = self
			.channels
			.iter()
			.filter(|c| c.kind() != ChannelKind::FireAndForget);
		for channel in observable {
			match tokio::time::timeout(channel.timeout(), channel.attempt(payload)).await {
				Ok(ChannelOutcome::Success) => return Some(channel.name().to_string()),
				Ok(ChannelOutcome::Failure(reason)) => {
					if self.config.debug {
						debug!(channel = channel.name(), reason = %reason, "Channel attempt failed");
					}
				}
				Err(_) => {
					if self.config.debug {
						debug!(
							channel = channel.name(),
							timeout_ms = channel.timeout().as_millis() as u64,
							"Channel attempt timed out"
						);
					}
				}
			}
		}
		None
	}

	fn push(&self, queue: &mut VecDeque<QueuedRecord>, entry: QueuedRecord) {
		while queue.len() >= self.config.max_queue_len {
			let Some(evicted) = queue.pop_front() else {
				break;
			};
			self.counters.dropped.fetch_add(1, Ordering::Relaxed);
			if self.config.debug {
				warn!(
					event = %evicted.record.event_name,
					retry_count = evicted.retry_count,
					"Dropped queued record due to queue overflow"
				);
			}
		}
		queue.push_back(entry);
	}

	async fn persist_snapshot(&self) {
		if let Some(persistence) = &self.persistence {
			let entries = self.queued().await;
			persistence.save(&entries, self.config.debug).await;
		}
	}
}
