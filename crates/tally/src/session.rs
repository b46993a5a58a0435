// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Session lifecycle: creation, resumption across restarts, idle rotation.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use tally_core::{Session, SessionId};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::error::Result;
use crate::store::{StateStore, StoreKeys};

#[derive(Debug, Default)]
struct SessionState {
	session: Option<Session>,
	/// False while the session is a memory-only stand-in for one the store
	/// could not read; such a session never overwrites the stored one.
	durable: bool,
	device_id: Option<String>,
	/// Set on rotation, consumed by the first event of the new session.
	returning: bool,
}

/// Owns the session for one tracker.
///
/// All mutation goes through a single mutex, so concurrent callers observe
/// one session id even when the first load races with a rotation.
pub struct SessionManager {
	store: Arc<dyn StateStore>,
	keys: StoreKeys,
	clock: Arc<dyn Clock>,
	timeout: Duration,
	debug: bool,
	state: Mutex<SessionState>,
}

impl SessionManager {
	pub fn new(
		store: Arc<dyn StateStore>,
		keys: StoreKeys,
		clock: Arc<dyn Clock>,
		timeout: Duration,
		debug: bool,
	) -> Self {
		Self {
			store,
			keys,
			clock,
			timeout,
			debug,
			state: Mutex::new(SessionState::default()),
		}
	}

	/// Returns the current session id, loading or creating it on first use.
	///
	/// Does not check expiry; see [`SessionManager::renew_if_expired`].
	pub async fn get_or_create_session_id(&self) -> SessionId {
		let mut state = self.state.lock().await;
		self.session(&mut state).await.id.clone()
	}

	/// Snapshot of the current session.
	pub async fn current(&self) -> Session {
		let mut state = self.state.lock().await;
		self.session(&mut state).await.clone()
	}

	/// Records activity at the current time.
	pub async fn touch(&self) {
		let now = self.clock.now();
		let mut state = self.state.lock().await;
		let session = self.session(&mut state).await;
		session.touch(now);
		let last_activity = session.last_activity_at;
		if state.durable {
			self.persist(StoreKeys::SESSION_LAST_ACTIVITY, &millis(last_activity)).await;
		}
	}

	/// Rotates the session when it has been idle past the timeout.
	///
	/// Returns the expired session so the caller can report its end.
	pub async fn renew_if_expired(&self) -> Option<Session> {
		let now = self.clock.now();
		let mut state = self.state.lock().await;
		let session = self.session(&mut state).await;
		if !session.is_expired(now, self.timeout) {
			return None;
		}

		let previous = std::mem::replace(session, Session::start(now));
		let next = session.clone();
		state.returning = true;
		state.durable = true;

		if self.debug {
			debug!(
				previous = %previous.id,
				next = %next.id,
				duration_ms = previous.duration_ms(),
				"Session expired, rotated"
			);
		}
		self.persist_session(&next).await;
		Some(previous)
	}

	/// True exactly once after each rotation.
	pub async fn take_returning_marker(&self) -> bool {
		std::mem::take(&mut self.state.lock().await.returning)
	}

	/// Stable per-install identifier (UUID v4), persisted on first use.
	pub async fn get_or_create_device_id(&self) -> String {
		let mut state = self.state.lock().await;
		if let Some(id) = &state.device_id {
			return id.clone();
		}

		let id = match self.read(StoreKeys::DEVICE_ID).await {
			Some(id) if !id.is_empty() => id,
			_ => {
				let id = uuid::Uuid::new_v4().to_string();
				self.persist(StoreKeys::DEVICE_ID, &id).await;
				id
			}
		};
		state.device_id = Some(id.clone());
		id
	}

	async fn session<'a>(&self, state: &'a mut SessionState) -> &'a mut Session {
		let session = match state.session.take() {
			Some(session) => session,
			None => {
				let (session, durable) = self.load_or_start().await;
				state.durable = durable;
				session
			}
		};
		state.session.insert(session)
	}

	/// Returns the session and whether it is backed by the store.
	async fn load_or_start(&self) -> (Session, bool) {
		match self.load().await {
			Ok(Some(session)) => {
				debug!(session_id = %session.id, "Resumed persisted session");
				return (session, true);
			}
			Ok(None) => {}
			Err(e) => {
				if self.debug {
					warn!(error = %e, "Failed to load persisted session, using an in-memory one");
				}
				return (Session::start(self.clock.now()), false);
			}
		}

		let session = Session::start(self.clock.now());
		self.persist_session(&session).await;
		(session, true)
	}

	/// `Ok(None)` when nothing usable is stored, including a corrupt id.
	/// `Err` only when the store itself failed.
	async fn load(&self) -> Result<Option<Session>> {
		let Some(raw_id) = self.store.get(&self.keys.key(StoreKeys::SESSION_ID)).await? else {
			return Ok(None);
		};
		let id: SessionId = match raw_id.parse() {
			Ok(id) => id,
			Err(e) => {
				if self.debug {
					warn!(error = %e, "Discarding corrupt persisted session id");
				}
				return Ok(None);
			}
		};
		let now = self.clock.now();

		let started_at = self
			.read(StoreKeys::SESSION_STARTED_AT)
			.await
			.and_then(|v| parse_millis(&v))
			.or_else(|| id.created_millis().and_then(|ms| Utc.timestamp_millis_opt(ms).single()))
			.unwrap_or(now);
		let last_activity_at = self
			.read(StoreKeys::SESSION_LAST_ACTIVITY)
			.await
			.and_then(|v| parse_millis(&v))
			.unwrap_or(started_at);

		Ok(Some(Session {
			id,
			started_at,
			last_activity_at,
		}))
	}

	async fn read(&self, name: &str) -> Option<String> {
		match self.store.get(&self.keys.key(name)).await {
			Ok(value) => value,
			Err(e) => {
				if self.debug {
					warn!(key = name, error = %e, "State store read failed");
				}
				None
			}
		}
	}

	async fn persist_session(&self, session: &Session) {
		self.persist(StoreKeys::SESSION_ID, session.id.as_str()).await;
		self.persist(StoreKeys::SESSION_STARTED_AT, &millis(session.started_at)).await;
		self.persist(StoreKeys::SESSION_LAST_ACTIVITY, &millis(session.last_activity_at)).await;
	}

	/// Storage failures leave the in-memory value authoritative.
	async fn persist(&self, name: &str, value: &str) {
		if let Err(e) = self.store.set(&self.keys.key(name), value).await {
			if self.debug {
				warn!(key = name, error = %e, "State store write failed, keeping value in memory");
			}
		}
	}
}

fn millis(at: DateTime<Utc>) -> String {
	at.timestamp_millis().to_string()
}

fn parse_millis(value: &str) -> Option<DateTime<Utc>> {
	let ms: i64 = value.trim().parse().ok()?;
	Utc.timestamp_millis_opt(ms).single()
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::clock::ManualClock;
	use crate::error::TrackerError;
	use crate::store::test_support::FlakyStore;
	use crate::store::MemoryStore;
	use async_trait::async_trait;
	use tally_core::DEFAULT_SESSION_TIMEOUT;

	#[derive(Debug)]
	struct BrokenStore;

	#[async_trait]
	impl StateStore for BrokenStore {
		async fn get(&self, _key: &str) -> Result<Option<String>> {
			Err(TrackerError::Storage("disk on fire".to_string()))
		}

		async fn set(&self, _key: &str, _value: &str) -> Result<()> {
			Err(TrackerError::Storage("disk on fire".to_string()))
		}
	}

	fn start() -> DateTime<Utc> {
		Utc.timestamp_millis_opt(1_700_000_000_000).unwrap()
	}

	fn manager(store: Arc<dyn StateStore>, clock: Arc<ManualClock>) -> SessionManager {
		SessionManager::new(
			store,
			StoreKeys::new("tally:site_1"),
			clock,
			DEFAULT_SESSION_TIMEOUT,
			true,
		)
	}

	#[tokio::test]
	async fn test_session_id_is_stable_and_persisted() {
		let store = Arc::new(MemoryStore::new());
		let clock = Arc::new(ManualClock::new(start()));
		let sessions = manager(store.clone(), clock);

		let first = sessions.get_or_create_session_id().await;
		let second = sessions.get_or_create_session_id().await;
		assert_eq!(first, second);
		assert_eq!(
			store.get("tally:site_1:session_id").await.unwrap().as_deref(),
			Some(first.as_str())
		);
		assert_eq!(
			store.get("tally:site_1:session_started_at").await.unwrap().as_deref(),
			Some("1700000000000")
		);
	}

	#[tokio::test]
	async fn test_session_resumes_after_restart() {
		let store: Arc<dyn StateStore> = Arc::new(MemoryStore::new());
		let clock = Arc::new(ManualClock::new(start()));

		let before = manager(store.clone(), clock.clone());
		let id = before.get_or_create_session_id().await;
		clock.advance(Duration::from_secs(60));
		before.touch().await;
		drop(before);

		let after = manager(store, clock);
		let session = after.current().await;
		assert_eq!(session.id, id);
		assert_eq!(session.duration_ms(), 60_000);
	}

	#[tokio::test]
	async fn test_rotation_after_timeout() {
		let clock = Arc::new(ManualClock::new(start()));
		let sessions = manager(Arc::new(MemoryStore::new()), clock.clone());
		let first = sessions.get_or_create_session_id().await;

		clock.advance(DEFAULT_SESSION_TIMEOUT - Duration::from_millis(1));
		assert!(sessions.renew_if_expired().await.is_none());
		assert!(!sessions.take_returning_marker().await);

		clock.advance(Duration::from_millis(2));
		let previous = sessions.renew_if_expired().await.unwrap();
		assert_eq!(previous.id, first);
		assert_ne!(sessions.get_or_create_session_id().await, first);

		assert!(sessions.take_returning_marker().await);
		assert!(!sessions.take_returning_marker().await);
	}

	#[tokio::test]
	async fn test_touch_defers_expiry() {
		let clock = Arc::new(ManualClock::new(start()));
		let sessions = manager(Arc::new(MemoryStore::new()), clock.clone());
		let first = sessions.get_or_create_session_id().await;

		for _ in 0..4 {
			clock.advance(Duration::from_secs(20 * 60));
			sessions.touch().await;
			assert!(sessions.renew_if_expired().await.is_none());
		}
		assert_eq!(sessions.get_or_create_session_id().await, first);
	}

	#[tokio::test]
	async fn test_corrupt_persisted_id_starts_fresh() {
		let store = Arc::new(MemoryStore::new());
		store.set("tally:site_1:session_id", "not-a-session").await.unwrap();
		let sessions = manager(store.clone(), Arc::new(ManualClock::new(start())));

		let id = sessions.get_or_create_session_id().await;
		assert!(id.as_str().starts_with("sess_1700000000000_"));
		assert_eq!(
			store.get("tally:site_1:session_id").await.unwrap().as_deref(),
			Some(id.as_str())
		);
	}

	#[tokio::test]
	async fn test_broken_store_falls_back_to_memory() {
		let sessions = manager(Arc::new(BrokenStore), Arc::new(ManualClock::new(start())));
		let id = sessions.get_or_create_session_id().await;
		assert_eq!(sessions.get_or_create_session_id().await, id);

		let device = sessions.get_or_create_device_id().await;
		assert_eq!(sessions.get_or_create_device_id().await, device);
	}

	#[tokio::test]
	async fn test_failed_read_keeps_stored_session() {
		let clock = Arc::new(ManualClock::new(start()));
		let store = Arc::new(FlakyStore::new());

		let original = manager(store.clone(), clock.clone()).get_or_create_session_id().await;

		store.fail_next_reads(1);
		let degraded = manager(store.clone(), clock.clone());
		let fallback = degraded.get_or_create_session_id().await;
		assert_ne!(fallback, original);
		clock.advance(Duration::from_secs(5));
		degraded.touch().await;
		assert_eq!(degraded.get_or_create_session_id().await, fallback);

		let restarted = manager(store.clone(), clock).current().await;
		assert_eq!(restarted.id, original);
		assert_eq!(restarted.last_activity_at, start());
	}

	#[tokio::test]
	async fn test_device_id_persisted() {
		let store = Arc::new(MemoryStore::new());
		let clock = Arc::new(ManualClock::new(start()));
		let device = manager(store.clone(), clock.clone()).get_or_create_device_id().await;
		assert!(uuid::Uuid::parse_str(&device).is_ok());
		assert_eq!(manager(store, clock).get_or_create_device_id().await, device);
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
	async fn test_concurrent_first_calls_share_one_id() {
		let sessions = Arc::new(manager(
			Arc::new(MemoryStore::new()),
			Arc::new(ManualClock::new(start())),
		));

		let mut handles = Vec::new();
		for _ in 0..16 {
			let sessions = Arc::clone(&sessions);
			handles.push(tokio::spawn(async move {
				sessions.get_or_create_session_id().await
			}));
		}

		let mut ids = Vec::new();
		for handle in handles {
			ids.push(handle.await.unwrap());
		}
		ids.dedup();
		assert_eq!(ids.len(), 1);
	}
}
