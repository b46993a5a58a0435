// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Local state store backends.
//!
//! The SDK only needs string get/set. Hosts with their own persistence
//! (keychain, browser storage bridge, database) implement [`StateStore`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use crate::error::{Result, TrackerError};

/// On-disk store format.
pub type PersistedState = BTreeMap<String, String>;

/// Key-value persistence used for session, device and queue state.
///
/// Values must survive process restarts for sessions to resume.
#[async_trait]
pub trait StateStore: Send + Sync + std::fmt::Debug {
	async fn get(&self, key: &str) -> Result<Option<String>>;

	async fn set(&self, key: &str, value: &str) -> Result<()>;
}

/// Store keys for one tracker, namespaced as `tally:<identifying_code>:<key>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreKeys {
	namespace: String,
}

impl StoreKeys {
	pub const SESSION_ID: &'static str = "session_id";
	pub const SESSION_STARTED_AT: &'static str = "session_started_at";
	pub const SESSION_LAST_ACTIVITY: &'static str = "session_last_activity";
	pub const DEVICE_ID: &'static str = "device_id";
	pub const USER_PROPERTIES: &'static str = "user_properties";
	pub const ATTRIBUTION: &'static str = "attribution";
	pub const RETRY_QUEUE: &'static str = "retry_queue";

	pub fn new(namespace: impl Into<String>) -> Self {
		Self {
			namespace: namespace.into(),
		}
	}

	pub fn key(&self, name: &str) -> String {
		format!("{}:{name}", self.namespace)
	}
}

/// Volatile in-memory store. State is lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryStore {
	values: RwLock<PersistedState>,
}

impl MemoryStore {
	pub fn new() -> Self {
		Self::default()
	}
}

#[async_trait]
impl StateStore for MemoryStore {
	async fn get(&self, key: &str) -> Result<Option<String>> {
		Ok(self.values.read().await.get(key).cloned())
	}

	async fn set(&self, key: &str, value: &str) -> Result<()> {
		self
			.values
			.write()
			.await
			.insert(key.to_string(), value.to_string());
		Ok(())
	}
}

/// File-backed store: one JSON object holding every key.
///
/// Writes go to a temporary file that is renamed over the target, so a crash
/// mid-write leaves the previous state intact.
#[derive(Debug)]
pub struct FileStore {
	path: PathBuf,
	write_lock: Mutex<()>,
}

impl FileStore {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self {
			path: path.into(),
			write_lock: Mutex::new(()),
		}
	}

	/// Store under the platform data directory, e.g.
	/// `~/.local/share/tally/state.json` on Linux.
	pub fn default_location() -> Result<Self> {
		let dir = dirs::data_dir()
			.ok_or_else(|| TrackerError::Storage("no data directory for this platform".to_string()))?;
		Ok(Self::new(dir.join("tally").join("state.json")))
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	async fn read_state(&self) -> Result<PersistedState> {
		if !fs::try_exists(&self.path).await.map_err(storage_err)? {
			return Ok(PersistedState::new());
		}
		let contents = fs::read_to_string(&self.path).await.map_err(storage_err)?;
		if contents.trim().is_empty() {
			return Ok(PersistedState::new());
		}
		Ok(serde_json::from_str(&contents)?)
	}

	async fn write_state(&self, state: &PersistedState) -> Result<()> {
		if let Some(parent) = self.path.parent() {
			fs::create_dir_all(parent).await.map_err(storage_err)?;
		}

		let contents = serde_json::to_string_pretty(state)?;
		let temp_path = self.path.with_extension("tmp");
		let mut file = fs::File::create(&temp_path).await.map_err(storage_err)?;
		file.write_all(contents.as_bytes()).await.map_err(storage_err)?;
		file.sync_all().await.map_err(storage_err)?;
		drop(file);

		fs::rename(&temp_path, &self.path).await.map_err(storage_err)?;
		debug!(path = ?self.path, keys = state.len(), "State store written");
		Ok(())
	}
}

#[async_trait]
impl StateStore for FileStore {
	async fn get(&self, key: &str) -> Result<Option<String>> {
		Ok(self.read_state().await?.remove(key))
	}

	async fn set(&self, key: &str, value: &str) -> Result<()> {
		let _guard = self.write_lock.lock().await;
		let mut state = self.read_state().await?;
		state.insert(key.to_string(), value.to_string());
		self.write_state(&state).await
	}
}

fn storage_err(err: std::io::Error) -> TrackerError {
	TrackerError::Storage(err.to_string())
}

#[cfg(test)]
pub(crate) mod test_support {
	use std::sync::atomic::{AtomicUsize, Ordering};

	use super::*;

	/// Memory store whose next reads can be made to fail.
	#[derive(Debug, Default)]
	pub struct FlakyStore {
		inner: MemoryStore,
		failing_reads: AtomicUsize,
	}

	impl FlakyStore {
		pub fn new() -> Self {
			Self::default()
		}

		pub fn fail_next_reads(&self, count: usize) {
			self.failing_reads.store(count, Ordering::SeqCst);
		}
	}

	#[async_trait]
	impl StateStore for FlakyStore {
		async fn get(&self, key: &str) -> Result<Option<String>> {
			let fail = self
				.failing_reads
				.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
				.is_ok();
			if fail {
				return Err(TrackerError::Storage("read timed out".to_string()));
			}
			self.inner.get(key).await
		}

		async fn set(&self, key: &str, value: &str) -> Result<()> {
			self.inner.set(key, value).await
		}
	}
}
