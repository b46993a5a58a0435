// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Explicit registry of trackers keyed by identifying code.
//!
//! Hosts that report under several codes keep one tracker per code here and
//! pass the registry (or individual trackers) to callers. Trackers never
//! share sessions or queues.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use tokio::sync::RwLock;
use tracing::error;

use crate::error::{Result, TrackerError};
use crate::tracker::{Tracker, TrackerBuilder};

#[derive(Default)]
pub struct TrackerRegistry {
	trackers: RwLock<HashMap<String, Tracker>>,
}

impl TrackerRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	/// Registers `tracker` under its identifying code, replacing and
	/// returning any previous tracker for that code.
	pub async fn register(&self, tracker: Tracker) -> Result<Option<Tracker>> {
		let code = tracker
			.config()
			.identifying_code
			.clone()
			.ok_or(TrackerError::MissingIdentifyingCode)?;
		Ok(self.trackers.write().await.insert(code, tracker))
	}

	/// Returns the tracker for `code`, building and initializing one from
	/// `builder` if none is registered yet.
	///
	/// Initialization runs outside the registry lock. When two callers race
	/// for the same code, the first to register wins and the other tracker
	/// is shut down.
	pub async fn get_or_init(&self, code: &str, builder: TrackerBuilder) -> Result<Tracker> {
		if let Some(tracker) = self.get(code).await {
			return Ok(tracker);
		}

		let tracker = builder.identifying_code(code).build()?;
		tracker.initialize().await?;

		let winner = match self.trackers.write().await.entry(code.to_string()) {
			Entry::Occupied(existing) => existing.get().clone(),
			Entry::Vacant(slot) => return Ok(slot.insert(tracker).clone()),
		};
		if let Err(e) = tracker.shutdown().await {
			error!(code = %code, error = %e, "Failed to shut down duplicate tracker");
		}
		Ok(winner)
	}

	pub async fn get(&self, code: &str) -> Option<Tracker> {
		self.trackers.read().await.get(code).cloned()
	}

	pub async fn remove(&self, code: &str) -> Option<Tracker> {
		self.trackers.write().await.remove(code)
	}

	pub async fn codes(&self) -> Vec<String> {
		let mut codes: Vec<String> = self.trackers.read().await.keys().cloned().collect();
		codes.sort();
		codes
	}

	/// Shuts down and removes every tracker.
	pub async fn shutdown_all(&self) {
		let trackers: Vec<(String, Tracker)> = self.trackers.write().await.drain().collect();
		for (code, tracker) in trackers {
			if let Err(e) = tracker.shutdown().await {
				error!(code = %code, error = %e, "Failed to shut down tracker");
			}
		}
	}
}
