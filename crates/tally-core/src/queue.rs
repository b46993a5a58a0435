// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Retry queue entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::event::EventRecord;

/// A record that exhausted every transport channel, plus retry bookkeeping.
///
/// The bookkeeping fields never reach the wire: the engine rebuilds the wire
/// payload from [`QueuedRecord::record`] alone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedRecord {
	pub record: EventRecord,
	pub retry_count: u32,
	pub queued_at: DateTime<Utc>,
}

impl QueuedRecord {
	/// First enqueue after a failed dispatch.
	pub fn new(record: EventRecord, now: DateTime<Utc>) -> Self {
		Self {
			record,
			retry_count: 0,
			queued_at: now,
		}
	}

	/// Re-enqueue after one more failed drain attempt.
	pub fn requeue(record: EventRecord, previous_retry_count: u32, now: DateTime<Utc>) -> Self {
		Self {
			record,
			retry_count: previous_retry_count + 1,
			queued_at: now,
		}
	}

	/// Entries at or above `max_retries` are dropped without another attempt.
	pub fn is_exhausted(&self, max_retries: u32) -> bool {
		self.retry_count >= max_retries
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::event::EventContext;
	use crate::params::Params;
	use crate::session::SessionId;

	fn entry() -> QueuedRecord {
		let ctx = EventContext::new(SessionId::generate(Utc::now()), 0, "rust", "site_1");
		QueuedRecord::new(EventRecord::new("click", Params::new(), ctx), Utc::now())
	}

	#[test]
	fn retry_count_walks_to_exhaustion() {
		let mut queued = entry();
		assert_eq!(queued.retry_count, 0);
		for expected in 1..=3 {
			assert!(!queued.is_exhausted(3));
			queued = QueuedRecord::requeue(queued.record, queued.retry_count, Utc::now());
			assert_eq!(queued.retry_count, expected);
		}
		assert!(queued.is_exhausted(3));
	}

	#[test]
	fn zero_max_retries_drops_immediately() {
		assert!(entry().is_exhausted(0));
	}
}
