// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Time source for session expiry and record timestamps.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};

pub trait Clock: Send + Sync {
	fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
	fn now(&self) -> DateTime<Utc> {
		Utc::now()
	}
}

/// A clock that only moves when told to. Used to exercise session expiry
/// without sleeping.
#[derive(Debug)]
pub struct ManualClock {
	millis: AtomicI64,
}

impl ManualClock {
	pub fn new(start: DateTime<Utc>) -> Self {
		Self {
			millis: AtomicI64::new(start.timestamp_millis()),
		}
	}

	pub fn advance(&self, by: Duration) {
		let delta = i64::try_from(by.as_millis()).unwrap_or(i64::MAX);
		self.millis.fetch_add(delta, Ordering::SeqCst);
	}

	pub fn set(&self, to: DateTime<Utc>) {
		self.millis.store(to.timestamp_millis(), Ordering::SeqCst);
	}
}

impl Clock for ManualClock {
	fn now(&self) -> DateTime<Utc> {
		let millis = self.millis.load(Ordering::SeqCst);
		Utc.timestamp_millis_opt(millis)
			.single()
			.unwrap_or(DateTime::<Utc>::MIN_UTC)
	}
}
