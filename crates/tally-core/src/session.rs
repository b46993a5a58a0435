// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Session identity and idle-timeout bookkeeping.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Idle period after which a session is rotated (30 minutes).
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_millis(1_800_000);

const SESSION_ID_PREFIX: &str = "sess_";
const RANDOM_SUFFIX_LEN: usize = 9;
const BASE36: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Opaque session identifier in the form `sess_<epochMillis>_<9 base36 chars>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
	/// Generates a fresh id stamped with `now`.
	#[must_use]
	pub fn generate(now: DateTime<Utc>) -> Self {
		let suffix: String = (0..RANDOM_SUFFIX_LEN)
			.map(|_| BASE36[fastrand::usize(..BASE36.len())] as char)
			.collect();
		Self(format!(
			"{SESSION_ID_PREFIX}{}_{suffix}",
			now.timestamp_millis()
		))
	}

	#[must_use]
	pub fn as_str(&self) -> &str {
		&self.0
	}

	/// Epoch millis embedded in the id at generation time.
	#[must_use]
	pub fn created_millis(&self) -> Option<i64> {
		let rest = self.0.strip_prefix(SESSION_ID_PREFIX)?;
		let (millis, _) = rest.split_once('_')?;
		millis.parse().ok()
	}
}

impl std::fmt::Display for SessionId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(&self.0)
	}
}

impl std::str::FromStr for SessionId {
	type Err = CoreError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let invalid = || CoreError::InvalidSessionId(s.to_string());

		let rest = s.strip_prefix(SESSION_ID_PREFIX).ok_or_else(invalid)?;
		let (millis, suffix) = rest.split_once('_').ok_or_else(invalid)?;

		if millis.is_empty() || !millis.bytes().all(|b| b.is_ascii_digit()) {
			return Err(invalid());
		}
		if suffix.len() != RANDOM_SUFFIX_LEN || !suffix.bytes().all(|b| BASE36.contains(&b)) {
			return Err(invalid());
		}

		Ok(Self(s.to_string()))
	}
}

/// A bounded period of user activity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
	pub id: SessionId,
	pub started_at: DateTime<Utc>,
	/// Updated on every dispatch attempt, delivered or queued.
	pub last_activity_at: DateTime<Utc>,
}

impl Session {
	/// Starts a new session at `now`.
	#[must_use]
	pub fn start(now: DateTime<Utc>) -> Self {
		Self {
			id: SessionId::generate(now),
			started_at: now,
			last_activity_at: now,
		}
	}

	/// A session stays valid while `now - last_activity_at < timeout`.
	#[must_use]
	pub fn is_expired(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
		let idle_ms = now
			.signed_duration_since(self.last_activity_at)
			.num_milliseconds();
		idle_ms >= 0 && idle_ms as u128 >= timeout.as_millis()
	}

	pub fn touch(&mut self, now: DateTime<Utc>) {
		if now > self.last_activity_at {
			self.last_activity_at = now;
		}
	}

	/// Time between the session start and its last recorded activity.
	#[must_use]
	pub fn duration_ms(&self) -> u64 {
		self.last_activity_at
			.signed_duration_since(self.started_at)
			.num_milliseconds()
			.max(0) as u64
	}
}
