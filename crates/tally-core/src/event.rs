// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Event records.
//!
//! An [`EventRecord`] is one reportable user-action fact: a name, a bag of
//! scalar parameters, and the context fields stamped at build time. Records
//! are immutable once built; the SDK either delivers them or copies them into
//! the retry queue.

use serde::{Deserialize, Serialize};

use crate::params::Params;
use crate::session::SessionId;

/// Maximum length of an event name in bytes.
pub const MAX_EVENT_NAME_LENGTH: usize = 200;

/// Event names must be non-empty, at most [`MAX_EVENT_NAME_LENGTH`] bytes and
/// free of control characters.
pub fn validate_event_name(name: &str) -> bool {
	!name.trim().is_empty()
		&& name.len() <= MAX_EVENT_NAME_LENGTH
		&& !name.chars().any(char::is_control)
}

/// Fixed fields merged into every record at build time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventContext {
	pub session_id: SessionId,
	/// Epoch millis at build time.
	pub timestamp: i64,
	pub platform: String,
	pub identifying_code: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub secondary_code: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub device_id: Option<String>,
}

impl EventContext {
	pub fn new(
		session_id: SessionId,
		timestamp: i64,
		platform: impl Into<String>,
		identifying_code: impl Into<String>,
	) -> Self {
		Self {
			session_id,
			timestamp,
			platform: platform.into(),
			identifying_code: identifying_code.into(),
			secondary_code: None,
			device_id: None,
		}
	}

	pub fn with_secondary_code(mut self, code: Option<String>) -> Self {
		self.secondary_code = code;
		self
	}

	pub fn with_device_id(mut self, device_id: Option<String>) -> Self {
		self.device_id = device_id;
		self
	}
}

/// A built event, ready for dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
	pub event_name: String,
	#[serde(default)]
	pub parameters: Params,
	pub context: EventContext,
}

impl EventRecord {
	pub fn new(event_name: impl Into<String>, parameters: Params, context: EventContext) -> Self {
		Self {
			event_name: event_name.into(),
			parameters,
			context,
		}
	}

	pub fn session_id(&self) -> &SessionId {
		&self.context.session_id
	}
}
