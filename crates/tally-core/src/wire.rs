// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Flat string-valued wire representation shared by every transport.
//!
//! Records are never sent as nested JSON. Each context field and parameter
//! becomes one `(name, value)` pair, usable as query parameters or as form
//! fields.

use serde::Serialize;

use crate::event::EventRecord;

/// Wire field names for context values.
pub mod field {
	pub const EVENT: &str = "event";
	pub const SESSION_ID: &str = "sessionId";
	pub const TIMESTAMP: &str = "timestamp";
	pub const PLATFORM: &str = "platform";
	pub const CODE: &str = "code";
	pub const SECONDARY_CODE: &str = "code2";
	pub const DEVICE_ID: &str = "deviceId";
}

/// Fields always set by the SDK; caller parameters with these names are
/// discarded so session continuity cannot be spoofed.
pub const RESERVED_FIELDS: [&str; 3] = [field::SESSION_ID, field::TIMESTAMP, field::PLATFORM];

/// An ordered list of string pairs ready to be encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct WirePayload {
	fields: Vec<(String, String)>,
}

impl WirePayload {
	/// Flattens a record.
	///
	/// Order: event name, the reserved fields, context defaults not
	/// overridden by a parameter, then parameters in key order.
	pub fn from_record(record: &EventRecord) -> Self {
		let ctx = &record.context;
		let params = &record.parameters;

		let mut fields = vec![
			(field::EVENT.to_string(), record.event_name.clone()),
			(field::SESSION_ID.to_string(), ctx.session_id.to_string()),
			(field::TIMESTAMP.to_string(), ctx.timestamp.to_string()),
			(field::PLATFORM.to_string(), ctx.platform.clone()),
		];

		let defaults = [
			(field::CODE, Some(&ctx.identifying_code)),
			(field::SECONDARY_CODE, ctx.secondary_code.as_ref()),
			(field::DEVICE_ID, ctx.device_id.as_ref()),
		];
		for (name, value) in defaults {
			if let Some(value) = value {
				if !params.contains_key(name) {
					fields.push((name.to_string(), value.clone()));
				}
			}
		}

		for (key, value) in params.iter() {
			if key == field::EVENT || RESERVED_FIELDS.contains(&key.as_str()) {
				continue;
			}
			fields.push((key.clone(), value.to_wire_string()));
		}

		Self { fields }
	}

	pub fn fields(&self) -> &[(String, String)] {
		&self.fields
	}

	/// First value for `name`.
	pub fn get(&self, name: &str) -> Option<&str> {
		self.fields
			.iter()
			.find(|(k, _)| k == name)
			.map(|(_, v)| v.as_str())
	}

	pub fn len(&self) -> usize {
		self.fields.len()
	}

	pub fn is_empty(&self) -> bool {
		self.fields.is_empty()
	}
}
