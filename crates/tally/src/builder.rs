// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Event record assembly.

use std::sync::Arc;

use tally_core::{
	field, normalize::normalize, validate_event_name, EventContext, EventRecord, Params, Session,
	SessionId, TrackerConfig, RESERVED_FIELDS,
};

use crate::clock::Clock;
use crate::error::{Result, TrackerError};
use crate::session::SessionManager;

/// Builds canonical records from a name, a parameter bag and the current
/// session.
///
/// Parameters pass through the alias table once, here. Context fields the
/// SDK owns (`sessionId`, `timestamp`, `platform`) are always stamped by the
/// builder; caller values under those names are discarded.
pub struct EventBuilder {
	platform: String,
	identifying_code: Option<String>,
	secondary_code: Option<String>,
	sessions: Arc<SessionManager>,
	clock: Arc<dyn Clock>,
}

impl EventBuilder {
	pub fn new(config: &TrackerConfig, sessions: Arc<SessionManager>, clock: Arc<dyn Clock>) -> Self {
		Self {
			platform: config.platform.clone(),
			identifying_code: config.identifying_code.clone(),
			secondary_code: config.secondary_code.clone(),
			sessions,
			clock,
		}
	}

	/// Validates what can be checked without touching the session.
	pub fn check(&self, event_name: &str) -> Result<()> {
		self.identifying_code()?;
		if !validate_event_name(event_name) {
			return Err(TrackerError::InvalidEventName(event_name.to_string()));
		}
		Ok(())
	}

	/// Builds a record bound to the current session.
	pub async fn build(&self, event_name: &str, parameters: Params) -> Result<EventRecord> {
		self.check(event_name)?;
		let session_id = self.sessions.get_or_create_session_id().await;
		let device_id = self.sessions.get_or_create_device_id().await;
		self.assemble(event_name, parameters, session_id, Some(device_id))
	}

	/// Builds a record bound to an explicit session, e.g. the `session_end`
	/// record of a session that has just been rotated away.
	pub async fn build_for_session(
		&self,
		event_name: &str,
		parameters: Params,
		session: &Session,
	) -> Result<EventRecord> {
		self.check(event_name)?;
		let device_id = self.sessions.get_or_create_device_id().await;
		self.assemble(event_name, parameters, session.id.clone(), Some(device_id))
	}

	/// Pure assembly step.
	pub fn assemble(
		&self,
		event_name: &str,
		parameters: Params,
		session_id: SessionId,
		device_id: Option<String>,
	) -> Result<EventRecord> {
		let code = self.identifying_code()?;
		if !validate_event_name(event_name) {
			return Err(TrackerError::InvalidEventName(event_name.to_string()));
		}

		let mut parameters = normalize(parameters);
		parameters.remove(field::EVENT);
		for reserved in RESERVED_FIELDS {
			parameters.remove(reserved);
		}

		let context = EventContext::new(
			session_id,
			self.clock.now().timestamp_millis(),
			self.platform.as_str(),
			code,
		)
		.with_secondary_code(self.secondary_code.clone())
		.with_device_id(device_id);

		Ok(EventRecord::new(event_name, parameters, context))
	}

	fn identifying_code(&self) -> Result<&str> {
		self
			.identifying_code
			.as_deref()
			.ok_or(TrackerError::MissingIdentifyingCode)
	}
}
