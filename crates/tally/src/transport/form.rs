// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use tally_core::WirePayload;

use super::{status_outcome, ChannelKind, ChannelOutcome, TransportChannel};

/// Form-encoded POST to the relay endpoint. The relay forwards to the
/// collector, so a 2xx from the relay counts as delivered.
pub struct FormPostChannel {
	client: Client,
	relay: Url,
	timeout: Duration,
}

impl FormPostChannel {
	pub fn new(client: Client, relay: Url, timeout: Duration) -> Self {
		Self {
			client,
			relay,
			timeout,
		}
	}
}

#[async_trait]
impl TransportChannel for FormPostChannel {
	fn name(&self) -> &str {
		"form"
	}

	fn kind(&self) -> ChannelKind {
		ChannelKind::Indirect
	}

	fn timeout(&self) -> Duration {
		self.timeout
	}

	async fn attempt(&self, payload: &WirePayload) -> ChannelOutcome {
		let response = self
			.client
			.post(self.relay.clone())
			.form(payload.fields())
			.timeout(self.timeout)
			.send()
			.await;

		match response {
			Ok(response) => status_outcome(response.status()),
			Err(e) => ChannelOutcome::Failure(e.to_string()),
		}
	}
}
