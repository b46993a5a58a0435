// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use tally_core::WirePayload;

use super::{status_outcome, ChannelKind, ChannelOutcome, TransportChannel};

/// GET `endpoint?<fields>`; success iff the status is 2xx.
pub struct FetchChannel {
	client: Client,
	endpoint: Url,
	timeout: Duration,
}

impl FetchChannel {
	pub fn new(client: Client, endpoint: Url, timeout: Duration) -> Self {
		Self {
			client,
			endpoint,
			timeout,
		}
	}
}

#[async_trait]
impl TransportChannel for FetchChannel {
	fn name(&self) -> &str {
		"fetch"
	}

	fn kind(&self) -> ChannelKind {
		ChannelKind::Observable
	}

	fn timeout(&self) -> Duration {
		self.timeout
	}

	async fn attempt(&self, payload: &WirePayload) -> ChannelOutcome {
		let response = self
			.client
			.get(self.endpoint.clone())
			.query(payload.fields())
			.timeout(self.timeout)
			.send()
			.await;

		match response {
			Ok(response) => status_outcome(response.status()),
			Err(e) => ChannelOutcome::Failure(e.to_string()),
		}
	}
}
