// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use tally_core::WirePayload;
use tracing::trace;

use super::{ChannelKind, ChannelOutcome, TransportChannel};

/// POSTs the fields as a form body on a detached task.
///
/// Reports success as soon as the request is handed off; the response is
/// never inspected. The engine uses it only while the host is tearing down.
/// A request that cannot even be built is a failure.
pub struct BeaconChannel {
	client: Client,
	endpoint: Url,
	timeout: Duration,
}

impl BeaconChannel {
	pub fn new(client: Client, endpoint: Url, timeout: Duration) -> Self {
		Self {
			client,
			endpoint,
			timeout,
		}
	}
}

#[async_trait]
impl TransportChannel for BeaconChannel {
	fn name(&self) -> &str {
		"beacon"
	}

	fn kind(&self) -> ChannelKind {
		ChannelKind::FireAndForget
	}

	fn timeout(&self) -> Duration {
		self.timeout
	}

	async fn attempt(&self, payload: &WirePayload) -> ChannelOutcome {
		let request = match self
			.client
			.post(self.endpoint.clone())
			.form(payload.fields())
			.timeout(self.timeout)
			.build()
		{
			Ok(request) => request,
			Err(e) => return ChannelOutcome::Failure(e.to_string()),
		};

		let client = self.client.clone();
		tokio::spawn(async move {
			if let Err(e) = client.execute(request).await {
				trace!(error = %e, "Beacon request failed after hand-off");
			}
		});

		ChannelOutcome::Success
	}
}
