// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Transport channels.
//!
//! A channel is one way of getting a flattened record to the collection
//! endpoint. The delivery engine walks an ordered list of channels and stops
//! at the first success; channels know nothing about each other or about the
//! retry queue.

mod beacon;
mod fetch;
mod form;
mod pixel;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use tally_core::{TrackerConfig, WirePayload};

use crate::error::{Result, TrackerError};

pub use beacon::BeaconChannel;
pub use fetch::FetchChannel;
pub use form::FormPostChannel;
pub use pixel::PixelChannel;

/// Result of a single channel attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelOutcome {
	Success,
	Failure(String),
}

impl ChannelOutcome {
	pub fn is_success(&self) -> bool {
		matches!(self, ChannelOutcome::Success)
	}
}

/// How much a channel can observe about delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
	/// The response status is known.
	Observable,
	/// The request is issued and never awaited. Success means "sent", so
	/// these channels are used only during teardown, never for dispatch.
	FireAndForget,
	/// Delivery is inferred from a side signal (relay response, image load).
	Indirect,
}

#[async_trait]
pub trait TransportChannel: Send + Sync {
	fn name(&self) -> &str;

	fn kind(&self) -> ChannelKind;

	/// Upper bound the engine allows for one attempt.
	fn timeout(&self) -> Duration;

	async fn attempt(&self, payload: &WirePayload) -> ChannelOutcome;
}

/// Fetch, beacon, form post, pixel: the built-in priority order. The beacon
/// is kept for teardown; dispatch walks fetch, form post, pixel.
pub fn default_channels(config: &TrackerConfig) -> Result<Vec<Arc<dyn TransportChannel>>> {
	let endpoint = parse_url(&config.endpoint)?;
	let relay = parse_url(config.relay_url())?;
	let pixel = endpoint
		.join(&config.pixel_path)
		.map_err(|e| TrackerError::InvalidEndpoint(format!("{}: {e}", config.pixel_path)))?;

	let client = tally_common_http::builder().build()?;

	let fetch = FetchChannel::new(client.clone(), endpoint.clone(), config.fetch_timeout);
	let beacon = BeaconChannel::new(client.clone(), endpoint, config.beacon_timeout);
	let form = FormPostChannel::new(client.clone(), relay, config.form_timeout);
	let pixel = PixelChannel::new(client, pixel, config.pixel_timeout);

	Ok(vec![
		Arc::new(fetch) as Arc<dyn TransportChannel>,
		Arc::new(beacon),
		Arc::new(form),
		Arc::new(pixel),
	])
}

/// Parses an absolute http(s) URL.
pub fn parse_url(raw: &str) -> Result<Url> {
	let url = Url::parse(raw).map_err(|e| TrackerError::InvalidEndpoint(format!("{raw}: {e}")))?;
	match url.scheme() {
		"http" | "https" => Ok(url),
		other => Err(TrackerError::InvalidEndpoint(format!(
			"{raw}: unsupported scheme {other}"
		))),
	}
}

fn status_outcome(status: reqwest::StatusCode) -> ChannelOutcome {
	if status.is_success() {
		ChannelOutcome::Success
	} else {
		let err = TrackerError::ServerError {
			status: status.as_u16(),
		};
		ChannelOutcome::Failure(err.to_string())
	}
}
