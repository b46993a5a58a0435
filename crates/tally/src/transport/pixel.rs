// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Url};
use tally_core::WirePayload;

use super::{status_outcome, ChannelKind, ChannelOutcome, TransportChannel};

/// Image-pixel GET. Delivery is inferred from the response looking like an
/// image: a 2xx with an `image/*` content type. Anything else is treated as
/// the image failing to load.
pub struct PixelChannel {
	client: Client,
	pixel_url: Url,
	timeout: Duration,
}

impl PixelChannel {
	pub fn new(client: Client, pixel_url: Url, timeout: Duration) -> Self {
		Self {
			client,
			pixel_url,
			timeout,
		}
	}
}

#[async_trait]
impl TransportChannel for PixelChannel {
	fn name(&self) -> &str {
		"pixel"
	}

	fn kind(&self) -> ChannelKind {
		ChannelKind::Indirect
	}

	fn timeout(&self) -> Duration {
		self.timeout
	}

	async fn attempt(&self, payload: &WirePayload) -> ChannelOutcome {
		let response = match self
			.client
			.get(self.pixel_url.clone())
			.query(payload.fields())
			.timeout(self.timeout)
			.send()
			.await
		{
			Ok(response) => response,
			Err(e) => return ChannelOutcome::Failure(e.to_string()),
		};

		let status = status_outcome(response.status());
		if !status.is_success() {
			return status;
		}

		let content_type = response
			.headers()
			.get(CONTENT_TYPE)
			.and_then(|v| v.to_str().ok())
			.unwrap_or_default();
		if content_type.starts_with("image/") {
			ChannelOutcome::Success
		} else {
			ChannelOutcome::Failure(format!("not an image: {content_type:?}"))
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::transport::test_support::payload;
	use wiremock::matchers::{method, path, query_param};
	use wiremock::{Mock, MockServer, ResponseTemplate};

	fn channel(server: &MockServer) -> PixelChannel {
		let endpoint = Url::parse(&format!("{}/collect/t", server.uri())).unwrap();
		PixelChannel::new(
			tally_common_http::new_client(),
			endpoint.join("/p.gif").unwrap(),
			Duration::from_secs(2),
		)
	}

	#[tokio::test]
	async fn test_image_response_is_success() {
		let server = MockServer::start().await;
		Mock::given(method("GET"))
			.and(path("/p.gif"))
			.and(query_param("event", "purchase"))
			.respond_with(
				ResponseTemplate::new(200).set_body_raw(b"GIF89a".to_vec(), "image/gif"),
			)
			.expect(1)
			.mount(&server)
			.await;

		assert!(channel(&server).attempt(&payload()).await.is_success());
	}

	#[tokio::test]
	async fn test_non_image_is_failure() {
		let server = MockServer::start().await;
		Mock::given(method("GET"))
			.respond_with(ResponseTemplate::new(200).set_body_string("blocked"))
			.mount(&server)
			.await;

		let outcome = channel(&server).attempt(&payload()).await;
		assert!(matches!(outcome, ChannelOutcome::Failure(reason) if reason.starts_with("not an image")));
	}

	#[tokio::test]
	async fn test_error_status_is_failure() {
		let server = MockServer::start().await;
		Mock::given(method("GET"))
			.respond_with(ResponseTemplate::new(404).set_body_raw(b"".to_vec(), "image/gif"))
			.mount(&server)
			.await;

		assert!(!channel(&server).attempt(&payload()).await.is_success());
	}
}
