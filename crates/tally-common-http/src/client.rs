// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! HTTP client with the SDK User-Agent header.

use reqwest::{Client, ClientBuilder};

const SDK_NAME: &str = "tally";
const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Creates a new HTTP client with the standard Tally User-Agent header.
///
/// Panics only if the TLS backend cannot be initialized.
pub fn new_client() -> Client {
	builder().build().expect("failed to build HTTP client")
}

/// Creates a client builder with the standard User-Agent header.
///
/// Use this when the caller needs to handle the build error or customize
/// the client further.
///
/// # Example
/// ```ignore
/// let client = tally_common_http::builder()
///     .timeout(Duration::from_secs(5))
///     .build()?;
/// ```
pub fn builder() -> ClientBuilder {
	Client::builder().user_agent(user_agent())
}

/// Returns the standard User-Agent string.
///
/// Format: `tally/{version}/{os}-{arch}`
pub fn user_agent() -> String {
	format!(
		"{SDK_NAME}/{SDK_VERSION}/{}-{}",
		std::env::consts::OS,
		std::env::consts::ARCH
	)
}
