// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error types for the Tally SDK.

use tally_core::ConfigError;
use thiserror::Error;

/// Tally SDK errors.
///
/// Track entrypoints never return these; they surface as
/// [`crate::TrackOutcome::Rejected`] or are logged. Construction and storage
/// adapters return them directly.
#[derive(Debug, Error)]
pub enum TrackerError {
	/// No identifying code configured; events cannot be attributed.
	#[error("missing identifying code")]
	MissingIdentifyingCode,

	/// Endpoint is missing or not an absolute URL.
	#[error("invalid endpoint: {0}")]
	InvalidEndpoint(String),

	#[error("invalid event name: {0:?}")]
	InvalidEventName(String),

	#[error("configuration error: {0}")]
	Config(#[from] ConfigError),

	/// HTTP request failed.
	#[error("HTTP request failed: {0}")]
	RequestFailed(#[from] reqwest::Error),

	/// Server returned a non-success status.
	#[error("server error ({status})")]
	ServerError { status: u16 },

	/// Local state store read or write failed.
	#[error("storage error: {0}")]
	Storage(String),

	#[error("serialization error: {0}")]
	Serialization(#[from] serde_json::Error),

	/// Tracker has been shut down.
	#[error("tracker has been shut down")]
	ClientShutdown,
}

/// Result type alias for SDK operations.
pub type Result<T> = std::result::Result<T, TrackerError>;
