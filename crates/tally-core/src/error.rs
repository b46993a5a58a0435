// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error types for the core crate.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while parsing or validating core types.
#[derive(Debug, Error)]
pub enum CoreError {
	/// Session id does not match `sess_<millis>_<9 base36 chars>`.
	#[error("invalid session ID: {0}")]
	InvalidSessionId(String),
}

/// Errors raised while loading tracker configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("missing required configuration value: {0}")]
	Missing(&'static str),

	#[error("invalid value for {key}: {message}")]
	InvalidValue { key: String, message: String },

	#[error("failed to parse TOML config at {path}: {source}")]
	TomlParse {
		path: PathBuf,
		#[source]
		source: toml::de::Error,
	},

	#[error("failed to read config file {path}: {source}")]
	FileRead {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},
}
