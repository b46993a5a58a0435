// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Tracker configuration.
//!
//! Configuration is assembled from layers, later layers taking precedence:
//!
//! 1. built-in defaults
//! 2. an optional TOML file
//! 3. `TALLY_*` environment variables
//! 4. explicit builder setters in the SDK
//!
//! The resolved [`TrackerConfig`] is immutable once a tracker is built.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::session::DEFAULT_SESSION_TIMEOUT;

const DEFAULT_PLATFORM: &str = "rust";
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_PIXEL_PATH: &str = "/p.gif";
const DEFAULT_FETCH_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_BEACON_TIMEOUT_MS: u64 = 3_000;
const DEFAULT_FORM_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_PIXEL_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_DRAIN_INTERVAL_MS: u64 = 30_000;
const DEFAULT_MAX_QUEUE_LEN: usize = 1000;

/// Environment variables read by [`TrackerConfigLayer::from_env`].
pub mod env {
	pub const ENDPOINT: &str = "TALLY_ENDPOINT";
	pub const CODE: &str = "TALLY_CODE";
	pub const SECONDARY_CODE: &str = "TALLY_SECONDARY_CODE";
	pub const DEBUG: &str = "TALLY_DEBUG";
	pub const SESSION_TIMEOUT_MS: &str = "TALLY_SESSION_TIMEOUT_MS";
	pub const MAX_RETRIES: &str = "TALLY_MAX_RETRIES";
	pub const PERSIST_QUEUE: &str = "TALLY_PERSIST_QUEUE";
}

/// Configuration layer (all fields optional for merging).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct TrackerConfigLayer {
	/// Collection endpoint URL.
	pub endpoint: Option<String>,
	/// Opaque code attributing events to an integration.
	pub identifying_code: Option<String>,
	pub secondary_code: Option<String>,
	/// Log delivery failures.
	pub debug: Option<bool>,
	pub platform: Option<String>,
	pub session_timeout_ms: Option<u64>,
	pub max_retries: Option<u32>,
	/// Target of the hidden form channel; defaults to `endpoint`.
	pub relay_endpoint: Option<String>,
	/// Path of the image-pixel channel, resolved against `endpoint`.
	pub pixel_path: Option<String>,
	pub fetch_timeout_ms: Option<u64>,
	pub beacon_timeout_ms: Option<u64>,
	pub form_timeout_ms: Option<u64>,
	pub pixel_timeout_ms: Option<u64>,
	/// Periodic drain cadence; `0` disables the timer.
	pub drain_interval_ms: Option<u64>,
	pub max_queue_len: Option<usize>,
	/// Persist the retry queue in the local state store.
	pub persist_queue: Option<bool>,
}

macro_rules! merge_fields {
	($target:expr, $other:expr, $($field:ident),* $(,)?) => {
		$(
			if $other.$field.is_some() {
				$target.$field = $other.$field;
			}
		)*
	};
}

impl TrackerConfigLayer {
	/// Merge another layer into this one. Other layer takes precedence.
	pub fn merge(&mut self, other: Self) {
		merge_fields!(
			self,
			other,
			endpoint,
			identifying_code,
			secondary_code,
			debug,
			platform,
			session_timeout_ms,
			max_retries,
			relay_endpoint,
			pixel_path,
			fetch_timeout_ms,
			beacon_timeout_ms,
			form_timeout_ms,
			pixel_timeout_ms,
			drain_interval_ms,
			max_queue_len,
			persist_queue,
		);
	}

	/// Parses a TOML document.
	pub fn from_toml_str(contents: &str, path: &Path) -> Result<Self, ConfigError> {
		toml::from_str(contents).map_err(|source| ConfigError::TomlParse {
			path: path.to_path_buf(),
			source,
		})
	}

	/// Reads and parses a TOML file.
	pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
		let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::FileRead {
			path: path.to_path_buf(),
			source,
		})?;
		Self::from_toml_str(&contents, path)
	}

	/// Reads the `TALLY_*` process environment.
	pub fn from_env() -> Result<Self, ConfigError> {
		Self::from_env_with(|key| std::env::var(key).ok())
	}

	/// Reads variables through `lookup`, which makes the parsing testable
	/// without touching the process environment.
	pub fn from_env_with<F>(lookup: F) -> Result<Self, ConfigError>
	where
		F: Fn(&str) -> Option<String>,
	{
		let text = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

		Ok(Self {
			endpoint: text(env::ENDPOINT),
			identifying_code: text(env::CODE),
			secondary_code: text(env::SECONDARY_CODE),
			debug: text(env::DEBUG).map(|v| parse_bool(env::DEBUG, &v)).transpose()?,
			session_timeout_ms: text(env::SESSION_TIMEOUT_MS)
				.map(|v| parse_number(env::SESSION_TIMEOUT_MS, &v))
				.transpose()?,
			max_retries: text(env::MAX_RETRIES)
				.map(|v| parse_number(env::MAX_RETRIES, &v))
				.transpose()?,
			persist_queue: text(env::PERSIST_QUEUE)
				.map(|v| parse_bool(env::PERSIST_QUEUE, &v))
				.transpose()?,
			..Default::default()
		})
	}

	/// Convert to resolved configuration with defaults applied.
	pub fn finalize(self) -> Result<TrackerConfig, ConfigError> {
		let endpoint = self
			.endpoint
			.map(|e| e.trim().to_string())
			.filter(|e| !e.is_empty())
			.ok_or(ConfigError::Missing("endpoint"))?;

		let max_queue_len = self.max_queue_len.unwrap_or(DEFAULT_MAX_QUEUE_LEN);
		if max_queue_len == 0 {
			return Err(ConfigError::InvalidValue {
				key: "max_queue_len".to_string(),
				message: "must be at least 1".to_string(),
			});
		}

		let session_timeout = self
			.session_timeout_ms
			.map(Duration::from_millis)
			.unwrap_or(DEFAULT_SESSION_TIMEOUT);
		if session_timeout.is_zero() {
			return Err(ConfigError::InvalidValue {
				key: "session_timeout_ms".to_string(),
				message: "must be positive".to_string(),
			});
		}

		let pixel_path = self
			.pixel_path
			.unwrap_or_else(|| DEFAULT_PIXEL_PATH.to_string());

		Ok(TrackerConfig {
			endpoint,
			identifying_code: non_empty(self.identifying_code),
			secondary_code: non_empty(self.secondary_code),
			debug: self.debug.unwrap_or(false),
			platform: self
				.platform
				.unwrap_or_else(|| DEFAULT_PLATFORM.to_string()),
			session_timeout,
			max_retries: self.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
			relay_endpoint: non_empty(self.relay_endpoint),
			pixel_path,
			fetch_timeout: millis_or(self.fetch_timeout_ms, DEFAULT_FETCH_TIMEOUT_MS),
			beacon_timeout: millis_or(self.beacon_timeout_ms, DEFAULT_BEACON_TIMEOUT_MS),
			form_timeout: millis_or(self.form_timeout_ms, DEFAULT_FORM_TIMEOUT_MS),
			pixel_timeout: millis_or(self.pixel_timeout_ms, DEFAULT_PIXEL_TIMEOUT_MS),
			drain_interval: match self.drain_interval_ms.unwrap_or(DEFAULT_DRAIN_INTERVAL_MS) {
				0 => None,
				ms => Some(Duration::from_millis(ms)),
			},
			max_queue_len,
			persist_queue: self.persist_queue.unwrap_or(false),
		})
	}
}

/// Resolved tracker configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackerConfig {
	pub endpoint: String,
	pub identifying_code: Option<String>,
	pub secondary_code: Option<String>,
	pub debug: bool,
	pub platform: String,
	pub session_timeout: Duration,
	pub max_retries: u32,
	pub relay_endpoint: Option<String>,
	pub pixel_path: String,
	pub fetch_timeout: Duration,
	pub beacon_timeout: Duration,
	pub form_timeout: Duration,
	pub pixel_timeout: Duration,
	pub drain_interval: Option<Duration>,
	pub max_queue_len: usize,
	pub persist_queue: bool,
}

impl TrackerConfig {
	/// Defaults < optional TOML file < environment.
	pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
		let mut layer = TrackerConfigLayer::default();
		if let Some(path) = path {
			layer.merge(TrackerConfigLayer::from_file(path)?);
		}
		layer.merge(TrackerConfigLayer::from_env()?);
		layer.finalize()
	}

	/// Form channel target.
	pub fn relay_url(&self) -> &str {
		self.relay_endpoint.as_deref().unwrap_or(&self.endpoint)
	}

	/// Namespace for local state keys; one per identifying code.
	pub fn store_namespace(&self) -> String {
		format!(
			"tally:{}",
			self.identifying_code.as_deref().unwrap_or("default")
		)
	}
}

fn non_empty(value: Option<String>) -> Option<String> {
	value.filter(|v| !v.trim().is_empty())
}

fn millis_or(value: Option<u64>, default_ms: u64) -> Duration {
	Duration::from_millis(value.unwrap_or(default_ms))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
	match value.trim().to_ascii_lowercase().as_str() {
		"1" | "true" | "yes" | "on" => Ok(true),
		"0" | "false" | "no" | "off" => Ok(false),
		other => Err(ConfigError::InvalidValue {
			key: key.to_string(),
			message: format!("expected a boolean, got {other:?}"),
		}),
	}
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
	value.trim().parse().map_err(|_| ConfigError::InvalidValue {
		key: key.to_string(),
		message: format!("expected a number, got {value:?}"),
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::collections::HashMap;
	use std::io::Write;

	fn layer(endpoint: &str) -> TrackerConfigLayer {
		TrackerConfigLayer {
			endpoint: Some(endpoint.to_string()),
			..Default::default()
		}
	}

	#[test]
	fn test_defaults() {
		let config = layer("https://collect.example.com/t").finalize().unwrap();
		assert_eq!(config.session_timeout, Duration::from_millis(1_800_000));
		assert_eq!(config.max_retries, 3);
		assert_eq!(config.platform, "rust");
		assert_eq!(config.fetch_timeout, Duration::from_secs(10));
		assert_eq!(config.form_timeout, Duration::from_secs(5));
		assert_eq!(config.drain_interval, Some(Duration::from_secs(30)));
		assert_eq!(config.max_queue_len, 1000);
		assert!(!config.debug);
		assert!(!config.persist_queue);
		assert!(config.identifying_code.is_none());
		assert_eq!(config.relay_url(), "https://collect.example.com/t");
	}

	#[test]
	fn test_missing_endpoint() {
		let result = TrackerConfigLayer::default().finalize();
		assert!(matches!(result, Err(ConfigError::Missing("endpoint"))));
	}

	#[test]
	fn test_zero_drain_interval_disables_timer() {
		let config = TrackerConfigLayer {
			drain_interval_ms: Some(0),
			..layer("https://x.example")
		}
		.finalize()
		.unwrap();
		assert_eq!(config.drain_interval, None);
	}

	#[test]
	fn test_zero_session_timeout_rejected() {
		let result = TrackerConfigLayer {
			session_timeout_ms: Some(0),
			..layer("https://x.example")
		}
		.finalize();
		assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
	}

	#[test]
	fn test_blank_codes_are_unset() {
		let config = TrackerConfigLayer {
			identifying_code: Some("  ".to_string()),
			..layer("https://x.example")
		}
		.finalize()
		.unwrap();
		assert!(config.identifying_code.is_none());
		assert_eq!(config.store_namespace(), "tally:default");
	}

	#[test]
	fn test_merge_other_overwrites() {
		let mut base = TrackerConfigLayer {
			identifying_code: Some("site_a".to_string()),
			max_retries: Some(5),
			..layer("https://a.example")
		};
		base.merge(TrackerConfigLayer {
			endpoint: Some("https://b.example".to_string()),
			max_retries: Some(1),
			..Default::default()
		});
		assert_eq!(base.endpoint.as_deref(), Some("https://b.example"));
		assert_eq!(base.identifying_code.as_deref(), Some("site_a"));
		assert_eq!(base.max_retries, Some(1));
	}

	#[test]
	fn test_from_toml() {
		let toml = r#"
			endpoint = "https://collect.example.com/t"
			identifying_code = "site_123"
			debug = true
			session_timeout_ms = 60000
			pixel_path = "/img/logo.gif"
		"#;
		let config = TrackerConfigLayer::from_toml_str(toml, Path::new("tally.toml"))
			.unwrap()
			.finalize()
			.unwrap();
		assert_eq!(config.identifying_code.as_deref(), Some("site_123"));
		assert!(config.debug);
		assert_eq!(config.session_timeout, Duration::from_secs(60));
		assert_eq!(config.pixel_path, "/img/logo.gif");
		assert_eq!(config.store_namespace(), "tally:site_123");
	}

	#[test]
	fn test_toml_rejects_unknown_keys() {
		let result = TrackerConfigLayer::from_toml_str("endpont = \"x\"", Path::new("bad.toml"));
		assert!(matches!(result, Err(ConfigError::TomlParse { .. })));
	}

	#[test]
	fn test_from_file() {
		let mut file = tempfile::NamedTempFile::new().unwrap();
		writeln!(file, "endpoint = \"https://file.example\"").unwrap();
		let layer = TrackerConfigLayer::from_file(file.path()).unwrap();
		assert_eq!(layer.endpoint.as_deref(), Some("https://file.example"));
	}

	#[test]
	fn test_missing_file() {
		let result = TrackerConfigLayer::from_file(Path::new("/nonexistent/tally.toml"));
		assert!(matches!(result, Err(ConfigError::FileRead { .. })));
	}

	#[test]
	fn test_from_env() {
		let vars: HashMap<&str, &str> = [
			(env::ENDPOINT, "https://env.example"),
			(env::CODE, "site_env"),
			(env::DEBUG, "yes"),
			(env::MAX_RETRIES, "5"),
			(env::SECONDARY_CODE, ""),
		]
		.into_iter()
		.collect();
		let layer = TrackerConfigLayer::from_env_with(|k| vars.get(k).map(|v| v.to_string())).unwrap();
		assert_eq!(layer.endpoint.as_deref(), Some("https://env.example"));
		assert_eq!(layer.identifying_code.as_deref(), Some("site_env"));
		assert_eq!(layer.debug, Some(true));
		assert_eq!(layer.max_retries, Some(5));
		assert_eq!(layer.secondary_code, None);
	}

	#[test]
	fn test_from_env_rejects_garbage() {
		let result = TrackerConfigLayer::from_env_with(|k| {
			(k == env::SESSION_TIMEOUT_MS).then(|| "soon".to_string())
		});
		assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
	}
}
