// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Core types for the Tally event delivery SDK.
//!
//! This crate holds the pure data model shared by the SDK (`tally`):
//! sessions, event records, parameter bags, the wire flattening used by every
//! transport channel, queued records and the layered tracker configuration.
//! Nothing in here performs I/O.
//!
//! # Example
//!
//! ```
//! use tally_core::{EventContext, EventRecord, Params, SessionId, WirePayload};
//!
//! let params = Params::new()
//!     .insert("amount", 9.99)
//!     .insert("productId", "sub_monthly");
//!
//! let record = EventRecord::new(
//!     "purchase",
//!     tally_core::normalize::normalize(params),
//!     EventContext::new(SessionId::generate(chrono::Utc::now()), 1_700_000_000_000, "rust", "site_123"),
//! );
//!
//! let wire = WirePayload::from_record(&record);
//! assert_eq!(wire.get("value"), Some("9.99"));
//! assert_eq!(wire.get("product_id"), Some("sub_monthly"));
//! ```

pub mod config;
pub mod error;
pub mod event;
pub mod normalize;
pub mod params;
pub mod queue;
pub mod session;
pub mod wire;

pub use config::{TrackerConfig, TrackerConfigLayer};
pub use error::{ConfigError, CoreError};
pub use event::{validate_event_name, EventContext, EventRecord, MAX_EVENT_NAME_LENGTH};
pub use params::{ParamValue, Params};
pub use queue::QueuedRecord;
pub use session::{Session, SessionId, DEFAULT_SESSION_TIMEOUT};
pub use wire::{field, WirePayload, RESERVED_FIELDS};
