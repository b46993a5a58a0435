// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Rust SDK for best-effort event delivery.
//!
//! A [`Tracker`] builds event records from a name and a parameter bag, stamps
//! them with the current session, and tries an ordered list of transport
//! channels (fetch, beacon, form post, image pixel) until one succeeds.
//! Records that exhaust every channel wait in a bounded retry queue that is
//! drained on initialization, on a timer and on [`Tracker::flush`].
//!
//! # Example
//!
//! ```ignore
//! use tally::{Params, PurchaseData, Tracker, LifecycleSignal};
//!
//! let tracker = Tracker::builder()
//!     .endpoint("https://collect.example.com/t")
//!     .identifying_code("site_123")
//!     .from_env()
//!     .build()?;
//! tracker.initialize().await?;
//!
//! tracker.track_page_view(Some("/pricing"), None).await;
//! tracker.track_purchase(PurchaseData {
//!     currency: Some("EUR".into()),
//!     ..PurchaseData::new(9.99)
//! }).await;
//!
//! tracker.handle_lifecycle(LifecycleSignal::Teardown).await;
//! tracker.shutdown().await?;
//! ```

pub mod builder;
pub mod bus;
pub mod clock;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod registry;
pub mod session;
pub mod store;
pub mod tracker;
pub mod transport;

pub use bus::{BusEvent, EventBus, EventPublisher, EventSubscription};
pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::{DeliveryEngine, DeliveryOutcome, DeliveryState, DeliveryStats, DrainReport};
pub use error::{Result, TrackerError};
pub use lifecycle::LifecycleSignal;
pub use registry::TrackerRegistry;
pub use store::{FileStore, MemoryStore, StateStore, StoreKeys};
pub use tracker::{PurchaseData, TrackOutcome, Tracker, TrackerBuilder};
pub use transport::{ChannelKind, ChannelOutcome, TransportChannel};

pub use tally_core::{
	EventRecord, ParamValue, Params, QueuedRecord, Session, SessionId, TrackerConfig, WirePayload,
};
