// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! In-process event bus.
//!
//! Lets parts of the host report business events without holding a
//! [`crate::Tracker`]. The host publishes; a tracker consumes the subscription
//! via [`crate::Tracker::attach_bus`].

use tally_core::Params;
use tokio::sync::mpsc;

use crate::error::{Result, TrackerError};

/// Default buffer between publishers and the tracker.
pub const DEFAULT_BUS_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq)]
pub struct BusEvent {
	pub name: String,
	pub params: Params,
}

pub struct EventBus;

impl EventBus {
	pub fn channel(capacity: usize) -> (EventPublisher, EventSubscription) {
		let (tx, rx) = mpsc::channel(capacity.max(1));
		(EventPublisher { tx }, EventSubscription { rx })
	}
}

/// Cloneable publishing half.
#[derive(Debug, Clone)]
pub struct EventPublisher {
	tx: mpsc::Sender<BusEvent>,
}

impl EventPublisher {
	/// Waits for buffer space. Fails once the subscriber is gone.
	pub async fn publish(&self, name: impl Into<String>, params: Params) -> Result<()> {
		self
			.tx
			.send(BusEvent {
				name: name.into(),
				params,
			})
			.await
			.map_err(|_| TrackerError::ClientShutdown)
	}

	/// Non-blocking publish; returns false when the buffer is full or closed.
	pub fn try_publish(&self, name: impl Into<String>, params: Params) -> bool {
		self
			.tx
			.try_send(BusEvent {
				name: name.into(),
				params,
			})
			.is_ok()
	}
}

#[derive(Debug)]
pub struct EventSubscription {
	rx: mpsc::Receiver<BusEvent>,
}

impl EventSubscription {
	pub async fn recv(&mut self) -> Option<BusEvent> {
		self.rx.recv().await
	}
}
