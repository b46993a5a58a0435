// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Host lifecycle signals.

use std::fmt;

/// Signals forwarded by the host platform to [`crate::Tracker::handle_lifecycle`].
///
/// | Signal | Tracker response |
/// |--------|------------------|
/// | `Background` | persist session activity, drain the queue |
/// | `Foreground` | rotate the session if it expired, drain the queue |
/// | `Teardown` | end the session and hand everything to fire-and-forget channels |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleSignal {
	Background,
	Foreground,
	Teardown,
}

impl fmt::Display for LifecycleSignal {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			LifecycleSignal::Background => "background",
			LifecycleSignal::Foreground => "foreground",
			LifecycleSignal::Teardown => "teardown",
		};
		f.write_str(name)
	}
}
