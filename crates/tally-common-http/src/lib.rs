// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Shared HTTP utilities for Tally.
//!
//! Every transport channel builds its `reqwest` client here so requests carry
//! the same User-Agent header.

mod client;

pub use client::{builder, new_client, user_agent};
