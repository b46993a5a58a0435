// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Tracks a few events against a collection endpoint.
//!
//! ```text
//! TALLY_ENDPOINT=https://collect.example.com/t TALLY_CODE=site_123 \
//!     RUST_LOG=tally=debug cargo run -p tally --example track
//! ```

use std::time::Duration;

use tally::{EventBus, FileStore, LifecycleSignal, Params, PurchaseData, Tracker};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	tracing_subscriber::fmt()
		.with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
		.init();

	let store = FileStore::default_location()?;
	tracing::info!(path = ?store.path(), "Using state store");

	let tracker = Tracker::builder()
		.from_env()
		.debug(true)
		.persist_queue(true)
		.drain_interval(Some(Duration::from_secs(10)))
		.store(std::sync::Arc::new(store))
		.build()?;
	let report = tracker.initialize().await?;
	tracing::info!(?report, "Initial drain");

	tracker
		.set_attribution(Params::new().insert("utm_source", "example"))
		.await;

	let outcome = tracker.track_page_view(Some("/pricing"), None).await;
	tracing::info!(?outcome, "page_view");

	let outcome = tracker
		.track_purchase(PurchaseData {
			currency: Some("EUR".to_string()),
			product_id: Some("sub_monthly".to_string()),
			..PurchaseData::new(9.99)
		})
		.await;
	tracing::info!(?outcome, "purchase");

	let (publisher, subscription) = EventBus::channel(16);
	tracker.attach_bus(subscription).await;
	publisher
		.publish("newsletter_signup", Params::new().insert("list", "weekly"))
		.await?;
	tokio::time::sleep(Duration::from_millis(200)).await;

	tracker.handle_lifecycle(LifecycleSignal::Teardown).await;
	tracing::info!(stats = ?tracker.stats(), queued = tracker.queue_len().await, "Done");
	tracker.shutdown().await?;
	Ok(())
}
