// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! End-to-end delivery scenarios against scripted channels and a manual
//! clock.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use proptest::prelude::*;
use tally::{
	ChannelKind, ChannelOutcome, LifecycleSignal, ManualClock, MemoryStore, Params, StateStore,
	TrackOutcome, Tracker, TransportChannel, WirePayload,
};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct ScriptedChannel {
	name: &'static str,
	up: AtomicBool,
	attempts: AtomicUsize,
	sent: Mutex<Vec<WirePayload>>,
}

impl ScriptedChannel {
	fn new(name: &'static str, up: bool) -> Arc<Self> {
		Arc::new(Self {
			name,
			up: AtomicBool::new(up),
			attempts: AtomicUsize::new(0),
			sent: Mutex::new(Vec::new()),
		})
	}

	fn set_up(&self, up: bool) {
		self.up.store(up, Ordering::SeqCst);
	}

	fn attempts(&self) -> usize {
		self.attempts.load(Ordering::SeqCst)
	}

	fn sent(&self) -> Vec<WirePayload> {
		self.sent.lock().unwrap().clone()
	}
}

#[async_trait]
impl TransportChannel for ScriptedChannel {
	fn name(&self) -> &str {
		self.name
	}

	fn kind(&self) -> ChannelKind {
		ChannelKind::Observable
	}

	fn timeout(&self) -> Duration {
		Duration::from_millis(200)
	}

	async fn attempt(&self, payload: &WirePayload) -> ChannelOutcome {
		self.attempts.fetch_add(1, Ordering::SeqCst);
		if self.up.load(Ordering::SeqCst) {
			self.sent.lock().unwrap().push(payload.clone());
			ChannelOutcome::Success
		} else {
			ChannelOutcome::Failure("network unreachable".to_string())
		}
	}
}

fn clock() -> Arc<ManualClock> {
	Arc::new(ManualClock::new(
		Utc.timestamp_millis_opt(1_700_000_000_000).unwrap(),
	))
}

fn tracker(channels: Vec<Arc<dyn TransportChannel>>, clock: Arc<ManualClock>) -> Tracker {
	Tracker::builder()
		.endpoint("https://collect.example.com/t")
		.identifying_code("site_123")
		.drain_interval(None)
		.debug(true)
		.clock(clock)
		.channels(channels)
		.build()
		.unwrap()
}

#[tokio::test]
async fn purchase_falls_back_to_second_channel() {
	let fetch = ScriptedChannel::new("fetch", false);
	let beacon = ScriptedChannel::new("beacon", true);
	let tracker = tracker(vec![fetch.clone() as Arc<dyn TransportChannel>, beacon.clone()], clock());
	tracker.initialize().await.unwrap();

	let outcome = tracker
		.track_event(
			"purchase",
			Params::new()
				.insert("amount", 9.99)
				.insert("productId", "sub_monthly"),
		)
		.await;

	assert_eq!(
		outcome,
		TrackOutcome::Delivered {
			channel: "beacon".to_string()
		}
	);
	assert_eq!(fetch.attempts(), 1);
	assert_eq!(tracker.queue_len().await, 0);

	let sent = beacon.sent();
	assert_eq!(sent.len(), 1);
	assert_eq!(sent[0].get("value"), Some("9.99"));
	assert_eq!(sent[0].get("product_id"), Some("sub_monthly"));
	assert_eq!(sent[0].get("code"), Some("site_123"));
	assert!(sent[0].get("sessionId").unwrap().starts_with("sess_"));
	assert_eq!(sent[0].get("timestamp"), Some("1700000000000"));
}

#[tokio::test]
async fn queued_record_dropped_after_max_retries() {
	let channel = ScriptedChannel::new("fetch", false);
	let tracker = tracker(vec![channel.clone() as Arc<dyn TransportChannel>], clock());

	assert_eq!(
		tracker.track_event("click", Params::new()).await,
		TrackOutcome::Queued
	);
	assert_eq!(tracker.queued().await[0].retry_count, 0);

	for expected in 1..=3 {
		let report = tracker.flush().await;
		assert_eq!(report.requeued, 1);
		assert_eq!(tracker.queued().await[0].retry_count, expected);
	}

	let attempts = channel.attempts();
	let report = tracker.flush().await;
	assert_eq!(report.dropped, 1);
	assert_eq!(channel.attempts(), attempts);
	assert_eq!(tracker.queue_len().await, 0);
	assert_eq!(tracker.stats().dropped, 1);
}

#[tokio::test]
async fn session_rotates_after_idle_timeout() {
	let clock = clock();
	let channel = ScriptedChannel::new("fetch", true);
	let tracker = tracker(vec![channel.clone() as Arc<dyn TransportChannel>], clock.clone());

	tracker.track_event("page_view", Params::new()).await;
	clock.advance(Duration::from_secs(31 * 60));
	tracker.track_event("page_view", Params::new()).await;

	let sent = channel.sent();
	assert_eq!(sent.len(), 3);
	let first = sent[0].get("sessionId").unwrap();

	assert_eq!(sent[1].get("event"), Some("session_end"));
	assert_eq!(sent[1].get("sessionId"), Some(first));
	assert_eq!(sent[1].get("duration_ms"), Some("0"));

	assert_ne!(sent[2].get("sessionId"), Some(first));
	assert_eq!(sent[2].get("returning_user"), Some("true"));
	assert_eq!(sent[0].get("returning_user"), None);

	tracker.track_event("click", Params::new()).await;
	assert_eq!(channel.sent()[3].get("returning_user"), None);
}

#[tokio::test]
async fn session_survives_one_ms_short_of_timeout() {
	let clock = clock();
	let channel = ScriptedChannel::new("fetch", true);
	let tracker = tracker(vec![channel.clone() as Arc<dyn TransportChannel>], clock.clone());

	tracker.track_event("a", Params::new()).await;
	clock.advance(Duration::from_millis(1_799_999));
	tracker.track_event("b", Params::new()).await;
	clock.advance(Duration::from_millis(1_800_001));
	tracker.track_event("c", Params::new()).await;

	let events: Vec<String> = channel
		.sent()
		.iter()
		.map(|p| p.get("event").unwrap().to_string())
		.collect();
	assert_eq!(events, ["a", "b", "session_end", "c"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_first_tracks_share_a_session() {
	let channel = ScriptedChannel::new("fetch", true);
	let tracker = tracker(vec![channel.clone() as Arc<dyn TransportChannel>], clock());

	let mut handles = Vec::new();
	for i in 0..20 {
		let tracker = tracker.clone();
		handles.push(tokio::spawn(async move {
			tracker
				.track_event("click", Params::new().insert("n", i))
				.await
		}));
	}
	for handle in handles {
		handle.await.unwrap();
	}

	let sent = channel.sent();
	assert_eq!(sent.len(), 20);
	let first = sent[0].get("sessionId");
	assert!(sent.iter().all(|p| p.get("sessionId") == first));
}

#[tokio::test]
async fn persisted_queue_replays_on_next_initialize() {
	let store: Arc<dyn StateStore> = Arc::new(MemoryStore::new());
	let make = |channel: Arc<ScriptedChannel>| {
		Tracker::builder()
			.endpoint("https://collect.example.com/t")
			.identifying_code("site_123")
			.drain_interval(None)
			.persist_queue(true)
			.store(store.clone())
			.channels(vec![channel as Arc<dyn TransportChannel>])
			.build()
			.unwrap()
	};

	let offline = ScriptedChannel::new("fetch", false);
	let before = make(offline);
	before.track_event("purchase", Params::new().insert("value", 5)).await;
	before.shutdown().await.unwrap();

	let online = ScriptedChannel::new("fetch", true);
	let after = make(online.clone());
	let report = after.initialize().await.unwrap();
	assert_eq!(report.delivered, 1);
	assert_eq!(online.sent()[0].get("value"), Some("5"));
	assert_eq!(after.queue_len().await, 0);
}

#[tokio::test]
async fn foreground_drains_queue() {
	let channel = ScriptedChannel::new("fetch", false);
	let tracker = tracker(vec![channel.clone() as Arc<dyn TransportChannel>], clock());
	tracker.track_event("click", Params::new()).await;

	channel.set_up(true);
	tracker.handle_lifecycle(LifecycleSignal::Foreground).await;
	assert_eq!(tracker.queue_len().await, 0);
	assert_eq!(tracker.stats().delivered, 1);
}

#[tokio::test]
async fn default_channels_fall_back_to_form_relay() {
	let server = MockServer::start().await;
	Mock::given(method("GET"))
		.and(path("/t"))
		.respond_with(ResponseTemplate::new(500))
		.mount(&server)
		.await;
	Mock::given(method("POST"))
		.and(path("/relay"))
		.respond_with(ResponseTemplate::new(200))
		.mount(&server)
		.await;

	let tracker = Tracker::builder()
		.endpoint(format!("{}/t", server.uri()))
		.relay_endpoint(format!("{}/relay", server.uri()))
		.identifying_code("site_123")
		.drain_interval(None)
		.build()
		.unwrap();

	let outcome = tracker.track_event("signup", Params::new()).await;
	assert_eq!(
		outcome,
		TrackOutcome::Delivered {
			channel: "form".to_string()
		}
	);
}

#[tokio::test]
async fn default_channels_queue_when_collector_unreachable() {
	let tracker = Tracker::builder()
		.endpoint("http://127.0.0.1:9/t")
		.identifying_code("site_123")
		.drain_interval(None)
		.build()
		.unwrap();

	assert_eq!(
		tracker.track_event("click", Params::new()).await,
		TrackOutcome::Queued
	);
	assert_eq!(tracker.queue_len().await, 1);
	assert_eq!(tracker.flush().await.requeued, 1);
}

proptest! {
	#![proptest_config(ProptestConfig::with_cases(32))]

	#[test]
	fn failed_dispatch_enqueues_exactly_once(events in 1usize..20) {
		tokio_test::block_on(async {
			let tracker = tracker(vec![ScriptedChannel::new("down", false) as Arc<dyn TransportChannel>], clock());
			for i in 0..events {
				let outcome = tracker.track_event("click", Params::new().insert("n", i)).await;
				assert_eq!(outcome, TrackOutcome::Queued);
			}
			assert_eq!(tracker.queue_len().await, events);
			assert!(tracker.queued().await.iter().all(|q| q.retry_count == 0));
		});
	}

	#[test]
	fn retry_count_never_exceeds_max(max_retries in 0u32..6, drains in 0usize..10) {
		tokio_test::block_on(async {
			let tracker = Tracker::builder()
				.endpoint("https://collect.example.com/t")
				.identifying_code("site_123")
				.drain_interval(None)
				.max_retries(max_retries)
				.channels(vec![ScriptedChannel::new("down", false) as Arc<dyn TransportChannel>])
				.build()
				.unwrap();
			tracker.track_event("click", Params::new()).await;

			for _ in 0..drains {
				tracker.flush().await;
				for entry in tracker.queued().await {
					assert!(entry.retry_count <= max_retries);
				}
			}
			let expected_len = usize::from(drains <= max_retries as usize);
			assert_eq!(tracker.queue_len().await, expected_len);
		});
	}
}
