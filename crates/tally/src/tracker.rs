// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Tracker: the host-facing entrypoints.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tally_core::normalize::normalize;
use tally_core::{
	EventRecord, Params, Session, SessionId, TrackerConfig, TrackerConfigLayer,
};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::builder::EventBuilder;
use crate::bus::EventSubscription;
use crate::clock::{Clock, SystemClock};
use crate::engine::{
	DeliveryEngine, DeliveryOutcome, DeliveryStats, DrainReport, EngineConfig, QueuePersistence,
};
use crate::error::{Result, TrackerError};
use crate::lifecycle::LifecycleSignal;
use crate::session::SessionManager;
use crate::store::{MemoryStore, StateStore, StoreKeys};
use crate::transport::{default_channels, parse_url, TransportChannel};

const SESSION_END: &str = "session_end";
const RETURNING_USER: &str = "returning_user";

/// What happened to one track call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackOutcome {
	/// A channel accepted the record.
	Delivered { channel: String },
	/// Every channel failed; the record waits in the retry queue.
	Queued,
	/// The record was never built.
	Rejected(String),
}

impl From<DeliveryOutcome> for TrackOutcome {
	fn from(outcome: DeliveryOutcome) -> Self {
		match outcome {
			DeliveryOutcome::Delivered { channel } => TrackOutcome::Delivered { channel },
			DeliveryOutcome::Queued => TrackOutcome::Queued,
		}
	}
}

/// Purchase details for [`Tracker::track_purchase`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PurchaseData {
	pub value: f64,
	pub currency: Option<String>,
	pub product_id: Option<String>,
	pub transaction_id: Option<String>,
	pub quantity: Option<u32>,
	/// Extra parameters; the typed fields above take precedence.
	pub extra: Params,
}

impl PurchaseData {
	pub fn new(value: f64) -> Self {
		Self {
			value,
			..Default::default()
		}
	}

	fn into_params(self) -> Params {
		let mut params = normalize(self.extra);
		params.set("value", self.value);
		if let Some(currency) = self.currency {
			params.set("currency", currency);
		}
		if let Some(product_id) = self.product_id {
			params.set("product_id", product_id);
		}
		if let Some(transaction_id) = self.transaction_id {
			params.set("transaction_id", transaction_id);
		}
		if let Some(quantity) = self.quantity {
			params.set("quantity", quantity);
		}
		params
	}
}

/// Builder for constructing a [`Tracker`].
///
/// Configuration precedence: defaults < config file < `TALLY_*` environment
/// (when enabled) < setters on this builder.
pub struct TrackerBuilder {
	overrides: TrackerConfigLayer,
	config_file: Option<PathBuf>,
	use_env: bool,
	store: Option<Arc<dyn StateStore>>,
	clock: Option<Arc<dyn Clock>>,
	channels: Option<Vec<Arc<dyn TransportChannel>>>,
}

impl TrackerBuilder {
	pub fn new() -> Self {
		Self {
			overrides: TrackerConfigLayer::default(),
			config_file: None,
			use_env: false,
			store: None,
			clock: None,
			channels: None,
		}
	}

	/// Collection endpoint, e.g. `https://collect.example.com/t`.
	pub fn endpoint(mut self, url: impl Into<String>) -> Self {
		self.overrides.endpoint = Some(url.into());
		self
	}

	pub fn identifying_code(mut self, code: impl Into<String>) -> Self {
		self.overrides.identifying_code = Some(code.into());
		self
	}

	pub fn secondary_code(mut self, code: impl Into<String>) -> Self {
		self.overrides.secondary_code = Some(code.into());
		self
	}

	/// Log delivery and storage failures.
	pub fn debug(mut self, debug: bool) -> Self {
		self.overrides.debug = Some(debug);
		self
	}

	pub fn platform(mut self, platform: impl Into<String>) -> Self {
		self.overrides.platform = Some(platform.into());
		self
	}

	pub fn session_timeout(mut self, timeout: Duration) -> Self {
		self.overrides.session_timeout_ms = Some(timeout.as_millis() as u64);
		self
	}

	pub fn max_retries(mut self, max_retries: u32) -> Self {
		self.overrides.max_retries = Some(max_retries);
		self
	}

	pub fn relay_endpoint(mut self, url: impl Into<String>) -> Self {
		self.overrides.relay_endpoint = Some(url.into());
		self
	}

	pub fn pixel_path(mut self, path: impl Into<String>) -> Self {
		self.overrides.pixel_path = Some(path.into());
		self
	}

	/// `None` disables the periodic drain.
	pub fn drain_interval(mut self, interval: Option<Duration>) -> Self {
		self.overrides.drain_interval_ms =
			Some(interval.map(|i| i.as_millis() as u64).unwrap_or(0));
		self
	}

	pub fn max_queue_len(mut self, len: usize) -> Self {
		self.overrides.max_queue_len = Some(len);
		self
	}

	/// Mirror the retry queue into the state store.
	pub fn persist_queue(mut self, persist: bool) -> Self {
		self.overrides.persist_queue = Some(persist);
		self
	}

	/// Reads a TOML config file beneath the environment and setters.
	pub fn config_file(mut self, path: impl Into<PathBuf>) -> Self {
		self.config_file = Some(path.into());
		self
	}

	/// Reads `TALLY_*` environment variables beneath the setters.
	pub fn from_env(mut self) -> Self {
		self.use_env = true;
		self
	}

	/// Defaults to a volatile [`MemoryStore`].
	pub fn store(mut self, store: Arc<dyn StateStore>) -> Self {
		self.store = Some(store);
		self
	}

	pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
		self.clock = Some(clock);
		self
	}

	/// Replaces the default fetch, beacon, form, pixel order.
	pub fn channels(mut self, channels: Vec<Arc<dyn TransportChannel>>) -> Self {
		self.channels = Some(channels);
		self
	}

	/// Resolves configuration and wires the components. Nothing runs until
	/// [`Tracker::initialize`].
	pub fn build(self) -> Result<Tracker> {
		let mut layer = TrackerConfigLayer::default();
		if let Some(path) = &self.config_file {
			layer.merge(TrackerConfigLayer::from_file(path)?);
		}
		if self.use_env {
			layer.merge(TrackerConfigLayer::from_env()?);
		}
		layer.merge(self.overrides);

		let mut config = layer.finalize()?;
		config.endpoint = config.endpoint.trim_end_matches('/').to_string();
		parse_url(&config.endpoint)?;

		let channels = match self.channels {
			Some(channels) => channels,
			None => default_channels(&config)?,
		};
		let store = self.store.unwrap_or_else(|| Arc::new(MemoryStore::new()));
		let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));

		Ok(Tracker::from_parts(config, channels, store, clock))
	}
}

impl Default for TrackerBuilder {
	fn default() -> Self {
		Self::new()
	}
}

/// Persisted parameter bag cached in memory after the first successful read.
///
/// Updates made while the store is unreadable are held in `pending` and
/// merged over the stored bag once a read succeeds, so a failed read never
/// overwrites what is on disk.
struct CachedParams {
	key: String,
	state: Mutex<CachedState>,
}

#[derive(Default)]
struct CachedState {
	loaded: Option<Params>,
	pending: Params,
}

impl CachedParams {
	fn new(key: String) -> Self {
		Self {
			key,
			state: Mutex::new(CachedState::default()),
		}
	}

	async fn get(&self, store: &dyn StateStore, debug: bool) -> Params {
		let mut state = self.state.lock().await;
		self.load(&mut state, store, debug).await;
		match &state.loaded {
			Some(params) => params.clone(),
			None => state.pending.clone(),
		}
	}

	async fn merge(&self, store: &dyn StateStore, update: Params, debug: bool) -> Params {
		let mut state = self.state.lock().await;
		self.load(&mut state, store, debug).await;

		let Some(loaded) = state.loaded.take() else {
			let pending = std::mem::take(&mut state.pending).merge(normalize(update));
			state.pending = pending.clone();
			if debug {
				debug!(key = %self.key, "Store unreadable, holding properties in memory");
			}
			return pending;
		};

		let merged = loaded.merge(normalize(update));
		state.loaded = Some(merged.clone());
		self.save(store, &merged, debug).await;
		merged
	}

	/// Fills `loaded` from the store unless already loaded. A read error
	/// leaves it empty so the next call retries.
	async fn load(&self, state: &mut CachedState, store: &dyn StateStore, debug: bool) {
		if state.loaded.is_some() {
			return;
		}

		let stored = match store.get(&self.key).await {
			Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or_else(|e| {
				if debug {
					warn!(key = %self.key, error = %e, "Discarding corrupt cached properties");
				}
				Params::new()
			}),
			Ok(None) => Params::new(),
			Err(e) => {
				if debug {
					warn!(key = %self.key, error = %e, "Failed to read cached properties");
				}
				return;
			}
		};

		let pending = std::mem::take(&mut state.pending);
		let recovered = !pending.is_empty();
		let loaded = stored.merge(pending);
		if recovered {
			self.save(store, &loaded, debug).await;
		}
		state.loaded = Some(loaded);
	}

	async fn save(&self, store: &dyn StateStore, params: &Params, debug: bool) {
		let result = match serde_json::to_string(params) {
			Ok(json) => store.set(&self.key, &json).await,
			Err(e) => Err(e.into()),
		};
		if let Err(e) = result {
			if debug {
				warn!(key = %self.key, error = %e, "Failed to persist properties");
			}
		}
	}
}

struct TrackerInner {
	config: TrackerConfig,
	store: Arc<dyn StateStore>,
	sessions: Arc<SessionManager>,
	builder: EventBuilder,
	engine: Arc<DeliveryEngine>,
	user_properties: CachedParams,
	attribution: CachedParams,
	initialized: AtomicBool,
	closed: AtomicBool,
	drain_handle: Mutex<Option<JoinHandle<()>>>,
	bus_handles: Mutex<Vec<JoinHandle<()>>>,
}

/// Event tracker for one identifying code.
///
/// Cheap to clone; clones share the session, the retry queue and the drain
/// task.
///
/// # Example
///
/// ```ignore
/// use tally::{Params, Tracker};
///
/// let tracker = Tracker::builder()
///     .endpoint("https://collect.example.com/t")
///     .identifying_code("site_123")
///     .build()?;
/// tracker.initialize().await?;
///
/// tracker.track_event("purchase", Params::new()
///     .insert("amount", 9.99)
///     .insert("productId", "sub_monthly")
/// ).await;
///
/// tracker.shutdown().await?;
/// ```
#[derive(Clone)]
pub struct Tracker {
	inner: Arc<TrackerInner>,
}

impl Tracker {
	pub fn builder() -> TrackerBuilder {
		TrackerBuilder::new()
	}

	fn from_parts(
		config: TrackerConfig,
		channels: Vec<Arc<dyn TransportChannel>>,
		store: Arc<dyn StateStore>,
		clock: Arc<dyn Clock>,
	) -> Self {
		let keys = StoreKeys::new(config.store_namespace());
		let sessions = Arc::new(SessionManager::new(
			Arc::clone(&store),
			keys.clone(),
			Arc::clone(&clock),
			config.session_timeout,
			config.debug,
		));
		let builder = EventBuilder::new(&config, Arc::clone(&sessions), Arc::clone(&clock));

		let mut engine = DeliveryEngine::new(
			channels,
			EngineConfig {
				max_retries: config.max_retries,
				max_queue_len: config.max_queue_len,
				debug: config.debug,
			},
			clock,
		);
		if config.persist_queue {
			engine = engine.with_persistence(QueuePersistence::new(
				Arc::clone(&store),
				keys.key(StoreKeys::RETRY_QUEUE),
			));
		}

		Self {
			inner: Arc::new(TrackerInner {
				user_properties: CachedParams::new(keys.key(StoreKeys::USER_PROPERTIES)),
				attribution: CachedParams::new(keys.key(StoreKeys::ATTRIBUTION)),
				config,
				store,
				sessions,
				builder,
				engine: Arc::new(engine),
				initialized: AtomicBool::new(false),
				closed: AtomicBool::new(false),
				drain_handle: Mutex::new(None),
				bus_handles: Mutex::new(Vec::new()),
			}),
		}
	}

	pub fn config(&self) -> &TrackerConfig {
		&self.inner.config
	}

	/// Loads the session, restores a persisted queue, runs the first drain
	/// and starts the periodic drain task. Later calls only return an empty
	/// report.
	pub async fn initialize(&self) -> Result<DrainReport> {
		self.check_closed()?;
		if self.inner.initialized.swap(true, Ordering::SeqCst) {
			return Ok(DrainReport::default());
		}

		let session_id = self.inner.sessions.get_or_create_session_id().await;
		self.inner.sessions.get_or_create_device_id().await;
		let restored = self.inner.engine.restore_persisted().await;
		let report = self.inner.engine.drain_queue().await;

		if let Some(interval) = self.inner.config.drain_interval {
			let engine = Arc::clone(&self.inner.engine);
			let handle = tokio::spawn(async move {
				engine.run(interval).await;
			});
			*self.inner.drain_handle.lock().await = Some(handle);
		}

		info!(
			endpoint = %self.inner.config.endpoint,
			session_id = %session_id,
			restored,
			"Tracker initialized"
		);
		Ok(report)
	}

	/// Builds and dispatches one event. Never fails; see [`TrackOutcome`].
	pub async fn track_event(&self, event_name: &str, params: Params) -> TrackOutcome {
		if let Err(e) = self.check_closed() {
			return self.rejected(event_name, e);
		}
		if let Err(e) = self.inner.builder.check(event_name) {
			return self.rejected(event_name, e);
		}

		if let Some(previous) = self.inner.sessions.renew_if_expired().await {
			self.emit_session_end(&previous).await;
		}

		let mut params = self.default_params().await.merge(normalize(params));
		if self.inner.sessions.take_returning_marker().await {
			params.set(RETURNING_USER, true);
		}

		let record = match self.inner.builder.build(event_name, params).await {
			Ok(record) => record,
			Err(e) => return self.rejected(event_name, e),
		};
		self.deliver(&record).await
	}

	/// `page_view` with an optional `page_path`.
	pub async fn track_page_view(&self, path: Option<&str>, params: Option<Params>) -> TrackOutcome {
		let mut params = params.unwrap_or_default();
		if let Some(path) = path {
			params.set("page_path", path);
		}
		self.track_event("page_view", params).await
	}

	pub async fn track_purchase(&self, purchase: PurchaseData) -> TrackOutcome {
		self.track_event("purchase", purchase.into_params()).await
	}

	pub async fn track_button_click(&self, button_id: &str, params: Option<Params>) -> TrackOutcome {
		let params = params.unwrap_or_default().insert("button_id", button_id);
		self.track_event("button_click", params).await
	}

	pub async fn track_form_submit(&self, form_name: &str, params: Option<Params>) -> TrackOutcome {
		let params = params.unwrap_or_default().insert("form_name", form_name);
		self.track_event("form_submit", params).await
	}

	/// Reports the end of the current session without rotating it.
	pub async fn track_session_end(&self) -> TrackOutcome {
		if let Err(e) = self.check_closed() {
			return self.rejected(SESSION_END, e);
		}
		let session = self.inner.sessions.current().await;
		match self.session_end_record(&session).await {
			Ok(record) => self.deliver(&record).await,
			Err(e) => self.rejected(SESSION_END, e),
		}
	}

	/// Merges into the cached user properties. Properties ride along as
	/// default parameters on every later event.
	pub async fn set_user_properties(&self, props: Params) -> Params {
		let inner = &self.inner;
		inner
			.user_properties
			.merge(inner.store.as_ref(), props, inner.config.debug)
			.await
	}

	pub async fn get_user_properties(&self) -> Params {
		let inner = &self.inner;
		inner.user_properties.get(inner.store.as_ref(), inner.config.debug).await
	}

	/// Merges campaign attribution (e.g. `utm_source`) into the cached set.
	pub async fn set_attribution(&self, props: Params) -> Params {
		let inner = &self.inner;
		inner
			.attribution
			.merge(inner.store.as_ref(), props, inner.config.debug)
			.await
	}

	pub async fn attribution(&self) -> Params {
		let inner = &self.inner;
		inner.attribution.get(inner.store.as_ref(), inner.config.debug).await
	}

	/// Retries the queue now.
	pub async fn flush(&self) -> DrainReport {
		self.inner.engine.drain_queue().await
	}

	pub async fn handle_lifecycle(&self, signal: LifecycleSignal) {
		debug!(signal = %signal, "Lifecycle signal");
		match signal {
			LifecycleSignal::Background => {
				self.inner.sessions.touch().await;
				self.flush().await;
			}
			LifecycleSignal::Foreground => {
				if let Some(previous) = self.inner.sessions.renew_if_expired().await {
					self.emit_session_end(&previous).await;
				}
				self.flush().await;
			}
			LifecycleSignal::Teardown => {
				self.flush_on_exit().await;
			}
		}
	}

	/// Sends `session_end` and the whole retry queue through fire-and-forget
	/// channels without awaiting responses. Returns how many records were
	/// handed off.
	pub async fn flush_on_exit(&self) -> usize {
		let session = self.inner.sessions.current().await;
		let pending = match self.session_end_record(&session).await {
			Ok(record) => vec![record],
			Err(e) => {
				if self.inner.config.debug {
					debug!(error = %e, "Skipping session_end on exit");
				}
				Vec::new()
			}
		};
		self.inner.engine.flush_on_exit(pending).await
	}

	/// Forwards every bus event to [`Tracker::track_event`] until the
	/// publishers are dropped or the tracker shuts down.
	pub async fn attach_bus(&self, mut subscription: EventSubscription) {
		let tracker = self.clone();
		let handle = tokio::spawn(async move {
			while let Some(event) = subscription.recv().await {
				if tracker.is_closed() {
					break;
				}
				tracker.track_event(&event.name, event.params).await;
			}
		});
		self.inner.bus_handles.lock().await.push(handle);
	}

	/// Stops the drain task and bus consumers. Queued records stay queued
	/// (and persisted, when enabled). Idempotent.
	pub async fn shutdown(&self) -> Result<()> {
		if self.inner.closed.swap(true, Ordering::SeqCst) {
			return Ok(());
		}

		info!("Shutting down tracker");
		self.inner.engine.shutdown();

		if let Some(handle) = self.inner.drain_handle.lock().await.take() {
			if let Err(e) = handle.await {
				error!(error = %e, "Error waiting for drain task to complete");
			}
		}
		for handle in self.inner.bus_handles.lock().await.drain(..) {
			handle.abort();
		}

		info!("Tracker shutdown complete");
		Ok(())
	}

	pub fn is_closed(&self) -> bool {
		self.inner.closed.load(Ordering::SeqCst)
	}

	pub fn stats(&self) -> DeliveryStats {
		self.inner.engine.stats()
	}

	pub async fn queue_len(&self) -> usize {
		self.inner.engine.queue_len().await
	}

	pub async fn queued(&self) -> Vec<tally_core::QueuedRecord> {
		self.inner.engine.queued().await
	}

	pub async fn session_id(&self) -> SessionId {
		self.inner.sessions.get_or_create_session_id().await
	}

	fn check_closed(&self) -> Result<()> {
		if self.is_closed() {
			return Err(TrackerError::ClientShutdown);
		}
		Ok(())
	}

	async fn deliver(&self, record: &EventRecord) -> TrackOutcome {
		let outcome = self.inner.engine.dispatch(record).await;
		self.inner.sessions.touch().await;
		outcome.into()
	}

	async fn default_params(&self) -> Params {
		let attribution = self.attribution().await;
		let user_properties = self.get_user_properties().await;
		attribution.merge(user_properties)
	}

	async fn session_end_record(&self, session: &Session) -> Result<EventRecord> {
		let params = Params::new().insert("duration_ms", session.duration_ms());
		self
			.inner
			.builder
			.build_for_session(SESSION_END, params, session)
			.await
	}

	async fn emit_session_end(&self, previous: &Session) {
		match self.session_end_record(previous).await {
			Ok(record) => {
				self.inner.engine.dispatch(&record).await;
			}
			Err(e) => {
				if self.inner.config.debug {
					warn!(error = %e, "Failed to build session_end");
				}
			}
		}
	}

	fn rejected(&self, event_name: &str, err: TrackerError) -> TrackOutcome {
		if self.inner.config.debug {
			warn!(event = %event_name, error = %err, "Event rejected");
		}
		TrackOutcome::Rejected(err.to_string())
	}
}
