//! Shared decoder manager — one decoder, many consumers.
//!
//! The `SharedDecoderManager` handles:
//! - Creating the single decoder lazily, on the first proxy request
//! - Issuing lightweight [`SharedDecoderProxy`] handles to consumers
//! - Selecting which proxy drives the decoder and receives its events
//! - Draining and flushing the decoder on every hand-off between proxies
//! - Running the decoder's async init at most once, sharing the result
//! - Recreating the decoder for a new configuration, and final teardown
//!
//! # Hand-off
//!
//! Making a proxy idle arms the router's internal-drain flag, asks the
//! decoder to drain, blocks until the router observes the matching drain
//! completion, flushes, and only then clears the active proxy. A new proxy
//! is recorded active after that sequence has finished, so no output or
//! decoder state of one consumer is ever observed by another.
//!
//! # Threading
//!
//! Decoder work runs on the manager's own [`TaskQueue`]. Consumer calls
//! are serialized by the caller and must not run on that queue, since a
//! hand-off blocks until the queue reports drain completion. Sinks must not
//! call back into their proxy from inside an event; dispatch instead.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use ds_common::{
    ConfigPolicy, DecodeError, DecoderCallback, DecoderConfig, InitError, InitPromise,
    ManagerConfig, MediaDataDecoder, MediaSample, PlatformDecoderModule, ProxyId, Subscription,
    TaskQueue, TrackType,
};

use crate::proxy::SharedDecoderProxy;
use crate::router::{EventRouter, RouterStats};

/// An init request that has been issued to the decoder but not answered.
struct PendingInit {
    generation: u64,
    promise: InitPromise,
    request: Subscription,
}

#[derive(Default)]
struct InitState {
    initialized: bool,
    track_type: Option<TrackType>,
    generation: u64,
    pending: Option<PendingInit>,
}

/// Owns the shared decoder and arbitrates which proxy may drive it.
pub struct SharedDecoderManager {
    config: ManagerConfig,
    queue: Mutex<Option<TaskQueue>>,
    router: Arc<EventRouter>,
    decoder: Mutex<Option<Box<dyn MediaDataDecoder>>>,
    /// Module the decoder came from; reused by `recreate`.
    module: Mutex<Option<Arc<dyn PlatformDecoderModule>>>,
    decoder_config: Mutex<Option<DecoderConfig>>,
    active: Mutex<Option<ProxyId>>,
    init: Mutex<InitState>,
    next_proxy_id: AtomicU64,
    live_proxies: AtomicUsize,
    shut_down: AtomicBool,
}

impl fmt::Debug for SharedDecoderManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedDecoderManager")
            .field("has_decoder", &self.has_decoder())
            .field("active_proxy", &self.active_proxy())
            .field("initialized", &self.is_initialized())
            .field("proxies", &self.proxy_count())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

impl SharedDecoderManager {
    /// Create a manager and start its worker queue.
    ///
    /// No decoder exists until the first [`create_decoder`](Self::create_decoder).
    pub fn new(config: ManagerConfig) -> Result<Arc<Self>, DecodeError> {
        let queue = TaskQueue::spawn(config.queue_name.clone())?;
        info!(queue = %config.queue_name, "Shared decoder manager created");

        Ok(Arc::new(Self {
            config,
            queue: Mutex::new(Some(queue)),
            router: Arc::new(EventRouter::new()),
            decoder: Mutex::new(None),
            module: Mutex::new(None),
            decoder_config: Mutex::new(None),
            active: Mutex::new(None),
            init: Mutex::new(InitState::default()),
            next_proxy_id: AtomicU64::new(1),
            live_proxies: AtomicUsize::new(0),
            shut_down: AtomicBool::new(false),
        }))
    }

    /// Issue a proxy for a consumer that reports to `callback`.
    ///
    /// The first call creates the shared decoder through `module`, bound to
    /// the manager's queue and event router. Later calls multiplex onto the
    /// existing decoder; under [`ConfigPolicy::RequireMatching`] a request
    /// whose config is not compatible with the decoder's is refused.
    ///
    /// The new proxy is not selected; selection happens on its first
    /// `init` or `input`.
    ///
    /// # Errors
    /// Returns the module's error if decoder creation fails. The module is
    /// then forgotten and no proxy is issued.
    pub fn create_decoder(
        self: &Arc<Self>,
        module: Arc<dyn PlatformDecoderModule>,
        config: &DecoderConfig,
        callback: Arc<dyn DecoderCallback>,
    ) -> Result<SharedDecoderProxy, DecodeError> {
        if self.is_shut_down() {
            return Err(DecodeError::ShutDown);
        }

        {
            let mut decoder = self.decoder.lock();
            if decoder.is_none() {
                match self.build_decoder(module.as_ref(), config) {
                    Ok(created) => {
                        *decoder = Some(created);
                        *self.module.lock() = Some(module);
                        *self.decoder_config.lock() = Some(config.clone());
                        info!(config = %config, "Created shared decoder");
                    }
                    Err(e) => {
                        *self.module.lock() = None;
                        warn!(config = %config, error = %e, "Shared decoder creation failed");
                        return Err(e);
                    }
                }
            } else if self.config.config_policy == ConfigPolicy::RequireMatching {
                if let Some(existing) = self.decoder_config.lock().as_ref() {
                    if !existing.is_compatible_with(config) {
                        return Err(DecodeError::ConfigMismatch {
                            expected: existing.to_string(),
                            got: config.to_string(),
                        });
                    }
                }
            }
        }

        let id = ProxyId(self.next_proxy_id.fetch_add(1, Ordering::AcqRel));
        self.live_proxies.fetch_add(1, Ordering::AcqRel);
        debug!(proxy = %id, "Issued shared decoder proxy");
        Ok(SharedDecoderProxy::new(Arc::clone(self), id, callback))
    }

    /// Make `proxy` the one that drives the decoder, handing off from the
    /// previously active proxy first.
    pub(crate) fn select(&self, proxy: ProxyId, callback: &Arc<dyn DecoderCallback>) {
        if self.is_shut_down() {
            return;
        }
        self.check_off_queue("select");
        let previous = self.active_proxy();
        if previous == Some(proxy) {
            return;
        }
        if let Some(previous) = previous {
            self.set_idle(previous);
        }

        *self.active.lock() = Some(proxy);
        self.router.bind(proxy, Arc::clone(callback));
        debug!(%proxy, "Selected proxy");
    }

    /// Hand the decoder off from `proxy`: drain, wait, flush, deactivate.
    ///
    /// No-op unless `proxy` is the active one.
    pub(crate) fn set_idle(&self, proxy: ProxyId) {
        if self.active_proxy() != Some(proxy) {
            return;
        }
        debug!(%proxy, "Handing off shared decoder");

        // Armed before the request: drain completion may arrive synchronously.
        self.router.arm_internal_drain();
        match self.with_decoder(|d| d.drain()) {
            Ok(()) => {
                // Still counted on timeout: the late completion is absorbed.
                if !self.router.wait_internal_drain(self.config.drain_timeout()) {
                    warn!(
                        %proxy,
                        timeout_ms = ?self.config.drain_timeout_ms,
                        outstanding = self.router.outstanding_internal_drains(),
                        "Hand-off drain did not complete in time; flushing anyway"
                    );
                }
            }
            Err(e) => {
                self.router.disarm_internal_drain();
                warn!(%proxy, error = %e, "Hand-off drain failed; flushing without waiting");
            }
        }

        if let Err(e) = self.with_decoder(|d| d.flush()) {
            debug!(%proxy, error = %e, "Hand-off flush failed");
        }

        *self.active.lock() = None;
        self.router.unbind();
        debug!(%proxy, "Proxy is idle");
    }

    /// Initialize the shared decoder, at most once per decoder instance.
    ///
    /// Returns an already-resolved promise once init has succeeded, and the
    /// in-flight promise while an init is outstanding. A rejected init leaves
    /// the decoder uninitialized, so a later call retries.
    ///
    /// The manager records the outcome when the returned promise (or any
    /// clone) is first observed after the decoder answers.
    pub(crate) fn init_decoder(self: &Arc<Self>) -> InitPromise {
        self.check_off_queue("init");
        let mut state = self.init.lock();
        if state.initialized {
            return InitPromise::resolved(state.track_type.unwrap_or_default());
        }
        if let Some(pending) = &state.pending {
            return pending.promise.clone();
        }

        let Some(request) = self.decoder.lock().as_mut().map(|d| d.init()) else {
            return InitPromise::rejected(InitError::NoDecoder);
        };
        state.generation += 1;
        let generation = state.generation;

        let manager = Arc::downgrade(self);
        let (promise, request) = request
            .map(move |result| {
                if let Some(manager) = manager.upgrade() {
                    manager.complete_init(generation, &result);
                }
                result
            })
            .abortable();
        state.pending = Some(PendingInit {
            generation,
            promise: promise.clone(),
            request,
        });
        debug!(generation, "Issued shared decoder init");
        promise
    }

    fn complete_init(&self, generation: u64, result: &Result<TrackType, InitError>) {
        {
            let mut state = self.init.lock();
            let matches = state
                .pending
                .as_ref()
                .is_some_and(|p| p.generation == generation);
            if !matches {
                return;
            }
            state.pending = None;
            if let Ok(track) = result {
                state.initialized = true;
                state.track_type = Some(*track);
            }
        }

        match result {
            Ok(track) => info!(%track, "Shared decoder initialized"),
            Err(e) => warn!(error = %e, "Shared decoder init failed"),
        }
    }

    /// Disconnect an outstanding init; its waiters see `Canceled`.
    fn cancel_init(&self) {
        let pending = self.init.lock().pending.take();
        if let Some(pending) = pending {
            pending.request.disconnect();
            debug!(generation = pending.generation, "Canceled pending decoder init");
        }
    }

    /// Init and selection block on the hand-off drain, which the queue
    /// itself has to deliver.
    fn check_off_queue(&self, op: &'static str) {
        let on_queue = self.queue.lock().as_ref().is_some_and(|q| q.is_current());
        if on_queue {
            warn!(op, "Shared decoder manager called from its own task queue");
        }
        debug_assert!(!on_queue, "{op} called from the manager's task queue");
    }

    /// Replace the decoder with a fresh one built for `config`.
    ///
    /// The old decoder is flushed and shut down first. On success the new
    /// decoder must be initialized again; the active proxy is kept.
    ///
    /// # Errors
    /// Fails if no module is known or the module cannot create a decoder;
    /// the manager is then left without a decoder.
    pub fn recreate(&self, config: &DecoderConfig) -> Result<(), DecodeError> {
        if self.is_shut_down() {
            return Err(DecodeError::ShutDown);
        }
        let module = self.module.lock().clone().ok_or(DecodeError::NoDecoder)?;
        self.cancel_init();

        let mut decoder = self.decoder.lock();
        if let Some(mut old) = decoder.take() {
            if let Err(e) = old.flush() {
                debug!(error = %e, "Flush before recreate failed");
            }
            if let Err(e) = old.shutdown() {
                debug!(error = %e, "Shutdown before recreate failed");
            }
            self.router.reset_internal_drains();
        }

        match self.build_decoder(module.as_ref(), config) {
            Ok(created) => {
                *decoder = Some(created);
                drop(decoder);
                {
                    let mut state = self.init.lock();
                    state.initialized = false;
                    state.track_type = None;
                }
                *self.decoder_config.lock() = Some(config.clone());
                info!(config = %config, "Recreated shared decoder");
                Ok(())
            }
            Err(e) => {
                drop(decoder);
                *self.decoder_config.lock() = None;
                warn!(config = %config, error = %e, "Shared decoder recreation failed");
                Err(e)
            }
        }
    }

    /// Final teardown. Idempotent.
    ///
    /// Cancels an outstanding init, shuts the decoder down, forgets the
    /// module and joins the worker queue once it is idle.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        self.cancel_init();

        let decoder = self.decoder.lock().take();
        if let Some(mut decoder) = decoder {
            if let Err(e) = decoder.shutdown() {
                warn!(error = %e, "Shared decoder shutdown failed");
            }
        }
        self.router.reset_internal_drains();
        *self.module.lock() = None;
        *self.decoder_config.lock() = None;
        *self.active.lock() = None;
        self.router.unbind();

        let queue = self.queue.lock().take();
        if let Some(queue) = queue {
            queue.await_shutdown_and_idle();
        }
        info!("Shared decoder manager shut down");
    }

    pub(crate) fn input(&self, sample: MediaSample) -> Result<(), DecodeError> {
        self.with_decoder(|d| d.input(sample))
    }

    pub(crate) fn flush(&self) -> Result<(), DecodeError> {
        self.with_decoder(|d| d.flush())
    }

    pub(crate) fn drain(&self) -> Result<(), DecodeError> {
        self.with_decoder(|d| d.drain())
    }

    /// Called when a proxy shuts down or is dropped.
    pub(crate) fn release_proxy(&self, proxy: ProxyId) {
        self.set_idle(proxy);
        self.live_proxies.fetch_sub(1, Ordering::AcqRel);
        debug!(%proxy, "Released shared decoder proxy");
    }

    fn with_decoder<R>(
        &self,
        f: impl FnOnce(&mut dyn MediaDataDecoder) -> Result<R, DecodeError>,
    ) -> Result<R, DecodeError> {
        let mut decoder = self.decoder.lock();
        match decoder.as_mut() {
            Some(decoder) => f(decoder.as_mut()),
            None if self.is_shut_down() => Err(DecodeError::ShutDown),
            None => Err(DecodeError::NoDecoder),
        }
    }

    /// Create a decoder bound to the manager's queue and router.
    fn build_decoder(
        &self,
        module: &dyn PlatformDecoderModule,
        config: &DecoderConfig,
    ) -> Result<Box<dyn MediaDataDecoder>, DecodeError> {
        if !module.supports(config) {
            return Err(DecodeError::CreateFailed {
                codec: config.codec,
                reason: format!("module does not support {config}"),
            });
        }
        let router: Arc<dyn DecoderCallback> = self.router.clone();
        module.create_decoder(config, self.queue()?, router)
    }

    fn queue(&self) -> Result<TaskQueue, DecodeError> {
        self.queue.lock().clone().ok_or(DecodeError::ShutDown)
    }

    /// The worker queue all decoder work runs on, until shutdown.
    pub fn task_queue(&self) -> Option<TaskQueue> {
        self.queue.lock().clone()
    }

    pub fn is_hardware_accelerated(&self) -> bool {
        self.decoder
            .lock()
            .as_ref()
            .is_some_and(|d| d.is_hardware_accelerated())
    }

    pub fn software_fallback_reason(&self) -> Option<String> {
        self.decoder
            .lock()
            .as_ref()
            .and_then(|d| d.software_fallback_reason())
    }

    pub fn active_proxy(&self) -> Option<ProxyId> {
        *self.active.lock()
    }

    pub fn is_initialized(&self) -> bool {
        // Observing the pending promise records an answer that already arrived.
        let pending = self.init.lock().pending.as_ref().map(|p| p.promise.clone());
        if let Some(pending) = pending {
            pending.try_result();
        }
        self.init.lock().initialized
    }

    pub fn has_decoder(&self) -> bool {
        self.decoder.lock().is_some()
    }

    /// Number of proxies issued and not yet released.
    pub fn proxy_count(&self) -> usize {
        self.live_proxies.load(Ordering::Acquire)
    }

    /// Config the current decoder was created with.
    pub fn decoder_config(&self) -> Option<DecoderConfig> {
        self.decoder_config.lock().clone()
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn router_stats(&self) -> RouterStats {
        self.router.stats()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }
}

impl Drop for SharedDecoderManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}
