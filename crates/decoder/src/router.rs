//! Event router — the only callback the shared decoder ever reports to.
//!
//! Every event the decoder emits is forwarded to the sink of the proxy that
//! is currently active, or dropped when no proxy is. The one exception is a
//! drain completion that answers the manager's own hand-off drain: that one
//! is absorbed here and wakes the waiting hand-off instead.
//!
//! The hand-off arms the router *before* it issues the drain request,
//! because a decoder may report drain completion synchronously from inside
//! `drain()`. The wait therefore tolerates the signal having already arrived.
//!
//! The router counts internal drains that have been requested and not yet
//! answered. A hand-off that stops waiting after a timeout leaves its drain
//! counted, so the late completion is still absorbed instead of reaching the
//! next consumer. Decoders answer drains in request order, so completions
//! are matched against the count first-in first-out.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex, RwLock};
use tracing::{debug, trace};

use ds_common::{DecodeError, DecodedFrame, DecoderCallback, ProxyId};

/// Counters of what happened to routed events.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct RouterStats {
    /// Events delivered to an active proxy's sink.
    pub forwarded: u64,
    /// Events dropped because no proxy was active.
    pub dropped: u64,
    /// Drain completions consumed by a hand-off.
    pub absorbed: u64,
}

struct ActiveSink {
    proxy: ProxyId,
    sink: Arc<dyn DecoderCallback>,
}

/// Forwards decoder events to the active proxy's sink.
pub struct EventRouter {
    active: RwLock<Option<ActiveSink>>,
    /// Internal drains requested and not yet answered.
    internal_drains: Mutex<u32>,
    drained: Condvar,
    forwarded: AtomicU64,
    dropped: AtomicU64,
    absorbed: AtomicU64,
}

impl EventRouter {
    pub fn new() -> Self {
        Self {
            active: RwLock::new(None),
            internal_drains: Mutex::new(0),
            drained: Condvar::new(),
            forwarded: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            absorbed: AtomicU64::new(0),
        }
    }

    /// Route all further events to `sink`.
    pub fn bind(&self, proxy: ProxyId, sink: Arc<dyn DecoderCallback>) {
        *self.active.write() = Some(ActiveSink { proxy, sink });
    }

    /// Stop routing events; returns the proxy that was bound.
    pub fn unbind(&self) -> Option<ProxyId> {
        self.active.write().take().map(|a| a.proxy)
    }

    pub fn bound_proxy(&self) -> Option<ProxyId> {
        self.active.read().as_ref().map(|a| a.proxy)
    }

    /// Count one internal drain that is about to be requested.
    pub(crate) fn arm_internal_drain(&self) {
        *self.internal_drains.lock() += 1;
    }

    /// Forget the most recent internal drain, whose request never reached
    /// the decoder. Returns whether one was outstanding.
    pub(crate) fn disarm_internal_drain(&self) -> bool {
        let mut pending = self.internal_drains.lock();
        if *pending == 0 {
            return false;
        }
        *pending -= 1;
        true
    }

    /// Forget every outstanding internal drain. Used once the decoder that
    /// owed the answers is gone.
    pub(crate) fn reset_internal_drains(&self) {
        let mut pending = self.internal_drains.lock();
        if *pending > 0 {
            debug!(outstanding = *pending, "Discarding unanswered internal drains");
            *pending = 0;
            self.drained.notify_all();
        }
    }

    pub fn is_internal_drain_pending(&self) -> bool {
        self.outstanding_internal_drains() > 0
    }

    pub fn outstanding_internal_drains(&self) -> u32 {
        *self.internal_drains.lock()
    }

    /// Block until every outstanding internal drain has completed.
    ///
    /// Returns `false` if `timeout` elapsed first; the drains stay counted.
    pub(crate) fn wait_internal_drain(&self, timeout: Option<Duration>) -> bool {
        let mut pending = self.internal_drains.lock();
        match timeout {
            None => {
                while *pending > 0 {
                    self.drained.wait(&mut pending);
                }
                true
            }
            Some(timeout) => {
                // wait_while_for re-checks the predicate, so spurious wakeups are handled.
                let _ = self
                    .drained
                    .wait_while_for(&mut pending, |pending| *pending > 0, timeout);
                *pending == 0
            }
        }
    }

    pub fn stats(&self) -> RouterStats {
        RouterStats {
            forwarded: self.forwarded.load(Ordering::Acquire),
            dropped: self.dropped.load(Ordering::Acquire),
            absorbed: self.absorbed.load(Ordering::Acquire),
        }
    }

    fn forward(&self, event: &'static str, deliver: impl FnOnce(&dyn DecoderCallback)) {
        // Clone the sink out so no lock is held while the consumer runs.
        let target = self
            .active
            .read()
            .as_ref()
            .map(|a| (a.proxy, Arc::clone(&a.sink)));

        match target {
            Some((proxy, sink)) => {
                trace!(%proxy, event, "Forwarding decoder event");
                self.forwarded.fetch_add(1, Ordering::AcqRel);
                deliver(sink.as_ref());
            }
            None => {
                debug!(event, "No active proxy; dropping decoder event");
                self.dropped.fetch_add(1, Ordering::AcqRel);
            }
        }
    }
}

impl Default for EventRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl DecoderCallback for EventRouter {
    fn on_output(&self, frame: DecodedFrame) {
        self.forward("output", move |sink| sink.on_output(frame));
    }

    fn on_error(&self, error: DecodeError) {
        self.forward("error", move |sink| sink.on_error(error));
    }

    fn on_input_exhausted(&self) {
        self.forward("input_exhausted", |sink| sink.on_input_exhausted());
    }

    fn on_drain_complete(&self) {
        {
            let mut pending = self.internal_drains.lock();
            if *pending > 0 {
                *pending -= 1;
                self.absorbed.fetch_add(1, Ordering::AcqRel);
                self.drained.notify_all();
                debug!(outstanding = *pending, "Internal drain complete");
                return;
            }
        }
        self.forward("drain_complete", |sink| sink.on_drain_complete());
    }

    fn on_release_media_resources(&self) {
        self.forward("release_media_resources", |sink| {
            sink.on_release_media_resources()
        });
    }
}

impl fmt::Debug for EventRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventRouter")
            .field("bound_proxy", &self.bound_proxy())
            .field("internal_drains", &self.outstanding_internal_drains())
            .field("stats", &self.stats())
            .finish()
    }
}
