//! Per-consumer handle onto the shared decoder.
//!
//! A [`SharedDecoderProxy`] looks like an ordinary [`MediaDataDecoder`] to its
//! consumer. Feeding it work (`init` or `input`) makes it the active proxy,
//! which hands the real decoder off from whichever proxy held it before.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, trace};

use ds_common::{
    DecodeError, DecoderCallback, InitError, InitPromise, MediaDataDecoder, MediaSample, ProxyId,
};

use crate::manager::SharedDecoderManager;

pub struct SharedDecoderProxy {
    manager: Arc<SharedDecoderManager>,
    id: ProxyId,
    callback: Arc<dyn DecoderCallback>,
    released: bool,
}

impl SharedDecoderProxy {
    pub(crate) fn new(
        manager: Arc<SharedDecoderManager>,
        id: ProxyId,
        callback: Arc<dyn DecoderCallback>,
    ) -> Self {
        Self {
            manager,
            id,
            callback,
            released: false,
        }
    }

    pub fn id(&self) -> ProxyId {
        self.id
    }

    /// Whether this proxy currently drives the shared decoder.
    pub fn is_active(&self) -> bool {
        !self.released && self.manager.active_proxy() == Some(self.id)
    }

    pub fn manager(&self) -> &Arc<SharedDecoderManager> {
        &self.manager
    }

    fn select(&self) {
        self.manager.select(self.id, &self.callback);
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.manager.release_proxy(self.id);
    }
}

impl MediaDataDecoder for SharedDecoderProxy {
    fn init(&mut self) -> InitPromise {
        if self.released {
            return InitPromise::rejected(InitError::Canceled);
        }
        self.select();
        self.manager.init_decoder()
    }

    fn input(&mut self, sample: MediaSample) -> Result<(), DecodeError> {
        if self.released {
            return Err(DecodeError::ShutDown);
        }
        self.select();
        self.manager.input(sample)
    }

    /// Only the active proxy reaches the decoder; anyone else has nothing
    /// in flight to discard.
    fn flush(&mut self) -> Result<(), DecodeError> {
        if !self.is_active() {
            trace!(proxy = %self.id, "Flush on inactive proxy");
            return Ok(());
        }
        self.manager.flush()
    }

    /// An inactive proxy has no pending output, so its drain is complete
    /// immediately.
    fn drain(&mut self) -> Result<(), DecodeError> {
        if !self.is_active() {
            debug!(proxy = %self.id, "Drain on inactive proxy; completing immediately");
            self.callback.on_drain_complete();
            return Ok(());
        }
        self.manager.drain()
    }

    fn shutdown(&mut self) -> Result<(), DecodeError> {
        self.release();
        Ok(())
    }

    fn is_hardware_accelerated(&self) -> bool {
        self.manager.is_hardware_accelerated()
    }

    fn software_fallback_reason(&self) -> Option<String> {
        self.manager.software_fallback_reason()
    }
}

impl Drop for SharedDecoderProxy {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for SharedDecoderProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedDecoderProxy")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .field("released", &self.released)
            .finish()
    }
}
