//! Software passthrough decoder.
//!
//! This module provides a decoder backend that performs no bitstream work:
//! every input sample becomes a [`DecodedFrame`] carrying the same bytes and
//! timestamps. It is useful wherever a real decoder is unavailable, and as a
//! reference for how a backend is expected to behave behind the manager.
//!
//! # Pipeline
//!
//! Frames pass through a presentation-order reorder buffer holding up to
//! `max_display_delay` frames, the way a real decoder holds back output until
//! B-frame reordering is settled:
//!
//! - `input` inserts a frame and emits the earliest ones once the buffer
//!   exceeds the delay, then asks for more input
//! - `drain` emits everything buffered, then signals drain completion
//! - `flush` discards queued work and the buffer
//!
//! All work runs on the [`TaskQueue`] the decoder was created with, so every
//! event is delivered from that queue's worker thread.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use ds_common::{
    DecodeError, DecodedFrame, DecoderCallback, DecoderConfig, InitError, InitPromise,
    MediaDataDecoder, MediaSample, PlatformDecoderModule, Resolver, TaskQueue, TrackType,
};

const FALLBACK_REASON: &str = "passthrough decoder performs no hardware decoding";

/// Factory for [`PassthroughDecoder`]s.
#[derive(Debug, Default)]
pub struct PassthroughModule {
    create_failure: Option<String>,
    init_failure: Option<String>,
    created: AtomicUsize,
}

impl PassthroughModule {
    pub fn new() -> Self {
        Self::default()
    }

    /// A module whose decoder creation always fails with `reason`.
    pub fn failing_create(reason: impl Into<String>) -> Self {
        Self {
            create_failure: Some(reason.into()),
            ..Self::default()
        }
    }

    /// A module whose decoders reject `init` with `reason`.
    pub fn failing_init(reason: impl Into<String>) -> Self {
        Self {
            init_failure: Some(reason.into()),
            ..Self::default()
        }
    }

    /// Number of decoders this module has produced.
    pub fn created_count(&self) -> usize {
        self.created.load(Ordering::Acquire)
    }
}

impl PlatformDecoderModule for PassthroughModule {
    fn create_decoder(
        &self,
        config: &DecoderConfig,
        queue: TaskQueue,
        callback: Arc<dyn DecoderCallback>,
    ) -> Result<Box<dyn MediaDataDecoder>, DecodeError> {
        if let Some(reason) = &self.create_failure {
            return Err(DecodeError::CreateFailed {
                codec: config.codec,
                reason: reason.clone(),
            });
        }
        self.created.fetch_add(1, Ordering::AcqRel);
        Ok(Box::new(PassthroughDecoder::new(
            config,
            queue,
            callback,
            self.init_failure.clone(),
        )))
    }
}

type InitOutcome = Result<TrackType, InitError>;

#[derive(Default)]
struct Pipeline {
    /// Held frames, sorted by presentation time.
    reorder: Vec<DecodedFrame>,
    /// Init that has been requested but not yet settled.
    pending_init: Option<(Resolver<TrackType, InitError>, InitOutcome)>,
    shut_down: bool,
}

impl Pipeline {
    fn insert(&mut self, frame: DecodedFrame) {
        let at = self.reorder.partition_point(|f| f.pts <= frame.pts);
        self.reorder.insert(at, frame);
    }

    /// Frames that no longer fit in a buffer of `delay` frames.
    fn take_ready(&mut self, delay: usize) -> Vec<DecodedFrame> {
        let excess = self.reorder.len().saturating_sub(delay);
        self.reorder.drain(..excess).collect()
    }
}

/// Settle a taken init outside the pipeline lock.
fn settle_init(pending: Option<(Resolver<TrackType, InitError>, InitOutcome)>) {
    if let Some((resolver, outcome)) = pending {
        resolver.settle(outcome);
    }
}

/// Decoder that hands samples back as frames, in presentation order.
pub struct PassthroughDecoder {
    config: DecoderConfig,
    queue: TaskQueue,
    callback: Arc<dyn DecoderCallback>,
    init_failure: Option<String>,
    pipeline: Arc<Mutex<Pipeline>>,
}

impl PassthroughDecoder {
    pub fn new(
        config: &DecoderConfig,
        queue: TaskQueue,
        callback: Arc<dyn DecoderCallback>,
        init_failure: Option<String>,
    ) -> Self {
        debug!(config = %config, queue = queue.name(), "Created passthrough decoder");
        Self {
            config: config.clone(),
            queue,
            callback,
            init_failure,
            pipeline: Arc::new(Mutex::new(Pipeline::default())),
        }
    }

    /// Number of frames currently held back.
    pub fn buffered(&self) -> usize {
        self.pipeline.lock().reorder.len()
    }

    fn ensure_running(&self, op: &'static str) -> Result<(), DecodeError> {
        if self.pipeline.lock().shut_down {
            return Err(DecodeError::operation(op, "decoder is shut down"));
        }
        Ok(())
    }
}

impl MediaDataDecoder for PassthroughDecoder {
    fn init(&mut self) -> InitPromise {
        let outcome = match &self.init_failure {
            Some(reason) => Err(InitError::Failed(reason.clone())),
            None => Ok(self.config.track_type),
        };
        let (resolver, promise) = InitPromise::pending();
        self.pipeline.lock().pending_init = Some((resolver, outcome));

        let pipeline = Arc::clone(&self.pipeline);
        let scheduled = self.queue.dispatch(move || {
            let pending = pipeline.lock().pending_init.take();
            settle_init(pending);
        });
        if let Err(e) = scheduled {
            warn!(error = %e, "Passthrough init could not be scheduled");
            self.pipeline.lock().pending_init = None;
            return InitPromise::rejected(InitError::Failed(e.to_string()));
        }
        promise
    }

    fn input(&mut self, sample: MediaSample) -> Result<(), DecodeError> {
        self.ensure_running("input")?;
        let pipeline = Arc::clone(&self.pipeline);
        let callback = Arc::clone(&self.callback);
        let delay = self.config.max_display_delay as usize;

        self.queue.dispatch(move || {
            if sample.data.is_empty() {
                callback.on_error(DecodeError::operation("input", "empty sample"));
                return;
            }
            let ready = {
                let mut pipeline = pipeline.lock();
                if pipeline.shut_down {
                    return;
                }
                pipeline.insert(sample.into());
                pipeline.take_ready(delay)
            };
            for frame in ready {
                trace!(pts = %frame.pts, "Passthrough output");
                callback.on_output(frame);
            }
            callback.on_input_exhausted();
        })
    }

    fn flush(&mut self) -> Result<(), DecodeError> {
        self.ensure_running("flush")?;
        self.queue.flush();
        self.queue.await_idle()?;

        let (discarded, pending) = {
            let mut pipeline = self.pipeline.lock();
            let discarded = pipeline.reorder.len();
            pipeline.reorder.clear();
            (discarded, pipeline.pending_init.take())
        };
        // The flush may have discarded the scheduled init; its outcome is known.
        settle_init(pending);
        debug!(discarded, "Passthrough decoder flushed");
        Ok(())
    }

    fn drain(&mut self) -> Result<(), DecodeError> {
        self.ensure_running("drain")?;
        let pipeline = Arc::clone(&self.pipeline);
        let callback = Arc::clone(&self.callback);

        self.queue.dispatch(move || {
            let frames = {
                let mut pipeline = pipeline.lock();
                if pipeline.shut_down {
                    return;
                }
                std::mem::take(&mut pipeline.reorder)
            };
            for frame in frames {
                callback.on_output(frame);
            }
            callback.on_drain_complete();
        })
    }

    fn shutdown(&mut self) -> Result<(), DecodeError> {
        let pending = {
            let mut pipeline = self.pipeline.lock();
            if pipeline.shut_down {
                return Ok(());
            }
            pipeline.shut_down = true;
            pipeline.reorder.clear();
            pipeline.pending_init.take()
        };
        if let Some((resolver, _)) = pending {
            resolver.reject(InitError::Canceled);
        }
        self.queue.flush();
        debug!("Passthrough decoder shut down");
        Ok(())
    }

    fn is_hardware_accelerated(&self) -> bool {
        false
    }

    fn software_fallback_reason(&self) -> Option<String> {
        Some(FALLBACK_REASON.to_string())
    }
}
