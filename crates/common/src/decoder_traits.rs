//! Decoder abstraction traits.
//!
//! These traits define the contract between the shared decoder manager and
//! concrete decoder backends. The manager, its proxies and every backend
//! program against these traits, never against a concrete implementation.

use std::sync::Arc;

use crate::config::DecoderConfig;
use crate::error::DecodeError;
use crate::packet::{DecodedFrame, MediaSample};
use crate::promise::InitPromise;
use crate::task_queue::TaskQueue;

/// A stateful media decoder.
///
/// `input`, `flush` and `drain` return once the request is accepted; their
/// effects are reported later through the [`DecoderCallback`] the decoder was
/// created with. Implementations may report synchronously, before the call
/// returns, so callers must be ready for that.
pub trait MediaDataDecoder: Send {
    /// Start asynchronous initialization. The promise resolves with the
    /// track type the decoder produces.
    fn init(&mut self) -> InitPromise;

    /// Submit one encoded sample.
    fn input(&mut self, sample: MediaSample) -> Result<(), DecodeError>;

    /// Discard all queued input and pending output.
    fn flush(&mut self) -> Result<(), DecodeError>;

    /// Emit every pending output, then signal `on_drain_complete`.
    fn drain(&mut self) -> Result<(), DecodeError>;

    /// Release the decoder's resources. No events follow a shutdown.
    fn shutdown(&mut self) -> Result<(), DecodeError>;

    /// Whether decoding runs on dedicated hardware.
    fn is_hardware_accelerated(&self) -> bool;

    /// Why hardware acceleration is not in use, if known.
    fn software_fallback_reason(&self) -> Option<String> {
        None
    }
}

/// Receives a decoder's asynchronous events.
pub trait DecoderCallback: Send + Sync {
    fn on_output(&self, frame: DecodedFrame);

    fn on_error(&self, error: DecodeError);

    /// The decoder wants more input.
    fn on_input_exhausted(&self);

    /// Every output belonging to a requested drain has been emitted.
    fn on_drain_complete(&self);

    /// The platform asked the decoder to give up its media resources.
    fn on_release_media_resources(&self);
}

/// Factory producing decoders for a configuration.
pub trait PlatformDecoderModule: Send + Sync {
    /// Create a decoder that runs on `queue` and reports to `callback`.
    fn create_decoder(
        &self,
        config: &DecoderConfig,
        queue: TaskQueue,
        callback: Arc<dyn DecoderCallback>,
    ) -> Result<Box<dyn MediaDataDecoder>, DecodeError>;

    /// Whether this module can produce a decoder for `config` at all.
    fn supports(&self, _config: &DecoderConfig) -> bool {
        true
    }
}
