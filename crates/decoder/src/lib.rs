//! `ds-decoder` — One stateful decoder shared among many consumers.
//!
//! Hardware decoders are expensive; a player with several tracks or streams
//! often cannot afford one per consumer. This crate lets every consumer hold
//! its own decoder-shaped handle while a single real decoder does the work.
//!
//! # Architecture
//!
//! ```text
//! consumer A ─ SharedDecoderProxy ─┐
//! consumer B ─ SharedDecoderProxy ─┼─> SharedDecoderManager ─> decoder (TaskQueue)
//! consumer C ─ SharedDecoderProxy ─┘            │                   │
//!                                               │                 events
//!                                               v                   v
//!                                      active proxy ────── EventRouter ─> active sink
//! ```
//!
//! Only one proxy is active at a time. Feeding work to an inactive proxy
//! hands the decoder off: the previous proxy's pipeline is drained and
//! flushed before the new one may drive it, and the router forwards every
//! decoder event to the active proxy's sink alone.
//!
//! ## Module Overview
//!
//! - [`manager`] — `SharedDecoderManager`: owns the decoder, selection, init, hand-off
//! - [`proxy`] — `SharedDecoderProxy`: per-consumer `MediaDataDecoder`
//! - [`router`] — `EventRouter`: forwards events, absorbs hand-off drain completion
//! - [`passthrough`] — `PassthroughDecoder`: software backend with a reorder buffer
//!
//! ## Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use ds_common::{DecoderConfig, ManagerConfig, MediaDataDecoder, Resolution, VideoCodec};
//! use ds_decoder::{PassthroughModule, SharedDecoderManager};
//!
//! let manager = SharedDecoderManager::new(ManagerConfig::default())?;
//! let module = Arc::new(PassthroughModule::new());
//! let config = DecoderConfig::new(VideoCodec::H264, Resolution::HD);
//!
//! let mut track_a = manager.create_decoder(module.clone(), &config, sink_a)?;
//! let mut track_b = manager.create_decoder(module, &config, sink_b)?;
//!
//! let track = track_a.init().wait()?;   // real init
//! track_b.init().wait()?;               // hand-off only, same track type
//! // Feed samples from the demuxer...
//! manager.shutdown();
//! ```

pub mod manager;
pub mod passthrough;
pub mod proxy;
pub mod router;

#[cfg(test)]
mod testing;

// Re-export primary types at crate root for convenience
pub use manager::SharedDecoderManager;
pub use passthrough::{PassthroughDecoder, PassthroughModule};
pub use proxy::SharedDecoderProxy;
pub use router::{EventRouter, RouterStats};
