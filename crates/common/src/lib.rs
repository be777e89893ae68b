//! `ds-common` — Shared types, traits, and errors for the shared decoder.
//!
//! This crate is the foundation the decoder crate builds on.
//! It defines the core abstractions:
//!
//! - **Types**: `TimeCode`, `Resolution`, `ProxyId` (newtypes for safety)
//! - **Decoder Traits**: `MediaDataDecoder`, `DecoderCallback`, `PlatformDecoderModule`
//! - **Packets**: `MediaSample`, `DecodedFrame` (data flow types)
//! - **Concurrency**: `TaskQueue` (ordered worker), `Promise` (settle-once result)
//! - **Errors**: `DecodeError`, `InitError` (thiserror-based)
//! - **Config**: `ManagerConfig`, `DecoderConfig`

pub mod codec;
pub mod config;
pub mod decoder_traits;
pub mod error;
pub mod packet;
pub mod promise;
pub mod task_queue;
pub mod types;

// Re-export commonly used items at crate root
pub use codec::{TrackType, VideoCodec};
pub use config::{ConfigPolicy, DecoderConfig, ManagerConfig};
pub use decoder_traits::{DecoderCallback, MediaDataDecoder, PlatformDecoderModule};
pub use error::{DecodeError, DecodeResult, InitError};
pub use packet::{DecodedFrame, MediaSample};
pub use promise::{InitPromise, Promise, Resolver, Subscription};
pub use task_queue::TaskQueue;
pub use types::{ProxyId, Resolution, TimeCode};
