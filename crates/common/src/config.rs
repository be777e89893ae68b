//! Configuration structs for decoders and the shared decoder manager.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::codec::{TrackType, VideoCodec};
use crate::types::Resolution;

/// How a manager treats a new consumer whose config differs from the
/// config the shared decoder was created with.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigPolicy {
    /// Multiplex every consumer onto the existing decoder unchecked.
    #[default]
    Permissive,
    /// Refuse consumers whose config is not compatible with the decoder's.
    RequireMatching,
}

/// Shared decoder manager configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Name of the worker thread that runs all decoder work.
    pub queue_name: String,
    /// Upper bound for the hand-off wait on drain completion (None = wait forever).
    pub drain_timeout_ms: Option<u64>,
    pub config_policy: ConfigPolicy,
}

impl ManagerConfig {
    pub fn drain_timeout(&self) -> Option<Duration> {
        self.drain_timeout_ms.map(Duration::from_millis)
    }
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            queue_name: "shared-decoder".to_string(),
            drain_timeout_ms: None,
            config_policy: ConfigPolicy::Permissive,
        }
    }
}

/// Decoder configuration, handed to a `PlatformDecoderModule`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecoderConfig {
    pub codec: VideoCodec,
    pub track_type: TrackType,
    pub resolution: Resolution,
    /// Codec-specific data (SPS/PPS for H.264, etc.).
    pub extra_data: Vec<u8>,
    /// Maximum display delay (frame reordering depth).
    pub max_display_delay: u32,
}

impl DecoderConfig {
    pub fn new(codec: VideoCodec, resolution: Resolution) -> Self {
        Self {
            codec,
            track_type: TrackType::Video,
            resolution,
            extra_data: Vec::new(),
            max_display_delay: 4,
        }
    }

    pub fn with_max_display_delay(mut self, delay: u32) -> Self {
        self.max_display_delay = delay;
        self
    }

    /// Whether a decoder created for `self` can serve a consumer asking for `other`.
    ///
    /// Codec-specific data and reorder depth are not compared.
    pub fn is_compatible_with(&self, other: &DecoderConfig) -> bool {
        self.codec == other.codec
            && self.track_type == other.track_type
            && self.resolution == other.resolution
    }
}

impl fmt::Display for DecoderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {}",
            self.codec.display_name(),
            self.track_type,
            self.resolution
        )
    }
}
