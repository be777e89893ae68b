//! Codec and track type enums.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Video codec identifier.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VideoCodec {
    H264,
    H265,
    Vp9,
    Av1,
}

impl VideoCodec {
    /// Human-readable codec name (for display/logging).
    pub fn display_name(self) -> &'static str {
        match self {
            Self::H264 => "H.264/AVC",
            Self::H265 => "H.265/HEVC",
            Self::Vp9 => "VP9",
            Self::Av1 => "AV1",
        }
    }
}

/// Kind of track a decoder produces output for.
///
/// Reported by a decoder once its asynchronous init has completed.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrackType {
    #[default]
    Video,
    Audio,
    Text,
}

impl fmt::Display for TrackType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Text => "text",
        };
        f.write_str(name)
    }
}
