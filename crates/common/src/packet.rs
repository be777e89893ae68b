//! Encoded samples (decoder input) and decoded frames (decoder output).

use crate::codec::TrackType;
use crate::types::TimeCode;

/// An encoded sample handed to a decoder, as produced by a demuxer.
#[derive(Clone, Debug, PartialEq)]
pub struct MediaSample {
    /// Compressed payload.
    pub data: Vec<u8>,
    /// Presentation timestamp.
    pub pts: TimeCode,
    /// Decode timestamp.
    pub dts: TimeCode,
    /// Whether this sample can be decoded without prior samples.
    pub is_keyframe: bool,
    /// Track the sample belongs to.
    pub track: TrackType,
}

impl MediaSample {
    /// Build a video sample whose decode and presentation times coincide.
    pub fn video(data: Vec<u8>, pts: TimeCode, is_keyframe: bool) -> Self {
        Self {
            data,
            pts,
            dts: pts,
            is_keyframe,
            track: TrackType::Video,
        }
    }
}

/// A decoded unit of media delivered through `DecoderCallback::on_output`.
#[derive(Clone, Debug, PartialEq)]
pub struct DecodedFrame {
    /// Decoded payload.
    pub data: Vec<u8>,
    /// Presentation timestamp.
    pub pts: TimeCode,
    /// Track the frame belongs to.
    pub track: TrackType,
    /// Whether the frame came from a keyframe sample.
    pub is_keyframe: bool,
}

impl DecodedFrame {
    pub fn byte_size(&self) -> usize {
        self.data.len()
    }
}

impl From<MediaSample> for DecodedFrame {
    fn from(sample: MediaSample) -> Self {
        Self {
            data: sample.data,
            pts: sample.pts,
            track: sample.track,
            is_keyframe: sample.is_keyframe,
        }
    }
}
