//! Media samples, frames, and RTP depacketization.
//!
//! The read loop turns every RTP packet into a [`Sample`]: the payload
//! bytes, the RTP timestamp normalized to milliseconds with the owning
//! track's clock rate, and a shared handle to that [`Track`]. A
//! [`Depacketizer`] then turns samples into decodable [`Frame`]s.
//!
//! ## Supported payload formats
//!
//! | Format | Module | RFC | Depacketizer |
//! |--------|--------|-----|--------------|
//! | H.264 | [`h264`] | [RFC 6184](https://tools.ietf.org/html/rfc6184) | Single NAL + FU-A |
//! | anything else | this module | | [`RawDepacketizer`], one frame per payload |
//!
//! Helpers for the H.264 bitstream live in [`bits`] (Exp-Golomb reader)
//! and [`sps`] (picture size and frame rate from a Sequence Parameter Set).

pub mod bits;
pub mod fps;
pub mod h264;
pub mod rtp;
pub mod sps;

use std::sync::Arc;

use crate::error::{Result, RtspError};
use crate::track::Track;

/// Default bound on one reassembled frame (2 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 2 * 1024 * 1024;

/// A span of media bytes with its presentation time.
#[derive(Debug, Clone)]
pub struct Sample {
    pub data: Vec<u8>,
    /// Milliseconds when the track's clock rate is known, raw RTP units otherwise.
    pub timestamp: i64,
    pub track: Arc<Track>,
}

impl Sample {
    pub fn new(data: Vec<u8>, timestamp: i64, track: Arc<Track>) -> Self {
        Self {
            data,
            timestamp,
            track,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Decoder-relevant classification of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameType {
    #[default]
    Unknown,
    NonSync,
    /// Decodable without prior frames (H.264 IDR).
    Sync,
    /// Parameter set (H.264 SPS/PPS).
    Config,
}

/// One decodable unit produced by a [`Depacketizer`].
#[derive(Debug, Clone)]
pub struct Frame {
    pub sample: Sample,
    pub frame_type: FrameType,
}

impl Frame {
    pub fn new(sample: Sample, frame_type: FrameType) -> Self {
        Self { sample, frame_type }
    }

    pub fn data(&self) -> &[u8] {
        &self.sample.data
    }

    pub fn timestamp(&self) -> i64 {
        self.sample.timestamp
    }

    pub fn track(&self) -> &Arc<Track> {
        &self.sample.track
    }

    pub fn is_sync(&self) -> bool {
        self.frame_type == FrameType::Sync
    }

    pub fn is_config(&self) -> bool {
        self.frame_type == FrameType::Config
    }
}

/// Turns RTP payloads of one track into frames.
///
/// An instance is owned by a single reader; reassembly state lives in
/// `&mut self`, so no internal locking is needed.
///
/// `depacketize` returns at most one frame per call. `Ok(None)` means the
/// payload was consumed without completing a frame (a fragment, or an
/// unsupported aggregation packet that was dropped).
pub trait Depacketizer: Send {
    fn depacketize(&mut self, sample: &Sample) -> Result<Option<Frame>>;

    /// Bytes currently held for an unfinished frame.
    fn buffered_len(&self) -> usize {
        0
    }

    /// Discard any partially reassembled frame.
    fn clear(&mut self) {}
}

/// Pass-through depacketizer: every payload is one [`FrameType::Unknown`]
/// frame, bounded by the same capacity as the H.264 path.
#[derive(Debug)]
pub struct RawDepacketizer {
    capacity: usize,
}

impl RawDepacketizer {
    pub fn new(capacity: usize) -> Self {
        Self { capacity }
    }
}

impl Default for RawDepacketizer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

impl Depacketizer for RawDepacketizer {
    fn depacketize(&mut self, sample: &Sample) -> Result<Option<Frame>> {
        if sample.data.len() > self.capacity {
            return Err(RtspError::BufferOverflow {
                capacity: self.capacity,
                required: sample.data.len(),
            });
        }
        Ok(Some(Frame::new(sample.clone(), FrameType::Unknown)))
    }
}

/// Pick a depacketizer for a track by its `rtpmap` codec name.
pub fn depacketizer_for(track: &Track, max_frame_size: usize) -> Box<dyn Depacketizer> {
    match track.format() {
        "h264" => Box::new(h264::H264Depacketizer::new(max_frame_size)),
        _ => Box::new(RawDepacketizer::new(max_frame_size)),
    }
}
