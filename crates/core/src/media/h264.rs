//! H.264 RTP depacketizer (RFC 6184).
//!
//! Rebuilds Annex-B NAL units from RTP payloads. Two packetization modes
//! are understood:
//!
//! - **Single NAL Unit** (§5.6): the payload is one whole NAL unit. It is
//!   emitted immediately with a 4-byte start code in front.
//!
//! - **FU-A Fragmentation** (§5.8): a NAL unit split over several
//!   packets, each carrying a 2-byte FU header:
//!
//!   ```text
//!   FU indicator:  [F|NRI|Type=28]     (1 byte)
//!   FU header:     [S|E|R|NAL_Type]    (1 byte)
//!   Fragment data: [...]
//!   ```
//!
//!   The original NAL header is `(indicator & 0xE0) | (fu_header & 0x1F)`.
//!   A Start fragment opens a run, Middles append to it, and the End
//!   fragment closes it and emits the frame. A Middle or End whose NAL
//!   type does not match the open run is dropped without touching the
//!   accumulated bytes.
//!
//! Aggregation packets (STAP-A/B, MTAP16/24) and FU-B are not supported;
//! they are logged and dropped.
//!
//! Frames are bounded by the capacity given at construction on both
//! paths; a frame that would exceed it fails with
//! [`RtspError::BufferOverflow`] and the open run is discarded.

use super::sps::parse_sps;
use super::{DEFAULT_MAX_FRAME_SIZE, Depacketizer, Frame, FrameType, Sample};
use crate::error::{Result, RtspError};

/// Annex-B start code written before every NAL unit.
pub const START_CODE: [u8; 4] = [0x00, 0x00, 0x00, 0x01];

pub const NAL_TYPE_IDR: u8 = 5;
pub const NAL_TYPE_SPS: u8 = 7;
pub const NAL_TYPE_PPS: u8 = 8;
pub const NAL_TYPE_STAP_A: u8 = 24;
pub const NAL_TYPE_STAP_B: u8 = 25;
pub const NAL_TYPE_MTAP16: u8 = 26;
pub const NAL_TYPE_MTAP24: u8 = 27;
pub const NAL_TYPE_FU_A: u8 = 28;
pub const NAL_TYPE_FU_B: u8 = 29;

const FU_START: u8 = 0x80;
const FU_END: u8 = 0x40;
const FU_MIDDLE: u8 = 0x00;

/// Classify a NAL unit type for the decoder.
pub fn frame_type_of(nal_type: u8) -> FrameType {
    match nal_type {
        NAL_TYPE_IDR => FrameType::Sync,
        NAL_TYPE_SPS | NAL_TYPE_PPS => FrameType::Config,
        _ => FrameType::NonSync,
    }
}

/// Reassembles RTP H.264 payloads of one track into Annex-B frames.
#[derive(Debug)]
pub struct H264Depacketizer {
    capacity: usize,
    /// Start code + NAL header + fragments of the open FU-A run.
    buf: Vec<u8>,
    /// NAL type of the open run; `None` between runs.
    fragment_type: Option<u8>,
}

impl H264Depacketizer {
    pub fn new(capacity: usize) -> Self {
        tracing::debug!(capacity, "H.264 depacketizer created");
        Self {
            capacity,
            buf: Vec::new(),
            fragment_type: None,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn ensure_room(&mut self, additional: usize) -> Result<()> {
        let required = self.buf.len() + additional;
        if required > self.capacity {
            self.reset();
            return Err(RtspError::BufferOverflow {
                capacity: self.capacity,
                required,
            });
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.buf.clear();
        self.fragment_type = None;
    }

    fn fu_a(&mut self, sample: &Sample) -> Result<Option<Frame>> {
        let payload = &sample.data;
        if payload.len() < 2 {
            return Err(RtspError::UnsupportedSample(format!(
                "FU-A payload of {} bytes has no FU header",
                payload.len()
            )));
        }

        let nal_header = (payload[0] & 0xE0) | (payload[1] & 0x1F);
        let nal_type = nal_header & 0x1F;
        let fragment = &payload[2..];

        match payload[1] & 0xC0 {
            FU_START => {
                self.reset();
                self.ensure_room(START_CODE.len() + 1 + fragment.len())?;
                self.buf.extend_from_slice(&START_CODE);
                self.buf.push(nal_header);
                self.buf.extend_from_slice(fragment);
                self.fragment_type = Some(nal_type);
                tracing::trace!(nal_type, len = fragment.len(), "FU-A start");
                Ok(None)
            }
            FU_MIDDLE => {
                if self.fragment_type != Some(nal_type) {
                    tracing::trace!(nal_type, open = ?self.fragment_type, "FU-A middle dropped");
                    return Ok(None);
                }
                self.ensure_room(fragment.len())?;
                self.buf.extend_from_slice(fragment);
                Ok(None)
            }
            FU_END => {
                if self.fragment_type != Some(nal_type) {
                    tracing::trace!(nal_type, open = ?self.fragment_type, "FU-A end dropped");
                    return Ok(None);
                }
                self.ensure_room(fragment.len())?;
                let mut nal = std::mem::take(&mut self.buf);
                nal.extend_from_slice(fragment);
                self.fragment_type = None;
                tracing::trace!(nal_type, len = nal.len(), "FU-A complete");
                Ok(Some(self.finish(sample, nal, nal_type)))
            }
            _ => {
                tracing::warn!(nal_type, "FU-A with both start and end bits, dropped");
                Ok(None)
            }
        }
    }

    fn single(&mut self, sample: &Sample, nal_type: u8) -> Result<Option<Frame>> {
        let required = START_CODE.len() + sample.data.len();
        if required > self.capacity {
            return Err(RtspError::BufferOverflow {
                capacity: self.capacity,
                required,
            });
        }
        let mut nal = Vec::with_capacity(required);
        nal.extend_from_slice(&START_CODE);
        nal.extend_from_slice(&sample.data);
        Ok(Some(self.finish(sample, nal, nal_type)))
    }

    fn finish(&self, sample: &Sample, nal: Vec<u8>, nal_type: u8) -> Frame {
        if nal_type == NAL_TYPE_SPS {
            let params = parse_sps(&nal);
            if params.is_known() {
                sample.track.update_video_params(params);
            }
        }
        Frame::new(
            Sample::new(nal, sample.timestamp, sample.track.clone()),
            frame_type_of(nal_type),
        )
    }
}

impl Default for H264Depacketizer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

impl Depacketizer for H264Depacketizer {
    fn depacketize(&mut self, sample: &Sample) -> Result<Option<Frame>> {
        let Some(&first) = sample.data.first() else {
            return Err(RtspError::UnsupportedSample("empty H.264 payload".into()));
        };

        match first & 0x1F {
            NAL_TYPE_FU_A => self.fu_a(sample),
            nal_type @ (NAL_TYPE_STAP_A
            | NAL_TYPE_STAP_B
            | NAL_TYPE_MTAP16
            | NAL_TYPE_MTAP24
            | NAL_TYPE_FU_B) => {
                tracing::warn!(nal_type, "unsupported H.264 packetization, dropped");
                Ok(None)
            }
            nal_type => self.single(sample, nal_type),
        }
    }

    fn buffered_len(&self) -> usize {
        self.buf.len()
    }

    fn clear(&mut self) {
        self.reset();
    }
}
