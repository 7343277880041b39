//! Media tracks announced by the server's SDP.
//!
//! A [`Track`] carries the identity fields every stream has (control id,
//! RTP payload type, codec, clock rate, ordinal tag), its codec-specific
//! data, free-form `fmtp` metadata, and a per-kind payload:
//!
//! ```text
//! Track ─┬─ Video    { width, height, fps }   ← updated when an SPS is seen
//!        ├─ Audio    { channels, mode }
//!        └─ Subtitle
//! ```
//!
//! Tracks are built incrementally by [`TrackBuilder`] while scanning SDP
//! lines and become immutable once registered in [`Tracks`], except for the
//! video parameters. Those are published as one snapshot under a lock so a
//! reader never sees width from one SPS and height from another.

pub mod csd;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

pub use csd::Csd;

/// Sentinel for a numeric field that is not known yet.
pub const UNKNOWN: i32 = -1;

/// Media kind selected by the SDP `m=` line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Video,
    Audio,
    Subtitle,
}

impl TrackKind {
    /// Kind for an `m=` media token (`video`, `audio`, `text`/`application`).
    pub fn from_media(media: &str) -> Option<Self> {
        match media {
            "video" => Some(Self::Video),
            "audio" => Some(Self::Audio),
            "text" | "application" => Some(Self::Subtitle),
            _ => None,
        }
    }
}

/// Picture dimensions and frame rate; each field is [`UNKNOWN`] until learned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoParams {
    pub width: i32,
    pub height: i32,
    pub fps: i32,
}

impl VideoParams {
    pub const UNKNOWN: Self = Self {
        width: UNKNOWN,
        height: UNKNOWN,
        fps: UNKNOWN,
    };

    /// Overlay the known fields of `other` on top of `self`.
    pub fn merge(self, other: VideoParams) -> Self {
        let pick = |new: i32, old: i32| if new > 0 { new } else { old };
        Self {
            width: pick(other.width, self.width),
            height: pick(other.height, self.height),
            fps: pick(other.fps, self.fps),
        }
    }

    pub fn is_known(&self) -> bool {
        self.width > 0 && self.height > 0
    }
}

impl Default for VideoParams {
    fn default() -> Self {
        Self::UNKNOWN
    }
}

/// Audio-specific fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioInfo {
    pub channels: u32,
    /// `mode` fmtp parameter (e.g. `AAC-hbr`).
    pub mode: Option<String>,
}

/// Per-kind payload of a track.
#[derive(Debug)]
pub enum Media {
    Video(RwLock<VideoParams>),
    Audio(AudioInfo),
    Subtitle,
}

/// One media stream of the session.
#[derive(Debug)]
pub struct Track {
    id: String,
    payload_type: Option<u8>,
    format: String,
    clock_rate: i64,
    tag: u32,
    csd: Csd,
    metadata: HashMap<String, String>,
    title: Option<String>,
    description: Option<String>,
    media: Media,
}

impl Track {
    /// Control id from `a=control:`; unique within a [`Tracks`] collection.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn payload_type(&self) -> Option<u8> {
        self.payload_type
    }

    /// Lower-cased codec name from `a=rtpmap` (e.g. `h264`, `mpeg4-generic`).
    pub fn format(&self) -> &str {
        &self.format
    }

    /// RTP clock rate in Hz; `<= 0` means unknown.
    pub fn clock_rate(&self) -> i64 {
        self.clock_rate
    }

    /// Ordinal of the `m=` line; SETUP uses interleaved channels
    /// `(2 * tag, 2 * tag + 1)`.
    pub fn tag(&self) -> u32 {
        self.tag
    }

    pub fn csd(&self) -> &Csd {
        &self.csd
    }

    pub fn metadata(&self) -> &HashMap<String, String> {
        &self.metadata
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn media(&self) -> &Media {
        &self.media
    }

    pub fn kind(&self) -> TrackKind {
        match self.media {
            Media::Video(_) => TrackKind::Video,
            Media::Audio(_) => TrackKind::Audio,
            Media::Subtitle => TrackKind::Subtitle,
        }
    }

    /// Audio fields, if this is an audio track.
    pub fn audio(&self) -> Option<&AudioInfo> {
        match &self.media {
            Media::Audio(info) => Some(info),
            _ => None,
        }
    }

    /// Snapshot of the video parameters, if this is a video track.
    pub fn video_params(&self) -> Option<VideoParams> {
        match &self.media {
            Media::Video(params) => Some(*params.read()),
            _ => None,
        }
    }

    /// Publish new video parameters learned from an SPS.
    ///
    /// Unknown fields in `params` keep their previous value. Returns `false`
    /// for non-video tracks.
    pub fn update_video_params(&self, params: VideoParams) -> bool {
        match &self.media {
            Media::Video(current) => {
                let mut guard = current.write();
                let merged = guard.merge(params);
                if merged != *guard {
                    tracing::debug!(
                        track = %self.id,
                        width = merged.width,
                        height = merged.height,
                        fps = merged.fps,
                        "video parameters updated"
                    );
                    *guard = merged;
                }
                true
            }
            _ => false,
        }
    }

    /// Convert an RTP timestamp to milliseconds using the clock rate.
    ///
    /// With an unknown clock rate the raw value is passed through.
    pub fn normalize_timestamp(&self, rtp_timestamp: u32) -> i64 {
        self.normalize_extended(rtp_timestamp as i64)
    }

    /// Like [`normalize_timestamp`](Self::normalize_timestamp), for a
    /// timestamp already unwrapped by an [`RtpClock`].
    pub fn normalize_extended(&self, timestamp: i64) -> i64 {
        if self.clock_rate > 0 {
            timestamp.saturating_mul(1000) / self.clock_rate
        } else {
            timestamp
        }
    }
}

/// Unwraps the 32-bit RTP timestamps of one stream into a 64-bit timeline.
///
/// A backward step of more than half the 32-bit range is read as a wrap
/// and adds 2^32; smaller backward steps pass through unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct RtpClock {
    last: Option<u32>,
    cycles: i64,
}

impl RtpClock {
    const HALF_RANGE: u32 = 1 << 31;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, raw: u32) -> i64 {
        if let Some(last) = self.last {
            if raw < last && last - raw > Self::HALF_RANGE {
                self.cycles += 1;
            } else if raw > last && raw - last > Self::HALF_RANGE && self.cycles > 0 {
                // A packet from before the last wrap.
                return (self.cycles - 1) * (1i64 << 32) + raw as i64;
            }
        }
        self.last = Some(raw);
        self.cycles * (1i64 << 32) + raw as i64
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

impl fmt::Display for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} track {} (pt={}, {}/{}, tag={})",
            self.kind(),
            self.id,
            self.payload_type
                .map(|pt| pt.to_string())
                .unwrap_or_else(|| "?".into()),
            self.format,
            self.clock_rate,
            self.tag
        )
    }
}

/// Incremental [`Track`] construction while scanning SDP lines.
#[derive(Debug, Clone)]
pub struct TrackBuilder {
    kind: TrackKind,
    id: Option<String>,
    payload_type: Option<u8>,
    format: String,
    clock_rate: i64,
    tag: u32,
    csd: Csd,
    metadata: HashMap<String, String>,
    title: Option<String>,
    description: Option<String>,
    channels: u32,
    mode: Option<String>,
    video: VideoParams,
}

impl TrackBuilder {
    pub fn new(kind: TrackKind) -> Self {
        Self {
            kind,
            id: None,
            payload_type: None,
            format: String::new(),
            clock_rate: UNKNOWN as i64,
            tag: 0,
            csd: Csd::default(),
            metadata: HashMap::new(),
            title: None,
            description: None,
            channels: 1,
            mode: None,
            video: VideoParams::UNKNOWN,
        }
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn id(mut self, id: &str) -> Self {
        self.id = Some(id.to_string());
        self
    }

    pub fn set_id(&mut self, id: &str) {
        self.id = Some(id.to_string());
    }

    pub fn payload_type(mut self, pt: Option<u8>) -> Self {
        self.payload_type = pt;
        self
    }

    pub fn set_payload_type(&mut self, pt: Option<u8>) {
        self.payload_type = pt;
    }

    pub fn current_payload_type(&self) -> Option<u8> {
        self.payload_type
    }

    pub fn format(mut self, format: &str) -> Self {
        self.set_format(format);
        self
    }

    pub fn set_format(&mut self, format: &str) {
        self.format = format.to_ascii_lowercase();
    }

    pub fn clock_rate(mut self, clock_rate: i64) -> Self {
        self.clock_rate = clock_rate;
        self
    }

    pub fn set_clock_rate(&mut self, clock_rate: i64) {
        self.clock_rate = clock_rate;
    }

    pub fn tag(mut self, tag: u32) -> Self {
        self.tag = tag;
        self
    }

    pub fn set_tag(&mut self, tag: u32) {
        self.tag = tag;
    }

    pub fn set_channels(&mut self, channels: u32) {
        self.channels = channels;
    }

    pub fn set_mode(&mut self, mode: &str) {
        self.mode = Some(mode.to_string());
    }

    pub fn set_title(&mut self, title: &str) {
        self.title = Some(title.to_string());
    }

    pub fn set_description(&mut self, description: &str) {
        self.description = Some(description.to_string());
    }

    pub fn set_metadata(&mut self, key: &str, value: &str) {
        self.metadata.insert(key.to_string(), value.to_string());
    }

    pub fn csd(&self) -> &Csd {
        &self.csd
    }

    pub fn csd_mut(&mut self) -> &mut Csd {
        &mut self.csd
    }

    /// Seed the video parameters (e.g. from an out-of-band SPS).
    pub fn set_video_params(&mut self, params: VideoParams) {
        self.video = self.video.merge(params);
    }

    /// Finalize the track. Returns `None` when no control id was set.
    pub fn build(self) -> Option<Track> {
        let id = self.id?;

        let mut metadata = self.metadata;
        let mode = self.mode;
        let media = match self.kind {
            TrackKind::Audio => Media::Audio(AudioInfo {
                channels: self.channels,
                mode,
            }),
            kind => {
                if let Some(mode) = mode {
                    metadata.insert("mode".to_string(), mode);
                }
                match kind {
                    TrackKind::Video => Media::Video(RwLock::new(self.video)),
                    _ => Media::Subtitle,
                }
            }
        };

        Some(Track {
            id,
            payload_type: self.payload_type,
            format: self.format,
            clock_rate: self.clock_rate,
            tag: self.tag,
            csd: self.csd,
            metadata,
            title: self.title,
            description: self.description,
            media,
        })
    }
}

/// Tracks of one session, keyed by id.
///
/// Also remembers the most recently registered track of each kind so the
/// common "the video track" lookup is O(1).
#[derive(Debug, Default)]
pub struct Tracks {
    by_id: HashMap<String, Arc<Track>>,
    video: Option<Arc<Track>>,
    audio: Option<Arc<Track>>,
    subtitle: Option<Arc<Track>>,
}

impl Tracks {
    pub fn new() -> Self {
        Self::default()
    }

    fn latest_slot(&mut self, kind: TrackKind) -> &mut Option<Arc<Track>> {
        match kind {
            TrackKind::Video => &mut self.video,
            TrackKind::Audio => &mut self.audio,
            TrackKind::Subtitle => &mut self.subtitle,
        }
    }

    /// Register a track, replacing any track with the same id.
    pub fn put(&mut self, track: Track) -> Arc<Track> {
        let track = Arc::new(track);
        if let Some(previous) = self.by_id.insert(track.id.clone(), track.clone()) {
            tracing::debug!(id = %previous.id, "replacing track with duplicate id");
            let slot = self.latest_slot(previous.kind());
            if slot.as_ref().is_some_and(|t| Arc::ptr_eq(t, &previous)) {
                *slot = None;
            }
        }
        *self.latest_slot(track.kind()) = Some(track.clone());
        track
    }

    pub fn get(&self, id: &str) -> Option<Arc<Track>> {
        self.by_id.get(id).cloned()
    }

    pub fn get_by_payload_type(&self, pt: u8) -> Option<Arc<Track>> {
        self.by_id
            .values()
            .find(|t| t.payload_type == Some(pt))
            .cloned()
    }

    pub fn remove(&mut self, id: &str) -> Option<Arc<Track>> {
        let removed = self.by_id.remove(id)?;
        let slot = self.latest_slot(removed.kind());
        if slot.as_ref().is_some_and(|t| Arc::ptr_eq(t, &removed)) {
            *slot = None;
        }
        Some(removed)
    }

    /// Keep only the tracks for which `keep` returns true.
    pub fn retain(&mut self, mut keep: impl FnMut(&Track) -> bool) {
        let doomed: Vec<String> = self
            .by_id
            .values()
            .filter(|t| !keep(t))
            .map(|t| t.id.clone())
            .collect();
        for id in doomed {
            self.remove(&id);
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.by_id.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Track>> {
        self.by_id.values()
    }

    /// All tracks in ascending tag order (SETUP order).
    pub fn sorted_by_tag(&self) -> Vec<Arc<Track>> {
        let mut tracks: Vec<Arc<Track>> = self.by_id.values().cloned().collect();
        tracks.sort_by_key(|t| t.tag);
        tracks
    }

    pub fn video(&self) -> Option<Arc<Track>> {
        self.video.clone()
    }

    pub fn audio(&self) -> Option<Arc<Track>> {
        self.audio.clone()
    }

    pub fn subtitle(&self) -> Option<Arc<Track>> {
        self.subtitle.clone()
    }

    pub fn clear(&mut self) {
        self.by_id.clear();
        self.video = None;
        self.audio = None;
        self.subtitle = None;
    }
}
