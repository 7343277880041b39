//! SDP (Session Description Protocol) parsing (RFC 4566 / RFC 8866).
//!
//! Turns the body of a DESCRIBE response into [`Tracks`]. Only the lines
//! that matter for receiving media are interpreted:
//!
//! ```text
//! s=<session-name>                        ← title (session-level default)
//! m=video 0 RTP/AVP 96                    ← opens a track; 4th token = payload type
//! i=<media title>                         ← description
//! a=rtpmap:96 H264/90000                  ← codec (lower-cased) and clock rate
//! a=fmtp:96 packetization-mode=1;sprop-parameter-sets=Z0IAKeKQ...,aM4xsg==
//! a=control:trackID=1                     ← finalizes the track
//! ```
//!
//! Each recognized `m=` line starts a new [`TrackBuilder`] and takes the
//! next tag. `a=control` builds it and registers it; attributes after that
//! and before the next `m=` line are ignored. An `m=` line of an unknown
//! media type drops the current builder so its attributes do not leak into
//! the previous track.

use base64::Engine as _;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};

use crate::media::sps::parse_sps;
use crate::track::{TrackBuilder, TrackKind, Tracks};

/// Standard alphabet, padding optional: some cameras strip the `=`.
const SPROP_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Parse an SDP body into tracks.
pub fn parse_tracks(sdp: &str) -> Tracks {
    let mut tracks = Tracks::new();
    let mut current: Option<TrackBuilder> = None;
    let mut session_title: Option<String> = None;
    let mut next_tag = 0u32;

    for line in sdp.lines() {
        let line = line.trim();
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };

        match key {
            "m" => {
                current = media_line(value, next_tag);
                if let Some(builder) = current.as_mut() {
                    next_tag += 1;
                    if let Some(title) = &session_title {
                        builder.set_title(title);
                    }
                } else {
                    tracing::debug!(media = value, "skipping unsupported media");
                }
            }
            "s" => match current.as_mut() {
                Some(builder) => builder.set_title(value),
                None => session_title = Some(value.to_string()),
            },
            "i" => {
                if let Some(builder) = current.as_mut() {
                    builder.set_description(value);
                }
            }
            "a" => {
                let Some(builder) = current.as_mut() else {
                    continue;
                };
                if let Some(control) = value.strip_prefix("control:") {
                    builder.set_id(control.trim());
                    if let Some(builder) = current.take() {
                        register(&mut tracks, builder);
                    }
                } else if let Some(rtpmap) = value.strip_prefix("rtpmap:") {
                    apply_rtpmap(builder, rtpmap);
                } else if let Some(fmtp) = value.strip_prefix("fmtp:") {
                    apply_fmtp(builder, fmtp);
                }
            }
            _ => {}
        }
    }

    if current.is_some() {
        tracing::debug!("last media section has no a=control, dropped");
    }

    tracing::debug!(count = tracks.len(), "tracks parsed from SDP");
    tracks
}

fn media_line(value: &str, tag: u32) -> Option<TrackBuilder> {
    let mut tokens = value.split_whitespace();
    let kind = TrackKind::from_media(tokens.next()?)?;
    let payload_type = tokens
        .nth(2)
        .and_then(|pt| pt.parse::<u8>().ok())
        .filter(|pt| *pt < 128);

    Some(
        TrackBuilder::new(kind)
            .payload_type(payload_type)
            .tag(tag),
    )
}

fn register(tracks: &mut Tracks, mut builder: TrackBuilder) {
    if builder.kind() == TrackKind::Video
        && let Ok(Some(sps)) = builder.csd().get(0)
    {
        let params = parse_sps(sps);
        if params.is_known() {
            builder.set_video_params(params);
        }
    }

    match builder.build() {
        Some(track) => {
            tracing::debug!(%track, "track registered");
            tracks.put(track);
        }
        None => tracing::warn!("media section without a control id, skipped"),
    }
}

/// `a=rtpmap:<pt> <codec>/<clock>[/<channels>]`
fn apply_rtpmap(builder: &mut TrackBuilder, value: &str) {
    let Some((pt, encoding)) = value.trim().split_once(' ') else {
        return;
    };
    if let (Ok(pt), Some(expected)) = (pt.parse::<u8>(), builder.current_payload_type())
        && pt != expected
    {
        tracing::trace!(pt, expected, "rtpmap for another payload type");
        return;
    }

    let mut parts = encoding.trim().split('/');
    let Some(codec) = parts.next().filter(|c| !c.is_empty()) else {
        return;
    };
    builder.set_format(codec);
    builder.set_clock_rate(parts.next().and_then(|r| r.trim().parse().ok()).unwrap_or(-1));

    if builder.kind() == TrackKind::Audio {
        let channels = parts
            .next()
            .and_then(|c| c.trim().parse().ok())
            .filter(|c| *c > 0)
            .unwrap_or(1);
        builder.set_channels(channels);
    }
}

/// `a=fmtp:<pt> <key>=<value>;<key>=<value>...`
fn apply_fmtp(builder: &mut TrackBuilder, value: &str) {
    let params = match value.trim().split_once(' ') {
        Some((_, params)) => params,
        None => return,
    };

    for pair in params.split(';') {
        let Some((key, value)) = pair.split_once('=') else {
            continue;
        };
        let key = key.trim();
        let value = value.trim();

        if key.eq_ignore_ascii_case("sprop-parameter-sets") {
            for (slot, set) in value.split(',').take(2).enumerate() {
                match SPROP_BASE64.decode(set.trim()) {
                    Ok(bytes) => {
                        // slots 0 and 1 always fit the default capacity
                        let _ = builder.csd_mut().set(slot, bytes);
                    }
                    Err(e) => tracing::warn!(slot, error = %e, "bad sprop-parameter-sets entry"),
                }
            }
        } else if key.eq_ignore_ascii_case("config") {
            match hex::decode(value) {
                Ok(bytes) => {
                    if let Err(e) = builder.csd_mut().set(0, bytes) {
                        tracing::debug!(error = %e, "fmtp config not stored");
                    }
                }
                Err(e) => tracing::warn!(error = %e, "bad fmtp config"),
            }
        } else if key.eq_ignore_ascii_case("mode") {
            builder.set_mode(value);
        } else if !key.is_empty() {
            builder.set_metadata(key, value);
        }
    }
}
