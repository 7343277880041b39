use std::time::Duration;

/// Lower bound for the keep-alive pacing timeout, also used when the
/// server gives none.
pub const MIN_SESSION_TIMEOUT_SECS: u64 = 15;
/// Upper bound for the keep-alive pacing timeout.
pub const MAX_SESSION_TIMEOUT_SECS: u64 = 60;

/// Value of the `Session` response header (RFC 2326 §12.37).
///
/// ```text
/// Session: 12345678;timeout=30
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionHeader {
    pub id: String,
    /// Server timeout in seconds; 0 when not announced.
    pub timeout_secs: u64,
}

impl SessionHeader {
    /// Parse `id[;timeout=N]`. Returns `None` for an empty id.
    pub fn parse(value: &str) -> Option<Self> {
        let mut parts = value.split(';');
        let id = parts.next()?.trim();
        if id.is_empty() {
            return None;
        }

        let mut timeout_secs = 0;
        for param in parts {
            if let Some((key, val)) = param.split_once('=')
                && key.trim().eq_ignore_ascii_case("timeout")
            {
                timeout_secs = val.trim().parse().unwrap_or(0);
            }
        }

        Some(Self {
            id: id.to_string(),
            timeout_secs,
        })
    }

    /// Timeout used to pace keep-alives, clamped to
    /// [`MIN_SESSION_TIMEOUT_SECS`]..=[`MAX_SESSION_TIMEOUT_SECS`].
    pub fn effective_timeout(&self) -> Duration {
        clamp_timeout(self.timeout_secs)
    }
}

/// Clamp a server timeout; 0 (unknown) becomes the minimum.
pub fn clamp_timeout(timeout_secs: u64) -> Duration {
    Duration::from_secs(timeout_secs.clamp(MIN_SESSION_TIMEOUT_SECS, MAX_SESSION_TIMEOUT_SECS))
}

/// Interleaved channel pair requested for a track (RFC 2326 §10.12).
///
/// A track with tag `t` uses channel `2t` for RTP and `2t + 1` for RTCP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interleaved {
    pub rtp: u8,
    pub rtcp: u8,
}

impl Interleaved {
    /// Channels for a track tag. `None` if the tag does not fit in a channel byte.
    pub fn for_tag(tag: u32) -> Option<Self> {
        let rtp = u8::try_from(tag.checked_mul(2)?).ok()?;
        let rtcp = rtp.checked_add(1)?;
        Some(Self { rtp, rtcp })
    }

    /// `Transport` header value for a SETUP request.
    pub fn transport_header(&self) -> String {
        format!("RTP/AVP/TCP;unicast;interleaved={}-{}", self.rtp, self.rtcp)
    }

    /// The `interleaved=` pair of a SETUP response `Transport` header.
    pub fn from_transport(value: &str) -> Option<Self> {
        let pair = value
            .split(';')
            .find_map(|p| p.trim().strip_prefix("interleaved="))?;
        let (rtp, rtcp) = match pair.split_once('-') {
            Some((a, b)) => (a.trim().parse().ok()?, b.trim().parse().ok()?),
            None => {
                let rtp: u8 = pair.trim().parse().ok()?;
                (rtp, rtp.checked_add(1)?)
            }
        };
        Some(Self { rtp, rtcp })
    }
}
