use crate::error::{Result, RtspError};

/// First byte of an interleaved binary frame on the RTSP connection
/// (RFC 2326 §10.12).
pub const INTERLEAVED_MAGIC: u8 = b'$';

/// Size of the RTP fixed header without CSRCs.
pub const RTP_HEADER_LEN: usize = 12;

/// `$ <channel:u8> <length:u16 BE>` prefix of an interleaved frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterleavedHeader {
    pub channel: u8,
    pub length: u16,
}

impl InterleavedHeader {
    pub const LEN: usize = 4;

    /// Parse the 4-byte prefix. Returns `None` unless it starts with `$`.
    pub fn parse(bytes: [u8; 4]) -> Option<Self> {
        if bytes[0] != INTERLEAVED_MAGIC {
            return None;
        }
        Some(Self {
            channel: bytes[1],
            length: u16::from_be_bytes([bytes[2], bytes[3]]),
        })
    }

    /// Even channels carry RTP, odd channels RTCP.
    pub fn is_rtp(&self) -> bool {
        self.channel % 2 == 0
    }

    /// Track tag owning this channel pair.
    pub fn tag(&self) -> u32 {
        self.channel as u32 / 2
    }
}

/// A parsed RTP packet borrowing its payload from the receive buffer.
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |V=2|P|X|  CC   |M|     PT      |       Sequence Number         |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                           Timestamp                           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                             SSRC                              |
/// +=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+
/// |                    CSRC list (CC × 32 bits)                   |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// CSRCs and a header extension (X bit) are skipped; trailing padding
/// (P bit) is removed from the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtpPacket<'a> {
    pub marker: bool,
    pub payload_type: u8,
    pub sequence: u16,
    pub timestamp: u32,
    pub ssrc: u32,
    pub payload: &'a [u8],
}

impl<'a> RtpPacket<'a> {
    /// Parse a complete RTP packet (RFC 3550 §5.1).
    pub fn parse(packet: &'a [u8]) -> Result<Self> {
        if packet.len() < RTP_HEADER_LEN {
            return Err(malformed(format!("{} bytes is shorter than the RTP header", packet.len())));
        }

        let version = packet[0] >> 6;
        if version != 2 {
            return Err(malformed(format!("RTP version {}", version)));
        }
        let padding = packet[0] & 0x20 != 0;
        let extension = packet[0] & 0x10 != 0;
        let csrc_count = (packet[0] & 0x0F) as usize;

        let marker = packet[1] & 0x80 != 0;
        let payload_type = packet[1] & 0x7F;
        let sequence = u16::from_be_bytes([packet[2], packet[3]]);
        let timestamp = u32::from_be_bytes([packet[4], packet[5], packet[6], packet[7]]);
        let ssrc = u32::from_be_bytes([packet[8], packet[9], packet[10], packet[11]]);

        let mut start = RTP_HEADER_LEN + csrc_count * 4;
        if extension {
            // 16-bit profile id, 16-bit length in 32-bit words (§5.3.1)
            let ext = packet
                .get(start..start + 4)
                .ok_or_else(|| malformed("truncated header extension".into()))?;
            let words = u16::from_be_bytes([ext[2], ext[3]]) as usize;
            start += 4 + words * 4;
        }

        let mut end = packet.len();
        if padding {
            let pad = packet[end - 1] as usize;
            end = end.saturating_sub(pad);
        }
        if start > end {
            return Err(malformed("header overruns packet".into()));
        }

        Ok(Self {
            marker,
            payload_type,
            sequence,
            timestamp,
            ssrc,
            payload: &packet[start..end],
        })
    }
}

fn malformed(reason: String) -> RtspError {
    RtspError::UnsupportedSample(format!("malformed RTP packet: {}", reason))
}
