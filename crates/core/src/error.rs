//! Error types for the RTSP ingest library.

use std::fmt;
use std::io;

/// Errors that can occur while ingesting an RTSP stream.
///
/// Variants map to specific failure modes across the stack:
///
/// - **Handshake**: [`Protocol`](Self::Protocol), [`Auth`](Self::Auth),
///   [`MissingCredentials`](Self::MissingCredentials),
///   [`MissingSession`](Self::MissingSession), [`InvalidState`](Self::InvalidState).
/// - **Transport**: [`Io`](Self::Io), [`Timeout`](Self::Timeout),
///   [`Interrupted`](Self::Interrupted).
/// - **Per packet**: [`UnsupportedSample`](Self::UnsupportedSample),
///   [`BufferOverflow`](Self::BufferOverflow). The read loop logs these and
///   keeps going.
/// - **Parsing**: [`Parse`](Self::Parse), [`Sdp`](Self::Sdp),
///   [`InvalidUri`](Self::InvalidUri).
#[derive(Debug, thiserror::Error)]
pub enum RtspError {
    /// Underlying I/O or socket error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A required handshake step answered with a non-200 status.
    #[error("RTSP {method} failed: {code} {message}")]
    Protocol {
        method: String,
        code: u16,
        message: String,
    },

    /// Authentication was rejected after the single retry, or the server
    /// asked for a scheme we cannot answer.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The server answered `401` and no username or password was set.
    #[error("{method} requires credentials but none are configured")]
    MissingCredentials { method: String },

    /// A transport read or handshake step did not complete in time.
    /// Not fatal for the read loop.
    #[error("operation timed out")]
    Timeout,

    /// Cooperative cancellation. Always terminates the read loop.
    #[error("interrupted")]
    Interrupted,

    /// Unrecognized or corrupted RTP payload / NAL unit.
    #[error("unsupported sample: {0}")]
    UnsupportedSample(String),

    /// Reassembly would exceed the depacketizer's configured capacity.
    #[error("buffer overflow: {required} bytes needed, capacity is {capacity}")]
    BufferOverflow { capacity: usize, required: usize },

    /// Failed to parse an RTSP response message (RFC 2326 §7).
    #[error("RTSP parse error: {kind}")]
    Parse { kind: ParseErrorKind },

    /// SETUP succeeded but no usable `Session` header came back.
    #[error("server did not return a session id")]
    MissingSession,

    /// A command was issued in a session state that does not allow it.
    #[error("{method} not allowed in state {state}")]
    InvalidState { method: String, state: String },

    /// Csd slot index outside `[0, capacity)`.
    #[error("csd index {index} out of bounds (capacity {capacity})")]
    CsdIndex { index: usize, capacity: usize },

    /// The DESCRIBE body could not be turned into tracks.
    #[error("SDP error: {0}")]
    Sdp(String),

    /// The stream URI could not be parsed.
    #[error("invalid URI: {0}")]
    InvalidUri(String),

    /// [`RtspExtractor::prepare`](crate::RtspExtractor::prepare) has not been called yet.
    #[error("extractor not prepared")]
    NotPrepared,

    /// [`RtspExtractor::prepare`](crate::RtspExtractor::prepare) was called twice.
    #[error("extractor already prepared")]
    AlreadyPrepared,

    /// The pacing buffer was destroyed and can no longer accept items.
    #[error("buffer destroyed")]
    Destroyed,
}

impl RtspError {
    /// Classify an error raised by a blocking transport read.
    ///
    /// Socket read timeouts surface as `WouldBlock` on Unix and `TimedOut`
    /// on Windows; both become [`Timeout`](Self::Timeout). An interrupted
    /// syscall becomes [`Interrupted`](Self::Interrupted), never a generic
    /// I/O error.
    pub fn from_read(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => Self::Timeout,
            io::ErrorKind::Interrupted => Self::Interrupted,
            _ => Self::Io(err),
        }
    }

    /// Whether the read loop should keep going after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::UnsupportedSample(_) | Self::BufferOverflow { .. }
        )
    }
}

/// Specific kind of RTSP parse failure.
#[derive(Debug)]
pub enum ParseErrorKind {
    /// Input was empty (no status line).
    EmptyResponse,
    /// Status line did not have the expected `RTSP/1.0 Code Reason` format.
    InvalidStatusLine,
    /// A header line did not contain a colon separator.
    InvalidHeader,
    /// `Content-Length` was present but not a number.
    InvalidContentLength,
    /// `Content-Length` above [`MAX_BODY_LEN`](crate::protocol::response::MAX_BODY_LEN).
    BodyTooLarge,
    /// Status line and headers above [`MAX_HEAD_LEN`](crate::protocol::response::MAX_HEAD_LEN).
    HeadTooLarge,
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyResponse => write!(f, "empty response"),
            Self::InvalidStatusLine => write!(f, "invalid status line"),
            Self::InvalidHeader => write!(f, "invalid header"),
            Self::InvalidContentLength => write!(f, "invalid content length"),
            Self::BodyTooLarge => write!(f, "body too large"),
            Self::HeadTooLarge => write!(f, "headers too large"),
        }
    }
}

/// Convenience alias for `Result<T, RtspError>`.
pub type Result<T> = std::result::Result<T, RtspError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_timeouts_are_recoverable() {
        let err = RtspError::from_read(io::Error::from(io::ErrorKind::WouldBlock));
        assert!(matches!(err, RtspError::Timeout));
        assert!(err.is_recoverable());

        let err = RtspError::from_read(io::Error::from(io::ErrorKind::TimedOut));
        assert!(matches!(err, RtspError::Timeout));
    }

    #[test]
    fn interruption_is_not_an_io_error() {
        let err = RtspError::from_read(io::Error::from(io::ErrorKind::Interrupted));
        assert!(matches!(err, RtspError::Interrupted));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn connection_reset_stays_io() {
        let err = RtspError::from_read(io::Error::from(io::ErrorKind::ConnectionReset));
        assert!(matches!(err, RtspError::Io(_)));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn protocol_error_message() {
        let err = RtspError::Protocol {
            method: "DESCRIBE".into(),
            code: 404,
            message: "Not Found".into(),
        };
        assert_eq!(err.to_string(), "RTSP DESCRIBE failed: 404 Not Found");
    }
}
