use std::io::{BufRead, Read};

use crate::error::{ParseErrorKind, Result, RtspError};

/// Largest accepted body. SDP descriptions are a few KiB at most.
pub const MAX_BODY_LEN: usize = 64 * 1024;

/// Largest accepted status line plus headers.
pub const MAX_HEAD_LEN: usize = 16 * 1024;

/// A parsed RTSP response (RFC 2326 §7).
///
/// RTSP responses follow HTTP/1.1 syntax:
///
/// ```text
/// RTSP-Version SP Status-Code SP Reason-Phrase CRLF
/// *(Header: Value CRLF)
/// CRLF
/// [body of Content-Length bytes]
/// ```
///
/// Header lookup is case-insensitive per RFC 2326 §4.2.
#[derive(Debug, Clone)]
pub struct RtspResponse {
    /// Status code (200, 401, 404, ...).
    pub status_code: u16,
    /// Reason phrase following the status code.
    pub status_text: String,
    /// Headers as ordered (name, value) pairs, stored as received.
    pub headers: Vec<(String, String)>,
    /// Message body; empty when no `Content-Length` was sent.
    pub body: Vec<u8>,
}

impl RtspResponse {
    /// Parse the status line and headers of a response.
    ///
    /// `raw` holds everything up to (and optionally including) the blank
    /// line. The body is read separately by [`read_from`](Self::read_from)
    /// because its length is only known once the headers are parsed.
    pub fn parse(raw: &str) -> Result<Self> {
        let mut lines = raw.lines().skip_while(|line| line.trim().is_empty());

        let status_line = lines.next().ok_or(RtspError::Parse {
            kind: ParseErrorKind::EmptyResponse,
        })?;

        let mut parts = status_line.splitn(3, ' ');
        let version = parts.next().unwrap_or("");
        if !version.starts_with("RTSP/") {
            return Err(RtspError::Parse {
                kind: ParseErrorKind::InvalidStatusLine,
            });
        }

        let status_code: u16 = parts
            .next()
            .and_then(|code| code.trim().parse().ok())
            .ok_or(RtspError::Parse {
                kind: ParseErrorKind::InvalidStatusLine,
            })?;
        let status_text = parts.next().unwrap_or("").trim().to_string();

        if version != "RTSP/1.0" {
            tracing::warn!(version, "server answered with non-RTSP/1.0 version");
        }

        let mut headers = Vec::new();

        for line in lines {
            if line.is_empty() {
                break;
            }

            let colon_pos = line.find(':').ok_or(RtspError::Parse {
                kind: ParseErrorKind::InvalidHeader,
            })?;

            let name = line[..colon_pos].trim().to_string();
            let value = line[colon_pos + 1..].trim().to_string();

            headers.push((name, value));
        }

        Ok(RtspResponse {
            status_code,
            status_text,
            headers,
            body: Vec::new(),
        })
    }

    /// Read one complete response (head and body) from a buffered stream.
    ///
    /// Blocks until the blank line after the headers, then reads exactly
    /// `Content-Length` body bytes. A stream that closes mid-message is an
    /// `UnexpectedEof` I/O error. Heads over [`MAX_HEAD_LEN`] and bodies
    /// over [`MAX_BODY_LEN`] are parse errors; nothing is allocated for them.
    pub fn read_from<R: BufRead>(reader: &mut R) -> Result<Self> {
        let head = read_head(reader)?;
        let mut response = Self::parse(&head)?;

        let length = response.content_length()?;
        if length > MAX_BODY_LEN {
            tracing::warn!(length, max = MAX_BODY_LEN, "response body rejected");
            return Err(RtspError::Parse {
                kind: ParseErrorKind::BodyTooLarge,
            });
        }
        if length > 0 {
            let mut body = vec![0u8; length];
            reader.read_exact(&mut body).map_err(RtspError::from_read)?;
            response.body = body;
        }

        tracing::trace!(
            status = response.status_code,
            cseq = response.cseq().unwrap_or("-"),
            body_len = response.body.len(),
            "response read"
        );

        Ok(response)
    }

    /// Look up a header value by name (case-insensitive, per RFC 2326 §4.2).
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// All values of a repeated header, in the order received.
    ///
    /// Servers commonly send several `WWW-Authenticate` lines, one per scheme.
    pub fn get_headers<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.headers
            .iter()
            .filter(move |(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Returns the CSeq header value echoed by the server (RFC 2326 §12.17).
    pub fn cseq(&self) -> Option<&str> {
        self.get_header("CSeq")
    }

    /// `Content-Length` in bytes, 0 when absent.
    pub fn content_length(&self) -> Result<usize> {
        match self.get_header("Content-Length") {
            Some(value) => value.trim().parse().map_err(|_| RtspError::Parse {
                kind: ParseErrorKind::InvalidContentLength,
            }),
            None => Ok(0),
        }
    }

    /// Body decoded as text (SDP is ASCII).
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// 200 OK (RFC 2326 §7.1.1).
    pub fn is_ok(&self) -> bool {
        self.status_code == 200
    }

    /// 401 Unauthorized.
    pub fn is_unauthorized(&self) -> bool {
        self.status_code == 401
    }
}

/// Read header lines up to and including the terminating blank line.
///
/// Lines are read as raw bytes so that a stray binary byte cannot turn the
/// whole response into an `InvalidData` error.
fn read_head<R: BufRead>(reader: &mut R) -> Result<String> {
    let mut head = String::new();
    let mut started = false;
    let mut consumed = 0usize;

    loop {
        let remaining = MAX_HEAD_LEN.saturating_sub(consumed);
        let mut line = Vec::new();
        let n = reader
            .by_ref()
            .take(remaining as u64 + 1)
            .read_until(b'\n', &mut line)
            .map_err(RtspError::from_read)?;
        if n > remaining {
            return Err(RtspError::Parse {
                kind: ParseErrorKind::HeadTooLarge,
            });
        }
        consumed += n;
        if n == 0 {
            return Err(RtspError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "connection closed while reading RTSP response",
            )));
        }

        let line = String::from_utf8_lossy(&line);
        let blank = line.trim().is_empty();

        if blank && !started {
            continue;
        }
        started = true;
        head.push_str(&line);

        if blank {
            return Ok(head);
        }
    }
}
