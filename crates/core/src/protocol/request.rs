use std::fmt;

/// RTSP protocol version written on every request line.
pub const RTSP_VERSION: &str = "RTSP/1.0";

/// RTSP methods issued by the client (RFC 2326 §10).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Options,
    Describe,
    Setup,
    Play,
    Pause,
    Teardown,
    GetParameter,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Options => "OPTIONS",
            Self::Describe => "DESCRIBE",
            Self::Setup => "SETUP",
            Self::Play => "PLAY",
            Self::Pause => "PAUSE",
            Self::Teardown => "TEARDOWN",
            Self::GetParameter => "GET_PARAMETER",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An outgoing RTSP request (RFC 2326 §6).
///
/// Serializes to the standard text format:
///
/// ```text
/// DESCRIBE rtsp://camera/stream RTSP/1.0\r\n
/// CSeq: 2\r\n
/// User-Agent: rtsp-ingest/0.1\r\n
/// Accept: application/sdp\r\n
/// \r\n
/// ```
///
/// Uses a builder pattern: chain [`add_header`](Self::add_header), then call
/// [`serialize`](Self::serialize). Requests sent by this client never carry
/// a body.
#[must_use]
#[derive(Debug, Clone)]
pub struct RtspRequest {
    pub method: Method,
    pub uri: String,
    pub headers: Vec<(String, String)>,
}

impl RtspRequest {
    pub fn new(method: Method, uri: &str) -> Self {
        RtspRequest {
            method,
            uri: uri.to_string(),
            headers: Vec::new(),
        }
    }

    pub fn add_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Add a header only when a value is present.
    pub fn add_optional_header(self, name: &str, value: Option<&str>) -> Self {
        match value {
            Some(value) => self.add_header(name, value),
            None => self,
        }
    }

    /// Look up a header value by name (case-insensitive, per RFC 2326 §4.2).
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Serialize to the RTSP text wire format, terminated by a blank line.
    pub fn serialize(&self) -> String {
        let mut request = format!("{} {} {}\r\n", self.method, self.uri, RTSP_VERSION);

        for (name, value) in &self.headers {
            request.push_str(&format!("{}: {}\r\n", name, value));
        }

        request.push_str("\r\n");
        request
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialize_options() {
        let req = RtspRequest::new(Method::Options, "rtsp://cam/stream")
            .add_header("CSeq", "1")
            .add_header("User-Agent", "test");
        let s = req.serialize();
        assert!(s.starts_with("OPTIONS rtsp://cam/stream RTSP/1.0\r\n"));
        assert!(s.contains("CSeq: 1\r\n"));
        assert!(s.contains("User-Agent: test\r\n"));
        assert!(s.ends_with("\r\n\r\n"));
    }

    #[test]
    fn optional_header_skipped_when_absent() {
        let req = RtspRequest::new(Method::Play, "rtsp://cam/stream")
            .add_optional_header("Session", None)
            .add_optional_header("Authorization", Some("Basic abc"));
        assert_eq!(req.get_header("session"), None);
        assert_eq!(req.get_header("AUTHORIZATION"), Some("Basic abc"));
    }

    #[test]
    fn get_parameter_method_name() {
        assert_eq!(Method::GetParameter.as_str(), "GET_PARAMETER");
        let s = RtspRequest::new(Method::GetParameter, "rtsp://x").serialize();
        assert!(s.starts_with("GET_PARAMETER rtsp://x RTSP/1.0\r\n"));
    }
}
