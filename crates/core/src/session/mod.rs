//! RTSP client session (RFC 2326 §3, §12.37).
//!
//! [`RtspSession`] drives the request/response half of a connection. It
//! writes requests with strictly increasing `CSeq`, reads the matching
//! responses, answers `401` challenges once, and remembers the server's
//! `Session` id for every request after the first SETUP.
//!
//! ## Session lifecycle (RFC 2326 §A.2)
//!
//! ```text
//! Idle ── OPTIONS ──> OptionsDone ── DESCRIBE ──> DescribeDone
//!                                                     │ SETUP (per track)
//!                                                     v
//!              Playing <── PLAY ── SetupDone <────────┘
//!                 └────── PAUSE ──────^
//! any state ── TEARDOWN ──> Closed
//! ```
//!
//! A failed command leaves the state unchanged.
//!
//! ## Keep-alive
//!
//! Servers drop sessions that stay silent for longer than the `timeout`
//! announced in the `Session` header. While playing, the owner calls
//! [`RtspSession::poll_keep_alive`] once per sample pull; when half of the
//! clamped timeout has elapsed it writes a GET_PARAMETER (or OPTIONS when
//! the server does not list GET_PARAMETER) without waiting for the answer.
//! The answer arrives on the interleaved data stream and is discarded by
//! the reader there. Nothing is sent while no samples are pulled.

pub mod header;

use std::fmt;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::time::{Duration, Instant};

use crate::error::{Result, RtspError};
use crate::media::rtp::InterleavedHeader;
use crate::protocol::{Authentication, Capabilities, Challenge, Method, RtspRequest, RtspResponse};
pub use header::{Interleaved, SessionHeader, clamp_timeout};

/// Default `User-Agent` header value.
pub const DEFAULT_USER_AGENT: &str = concat!("rtsp-ingest/", env!("CARGO_PKG_VERSION"));

/// Client-side handshake state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    OptionsDone,
    DescribeDone,
    SetupDone,
    Playing,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Half-timeout keep-alive schedule.
#[derive(Debug, Clone, Copy)]
pub struct KeepAlive {
    interval: Duration,
    last_sent: Instant,
}

impl KeepAlive {
    /// Schedule for a (clamped) session timeout, starting at `now`.
    pub fn new(timeout: Duration, now: Instant) -> Self {
        Self {
            interval: timeout / 2,
            last_sent: now,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_due(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_sent) >= self.interval
    }

    pub fn mark_sent(&mut self, now: Instant) {
        self.last_sent = now;
    }
}

/// RTSP request/response state machine over a byte stream pair.
///
/// The reader is buffered and shared with the interleaved RTP reader
/// through [`reader_mut`](Self::reader_mut), so responses and media can be
/// read from the same connection.
pub struct RtspSession<R: Read, W: Write> {
    reader: BufReader<R>,
    writer: W,
    uri: String,
    user_agent: String,
    cseq: u32,
    auth: Authentication,
    challenge: Option<Challenge>,
    session: Option<SessionHeader>,
    content_base: Option<String>,
    capabilities: Capabilities,
    state: SessionState,
    keep_alive: KeepAlive,
}

impl<R: Read, W: Write> RtspSession<R, W> {
    /// Wrap a connection. `uri` is the request URI with any userinfo removed.
    pub fn new(reader: R, writer: W, uri: &str) -> Self {
        Self::with_reader(BufReader::new(reader), writer, uri)
    }

    pub fn with_reader(reader: BufReader<R>, writer: W, uri: &str) -> Self {
        Self {
            reader,
            writer,
            uri: uri.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            cseq: 0,
            auth: Authentication::none(),
            challenge: None,
            session: None,
            content_base: None,
            capabilities: Capabilities::NONE,
            state: SessionState::Idle,
            keep_alive: KeepAlive::new(clamp_timeout(0), Instant::now()),
        }
    }

    pub fn set_user_agent(&mut self, user_agent: &str) {
        self.user_agent = user_agent.to_string();
    }

    pub fn set_authentication(&mut self, auth: Authentication) {
        self.auth = auth;
        self.challenge = None;
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Last `CSeq` written.
    pub fn cseq(&self) -> u32 {
        self.cseq
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.id.as_str())
    }

    /// Clamped session timeout (15 s until SETUP reports one).
    pub fn session_timeout(&self) -> Duration {
        self.session
            .as_ref()
            .map(SessionHeader::effective_timeout)
            .unwrap_or_else(|| clamp_timeout(0))
    }

    /// `Content-Base` of the DESCRIBE response, if the server sent one.
    pub fn content_base(&self) -> Option<&str> {
        self.content_base.as_deref()
    }

    pub fn keep_alive(&self) -> &KeepAlive {
        &self.keep_alive
    }

    pub fn reader_mut(&mut self) -> &mut BufReader<R> {
        &mut self.reader
    }

    pub fn writer(&self) -> &W {
        &self.writer
    }

    fn require(&self, method: Method, allowed: &[SessionState]) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(RtspError::InvalidState {
                method: method.to_string(),
                state: self.state.to_string(),
            })
        }
    }

    fn transition(&mut self, to: SessionState) {
        if self.state != to {
            tracing::debug!(from = %self.state, to = %to, "session state");
            self.state = to;
        }
    }

    /// `Authorization` value for the next request, if any.
    fn authorization(&self, method: Method, uri: &str) -> Option<String> {
        match (&self.challenge, &self.auth.credentials) {
            (Some(challenge), Some(credentials)) => {
                Some(challenge.authorization(credentials, method.as_str(), uri))
            }
            _ => self.auth.token.clone(),
        }
    }

    /// Write one request. Returns its `CSeq`.
    fn send(&mut self, method: Method, uri: &str, extra: &[(&str, &str)]) -> Result<u32> {
        self.cseq += 1;
        let cseq = self.cseq;
        let authorization = self.authorization(method, uri);

        let request = RtspRequest::new(method, uri)
            .add_header("CSeq", &cseq.to_string())
            .add_header("User-Agent", &self.user_agent)
            .add_optional_header("Authorization", authorization.as_deref())
            .add_optional_header("Session", self.session_id());
        let request = extra
            .iter()
            .fold(request, |request, (name, value)| request.add_header(name, value));

        self.writer.write_all(request.serialize().as_bytes())?;
        self.writer.flush()?;
        tracing::debug!(cseq, method = %method, uri, "request sent");
        Ok(cseq)
    }

    /// Read the response to `cseq`, skipping interleaved frames and
    /// answers to earlier fire-and-forget requests.
    fn read_response(&mut self, cseq: u32) -> Result<RtspResponse> {
        loop {
            discard_interleaved(&mut self.reader)?;
            let response = RtspResponse::read_from(&mut self.reader)?;
            match response.cseq().and_then(|c| c.trim().parse::<u32>().ok()) {
                Some(seq) if seq < cseq => {
                    tracing::debug!(seq, expected = cseq, "discarding stale response");
                }
                _ => return Ok(response),
            }
        }
    }

    /// Send a request and read its response, answering one `401`.
    fn execute(&mut self, method: Method, uri: &str, extra: &[(&str, &str)]) -> Result<RtspResponse> {
        let cseq = self.send(method, uri, extra)?;
        let response = self.read_response(cseq)?;
        if !response.is_unauthorized() {
            return Ok(response);
        }

        if self.auth.credentials.is_none() {
            return Err(RtspError::MissingCredentials {
                method: method.to_string(),
            });
        }
        let challenge = Challenge::select(response.get_headers("WWW-Authenticate")).ok_or_else(|| {
            RtspError::Auth("no supported WWW-Authenticate challenge".to_string())
        })?;
        tracing::debug!(method = %method, ?challenge, "answering authentication challenge");
        self.challenge = Some(challenge);

        let cseq = self.send(method, uri, extra)?;
        let retry = self.read_response(cseq)?;
        if retry.is_unauthorized() {
            self.challenge = None;
            return Err(RtspError::Auth(format!("{} rejected credentials", method)));
        }
        Ok(retry)
    }

    fn expect_ok(method: Method, response: RtspResponse) -> Result<RtspResponse> {
        if response.is_ok() {
            Ok(response)
        } else {
            Err(RtspError::Protocol {
                method: method.to_string(),
                code: response.status_code,
                message: response.status_text,
            })
        }
    }

    fn learn_capabilities(&mut self, response: &RtspResponse) {
        if self.capabilities != Capabilities::NONE {
            return;
        }
        if let Some(public) = response.get_header("Public") {
            self.capabilities = Capabilities::parse(public);
            tracing::debug!(capabilities = ?self.capabilities, "server capabilities");
        }
    }

    /// OPTIONS (RFC 2326 §10.1).
    pub fn options(&mut self) -> Result<Capabilities> {
        self.require(
            Method::Options,
            &[
                SessionState::Idle,
                SessionState::OptionsDone,
                SessionState::DescribeDone,
                SessionState::SetupDone,
                SessionState::Playing,
            ],
        )?;
        let uri = self.uri.clone();
        let response = Self::expect_ok(Method::Options, self.execute(Method::Options, &uri, &[])?)?;
        self.learn_capabilities(&response);
        if self.state == SessionState::Idle {
            self.transition(SessionState::OptionsDone);
        }
        Ok(self.capabilities)
    }

    /// DESCRIBE (RFC 2326 §10.2). Returns the SDP body.
    pub fn describe(&mut self) -> Result<String> {
        self.require(
            Method::Describe,
            &[SessionState::Idle, SessionState::OptionsDone, SessionState::DescribeDone],
        )?;
        let uri = self.uri.clone();
        let response = self.execute(Method::Describe, &uri, &[("Accept", "application/sdp")])?;
        let response = Self::expect_ok(Method::Describe, response)?;
        self.learn_capabilities(&response);
        self.content_base = response
            .get_header("Content-Base")
            .map(|base| base.trim_end_matches('/').to_string())
            .filter(|base| !base.is_empty());

        self.transition(SessionState::DescribeDone);
        Ok(response.body_text())
    }

    /// SETUP one track on `uri` with the given interleaved channels
    /// (RFC 2326 §10.4). Returns the channels the server confirmed.
    ///
    /// The session id from the first SETUP is kept for the rest of the
    /// session.
    pub fn setup(&mut self, uri: &str, channels: Interleaved) -> Result<Interleaved> {
        self.require(Method::Setup, &[SessionState::DescribeDone, SessionState::SetupDone])?;
        let transport = channels.transport_header();
        let response = self.execute(Method::Setup, uri, &[("Transport", &transport)])?;
        let response = Self::expect_ok(Method::Setup, response)?;

        if self.session.is_none() {
            let session = response
                .get_header("Session")
                .and_then(SessionHeader::parse)
                .ok_or(RtspError::MissingSession)?;
            tracing::debug!(
                session_id = %session.id,
                timeout_secs = session.timeout_secs,
                "session established"
            );
            self.keep_alive = KeepAlive::new(session.effective_timeout(), Instant::now());
            self.session = Some(session);
        }

        let confirmed = response
            .get_header("Transport")
            .and_then(Interleaved::from_transport)
            .unwrap_or(channels);
        self.transition(SessionState::SetupDone);
        Ok(confirmed)
    }

    /// PLAY from `start` (or from the beginning) (RFC 2326 §10.5).
    pub fn play(&mut self, start: Option<Duration>) -> Result<()> {
        self.require(Method::Play, &[SessionState::SetupDone, SessionState::Playing])?;
        if self.session.is_none() {
            return Err(RtspError::MissingSession);
        }
        let range = npt_range(start.unwrap_or_default());
        let uri = self.uri.clone();
        let response = self.execute(Method::Play, &uri, &[("Range", &range)])?;
        Self::expect_ok(Method::Play, response)?;

        self.keep_alive.mark_sent(Instant::now());
        self.transition(SessionState::Playing);
        Ok(())
    }

    /// PAUSE (RFC 2326 §10.6). Back to `SetupDone`; PLAY resumes.
    pub fn pause(&mut self) -> Result<()> {
        self.require(Method::Pause, &[SessionState::Playing])?;
        let uri = self.uri.clone();
        let response = self.execute(Method::Pause, &uri, &[])?;
        Self::expect_ok(Method::Pause, response)?;
        self.transition(SessionState::SetupDone);
        Ok(())
    }

    /// TEARDOWN (RFC 2326 §10.7). The session is closed afterwards even
    /// if the server's answer is an error.
    pub fn teardown(&mut self) -> Result<()> {
        if self.state == SessionState::Closed {
            return Ok(());
        }
        let result = if self.session.is_some() {
            let uri = self.uri.clone();
            self.execute(Method::Teardown, &uri, &[])
                .and_then(|response| Self::expect_ok(Method::Teardown, response))
                .map(|_| ())
        } else {
            Ok(())
        };
        self.transition(SessionState::Closed);
        result
    }

    /// GET_PARAMETER with an empty body (RFC 2326 §10.8).
    pub fn get_parameter(&mut self) -> Result<()> {
        if self.session.is_none() {
            return Err(RtspError::MissingSession);
        }
        self.require(
            Method::GetParameter,
            &[SessionState::SetupDone, SessionState::Playing],
        )?;
        let uri = self.uri.clone();
        let response = self.execute(Method::GetParameter, &uri, &[])?;
        Self::expect_ok(Method::GetParameter, response)?;
        Ok(())
    }

    /// Write a keep-alive without waiting for the answer.
    pub fn send_keep_alive(&mut self, now: Instant) -> Result<()> {
        let method = if self.capabilities.contains(Capabilities::GET_PARAMETER) {
            Method::GetParameter
        } else {
            Method::Options
        };
        let uri = self.uri.clone();
        self.send(method, &uri, &[])?;
        self.keep_alive.mark_sent(now);
        tracing::debug!(method = %method, "keep-alive sent");
        Ok(())
    }

    /// Send a keep-alive if one is due. Returns whether one was sent.
    pub fn poll_keep_alive(&mut self, now: Instant) -> Result<bool> {
        if self.state != SessionState::Playing || !self.keep_alive.is_due(now) {
            return Ok(false);
        }
        self.send_keep_alive(now)?;
        Ok(true)
    }
}

impl<R: Read, W: Write> fmt::Debug for RtspSession<R, W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RtspSession")
            .field("uri", &self.uri)
            .field("state", &self.state)
            .field("cseq", &self.cseq)
            .field("session", &self.session)
            .field("capabilities", &self.capabilities)
            .finish_non_exhaustive()
    }
}

/// `Range` header value, `npt=<seconds>-`.
fn npt_range(start: Duration) -> String {
    format!("npt={}.{:03}-", start.as_secs(), start.subsec_millis())
}

/// Skip `$`-framed binary data that precedes the next text message.
fn discard_interleaved<R: Read>(reader: &mut BufReader<R>) -> Result<()> {
    loop {
        let buf = reader.fill_buf().map_err(RtspError::from_read)?;
        if buf.first() != Some(&crate::media::rtp::INTERLEAVED_MAGIC) {
            return Ok(());
        }
        let mut prefix = [0u8; InterleavedHeader::LEN];
        reader.read_exact(&mut prefix).map_err(RtspError::from_read)?;
        if let Some(frame) = InterleavedHeader::parse(prefix) {
            io::copy(&mut reader.by_ref().take(frame.length as u64), &mut io::sink())
                .map_err(RtspError::from_read)?;
            tracing::trace!(channel = frame.channel, len = frame.length, "skipped interleaved frame");
        }
    }
}
