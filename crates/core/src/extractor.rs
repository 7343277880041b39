//! Pull-based RTSP media source.
//!
//! [`RtspExtractor`] owns a [`Transport`] and the [`RtspSession`] running
//! over it. [`prepare`](RtspExtractor::prepare) performs the handshake:
//!
//! ```text
//! connect ─> OPTIONS ─> DESCRIBE ─> parse SDP ─> SETUP (per track, by tag) ─> PLAY
//! ```
//!
//! after which [`next_sample`](RtspExtractor::next_sample) reads the
//! interleaved stream one RTP packet at a time and returns it as a
//! [`Sample`] of the track its channel was set up for.

use std::collections::HashMap;
use std::io::{self, BufRead, BufReader, Read};
use std::sync::Arc;
use std::time::{Duration, Instant};

use url::Url;

use crate::error::{Result, RtspError};
use crate::media::Sample;
use crate::media::rtp::{INTERLEAVED_MAGIC, InterleavedHeader, RtpPacket};
use crate::protocol::sdp::parse_tracks;
use crate::protocol::{Authentication, RtspResponse};
use crate::session::{DEFAULT_USER_AGENT, Interleaved, RtspSession, SessionState};
use crate::track::{RtpClock, Track, TrackKind, Tracks};
use crate::transport::{Interrupt, TcpTransport, Transport};

/// Largest payload an interleaved frame can announce.
const MAX_INTERLEAVED_LEN: usize = u16::MAX as usize;

/// Extractor settings.
#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    /// `User-Agent` sent with every request.
    pub user_agent: String,
    /// Capacity of the read buffer; also the largest RTP packet accepted.
    pub read_buffer_size: usize,
    /// Bound on each blocking read. `None` blocks indefinitely.
    pub io_timeout: Option<Duration>,
    pub connect_timeout: Duration,
    pub extract_audio: bool,
    pub extract_video: bool,
    pub extract_subtitle: bool,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            read_buffer_size: MAX_INTERLEAVED_LEN + InterleavedHeader::LEN,
            io_timeout: Some(Duration::from_secs(5)),
            connect_timeout: Duration::from_secs(5),
            extract_audio: true,
            extract_video: true,
            extract_subtitle: true,
        }
    }
}

impl ExtractorConfig {
    fn wants(&self, kind: TrackKind) -> bool {
        match kind {
            TrackKind::Video => self.extract_video,
            TrackKind::Audio => self.extract_audio,
            TrackKind::Subtitle => self.extract_subtitle,
        }
    }
}

/// Outcome of one [`RtspExtractor::next_sample`] call.
#[derive(Debug)]
pub enum SampleRead {
    /// One RTP payload of a set-up track.
    Sample(Sample),
    /// Something other than media was consumed (RTCP, a keep-alive
    /// answer, stray bytes). Call again.
    Pending,
    /// The server closed the connection or the session was torn down.
    EndOfStream,
}

/// RTSP client that turns a stream URL into timestamped samples.
pub struct RtspExtractor<T: Transport> {
    transport: T,
    uri: Url,
    config: ExtractorConfig,
    auth: Authentication,
    session: Option<RtspSession<T::Reader, T::Writer>>,
    tracks: Tracks,
    channels: HashMap<u8, (Arc<Track>, RtpClock)>,
    packet: Vec<u8>,
    position: i64,
    sample_index: u64,
}

impl RtspExtractor<TcpTransport> {
    /// Extractor for an `rtsp://` URL over TCP.
    pub fn open(uri: &str, config: ExtractorConfig) -> Result<Self> {
        let url = parse_uri(uri)?;
        let transport = TcpTransport::from_url(&url)?;
        Self::with_transport(transport, uri, config)
    }
}

impl<T: Transport> RtspExtractor<T> {
    /// Extractor over an unconnected transport.
    ///
    /// Credentials in the URL userinfo become the session's authentication
    /// and are removed from the request URI.
    pub fn with_transport(transport: T, uri: &str, config: ExtractorConfig) -> Result<Self> {
        let mut url = parse_uri(uri)?;
        let auth = Authentication::from_url(&url).unwrap_or_else(Authentication::none);
        // Only fails for URLs that cannot carry userinfo, which parse_uri rejects.
        let _ = url.set_username("");
        let _ = url.set_password(None);

        Ok(Self {
            transport,
            uri: url,
            config,
            auth,
            session: None,
            tracks: Tracks::new(),
            channels: HashMap::new(),
            packet: Vec::new(),
            position: 0,
            sample_index: 0,
        })
    }

    /// Replace the authentication taken from the URL.
    pub fn set_authentication(&mut self, auth: Authentication) {
        if let Some(session) = self.session.as_mut() {
            session.set_authentication(auth.clone());
        }
        self.auth = auth;
    }

    /// Request URI, without credentials.
    pub fn uri(&self) -> &str {
        self.uri.as_str()
    }

    pub fn config(&self) -> &ExtractorConfig {
        &self.config
    }

    pub fn tracks(&self) -> &Tracks {
        &self.tracks
    }

    /// Timestamp (ms) of the last sample returned.
    pub fn position(&self) -> i64 {
        self.position
    }

    /// Number of samples returned so far.
    pub fn sample_index(&self) -> u64 {
        self.sample_index
    }

    /// Whether [`prepare`](Self::prepare) has been attempted.
    pub fn is_prepared(&self) -> bool {
        self.session.is_some()
    }

    pub fn session(&self) -> Option<&RtspSession<T::Reader, T::Writer>> {
        self.session.as_ref()
    }

    /// Handle that makes a blocked [`next_sample`](Self::next_sample) return.
    pub fn interrupter(&self) -> Result<Box<dyn Interrupt>> {
        self.transport.interrupter()
    }

    /// Connect and run the handshake up to PLAY.
    ///
    /// Any failure is returned as is; the extractor is then only good for
    /// [`close`](Self::close).
    pub fn prepare(&mut self) -> Result<()> {
        if self.session.is_some() {
            return Err(RtspError::AlreadyPrepared);
        }

        self.transport.set_timeout(self.config.io_timeout)?;
        if !self.transport.is_connected() {
            self.transport.connect(self.config.connect_timeout)?;
        }
        let (reader, writer) = self.transport.split()?;
        let reader = BufReader::with_capacity(self.config.read_buffer_size.max(InterleavedHeader::LEN), reader);
        let mut session = RtspSession::with_reader(reader, writer, self.uri.as_str());
        session.set_user_agent(&self.config.user_agent);
        session.set_authentication(self.auth.clone());
        let session = self.session.insert(session);

        session.options()?;
        let sdp = session.describe()?;

        let mut tracks = parse_tracks(&sdp);
        tracks.retain(|track| self.config.wants(track.kind()));
        if tracks.is_empty() {
            return Err(RtspError::Sdp("no selectable tracks in session description".into()));
        }

        let base = session
            .content_base()
            .map(str::to_string)
            .unwrap_or_else(|| self.uri.as_str().trim_end_matches('/').to_string());

        for track in tracks.sorted_by_tag() {
            let channels = Interleaved::for_tag(track.tag())
                .ok_or_else(|| RtspError::Sdp(format!("track tag {} has no interleaved channel", track.tag())))?;
            let uri = resolve_control(&base, track.id());
            let confirmed = session.setup(&uri, channels)?;
            tracing::debug!(track = %track, rtp = confirmed.rtp, rtcp = confirmed.rtcp, "track set up");
            self.channels.insert(confirmed.rtp, (track, RtpClock::new()));
        }

        session.play(None)?;
        self.tracks = tracks;
        tracing::info!(uri = %self.uri, tracks = self.tracks.len(), "playing");
        Ok(())
    }

    /// PAUSE the session. [`resume`](Self::resume) continues it.
    pub fn pause(&mut self) -> Result<()> {
        self.session.as_mut().ok_or(RtspError::NotPrepared)?.pause()
    }

    /// PLAY again, optionally from `start`.
    pub fn resume(&mut self, start: Option<Duration>) -> Result<()> {
        self.session.as_mut().ok_or(RtspError::NotPrepared)?.play(start)
    }

    /// Read the next item from the interleaved stream.
    ///
    /// A due keep-alive is sent first; failing to send it is logged and
    /// does not fail the read. Read timeouts surface as
    /// [`RtspError::Timeout`], packets the track cannot take as
    /// [`RtspError::UnsupportedSample`]; both leave the stream usable.
    pub fn next_sample(&mut self) -> Result<SampleRead> {
        let Self {
            session,
            channels,
            packet,
            config,
            position,
            sample_index,
            ..
        } = self;
        let session = session.as_mut().ok_or(RtspError::NotPrepared)?;
        if session.state() == SessionState::Closed {
            return Ok(SampleRead::EndOfStream);
        }

        if let Err(e) = session.poll_keep_alive(Instant::now()) {
            tracing::warn!(error = %e, "keep-alive failed");
        }

        let reader = session.reader_mut();
        let first = match reader.fill_buf() {
            Ok([]) => return Ok(SampleRead::EndOfStream),
            Ok(buf) => buf[0],
            Err(e) => return Err(RtspError::from_read(e)),
        };

        match first {
            INTERLEAVED_MAGIC => {}
            b'R' => {
                match RtspResponse::read_from(reader) {
                    Ok(response) => tracing::debug!(
                        code = response.status_code,
                        cseq = response.cseq().unwrap_or("-"),
                        "discarding response on data channel"
                    ),
                    Err(RtspError::Io(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
                        return Ok(SampleRead::EndOfStream);
                    }
                    Err(e @ RtspError::Parse { .. }) => {
                        tracing::warn!(error = %e, "unparseable text on data channel");
                    }
                    Err(e) => return Err(e),
                }
                return Ok(SampleRead::Pending);
            }
            _ => {
                let skipped = skip_junk(reader)?;
                tracing::warn!(skipped, "skipped bytes outside interleaved frames");
                return Ok(SampleRead::Pending);
            }
        }

        let mut prefix = [0u8; InterleavedHeader::LEN];
        if !read_full(reader, &mut prefix)? {
            return Ok(SampleRead::EndOfStream);
        }
        let Some(frame) = InterleavedHeader::parse(prefix) else {
            return Ok(SampleRead::Pending);
        };
        let len = frame.length as usize;

        if len > config.read_buffer_size {
            io::copy(&mut reader.by_ref().take(len as u64), &mut io::sink()).map_err(RtspError::from_read)?;
            return Err(RtspError::UnsupportedSample(format!(
                "{} byte packet exceeds the {} byte read buffer",
                len, config.read_buffer_size
            )));
        }
        packet.resize(len, 0);
        if !read_full(reader, packet)? {
            return Ok(SampleRead::EndOfStream);
        }

        if !frame.is_rtp() {
            tracing::trace!(channel = frame.channel, len, "RTCP ignored");
            return Ok(SampleRead::Pending);
        }
        let Some((track, clock)) = channels.get_mut(&frame.channel) else {
            tracing::debug!(channel = frame.channel, len, "packet on a channel that was not set up");
            return Ok(SampleRead::Pending);
        };

        let rtp = RtpPacket::parse(packet)?;
        tracing::trace!(
            channel = frame.channel,
            seq = rtp.sequence,
            pt = rtp.payload_type,
            marker = rtp.marker,
            len = rtp.payload.len(),
            "rtp packet"
        );
        let timestamp = track.normalize_extended(clock.extend(rtp.timestamp));
        let sample = Sample::new(rtp.payload.to_vec(), timestamp, track.clone());

        *position = timestamp;
        *sample_index += 1;
        Ok(SampleRead::Sample(sample))
    }

    /// TEARDOWN, close the transport and forget the tracks.
    pub fn close(&mut self) {
        if let Some(session) = self.session.as_mut()
            && session.state() != SessionState::Closed
            && let Err(e) = session.teardown()
        {
            tracing::debug!(error = %e, "teardown failed");
        }
        self.transport.close();
        self.tracks.clear();
        self.channels.clear();
    }
}

fn parse_uri(uri: &str) -> Result<Url> {
    let url = Url::parse(uri).map_err(|e| RtspError::InvalidUri(format!("{}: {}", uri, e)))?;
    if !matches!(url.scheme(), "rtsp" | "rtsps") || url.host_str().is_none() {
        return Err(RtspError::InvalidUri(format!("{} is not an rtsp:// URL", uri)));
    }
    Ok(url)
}

/// SETUP URI for a track's `a=control` value.
///
/// Absolute controls are used as is, `*` or an empty control means the
/// base itself, anything else is joined to the base with a single `/`.
pub fn resolve_control(base: &str, control: &str) -> String {
    let control = control.trim();
    if control.is_empty() || control == "*" {
        return base.to_string();
    }
    let lower = control.to_ascii_lowercase();
    if lower.starts_with("rtsp://") || lower.starts_with("rtsps://") {
        return control.to_string();
    }
    format!("{}/{}", base.trim_end_matches('/'), control.trim_start_matches('/'))
}

/// `read_exact` that reports a clean EOF as `Ok(false)`.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(RtspError::from_read(e)),
    }
}

/// Drop buffered bytes up to the next `$` or `R`. Returns how many.
fn skip_junk<R: Read>(reader: &mut BufReader<R>) -> Result<usize> {
    let buf = reader.fill_buf().map_err(RtspError::from_read)?;
    let skip = buf
        .iter()
        .skip(1)
        .position(|b| *b == INTERLEAVED_MAGIC || *b == b'R')
        .map_or(buf.len(), |p| p + 1);
    reader.consume(skip);
    Ok(skip)
}
