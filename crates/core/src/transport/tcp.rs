use std::io;
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use url::Url;

use super::{Interrupt, Transport};
use crate::error::{Result, RtspError};

/// Default RTSP port (RFC 2326 §3.2).
pub const DEFAULT_RTSP_PORT: u16 = 554;

/// Blocking TCP connection to an RTSP server.
///
/// Reader and writer are `try_clone`d handles of the same socket, so
/// shutting the socket down from the [`Interrupt`] handle fails a read that
/// is blocked on another thread.
#[derive(Debug)]
pub struct TcpTransport {
    host: String,
    port: u16,
    stream: Option<TcpStream>,
    read_timeout: Option<Duration>,
}

impl TcpTransport {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            host: host.to_string(),
            port,
            stream: None,
            read_timeout: None,
        }
    }

    /// Host and port of an `rtsp://` URL (port 554 when omitted).
    pub fn from_url(url: &Url) -> Result<Self> {
        if url.scheme() != "rtsp" {
            return Err(RtspError::InvalidUri(format!(
                "unsupported scheme '{}', expected rtsp",
                url.scheme()
            )));
        }
        let host = url
            .host_str()
            .ok_or_else(|| RtspError::InvalidUri(format!("{} has no host", url)))?;
        // IPv6 literals come back bracketed
        let host = host.trim_start_matches('[').trim_end_matches(']');
        Ok(Self::new(host, url.port().unwrap_or(DEFAULT_RTSP_PORT)))
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    fn stream(&self) -> Result<&TcpStream> {
        self.stream
            .as_ref()
            .ok_or_else(|| RtspError::Io(io::Error::new(io::ErrorKind::NotConnected, "transport not connected")))
    }
}

impl Transport for TcpTransport {
    type Reader = TcpStream;
    type Writer = TcpStream;

    fn connect(&mut self, timeout: Duration) -> Result<()> {
        let addrs: Vec<SocketAddr> = (self.host.as_str(), self.port).to_socket_addrs()?.collect();
        let mut last_err = io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            format!("{}:{} did not resolve", self.host, self.port),
        );

        for addr in addrs {
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    stream.set_read_timeout(self.read_timeout)?;
                    stream.set_write_timeout(Some(timeout))?;
                    tracing::info!(%addr, "connected");
                    self.stream = Some(stream);
                    return Ok(());
                }
                Err(e) => {
                    tracing::debug!(%addr, error = %e, "connect attempt failed");
                    last_err = e;
                }
            }
        }
        Err(RtspError::from_read(last_err))
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn set_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        self.read_timeout = timeout.filter(|t| !t.is_zero());
        if let Some(stream) = &self.stream {
            stream.set_read_timeout(self.read_timeout)?;
        }
        Ok(())
    }

    fn split(&mut self) -> Result<(TcpStream, TcpStream)> {
        let stream = self.stream()?;
        Ok((stream.try_clone()?, stream.try_clone()?))
    }

    fn interrupter(&self) -> Result<Box<dyn Interrupt>> {
        Ok(Box::new(TcpInterrupter(self.stream()?.try_clone()?)))
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
            tracing::info!(host = %self.host, port = self.port, "disconnected");
        }
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.close();
    }
}

struct TcpInterrupter(TcpStream);

impl Interrupt for TcpInterrupter {
    fn interrupt(&self) {
        // Fails if the peer already closed; either way reads now return.
        let _ = self.0.shutdown(Shutdown::Both);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::net::TcpListener;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn from_url_defaults_port() {
        let url = Url::parse("rtsp://admin:pw@192.168.1.64/Streaming/Channels/101").unwrap();
        let t = TcpTransport::from_url(&url).unwrap();
        assert_eq!(t.host(), "192.168.1.64");
        assert_eq!(t.port(), DEFAULT_RTSP_PORT);

        let url = Url::parse("rtsp://[::1]:8554/live").unwrap();
        let t = TcpTransport::from_url(&url).unwrap();
        assert_eq!((t.host(), t.port()), ("::1", 8554));
    }

    #[test]
    fn from_url_rejects_other_schemes() {
        let url = Url::parse("http://example.com/stream").unwrap();
        assert!(matches!(TcpTransport::from_url(&url), Err(RtspError::InvalidUri(_))));
    }

    #[test]
    fn split_before_connect_fails() {
        let mut t = TcpTransport::new("127.0.0.1", 1);
        assert!(!t.is_connected());
        assert!(t.split().is_err());
        assert!(t.interrupter().is_err());
    }

    #[test]
    fn read_timeout_maps_to_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let _server = thread::spawn(move || listener.accept().map(|(s, _)| {
            thread::sleep(Duration::from_millis(500));
            drop(s);
        }));

        let mut t = TcpTransport::new("127.0.0.1", port);
        t.set_timeout(Some(Duration::from_millis(50))).unwrap();
        t.connect(Duration::from_secs(2)).unwrap();
        let (mut reader, _) = t.split().unwrap();

        let err = reader.read(&mut [0u8; 8]).unwrap_err();
        assert!(matches!(RtspError::from_read(err), RtspError::Timeout));
    }

    #[test]
    fn interrupt_unblocks_reader() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = thread::spawn(move || {
            let (s, _) = listener.accept().unwrap();
            thread::sleep(Duration::from_secs(2));
            drop(s);
        });

        let mut t = TcpTransport::new("127.0.0.1", port);
        t.connect(Duration::from_secs(2)).unwrap();
        let (mut reader, _) = t.split().unwrap();
        let interrupter = t.interrupter().unwrap();

        let start = Instant::now();
        let blocked = thread::spawn(move || reader.read(&mut [0u8; 8]));
        thread::sleep(Duration::from_millis(100));
        interrupter.interrupt();

        let result = blocked.join().unwrap();
        assert!(matches!(result, Ok(0) | Err(_)), "read returned after interrupt");
        assert!(start.elapsed() < Duration::from_secs(2));
        t.close();
        assert!(!t.is_connected());
        server.join().unwrap();
    }
}
