//! Byte transport underneath an RTSP session.
//!
//! RTSP over TCP with interleaved RTP (RFC 2326 §10.12) needs one
//! bidirectional connection: requests and responses travel as text, media
//! travels inline as `$`-framed binary packets. The extractor only needs a
//! blocking reader and writer for that connection, plus a way to make a
//! blocked read return from another thread.
//!
//! [`tcp::TcpTransport`] is the implementation used for `rtsp://` URLs.

pub mod tcp;

use std::io::{Read, Write};
use std::time::Duration;

use crate::error::Result;

pub use tcp::TcpTransport;

/// A connection an RTSP session can run over.
pub trait Transport: Send {
    type Reader: Read + Send + 'static;
    type Writer: Write + Send + 'static;

    /// Open the connection, giving up after `timeout`.
    fn connect(&mut self, timeout: Duration) -> Result<()>;

    fn is_connected(&self) -> bool;

    /// Bound every blocking read; `None` blocks indefinitely. A read that
    /// times out fails with [`RtspError::Timeout`](crate::RtspError::Timeout).
    fn set_timeout(&mut self, timeout: Option<Duration>) -> Result<()>;

    /// Independent read and write halves of the open connection.
    fn split(&mut self) -> Result<(Self::Reader, Self::Writer)>;

    /// Handle that can unblock a pending read from another thread.
    fn interrupter(&self) -> Result<Box<dyn Interrupt>>;

    /// Close the connection. Pending reads on split halves fail promptly.
    fn close(&mut self);
}

/// Cross-thread cancellation of a blocked transport read.
pub trait Interrupt: Send + Sync {
    fn interrupt(&self);
}
