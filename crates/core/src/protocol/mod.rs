//! Client side of the RTSP text protocol (RFC 2326).
//!
//! Requests are serialized by [`RtspRequest`], answers parsed by
//! [`RtspResponse`]. A `401` carries one or more `WWW-Authenticate`
//! challenges; [`Challenge`] picks one and produces the `Authorization`
//! value for the retry. The DESCRIBE body goes through [`sdp`].
//!
//! A typical exchange, client lines first:
//!
//! ```text
//! DESCRIBE rtsp://cam/live RTSP/1.0        RTSP/1.0 401 Unauthorized
//! CSeq: 2                                  CSeq: 2
//! Accept: application/sdp                  WWW-Authenticate: Digest realm="x" nonce="y"
//!
//! DESCRIBE rtsp://cam/live RTSP/1.0        RTSP/1.0 200 OK
//! CSeq: 3                                  CSeq: 3
//! Authorization: Digest username=...       Content-Type: application/sdp
//!                                          Content-Length: 312
//! ```
//!
//! | Method | RFC section | Used for |
//! |--------|-------------|----------|
//! | OPTIONS | §10.1 | `Public` capabilities; keep-alive fallback |
//! | DESCRIBE | §10.2 | SDP track list |
//! | SETUP | §10.4 | Interleaved TCP channels per track |
//! | PLAY / PAUSE | §10.5, §10.6 | Start and suspend delivery |
//! | TEARDOWN | §10.7 | End the session |
//! | GET_PARAMETER | §10.8 | Keep-alive |

pub mod auth;
pub mod capability;
pub mod request;
pub mod response;
pub mod sdp;

pub use auth::{Authentication, Challenge, Credentials, RealmNonce};
pub use capability::Capabilities;
pub use request::{Method, RtspRequest};
pub use response::RtspResponse;
