#![deny(unsafe_code)]

//! Byte-stream transport for hubbub.
//!
//! Frames are UTF-8 JSON texts terminated by the record separator byte 0x1E
//! over any `AsyncRead + AsyncWrite` pair (TCP, Unix sockets, in-memory
//! duplex pipes). A connection is gated by a handshake, then driven by a
//! per-connection dispatcher that routes invocations to a
//! [`Hub`](hubbub_session::Hub).

mod framing;
pub use framing::{DEFAULT_MAX_FRAME_SIZE, FrameReader, FrameWriter, RECORD_SEPARATOR};

mod handshake;

mod connection;
pub use connection::ConnectionError;

mod server;
pub use server::{Server, ServerConfig};
