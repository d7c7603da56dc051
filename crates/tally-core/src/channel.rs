//! Channel abstraction a session writes to, and the events that drive it.
//!
//! The transport owns the real connection. A session only ever sees this
//! narrow surface: two output streams and a close request.

/// Outbound side of one session channel.
///
/// Writes are fire-and-forget: implementations queue the text for delivery
/// and must not block the caller.
pub trait SessionChannel: Send {
    /// Append text to the session's normal output stream.
    fn write_output(&mut self, text: &str);

    /// Append text to the session's diagnostic stream.
    fn write_error(&mut self, text: &str);

    /// Finish the session. The channel is closed after pending output
    /// has been flushed. `0` denotes success.
    fn request_close(&mut self, status: u32);
}

/// Classification of inbound data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataKind {
    /// Regular input typed or piped by the client.
    Normal,
    /// Out-of-band data; sessions ignore it.
    Extended,
}

/// An inbound event delivered to a session, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Data { text: String, kind: DataKind },
    /// Clean end of stream from the client.
    Eof,
    /// In-band "no more input" marker.
    SoftEof,
    /// Out-of-band break; the payload is carried but not interpreted.
    Break { msec: u64 },
}
