//! Binds a summing session to a connection.
//!
//! [`SessionFactory`] builds one [`LineSession`] per opened channel and
//! writes the prompt; [`BoundSession::dispatch`] routes inbound events to it.

use tally_core::{
    ChannelEvent, DataKind, DataStream, Envelope, LineSession, SessionChannel, SessionLimits,
    PROMPT,
};
use tokio::sync::mpsc;
use tracing::debug;

/// Channel that queues output as envelopes for the connection writer.
pub struct QueuedChannel {
    tx: mpsc::UnboundedSender<Envelope>,
}

impl QueuedChannel {
    pub fn new(tx: mpsc::UnboundedSender<Envelope>) -> Self {
        Self { tx }
    }

    fn send(&self, env: Envelope) {
        queue(&self.tx, env);
    }
}

/// Queue `env` for the connection writer, logging if the writer has gone.
pub fn queue(tx: &mpsc::UnboundedSender<Envelope>, env: Envelope) {
    if tx.send(env).is_err() {
        debug!("connection writer gone, output dropped");
    }
}

impl SessionChannel for QueuedChannel {
    fn write_output(&mut self, text: &str) {
        self.send(Envelope::data(DataStream::Stdout, text));
    }

    fn write_error(&mut self, text: &str) {
        self.send(Envelope::data(DataStream::Stderr, text));
    }

    fn request_close(&mut self, status: u32) {
        self.send(Envelope::exit(status));
    }
}

/// Creates sessions with a shared set of limits.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionFactory {
    limits: SessionLimits,
}

impl SessionFactory {
    pub fn new(limits: SessionLimits) -> Self {
        Self { limits }
    }

    /// Write the prompt to `channel` and start a session on it.
    pub fn start<C: SessionChannel>(&self, mut channel: C) -> BoundSession<C> {
        channel.write_output(PROMPT);
        BoundSession {
            session: LineSession::with_limits(channel, self.limits),
        }
    }
}

/// A session wired to its channel.
pub struct BoundSession<C> {
    session: LineSession<C>,
}

impl<C: SessionChannel> BoundSession<C> {
    /// Deliver one event. Returns `true` while the connection should keep reading.
    pub fn dispatch(&mut self, event: ChannelEvent) -> bool {
        match event {
            ChannelEvent::Data {
                text,
                kind: DataKind::Normal,
            } => self.session.on_data(&text),
            ChannelEvent::Data {
                kind: DataKind::Extended,
                text,
            } => debug!(len = text.len(), "ignoring extended data"),
            ChannelEvent::Eof => return self.session.on_eof(),
            ChannelEvent::Break { msec } => return self.session.on_break(msec),
            ChannelEvent::SoftEof => self.session.on_soft_eof(),
        }
        !self.session.is_terminated()
    }

    pub fn session(&self) -> &LineSession<C> {
        &self.session
    }
}
