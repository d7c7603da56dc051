//! TCP listener and framed I/O.
//!
//! Each accepted connection carries length-prefixed CBOR envelopes in both
//! directions. Reads go through [`FrameReader`]; writes are queued on an
//! unbounded channel and drained by [`write_loop`].

use std::collections::VecDeque;
use std::net::SocketAddr;
use tally_core::{frame_encode, Envelope, FrameDecoder, TallyError, TallyResult};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

/// A handle to an accepted TCP connection.
pub struct TcpConnection {
    pub stream: TcpStream,
    pub remote_addr: SocketAddr,
}

/// A bound listener yielding accepted connections.
pub struct Listener {
    pub local_addr: SocketAddr,
    rx: mpsc::Receiver<TcpConnection>,
}

impl Listener {
    /// Next accepted connection, or `None` once the accept loop has stopped.
    pub async fn accept(&mut self) -> Option<TcpConnection> {
        self.rx.recv().await
    }
}

/// Bind `bind_addr` and start accepting in a background task.
pub async fn start_listener(bind_addr: &str) -> TallyResult<Listener> {
    let tcp_listener = TcpListener::bind(bind_addr)
        .await
        .map_err(|e| TallyError::Transport(format!("bind {bind_addr} failed: {e}")))?;
    let local_addr = tcp_listener.local_addr()?;

    info!(addr = %local_addr, "listener started");

    let (tx, rx) = mpsc::channel::<TcpConnection>(64);

    tokio::spawn(async move {
        loop {
            match tcp_listener.accept().await {
                Ok((stream, remote_addr)) => {
                    debug!(remote = %remote_addr, "connection accepted");
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!(remote = %remote_addr, error = %e, "set_nodelay failed");
                    }
                    let conn = TcpConnection {
                        stream,
                        remote_addr,
                    };
                    if tx.send(conn).await.is_err() {
                        debug!("listener closed, stopping accept loop");
                        break;
                    }
                }
                Err(e) => {
                    error!(error = %e, "TCP accept failed");
                }
            }
        }
    });

    Ok(Listener { local_addr, rx })
}

/// Reads whole envelopes from the read half of a connection.
pub struct FrameReader {
    half: OwnedReadHalf,
    decoder: FrameDecoder,
    queue: VecDeque<Envelope>,
    buf: Vec<u8>,
}

impl FrameReader {
    pub fn new(half: OwnedReadHalf) -> Self {
        Self {
            half,
            decoder: FrameDecoder::new(),
            queue: VecDeque::new(),
            buf: vec![0u8; 8192],
        }
    }

    /// Next envelope, or `None` when the peer closed the connection.
    ///
    /// Cancel-safe: bytes are only consumed once a read has completed.
    pub async fn next(&mut self) -> TallyResult<Option<Envelope>> {
        loop {
            if let Some(env) = self.queue.pop_front() {
                return Ok(Some(env));
            }
            let n = self.half.read(&mut self.buf).await?;
            if n == 0 {
                if self.decoder.pending() > 0 {
                    debug!(pending = self.decoder.pending(), "peer closed mid-frame");
                }
                return Ok(None);
            }
            let decoded: Vec<Envelope> = self.decoder.feed(&self.buf[..n])?;
            self.queue.extend(decoded);
        }
    }
}

/// Drain queued envelopes onto the socket until every sender is dropped,
/// then shut down the write side.
pub async fn write_loop(mut half: OwnedWriteHalf, mut rx: mpsc::UnboundedReceiver<Envelope>) {
    while let Some(env) = rx.recv().await {
        let frame = match frame_encode(&env) {
            Ok(frame) => frame,
            Err(e) => {
                error!(error = %e, "failed to encode frame");
                continue;
            }
        };
        if let Err(e) = half.write_all(&frame).await {
            debug!(error = %e, "write failed, dropping connection output");
            return;
        }
    }
    if let Err(e) = half.shutdown().await {
        debug!(error = %e, "shutdown failed");
    }
}
