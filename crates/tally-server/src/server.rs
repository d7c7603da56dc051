//! Core server: accepts connections and runs one session per channel.
//!
//! Each connection is served by its own task, so a session's events are
//! always handled one at a time. Outbound envelopes go through a queue that
//! a writer task drains onto the socket.

use crate::config::ServerConfig;
use crate::session::{queue, QueuedChannel, SessionFactory, SessionRegistry};
use crate::transport::tcp::{self, FrameReader, Listener, TcpConnection};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tally_core::messages::{error_code, ChannelKind, Payload};
use tally_core::{Envelope, MsgType, TallyError, TallyResult, PROTOCOL_VERSION};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// The tally server instance.
pub struct TallyServer {
    config: ServerConfig,
    registry: Arc<SessionRegistry>,
    factory: SessionFactory,
    shutdown_tx: broadcast::Sender<()>,
}

impl TallyServer {
    pub fn new(config: ServerConfig) -> Self {
        let registry = Arc::new(SessionRegistry::new(config.max_sessions));
        let factory = SessionFactory::new(config.limits);
        Self {
            config,
            registry,
            factory,
            shutdown_tx: broadcast::channel(1).0,
        }
    }

    /// Sender that asks the server and every open connection to stop.
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Bind the configured address and serve until shutdown.
    pub async fn run(self) -> TallyResult<()> {
        let listener = tcp::start_listener(&self.config.listen_addr()).await?;
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener until shutdown.
    ///
    /// Waits for open connections to finish before returning.
    pub async fn serve(self, mut listener: Listener) -> TallyResult<()> {
        let server = Arc::new(self);
        let mut shutdown_rx = server.shutdown_tx.subscribe();
        let mut tasks = JoinSet::new();

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    let active = server.registry.list().await;
                    info!(active = active.len(), "shutting down listener");
                    for s in &active {
                        debug!(session_id = %s.id, peer = %s.peer, age_secs = s.age_secs, "closing session");
                    }
                    break;
                }
                conn = listener.accept() => {
                    let Some(conn) = conn else { break };
                    let server = server.clone();
                    let conn_shutdown = server.shutdown_tx.subscribe();
                    tasks.spawn(async move {
                        server.handle_connection(conn, conn_shutdown).await;
                    });
                }
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        }

        while tasks.join_next().await.is_some() {}
        Ok(())
    }

    async fn handle_connection(&self, conn: TcpConnection, shutdown_rx: broadcast::Receiver<()>) {
        let TcpConnection {
            stream,
            remote_addr,
        } = conn;
        let (read_half, write_half) = stream.into_split();
        let (tx, rx) = mpsc::unbounded_channel();
        let writer = tokio::spawn(tcp::write_loop(write_half, rx));

        let mut reader = FrameReader::new(read_half);
        if let Err(e) = self
            .session_loop(&mut reader, tx, remote_addr, shutdown_rx)
            .await
        {
            debug!(remote = %remote_addr, error = %e, "connection ended with error");
        }

        // All senders are gone; the writer flushes and closes the socket.
        if let Err(e) = writer.await {
            warn!(remote = %remote_addr, error = %e, "writer task failed");
        }
    }

    async fn session_loop(
        &self,
        reader: &mut FrameReader,
        tx: mpsc::UnboundedSender<Envelope>,
        remote_addr: SocketAddr,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> TallyResult<()> {
        let frame = tokio::select! {
            _ = shutdown_rx.recv() => {
                debug!(remote = %remote_addr, "server shutdown before open");
                queue(&tx, Envelope::shutdown("server shutdown"));
                return Ok(());
            }
            frame = self.next_frame(reader) => frame,
        };
        let first = match frame {
            Ok(Some(env)) => env,
            Ok(None) => return Ok(()),
            Err(e) => {
                report_read_error(&tx, &e);
                return Err(e);
            }
        };

        match (first.msg_type, &first.payload) {
            (MsgType::Open, Payload::Open(p)) if p.kind == ChannelKind::Shell => {
                if let Some(version) = p.version.as_deref().filter(|v| *v != PROTOCOL_VERSION) {
                    warn!(remote = %remote_addr, version, "unsupported protocol version");
                    queue(
                        &tx,
                        Envelope::open_fail(format!("unsupported protocol version: {version}")),
                    );
                    return Ok(());
                }
            }
            (msg_type, _) => {
                queue(
                    &tx,
                    Envelope::error(error_code::PROTOCOL, "expected open as first message"),
                );
                return Err(TallyError::InvalidMessage(format!(
                    "expected open, got {msg_type:?}"
                )));
            }
        }

        let session_id = match self.registry.register(remote_addr).await {
            Ok(id) => id,
            Err(e) => {
                warn!(remote = %remote_addr, error = %e, "session refused");
                queue(&tx, Envelope::open_fail(e.to_string()));
                return Ok(());
            }
        };
        queue(&tx, Envelope::open_ok(session_id.clone()));

        // `tx` stays alive until the registry entry is gone, so the client
        // cannot observe the closed socket while the slot is still taken.
        let result = self
            .drive_session(reader, &tx, &session_id, &mut shutdown_rx)
            .await;
        let _ = self.registry.remove(&session_id).await;
        result
    }

    async fn drive_session(
        &self,
        reader: &mut FrameReader,
        tx: &mpsc::UnboundedSender<Envelope>,
        session_id: &str,
        shutdown_rx: &mut broadcast::Receiver<()>,
    ) -> TallyResult<()> {
        let mut session = self.factory.start(QueuedChannel::new(tx.clone()));

        loop {
            let frame = tokio::select! {
                _ = shutdown_rx.recv() => {
                    debug!(session_id, "server shutdown, notifying client");
                    queue(tx, Envelope::shutdown("server shutdown"));
                    return Ok(());
                }
                frame = self.next_frame(reader) => frame,
            };

            let env = match frame {
                Ok(Some(env)) => env,
                Ok(None) => {
                    debug!(session_id, "peer closed before end of input");
                    return Ok(());
                }
                Err(e) => {
                    info!(session_id, error = %e, "session read failed");
                    report_read_error(tx, &e);
                    return Err(e);
                }
            };

            if env.msg_type == MsgType::Close {
                debug!(session_id, "client closed channel");
                return Ok(());
            }

            let msg_type = env.msg_type;
            match env.into_event() {
                Some(event) => {
                    if !session.dispatch(event) {
                        debug!(
                            session_id,
                            total = %session.session().total(),
                            "session terminated"
                        );
                        return Ok(());
                    }
                }
                None => {
                    warn!(session_id, ?msg_type, "unexpected message");
                    queue(
                        tx,
                        Envelope::error(
                            error_code::PROTOCOL,
                            format!("unexpected message: {msg_type:?}"),
                        ),
                    );
                }
            }
        }
    }

    /// Read the next frame, applying the idle timeout if one is configured.
    async fn next_frame(&self, reader: &mut FrameReader) -> TallyResult<Option<Envelope>> {
        match self.config.idle_timeout {
            Some(secs) => tokio::time::timeout(Duration::from_secs(secs), reader.next())
                .await
                .map_err(|_| TallyError::Timeout)?,
            None => reader.next().await,
        }
    }
}

/// Tell the client why its connection is about to close, when the socket can
/// still carry a reply.
fn report_read_error(tx: &mpsc::UnboundedSender<Envelope>, err: &TallyError) {
    match err {
        TallyError::Timeout => queue(tx, Envelope::error(error_code::TIMEOUT, "idle timeout")),
        TallyError::Codec(msg) | TallyError::InvalidMessage(msg) => queue(
            tx,
            Envelope::error(error_code::PROTOCOL, format!("undecodable frame: {msg}")),
        ),
        _ => {}
    }
}
