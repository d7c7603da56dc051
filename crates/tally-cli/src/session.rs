//! One summing session against a tally server.
//!
//! Opens a shell channel, streams local input line by line, forwards an
//! interrupt as a break, and relays the server's output until it exits.

use anyhow::{bail, Context, Result};
use std::future::Future;
use tally_core::{frame_encode, DataStream, Envelope, FrameDecoder, MsgType, Payload};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// How the client signals that input is finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ending {
    Eof,
    SoftEof,
}

/// Local streams a session reads from and writes to.
pub struct SessionIo<R, O, E> {
    pub input: R,
    pub stdout: O,
    pub stderr: E,
}

/// Run a session against `addr` and return the remote exit status.
///
/// `interrupt` resolving sends a single break to the server.
pub async fn run<R, O, E>(
    addr: &str,
    io: SessionIo<R, O, E>,
    ending: Ending,
    interrupt: impl Future<Output = ()>,
) -> Result<u32>
where
    R: AsyncBufRead + Unpin + Send + 'static,
    O: AsyncWrite + Unpin,
    E: AsyncWrite + Unpin,
{
    let SessionIo {
        input,
        mut stdout,
        mut stderr,
    } = io;

    let stream = TcpStream::connect(addr)
        .await
        .with_context(|| format!("failed to connect to {addr}"))?;
    let (read_half, mut write_half) = stream.into_split();
    let mut frames = Frames::new(read_half);

    tokio::pin!(interrupt);

    send(&mut write_half, &Envelope::open()).await?;
    loop {
        let frame = tokio::select! {
            _ = &mut interrupt => bail!("interrupted before the session opened"),
            frame = frames.next() => frame?,
        };
        let Some(env) = frame else {
            bail!("connection closed during open");
        };
        match (env.msg_type, env.payload) {
            (MsgType::OpenOk, Payload::OpenOk(p)) => {
                info!(session_id = %p.session_id, "session opened");
                break;
            }
            (MsgType::OpenFail, Payload::Reason(p)) => bail!("session refused: {}", p.reason),
            (MsgType::Error, Payload::Error(p)) => bail!("server error: {}", p.message),
            (other, _) => debug!(?other, "ignoring frame before open completed"),
        }
    }

    let (input_tx, mut input_rx) = mpsc::channel::<Envelope>(64);
    tokio::spawn(pump_input(input, input_tx, ending));

    let mut interrupted = false;
    let mut input_done = false;
    let mut exit_status = None;

    loop {
        tokio::select! {
            _ = &mut interrupt, if !interrupted => {
                interrupted = true;
                debug!("interrupt, sending break");
                send(&mut write_half, &Envelope::brk(0)).await?;
            }
            env = input_rx.recv(), if !input_done => match env {
                Some(env) => send(&mut write_half, &env).await?,
                None => input_done = true,
            },
            frame = frames.next() => {
                let Some(env) = frame? else { break };
                match (env.msg_type, env.payload) {
                    (MsgType::Data, Payload::Data(d)) => match d.stream {
                        DataStream::Stderr => write_flush(&mut stderr, &d.text).await?,
                        _ => write_flush(&mut stdout, &d.text).await?,
                    },
                    (MsgType::Exit, Payload::Exit(p)) => exit_status = Some(p.status),
                    (MsgType::Error, Payload::Error(p)) => {
                        warn!(code = p.code, message = %p.message, "server error");
                        write_flush(&mut stderr, &format!("tally: server error: {}\n", p.message)).await?;
                    }
                    (MsgType::Shutdown, Payload::Reason(p)) => bail!("server shut down: {}", p.reason),
                    (other, _) => debug!(?other, "ignoring frame"),
                }
            }
        }
    }

    exit_status.context("connection closed before exit status")
}

/// Read `input` line by line and queue `Data` frames, then the ending marker.
async fn pump_input<R>(mut input: R, tx: mpsc::Sender<Envelope>, ending: Ending)
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        match input.read_line(&mut line).await {
            Ok(0) => break,
            Ok(_) => {
                if tx
                    .send(Envelope::data(DataStream::Stdin, line.as_str()))
                    .await
                    .is_err()
                {
                    return;
                }
            }
            Err(e) => {
                warn!(error = %e, "failed to read input");
                break;
            }
        }
    }

    let marker = match ending {
        Ending::Eof => Envelope::eof(),
        Ending::SoftEof => Envelope::soft_eof(),
    };
    let _ = tx.send(marker).await;
}

async fn send(half: &mut OwnedWriteHalf, env: &Envelope) -> Result<()> {
    let frame = frame_encode(env)?;
    half.write_all(&frame).await.context("failed to send frame")
}

async fn write_flush<W: AsyncWrite + Unpin>(w: &mut W, text: &str) -> Result<()> {
    w.write_all(text.as_bytes()).await?;
    w.flush().await?;
    Ok(())
}

/// Buffered envelope reader over the socket.
struct Frames {
    half: OwnedReadHalf,
    decoder: FrameDecoder,
    queue: std::collections::VecDeque<Envelope>,
}

impl Frames {
    fn new(half: OwnedReadHalf) -> Self {
        Self {
            half,
            decoder: FrameDecoder::new(),
            queue: Default::default(),
        }
    }

    async fn next(&mut self) -> Result<Option<Envelope>> {
        let mut buf = [0u8; 4096];
        loop {
            if let Some(env) = self.queue.pop_front() {
                return Ok(Some(env));
            }
            let n = self.half.read(&mut buf).await.context("read failed")?;
            if n == 0 {
                return Ok(None);
            }
            let decoded: Vec<Envelope> = self.decoder.feed(&buf[..n])?;
            self.queue.extend(decoded);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    /// Minimal server: accepts one connection, sums stdin data naively, and
    /// records every frame it received. `data_seen` fires on the first `Data`.
    async fn fake_server(
        refuse: bool,
        mut data_seen: Option<oneshot::Sender<()>>,
    ) -> (String, tokio::task::JoinHandle<Vec<Envelope>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let handle = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read_half, mut write_half) = stream.into_split();
            let mut frames = Frames::new(read_half);
            let mut seen = Vec::new();

            let open = frames.next().await.unwrap().unwrap();
            assert_eq!(open.msg_type, MsgType::Open);
            seen.push(open);
            if refuse {
                send(&mut write_half, &Envelope::open_fail("session limit reached"))
                    .await
                    .unwrap();
                return seen;
            }
            send(&mut write_half, &Envelope::open_ok("abc123")).await.unwrap();

            let mut total = 0i64;
            while let Some(env) = frames.next().await.unwrap() {
                let msg_type = env.msg_type;
                if let Payload::Data(d) = &env.payload {
                    if let Some(seen_tx) = data_seen.take() {
                        let _ = seen_tx.send(());
                    }
                    match d.text.trim().parse::<i64>() {
                        Ok(v) => total += v,
                        Err(_) => {
                            let msg = format!("Invalid number: {}", d.text);
                            send(&mut write_half, &Envelope::data(DataStream::Stderr, msg))
                                .await
                                .unwrap();
                        }
                    }
                }
                seen.push(env);
                if matches!(msg_type, MsgType::Eof | MsgType::SoftEof | MsgType::Break) {
                    let report = format!("Total = {total}\n");
                    send(&mut write_half, &Envelope::data(DataStream::Stdout, report))
                        .await
                        .unwrap();
                    send(&mut write_half, &Envelope::exit(0)).await.unwrap();
                    break;
                }
            }
            seen
        });

        (addr, handle)
    }

    fn io(input: &'static str) -> SessionIo<&'static [u8], Vec<u8>, Vec<u8>> {
        SessionIo {
            input: input.as_bytes(),
            stdout: Vec::new(),
            stderr: Vec::new(),
        }
    }

    #[tokio::test]
    async fn streams_lines_and_returns_status() {
        let (addr, server) = fake_server(false, None).await;
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let status = run(
            &addr,
            SessionIo {
                input: "3\n4\nx\n".as_bytes(),
                stdout: &mut stdout,
                stderr: &mut stderr,
            },
            Ending::Eof,
            std::future::pending(),
        )
        .await
        .unwrap();

        assert_eq!(status, 0);
        assert_eq!(String::from_utf8(stdout).unwrap(), "Total = 7\n");
        assert_eq!(String::from_utf8(stderr).unwrap(), "Invalid number: x\n");

        let seen = server.await.unwrap();
        let types: Vec<MsgType> = seen.iter().map(|e| e.msg_type).collect();
        assert_eq!(
            types,
            vec![
                MsgType::Open,
                MsgType::Data,
                MsgType::Data,
                MsgType::Data,
                MsgType::Eof
            ]
        );
    }

    #[tokio::test]
    async fn soft_eof_ending() {
        let (addr, server) = fake_server(false, None).await;
        let status = run(&addr, io("5"), Ending::SoftEof, std::future::pending())
            .await
            .unwrap();
        assert_eq!(status, 0);

        let seen = server.await.unwrap();
        assert_eq!(seen.last().unwrap().msg_type, MsgType::SoftEof);
        // The unterminated fragment is still forwarded as-is.
        assert!(matches!(&seen[1].payload, Payload::Data(d) if d.text == "5"));
    }

    #[tokio::test]
    async fn interrupt_sends_break() {
        let (seen_tx, seen_rx) = oneshot::channel();
        let (addr, server) = fake_server(false, Some(seen_tx)).await;
        let (mut input_w, input_r) = tokio::io::duplex(64);
        input_w.write_all(b"2\n").await.unwrap();

        let status = run(
            &addr,
            SessionIo {
                input: tokio::io::BufReader::new(input_r),
                stdout: Vec::new(),
                stderr: Vec::new(),
            },
            Ending::Eof,
            async {
                let _ = seen_rx.await;
            },
        )
        .await
        .unwrap();
        drop(input_w);

        assert_eq!(status, 0);
        let seen = server.await.unwrap();
        assert_eq!(seen.last().unwrap().msg_type, MsgType::Break);
    }

    #[tokio::test]
    async fn interrupt_during_open_aborts() {
        // Accepts the connection but never answers the open.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(std::time::Duration::from_secs(5)).await;
            drop(stream);
        });

        let err = run(&addr, io("1\n"), Ending::Eof, async {})
            .await
            .unwrap_err();
        assert!(err.to_string().contains("interrupted before the session opened"));
        server.abort();
    }

    #[tokio::test]
    async fn refused_open_is_an_error() {
        let (addr, _server) = fake_server(true, None).await;
        let err = run(&addr, io(""), Ending::Eof, std::future::pending())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("session refused"));
    }
}
