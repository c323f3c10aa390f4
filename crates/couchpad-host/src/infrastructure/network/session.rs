//! Per-connection task: upgrade handshake, admission and the frame loop.
//!
//! # How a session unfolds (for beginners)
//!
//! A phone's browser opens a plain TCP connection and sends an HTTP `GET`
//! with `Upgrade: websocket` and a random `Sec-WebSocket-Key`.  The server
//! answers `101 Switching Protocols` with a key derived from the client's
//! one.  From then on neither side speaks HTTP: the same socket carries
//! WebSocket frames, each a small header (opcode, length, mask key) followed
//! by the payload.  Browsers always mask what they send, so every inbound
//! payload is XORed with its 4-byte key before it is decoded.
//!
//! After the 101 the lifecycle manager decides whether the phone may stay.
//! A rejected phone gets one text frame explaining why.  An admitted one
//! gets a handle from the host and then sends one 24-byte controller record
//! per frame until somebody closes.
//!
//! # Testing without sockets
//!
//! Everything here is generic over `AsyncRead + AsyncWrite`, so tests drive
//! a session through `tokio::io::duplex` or a scripted
//! `tokio_test::io::Builder` instead of a real `TcpStream`.
//! [`handle_connection`] is the entry point the accept loop spawns for each
//! accepted socket.
//!
//! # Close rules
//!
//! | Exit                              | Close frame sent? |
//! |-----------------------------------|-------------------|
//! | Peer sent a close frame           | no                |
//! | Admin kick                        | yes               |
//! | Data payload too short to decode  | yes               |
//! | Frame rejected by the codec       | yes               |
//! | Read or write error               | no                |
//!
//! In every case the registry entry is removed and the host's disconnect
//! hook fires before the socket is released.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use couchpad_core::protocol::frame::DEFAULT_MAX_PAYLOAD;
use couchpad_core::{
    apply_mask, decode_controller_record, encode_text_frame, negotiate, Frame, FrameError,
    FrameHeader, HandshakeError, HandshakeOutcome, Opcode, RecordError, CLOSE_FRAME,
    HANDSHAKE_BUFFER_SIZE,
};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::application::client_sink::SinkError;
use crate::application::lifecycle::{AdmissionError, LifecycleManager};
use crate::application::manage_clients::Fingerprint;

/// Longest possible frame header: 2 fixed bytes, 8 length bytes, 4 key bytes.
const MAX_HEADER_LEN: usize = 14;

// ── Types ─────────────────────────────────────────────────────────────────────

/// Limits applied to every connection.
#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    pub max_frame_payload: usize,
    pub handshake_timeout: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            max_frame_payload: DEFAULT_MAX_PAYLOAD,
            handshake_timeout: Duration::from_millis(5000),
        }
    }
}

/// Errors that end a connection without a clean close.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),

    #[error("handshake rejected: {0}")]
    Handshake(#[from] HandshakeError),

    #[error("frame rejected: {0}")]
    Frame(#[from] FrameError),

    #[error("host did not accept the client: {0}")]
    Sink(#[from] SinkError),

    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),
}

/// Why the server closed an established session.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerCloseReason {
    Kicked,
    ShortPayload(RecordError),
    BadFrame(FrameError),
}

/// How a session that got past the handshake ended.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEnd {
    /// The peer sent a close frame.
    RemoteClosed,
    /// The server sent `[0x88, 0x00]` and closed.
    ServerClosed(ServerCloseReason),
    /// Admission failed; the peer got a text frame explaining why.
    Rejected(AdmissionError),
}

enum LoopExit {
    Remote,
    Server(ServerCloseReason),
    Fault(SessionError),
}

// ── Stream helpers ────────────────────────────────────────────────────────────

/// Reads exactly one frame from `reader` and unmasks its payload.
///
/// Reads the two fixed header bytes, then the rest of the header, then the
/// payload.  The declared length is checked against `max_payload` before the
/// payload buffer is allocated.
///
/// # Errors
///
/// [`SessionError::Io`] if the stream fails or ends mid-frame,
/// [`SessionError::Frame`] if the header declares an unacceptable length.
pub async fn read_frame<R>(reader: &mut R, max_payload: usize) -> Result<Frame, SessionError>
where
    R: AsyncRead + Unpin,
{
    let mut head = [0u8; MAX_HEADER_LEN];
    reader.read_exact(&mut head[..FrameHeader::BASE_LEN]).await?;
    let header_len = FrameHeader::required_len([head[0], head[1]]);
    reader
        .read_exact(&mut head[FrameHeader::BASE_LEN..header_len])
        .await?;

    let (header, _) = FrameHeader::decode(&head[..header_len])?;
    let len = header.checked_payload_len(max_payload)?;

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    if let Some(key) = header.mask_key {
        apply_mask(&mut payload, key);
    }

    Ok(Frame {
        fin: header.fin,
        opcode: header.opcode,
        payload,
    })
}

/// Writes one unmasked text frame.
pub async fn write_text<W>(writer: &mut W, text: &str) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&encode_text_frame(text)).await?;
    writer.flush().await
}

/// Writes the server close frame.
pub async fn write_close<W>(writer: &mut W) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&CLOSE_FRAME).await?;
    writer.flush().await
}

/// Performs the upgrade handshake with a single bounded read.
///
/// The reply (101 or 400) is written before returning.  On success returns
/// the client's key.
///
/// # Errors
///
/// [`SessionError::HandshakeTimeout`] if nothing arrives in time,
/// [`SessionError::Handshake`] if the request is empty or invalid.
pub async fn handshake<S>(stream: &mut S, limit: Duration) -> Result<String, SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = [0u8; HANDSHAKE_BUFFER_SIZE];
    let n = timeout(limit, stream.read(&mut buf))
        .await
        .map_err(|_| SessionError::HandshakeTimeout(limit))??;
    if n == 0 {
        return Err(HandshakeError::EmptyRequest.into());
    }

    let outcome = negotiate(&buf[..n]);
    stream.write_all(outcome.response_bytes()).await?;
    stream.flush().await?;

    match outcome {
        HandshakeOutcome::Accepted { key, .. } => Ok(key),
        HandshakeOutcome::Rejected { reason, .. } => Err(reason.into()),
    }
}

/// Best-effort shutdown of the write direction.  The read direction closes
/// when the stream is dropped.
async fn close_stream<S>(stream: &mut S)
where
    S: AsyncWrite + Unpin,
{
    if let Err(e) = stream.shutdown().await {
        debug!("shutdown failed: {e}");
    }
}

// ── Session ───────────────────────────────────────────────────────────────────

/// Spawned by the accept loop for each accepted socket.  Logs the outcome.
pub async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    lifecycle: Arc<LifecycleManager>,
    settings: SessionSettings,
) {
    let fingerprint = Fingerprint::from_addr(peer_addr);
    match run_connection(stream, fingerprint.clone(), lifecycle, settings).await {
        Ok(SessionEnd::RemoteClosed) => info!("[{fingerprint}] closed by peer"),
        Ok(SessionEnd::ServerClosed(reason)) => {
            info!("[{fingerprint}] closed by server: {reason:?}")
        }
        Ok(SessionEnd::Rejected(reason)) => info!("[{fingerprint}] rejected: {reason}"),
        Err(e) => warn!("[{fingerprint}] connection ended: {e}"),
    }
}

/// Runs one connection from handshake to close.
///
/// # Errors
///
/// Returns [`SessionError`] for a failed handshake, a host that could not
/// take the client, or a transport fault.  Registry cleanup has already
/// happened by the time an error is returned.
pub async fn run_connection<S>(
    mut stream: S,
    fingerprint: Fingerprint,
    lifecycle: Arc<LifecycleManager>,
    settings: SessionSettings,
) -> Result<SessionEnd, SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    // ── Handshake ─────────────────────────────────────────────────────────────
    if let Err(e) = handshake(&mut stream, settings.handshake_timeout).await {
        close_stream(&mut stream).await;
        return Err(e);
    }
    debug!("[{fingerprint}] handshake complete");

    // ── Admission ─────────────────────────────────────────────────────────────
    let mut kick = match lifecycle.admit(&fingerprint).await {
        Ok(kick) => kick,
        Err(rejection) => {
            if let Err(e) = write_text(&mut stream, rejection.peer_message()).await {
                debug!("[{fingerprint}] could not send rejection: {e}");
            }
            close_stream(&mut stream).await;
            drop(stream);
            lifecycle.report_rejection(rejection).await;
            return Ok(SessionEnd::Rejected(rejection));
        }
    };

    let handle = match lifecycle.connect(&fingerprint).await {
        Ok(handle) => handle,
        Err(e) => {
            if let Err(io) = write_close(&mut stream).await {
                debug!("[{fingerprint}] could not send close: {io}");
            }
            close_stream(&mut stream).await;
            return Err(e.into());
        }
    };

    // ── Frame loop ────────────────────────────────────────────────────────────
    let exit = loop {
        tokio::select! {
            _ = &mut kick => break LoopExit::Server(ServerCloseReason::Kicked),
            frame = read_frame(&mut stream, settings.max_frame_payload) => {
                let frame = match frame {
                    Ok(frame) => frame,
                    Err(SessionError::Frame(e)) => {
                        warn!("[{fingerprint}] {e}");
                        break LoopExit::Server(ServerCloseReason::BadFrame(e));
                    }
                    Err(e) => break LoopExit::Fault(e),
                };

                match frame.opcode {
                    Opcode::Close => break LoopExit::Remote,
                    Opcode::Ping | Opcode::Pong => {
                        debug!("[{fingerprint}] skipped {:?} frame", frame.opcode);
                    }
                    _ => match decode_controller_record(0, &frame.payload) {
                        Ok(record) => lifecycle.deliver_input(&fingerprint, handle, record).await,
                        Err(e) => {
                            warn!("[{fingerprint}] {e}");
                            break LoopExit::Server(ServerCloseReason::ShortPayload(e));
                        }
                    },
                }
            }
        }
    };

    // ── Cleanup ───────────────────────────────────────────────────────────────
    lifecycle.release(&fingerprint).await;

    let result = match exit {
        LoopExit::Remote => Ok(SessionEnd::RemoteClosed),
        LoopExit::Server(reason) => {
            if let Err(e) = write_close(&mut stream).await {
                debug!("[{fingerprint}] could not send close: {e}");
            }
            Ok(SessionEnd::ServerClosed(reason))
        }
        LoopExit::Fault(e) => Err(e),
    };
    close_stream(&mut stream).await;
    result
}

// ── Tests ─────────────────────────────────────────────────────────────────────
