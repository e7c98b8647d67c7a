//! Per-connection protocol driving.
//!
//! Each accepted socket becomes a [`Connection`] stepped once per worker tick:
//! non-blocking read, synchronous frame dispatch, write flush. All protocol
//! transitions surface as [`ConnectionEvent`]s dispatched on the worker thread
//! only, so connection state needs no locking. `closed` transitions
//! false→true at most once and is terminal.

use super::session::{self, Session};
use crate::amqp::frames::{
    encode_frame, parse_frame, Attach, Begin, Close, Detach, End, ErrorCondition, Frame, Open,
    Performative, Transfer, MAX_FRAME_SIZE, PROTOCOL_HEADER,
};
use crate::broker::Broker;
use crate::modules::mapping::MappingTable;
use bytes::{Buf, Bytes, BytesMut};
use std::collections::HashMap;
use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpStream};
use tracing::{debug, error, info, trace, warn};

const READ_CHUNK: usize = 8 * 1024;

/// Shared worker context handed into every step.
pub(super) struct StepCtx<'a> {
    pub broker: &'a dyn Broker,
    pub mappings: &'a MappingTable,
    pub container_id: &'a str,
}

/// Explicit protocol transition, produced by frame handling and dispatched
/// synchronously from the poll loop.
#[derive(Debug)]
pub(super) enum ConnectionEvent {
    SessionOpened { channel: u16, begin: Begin },
    LinkAttached { channel: u16, attach: Attach },
    MessageReceived { channel: u16, transfer: Transfer, payload: Bytes },
    LinkDetached { channel: u16, detach: Detach },
    SessionEnded { channel: u16, end: End },
    PeerClosed { close: Close },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Accepted; protocol header not yet exchanged.
    HeaderExchange,
    /// Header exchanged; waiting for the peer's open.
    Opening,
    /// Open negotiated; sessions and links may come and go.
    Open,
}

pub(super) struct Connection {
    stream: TcpStream,
    peer: SocketAddr,
    inbuf: BytesMut,
    outbuf: BytesMut,
    phase: Phase,
    sessions: HashMap<u16, Session>,
    closed: bool,
    eof: bool,
}

impl Connection {
    pub(super) fn accept(stream: TcpStream, peer: SocketAddr) -> std::io::Result<Self> {
        stream.set_nonblocking(true)?;
        stream.set_nodelay(true)?;
        Ok(Self {
            stream,
            peer,
            inbuf: BytesMut::with_capacity(READ_CHUNK),
            outbuf: BytesMut::new(),
            phase: Phase::HeaderExchange,
            sessions: HashMap::new(),
            closed: false,
            eof: false,
        })
    }

    pub(super) fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub(super) fn closed(&self) -> bool {
        self.closed
    }

    /// Drive the connection once. Returns true when any bytes moved.
    pub(super) fn step(&mut self, ctx: &StepCtx<'_>) -> bool {
        if self.closed {
            return false;
        }
        let read = self.fill_inbuf();
        self.process(ctx);
        let wrote = self.flush_outbuf();
        if self.eof && !self.closed && self.outbuf.is_empty() {
            info!(peer = %self.peer, "client disconnected");
            self.closed = true;
        }
        read || wrote
    }

    /// Queue a close performative with `error` and mark the connection for
    /// sweeping. The frame goes out on the next flush, best effort.
    pub(super) fn close_with_error(&mut self, error: ErrorCondition) {
        if self.closed {
            return;
        }
        warn!(peer = %self.peer, condition = %error.condition,
            description = error.description.as_deref().unwrap_or(""),
            "closing connection");
        if self.phase != Phase::HeaderExchange {
            queue_frame(
                &mut self.outbuf,
                0,
                &Performative::Close(Close { error: Some(error) }),
                &[],
            );
        }
        let _ = self.flush_outbuf();
        self.closed = true;
    }

    /// Force-close during module teardown.
    pub(super) fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        if self.phase == Phase::Open {
            queue_frame(
                &mut self.outbuf,
                0,
                &Performative::Close(Close { error: None }),
                &[],
            );
            let _ = self.flush_outbuf();
        }
        self.closed = true;
    }

    fn fill_inbuf(&mut self) -> bool {
        let mut any = false;
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => {
                    self.eof = true;
                    break;
                }
                Ok(n) => {
                    self.inbuf.extend_from_slice(&chunk[..n]);
                    any = true;
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == ErrorKind::Interrupted => {}
                Err(err) => {
                    debug!(peer = %self.peer, "socket read failed: {err}");
                    self.eof = true;
                    break;
                }
            }
        }
        any
    }

    fn flush_outbuf(&mut self) -> bool {
        let mut any = false;
        while !self.outbuf.is_empty() {
            match self.stream.write(&self.outbuf) {
                Ok(0) => {
                    self.eof = true;
                    break;
                }
                Ok(n) => {
                    self.outbuf.advance(n);
                    any = true;
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == ErrorKind::Interrupted => {}
                Err(err) => {
                    debug!(peer = %self.peer, "socket write failed: {err}");
                    self.eof = true;
                    self.outbuf.clear();
                    break;
                }
            }
        }
        any
    }

    fn process(&mut self, ctx: &StepCtx<'_>) {
        if self.phase == Phase::HeaderExchange {
            if self.inbuf.len() < PROTOCOL_HEADER.len() {
                return;
            }
            let header = self.inbuf.split_to(PROTOCOL_HEADER.len());
            // Answer with our header either way; a TLS/SASL header is refused.
            self.outbuf.extend_from_slice(&PROTOCOL_HEADER);
            if header[..] != PROTOCOL_HEADER {
                warn!(peer = %self.peer, "unsupported protocol header {:02X?}", &header[..]);
                let _ = self.flush_outbuf();
                self.closed = true;
                return;
            }
            trace!(peer = %self.peer, "protocol header exchanged");
            self.phase = Phase::Opening;
        }

        while !self.closed {
            let (frame, consumed) = match parse_frame(&self.inbuf) {
                Ok(Some(parsed)) => parsed,
                Ok(None) => {
                    // Guard against a peer that streams bytes without ever
                    // completing a frame.
                    if self.inbuf.len() > 2 * MAX_FRAME_SIZE as usize {
                        self.close_with_error(ErrorCondition::new(
                            "amqp:resource-limit-exceeded",
                            "inbound buffer overrun",
                        ));
                    }
                    break;
                }
                Err(err) => {
                    error!(peer = %self.peer, "frame decode failed: {err:#}");
                    self.close_with_error(ErrorCondition::new(
                        "amqp:decode-error",
                        format!("{err:#}"),
                    ));
                    return;
                }
            };
            self.inbuf.advance(consumed);
            self.handle_frame(frame, ctx);
        }
    }

    fn handle_frame(&mut self, frame: Frame, ctx: &StepCtx<'_>) {
        let Some(performative) = frame.performative else {
            trace!(peer = %self.peer, "keepalive frame");
            return;
        };
        match self.phase {
            Phase::HeaderExchange => unreachable!("frames are not parsed before the header"),
            Phase::Opening => match performative {
                Performative::Open(open) => {
                    debug!(peer = %self.peer, container = %open.container_id, "connection open");
                    queue_frame(
                        &mut self.outbuf,
                        0,
                        &Performative::Open(Open {
                            container_id: ctx.container_id.to_string(),
                            hostname: None,
                            max_frame_size: MAX_FRAME_SIZE,
                            channel_max: u16::MAX,
                        }),
                        &[],
                    );
                    self.phase = Phase::Open;
                }
                other => {
                    self.close_with_error(ErrorCondition::new(
                        "amqp:not-allowed",
                        format!("expected open, got {}", performative_name(&other)),
                    ));
                }
            },
            Phase::Open => {
                if matches!(performative, Performative::Open(_)) {
                    self.close_with_error(ErrorCondition::new("amqp:not-allowed", "duplicate open"));
                    return;
                }
                if let Some(event) = event_for(frame.channel, performative, frame.payload) {
                    self.dispatch(event, ctx);
                }
            }
        }
    }

    fn dispatch(&mut self, event: ConnectionEvent, ctx: &StepCtx<'_>) {
        let result = match event {
            ConnectionEvent::SessionOpened { channel, begin } => {
                session::on_session_open(&mut self.sessions, &mut self.outbuf, channel, &begin)
            }
            ConnectionEvent::LinkAttached { channel, attach } => {
                match self.sessions.get_mut(&channel) {
                    Some(open_session) => session::on_link_attach(
                        open_session,
                        &mut self.outbuf,
                        ctx.mappings,
                        attach,
                    ),
                    None => Err(unknown_channel(channel)),
                }
            }
            ConnectionEvent::MessageReceived {
                channel,
                transfer,
                payload,
            } => match self.sessions.get_mut(&channel) {
                Some(open_session) => session::on_transfer(
                    open_session,
                    &mut self.outbuf,
                    ctx.broker,
                    transfer,
                    payload,
                ),
                None => Err(unknown_channel(channel)),
            },
            ConnectionEvent::LinkDetached { channel, detach } => {
                match self.sessions.get_mut(&channel) {
                    Some(open_session) => {
                        session::on_link_detach(open_session, &mut self.outbuf, &detach)
                    }
                    None => Err(unknown_channel(channel)),
                }
            }
            ConnectionEvent::SessionEnded { channel, end } => {
                if let Some(err) = end.error {
                    warn!(peer = %self.peer, channel, condition = %err.condition, "session ended by peer with error");
                }
                match self.sessions.remove(&channel) {
                    Some(_) => {
                        queue_frame(
                            &mut self.outbuf,
                            channel,
                            &Performative::End(End { error: None }),
                            &[],
                        );
                        debug!(peer = %self.peer, channel, "session ended");
                        Ok(())
                    }
                    None => Err(unknown_channel(channel)),
                }
            }
            ConnectionEvent::PeerClosed { close } => {
                if let Some(err) = close.error {
                    warn!(peer = %self.peer, condition = %err.condition, "peer closed with error");
                } else {
                    debug!(peer = %self.peer, "peer closed");
                }
                queue_frame(
                    &mut self.outbuf,
                    0,
                    &Performative::Close(Close { error: None }),
                    &[],
                );
                let _ = self.flush_outbuf();
                self.closed = true;
                Ok(())
            }
        };
        if let Err(error) = result {
            self.close_with_error(error);
        }
    }
}

fn event_for(channel: u16, performative: Performative, payload: Bytes) -> Option<ConnectionEvent> {
    match performative {
        Performative::Begin(begin) => Some(ConnectionEvent::SessionOpened { channel, begin }),
        Performative::Attach(attach) => Some(ConnectionEvent::LinkAttached { channel, attach }),
        Performative::Transfer(transfer) => Some(ConnectionEvent::MessageReceived {
            channel,
            transfer,
            payload,
        }),
        Performative::Detach(detach) => Some(ConnectionEvent::LinkDetached { channel, detach }),
        Performative::End(end) => Some(ConnectionEvent::SessionEnded { channel, end }),
        Performative::Close(close) => Some(ConnectionEvent::PeerClosed { close }),
        // Sender-side bookkeeping; nothing for a receive-only server to do.
        Performative::Flow(_) | Performative::Disposition(_) => {
            trace!(channel, "ignoring peer flow/disposition");
            None
        }
        Performative::Open(_) => None, // handled before event conversion
    }
}

fn unknown_channel(channel: u16) -> ErrorCondition {
    ErrorCondition::new(
        "amqp:not-allowed",
        format!("no session on channel {channel}"),
    )
}

fn performative_name(performative: &Performative) -> &'static str {
    match performative {
        Performative::Open(_) => "open",
        Performative::Begin(_) => "begin",
        Performative::Attach(_) => "attach",
        Performative::Flow(_) => "flow",
        Performative::Transfer(_) => "transfer",
        Performative::Disposition(_) => "disposition",
        Performative::Detach(_) => "detach",
        Performative::End(_) => "end",
        Performative::Close(_) => "close",
    }
}

/// Append one encoded frame to a connection's output buffer.
pub(super) fn queue_frame(
    out: &mut BytesMut,
    channel: u16,
    performative: &Performative,
    payload: &[u8],
) {
    out.extend_from_slice(&encode_frame(channel, performative, payload));
}
