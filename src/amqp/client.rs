//! Blocking AMQP 1.0 sender client.
//!
//! Just enough of the sender side to feed the gateway: header exchange, one
//! session, one link, unsettled transfers with disposition readback. Used by
//! `portico send` and the integration tests.

use crate::amqp::frames::{
    codes, encode_frame, parse_frame, terminus, Attach, Begin, Close, DeliveryState, Open,
    Performative, Role, Transfer, MAX_FRAME_SIZE, PROTOCOL_HEADER,
};
use crate::amqp::message::encode_message;
use crate::amqp::value::AmqpValue;
use anyhow::{bail, Context, Result};
use bytes::{Buf, Bytes, BytesMut};
use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;
use uuid::Uuid;

const IO_TIMEOUT: Duration = Duration::from_secs(5);
const CHANNEL: u16 = 0;
const HANDLE: u32 = 0;

/// One connection with one sending link.
pub struct SenderClient {
    stream: TcpStream,
    inbuf: BytesMut,
    next_delivery_id: u32,
    link_open: bool,
}

impl SenderClient {
    /// Connect, exchange protocol headers, and open the connection.
    pub fn connect(addr: SocketAddr) -> Result<Self> {
        let mut stream = TcpStream::connect(addr).with_context(|| format!("connecting {addr}"))?;
        stream
            .set_read_timeout(Some(IO_TIMEOUT))
            .context("setting read timeout")?;
        stream.set_nodelay(true).context("setting nodelay")?;

        stream
            .write_all(&PROTOCOL_HEADER)
            .context("writing protocol header")?;
        let mut header = [0u8; 8];
        stream
            .read_exact(&mut header)
            .context("reading protocol header")?;
        if header != PROTOCOL_HEADER {
            bail!("server answered with unsupported protocol header {header:02X?}");
        }

        let mut client = Self {
            stream,
            inbuf: BytesMut::new(),
            next_delivery_id: 0,
            link_open: false,
        };
        client.send_performative(
            CHANNEL,
            &Performative::Open(Open {
                container_id: format!("portico-send-{}", Uuid::new_v4()),
                hostname: None,
                max_frame_size: MAX_FRAME_SIZE,
                channel_max: u16::MAX,
            }),
            &[],
        )?;
        loop {
            match client.next_performative().context("waiting for open")? {
                (_, Performative::Open(_)) => break,
                (_, Performative::Close(close)) => bail!(close_reason(&close)),
                (_, other) => bail!("expected open, got {other:?}"),
            }
        }
        Ok(client)
    }

    /// Begin a session and attach a sending link for `target`.
    ///
    /// Fails when the gateway has no mapping for the target; the server
    /// answers that case by closing the whole connection.
    pub fn open_link(&mut self, target: &str) -> Result<()> {
        self.send_performative(
            CHANNEL,
            &Performative::Begin(Begin {
                remote_channel: None,
                next_outgoing_id: 0,
                incoming_window: 2_048,
                outgoing_window: 2_048,
            }),
            &[],
        )?;
        match self.next_performative().context("waiting for begin")? {
            (_, Performative::Begin(_)) => {}
            (_, Performative::Close(close)) => bail!(close_reason(&close)),
            (_, other) => bail!("expected begin, got {other:?}"),
        }

        self.send_performative(
            CHANNEL,
            &Performative::Attach(Attach {
                name: format!("portico-link-{}", Uuid::new_v4()),
                handle: HANDLE,
                role: Role::Sender,
                snd_settle_mode: None,
                rcv_settle_mode: Some(0),
                source: Some(terminus(codes::SOURCE, "portico-client")),
                target: Some(terminus(codes::TARGET, target)),
                initial_delivery_count: Some(0),
            }),
            &[],
        )?;

        let mut attached = false;
        loop {
            match self.next_performative().context("waiting for attach")? {
                (_, Performative::Attach(_)) => attached = true,
                // Credit grant means the link is ready to carry transfers.
                (_, Performative::Flow(flow)) if attached => {
                    if flow.link_credit.unwrap_or(0) == 0 {
                        bail!("server granted no link credit");
                    }
                    self.link_open = true;
                    return Ok(());
                }
                (_, Performative::Close(close)) => bail!(close_reason(&close)),
                (_, Performative::Detach(detach)) => {
                    bail!(
                        "link detached by server: {}",
                        detach
                            .error
                            .map(|e| e.condition)
                            .unwrap_or_else(|| "no error given".into())
                    );
                }
                (_, other) => bail!("unexpected performative during attach: {other:?}"),
            }
        }
    }

    /// Send one message and wait for its disposition.
    pub fn send(
        &mut self,
        properties: Option<&[(AmqpValue, AmqpValue)]>,
        payload: &[u8],
    ) -> Result<DeliveryState> {
        self.send_raw_message(&encode_message(properties, payload), usize::MAX)
    }

    /// Send one message split across several transfer frames.
    pub fn send_chunked(
        &mut self,
        properties: Option<&[(AmqpValue, AmqpValue)]>,
        payload: &[u8],
        chunk_size: usize,
    ) -> Result<DeliveryState> {
        self.send_raw_message(&encode_message(properties, payload), chunk_size.max(1))
    }

    /// Send raw section bytes as one delivery and wait for its disposition.
    pub fn send_raw_message(&mut self, sections: &[u8], chunk_size: usize) -> Result<DeliveryState> {
        if !self.link_open {
            bail!("no open link");
        }
        let delivery_id = self.next_delivery_id;
        self.next_delivery_id += 1;

        let chunks: Vec<&[u8]> = if sections.is_empty() {
            vec![&[]]
        } else {
            sections.chunks(chunk_size.min(sections.len())).collect()
        };
        let last = chunks.len() - 1;
        for (index, chunk) in chunks.iter().enumerate() {
            self.send_performative(
                CHANNEL,
                &Performative::Transfer(Transfer {
                    handle: HANDLE,
                    delivery_id: Some(delivery_id),
                    delivery_tag: Some(Bytes::copy_from_slice(&delivery_id.to_be_bytes())),
                    message_format: Some(0),
                    settled: Some(false),
                    more: index != last,
                }),
                chunk,
            )?;
        }

        loop {
            match self.next_performative().context("waiting for disposition")? {
                (_, Performative::Disposition(disposition)) => {
                    let covers = disposition.first <= delivery_id
                        && delivery_id <= disposition.last.unwrap_or(disposition.first);
                    if covers {
                        return disposition
                            .state
                            .context("disposition carried no delivery state");
                    }
                }
                (_, Performative::Flow(_)) => {} // credit replenishment
                (_, Performative::Close(close)) => bail!(close_reason(&close)),
                (_, other) => bail!("unexpected performative awaiting disposition: {other:?}"),
            }
        }
    }

    /// Close the connection cleanly.
    pub fn close(mut self) -> Result<()> {
        self.send_performative(CHANNEL, &Performative::Close(Close { error: None }), &[])?;
        loop {
            match self.next_performative() {
                Ok((_, Performative::Close(_))) => return Ok(()),
                Ok(_) => {}
                // Server may drop the socket right after its close frame.
                Err(_) => return Ok(()),
            }
        }
    }

    fn send_performative(
        &mut self,
        channel: u16,
        performative: &Performative,
        payload: &[u8],
    ) -> Result<()> {
        let frame = encode_frame(channel, performative, payload);
        self.stream.write_all(&frame).context("writing frame")?;
        Ok(())
    }

    /// Block until the next non-keepalive performative arrives.
    fn next_performative(&mut self) -> Result<(u16, Performative)> {
        loop {
            if let Some((frame, consumed)) = parse_frame(&self.inbuf)? {
                self.inbuf.advance(consumed);
                if let Some(performative) = frame.performative {
                    return Ok((frame.channel, performative));
                }
                continue;
            }
            let mut chunk = [0u8; 8 * 1024];
            match self.stream.read(&mut chunk) {
                Ok(0) => bail!("connection closed by server"),
                Ok(n) => self.inbuf.extend_from_slice(&chunk[..n]),
                Err(err)
                    if err.kind() == ErrorKind::WouldBlock || err.kind() == ErrorKind::TimedOut =>
                {
                    bail!("timed out waiting for server frame")
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => {}
                Err(err) => return Err(err).context("reading frame"),
            }
        }
    }
}

fn close_reason(close: &Close) -> String {
    match &close.error {
        Some(error) => format!(
            "connection closed by server: {} ({})",
            error.condition,
            error.description.as_deref().unwrap_or("no description")
        ),
        None => "connection closed by server".into(),
    }
}
