//! AMQP 1.0 framing and performatives.
//!
//! Frames are `{u32 size, u8 doff, u8 type, u16 channel}` followed by one
//! described-list performative and an optional payload (transfers). Only the
//! plain AMQP protocol header is spoken — TLS and SASL headers are refused.

use crate::amqp::value::{decode_value, encode_value, read_u16, read_u32, read_u8, AmqpValue};
use anyhow::{bail, Context, Result};
use bytes::Bytes;

/// `AMQP` + protocol id 0 + version 1.0.0.
pub const PROTOCOL_HEADER: [u8; 8] = *b"AMQP\x00\x01\x00\x00";

/// Largest frame either side of this gateway will accept.
pub const MAX_FRAME_SIZE: u32 = 1024 * 1024;

const FRAME_HEADER_LEN: usize = 8;
const FRAME_TYPE_AMQP: u8 = 0x00;

pub mod codes {
    pub const OPEN: u64 = 0x10;
    pub const BEGIN: u64 = 0x11;
    pub const ATTACH: u64 = 0x12;
    pub const FLOW: u64 = 0x13;
    pub const TRANSFER: u64 = 0x14;
    pub const DISPOSITION: u64 = 0x15;
    pub const DETACH: u64 = 0x16;
    pub const END: u64 = 0x17;
    pub const CLOSE: u64 = 0x18;
    pub const ERROR: u64 = 0x1D;
    pub const ACCEPTED: u64 = 0x24;
    pub const REJECTED: u64 = 0x25;
    pub const RELEASED: u64 = 0x26;
    pub const SOURCE: u64 = 0x28;
    pub const TARGET: u64 = 0x29;
}

/// Link endpoint role. On the wire: sender = false, receiver = true.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Sender,
    Receiver,
}

impl Role {
    fn from_bool(v: bool) -> Self {
        if v {
            Role::Receiver
        } else {
            Role::Sender
        }
    }

    fn to_bool(self) -> bool {
        matches!(self, Role::Receiver)
    }
}

#[derive(Debug, Clone)]
pub struct Open {
    pub container_id: String,
    pub hostname: Option<String>,
    pub max_frame_size: u32,
    pub channel_max: u16,
}

impl Default for Open {
    fn default() -> Self {
        Self {
            container_id: String::new(),
            hostname: None,
            max_frame_size: MAX_FRAME_SIZE,
            channel_max: u16::MAX,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Begin {
    pub remote_channel: Option<u16>,
    pub next_outgoing_id: u32,
    pub incoming_window: u32,
    pub outgoing_window: u32,
}

#[derive(Debug, Clone)]
pub struct Attach {
    pub name: String,
    pub handle: u32,
    pub role: Role,
    pub snd_settle_mode: Option<u8>,
    pub rcv_settle_mode: Option<u8>,
    pub source: Option<AmqpValue>,
    pub target: Option<AmqpValue>,
    pub initial_delivery_count: Option<u32>,
}

impl Attach {
    /// Address string out of the target terminus, if one was carried.
    pub fn target_address(&self) -> Option<&str> {
        terminus_address(self.target.as_ref()?, codes::TARGET)
    }

    pub fn source_address(&self) -> Option<&str> {
        terminus_address(self.source.as_ref()?, codes::SOURCE)
    }
}

fn terminus_address(value: &AmqpValue, code: u64) -> Option<&str> {
    if value.descriptor_code() != Some(code) {
        return None;
    }
    match value {
        AmqpValue::Described(_, inner) => match inner.as_ref() {
            AmqpValue::List(fields) => fields.first().and_then(AmqpValue::as_str),
            _ => None,
        },
        _ => None,
    }
}

/// Build a source/target terminus carrying just an address.
pub fn terminus(code: u64, address: &str) -> AmqpValue {
    AmqpValue::described(code, AmqpValue::List(vec![AmqpValue::String(address.into())]))
}

#[derive(Debug, Clone)]
pub struct Flow {
    pub next_incoming_id: Option<u32>,
    pub incoming_window: u32,
    pub next_outgoing_id: u32,
    pub outgoing_window: u32,
    pub handle: Option<u32>,
    pub delivery_count: Option<u32>,
    pub link_credit: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct Transfer {
    pub handle: u32,
    pub delivery_id: Option<u32>,
    pub delivery_tag: Option<Bytes>,
    pub message_format: Option<u32>,
    pub settled: Option<bool>,
    pub more: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryState {
    Accepted,
    Rejected(Option<ErrorCondition>),
    Released,
}

#[derive(Debug, Clone)]
pub struct Disposition {
    pub role: Role,
    pub first: u32,
    pub last: Option<u32>,
    pub settled: bool,
    pub state: Option<DeliveryState>,
}

#[derive(Debug, Clone)]
pub struct Detach {
    pub handle: u32,
    pub closed: bool,
    pub error: Option<ErrorCondition>,
}

#[derive(Debug, Clone)]
pub struct End {
    pub error: Option<ErrorCondition>,
}

#[derive(Debug, Clone)]
pub struct Close {
    pub error: Option<ErrorCondition>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ErrorCondition {
    pub condition: String,
    pub description: Option<String>,
}

impl ErrorCondition {
    pub fn new(condition: &str, description: impl Into<String>) -> Self {
        Self {
            condition: condition.to_string(),
            description: Some(description.into()),
        }
    }
}

#[derive(Debug, Clone)]
pub enum Performative {
    Open(Open),
    Begin(Begin),
    Attach(Attach),
    Flow(Flow),
    Transfer(Transfer),
    Disposition(Disposition),
    Detach(Detach),
    End(End),
    Close(Close),
}

/// One parsed frame. `performative` is `None` for empty (keepalive) frames.
#[derive(Debug, Clone)]
pub struct Frame {
    pub channel: u16,
    pub performative: Option<Performative>,
    pub payload: Bytes,
}

// -----------------------------------------------------------------------------
// Parsing
// -----------------------------------------------------------------------------

/// Try to parse one frame from the front of `buf`.
///
/// Returns `Ok(None)` when more bytes are needed, otherwise the frame and the
/// number of bytes consumed.
pub fn parse_frame(buf: &[u8]) -> Result<Option<(Frame, usize)>> {
    if buf.len() < FRAME_HEADER_LEN {
        return Ok(None);
    }
    let mut cursor = 0usize;
    let size = read_u32(buf, &mut cursor)? as usize;
    if size < FRAME_HEADER_LEN {
        bail!("frame size {size} below header length");
    }
    if size > MAX_FRAME_SIZE as usize {
        bail!("frame size {size} exceeds maximum {MAX_FRAME_SIZE}");
    }
    if buf.len() < size {
        return Ok(None);
    }
    let doff = read_u8(buf, &mut cursor)? as usize;
    if doff < 2 {
        bail!("frame doff {doff} below minimum 2");
    }
    let frame_type = read_u8(buf, &mut cursor)?;
    if frame_type != FRAME_TYPE_AMQP {
        bail!("unsupported frame type 0x{frame_type:02X}");
    }
    let channel = read_u16(buf, &mut cursor)?;
    let body_start = doff * 4;
    if body_start > size {
        bail!("frame doff past frame end");
    }
    if body_start == size {
        return Ok(Some((
            Frame {
                channel,
                performative: None,
                payload: Bytes::new(),
            },
            size,
        )));
    }
    let body = &buf[body_start..size];
    let mut body_cursor = 0usize;
    let value = decode_value(body, &mut body_cursor).context("performative decode")?;
    let performative = performative_from_value(value)?;
    let payload = Bytes::copy_from_slice(&body[body_cursor..]);
    Ok(Some((
        Frame {
            channel,
            performative: Some(performative),
            payload,
        },
        size,
    )))
}

fn performative_from_value(value: AmqpValue) -> Result<Performative> {
    let code = value
        .descriptor_code()
        .context("performative is not a described value")?;
    let fields = match value {
        AmqpValue::Described(_, inner) => match *inner {
            AmqpValue::List(fields) => fields,
            _ => bail!("performative body is not a list"),
        },
        _ => unreachable!(),
    };
    let f = FieldReader::new(&fields);
    match code {
        codes::OPEN => Ok(Performative::Open(Open {
            container_id: f.string(0).context("open.container-id")?,
            hostname: f.opt_string(1),
            max_frame_size: f.opt_u32(2).unwrap_or(u32::MAX),
            channel_max: f.opt_u16(3).unwrap_or(u16::MAX),
        })),
        codes::BEGIN => Ok(Performative::Begin(Begin {
            remote_channel: f.opt_u16(0),
            next_outgoing_id: f.u32(1).context("begin.next-outgoing-id")?,
            incoming_window: f.u32(2).context("begin.incoming-window")?,
            outgoing_window: f.u32(3).context("begin.outgoing-window")?,
        })),
        codes::ATTACH => Ok(Performative::Attach(Attach {
            name: f.string(0).context("attach.name")?,
            handle: f.u32(1).context("attach.handle")?,
            role: Role::from_bool(f.bool(2).context("attach.role")?),
            snd_settle_mode: f.opt_u8(3),
            rcv_settle_mode: f.opt_u8(4),
            source: f.cloned(5),
            target: f.cloned(6),
            initial_delivery_count: f.opt_u32(9),
        })),
        codes::FLOW => Ok(Performative::Flow(Flow {
            next_incoming_id: f.opt_u32(0),
            incoming_window: f.u32(1).context("flow.incoming-window")?,
            next_outgoing_id: f.u32(2).context("flow.next-outgoing-id")?,
            outgoing_window: f.u32(3).context("flow.outgoing-window")?,
            handle: f.opt_u32(4),
            delivery_count: f.opt_u32(5),
            link_credit: f.opt_u32(6),
        })),
        codes::TRANSFER => Ok(Performative::Transfer(Transfer {
            handle: f.u32(0).context("transfer.handle")?,
            delivery_id: f.opt_u32(1),
            delivery_tag: f.binary(2),
            message_format: f.opt_u32(3),
            settled: f.opt_bool(4),
            more: f.opt_bool(5).unwrap_or(false),
        })),
        codes::DISPOSITION => Ok(Performative::Disposition(Disposition {
            role: Role::from_bool(f.bool(0).context("disposition.role")?),
            first: f.u32(1).context("disposition.first")?,
            last: f.opt_u32(2),
            settled: f.opt_bool(3).unwrap_or(false),
            state: f.cloned(4).map(delivery_state_from_value).transpose()?,
        })),
        codes::DETACH => Ok(Performative::Detach(Detach {
            handle: f.u32(0).context("detach.handle")?,
            closed: f.opt_bool(1).unwrap_or(false),
            error: f.cloned(2).map(error_from_value).transpose()?,
        })),
        codes::END => Ok(Performative::End(End {
            error: f.cloned(0).map(error_from_value).transpose()?,
        })),
        codes::CLOSE => Ok(Performative::Close(Close {
            error: f.cloned(0).map(error_from_value).transpose()?,
        })),
        other => bail!("unknown performative code 0x{other:02X}"),
    }
}

fn delivery_state_from_value(value: AmqpValue) -> Result<DeliveryState> {
    match value.descriptor_code() {
        Some(codes::ACCEPTED) => Ok(DeliveryState::Accepted),
        Some(codes::RELEASED) => Ok(DeliveryState::Released),
        Some(codes::REJECTED) => {
            let error = match value {
                AmqpValue::Described(_, inner) => match *inner {
                    AmqpValue::List(fields) => fields
                        .into_iter()
                        .next()
                        .filter(|v| !matches!(v, AmqpValue::Null))
                        .map(error_from_value)
                        .transpose()?,
                    _ => None,
                },
                _ => None,
            };
            Ok(DeliveryState::Rejected(error))
        }
        other => bail!("unsupported delivery state descriptor {other:?}"),
    }
}

fn error_from_value(value: AmqpValue) -> Result<ErrorCondition> {
    if value.descriptor_code() != Some(codes::ERROR) {
        bail!("expected amqp:error described value");
    }
    let fields = match value {
        AmqpValue::Described(_, inner) => match *inner {
            AmqpValue::List(fields) => fields,
            _ => bail!("error body is not a list"),
        },
        _ => unreachable!(),
    };
    let f = FieldReader::new(&fields);
    Ok(ErrorCondition {
        condition: f.string(0).context("error.condition")?,
        description: f.opt_string(1),
    })
}

/// Positional field access over a performative list; absent and null are
/// treated the same, matching the trailing-field defaulting rule.
struct FieldReader<'a> {
    fields: &'a [AmqpValue],
}

impl<'a> FieldReader<'a> {
    fn new(fields: &'a [AmqpValue]) -> Self {
        Self { fields }
    }

    fn get(&self, index: usize) -> Option<&'a AmqpValue> {
        self.fields
            .get(index)
            .filter(|v| !matches!(v, AmqpValue::Null))
    }

    fn cloned(&self, index: usize) -> Option<AmqpValue> {
        self.get(index).cloned()
    }

    fn string(&self, index: usize) -> Option<String> {
        self.get(index)?.as_str().map(str::to_string)
    }

    fn opt_string(&self, index: usize) -> Option<String> {
        self.string(index)
    }

    fn u32(&self, index: usize) -> Option<u32> {
        self.get(index)?.as_u32()
    }

    fn opt_u32(&self, index: usize) -> Option<u32> {
        self.u32(index)
    }

    fn opt_u16(&self, index: usize) -> Option<u16> {
        match self.get(index)? {
            AmqpValue::UShort(v) => Some(*v),
            other => other.as_u32().and_then(|v| u16::try_from(v).ok()),
        }
    }

    fn opt_u8(&self, index: usize) -> Option<u8> {
        match self.get(index)? {
            AmqpValue::UByte(v) => Some(*v),
            _ => None,
        }
    }

    fn bool(&self, index: usize) -> Option<bool> {
        self.get(index)?.as_bool()
    }

    fn opt_bool(&self, index: usize) -> Option<bool> {
        self.bool(index)
    }

    fn binary(&self, index: usize) -> Option<Bytes> {
        match self.get(index)? {
            AmqpValue::Binary(b) => Some(b.clone()),
            _ => None,
        }
    }
}

// -----------------------------------------------------------------------------
// Encoding
// -----------------------------------------------------------------------------

/// Encode one frame: header, performative, payload.
pub fn encode_frame(channel: u16, performative: &Performative, payload: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    encode_value(&mut body, &performative_to_value(performative));
    let size = FRAME_HEADER_LEN + body.len() + payload.len();
    let mut out = Vec::with_capacity(size);
    out.extend_from_slice(&(size as u32).to_be_bytes());
    out.push(2); // doff
    out.push(FRAME_TYPE_AMQP);
    out.extend_from_slice(&channel.to_be_bytes());
    out.extend_from_slice(&body);
    out.extend_from_slice(payload);
    out
}

fn performative_to_value(performative: &Performative) -> AmqpValue {
    let (code, fields) = match performative {
        Performative::Open(open) => (
            codes::OPEN,
            vec![
                AmqpValue::String(open.container_id.clone()),
                open.hostname
                    .as_ref()
                    .map_or(AmqpValue::Null, |h| AmqpValue::String(h.clone())),
                AmqpValue::UInt(open.max_frame_size),
                AmqpValue::UShort(open.channel_max),
            ],
        ),
        Performative::Begin(begin) => (
            codes::BEGIN,
            vec![
                begin
                    .remote_channel
                    .map_or(AmqpValue::Null, AmqpValue::UShort),
                AmqpValue::UInt(begin.next_outgoing_id),
                AmqpValue::UInt(begin.incoming_window),
                AmqpValue::UInt(begin.outgoing_window),
            ],
        ),
        Performative::Attach(attach) => (
            codes::ATTACH,
            vec![
                AmqpValue::String(attach.name.clone()),
                AmqpValue::UInt(attach.handle),
                AmqpValue::Bool(attach.role.to_bool()),
                attach.snd_settle_mode.map_or(AmqpValue::Null, AmqpValue::UByte),
                attach.rcv_settle_mode.map_or(AmqpValue::Null, AmqpValue::UByte),
                attach.source.clone().unwrap_or(AmqpValue::Null),
                attach.target.clone().unwrap_or(AmqpValue::Null),
                AmqpValue::Null, // unsettled
                AmqpValue::Null, // incomplete-unsettled
                attach
                    .initial_delivery_count
                    .map_or(AmqpValue::Null, AmqpValue::UInt),
            ],
        ),
        Performative::Flow(flow) => (
            codes::FLOW,
            vec![
                flow.next_incoming_id.map_or(AmqpValue::Null, AmqpValue::UInt),
                AmqpValue::UInt(flow.incoming_window),
                AmqpValue::UInt(flow.next_outgoing_id),
                AmqpValue::UInt(flow.outgoing_window),
                flow.handle.map_or(AmqpValue::Null, AmqpValue::UInt),
                flow.delivery_count.map_or(AmqpValue::Null, AmqpValue::UInt),
                flow.link_credit.map_or(AmqpValue::Null, AmqpValue::UInt),
            ],
        ),
        Performative::Transfer(transfer) => (
            codes::TRANSFER,
            vec![
                AmqpValue::UInt(transfer.handle),
                transfer.delivery_id.map_or(AmqpValue::Null, AmqpValue::UInt),
                transfer
                    .delivery_tag
                    .as_ref()
                    .map_or(AmqpValue::Null, |t| AmqpValue::Binary(t.clone())),
                transfer
                    .message_format
                    .map_or(AmqpValue::Null, AmqpValue::UInt),
                transfer.settled.map_or(AmqpValue::Null, AmqpValue::Bool),
                AmqpValue::Bool(transfer.more),
            ],
        ),
        Performative::Disposition(disposition) => (
            codes::DISPOSITION,
            vec![
                AmqpValue::Bool(disposition.role.to_bool()),
                AmqpValue::UInt(disposition.first),
                disposition.last.map_or(AmqpValue::Null, AmqpValue::UInt),
                AmqpValue::Bool(disposition.settled),
                disposition
                    .state
                    .as_ref()
                    .map_or(AmqpValue::Null, delivery_state_to_value),
            ],
        ),
        Performative::Detach(detach) => (
            codes::DETACH,
            vec![
                AmqpValue::UInt(detach.handle),
                AmqpValue::Bool(detach.closed),
                detach.error.as_ref().map_or(AmqpValue::Null, error_to_value),
            ],
        ),
        Performative::End(end) => (
            codes::END,
            vec![end.error.as_ref().map_or(AmqpValue::Null, error_to_value)],
        ),
        Performative::Close(close) => (
            codes::CLOSE,
            vec![close.error.as_ref().map_or(AmqpValue::Null, error_to_value)],
        ),
    };
    let mut fields = fields;
    while matches!(fields.last(), Some(AmqpValue::Null)) {
        fields.pop();
    }
    AmqpValue::described(code, AmqpValue::List(fields))
}

pub fn delivery_state_to_value(state: &DeliveryState) -> AmqpValue {
    match state {
        DeliveryState::Accepted => AmqpValue::described(codes::ACCEPTED, AmqpValue::List(vec![])),
        DeliveryState::Released => AmqpValue::described(codes::RELEASED, AmqpValue::List(vec![])),
        DeliveryState::Rejected(error) => AmqpValue::described(
            codes::REJECTED,
            AmqpValue::List(match error {
                Some(err) => vec![error_to_value(err)],
                None => vec![],
            }),
        ),
    }
}

fn error_to_value(error: &ErrorCondition) -> AmqpValue {
    let mut fields = vec![AmqpValue::Symbol(error.condition.clone())];
    if let Some(description) = &error.description {
        fields.push(AmqpValue::String(description.clone()));
    }
    AmqpValue::described(codes::ERROR, AmqpValue::List(fields))
}
