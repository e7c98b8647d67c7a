//! AMQP 1.0 type codec.
//!
//! Covers the subset of the AMQP type system the gateway speaks: primitives,
//! binary/string/symbol, list, map, and described values. Decoding is strict —
//! an unknown format code fails the frame rather than guessing.

use anyhow::{anyhow, bail, Context, Result};
use bytes::Bytes;

/// A decoded AMQP data value.
#[derive(Debug, Clone, PartialEq)]
pub enum AmqpValue {
    Null,
    Bool(bool),
    UByte(u8),
    UShort(u16),
    UInt(u32),
    ULong(u64),
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Char(char),
    Timestamp(i64),
    Uuid([u8; 16]),
    Binary(Bytes),
    String(String),
    Symbol(String),
    List(Vec<AmqpValue>),
    Map(Vec<(AmqpValue, AmqpValue)>),
    /// descriptor, value
    Described(Box<AmqpValue>, Box<AmqpValue>),
}

impl AmqpValue {
    pub fn described(code: u64, value: AmqpValue) -> Self {
        AmqpValue::Described(Box::new(AmqpValue::ULong(code)), Box::new(value))
    }

    /// Descriptor code if this is a described value with a ulong descriptor.
    pub fn descriptor_code(&self) -> Option<u64> {
        match self {
            AmqpValue::Described(descriptor, _) => match descriptor.as_ref() {
                AmqpValue::ULong(code) => Some(*code),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AmqpValue::String(s) | AmqpValue::Symbol(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match self {
            AmqpValue::UByte(v) => Some(u32::from(*v)),
            AmqpValue::UShort(v) => Some(u32::from(*v)),
            AmqpValue::UInt(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AmqpValue::Bool(v) => Some(*v),
            _ => None,
        }
    }
}

// -----------------------------------------------------------------------------
// Decoding
// -----------------------------------------------------------------------------

/// Decode one value starting at `cursor`, advancing it past the value.
pub fn decode_value(buf: &[u8], cursor: &mut usize) -> Result<AmqpValue> {
    let code = read_u8(buf, cursor)?;
    decode_with_code(code, buf, cursor)
}

fn decode_with_code(code: u8, buf: &[u8], cursor: &mut usize) -> Result<AmqpValue> {
    match code {
        0x00 => {
            // Described type: descriptor value, then the described value.
            let descriptor = decode_value(buf, cursor)?;
            let value = decode_value(buf, cursor)?;
            Ok(AmqpValue::Described(Box::new(descriptor), Box::new(value)))
        }
        0x40 => Ok(AmqpValue::Null),
        0x41 => Ok(AmqpValue::Bool(true)),
        0x42 => Ok(AmqpValue::Bool(false)),
        0x56 => Ok(AmqpValue::Bool(read_u8(buf, cursor)? != 0)),
        0x50 => Ok(AmqpValue::UByte(read_u8(buf, cursor)?)),
        0x60 => Ok(AmqpValue::UShort(read_u16(buf, cursor)?)),
        0x70 => Ok(AmqpValue::UInt(read_u32(buf, cursor)?)),
        0x52 => Ok(AmqpValue::UInt(u32::from(read_u8(buf, cursor)?))),
        0x43 => Ok(AmqpValue::UInt(0)),
        0x80 => Ok(AmqpValue::ULong(read_u64(buf, cursor)?)),
        0x53 => Ok(AmqpValue::ULong(u64::from(read_u8(buf, cursor)?))),
        0x44 => Ok(AmqpValue::ULong(0)),
        0x51 => Ok(AmqpValue::Byte(read_u8(buf, cursor)? as i8)),
        0x61 => Ok(AmqpValue::Short(read_u16(buf, cursor)? as i16)),
        0x71 => Ok(AmqpValue::Int(read_u32(buf, cursor)? as i32)),
        0x54 => Ok(AmqpValue::Int(i32::from(read_u8(buf, cursor)? as i8))),
        0x81 => Ok(AmqpValue::Long(read_u64(buf, cursor)? as i64)),
        0x55 => Ok(AmqpValue::Long(i64::from(read_u8(buf, cursor)? as i8))),
        0x72 => Ok(AmqpValue::Float(f32::from_bits(read_u32(buf, cursor)?))),
        0x82 => Ok(AmqpValue::Double(f64::from_bits(read_u64(buf, cursor)?))),
        0x73 => {
            let raw = read_u32(buf, cursor)?;
            let c = char::from_u32(raw).ok_or_else(|| anyhow!("invalid char scalar {raw}"))?;
            Ok(AmqpValue::Char(c))
        }
        0x83 => Ok(AmqpValue::Timestamp(read_u64(buf, cursor)? as i64)),
        0x98 => {
            let bytes = read_slice(buf, cursor, 16)?;
            let mut uuid = [0u8; 16];
            uuid.copy_from_slice(bytes);
            Ok(AmqpValue::Uuid(uuid))
        }
        0xA0 => {
            let len = read_u8(buf, cursor)? as usize;
            Ok(AmqpValue::Binary(Bytes::copy_from_slice(read_slice(
                buf, cursor, len,
            )?)))
        }
        0xB0 => {
            let len = read_u32(buf, cursor)? as usize;
            Ok(AmqpValue::Binary(Bytes::copy_from_slice(read_slice(
                buf, cursor, len,
            )?)))
        }
        0xA1 => {
            let len = read_u8(buf, cursor)? as usize;
            Ok(AmqpValue::String(read_utf8(buf, cursor, len)?))
        }
        0xB1 => {
            let len = read_u32(buf, cursor)? as usize;
            Ok(AmqpValue::String(read_utf8(buf, cursor, len)?))
        }
        0xA3 => {
            let len = read_u8(buf, cursor)? as usize;
            Ok(AmqpValue::Symbol(read_utf8(buf, cursor, len)?))
        }
        0xB3 => {
            let len = read_u32(buf, cursor)? as usize;
            Ok(AmqpValue::Symbol(read_utf8(buf, cursor, len)?))
        }
        0x45 => Ok(AmqpValue::List(Vec::new())),
        0xC0 => {
            let size = read_u8(buf, cursor)? as usize;
            let count = peek_compound_count8(buf, *cursor)?;
            decode_list(buf, cursor, size, count, 1)
        }
        0xD0 => {
            let size = read_u32(buf, cursor)? as usize;
            let count = peek_compound_count32(buf, *cursor)?;
            decode_list(buf, cursor, size, count, 4)
        }
        0xC1 => {
            let size = read_u8(buf, cursor)? as usize;
            let count = peek_compound_count8(buf, *cursor)?;
            decode_map(buf, cursor, size, count, 1)
        }
        0xD1 => {
            let size = read_u32(buf, cursor)? as usize;
            let count = peek_compound_count32(buf, *cursor)?;
            decode_map(buf, cursor, size, count, 4)
        }
        other => bail!("unsupported AMQP format code 0x{other:02X}"),
    }
}

fn peek_compound_count8(buf: &[u8], cursor: usize) -> Result<usize> {
    let mut c = cursor;
    Ok(read_u8(buf, &mut c)? as usize)
}

fn peek_compound_count32(buf: &[u8], cursor: usize) -> Result<usize> {
    let mut c = cursor;
    Ok(read_u32(buf, &mut c)? as usize)
}

fn decode_list(
    buf: &[u8],
    cursor: &mut usize,
    size: usize,
    count: usize,
    count_width: usize,
) -> Result<AmqpValue> {
    let end = cursor
        .checked_add(size)
        .ok_or_else(|| anyhow!("list size overflow"))?;
    *cursor += count_width;
    let mut items = Vec::with_capacity(count.min(64));
    for index in 0..count {
        if *cursor >= end && index < count {
            bail!("list truncated at element {index}");
        }
        items.push(decode_value(buf, cursor).with_context(|| format!("list element {index}"))?);
    }
    if *cursor != end {
        bail!("list size mismatch");
    }
    Ok(AmqpValue::List(items))
}

fn decode_map(
    buf: &[u8],
    cursor: &mut usize,
    size: usize,
    count: usize,
    count_width: usize,
) -> Result<AmqpValue> {
    if count % 2 != 0 {
        bail!("map element count {count} is odd");
    }
    let end = cursor
        .checked_add(size)
        .ok_or_else(|| anyhow!("map size overflow"))?;
    *cursor += count_width;
    let mut pairs = Vec::with_capacity((count / 2).min(64));
    for index in 0..count / 2 {
        let key = decode_value(buf, cursor).with_context(|| format!("map key {index}"))?;
        let value = decode_value(buf, cursor).with_context(|| format!("map value {index}"))?;
        pairs.push((key, value));
    }
    if *cursor != end {
        bail!("map size mismatch");
    }
    Ok(AmqpValue::Map(pairs))
}

// -----------------------------------------------------------------------------
// Encoding
// -----------------------------------------------------------------------------

/// Encode a value, picking the most compact format for its magnitude.
pub fn encode_value(out: &mut Vec<u8>, value: &AmqpValue) {
    match value {
        AmqpValue::Null => out.push(0x40),
        AmqpValue::Bool(true) => out.push(0x41),
        AmqpValue::Bool(false) => out.push(0x42),
        AmqpValue::UByte(v) => {
            out.push(0x50);
            out.push(*v);
        }
        AmqpValue::UShort(v) => {
            out.push(0x60);
            out.extend_from_slice(&v.to_be_bytes());
        }
        AmqpValue::UInt(0) => out.push(0x43),
        AmqpValue::UInt(v) if *v <= 0xFF => {
            out.push(0x52);
            out.push(*v as u8);
        }
        AmqpValue::UInt(v) => {
            out.push(0x70);
            out.extend_from_slice(&v.to_be_bytes());
        }
        AmqpValue::ULong(0) => out.push(0x44),
        AmqpValue::ULong(v) if *v <= 0xFF => {
            out.push(0x53);
            out.push(*v as u8);
        }
        AmqpValue::ULong(v) => {
            out.push(0x80);
            out.extend_from_slice(&v.to_be_bytes());
        }
        AmqpValue::Byte(v) => {
            out.push(0x51);
            out.push(*v as u8);
        }
        AmqpValue::Short(v) => {
            out.push(0x61);
            out.extend_from_slice(&v.to_be_bytes());
        }
        AmqpValue::Int(v) if i8::try_from(*v).is_ok() => {
            out.push(0x54);
            out.push(*v as i8 as u8);
        }
        AmqpValue::Int(v) => {
            out.push(0x71);
            out.extend_from_slice(&v.to_be_bytes());
        }
        AmqpValue::Long(v) if i8::try_from(*v).is_ok() => {
            out.push(0x55);
            out.push(*v as i8 as u8);
        }
        AmqpValue::Long(v) => {
            out.push(0x81);
            out.extend_from_slice(&v.to_be_bytes());
        }
        AmqpValue::Float(v) => {
            out.push(0x72);
            out.extend_from_slice(&v.to_bits().to_be_bytes());
        }
        AmqpValue::Double(v) => {
            out.push(0x82);
            out.extend_from_slice(&v.to_bits().to_be_bytes());
        }
        AmqpValue::Char(c) => {
            out.push(0x73);
            out.extend_from_slice(&(*c as u32).to_be_bytes());
        }
        AmqpValue::Timestamp(v) => {
            out.push(0x83);
            out.extend_from_slice(&v.to_be_bytes());
        }
        AmqpValue::Uuid(bytes) => {
            out.push(0x98);
            out.extend_from_slice(bytes);
        }
        AmqpValue::Binary(bytes) => {
            if bytes.len() <= 0xFF {
                out.push(0xA0);
                out.push(bytes.len() as u8);
            } else {
                out.push(0xB0);
                out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
            }
            out.extend_from_slice(bytes);
        }
        AmqpValue::String(s) => {
            if s.len() <= 0xFF {
                out.push(0xA1);
                out.push(s.len() as u8);
            } else {
                out.push(0xB1);
                out.extend_from_slice(&(s.len() as u32).to_be_bytes());
            }
            out.extend_from_slice(s.as_bytes());
        }
        AmqpValue::Symbol(s) => {
            if s.len() <= 0xFF {
                out.push(0xA3);
                out.push(s.len() as u8);
            } else {
                out.push(0xB3);
                out.extend_from_slice(&(s.len() as u32).to_be_bytes());
            }
            out.extend_from_slice(s.as_bytes());
        }
        AmqpValue::List(items) => {
            if items.is_empty() {
                out.push(0x45);
                return;
            }
            let mut body = Vec::new();
            for item in items {
                encode_value(&mut body, item);
            }
            encode_compound(out, 0xC0, 0xD0, items.len(), &body);
        }
        AmqpValue::Map(pairs) => {
            let mut body = Vec::new();
            for (key, val) in pairs {
                encode_value(&mut body, key);
                encode_value(&mut body, val);
            }
            encode_compound(out, 0xC1, 0xD1, pairs.len() * 2, &body);
        }
        AmqpValue::Described(descriptor, inner) => {
            out.push(0x00);
            encode_value(out, descriptor);
            encode_value(out, inner);
        }
    }
}

fn encode_compound(out: &mut Vec<u8>, code8: u8, code32: u8, count: usize, body: &[u8]) {
    // size field covers the count field plus the encoded elements
    if body.len() + 1 <= 0xFF && count <= 0xFF {
        out.push(code8);
        out.push((body.len() + 1) as u8);
        out.push(count as u8);
    } else {
        out.push(code32);
        out.extend_from_slice(&((body.len() + 4) as u32).to_be_bytes());
        out.extend_from_slice(&(count as u32).to_be_bytes());
    }
    out.extend_from_slice(body);
}

// -----------------------------------------------------------------------------
// Cursor helpers
// -----------------------------------------------------------------------------

pub(crate) fn read_u8(buf: &[u8], cursor: &mut usize) -> Result<u8> {
    if *cursor >= buf.len() {
        bail!("unexpected end of buffer");
    }
    let v = buf[*cursor];
    *cursor += 1;
    Ok(v)
}

pub(crate) fn read_u16(buf: &[u8], cursor: &mut usize) -> Result<u16> {
    let slice = read_slice(buf, cursor, 2)?;
    Ok(u16::from_be_bytes([slice[0], slice[1]]))
}

pub(crate) fn read_u32(buf: &[u8], cursor: &mut usize) -> Result<u32> {
    let slice = read_slice(buf, cursor, 4)?;
    Ok(u32::from_be_bytes([slice[0], slice[1], slice[2], slice[3]]))
}

pub(crate) fn read_u64(buf: &[u8], cursor: &mut usize) -> Result<u64> {
    let slice = read_slice(buf, cursor, 8)?;
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(slice);
    Ok(u64::from_be_bytes(bytes))
}

pub(crate) fn read_slice<'a>(buf: &'a [u8], cursor: &mut usize, len: usize) -> Result<&'a [u8]> {
    let end = cursor
        .checked_add(len)
        .ok_or_else(|| anyhow!("length overflow"))?;
    if end > buf.len() {
        bail!("unexpected end of buffer");
    }
    let slice = &buf[*cursor..end];
    *cursor = end;
    Ok(slice)
}

fn read_utf8(buf: &[u8], cursor: &mut usize, len: usize) -> Result<String> {
    let slice = read_slice(buf, cursor, len)?;
    Ok(std::str::from_utf8(slice)
        .context("invalid utf8 in amqp string")?
        .to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(value: AmqpValue) -> AmqpValue {
        let mut buf = Vec::new();
        encode_value(&mut buf, &value);
        let mut cursor = 0;
        let decoded = decode_value(&buf, &mut cursor).expect("decode");
        assert_eq!(cursor, buf.len(), "decoder consumed whole encoding");
        decoded
    }

    #[test]
    fn scalar_roundtrips() {
        assert_eq!(roundtrip(AmqpValue::Null), AmqpValue::Null);
        assert_eq!(roundtrip(AmqpValue::Bool(true)), AmqpValue::Bool(true));
        assert_eq!(roundtrip(AmqpValue::UByte(200)), AmqpValue::UByte(200));
        assert_eq!(roundtrip(AmqpValue::UShort(5672)), AmqpValue::UShort(5672));
        assert_eq!(roundtrip(AmqpValue::UInt(0)), AmqpValue::UInt(0));
        assert_eq!(roundtrip(AmqpValue::UInt(77)), AmqpValue::UInt(77));
        assert_eq!(roundtrip(AmqpValue::UInt(70000)), AmqpValue::UInt(70000));
        assert_eq!(roundtrip(AmqpValue::ULong(u64::MAX)), AmqpValue::ULong(u64::MAX));
        assert_eq!(roundtrip(AmqpValue::Byte(-3)), AmqpValue::Byte(-3));
        assert_eq!(roundtrip(AmqpValue::Short(-300)), AmqpValue::Short(-300));
        assert_eq!(roundtrip(AmqpValue::Int(-5)), AmqpValue::Int(-5));
        assert_eq!(roundtrip(AmqpValue::Int(1 << 20)), AmqpValue::Int(1 << 20));
        assert_eq!(roundtrip(AmqpValue::Long(i64::MIN)), AmqpValue::Long(i64::MIN));
        assert_eq!(roundtrip(AmqpValue::Float(21.5)), AmqpValue::Float(21.5));
        assert_eq!(roundtrip(AmqpValue::Double(-0.25)), AmqpValue::Double(-0.25));
        assert_eq!(roundtrip(AmqpValue::Char('q')), AmqpValue::Char('q'));
    }

    #[test]
    fn strings_and_binary_roundtrip() {
        assert_eq!(
            roundtrip(AmqpValue::String("telemetry".into())),
            AmqpValue::String("telemetry".into())
        );
        let long = "x".repeat(300);
        assert_eq!(
            roundtrip(AmqpValue::String(long.clone())),
            AmqpValue::String(long)
        );
        assert_eq!(
            roundtrip(AmqpValue::Symbol("amqp:not-found".into())),
            AmqpValue::Symbol("amqp:not-found".into())
        );
        let payload = Bytes::from_static(b"\x00\x01\x02");
        assert_eq!(
            roundtrip(AmqpValue::Binary(payload.clone())),
            AmqpValue::Binary(payload)
        );
    }

    #[test]
    fn compound_roundtrips() {
        let list = AmqpValue::List(vec![
            AmqpValue::String("first".into()),
            AmqpValue::UInt(2),
            AmqpValue::Null,
        ]);
        assert_eq!(roundtrip(list.clone()), list);

        let map = AmqpValue::Map(vec![
            (AmqpValue::String("temp".into()), AmqpValue::Int(21)),
            (AmqpValue::String("unit".into()), AmqpValue::Char('C')),
        ]);
        assert_eq!(roundtrip(map.clone()), map);

        let described = AmqpValue::described(0x75, AmqpValue::Binary(Bytes::from_static(b"hi")));
        assert_eq!(roundtrip(described.clone()), described);
        assert_eq!(described.descriptor_code(), Some(0x75));
    }

    #[test]
    fn empty_list_uses_list0() {
        let mut buf = Vec::new();
        encode_value(&mut buf, &AmqpValue::List(Vec::new()));
        assert_eq!(buf, vec![0x45]);
    }

    #[test]
    fn truncated_input_is_an_error() {
        let mut buf = Vec::new();
        encode_value(&mut buf, &AmqpValue::String("abcdef".into()));
        buf.truncate(buf.len() - 2);
        let mut cursor = 0;
        assert!(decode_value(&buf, &mut cursor).is_err());
    }

    #[test]
    fn unknown_format_code_is_an_error() {
        let mut cursor = 0;
        assert!(decode_value(&[0x9F], &mut cursor).is_err());
    }
}
