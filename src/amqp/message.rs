//! Bare-message section handling.
//!
//! A transfer payload is a sequence of described sections. The gateway cares
//! about application-properties and the body; everything else is walked over
//! and retained only as far as body-shape classification needs it.

use crate::amqp::value::{decode_value, encode_value, AmqpValue};
use anyhow::{bail, Context, Result};
use bytes::Bytes;

mod section_codes {
    pub const HEADER: u64 = 0x70;
    pub const DELIVERY_ANNOTATIONS: u64 = 0x71;
    pub const MESSAGE_ANNOTATIONS: u64 = 0x72;
    pub const PROPERTIES: u64 = 0x73;
    pub const APPLICATION_PROPERTIES: u64 = 0x74;
    pub const DATA: u64 = 0x75;
    pub const AMQP_SEQUENCE: u64 = 0x76;
    pub const AMQP_VALUE: u64 = 0x77;
    pub const FOOTER: u64 = 0x78;
}

/// Decoded view of one inbound message.
#[derive(Debug, Clone, Default)]
pub struct AmqpMessage {
    pub application_properties: Option<Vec<(AmqpValue, AmqpValue)>>,
    pub data_sections: Vec<Bytes>,
    /// True when an amqp-value or amqp-sequence body section was present.
    pub non_data_body: bool,
}

impl AmqpMessage {
    /// The body, when it is exactly one opaque binary segment.
    pub fn single_data_body(&self) -> Option<&Bytes> {
        if self.non_data_body || self.data_sections.len() != 1 {
            return None;
        }
        self.data_sections.first()
    }
}

/// Walk the section sequence of a transfer payload.
pub fn parse_message(payload: &[u8]) -> Result<AmqpMessage> {
    let mut message = AmqpMessage::default();
    let mut cursor = 0usize;
    while cursor < payload.len() {
        let section = decode_value(payload, &mut cursor).context("message section decode")?;
        let code = section
            .descriptor_code()
            .context("message section is not described")?;
        let inner = match section {
            AmqpValue::Described(_, inner) => *inner,
            _ => unreachable!(),
        };
        match code {
            section_codes::APPLICATION_PROPERTIES => match inner {
                AmqpValue::Map(pairs) => message.application_properties = Some(pairs),
                other => bail!("application-properties is not a map: {other:?}"),
            },
            section_codes::DATA => match inner {
                AmqpValue::Binary(bytes) => message.data_sections.push(bytes),
                other => bail!("data section is not binary: {other:?}"),
            },
            section_codes::AMQP_SEQUENCE | section_codes::AMQP_VALUE => {
                message.non_data_body = true;
            }
            section_codes::HEADER
            | section_codes::DELIVERY_ANNOTATIONS
            | section_codes::MESSAGE_ANNOTATIONS
            | section_codes::PROPERTIES
            | section_codes::FOOTER => {
                // Carried but unused by this module.
            }
            other => bail!("unknown message section descriptor 0x{other:02X}"),
        }
    }
    Ok(message)
}

/// Encode a message with optional application properties and one data body.
pub fn encode_message(
    application_properties: Option<&[(AmqpValue, AmqpValue)]>,
    body: &[u8],
) -> Vec<u8> {
    let mut out = Vec::new();
    if let Some(pairs) = application_properties {
        encode_value(
            &mut out,
            &AmqpValue::described(
                section_codes::APPLICATION_PROPERTIES,
                AmqpValue::Map(pairs.to_vec()),
            ),
        );
    }
    encode_value(
        &mut out,
        &AmqpValue::described(
            section_codes::DATA,
            AmqpValue::Binary(Bytes::copy_from_slice(body)),
        ),
    );
    out
}

/// Encode an amqp-value body, used by tests to produce a non-data shape.
pub fn encode_value_body(value: &AmqpValue) -> Vec<u8> {
    let mut out = Vec::new();
    encode_value(
        &mut out,
        &AmqpValue::described(section_codes::AMQP_VALUE, value.clone()),
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_message_roundtrips() {
        let props = vec![(
            AmqpValue::String("temp".into()),
            AmqpValue::String("21".into()),
        )];
        let encoded = encode_message(Some(&props), b"payload");
        let message = parse_message(&encoded).expect("parse");
        assert_eq!(message.application_properties, Some(props));
        assert_eq!(
            message.single_data_body().map(|b| &b[..]),
            Some(&b"payload"[..])
        );
    }

    #[test]
    fn value_body_is_not_data() {
        let encoded = encode_value_body(&AmqpValue::String("not binary".into()));
        let message = parse_message(&encoded).expect("parse");
        assert!(message.non_data_body);
        assert!(message.single_data_body().is_none());
    }

    #[test]
    fn two_data_sections_fail_the_shape_check() {
        let mut encoded = encode_message(None, b"one");
        encoded.extend(encode_message(None, b"two"));
        let message = parse_message(&encoded).expect("parse");
        assert_eq!(message.data_sections.len(), 2);
        assert!(message.single_data_body().is_none());
    }

    #[test]
    fn garbage_section_is_an_error() {
        assert!(parse_message(&[0xA1, 0x02, b'h', b'i']).is_err());
    }
}
