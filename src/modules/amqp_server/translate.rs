//! Message translation between the protocol layer and broker envelopes.
//!
//! Each inbound delivery becomes at most one published envelope. Identity
//! properties are written before application properties so a colliding key
//! can never overwrite them.

use crate::amqp::frames::{DeliveryState, ErrorCondition};
use crate::amqp::message::parse_message;
use crate::amqp::value::AmqpValue;
use crate::broker::{
    Broker, Envelope, PropertyBag, DEVICE_ID_PROPERTY, DEVICE_KEY_PROPERTY, SOURCE_MAPPING,
    SOURCE_PROPERTY,
};
use crate::modules::mapping::DeviceIdentity;
use bytes::Bytes;
use tracing::{error, trace, warn};

/// Protocol-level result of handling one delivery.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Outcome {
    /// Published; peer is told the delivery was accepted.
    Accepted,
    /// The peer sent something structurally invalid.
    Rejected(String),
    /// An internal failure that is not the peer's fault.
    Released,
}

impl Outcome {
    pub(crate) fn delivery_state(&self) -> DeliveryState {
        match self {
            Outcome::Accepted => DeliveryState::Accepted,
            Outcome::Rejected(reason) => DeliveryState::Rejected(Some(ErrorCondition::new(
                "amqp:decode-error",
                reason.clone(),
            ))),
            Outcome::Released => DeliveryState::Released,
        }
    }
}

/// Decode, translate and publish one complete delivery payload.
pub(crate) fn on_message(
    identity: &DeviceIdentity,
    payload: &[u8],
    broker: &dyn Broker,
) -> Outcome {
    let message = match parse_message(payload) {
        Ok(message) => message,
        Err(err) => {
            warn!(device = %identity.device_id, "malformed message payload: {err:#}");
            return Outcome::Rejected("malformed message".into());
        }
    };

    let mut properties = PropertyBag::new();
    properties.insert(SOURCE_PROPERTY, SOURCE_MAPPING);
    properties.insert(DEVICE_ID_PROPERTY, identity.device_id.clone());
    properties.insert(DEVICE_KEY_PROPERTY, identity.device_key.clone());

    if let Some(pairs) = &message.application_properties {
        for (key, value) in pairs {
            let Some(name) = key.as_str() else {
                error!(
                    device = %identity.device_id,
                    "application property key is not a string, releasing message"
                );
                return Outcome::Released;
            };
            match property_text(value) {
                Some(text) => {
                    if !properties.insert(name, text) {
                        trace!(property = name, "dropping colliding application property");
                    }
                }
                None => warn!(property = name, "cannot encode property, skipping"),
            }
        }
    }

    let Some(body) = message.single_data_body() else {
        warn!(device = %identity.device_id, "message body is not a single data section");
        return Outcome::Rejected("bad body".into());
    };

    let envelope = Envelope::new(properties, Bytes::copy_from_slice(body));
    match broker.publish(envelope) {
        Ok(()) => Outcome::Accepted,
        Err(err) => {
            error!(device = %identity.device_id, "broker publish failed: {err}");
            Outcome::Released
        }
    }
}

/// Canonical text for one supported application-property value.
///
/// Unsupported kinds return `None` and are skipped by the caller.
fn property_text(value: &AmqpValue) -> Option<String> {
    match value {
        AmqpValue::String(s) => Some(s.clone()),
        AmqpValue::Char(c) => Some(format!("'{c}'")),
        AmqpValue::UByte(v) => Some(v.to_string()),
        AmqpValue::UShort(v) => Some(v.to_string()),
        AmqpValue::UInt(v) => Some(v.to_string()),
        AmqpValue::ULong(v) => Some(v.to_string()),
        AmqpValue::Byte(v) => Some(v.to_string()),
        AmqpValue::Short(v) => Some(v.to_string()),
        AmqpValue::Int(v) => Some(v.to_string()),
        AmqpValue::Long(v) => Some(v.to_string()),
        AmqpValue::Float(v) => Some(v.to_string()),
        AmqpValue::Double(v) => Some(v.to_string()),
        _ => None,
    }
}
