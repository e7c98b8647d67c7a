//! Session and link negotiation.
//!
//! Sessions and links are created on demand as the peer opens them. A link is
//! only accepted when its target address resolves in the mapping table; every
//! negotiation failure closes the owning connection.

use super::connection::queue_frame;
use super::translate;
use crate::amqp::frames::{
    Attach, Begin, Detach, Disposition, ErrorCondition, Flow, Performative, Role, Transfer,
};
use crate::broker::Broker;
use crate::modules::mapping::{DeviceIdentity, MappingTable};
use bytes::{Bytes, BytesMut};
use std::collections::HashMap;
use tracing::{debug, info};

/// Fixed incoming flow-control window granted to every session.
pub(super) const SESSION_INCOMING_WINDOW: u32 = 10_000;
pub(super) const SESSION_OUTGOING_WINDOW: u32 = 2_048;
/// Fixed receive window granted to each accepted link.
pub(super) const LINK_CREDIT: u32 = 100;

/// Server-side session, child of exactly one connection.
pub(super) struct Session {
    pub channel: u16,
    pub next_incoming_id: u32,
    pub links: HashMap<u32, Link>,
}

/// Receiving link, child of exactly one session. Holds the device identity
/// cloned from the matched mapping entry.
pub(super) struct Link {
    pub name: String,
    pub handle: u32,
    pub identity: DeviceIdentity,
    pub delivery_count: u32,
    pub pending: Option<PendingDelivery>,
}

/// Accumulator for a delivery split across transfer frames.
pub(super) struct PendingDelivery {
    pub delivery_id: u32,
    pub settled: bool,
    pub buf: BytesMut,
}

/// Peer opened a session on `channel`: create it and answer with our begin.
pub(super) fn on_session_open(
    sessions: &mut HashMap<u16, Session>,
    out: &mut BytesMut,
    channel: u16,
    begin: &Begin,
) -> Result<(), ErrorCondition> {
    if sessions.contains_key(&channel) {
        return Err(ErrorCondition::new(
            "amqp:not-allowed",
            format!("channel {channel} already carries a session"),
        ));
    }
    queue_frame(
        out,
        channel,
        &Performative::Begin(Begin {
            remote_channel: Some(channel),
            next_outgoing_id: 0,
            incoming_window: SESSION_INCOMING_WINDOW,
            outgoing_window: SESSION_OUTGOING_WINDOW,
        }),
        &[],
    );
    sessions.insert(
        channel,
        Session {
            channel,
            next_incoming_id: begin.next_outgoing_id,
            links: HashMap::new(),
        },
    );
    debug!(channel, "session opened");
    Ok(())
}

/// Peer attached a link: resolve its target endpoint and open a receiver.
pub(super) fn on_link_attach(
    session: &mut Session,
    out: &mut BytesMut,
    mappings: &MappingTable,
    attach: Attach,
) -> Result<(), ErrorCondition> {
    if attach.role != Role::Sender {
        return Err(ErrorCondition::new(
            "amqp:not-allowed",
            "this gateway only accepts sender links",
        ));
    }
    if session.links.contains_key(&attach.handle) {
        return Err(ErrorCondition::new(
            "amqp:session:handle-in-use",
            format!("handle {} already attached", attach.handle),
        ));
    }
    let Some(endpoint) = attach.target_address() else {
        return Err(ErrorCondition::new(
            "amqp:invalid-field",
            "attach carries no target address",
        ));
    };
    let Some(identity) = mappings.lookup(endpoint) else {
        return Err(ErrorCondition::new(
            "amqp:not-found",
            format!("no endpoint mapping for '{endpoint}'"),
        ));
    };

    let delivery_count = attach.initial_delivery_count.unwrap_or(0);
    queue_frame(
        out,
        session.channel,
        &Performative::Attach(Attach {
            name: attach.name.clone(),
            handle: attach.handle,
            role: Role::Receiver,
            snd_settle_mode: None,
            // settle mode "first": deliveries are settled with the disposition
            rcv_settle_mode: Some(0),
            source: attach.source.clone(),
            target: attach.target.clone(),
            initial_delivery_count: None,
        }),
        &[],
    );
    queue_frame(
        out,
        session.channel,
        &Performative::Flow(Flow {
            next_incoming_id: Some(session.next_incoming_id),
            incoming_window: SESSION_INCOMING_WINDOW,
            next_outgoing_id: 0,
            outgoing_window: SESSION_OUTGOING_WINDOW,
            handle: Some(attach.handle),
            delivery_count: Some(delivery_count),
            link_credit: Some(LINK_CREDIT),
        }),
        &[],
    );
    info!(
        channel = session.channel,
        link = %attach.name,
        endpoint,
        device = %identity.device_id,
        "link attached"
    );
    session.links.insert(
        attach.handle,
        Link {
            name: attach.name,
            handle: attach.handle,
            identity,
            delivery_count,
            pending: None,
        },
    );
    Ok(())
}

/// One transfer frame arrived: accumulate, and on the final frame translate,
/// publish, settle, and replenish the link's receive window.
pub(super) fn on_transfer(
    session: &mut Session,
    out: &mut BytesMut,
    broker: &dyn Broker,
    transfer: Transfer,
    payload: Bytes,
) -> Result<(), ErrorCondition> {
    session.next_incoming_id = session.next_incoming_id.wrapping_add(1);
    let channel = session.channel;
    let next_incoming_id = session.next_incoming_id;
    let Some(link) = session.links.get_mut(&transfer.handle) else {
        return Err(ErrorCondition::new(
            "amqp:session:unattached-handle",
            format!("transfer on unattached handle {}", transfer.handle),
        ));
    };

    if link.pending.is_none() {
        let Some(delivery_id) = transfer.delivery_id else {
            return Err(ErrorCondition::new(
                "amqp:invalid-field",
                "first transfer of a delivery carries no delivery-id",
            ));
        };
        link.pending = Some(PendingDelivery {
            delivery_id,
            settled: transfer.settled.unwrap_or(false),
            buf: BytesMut::new(),
        });
    }
    let pending = link.pending.as_mut().expect("pending delivery just ensured");
    pending.buf.extend_from_slice(&payload);
    if transfer.more {
        return Ok(());
    }

    let delivery = link.pending.take().expect("pending delivery present");
    link.delivery_count = link.delivery_count.wrapping_add(1);
    let outcome = translate::on_message(&link.identity, &delivery.buf, broker);
    debug!(
        channel,
        handle = link.handle,
        delivery_id = delivery.delivery_id,
        ?outcome,
        "delivery handled"
    );

    if !delivery.settled {
        queue_frame(
            out,
            channel,
            &Performative::Disposition(Disposition {
                role: Role::Receiver,
                first: delivery.delivery_id,
                last: None,
                settled: true,
                state: Some(outcome.delivery_state()),
            }),
            &[],
        );
    }
    // Top the fixed receive window back up after every settled delivery.
    queue_frame(
        out,
        channel,
        &Performative::Flow(Flow {
            next_incoming_id: Some(next_incoming_id),
            incoming_window: SESSION_INCOMING_WINDOW,
            next_outgoing_id: 0,
            outgoing_window: SESSION_OUTGOING_WINDOW,
            handle: Some(link.handle),
            delivery_count: Some(link.delivery_count),
            link_credit: Some(LINK_CREDIT),
        }),
        &[],
    );
    Ok(())
}

/// Peer detached a link: drop it and echo the detach.
pub(super) fn on_link_detach(
    session: &mut Session,
    out: &mut BytesMut,
    detach: &Detach,
) -> Result<(), ErrorCondition> {
    let Some(link) = session.links.remove(&detach.handle) else {
        return Err(ErrorCondition::new(
            "amqp:session:unattached-handle",
            format!("detach on unattached handle {}", detach.handle),
        ));
    };
    queue_frame(
        out,
        session.channel,
        &Performative::Detach(Detach {
            handle: detach.handle,
            closed: detach.closed,
            error: None,
        }),
        &[],
    );
    debug!(channel = session.channel, handle = detach.handle, link = %link.name, "link detached");
    Ok(())
}
