//! End-to-end tests driving the AMQP ingress module with the sender client.

mod common;

use common::{mapping, spawn_server, wait_until, RecordingBroker};
use portico::amqp::client::SenderClient;
use portico::amqp::frames::DeliveryState;
use portico::amqp::message::encode_value_body;
use portico::amqp::value::AmqpValue;
use portico::broker::{DEVICE_ID_PROPERTY, DEVICE_KEY_PROPERTY, SOURCE_MAPPING, SOURCE_PROPERTY};
use std::time::Duration;

fn string_props(pairs: &[(&str, &str)]) -> Vec<(AmqpValue, AmqpValue)> {
    pairs
        .iter()
        .map(|(k, v)| {
            (
                AmqpValue::String((*k).to_string()),
                AmqpValue::String((*v).to_string()),
            )
        })
        .collect()
}

#[test]
fn accepted_message_becomes_identity_stamped_envelope() {
    let broker = RecordingBroker::new();
    let mut server = spawn_server(broker.clone(), vec![mapping("E1", "dev1", "key1")]);

    let mut client = SenderClient::connect(server.local_addr()).expect("connect");
    client.open_link("E1").expect("attach");
    let props = string_props(&[("temp", "21")]);
    let state = client.send(Some(&props), b"hello").expect("send");
    assert_eq!(state, DeliveryState::Accepted);
    client.close().expect("close");

    assert!(wait_until(Duration::from_secs(2), || broker.len() == 1));
    let envelope = broker.envelopes().remove(0);
    assert_eq!(envelope.payload.as_ref(), b"hello");

    let entries: Vec<(String, String)> = envelope
        .properties
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    assert_eq!(
        entries,
        vec![
            (SOURCE_PROPERTY.to_string(), SOURCE_MAPPING.to_string()),
            (DEVICE_ID_PROPERTY.to_string(), "dev1".to_string()),
            (DEVICE_KEY_PROPERTY.to_string(), "key1".to_string()),
            ("temp".to_string(), "21".to_string()),
        ]
    );

    server.shutdown();
}

#[test]
fn unmapped_endpoint_closes_connection_without_publishing() {
    let broker = RecordingBroker::new();
    let mut server = spawn_server(broker.clone(), vec![mapping("E1", "dev1", "key1")]);

    let mut client = SenderClient::connect(server.local_addr()).expect("connect");
    let err = client.open_link("nowhere").expect_err("attach must fail");
    assert!(
        format!("{err:#}").contains("amqp:not-found"),
        "unexpected error: {err:#}"
    );

    // The connection is gone; the mapped endpoint still works on a new one.
    let mut client = SenderClient::connect(server.local_addr()).expect("reconnect");
    client.open_link("E1").expect("attach");
    assert_eq!(
        client.send(None, b"x").expect("send"),
        DeliveryState::Accepted
    );
    client.close().expect("close");

    assert!(wait_until(Duration::from_secs(2), || broker.len() == 1));
    server.shutdown();
}

#[test]
fn value_body_is_rejected_as_decode_error() {
    let broker = RecordingBroker::new();
    let mut server = spawn_server(broker.clone(), vec![mapping("E1", "dev1", "key1")]);

    let mut client = SenderClient::connect(server.local_addr()).expect("connect");
    client.open_link("E1").expect("attach");
    let body = encode_value_body(&AmqpValue::String("not a data section".to_string()));
    let state = client.send_raw_message(&body, usize::MAX).expect("send");
    match state {
        DeliveryState::Rejected(Some(condition)) => {
            assert_eq!(condition.condition, "amqp:decode-error");
        }
        other => panic!("expected rejection, got {other:?}"),
    }
    client.close().expect("close");

    assert_eq!(broker.len(), 0);
    server.shutdown();
}

#[test]
fn duplicate_endpoints_resolve_to_first_entry() {
    let broker = RecordingBroker::new();
    let mut server = spawn_server(
        broker.clone(),
        vec![mapping("E1", "first", "k1"), mapping("E1", "second", "k2")],
    );

    let mut client = SenderClient::connect(server.local_addr()).expect("connect");
    client.open_link("E1").expect("attach");
    assert_eq!(
        client.send(None, b"x").expect("send"),
        DeliveryState::Accepted
    );
    client.close().expect("close");

    assert!(wait_until(Duration::from_secs(2), || broker.len() == 1));
    let envelope = broker.envelopes().remove(0);
    assert_eq!(envelope.properties.get(DEVICE_ID_PROPERTY), Some("first"));
    assert_eq!(envelope.properties.get(DEVICE_KEY_PROPERTY), Some("k1"));
    server.shutdown();
}

#[test]
fn concurrent_connections_keep_independent_identities() {
    let broker = RecordingBroker::new();
    let mappings = (0..4)
        .map(|i| mapping(&format!("E{i}"), &format!("dev{i}"), &format!("key{i}")))
        .collect();
    let mut server = spawn_server(broker.clone(), mappings);

    let mut clients: Vec<SenderClient> = (0..4)
        .map(|i| {
            let mut client = SenderClient::connect(server.local_addr()).expect("connect");
            client.open_link(&format!("E{i}")).expect("attach");
            client
        })
        .collect();

    // Interleave sends across the open connections.
    for round in 0..3 {
        for (i, client) in clients.iter_mut().enumerate() {
            let body = format!("c{i}r{round}");
            assert_eq!(
                client.send(None, body.as_bytes()).expect("send"),
                DeliveryState::Accepted
            );
        }
    }
    for client in clients {
        client.close().expect("close");
    }

    assert!(wait_until(Duration::from_secs(2), || broker.len() == 12));
    for envelope in broker.envelopes() {
        let body = String::from_utf8(envelope.payload.to_vec()).expect("utf8");
        let index: usize = body[1..2].parse().expect("client index");
        assert_eq!(
            envelope.properties.get(DEVICE_ID_PROPERTY),
            Some(format!("dev{index}").as_str())
        );
        assert_eq!(
            envelope.properties.get(DEVICE_KEY_PROPERTY),
            Some(format!("key{index}").as_str())
        );
    }
    server.shutdown();
}

#[test]
fn message_split_across_transfer_frames_is_reassembled() {
    let broker = RecordingBroker::new();
    let mut server = spawn_server(broker.clone(), vec![mapping("E1", "dev1", "key1")]);

    let payload: Vec<u8> = (0..1024u32).map(|i| (i % 251) as u8).collect();
    let mut client = SenderClient::connect(server.local_addr()).expect("connect");
    client.open_link("E1").expect("attach");
    let state = client
        .send_chunked(None, &payload, 100)
        .expect("chunked send");
    assert_eq!(state, DeliveryState::Accepted);
    client.close().expect("close");

    assert!(wait_until(Duration::from_secs(2), || broker.len() == 1));
    assert_eq!(broker.envelopes().remove(0).payload.as_ref(), &payload[..]);
    server.shutdown();
}

#[test]
fn broker_failure_releases_the_delivery() {
    let broker = RecordingBroker::new();
    let mut server = spawn_server(broker.clone(), vec![mapping("E1", "dev1", "key1")]);

    let mut client = SenderClient::connect(server.local_addr()).expect("connect");
    client.open_link("E1").expect("attach");

    broker.fail_next();
    assert_eq!(
        client.send(None, b"dropped").expect("send"),
        DeliveryState::Released
    );
    // The link stays usable afterwards.
    assert_eq!(
        client.send(None, b"kept").expect("send"),
        DeliveryState::Accepted
    );
    client.close().expect("close");

    assert!(wait_until(Duration::from_secs(2), || broker.len() == 1));
    assert_eq!(broker.envelopes().remove(0).payload.as_ref(), b"kept");
    server.shutdown();
}

#[test]
fn typed_properties_render_as_canonical_text() {
    let broker = RecordingBroker::new();
    let mut server = spawn_server(broker.clone(), vec![mapping("E1", "dev1", "key1")]);

    let props = vec![
        (AmqpValue::String("unit".to_string()), AmqpValue::Char('C')),
        (AmqpValue::String("count".to_string()), AmqpValue::Int(-42)),
        (
            AmqpValue::String("big".to_string()),
            AmqpValue::ULong(9_000_000_000),
        ),
        (
            AmqpValue::String("ratio".to_string()),
            AmqpValue::Double(0.5),
        ),
    ];
    let mut client = SenderClient::connect(server.local_addr()).expect("connect");
    client.open_link("E1").expect("attach");
    assert_eq!(
        client.send(Some(&props), b"x").expect("send"),
        DeliveryState::Accepted
    );
    client.close().expect("close");

    assert!(wait_until(Duration::from_secs(2), || broker.len() == 1));
    let envelope = broker.envelopes().remove(0);
    assert_eq!(envelope.properties.get("unit"), Some("'C'"));
    assert_eq!(envelope.properties.get("count"), Some("-42"));
    assert_eq!(envelope.properties.get("big"), Some("9000000000"));
    assert_eq!(envelope.properties.get("ratio"), Some("0.5"));
    server.shutdown();
}

#[test]
fn application_property_cannot_override_device_identity() {
    let broker = RecordingBroker::new();
    let mut server = spawn_server(broker.clone(), vec![mapping("E1", "dev1", "key1")]);

    let props = string_props(&[("deviceid", "impostor"), ("temp", "7")]);
    let mut client = SenderClient::connect(server.local_addr()).expect("connect");
    client.open_link("E1").expect("attach");
    assert_eq!(
        client.send(Some(&props), b"x").expect("send"),
        DeliveryState::Accepted
    );
    client.close().expect("close");

    assert!(wait_until(Duration::from_secs(2), || broker.len() == 1));
    let envelope = broker.envelopes().remove(0);
    assert_eq!(envelope.properties.get(DEVICE_ID_PROPERTY), Some("dev1"));
    assert_eq!(envelope.properties.get("temp"), Some("7"));
    server.shutdown();
}

#[test]
fn shutdown_with_no_connections_is_prompt() {
    let broker = RecordingBroker::new();
    let mut server = spawn_server(broker, vec![mapping("E1", "dev1", "key1")]);
    let addr = server.local_addr();

    let started = std::time::Instant::now();
    server.shutdown();
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(std::net::TcpStream::connect(addr).is_err());
}

#[test]
fn shutdown_disconnects_clients_and_stops_the_worker() {
    let broker = RecordingBroker::new();
    let mut server = spawn_server(broker.clone(), vec![mapping("E1", "dev1", "key1")]);
    let addr = server.local_addr();

    let mut client = SenderClient::connect(addr).expect("connect");
    client.open_link("E1").expect("attach");
    assert_eq!(
        client.send(None, b"x").expect("send"),
        DeliveryState::Accepted
    );

    server.shutdown();

    // Further traffic on the old connection fails once the socket is torn down.
    assert!(client.send(None, b"y").is_err());
    // Nothing is listening any more.
    assert!(std::net::TcpStream::connect(addr).is_err());
    assert_eq!(broker.len(), 1);
}
