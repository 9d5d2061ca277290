//! Wire-level behavior, driven by hand-built frames: framing violations must
//! be absorbed without dropping the connection, and well-framed messages
//! with surprising shapes must degrade gracefully.

mod support;

use std::sync::Arc;
use std::time::Duration;

use palaver::{SeqId, Transport, Value};
use palaver_wire::{encode_frame, DecoderPool, Packetizer};
use support::*;
use tokio::io::{AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};

struct RawPeer {
    server_transport: Arc<Transport>,
    log: Arc<CapturingLog>,
    wire_tx: WriteHalf<DuplexStream>,
    wire_rx: Packetizer<ReadHalf<DuplexStream>>,
}

/// A served transport on one duplex end; the test plays a raw peer on the
/// other, writing bytes by hand.
fn raw_peer() -> RawPeer {
    let (server_stream, test_stream) = tokio::io::duplex(256 * 1024);

    let log = Arc::new(CapturingLog::default());
    let factory = CapturingLogFactory {
        log: Arc::clone(&log),
    };
    let server_transport = Transport::new(server_stream, Some(&factory), None);

    let state = Arc::new(ArithState::default());
    server_transport
        .register_protocol(arith_protocol(state))
        .unwrap();
    server_transport.run_async();

    let (wire_rx, wire_tx) = tokio::io::split(test_stream);
    RawPeer {
        server_transport,
        log,
        wire_tx,
        wire_rx: Packetizer::new(wire_rx, Arc::new(DecoderPool::default()), 1 << 20),
    }
}

fn add_call_frame(seqid: i64, a: i64, b: i64) -> Value {
    Value::Array(vec![
        Value::from(0),
        Value::from(seqid),
        Value::from("test.1.arith.add"),
        Value::Map(vec![
            (Value::from("a"), Value::from(a)),
            (Value::from("b"), Value::from(b)),
        ]),
    ])
}

async fn write_frame(peer: &mut RawPeer, frame: &Value) {
    let bytes = encode_frame(frame).unwrap();
    peer.wire_tx.write_all(&bytes).await.unwrap();
}

async fn read_response(peer: &mut RawPeer) -> (SeqId, Value, Value) {
    let (nfields, mut dec) = peer.wire_rx.next_frame().await.unwrap();
    assert_eq!(nfields, 4);
    assert_eq!(dec.decode_int().unwrap(), 1);
    let seqno = SeqId::new(dec.decode_int().unwrap());
    let err = dec.decode_value().unwrap();
    let res = dec.decode_value().unwrap();
    (seqno, err, res)
}

#[tokio::test]
async fn wrong_arity_call_is_a_recoverable_dispatcher_error() {
    let mut peer = raw_peer();

    // A Call frame with three fields where four are required.
    write_frame(
        &mut peer,
        &Value::Array(vec![
            Value::from(0),
            Value::from(1),
            Value::from("test.1.arith.add"),
        ]),
    )
    .await;

    wait_for("wrong-arity warning", || {
        peer.log
            .warnings()
            .iter()
            .any(|w| w.contains("wrong number of fields"))
    })
    .await;

    // The transport survived; a valid call is served.
    write_frame(&mut peer, &add_call_frame(2, 10, 34)).await;
    let (seqno, err, res) = read_response(&mut peer).await;
    assert_eq!(seqno, SeqId::new(2));
    assert_eq!(err, Value::Nil);
    assert_eq!(res, Value::from(44));
    assert!(peer.server_transport.is_connected());
}

#[tokio::test]
async fn malformed_framing_does_not_close_the_transport() {
    let mut peer = raw_peer();

    // length 1, body 0x05: not a fixarray header.
    peer.wire_tx.write_all(&[0x01, 0x05]).await.unwrap();

    wait_for("packetizer warning", || {
        peer.log
            .warnings()
            .iter()
            .any(|w| w.contains("wrong message structure prefix"))
    })
    .await;

    write_frame(&mut peer, &add_call_frame(0, 1, 2)).await;
    let (_, err, res) = read_response(&mut peer).await;
    assert_eq!(err, Value::Nil);
    assert_eq!(res, Value::from(3));
}

#[tokio::test]
async fn call_with_extra_trailing_fields_is_accepted() {
    let mut peer = raw_peer();

    let mut fields = match add_call_frame(5, 20, 22) {
        Value::Array(fields) => fields,
        _ => unreachable!(),
    };
    fields.push(Value::from("a-future-extension"));
    fields.push(Value::from(true));
    write_frame(&mut peer, &Value::Array(fields)).await;

    let (seqno, err, res) = read_response(&mut peer).await;
    assert_eq!(seqno, SeqId::new(5));
    assert_eq!(err, Value::Nil);
    assert_eq!(res, Value::from(42));
}

#[tokio::test]
async fn response_for_unknown_seqid_is_logged_and_absorbed() {
    let mut peer = raw_peer();

    // This peer never issued a call, so seqid 77 maps to nothing on the
    // server's side.
    write_frame(
        &mut peer,
        &Value::Array(vec![
            Value::from(1),
            Value::from(77),
            Value::Nil,
            Value::from(123),
        ]),
    )
    .await;

    wait_for("unexpected-reply log", || {
        peer.log.unexpected_replies().contains(&SeqId::new(77))
    })
    .await;

    write_frame(&mut peer, &add_call_frame(0, 2, 2)).await;
    let (_, _, res) = read_response(&mut peer).await;
    assert_eq!(res, Value::from(4));
}

#[tokio::test]
async fn unknown_message_type_is_absorbed() {
    let mut peer = raw_peer();

    write_frame(
        &mut peer,
        &Value::Array(vec![Value::from(9), Value::from(0), Value::from(0)]),
    )
    .await;

    wait_for("invalid-type warning", || {
        peer.log
            .warnings()
            .iter()
            .any(|w| w.contains("invalid RPC type"))
    })
    .await;
    assert!(peer.server_transport.is_connected());
}

#[tokio::test]
async fn notify_to_unknown_method_is_dropped_without_reply() {
    let mut peer = raw_peer();

    write_frame(
        &mut peer,
        &Value::Array(vec![
            Value::from(2),
            Value::from("test.1.arith.noSuchNotify"),
            Value::Nil,
        ]),
    )
    .await;

    // No response frame may appear for a notify, known method or not.
    let got = tokio::time::timeout(Duration::from_millis(150), peer.wire_rx.next_frame()).await;
    assert!(got.is_err(), "notify must never be answered");
}
