use bytes::Bytes;
use criterion::{Criterion, black_box, criterion_group, criterion_main};
use sonic_rs::JsonValueTrait;

use stage_bridge::core::{WireMessage, WsFrame, decode_frame_value, envelope};

fn wire_frame() -> Bytes {
    Bytes::from_static(
        br#"{"sender":"s.actor.7","actor":"ui","payload":{"symbol":"BTCUSDT","price":"64250.5","qty":"0.012","ts":1717000000123,"side":"Buy"}}"#,
    )
}

fn bench_decode_1000_bridge_frames(c: &mut Criterion) {
    let frame = WsFrame::Text(wire_frame());

    c.bench_function("decode_1000_bridge_frames_value", |b| {
        b.iter(|| {
            for _ in 0..1000 {
                let value = decode_frame_value(black_box(&frame)).unwrap();
                black_box(value);
            }
        })
    });
}

fn bench_decode_1000_wire_messages(c: &mut Criterion) {
    let bytes = wire_frame();

    c.bench_function("decode_1000_wire_messages_to_record", |b| {
        b.iter(|| {
            for _ in 0..1000 {
                let record = WireMessage::decode(black_box(bytes.as_ref()))
                    .and_then(WireMessage::into_record)
                    .unwrap();
                black_box(record);
            }
        })
    });
}

fn bench_lazy_payload_field(c: &mut Criterion) {
    let bytes = wire_frame();

    // What a subscriber pays when it only needs one field instead of the full value.
    c.bench_function("get_1000_payload_ts_lazy", |b| {
        b.iter(|| {
            for _ in 0..1000 {
                let ts = sonic_rs::get(black_box(bytes.as_ref()), &["payload", "ts"])
                    .ok()
                    .and_then(|v| v.as_i64());
                black_box(ts);
            }
        })
    });
}

fn bench_envelope_round_trip(c: &mut Criterion) {
    let payload = sonic_rs::json!({"hello": "world", "n": [1, 2, 3]});

    c.bench_function("envelope_encode_decode_1000", |b| {
        b.iter(|| {
            for _ in 0..1000 {
                let text = envelope::encode("pong", black_box(&payload)).unwrap();
                black_box(envelope::decode(&text).unwrap());
            }
        })
    });
}

criterion_group!(
    benches,
    bench_decode_1000_bridge_frames,
    bench_decode_1000_wire_messages,
    bench_lazy_payload_field,
    bench_envelope_round_trip
);
criterion_main!(benches);
