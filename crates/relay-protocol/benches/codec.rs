//! Codec benchmarks for relay-protocol.

use chrono::Utc;
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use relay_protocol::{codec, ClientFrame, MessageRecord, Sender, SenderProfile, ServerFrame};
use uuid::Uuid;

fn publish_text(body_len: usize) -> String {
    serde_json::json!({
        "type": "message",
        "channelName": "chat:room",
        "message": "x".repeat(body_len),
        "senderId": "64f1c2a9e4b0d1a2b3c4d5e6",
        "files": ["/uploads/a.png"],
    })
    .to_string()
}

fn bench_decode_publish(c: &mut Criterion) {
    let text = publish_text(64);

    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Bytes(text.len() as u64));
    group.bench_function("publish_64B", |b| {
        b.iter(|| match codec::decode(black_box(&text)) {
            Ok(ClientFrame::Message(frame)) => frame.validate().is_ok(),
            _ => false,
        })
    });
    group.finish();
}

fn bench_encode_broadcast(c: &mut Criterion) {
    let frame = ServerFrame::message(MessageRecord {
        id: Uuid::new_v4(),
        channel_name: "chat:room".to_string(),
        message: "x".repeat(256),
        sender_id: Sender::Profile(SenderProfile {
            id: "64f1c2a9e4b0d1a2b3c4d5e6".to_string(),
            full_name: "Ada Lovelace".to_string(),
            profile_image: Some("/uploads/ada.png".to_string()),
        }),
        files: vec![],
        created_at: Utc::now(),
    });

    let mut group = c.benchmark_group("encode");
    group.throughput(Throughput::Bytes(256));
    group.bench_function("broadcast_256B", |b| {
        b.iter(|| codec::encode(black_box(&frame)))
    });
    group.finish();
}

fn bench_decode_malformed(c: &mut Criterion) {
    let text = "{\"type\":\"message\",".repeat(8);

    c.bench_function("decode_malformed", |b| {
        b.iter(|| codec::decode(black_box(&text)).is_err())
    });
}

criterion_group!(
    benches,
    bench_decode_publish,
    bench_encode_broadcast,
    bench_decode_malformed
);
criterion_main!(benches);
