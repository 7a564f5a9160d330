//! Performance benchmarks for the wsplex codec and send queue.
//!
//! Run with: `cargo bench`

use bytes::BytesMut;
use criterion::{BatchSize, Criterion, Throughput, black_box, criterion_group, criterion_main};
use wsplex::protocol::{Fragmenter, Frame, HandshakeRequest, HandshakeResponse, OpCode, apply_mask, apply_mask_fast, compute_accept_key};
use wsplex::queue::PriorityQueue;

const MASK: [u8; 4] = [0x37, 0xfa, 0x21, 0x3d];

fn encoded(payload_size: usize, mask: Option<[u8; 4]>) -> BytesMut {
    let mut buf = BytesMut::new();
    Frame::binary(vec![0xAB; payload_size]).encode(&mut buf, mask);
    buf
}

fn bench_frame_parsing(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_parsing");

    for (name, size) in [("10b", 10), ("1kb", 1024), ("64kb", 65536)] {
        let unmasked = encoded(size, None);
        let masked = encoded(size, Some(MASK));
        group.throughput(Throughput::Bytes(size as u64));

        group.bench_function(format!("{name}_unmasked"), |b| {
            b.iter(|| Frame::parse(black_box(&unmasked)))
        });
        // Includes the lazy unmask on first payload access.
        group.bench_function(format!("{name}_masked"), |b| {
            b.iter(|| {
                let (frame, _) = Frame::parse(black_box(&masked)).unwrap();
                black_box(frame.payload().len())
            })
        });
    }

    group.finish();
}

fn bench_frame_encoding(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_encoding");

    for (name, size) in [("10b", 10), ("64kb", 65536)] {
        let frame = Frame::binary(vec![0xAB; size]);
        group.throughput(Throughput::Bytes(size as u64));

        group.bench_function(format!("{name}_server"), |b| {
            let mut buf = BytesMut::with_capacity(size + 14);
            b.iter(|| {
                buf.clear();
                frame.encode(&mut buf, None);
            })
        });
        group.bench_function(format!("{name}_client"), |b| {
            let mut buf = BytesMut::with_capacity(size + 14);
            b.iter(|| {
                buf.clear();
                frame.encode(&mut buf, Some(MASK));
            })
        });
    }

    let payload = vec![0xCD; 1024 * 1024];
    group.throughput(Throughput::Bytes(payload.len() as u64));
    group.bench_function("fragment_1mb_16kb", |b| {
        b.iter(|| Fragmenter::new(black_box(&payload), OpCode::Binary, Some(16 * 1024)).count())
    });

    group.finish();
}

fn bench_masking(c: &mut Criterion) {
    let mut group = c.benchmark_group("masking");

    for (name, size) in [("64b", 64), ("1kb", 1024), ("64kb", 65536), ("1mb", 1024 * 1024)] {
        group.throughput(Throughput::Bytes(size as u64));

        group.bench_function(format!("apply_mask_{name}"), |b| {
            let mut data = vec![0xAB; size];
            b.iter(|| apply_mask(black_box(&mut data), MASK))
        });
        group.bench_function(format!("apply_mask_fast_{name}"), |b| {
            let mut data = vec![0xAB; size];
            b.iter(|| apply_mask_fast(black_box(&mut data), MASK))
        });
    }

    group.finish();
}

fn bench_handshake(c: &mut Criterion) {
    let mut group = c.benchmark_group("handshake");

    let key = "dGhlIHNhbXBsZSBub25jZQ==";
    group.bench_function("compute_accept_key", |b| {
        b.iter(|| compute_accept_key(black_box(key)))
    });

    let request = "GET /chat HTTP/1.1\r\n\
        Host: server.example.com\r\n\
        Upgrade: websocket\r\n\
        Connection: Upgrade\r\n\
        Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
        Sec-WebSocket-Version: 13\r\n\
        Sec-WebSocket-Protocol: chat, superchat\r\n\
        \r\n";

    group.bench_function("full_server_side", |b| {
        b.iter(|| {
            let req = HandshakeRequest::parse(black_box(request)).unwrap();
            req.validate().unwrap();
            let mut buf = Vec::with_capacity(256);
            HandshakeResponse::from_request(&req).write(&mut buf).unwrap();
            black_box(buf)
        })
    });

    let response = "HTTP/1.1 101 Switching Protocols\r\n\
        Upgrade: websocket\r\n\
        Connection: Upgrade\r\n\
        Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n\
        \r\n";
    group.bench_function("parse_and_verify_response", |b| {
        b.iter(|| {
            let resp = HandshakeResponse::parse(black_box(response)).unwrap();
            resp.verify(key)
        })
    });

    group.finish();
}

fn bench_queue(c: &mut Criterion) {
    let mut group = c.benchmark_group("priority_queue");
    group.throughput(Throughput::Elements(1000));

    group.bench_function("push_pop_1000_mixed", |b| {
        b.iter_batched(
            PriorityQueue::new,
            |queue| {
                for i in 0..1000u32 {
                    if i % 10 == 0 {
                        let _ = queue.push_prioritized(i);
                    } else {
                        let _ = queue.push(i);
                    }
                }
                while let Some(item) = queue.try_pop() {
                    black_box(item);
                }
            },
            BatchSize::SmallInput,
        )
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_frame_parsing,
    bench_frame_encoding,
    bench_masking,
    bench_handshake,
    bench_queue
);

criterion_main!(benches);
