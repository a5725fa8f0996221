use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use qnet::frame::{self, FrameKind, FrameReader};
use qnet::highway::{BlockPlan, Resource, ResourceKind};
use qnet::SessionKey;

fn bench_frame_encode(c: &mut Criterion) {
    let key = SessionKey::from_bytes([7u8; 32]);
    let mut group = c.benchmark_group("frame_encode");

    for size in [64usize, 1024, 16 * 1024, 256 * 1024].iter() {
        let payload = vec![0xA5u8; *size];
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| frame::encode(FrameKind::Request, black_box(&payload), Some(&key)).unwrap());
        });
    }
    group.finish();
}

fn bench_frame_reader(c: &mut Criterion) {
    let key = SessionKey::from_bytes([7u8; 32]);
    let mut stream = Vec::new();
    for _ in 0..100 {
        let bytes = frame::encode(FrameKind::Push, &[0x5Au8; 512], Some(&key)).unwrap();
        stream.extend_from_slice(&bytes);
    }

    c.bench_function("frame_reader_100_frames", |b| {
        b.iter(|| {
            let mut reader = FrameReader::default();
            // 읽기 단위가 프레임 경계와 맞지 않게 잘라서 투입
            for piece in stream.chunks(700) {
                reader.extend(piece);
                while let Ok(Some(frame)) = reader.next_frame(Some(&key)) {
                    black_box(frame);
                }
            }
        });
    });
}

fn bench_block_plan(c: &mut Criterion) {
    let resource = Resource::from_bytes(vec![0x42u8; 8 * 1024 * 1024], ResourceKind::File);

    c.bench_function("block_plan_8mb", |b| {
        b.iter(|| BlockPlan::new(black_box(&resource.data), 256 * 1024));
    });
}

criterion_group!(benches, bench_frame_encode, bench_frame_reader, bench_block_plan);
criterion_main!(benches);
