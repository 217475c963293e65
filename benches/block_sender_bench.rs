use criterion::{black_box, criterion_group, criterion_main, Criterion};
use incr_serve::file::{File, MemBlockSource};
use incr_serve::{batcher::OutputBatcher, sender};
use std::io::Cursor;

fn bench_send_block(c: &mut Criterion) {
    let zeros = vec![0u8; 1024 * 1024];
    let random: Vec<u8> = {
        let mut state: u32 = 0x1234_5678;
        (0..1024 * 1024)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                (state & 0xff) as u8
            })
            .collect()
    };

    c.bench_function("send_block_compressible", |b| {
        b.iter(|| {
            let mut file = File::new(0, "zeros", zeros.len() as u64, MemBlockSource(zeros.clone()));
            let mut batcher = OutputBatcher::new();
            let mut conn = Cursor::new(Vec::new());
            for idx in 0..file.block_count() {
                sender::send_block(&mut file, &mut batcher, &mut conn, black_box(idx), false, |_, _| {});
            }
        })
    });

    c.bench_function("send_block_incompressible", |b| {
        b.iter(|| {
            let mut file = File::new(0, "random", random.len() as u64, MemBlockSource(random.clone()));
            let mut batcher = OutputBatcher::new();
            let mut conn = Cursor::new(Vec::new());
            for idx in 0..file.block_count() {
                sender::send_block(&mut file, &mut batcher, &mut conn, black_box(idx), false, |_, _| {});
            }
        })
    });
}

criterion_group!(benches, bench_send_block);
criterion_main!(benches);
