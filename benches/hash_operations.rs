use criterion::{black_box, criterion_group, criterion_main, Criterion};

use voxel_hash::core::types::BlockCoord;
use voxel_hash::volume::{BlockHashTable, BlockHeap};

fn coord(i: u32) -> BlockCoord {
    BlockCoord::new((i % 64) as i32, ((i / 64) % 64) as i32, (i / 4096) as i32)
}

fn bench_hash_operations(c: &mut Criterion) {
    let table = BlockHashTable::new(4099, 10, 4099 * 10 * 2);
    let heap = BlockHeap::new(1 << 16, 255);
    for i in 0..10_000 {
        table.alloc_if_absent(coord(i), &heap).unwrap();
    }

    let mut i = 0u32;
    c.bench_function("hash_find_hit", |b| {
        b.iter(|| {
            i = (i + 1) % 10_000;
            black_box(table.find(coord(i)))
        })
    });

    let mut j = 0i32;
    c.bench_function("hash_find_miss", |b| {
        b.iter(|| {
            j += 1;
            black_box(table.find(BlockCoord::new(-j, -j, -j)))
        })
    });

    let mut k = 0u32;
    c.bench_function("hash_alloc_existing", |b| {
        b.iter(|| {
            k = (k + 1) % 10_000;
            black_box(table.alloc_if_absent(coord(k), &heap).unwrap())
        })
    });
}

fn bench_insert_remove_cycle(c: &mut Criterion) {
    let table = BlockHashTable::new(1021, 10, 1021 * 10 * 2);
    let heap = BlockHeap::new(4096, 255);

    let mut i = 0i32;
    c.bench_function("hash_insert_remove", |b| {
        b.iter(|| {
            i += 1;
            let key = BlockCoord::new(i, -i, i ^ 7);
            table.alloc_if_absent(key, &heap).unwrap();
            table.remove(key, &heap);
        })
    });
}

criterion_group!(benches, bench_hash_operations, bench_insert_remove_cycle);
criterion_main!(benches);
