use criterion::{black_box, criterion_group, criterion_main, Criterion};
use nested_shard_store::{DataBlock, DatasetConfig, MemPositionStore};

pub fn entry(c: &mut Criterion) {
    let access = DatasetConfig::new(vec![vec![16, 16], vec![64, 64], vec![256, 256]])
        .build::<f32>()
        .unwrap();
    let blocks: Vec<DataBlock<f32>> = (0..16u64)
        .flat_map(|x| (0..16u64).map(move |y| [x, y]))
        .map(|at| DataBlock::filled(&[16, 16], &at, (at[0] * 16 + at[1]) as f32))
        .collect();
    let positions: Vec<[u64; 2]> = blocks
        .iter()
        .map(|b| [b.grid_position()[0], b.grid_position()[1]])
        .collect();

    c.bench_function("write 256 blocks sequentially", |b| {
        b.iter(|| {
            let store = MemPositionStore::new();
            for block in &blocks {
                access.write_block(&store, black_box(block.clone())).unwrap();
            }
        });
    });
    c.bench_function("write 256 blocks as a batch", |b| {
        b.iter(|| {
            let store = MemPositionStore::new();
            access.write_blocks(&store, black_box(blocks.clone())).unwrap();
        });
    });

    let store = MemPositionStore::new();
    access.write_blocks(&store, blocks.clone()).unwrap();
    c.bench_function("read 256 blocks as a batch", |b| {
        b.iter(|| black_box(access.read_blocks(&store, &positions).unwrap()));
    });
}

criterion_group!(benches, entry);
criterion_main!(benches);
