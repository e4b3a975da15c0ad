#![allow(dead_code)]
use std::sync::Mutex;

use bytes::Bytes;
use nested_shard_store::{
    Coords, DataBlock, DatasetAccess, DatasetConfig, MemPositionStore, PositionValueAccess,
    ShardResult,
};
use rustc_hash::FxHashSet;

/// A memory store that records which keys were touched.
#[derive(Debug, Default)]
pub struct TrackingStore {
    inner: MemPositionStore,
    gets: Mutex<Vec<Coords>>,
    puts: Mutex<Vec<Coords>>,
    removes: Mutex<Vec<Coords>>,
}

impl TrackingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inner(&self) -> &MemPositionStore {
        &self.inner
    }

    pub fn gets(&self) -> Vec<Coords> {
        self.gets.lock().unwrap().clone()
    }

    pub fn puts(&self) -> Vec<Coords> {
        self.puts.lock().unwrap().clone()
    }

    pub fn removes(&self) -> Vec<Coords> {
        self.removes.lock().unwrap().clone()
    }

    pub fn distinct_keys_read(&self) -> usize {
        self.gets().into_iter().collect::<FxHashSet<_>>().len()
    }

    pub fn reset(&self) {
        self.gets.lock().unwrap().clear();
        self.puts.lock().unwrap().clear();
        self.removes.lock().unwrap().clear();
    }
}

impl PositionValueAccess for TrackingStore {
    fn get(&self, key: &[u64]) -> ShardResult<Option<Bytes>> {
        self.gets.lock().unwrap().push(Coords::from_slice(key));
        self.inner.get(key)
    }

    fn put(&self, key: &[u64], value: Bytes) -> ShardResult<()> {
        self.puts.lock().unwrap().push(Coords::from_slice(key));
        self.inner.put(key, value)
    }

    fn remove(&self, key: &[u64]) -> ShardResult<()> {
        self.removes.lock().unwrap().push(Coords::from_slice(key));
        self.inner.remove(key)
    }
}

pub fn access<T: nested_shard_store::Element>(sizes: &[&[u64]]) -> DatasetAccess<T> {
    DatasetConfig::new(sizes.iter().map(|s| s.to_vec()).collect())
        .build::<T>()
        .unwrap()
}

/// A leaf block of the grid's block size filled with `value`.
pub fn filled<T: nested_shard_store::Element>(
    access: &DatasetAccess<T>,
    at: &[u64],
    value: T,
) -> DataBlock<T> {
    DataBlock::filled(access.grid().block_size(0), at, value)
}

/// A leaf block whose every element is distinct, derived from `seed`.
pub fn patterned(access: &DatasetAccess<i32>, at: &[u64], seed: i32) -> DataBlock<i32> {
    let size = access.grid().block_size(0);
    let n: u64 = size.iter().product();
    let data = (0..n as i32).map(|i| seed.wrapping_mul(31).wrapping_add(i)).collect();
    DataBlock::new(size, at, data).unwrap()
}
