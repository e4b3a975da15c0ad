//! Per-level codecs.
//!
//! Level 0 turns a [`DataBlock`] into bytes, every level above turns a
//! [`RawShard`] into bytes. [`NestedCodec`] holds one codec per level and
//! hands out a [`LevelPayload`], so the recursion in
//! [`DatasetAccess`](crate::DatasetAccess) treats leaves and shards alike.

use std::{fmt::Debug, sync::Arc};

use bytes::Bytes;
use enum_as_inner::EnumAsInner;
use nested_shard_common::{arg_err, decode_err, ShardResult};

use crate::{config::ShardConfig, grid::NestedGrid, raw_shard::RawShard};

pub mod block;
pub mod compress;
pub mod shard;

pub use block::{DataBlock, DefaultBlockCodec, Element};
pub use compress::CompressionType;
pub use shard::ShardCodec;

/// Encodes one level's payload to bytes and back. Must be deterministic and
/// must decode a byte range sliced exactly to the encoded length.
pub trait BlockCodec<P>: Debug + Send + Sync {
    fn encode(&self, payload: &P) -> ShardResult<Bytes>;
    fn decode(&self, data: Bytes, grid_position: &[u64]) -> ShardResult<P>;
}

#[derive(Debug, Clone, PartialEq, EnumAsInner)]
pub enum LevelPayload<T> {
    Block(DataBlock<T>),
    Shard(RawShard),
}

#[derive(Debug, Clone)]
pub struct NestedCodec<T> {
    leaf: Arc<dyn BlockCodec<DataBlock<T>>>,
    /// `shards[level - 1]` encodes level `level`.
    shards: Vec<ShardCodec>,
}

impl<T: Element> NestedCodec<T> {
    /// One [`ShardConfig`] per level above the leaves.
    ///
    /// # Errors
    /// - [ShardError::ArgErr](nested_shard_common::ShardError::ArgErr) if the number of configs
    ///   does not match the grid
    pub fn new(
        grid: &NestedGrid,
        leaf: Arc<dyn BlockCodec<DataBlock<T>>>,
        shard_configs: &[ShardConfig],
    ) -> ShardResult<Self> {
        if shard_configs.len() + 1 != grid.num_levels() {
            return Err(arg_err!(
                "{} shard configs for a grid of {} levels",
                shard_configs.len(),
                grid.num_levels()
            ));
        }
        let shards = shard_configs
            .iter()
            .enumerate()
            .map(|(i, config)| config.codec(grid.relative_block_size(i + 1)))
            .collect();
        Ok(Self { leaf, shards })
    }

    pub fn num_levels(&self) -> usize {
        self.shards.len() + 1
    }

    pub fn leaf(&self) -> &Arc<dyn BlockCodec<DataBlock<T>>> {
        &self.leaf
    }

    /// The codec of shard level `level` (`level >= 1`).
    pub fn shard(&self, level: usize) -> &ShardCodec {
        &self.shards[level - 1]
    }

    pub fn decode(&self, level: usize, data: Bytes, grid_position: &[u64]) -> ShardResult<LevelPayload<T>> {
        if level == 0 {
            self.leaf.decode(data, grid_position).map(LevelPayload::Block)
        } else {
            self.shard(level).decode(data, grid_position).map(LevelPayload::Shard)
        }
    }

    /// Decodes a level above the leaves.
    pub fn decode_shard(&self, level: usize, data: Bytes, grid_position: &[u64]) -> ShardResult<RawShard> {
        self.decode(level, data, grid_position)?
            .into_shard()
            .map_err(|_| decode_err!("level {} does not hold a shard", level))
    }

    pub fn encode(&self, level: usize, payload: &LevelPayload<T>) -> ShardResult<Bytes> {
        match (level, payload) {
            (0, LevelPayload::Block(block)) => self.leaf.encode(block),
            (level, LevelPayload::Shard(shard)) if level > 0 => self.shard(level).encode(shard),
            (level, _) => Err(arg_err!("payload does not match level {}", level)),
        }
    }
}
