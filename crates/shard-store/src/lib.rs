//! # Nested Shard Store
//!
//! A storage layer for large multi-dimensional arrays. The array is cut into
//! fixed-size blocks, blocks are grouped into shards, and shards may be
//! grouped into further shards. Only the outermost shard is stored, under its
//! own coordinate as the key.
//!
//! ## Levels
//!
//! Level 0 addresses blocks. Level `l` groups
//! `block_size[l] / block_size[l - 1]` elements of level `l - 1` per
//! dimension. With leaf blocks of `{3}`, shards of `{6}` and outer shards of
//! `{24}`, block 9 lives in slot 1 of shard 4, which lives in slot 0 of outer
//! shard 1, stored under key `[1]`.
//!
//! ## Shard Layout
//!
//! ┌────────────────────────────────────────────────────────────────────┐
//! │ Shard (index at the end)                                           │
//! │┌ ─ ─ ─ ─ ─ ─ ┬ ─ ─ ─┌ ─ ─ ─ ─ ─ ─ ┬ ─ ─ ─ ─ ─ ─ ─ ─ ┬ ─ ─ ─ ─ ─ ─ ┐│
//! │   element    │ ...  │  element    │  (offset, len)  │ index codec  │
//! ││   bytes     │      │   bytes     │  u64 × 2 × S    │    bytes    ││
//! │ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ┘─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ │
//! └────────────────────────────────────────────────────────────────────┘
//!
//! 1. Elements: the encoded bytes of every present sub-element, concatenated
//!    in flat slot order with dimension 0 varying fastest. Absent slots take
//!    no space.
//! 2. Index: one `(offset, len)` pair per slot, little-endian, offsets
//!    counted from the first element byte. `(u64::MAX, u64::MAX)` marks an
//!    absent slot.
//! 3. Index codecs: size-deterministic transforms of the index, by default a
//!    xxhash32 checksum.
//!
//! The index may be placed before the elements instead.
//!
//! ## Usage
//!
//! ```
//! use nested_shard_store::{DataBlock, DatasetConfig, MemPositionStore};
//!
//! let access = DatasetConfig::new(vec![vec![4, 4], vec![16, 16]])
//!     .build::<u16>()
//!     .unwrap();
//! let store = MemPositionStore::new();
//! access
//!     .write_block(&store, DataBlock::filled(&[4, 4], &[5, 2], 7))
//!     .unwrap();
//! assert_eq!(store.keys().len(), 1);
//! let block = access.read_block(&store, &[5, 2]).unwrap().unwrap();
//! assert!(block.data().iter().all(|&v| v == 7));
//! assert!(access.delete_block(&store, &[5, 2]).unwrap());
//! assert!(store.is_empty());
//! ```
pub mod codec;
pub mod config;
pub mod dataset;
pub mod grid;
pub mod index;
pub mod position;
pub mod raw_shard;
pub mod segment;
pub mod shard;
pub mod store;

pub use codec::{
    BlockCodec, CompressionType, DataBlock, DefaultBlockCodec, Element, LevelPayload, NestedCodec,
    ShardCodec,
};
pub use config::{DatasetConfig, ShardConfig};
pub use dataset::DatasetAccess;
pub use grid::NestedGrid;
pub use index::{IndexCodec, IndexLocation, ShardIndex, Xxh32Checksum, EMPTY_SLOT};
pub use nested_shard_common::{Coords, ShardError, ShardResult};
pub use position::NestedPosition;
pub use raw_shard::RawShard;
pub use segment::Segment;
pub use shard::{
    BlobShard, BlockMapShard, InMemoryShard, Shard, ShardContext, ShardKind, SplitShard,
};
pub use store::{FsPositionStore, MemPositionStore, PositionValueAccess};
