//! Whole-shard access to the innermost shard level.
//!
//! Every variant stores the same thing and serializes it to the same bytes.
//! They differ only in when bytes are decoded and how mutations are kept:
//!
//! - [`InMemoryShard`]: typed blocks, encoded on serialization only
//! - [`BlobShard`]: the stored blob, sliced lazily per block
//! - [`SplitShard`]: one compacting payload buffer next to a mutable index
//! - [`BlockMapShard`]: encoded bytes per slot, appended in insertion order

use std::{fmt::Debug, sync::Arc};

use bytes::Bytes;
use nested_shard_common::{arg_err, flat_index, Coords, ShardResult};

use crate::{
    codec::{BlockCodec, DataBlock, Element, ShardCodec},
    grid::NestedGrid,
    index::ShardIndex,
    raw_shard::check_relative_position,
};

mod blob;
mod block_map;
mod in_memory;
mod split;

pub use blob::BlobShard;
pub use block_map::BlockMapShard;
pub use in_memory::InMemoryShard;
pub use split::SplitShard;

/// One shard of leaf blocks, addressed by the blocks' positions relative to
/// the shard.
pub trait Shard<T: Element>: Debug + Send {
    /// The shard's coordinate at level 1.
    fn grid_position(&self) -> &[u64];

    /// Slots per dimension.
    fn shape(&self) -> &[u64];

    fn get_block(&self, pos: &[u64]) -> ShardResult<Option<DataBlock<T>>>;

    /// One entry per requested position, in request order.
    fn get_blocks(&self, positions: &[Coords]) -> ShardResult<Vec<Option<DataBlock<T>>>> {
        positions.iter().map(|p| self.get_block(p)).collect()
    }

    /// Adds `block`, replacing the block at the same position.
    ///
    /// # Errors
    /// - [ShardError::ArgErr](nested_shard_common::ShardError::ArgErr) if the block does not
    ///   belong to this shard
    fn add_block(&mut self, block: DataBlock<T>) -> ShardResult<()>;

    /// Returns whether a block was removed.
    fn remove_block(&mut self, pos: &[u64]) -> ShardResult<bool>;

    /// The index of the variant's current payload layout. Offsets follow
    /// insertion order for the mutable variants.
    fn index(&self) -> ShardResult<ShardIndex>;

    fn is_empty(&self) -> bool;

    /// The whole shard in the canonical layout.
    fn create_read_data(&self) -> ShardResult<Bytes>;
}

/// Which [`Shard`] implementation [`DatasetAccess::read_shard`](crate::DatasetAccess::read_shard)
/// hands out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShardKind {
    InMemory,
    #[default]
    Blob,
    Split,
    BlockMap,
}

impl ShardKind {
    pub const ALL: [ShardKind; 4] = [
        ShardKind::InMemory,
        ShardKind::Blob,
        ShardKind::Split,
        ShardKind::BlockMap,
    ];

    /// Opens stored bytes, or an empty shard for `None`.
    pub fn open<T: Element>(
        self,
        ctx: ShardContext<T>,
        data: Option<Bytes>,
    ) -> ShardResult<Box<dyn Shard<T>>> {
        Ok(match (self, data) {
            (ShardKind::InMemory, None) => Box::new(InMemoryShard::new(ctx)),
            (ShardKind::InMemory, Some(data)) => Box::new(InMemoryShard::from_bytes(ctx, data)?),
            (ShardKind::Blob, None) => Box::new(BlobShard::new(ctx)),
            (ShardKind::Blob, Some(data)) => Box::new(BlobShard::from_bytes(ctx, data)?),
            (ShardKind::Split, None) => Box::new(SplitShard::new(ctx)),
            (ShardKind::Split, Some(data)) => Box::new(SplitShard::from_bytes(ctx, data)?),
            (ShardKind::BlockMap, None) => Box::new(BlockMapShard::new(ctx)),
            (ShardKind::BlockMap, Some(data)) => Box::new(BlockMapShard::from_bytes(ctx, data)?),
        })
    }
}

/// What every shard variant needs to know about where it lives.
#[derive(Debug, Clone)]
pub struct ShardContext<T> {
    grid: Arc<NestedGrid>,
    position: Coords,
    codec: ShardCodec,
    leaf: Arc<dyn BlockCodec<DataBlock<T>>>,
}

impl<T: Element> ShardContext<T> {
    /// `position` is the shard's coordinate at level 1.
    ///
    /// # Errors
    /// - [ShardError::ArgErr](nested_shard_common::ShardError::ArgErr) if the grid has no shard
    ///   level, or the position or codec do not fit it
    pub fn new(
        grid: Arc<NestedGrid>,
        position: &[u64],
        codec: ShardCodec,
        leaf: Arc<dyn BlockCodec<DataBlock<T>>>,
    ) -> ShardResult<Self> {
        if grid.num_levels() < 2 {
            return Err(arg_err!("a grid of one level has no shards"));
        }
        if position.len() != grid.num_dimensions() {
            return Err(arg_err!(
                "shard position {:?} does not have {} dimensions",
                position,
                grid.num_dimensions()
            ));
        }
        if codec.shape() != grid.relative_block_size(1) {
            return Err(arg_err!(
                "codec for {:?} slots used for shards of {:?} blocks",
                codec.shape(),
                grid.relative_block_size(1)
            ));
        }
        Ok(Self {
            grid,
            position: Coords::from_slice(position),
            codec,
            leaf,
        })
    }

    pub fn grid_position(&self) -> &[u64] {
        &self.position
    }

    pub fn shape(&self) -> &[u64] {
        self.codec.shape()
    }

    pub fn codec(&self) -> &ShardCodec {
        &self.codec
    }

    pub(crate) fn num_slots(&self) -> usize {
        self.codec.empty_index().num_slots()
    }

    pub(crate) fn slot(&self, pos: &[u64]) -> ShardResult<usize> {
        check_relative_position(pos, self.shape())?;
        Ok(flat_index(pos, self.shape()))
    }

    /// The level 0 coordinate of the block at relative `pos`.
    pub fn block_grid_position(&self, pos: &[u64]) -> Coords {
        self.position
            .iter()
            .zip(self.shape().iter().zip(pos.iter()))
            .map(|(&p, (&s, &r))| p * s + r)
            .collect()
    }

    /// The position of `block` relative to this shard.
    pub(crate) fn relative_of(&self, block: &DataBlock<T>) -> ShardResult<Coords> {
        let at = block.grid_position();
        if at.len() != self.grid.num_dimensions() {
            return Err(arg_err!(
                "block position {:?} does not have {} dimensions",
                at,
                self.grid.num_dimensions()
            ));
        }
        if block.size() != self.grid.block_size(0) {
            return Err(arg_err!(
                "block of size {:?} in a grid of {:?} blocks",
                block.size(),
                self.grid.block_size(0)
            ));
        }
        let owner = self.grid.absolute_position(at, 0, 1);
        if owner != self.position {
            return Err(arg_err!(
                "block {:?} belongs to shard {:?}, not {:?}",
                at,
                owner,
                self.position
            ));
        }
        Ok(self.grid.relative_position(at, 0, 0))
    }

    pub(crate) fn decode_block(&self, data: Bytes, pos: &[u64]) -> ShardResult<DataBlock<T>> {
        self.leaf.decode(data, &self.block_grid_position(pos))
    }

    pub(crate) fn encode_block(&self, block: &DataBlock<T>) -> ShardResult<Bytes> {
        self.leaf.encode(block)
    }

    /// Canonical shard bytes from one optional element per slot.
    pub(crate) fn write_slots(&self, slots: &[Option<Bytes>]) -> Bytes {
        self.codec.encode_elements(slots.iter().map(|s| s.as_deref()))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use smallvec::smallvec;

    use super::*;
    use crate::{codec::DefaultBlockCodec, config::ShardConfig};

    pub(crate) fn context(position: &[u64]) -> ShardContext<u16> {
        let grid = Arc::new(NestedGrid::new(vec![smallvec![2, 2], smallvec![6, 4]]).unwrap());
        let codec = ShardConfig::default().codec(grid.relative_block_size(1));
        ShardContext::<u16>::new(
            grid,
            position,
            codec,
            Arc::new(DefaultBlockCodec::<u16>::default()),
        )
        .unwrap()
    }

    pub(crate) fn block(ctx: &ShardContext<u16>, pos: &[u64], value: u16) -> DataBlock<u16> {
        DataBlock::filled(&[2, 2], &ctx.block_grid_position(pos), value)
    }

    /// Drives one variant through adds, replacements and removals, checking
    /// it against the bytes of a freshly built canonical shard.
    pub(crate) fn exercise(kind: ShardKind) {
        let ctx = context(&[1, 2]);
        let mut shard = kind.open(ctx.clone(), None).unwrap();
        assert!(shard.is_empty());
        assert_eq!(shard.grid_position(), &[1, 2]);
        assert_eq!(shard.shape(), &[3, 2]);

        shard.add_block(block(&ctx, &[2, 1], 7)).unwrap();
        shard.add_block(block(&ctx, &[0, 0], 3)).unwrap();
        shard.add_block(block(&ctx, &[1, 1], 5)).unwrap();
        shard.add_block(block(&ctx, &[0, 0], 4)).unwrap();
        assert!(shard.remove_block(&[1, 1]).unwrap());
        assert!(!shard.remove_block(&[1, 1]).unwrap());
        assert!(shard.remove_block(&[3, 0]).is_err());

        let outsider = DataBlock::filled(&[2, 2], &[0, 0], 1u16);
        assert!(shard.add_block(outsider).is_err());
        assert!(shard
            .add_block(DataBlock::filled(&[1, 1], &ctx.block_grid_position(&[0, 1]), 1u16))
            .is_err());

        assert_eq!(shard.get_block(&[0, 0]).unwrap(), Some(block(&ctx, &[0, 0], 4)));
        assert_eq!(shard.get_block(&[1, 1]).unwrap(), None);
        let got = shard
            .get_blocks(&[smallvec![2, 1], smallvec![1, 0], smallvec![0, 0]])
            .unwrap();
        assert_eq!(
            got,
            vec![Some(block(&ctx, &[2, 1], 7)), None, Some(block(&ctx, &[0, 0], 4))]
        );

        let index = shard.index().unwrap();
        assert_eq!(index.present().count(), 2);

        let mut expected = vec![None; 6];
        expected[0] = Some(ctx.encode_block(&block(&ctx, &[0, 0], 4)).unwrap());
        expected[5] = Some(ctx.encode_block(&block(&ctx, &[2, 1], 7)).unwrap());
        let bytes = shard.create_read_data().unwrap();
        assert_eq!(bytes, ctx.write_slots(&expected));

        // reopening keeps the content
        let reopened = kind.open(ctx.clone(), Some(bytes.clone())).unwrap();
        assert_eq!(reopened.create_read_data().unwrap(), bytes);
        assert_eq!(reopened.get_block(&[2, 1]).unwrap(), Some(block(&ctx, &[2, 1], 7)));

        assert!(shard.remove_block(&[0, 0]).unwrap());
        assert!(shard.remove_block(&[2, 1]).unwrap());
        assert!(shard.is_empty());
        assert_eq!(
            shard.create_read_data().unwrap().len(),
            ctx.codec().empty_index().num_bytes()
        );
    }

    #[test]
    fn context_checks() {
        let ctx = context(&[1, 2]);
        assert_eq!(ctx.block_grid_position(&[2, 1]).as_slice(), &[5, 5]);
        assert_eq!(ctx.relative_of(&block(&ctx, &[2, 1], 0)).unwrap().as_slice(), &[2, 1]);
        assert!(ctx.slot(&[3, 0]).is_err());
        assert_eq!(ctx.slot(&[1, 1]).unwrap(), 4);

        let grid = Arc::new(NestedGrid::new(vec![smallvec![2]]).unwrap());
        let codec = ShardConfig::default().codec(&[1]);
        let leaf = Arc::new(DefaultBlockCodec::<u8>::default());
        assert!(ShardContext::<u8>::new(grid, &[0], codec, leaf).is_err());
    }

    #[test]
    fn all_variants_serialize_alike() {
        let ctx = context(&[0, 0]);
        let blobs: Vec<Bytes> = ShardKind::ALL
            .iter()
            .map(|kind| {
                let mut shard = kind.open(ctx.clone(), None).unwrap();
                for (i, pos) in [[1u64, 1], [0, 0], [2, 0], [1, 0]].iter().enumerate() {
                    shard.add_block(block(&ctx, pos, i as u16)).unwrap();
                }
                shard.remove_block(&[0, 0]).unwrap();
                shard.create_read_data().unwrap()
            })
            .collect();
        assert!(blobs.windows(2).all(|w| w[0] == w[1]));
    }
}
