//! Reads, writes and deletes leaf blocks through every nesting level.
//!
//! Each call walks from the outermost level down to level 0. Writes and
//! deletes rebuild the path on the way back up, so the only value persisted
//! is the outermost shard returned by the top of the recursion. Batches are
//! grouped by ancestor first, so every shard on the way is decoded and
//! re-encoded once per call.

use std::sync::Arc;

use bytes::Bytes;
use nested_shard_common::{arg_err, unflatten, ShardResult};
use tracing::{debug, trace};

use crate::{
    codec::{BlockCodec, DataBlock, Element, LevelPayload, NestedCodec},
    config::ShardConfig,
    grid::NestedGrid,
    position::{ensure_same_ancestor, group_by_ancestor, NestedPosition},
    raw_shard::RawShard,
    shard::{Shard, ShardContext, ShardKind},
    store::PositionValueAccess,
};

/// What a deletion left behind at one level.
#[derive(Debug)]
enum Removal {
    /// Nothing was there to delete.
    Unchanged,
    Rewritten(Bytes),
    /// The element is gone and its slot in the parent must be cleared.
    Emptied,
}

/// A block on its way into the store.
#[derive(Debug)]
struct PendingWrite<T> {
    position: NestedPosition,
    block: Option<DataBlock<T>>,
}

#[derive(Debug, Clone)]
pub struct DatasetAccess<T> {
    grid: Arc<NestedGrid>,
    codec: NestedCodec<T>,
    shard_kind: ShardKind,
}

impl<T: Element> DatasetAccess<T> {
    /// One [`ShardConfig`] per level above the leaves.
    pub fn new(
        grid: NestedGrid,
        leaf: Arc<dyn BlockCodec<DataBlock<T>>>,
        shard_configs: &[ShardConfig],
        shard_kind: ShardKind,
    ) -> ShardResult<Self> {
        let codec = NestedCodec::new(&grid, leaf, shard_configs)?;
        Ok(Self {
            grid: Arc::new(grid),
            codec,
            shard_kind,
        })
    }

    pub fn grid(&self) -> &Arc<NestedGrid> {
        &self.grid
    }

    pub fn codec(&self) -> &NestedCodec<T> {
        &self.codec
    }

    pub fn shard_kind(&self) -> ShardKind {
        self.shard_kind
    }

    fn top(&self) -> usize {
        self.grid.num_levels() - 1
    }

    /// The position of the leaf block at `grid_position`.
    pub fn position(&self, grid_position: &[u64]) -> ShardResult<NestedPosition> {
        NestedPosition::new(self.grid.clone(), grid_position, 0)
    }

    fn block_position(&self, block: &DataBlock<T>) -> ShardResult<NestedPosition> {
        if block.size() != self.grid.block_size(0) {
            return Err(arg_err!(
                "block of size {:?} in a grid of {:?} blocks",
                block.size(),
                self.grid.block_size(0)
            ));
        }
        self.position(block.grid_position())
    }

    /// Returns `None` if the block or any shard containing it is absent.
    ///
    /// # Errors
    /// - [ShardError::DecodeError](nested_shard_common::ShardError::DecodeError) and
    ///   [ShardError::ChecksumMismatch](nested_shard_common::ShardError::ChecksumMismatch) on
    ///   corrupted data
    /// - whatever the store fails with
    #[tracing::instrument(level = "debug", skip(self, store))]
    pub fn read_block(
        &self,
        store: &dyn PositionValueAccess,
        grid_position: &[u64],
    ) -> ShardResult<Option<DataBlock<T>>> {
        let pos = self.position(grid_position)?;
        let Some(data) = store.get(&pos.key())? else {
            return Ok(None);
        };
        self.read_at(self.top(), data, &pos)
    }

    fn read_at(
        &self,
        level: usize,
        data: Bytes,
        pos: &NestedPosition,
    ) -> ShardResult<Option<DataBlock<T>>> {
        match self.codec.decode(level, data, &pos.absolute(level))? {
            LevelPayload::Block(block) => Ok(Some(block)),
            LevelPayload::Shard(shard) => match shard.get_element_data(&pos.relative(level - 1)) {
                Some(child) => self.read_at(level - 1, child, pos),
                None => Ok(None),
            },
        }
    }

    /// One entry per requested position, in request order. Every outermost
    /// shard is fetched once.
    #[tracing::instrument(level = "debug", skip_all, fields(n = positions.len()))]
    pub fn read_blocks<P: AsRef<[u64]>>(
        &self,
        store: &dyn PositionValueAccess,
        positions: &[P],
    ) -> ShardResult<Vec<Option<DataBlock<T>>>> {
        let mut requests = positions
            .iter()
            .enumerate()
            .map(|(i, p)| Ok((i, self.position(p.as_ref())?)))
            .collect::<ShardResult<Vec<_>>>()?;
        let mut ans = vec![None; positions.len()];
        let top = self.top();
        for range in group_by_ancestor(&mut requests, top, |(_, p)| p) {
            let group = &mut requests[range];
            let Some(data) = store.get(&group[0].1.key())? else {
                continue;
            };
            self.read_group(top, data, group, &mut ans)?;
        }
        Ok(ans)
    }

    fn read_group(
        &self,
        level: usize,
        data: Bytes,
        requests: &mut [(usize, NestedPosition)],
        ans: &mut [Option<DataBlock<T>>],
    ) -> ShardResult<()> {
        ensure_same_ancestor(requests.iter().map(|(_, p)| p), level)?;
        match self.codec.decode(level, data, &requests[0].1.absolute(level))? {
            LevelPayload::Block(block) => {
                for (i, _) in requests.iter() {
                    ans[*i] = Some(block.clone());
                }
            }
            LevelPayload::Shard(shard) => {
                for range in group_by_ancestor(requests, level - 1, |(_, p)| p) {
                    let group = &mut requests[range];
                    if let Some(child) = shard.get_element_data(&group[0].1.relative(level - 1)) {
                        self.read_group(level - 1, child, group, ans)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Writes `block` at its grid position, replacing what was there.
    #[tracing::instrument(level = "debug", skip_all, fields(at = ?block.grid_position()))]
    pub fn write_block(
        &self,
        store: &dyn PositionValueAccess,
        block: DataBlock<T>,
    ) -> ShardResult<()> {
        let pos = self.block_position(&block)?;
        let key = pos.key();
        let existing = store.get(&key)?;
        let data = self.write_at(self.top(), existing, &pos, block)?;
        debug!(?key, len = data.len(), "put shard");
        store.put(&key, data)
    }

    fn write_at(
        &self,
        level: usize,
        existing: Option<Bytes>,
        pos: &NestedPosition,
        block: DataBlock<T>,
    ) -> ShardResult<Bytes> {
        if level == 0 {
            return self.codec.encode(0, &LevelPayload::Block(block));
        }
        let mut shard = self.open_shard(level, existing, pos)?;
        let rel = pos.relative(level - 1);
        let child = self.write_at(level - 1, shard.get_element_data(&rel), pos, block)?;
        shard.set_element_data(Some(child), &rel);
        self.codec.encode(level, &LevelPayload::Shard(shard))
    }

    fn open_shard(
        &self,
        level: usize,
        existing: Option<Bytes>,
        pos: &NestedPosition,
    ) -> ShardResult<RawShard> {
        match existing {
            Some(data) => self.codec.decode_shard(level, data, &pos.absolute(level)),
            None => Ok(self.codec.shard(level).empty_shard()),
        }
    }

    /// Writes every block, encoding and persisting each shard on the way once.
    /// When a position repeats, the last block in `blocks` wins.
    #[tracing::instrument(level = "debug", skip_all, fields(n = blocks.len()))]
    pub fn write_blocks(
        &self,
        store: &dyn PositionValueAccess,
        blocks: Vec<DataBlock<T>>,
    ) -> ShardResult<()> {
        let mut pending = blocks
            .into_iter()
            .map(|block| {
                Ok(PendingWrite {
                    position: self.block_position(&block)?,
                    block: Some(block),
                })
            })
            .collect::<ShardResult<Vec<_>>>()?;
        let top = self.top();
        for range in group_by_ancestor(&mut pending, top, |w| &w.position) {
            let group = &mut pending[range];
            let key = group[0].position.key();
            let existing = store.get(&key)?;
            let data = self.write_group(top, existing, group)?;
            debug!(?key, len = data.len(), "put shard");
            store.put(&key, data)?;
        }
        Ok(())
    }

    fn write_group(
        &self,
        level: usize,
        existing: Option<Bytes>,
        group: &mut [PendingWrite<T>],
    ) -> ShardResult<Bytes> {
        ensure_same_ancestor(group.iter().map(|w| &w.position), level)?;
        if level == 0 {
            let Some(block) = group.last_mut().and_then(|w| w.block.take()) else {
                return Err(arg_err!("empty write group"));
            };
            return self.codec.encode(0, &LevelPayload::Block(block));
        }

        let mut shard = self.open_shard(level, existing, &group[0].position)?;
        for range in group_by_ancestor(group, level - 1, |w| &w.position) {
            let children = &mut group[range];
            let rel = children[0].position.relative(level - 1);
            let child = self.write_group(level - 1, shard.get_element_data(&rel), children)?;
            shard.set_element_data(Some(child), &rel);
        }
        trace!(level, slots = shard.len(), "re-encode shard");
        self.codec.encode(level, &LevelPayload::Shard(shard))
    }

    /// Removes the block at `grid_position`. Shards left empty are removed
    /// too, up to the store key itself.
    ///
    /// Returns whether a block was removed. Deleting an absent block leaves
    /// the store untouched.
    #[tracing::instrument(level = "debug", skip(self, store))]
    pub fn delete_block(
        &self,
        store: &dyn PositionValueAccess,
        grid_position: &[u64],
    ) -> ShardResult<bool> {
        let pos = self.position(grid_position)?;
        let key = pos.key();
        let Some(data) = store.get(&key)? else {
            return Ok(false);
        };
        let removal = self.delete_at(self.top(), data, &pos)?;
        let removed = !matches!(removal, Removal::Unchanged);
        self.persist(store, &key, removal)?;
        Ok(removed)
    }

    fn delete_at(&self, level: usize, data: Bytes, pos: &NestedPosition) -> ShardResult<Removal> {
        if level == 0 {
            return Ok(Removal::Emptied);
        }
        let mut shard = self.codec.decode_shard(level, data, &pos.absolute(level))?;
        let rel = pos.relative(level - 1);
        let Some(child) = shard.get_element_data(&rel) else {
            return Ok(Removal::Unchanged);
        };
        match self.delete_at(level - 1, child, pos)? {
            Removal::Unchanged => Ok(Removal::Unchanged),
            Removal::Rewritten(child) => {
                shard.set_element_data(Some(child), &rel);
                Ok(Removal::Rewritten(
                    self.codec.encode(level, &LevelPayload::Shard(shard))?,
                ))
            }
            Removal::Emptied => {
                shard.set_element_data(None, &rel);
                self.finish_removal(level, shard)
            }
        }
    }

    fn finish_removal(&self, level: usize, shard: RawShard) -> ShardResult<Removal> {
        if shard.is_empty() {
            ensure_cov::notify_cov("nested_shard_store::dataset::delete::cascade");
            trace!(level, "shard emptied");
            return Ok(Removal::Emptied);
        }
        Ok(Removal::Rewritten(
            self.codec.encode(level, &LevelPayload::Shard(shard))?,
        ))
    }

    fn persist(
        &self,
        store: &dyn PositionValueAccess,
        key: &[u64],
        removal: Removal,
    ) -> ShardResult<()> {
        match removal {
            Removal::Unchanged => {
                debug!(?key, "nothing to delete");
                Ok(())
            }
            Removal::Rewritten(data) => {
                debug!(?key, len = data.len(), "put shard");
                store.put(key, data)
            }
            Removal::Emptied => {
                debug!(?key, "remove emptied shard");
                store.remove(key)
            }
        }
    }

    /// Removes every listed block. Each store key is read once and written
    /// or removed at most once.
    ///
    /// Returns the number of distinct blocks removed.
    #[tracing::instrument(level = "debug", skip_all, fields(n = positions.len()))]
    pub fn delete_blocks<P: AsRef<[u64]>>(
        &self,
        store: &dyn PositionValueAccess,
        positions: &[P],
    ) -> ShardResult<usize> {
        let mut targets = positions
            .iter()
            .map(|p| self.position(p.as_ref()))
            .collect::<ShardResult<Vec<_>>>()?;
        let top = self.top();
        let mut removed = 0;
        for range in group_by_ancestor(&mut targets, top, |p| p) {
            let group = &mut targets[range];
            let key = group[0].key();
            let Some(data) = store.get(&key)? else {
                continue;
            };
            let (removal, n) = self.delete_group(top, data, group)?;
            removed += n;
            self.persist(store, &key, removal)?;
        }
        Ok(removed)
    }

    fn delete_group(
        &self,
        level: usize,
        data: Bytes,
        group: &mut [NestedPosition],
    ) -> ShardResult<(Removal, usize)> {
        ensure_same_ancestor(group.iter(), level)?;
        if level == 0 {
            return Ok((Removal::Emptied, 1));
        }
        let mut shard = self.codec.decode_shard(level, data, &group[0].absolute(level))?;
        let mut changed = false;
        let mut removed = 0;
        for range in group_by_ancestor(group, level - 1, |p| p) {
            let children = &mut group[range];
            let rel = children[0].relative(level - 1);
            let Some(child) = shard.get_element_data(&rel) else {
                continue;
            };
            let (removal, n) = self.delete_group(level - 1, child, children)?;
            removed += n;
            match removal {
                Removal::Unchanged => {}
                Removal::Rewritten(child) => {
                    shard.set_element_data(Some(child), &rel);
                    changed = true;
                }
                Removal::Emptied => {
                    shard.set_element_data(None, &rel);
                    changed = true;
                }
            }
        }
        if !changed {
            return Ok((Removal::Unchanged, removed));
        }
        Ok((self.finish_removal(level, shard)?, removed))
    }

    /// Whether the block at `grid_position` is stored. Only shard indexes
    /// are decoded on the way down.
    #[tracing::instrument(level = "debug", skip(self, store))]
    pub fn block_exists(
        &self,
        store: &dyn PositionValueAccess,
        grid_position: &[u64],
    ) -> ShardResult<bool> {
        let pos = self.position(grid_position)?;
        let Some(mut data) = store.get(&pos.key())? else {
            return Ok(false);
        };
        for level in (1..=self.top()).rev() {
            let (index, payload) = self.codec.shard(level).read_index(&data)?;
            let rel = pos.relative(level - 1);
            if !index.exists(&rel) {
                return Ok(false);
            }
            let offset = index.offset(&rel) as usize;
            data = payload.slice(offset..offset + index.num_bytes_of(&rel) as usize);
        }
        Ok(true)
    }

    fn ensure_single_shard_level(&self) -> ShardResult<()> {
        if self.grid.num_levels() != 2 {
            return Err(arg_err!(
                "whole-shard access needs exactly one shard level, the grid has {} levels",
                self.grid.num_levels()
            ));
        }
        Ok(())
    }

    fn shard_context(&self, shard_position: &[u64]) -> ShardResult<ShardContext<T>> {
        ShardContext::new(
            self.grid.clone(),
            shard_position,
            self.codec.shard(1).clone(),
            self.codec.leaf().clone(),
        )
    }

    /// An empty shard at `shard_position` of the configured [`ShardKind`].
    pub fn new_shard(&self, shard_position: &[u64]) -> ShardResult<Box<dyn Shard<T>>> {
        self.ensure_single_shard_level()?;
        self.shard_kind.open(self.shard_context(shard_position)?, None)
    }

    /// Opens the stored shard at `shard_position`, or `None` if there is none.
    ///
    /// # Errors
    /// - [ShardError::ArgErr](nested_shard_common::ShardError::ArgErr) unless the grid has
    ///   exactly two levels
    #[tracing::instrument(level = "debug", skip(self, store))]
    pub fn read_shard(
        &self,
        store: &dyn PositionValueAccess,
        shard_position: &[u64],
    ) -> ShardResult<Option<Box<dyn Shard<T>>>> {
        self.ensure_single_shard_level()?;
        let ctx = self.shard_context(shard_position)?;
        match store.get(shard_position)? {
            Some(data) => self.shard_kind.open(ctx, Some(data)).map(Some),
            None => Ok(None),
        }
    }

    /// Persists a whole shard, removing its key if the shard is empty.
    ///
    /// The blocks are re-encoded with this dataset's codecs, so a shard
    /// opened through another configuration is stored in this one's layout.
    ///
    /// # Errors
    /// - [ShardError::ArgErr](nested_shard_common::ShardError::ArgErr) unless the grid has
    ///   exactly two levels, or if the shard's shape or block size differ from this grid's
    #[tracing::instrument(level = "debug", skip_all, fields(at = ?shard.grid_position()))]
    pub fn write_shard(
        &self,
        store: &dyn PositionValueAccess,
        shard: &dyn Shard<T>,
    ) -> ShardResult<()> {
        self.ensure_single_shard_level()?;
        if shard.shape() != self.grid.relative_block_size(1) {
            return Err(arg_err!(
                "shard of {:?} slots in a grid of {:?} slot shards",
                shard.shape(),
                self.grid.relative_block_size(1)
            ));
        }
        let key = shard.grid_position();
        if shard.is_empty() {
            debug!(?key, "remove empty shard");
            return store.remove(key);
        }
        // the shard may carry another dataset's codecs
        let ctx = self.shard_context(key)?;
        let mut slots = vec![None; ctx.num_slots()];
        for (slot, entry) in slots.iter_mut().enumerate() {
            let rel = unflatten(slot as u64, ctx.shape());
            if let Some(block) = shard.get_block(&rel)? {
                if ctx.relative_of(&block)? != rel {
                    return Err(arg_err!(
                        "block {:?} is stored at slot {:?} of shard {:?}",
                        block.grid_position(),
                        rel,
                        key
                    ));
                }
                *entry = Some(ctx.encode_block(&block)?);
            }
        }
        let data = ctx.write_slots(&slots);
        debug!(?key, len = data.len(), "put shard");
        store.put(key, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::DatasetConfig, store::MemPositionStore};

    fn access(sizes: Vec<Vec<u64>>) -> DatasetAccess<u32> {
        DatasetConfig::new(sizes).build::<u32>().unwrap()
    }

    #[test]
    fn single_level_stores_blocks_directly() {
        let access = access(vec![vec![2, 2]]);
        let store = MemPositionStore::new();
        access
            .write_block(&store, DataBlock::filled(&[2, 2], &[3, 1], 9))
            .unwrap();
        assert_eq!(store.keys(), vec![nested_shard_common::Coords::from_slice(&[3, 1])]);
        let read = access.read_block(&store, &[3, 1]).unwrap().unwrap();
        assert_eq!(read.data(), &[9; 4]);
        assert!(access.block_exists(&store, &[3, 1]).unwrap());
        assert!(access.delete_block(&store, &[3, 1]).unwrap());
        assert!(store.is_empty());
        assert!(access.new_shard(&[0, 0]).is_err());
    }

    #[test]
    fn wrong_block_size_is_rejected() {
        let access = access(vec![vec![2], vec![4]]);
        let store = MemPositionStore::new();
        let err = access
            .write_block(&store, DataBlock::filled(&[3], &[0], 1))
            .unwrap_err();
        assert!(!err.is_corruption());
        assert!(access.write_blocks(&store, vec![DataBlock::filled(&[2, 2], &[0, 0], 1)]).is_err());
        assert!(access.read_block(&store, &[0, 0]).is_err());
        assert!(store.is_empty());
    }

    #[test]
    fn duplicate_writes_keep_the_last() {
        let access = access(vec![vec![1], vec![4]]);
        let store = MemPositionStore::new();
        access
            .write_blocks(
                &store,
                vec![
                    DataBlock::filled(&[1], &[2], 1),
                    DataBlock::filled(&[1], &[5], 7),
                    DataBlock::filled(&[1], &[2], 2),
                ],
            )
            .unwrap();
        let read = access.read_blocks(&store, &[[2u64], [5], [9]]).unwrap();
        assert_eq!(read[0].as_ref().unwrap().data(), &[2]);
        assert_eq!(read[1].as_ref().unwrap().data(), &[7]);
        assert!(read[2].is_none());
        assert_eq!(access.delete_blocks(&store, &[[2u64], [2], [9]]).unwrap(), 1);
        assert!(!access.block_exists(&store, &[2]).unwrap());
        assert!(access.block_exists(&store, &[5]).unwrap());
    }
}
