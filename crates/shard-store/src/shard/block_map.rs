use bytes::Bytes;
use nested_shard_common::ShardResult;
use rustc_hash::FxHashMap;

use super::{Shard, ShardContext};
use crate::{
    codec::{DataBlock, Element},
    index::ShardIndex,
};

/// Encoded bytes of every block, keyed by slot. The index tracks an
/// append-only layout: a block lands at the current end, after its previous
/// version has been taken out.
#[derive(Debug, Clone)]
pub struct BlockMapShard<T> {
    ctx: ShardContext<T>,
    blocks: FxHashMap<usize, Bytes>,
    index: ShardIndex,
    end: u64,
}

impl<T: Element> BlockMapShard<T> {
    pub fn new(ctx: ShardContext<T>) -> Self {
        let index = ctx.codec().empty_index();
        Self {
            ctx,
            blocks: FxHashMap::default(),
            index,
            end: 0,
        }
    }

    pub fn from_bytes(ctx: ShardContext<T>, data: Bytes) -> ShardResult<Self> {
        let (stored, payload) = ctx.codec().read_index(&data)?;
        let mut shard = Self::new(ctx);
        for (slot, offset, len) in stored.present() {
            let bytes = payload.slice(offset as usize..(offset + len) as usize);
            shard.insert(slot, bytes);
        }
        Ok(shard)
    }

    fn insert(&mut self, slot: usize, bytes: Bytes) {
        self.take(slot);
        self.index.set_at(slot, self.end, bytes.len() as u64);
        self.end += bytes.len() as u64;
        self.blocks.insert(slot, bytes);
    }

    fn take(&mut self, slot: usize) -> Option<Bytes> {
        let old = self.blocks.remove(&slot)?;
        let pos = self.index.slot_position(slot);
        if let Some((_, len)) = self.index.remove_and_shift(&pos) {
            self.end -= len;
        }
        Some(old)
    }
}

impl<T: Element> Shard<T> for BlockMapShard<T> {
    fn grid_position(&self) -> &[u64] {
        self.ctx.grid_position()
    }

    fn shape(&self) -> &[u64] {
        self.ctx.shape()
    }

    fn get_block(&self, pos: &[u64]) -> ShardResult<Option<DataBlock<T>>> {
        let slot = self.ctx.slot(pos)?;
        self.blocks
            .get(&slot)
            .map(|bytes| self.ctx.decode_block(bytes.clone(), pos))
            .transpose()
    }

    fn add_block(&mut self, block: DataBlock<T>) -> ShardResult<()> {
        let pos = self.ctx.relative_of(&block)?;
        let slot = self.ctx.slot(&pos)?;
        let bytes = self.ctx.encode_block(&block)?;
        self.insert(slot, bytes);
        Ok(())
    }

    fn remove_block(&mut self, pos: &[u64]) -> ShardResult<bool> {
        let slot = self.ctx.slot(pos)?;
        Ok(self.take(slot).is_some())
    }

    fn index(&self) -> ShardResult<ShardIndex> {
        Ok(self.index.clone())
    }

    fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    fn create_read_data(&self) -> ShardResult<Bytes> {
        let mut slots = vec![None; self.ctx.num_slots()];
        for (&slot, bytes) in &self.blocks {
            slots[slot] = Some(bytes.clone());
        }
        Ok(self.ctx.write_slots(&slots))
    }
}
