use std::collections::BTreeMap;

use bytes::Bytes;
use nested_shard_common::{Coords, ShardResult};

use super::{Shard, ShardContext};
use crate::{
    codec::{DataBlock, Element},
    index::ShardIndex,
};

/// Typed blocks keyed by slot. Nothing is encoded until the shard is
/// serialized, which makes it the variant for building a shard at a time.
#[derive(Debug, Clone)]
pub struct InMemoryShard<T> {
    ctx: ShardContext<T>,
    blocks: BTreeMap<usize, DataBlock<T>>,
}

impl<T: Element> InMemoryShard<T> {
    pub fn new(ctx: ShardContext<T>) -> Self {
        Self {
            ctx,
            blocks: BTreeMap::new(),
        }
    }

    /// Decodes every block of a stored shard.
    pub fn from_bytes(ctx: ShardContext<T>, data: Bytes) -> ShardResult<Self> {
        let (index, payload) = ctx.codec().read_index(&data)?;
        let mut blocks = BTreeMap::new();
        for (slot, offset, len) in index.present() {
            let pos = index.slot_position(slot);
            let bytes = payload.slice(offset as usize..(offset + len) as usize);
            blocks.insert(slot, ctx.decode_block(bytes, &pos)?);
        }
        Ok(Self { ctx, blocks })
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    fn encoded(&self) -> ShardResult<Vec<(usize, Bytes)>> {
        self.blocks
            .iter()
            .map(|(&slot, block)| Ok((slot, self.ctx.encode_block(block)?)))
            .collect()
    }
}

impl<T: Element> Shard<T> for InMemoryShard<T> {
    fn grid_position(&self) -> &[u64] {
        self.ctx.grid_position()
    }

    fn shape(&self) -> &[u64] {
        self.ctx.shape()
    }

    fn get_block(&self, pos: &[u64]) -> ShardResult<Option<DataBlock<T>>> {
        let slot = self.ctx.slot(pos)?;
        Ok(self.blocks.get(&slot).cloned())
    }

    fn add_block(&mut self, block: DataBlock<T>) -> ShardResult<()> {
        let pos: Coords = self.ctx.relative_of(&block)?;
        let slot = self.ctx.slot(&pos)?;
        self.blocks.insert(slot, block);
        Ok(())
    }

    fn remove_block(&mut self, pos: &[u64]) -> ShardResult<bool> {
        let slot = self.ctx.slot(pos)?;
        Ok(self.blocks.remove(&slot).is_some())
    }

    fn index(&self) -> ShardResult<ShardIndex> {
        let mut index = self.ctx.codec().empty_index();
        let mut offset = 0;
        for (slot, bytes) in self.encoded()? {
            index.set_at(slot, offset, bytes.len() as u64);
            offset += bytes.len() as u64;
        }
        Ok(index)
    }

    fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    fn create_read_data(&self) -> ShardResult<Bytes> {
        let mut slots = vec![None; self.ctx.num_slots()];
        for (slot, bytes) in self.encoded()? {
            slots[slot] = Some(bytes);
        }
        Ok(self.ctx.write_slots(&slots))
    }
}
