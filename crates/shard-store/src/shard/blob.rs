use bytes::Bytes;
use nested_shard_common::ShardResult;

use super::{Shard, ShardContext};
use crate::{
    codec::{BlockCodec, DataBlock, Element},
    index::ShardIndex,
    raw_shard::RawShard,
};

/// The stored blob with its index decoded once. Blocks are sliced out of the
/// blob on access; a mutation rewrites the blob.
#[derive(Debug, Clone)]
pub struct BlobShard<T> {
    ctx: ShardContext<T>,
    blob: Bytes,
    index: ShardIndex,
    payload: Bytes,
}

impl<T: Element> BlobShard<T> {
    pub fn new(ctx: ShardContext<T>) -> Self {
        let index = ctx.codec().empty_index();
        let blob = index.write(&[]);
        Self {
            ctx,
            blob,
            index,
            payload: Bytes::new(),
        }
    }

    pub fn from_bytes(ctx: ShardContext<T>, blob: Bytes) -> ShardResult<Self> {
        let (index, payload) = ctx.codec().read_index(&blob)?;
        Ok(Self {
            ctx,
            blob,
            index,
            payload,
        })
    }

    pub fn blob(&self) -> &Bytes {
        &self.blob
    }

    fn slice(&self, slot: usize) -> Bytes {
        let offset = self.index.offset_at(slot) as usize;
        let len = self.index.num_bytes_at(slot) as usize;
        self.payload.slice(offset..offset + len)
    }

    fn raw(&self) -> ShardResult<RawShard> {
        self.ctx
            .codec()
            .decode(self.blob.clone(), self.ctx.grid_position())
    }

    fn rewrite(&mut self, f: impl FnOnce(&mut RawShard)) -> ShardResult<()> {
        let mut raw = self.raw()?;
        f(&mut raw);
        let blob = self.ctx.codec().encode(&raw)?;
        let (index, payload) = self.ctx.codec().read_index(&blob)?;
        self.blob = blob;
        self.index = index;
        self.payload = payload;
        Ok(())
    }
}

impl<T: Element> Shard<T> for BlobShard<T> {
    fn grid_position(&self) -> &[u64] {
        self.ctx.grid_position()
    }

    fn shape(&self) -> &[u64] {
        self.ctx.shape()
    }

    fn get_block(&self, pos: &[u64]) -> ShardResult<Option<DataBlock<T>>> {
        let slot = self.ctx.slot(pos)?;
        if !self.index.exists_at(slot) {
            return Ok(None);
        }
        self.ctx.decode_block(self.slice(slot), pos).map(Some)
    }

    /// Reads the requested blocks in storage order.
    fn get_blocks(
        &self,
        positions: &[nested_shard_common::Coords],
    ) -> ShardResult<Vec<Option<DataBlock<T>>>> {
        let slots = positions
            .iter()
            .map(|p| self.ctx.slot(p))
            .collect::<ShardResult<Vec<_>>>()?;
        let mut order: Vec<usize> = (0..positions.len())
            .filter(|&i| self.index.exists_at(slots[i]))
            .collect();
        order.sort_by_key(|&i| self.index.offset_at(slots[i]));

        let mut ans = vec![None; positions.len()];
        for i in order {
            ans[i] = Some(self.ctx.decode_block(self.slice(slots[i]), &positions[i])?);
        }
        Ok(ans)
    }

    fn add_block(&mut self, block: DataBlock<T>) -> ShardResult<()> {
        let pos = self.ctx.relative_of(&block)?;
        let bytes = self.ctx.encode_block(&block)?;
        self.rewrite(|raw| raw.set_element_data(Some(bytes), &pos))
    }

    fn remove_block(&mut self, pos: &[u64]) -> ShardResult<bool> {
        let slot = self.ctx.slot(pos)?;
        if !self.index.exists_at(slot) {
            return Ok(false);
        }
        self.rewrite(|raw| raw.set_element_data(None, pos))?;
        Ok(true)
    }

    fn index(&self) -> ShardResult<ShardIndex> {
        Ok(self.index.clone())
    }

    fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    fn create_read_data(&self) -> ShardResult<Bytes> {
        self.ctx.codec().encode(&self.raw()?)
    }
}
