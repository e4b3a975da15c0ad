use std::ops::Range;

use bytes::Bytes;
use nested_shard_common::ShardResult;

use super::{Shard, ShardContext};
use crate::{
    codec::{DataBlock, Element},
    index::ShardIndex,
};

/// Payload bytes and index kept apart and mutated in place.
///
/// Removing a block drains its range out of the payload and moves every
/// later range down, so the payload never has gaps.
#[derive(Debug, Clone)]
pub struct SplitShard<T> {
    ctx: ShardContext<T>,
    payload: Vec<u8>,
    index: ShardIndex,
}

impl<T: Element> SplitShard<T> {
    pub fn new(ctx: ShardContext<T>) -> Self {
        let index = ctx.codec().empty_index();
        Self {
            ctx,
            payload: Vec::new(),
            index,
        }
    }

    pub fn from_bytes(ctx: ShardContext<T>, data: Bytes) -> ShardResult<Self> {
        let (index, payload) = ctx.codec().read_index(&data)?;
        Ok(Self {
            ctx,
            payload: payload.to_vec(),
            index,
        })
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    fn range(&self, slot: usize) -> Range<usize> {
        let offset = self.index.offset_at(slot) as usize;
        offset..offset + self.index.num_bytes_at(slot) as usize
    }

    fn remove_at(&mut self, pos: &[u64]) -> bool {
        match self.index.remove_and_shift(pos) {
            Some((offset, len)) => {
                self.payload
                    .drain(offset as usize..(offset + len) as usize);
                true
            }
            None => false,
        }
    }
}

impl<T: Element> Shard<T> for SplitShard<T> {
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
        let bytes = Bytes::copy_from_slice(&self.payload[self.range(slot)]);
        self.ctx.decode_block(bytes, pos).map(Some)
    }

    fn add_block(&mut self, block: DataBlock<T>) -> ShardResult<()> {
        let pos = self.ctx.relative_of(&block)?;
        let bytes = self.ctx.encode_block(&block)?;
        self.remove_at(&pos);
        let offset = self.payload.len() as u64;
        self.payload.extend_from_slice(&bytes);
        self.index.set(offset, bytes.len() as u64, &pos);
        Ok(())
    }

    fn remove_block(&mut self, pos: &[u64]) -> ShardResult<bool> {
        self.ctx.slot(pos)?;
        Ok(self.remove_at(pos))
    }

    fn index(&self) -> ShardResult<ShardIndex> {
        Ok(self.index.clone())
    }

    fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    fn create_read_data(&self) -> ShardResult<Bytes> {
        Ok(self.ctx.codec().encode_elements(
            (0..self.index.num_slots())
                .map(|slot| self.index.exists_at(slot).then(|| &self.payload[self.range(slot)])),
        ))
    }
}

#[cfg(test)]
mod tests {
    use rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng};

    use super::*;
    use crate::shard::{
        tests::{block, context, exercise},
        ShardKind,
    };

    #[test]
    fn contract() {
        exercise(ShardKind::Split);
    }

    fn assert_contiguous(shard: &SplitShard<u16>) {
        let index = shard.index().unwrap();
        let mut ranges: Vec<(u64, u64)> = index.present().map(|(_, o, l)| (o, l)).collect();
        ranges.sort_unstable();
        let mut end = 0;
        for (offset, len) in ranges {
            assert_eq!(offset, end);
            end += len;
        }
        assert_eq!(end as usize, shard.payload().len());
    }

    #[test]
    fn removal_keeps_offsets_contiguous() {
        let mut rng = StdRng::seed_from_u64(42);
        let ctx = context(&[0, 0]);
        let mut positions: Vec<[u64; 2]> = (0..3)
            .flat_map(|x| (0..2).map(move |y| [x, y]))
            .collect();
        for _ in 0..20 {
            let mut shard = SplitShard::new(ctx.clone());
            positions.shuffle(&mut rng);
            for pos in &positions {
                shard.add_block(block(&ctx, pos, rng.gen())).unwrap();
            }
            let mut kept: Vec<_> = positions
                .iter()
                .map(|p| (*p, shard.get_block(p).unwrap().unwrap()))
                .collect();
            while let Some((pos, _)) = kept.pop() {
                assert!(shard.remove_block(&pos).unwrap());
                assert_contiguous(&shard);
                for (p, b) in &kept {
                    assert_eq!(shard.get_block(p).unwrap().as_ref(), Some(b));
                }
            }
            assert!(shard.payload().is_empty());
        }
    }

    #[test]
    fn replacing_moves_the_block_to_the_end() {
        let ctx = context(&[0, 0]);
        let mut shard = SplitShard::new(ctx.clone());
        shard.add_block(block(&ctx, &[0, 0], 1)).unwrap();
        shard.add_block(block(&ctx, &[1, 0], 2)).unwrap();
        let len = shard.payload().len() as u64 / 2;
        shard.add_block(block(&ctx, &[0, 0], 3)).unwrap();
        let index = shard.index().unwrap();
        assert_eq!(index.offset(&[1, 0]), 0);
        assert_eq!(index.offset(&[0, 0]), len);
        assert_contiguous(&shard);
        assert_eq!(shard.get_block(&[0, 0]).unwrap(), Some(block(&ctx, &[0, 0], 3)));
    }
}
