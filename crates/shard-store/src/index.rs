use std::{fmt::Debug, sync::Arc};

use bytes::{Buf, BufMut, Bytes};
use nested_shard_common::{decode_err, flat_index, num_elements, unflatten, Coords, ShardError, ShardResult};

pub(crate) const SIZE_OF_U32: usize = std::mem::size_of::<u32>();
pub(crate) const SIZE_OF_U64: usize = std::mem::size_of::<u64>();
pub(crate) const XXH_SEED: u32 = u32::from_le_bytes(*b"NSHD");

/// Marks an absent slot in both fields of an index entry.
pub const EMPTY_SLOT: u64 = u64::MAX;

/// Where the encoded index sits inside a shard blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IndexLocation {
    Start,
    #[default]
    End,
}

/// A transform applied to the encoded index table.
///
/// The output size must depend on the input size only, so the index of a
/// shard can be located without decoding anything.
pub trait IndexCodec: Debug + Send + Sync {
    fn encoded_size(&self, input_size: usize) -> usize;
    fn encode(&self, data: Bytes) -> Bytes;
    fn decode(&self, data: Bytes) -> ShardResult<Bytes>;
}

/// Appends an xxhash32 of the table and verifies it on decode.
#[derive(Debug, Clone, Copy, Default)]
pub struct Xxh32Checksum;

impl IndexCodec for Xxh32Checksum {
    fn encoded_size(&self, input_size: usize) -> usize {
        input_size + SIZE_OF_U32
    }

    fn encode(&self, data: Bytes) -> Bytes {
        let mut buf = Vec::with_capacity(data.len() + SIZE_OF_U32);
        buf.put_slice(&data);
        let checksum = xxhash_rust::xxh32::xxh32(&data, XXH_SEED);
        buf.put_u32_le(checksum);
        buf.into()
    }

    fn decode(&self, data: Bytes) -> ShardResult<Bytes> {
        if data.len() < SIZE_OF_U32 {
            return Err(decode_err!("index too short for a checksum"));
        }
        let body = data.slice(..data.len() - SIZE_OF_U32);
        let checksum = (&data[data.len() - SIZE_OF_U32..]).get_u32_le();
        if checksum != xxhash_rust::xxh32::xxh32(&body, XXH_SEED) {
            return Err(ShardError::ChecksumMismatch);
        }
        Ok(body)
    }
}

pub type IndexCodecs = Arc<[Arc<dyn IndexCodec>]>;

/// Offset/length table of one shard.
///
/// ┌──────────────────────────────────────────────────────────────────────┐
/// │ Shard Index                                                          │
/// │┌ ─ ─ ─ ─ ─ ─ ┬ ─ ─ ─ ─ ─ ─ ┬ ─ ─ ─┌ ─ ─ ─ ─ ─ ─ ┬ ─ ─ ─ ─ ─ ─ ┬ ─ ─ ─ ┐│
/// │   offset 0   │  length 0   │ ...  │ offset S-1  │ length S-1  │codecs  │
/// ││  u64 (le)   │  u64 (le)   │      │  u64 (le)   │  u64 (le)   │ bytes ││
/// │ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ┘─ ─ ─ ┘─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ┘─ ─ ─ ─ │
/// └──────────────────────────────────────────────────────────────────────┘
///
/// Slots are in flat order with dimension 0 varying fastest. Offsets are
/// relative to the start of the payload region. A slot whose two fields are
/// both [`EMPTY_SLOT`] is absent.
#[derive(Debug, Clone)]
pub struct ShardIndex {
    shape: Coords,
    entries: Vec<u64>,
    location: IndexLocation,
    codecs: IndexCodecs,
}

impl PartialEq for ShardIndex {
    fn eq(&self, other: &Self) -> bool {
        self.shape == other.shape && self.entries == other.entries && self.location == other.location
    }
}

impl ShardIndex {
    /// A fresh index with every slot absent.
    pub fn new_empty(shape: &[u64], location: IndexLocation, codecs: IndexCodecs) -> Self {
        let slots = num_elements(shape) as usize;
        Self {
            shape: Coords::from_slice(shape),
            entries: vec![EMPTY_SLOT; slots * 2],
            location,
            codecs,
        }
    }

    pub fn shape(&self) -> &[u64] {
        &self.shape
    }

    pub fn location(&self) -> IndexLocation {
        self.location
    }

    pub fn codecs(&self) -> &IndexCodecs {
        &self.codecs
    }

    pub fn num_slots(&self) -> usize {
        self.entries.len() / 2
    }

    /// # Panics
    /// If `pos` is outside the shard.
    fn slot(&self, pos: &[u64]) -> usize {
        flat_index(pos, &self.shape)
    }

    pub fn slot_position(&self, slot: usize) -> Coords {
        unflatten(slot as u64, &self.shape)
    }

    /// The positional accessors panic if `pos` is outside the shard. Callers
    /// holding untrusted positions go through
    /// [`RawShard::check_position`](crate::RawShard::check_position) first.
    pub fn exists(&self, pos: &[u64]) -> bool {
        self.exists_at(self.slot(pos))
    }

    /// A slot counts as present unless both of its fields hold the sentinel.
    pub fn exists_at(&self, slot: usize) -> bool {
        self.entries[slot * 2] != EMPTY_SLOT || self.entries[slot * 2 + 1] != EMPTY_SLOT
    }

    pub fn offset(&self, pos: &[u64]) -> u64 {
        self.entries[self.slot(pos) * 2]
    }

    pub fn num_bytes_of(&self, pos: &[u64]) -> u64 {
        self.entries[self.slot(pos) * 2 + 1]
    }

    pub fn offset_at(&self, slot: usize) -> u64 {
        self.entries[slot * 2]
    }

    pub fn num_bytes_at(&self, slot: usize) -> u64 {
        self.entries[slot * 2 + 1]
    }

    pub fn set(&mut self, offset: u64, num_bytes: u64, pos: &[u64]) {
        let slot = self.slot(pos);
        self.set_at(slot, offset, num_bytes);
    }

    pub fn set_at(&mut self, slot: usize, offset: u64, num_bytes: u64) {
        self.entries[slot * 2] = offset;
        self.entries[slot * 2 + 1] = num_bytes;
    }

    pub fn set_empty(&mut self, pos: &[u64]) {
        let slot = self.slot(pos);
        self.set_at(slot, EMPTY_SLOT, EMPTY_SLOT);
    }

    pub fn is_empty(&self) -> bool {
        (0..self.num_slots()).all(|slot| !self.exists_at(slot))
    }

    /// `(slot, offset, num_bytes)` of every present slot, in slot order.
    pub fn present(&self) -> impl Iterator<Item = (usize, u64, u64)> + '_ {
        (0..self.num_slots())
            .filter(|&slot| self.exists_at(slot))
            .map(|slot| (slot, self.offset_at(slot), self.num_bytes_at(slot)))
    }

    /// Clears the slot at `pos` and closes the gap it leaves: every entry
    /// stored after the removed range moves down by its length.
    ///
    /// Returns the removed `(offset, num_bytes)`, or `None` if the slot was absent.
    pub fn remove_and_shift(&mut self, pos: &[u64]) -> Option<(u64, u64)> {
        let slot = self.slot(pos);
        if !self.exists_at(slot) {
            return None;
        }
        let offset = self.offset_at(slot);
        let num_bytes = self.num_bytes_at(slot);
        self.set_at(slot, EMPTY_SLOT, EMPTY_SLOT);
        for other in 0..self.num_slots() {
            if self.exists_at(other) && self.offset_at(other) > offset {
                self.entries[other * 2] -= num_bytes;
            }
        }
        Some((offset, num_bytes))
    }

    /// Size of the encoded index, threaded through every codec.
    pub fn num_bytes(&self) -> usize {
        encoded_index_size(self.num_slots(), &self.codecs)
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = Vec::with_capacity(self.entries.len() * SIZE_OF_U64);
        for e in &self.entries {
            buf.put_u64_le(*e);
        }
        let mut data = Bytes::from(buf);
        for codec in self.codecs.iter() {
            data = codec.encode(data);
        }
        data
    }

    /// # Errors
    /// - [ShardError::ChecksumMismatch]
    /// - [ShardError::DecodeError] if the decoded table does not have exactly
    ///   one entry per slot of `shape`
    pub fn decode(
        data: Bytes,
        shape: &[u64],
        location: IndexLocation,
        codecs: IndexCodecs,
    ) -> ShardResult<Self> {
        let mut data = data;
        for codec in codecs.iter().rev() {
            data = codec.decode(data)?;
        }
        let slots = num_elements(shape) as usize;
        if data.len() != slots * 2 * SIZE_OF_U64 {
            return Err(decode_err!(
                "index table has {} bytes, expected {} for {} slots",
                data.len(),
                slots * 2 * SIZE_OF_U64,
                slots
            ));
        }
        let entries = data
            .chunks_exact(SIZE_OF_U64)
            .map(|mut chunk| chunk.get_u64_le())
            .collect();
        Ok(Self {
            shape: Coords::from_slice(shape),
            entries,
            location,
            codecs,
        })
    }

    /// Places the encoded index before or after `payload`.
    pub fn write(&self, payload: &[u8]) -> Bytes {
        let index = self.encode();
        let mut buf = Vec::with_capacity(index.len() + payload.len());
        match self.location {
            IndexLocation::Start => {
                buf.put_slice(&index);
                buf.put_slice(payload);
            }
            IndexLocation::End => {
                buf.put_slice(payload);
                buf.put_slice(&index);
            }
        }
        buf.into()
    }

    /// Reads the index of a shard blob and returns it together with the
    /// payload region it describes.
    ///
    /// # Errors
    /// - [ShardError::DecodeError] if the blob is shorter than the index or an
    ///   entry points past the end of the payload
    /// - [ShardError::ChecksumMismatch]
    pub fn read(
        blob: &Bytes,
        shape: &[u64],
        location: IndexLocation,
        codecs: IndexCodecs,
    ) -> ShardResult<(Self, Bytes)> {
        let index_len = encoded_index_size(num_elements(shape) as usize, &codecs);
        if blob.len() < index_len {
            return Err(decode_err!(
                "shard has {} bytes, its index alone needs {}",
                blob.len(),
                index_len
            ));
        }
        let (raw_index, payload) = match location {
            IndexLocation::Start => (blob.slice(..index_len), blob.slice(index_len..)),
            IndexLocation::End => {
                let split = blob.len() - index_len;
                (blob.slice(split..), blob.slice(..split))
            }
        };
        let index = Self::decode(raw_index, shape, location, codecs)?;
        index.check_bounds(payload.len() as u64)?;
        Ok((index, payload))
    }

    fn check_bounds(&self, payload_len: u64) -> ShardResult<()> {
        for (slot, offset, num_bytes) in self.present() {
            let end = offset.checked_add(num_bytes);
            if end.map_or(true, |end| end > payload_len) {
                return Err(decode_err!(
                    "slot {} spans {}+{} but the payload has {} bytes",
                    slot,
                    offset,
                    num_bytes,
                    payload_len
                ));
            }
        }
        Ok(())
    }
}

pub(crate) fn encoded_index_size(num_slots: usize, codecs: &IndexCodecs) -> usize {
    codecs
        .iter()
        .fold(num_slots * 2 * SIZE_OF_U64, |size, codec| codec.encoded_size(size))
}
