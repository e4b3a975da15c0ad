use std::{fmt::Debug, marker::PhantomData};

use bytes::{Buf, BufMut, Bytes};
use nested_shard_common::{
    arg_err, checked_num_elements, decode_err, num_elements, Coords, ShardResult,
};

use super::{
    compress::{compress, decompress, CompressionType},
    BlockCodec,
};

const SIZE_OF_U16: usize = std::mem::size_of::<u16>();
const SIZE_OF_U32: usize = std::mem::size_of::<u32>();

/// A fixed-width numeric array element.
pub trait Element: Copy + Debug + PartialEq + Send + Sync + 'static {
    const SIZE: usize;

    fn put_le(self, buf: &mut Vec<u8>);
    /// `bytes` holds at least `SIZE` bytes.
    fn get_le(bytes: &[u8]) -> Self;
}

macro_rules! impl_element {
    ($($t:ty),*) => {
        $(
            impl Element for $t {
                const SIZE: usize = std::mem::size_of::<$t>();

                fn put_le(self, buf: &mut Vec<u8>) {
                    buf.extend_from_slice(&self.to_le_bytes());
                }

                fn get_le(bytes: &[u8]) -> Self {
                    let mut arr = [0u8; std::mem::size_of::<$t>()];
                    arr.copy_from_slice(&bytes[..Self::SIZE]);
                    <$t>::from_le_bytes(arr)
                }
            }
        )*
    };
}

impl_element!(u8, u16, u32, u64, i8, i16, i32, i64, f32, f64);

/// The leaf payload: one block of typed array data and its grid position.
#[derive(Debug, Clone, PartialEq)]
pub struct DataBlock<T> {
    size: Coords,
    grid_position: Coords,
    data: Vec<T>,
}

impl<T: Element> DataBlock<T> {
    /// # Errors
    /// - [ShardError::ArgErr](nested_shard_common::ShardError::ArgErr) if `data` does not hold
    ///   exactly one element per cell of `size`
    pub fn new(size: &[u64], grid_position: &[u64], data: Vec<T>) -> ShardResult<Self> {
        if data.len() as u64 != num_elements(size) {
            return Err(arg_err!(
                "a block of size {:?} needs {} elements, got {}",
                size,
                num_elements(size),
                data.len()
            ));
        }
        Ok(Self {
            size: Coords::from_slice(size),
            grid_position: Coords::from_slice(grid_position),
            data,
        })
    }

    pub fn filled(size: &[u64], grid_position: &[u64], value: T) -> Self {
        Self {
            size: Coords::from_slice(size),
            grid_position: Coords::from_slice(grid_position),
            data: vec![value; num_elements(size) as usize],
        }
    }

    pub fn size(&self) -> &[u64] {
        &self.size
    }

    pub fn grid_position(&self) -> &[u64] {
        &self.grid_position
    }

    pub fn data(&self) -> &[T] {
        &self.data
    }

    pub fn into_data(self) -> Vec<T> {
        self.data
    }

    pub fn num_elements(&self) -> usize {
        self.data.len()
    }
}

/// The default leaf codec.
///
/// ┌───────────────────────────────────────────────────────────┐
/// │ Data Block                                                │
/// │┌ ─ ─ ─ ─ ┬ ─ ─ ─ ─ ┬ ─ ─ ─ ─ ─ ─ ┬ ─ ─ ─┌ ─ ─ ─ ─ ─ ─ ─ ─ ─ │
/// │   mode   │  ndim   │   size 0    │ ...  │     payload      ││
/// ││  u16    │  u16    │     u32     │      │      bytes       │
/// │ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ┘─ ─ ─ ┘─ ─ ─ ─ ─ ─ ─ ─ ─ ┘│
/// └───────────────────────────────────────────────────────────┘
///
/// All integers little-endian. Mode 0 stores the elements as they are, mode 1
/// stores them LZ4-compressed with the uncompressed size prepended. The grid
/// position is not stored; the caller knows where the block lives.
#[derive(Debug, Clone, Copy)]
pub struct DefaultBlockCodec<T> {
    compression: CompressionType,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Default for DefaultBlockCodec<T> {
    fn default() -> Self {
        Self::new(CompressionType::None)
    }
}

impl<T> DefaultBlockCodec<T> {
    pub fn new(compression: CompressionType) -> Self {
        Self {
            compression,
            _marker: PhantomData,
        }
    }

    pub fn compression(&self) -> CompressionType {
        self.compression
    }
}

impl<T: Element> BlockCodec<DataBlock<T>> for DefaultBlockCodec<T> {
    fn encode(&self, block: &DataBlock<T>) -> ShardResult<Bytes> {
        let ndim = u16::try_from(block.size.len())
            .map_err(|_| arg_err!("{} dimensions do not fit a block header", block.size.len()))?;
        let mut raw = Vec::with_capacity(block.data.len() * T::SIZE);
        for v in &block.data {
            v.put_le(&mut raw);
        }

        let mut mode = self.compression;
        let mut payload = compress(&raw, mode);
        if !mode.is_none() && payload.len() >= raw.len() {
            ensure_cov::notify_cov("nested_shard_store::codec::block::encode::compress_fallback");
            mode = CompressionType::None;
            payload = raw;
        }

        let mut buf =
            Vec::with_capacity(SIZE_OF_U16 * 2 + SIZE_OF_U32 * block.size.len() + payload.len());
        buf.put_u16_le(mode.into());
        buf.put_u16_le(ndim);
        for &s in &block.size {
            let s = u32::try_from(s)
                .map_err(|_| arg_err!("block size {} does not fit a block header", s))?;
            buf.put_u32_le(s);
        }
        buf.put_slice(&payload);
        Ok(buf.into())
    }

    fn decode(&self, data: Bytes, grid_position: &[u64]) -> ShardResult<DataBlock<T>> {
        let mut rest: &[u8] = &data;
        if rest.len() < SIZE_OF_U16 * 2 {
            return Err(decode_err!("block of {} bytes has no header", data.len()));
        }
        let mode = CompressionType::try_from(rest.get_u16_le())?;
        let ndim = rest.get_u16_le() as usize;
        if rest.len() < ndim * SIZE_OF_U32 {
            return Err(decode_err!("block header declares {} dimensions but is truncated", ndim));
        }
        let size: Coords = (0..ndim).map(|_| rest.get_u32_le() as u64).collect();
        if size.len() != grid_position.len() {
            return Err(decode_err!(
                "block has {} dimensions, its grid position {:?} has {}",
                size.len(),
                grid_position,
                grid_position.len()
            ));
        }

        let expected = checked_num_elements(&size)
            .and_then(|n| n.checked_mul(T::SIZE as u64))
            .and_then(|n| usize::try_from(n).ok())
            .ok_or_else(|| decode_err!("block size {:?} overflows", size))?;
        if !mode.is_none() && rest.len() >= SIZE_OF_U32 {
            let declared = u32::from_le_bytes([rest[0], rest[1], rest[2], rest[3]]) as usize;
            if declared != expected {
                return Err(decode_err!(
                    "block of size {:?} needs {} payload bytes, header declares {}",
                    size,
                    expected,
                    declared
                ));
            }
        }

        let header_len = data.len() - rest.len();
        let payload = decompress(data.slice(header_len..), mode)?;
        if payload.len() != expected {
            return Err(decode_err!(
                "block of size {:?} needs {} payload bytes, found {}",
                size,
                expected,
                payload.len()
            ));
        }
        let values = payload.chunks_exact(T::SIZE).map(T::get_le).collect();
        Ok(DataBlock {
            size,
            grid_position: Coords::from_slice(grid_position),
            data: values,
        })
    }
}
