use bytes::Bytes;
use nested_shard_common::{decode_err, ShardError, ShardResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressionType {
    #[default]
    None,
    LZ4,
}

impl CompressionType {
    pub fn is_none(&self) -> bool {
        matches!(self, CompressionType::None)
    }
}

impl TryFrom<u16> for CompressionType {
    type Error = ShardError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(CompressionType::None),
            1 => Ok(CompressionType::LZ4),
            _ => Err(decode_err!("Invalid block mode: {}", value)),
        }
    }
}

impl From<CompressionType> for u16 {
    fn from(value: CompressionType) -> Self {
        match value {
            CompressionType::None => 0,
            CompressionType::LZ4 => 1,
        }
    }
}

pub fn compress(data: &[u8], compression_type: CompressionType) -> Vec<u8> {
    match compression_type {
        CompressionType::None => data.to_vec(),
        CompressionType::LZ4 => lz4_flex::compress_prepend_size(data),
    }
}

pub fn decompress(data: Bytes, compression_type: CompressionType) -> ShardResult<Bytes> {
    match compression_type {
        CompressionType::None => Ok(data),
        CompressionType::LZ4 => {
            let decompressed_data = lz4_flex::decompress_size_prepended(&data)
                .map_err(|e| decode_err!("{}", e))?;
            Ok(Bytes::from(decompressed_data))
        }
    }
}
