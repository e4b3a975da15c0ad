use std::sync::Arc;

use nested_shard_common::{arg_err, Coords, ShardResult};

use crate::{
    codec::{CompressionType, DataBlock, DefaultBlockCodec, Element, ShardCodec},
    dataset::DatasetAccess,
    grid::NestedGrid,
    index::{IndexCodec, IndexCodecs, IndexLocation, Xxh32Checksum},
    shard::ShardKind,
};

/// How one shard level lays out its index.
#[derive(Debug, Clone)]
pub struct ShardConfig {
    index_location: IndexLocation,
    checksum: bool,
    extra_codecs: Vec<Arc<dyn IndexCodec>>,
}

impl Default for ShardConfig {
    fn default() -> Self {
        Self {
            index_location: IndexLocation::End,
            checksum: true,
            extra_codecs: Vec::new(),
        }
    }
}

impl ShardConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn index_location(mut self, location: IndexLocation) -> Self {
        self.index_location = location;
        self
    }

    /// Append an xxhash32 checksum to the index. On by default.
    pub fn checksum(mut self, checksum: bool) -> Self {
        self.checksum = checksum;
        self
    }

    /// Add a codec applied to the index table after the checksum.
    pub fn index_codec(mut self, codec: Arc<dyn IndexCodec>) -> Self {
        self.extra_codecs.push(codec);
        self
    }

    pub fn index_codecs(&self) -> IndexCodecs {
        let mut codecs: Vec<Arc<dyn IndexCodec>> = Vec::with_capacity(self.extra_codecs.len() + 1);
        if self.checksum {
            codecs.push(Arc::new(Xxh32Checksum));
        }
        codecs.extend(self.extra_codecs.iter().cloned());
        Arc::from(codecs)
    }

    pub(crate) fn codec(&self, shape: &[u64]) -> ShardCodec {
        ShardCodec::new(shape, self.index_location, self.index_codecs())
    }
}

/// Everything needed to open a dataset.
///
/// ```
/// use nested_shard_store::{DatasetConfig, ShardConfig, IndexLocation};
///
/// let access = DatasetConfig::new(vec![vec![32, 32], vec![128, 128], vec![1024, 1024]])
///     .default_shard(ShardConfig::new().index_location(IndexLocation::Start))
///     .build::<f32>()
///     .unwrap();
/// assert_eq!(access.grid().num_levels(), 3);
/// ```
#[derive(Debug, Clone)]
pub struct DatasetConfig {
    block_sizes: Vec<Vec<u64>>,
    compression: CompressionType,
    default_shard: ShardConfig,
    shards: Vec<(usize, ShardConfig)>,
    shard_kind: ShardKind,
}

impl DatasetConfig {
    /// `block_sizes[level][dim]`; level 0 is the leaf block size.
    pub fn new(block_sizes: Vec<Vec<u64>>) -> Self {
        Self {
            block_sizes,
            compression: CompressionType::None,
            default_shard: ShardConfig::default(),
            shards: Vec::new(),
            shard_kind: ShardKind::default(),
        }
    }

    /// Compression of the default leaf codec.
    pub fn compression(mut self, compression: CompressionType) -> Self {
        self.compression = compression;
        self
    }

    /// Config for every shard level without an explicit one.
    pub fn default_shard(mut self, config: ShardConfig) -> Self {
        self.default_shard = config;
        self
    }

    /// Config for shard level `level` (`>= 1`).
    pub fn shard(mut self, level: usize, config: ShardConfig) -> Self {
        self.shards.retain(|(l, _)| *l != level);
        self.shards.push((level, config));
        self
    }

    /// Variant used by [`DatasetAccess::read_shard`].
    pub fn shard_kind(mut self, kind: ShardKind) -> Self {
        self.shard_kind = kind;
        self
    }

    pub fn grid(&self) -> ShardResult<NestedGrid> {
        NestedGrid::new(
            self.block_sizes
                .iter()
                .map(|s| Coords::from_slice(s))
                .collect(),
        )
    }

    fn shard_configs(&self, num_levels: usize) -> ShardResult<Vec<ShardConfig>> {
        if let Some((level, _)) = self
            .shards
            .iter()
            .find(|(l, _)| *l == 0 || *l >= num_levels)
        {
            return Err(arg_err!(
                "no shard level {} in a grid of {} levels",
                level,
                num_levels
            ));
        }
        Ok((1..num_levels)
            .map(|level| {
                self.shards
                    .iter()
                    .find(|(l, _)| *l == level)
                    .map_or_else(|| self.default_shard.clone(), |(_, c)| c.clone())
            })
            .collect())
    }

    /// Builds a dataset with the default leaf codec.
    pub fn build<T: Element>(&self) -> ShardResult<DatasetAccess<T>> {
        self.build_with_codec(Arc::new(DefaultBlockCodec::<T>::new(self.compression)))
    }

    /// Builds a dataset with a custom leaf codec.
    pub fn build_with_codec<T: Element>(
        &self,
        leaf: Arc<dyn crate::codec::BlockCodec<DataBlock<T>>>,
    ) -> ShardResult<DatasetAccess<T>> {
        let grid = self.grid()?;
        let configs = self.shard_configs(grid.num_levels())?;
        DatasetAccess::new(grid, leaf, &configs, self.shard_kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_can_be_turned_off() {
        assert_eq!(ShardConfig::new().index_codecs().len(), 1);
        assert_eq!(ShardConfig::new().checksum(false).index_codecs().len(), 0);
        let config = ShardConfig::new().index_codec(Arc::new(Xxh32Checksum));
        assert_eq!(config.index_codecs().len(), 2);
        assert_eq!(config.codec(&[2, 2]).empty_index().num_bytes(), 4 * 16 + 8);
    }

    #[test]
    fn per_level_overrides() {
        let config = DatasetConfig::new(vec![vec![2], vec![4], vec![8]])
            .shard(2, ShardConfig::new().index_location(IndexLocation::Start))
            .shard(2, ShardConfig::new().checksum(false));
        let configs = config.shard_configs(3).unwrap();
        assert_eq!(configs.len(), 2);
        assert!(configs[0].checksum);
        assert!(!configs[1].checksum);
        assert_eq!(configs[1].index_location, IndexLocation::End);

        assert!(DatasetConfig::new(vec![vec![2], vec![4]])
            .shard(2, ShardConfig::new())
            .build::<u8>()
            .is_err());
        assert!(DatasetConfig::new(vec![vec![2], vec![3]]).build::<u8>().is_err());
    }
}
