//! Geometry of a nested shard hierarchy.
//!
//! Level 0 addresses leaf blocks, level `num_levels - 1` is the unit that is
//! stored under one key. Every level tiles the level below it exactly, so a
//! coordinate can be moved between levels with integer arithmetic only.

use nested_shard_common::{arg_err, Coords, ShardResult};
use smallvec::smallvec;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NestedGrid {
    /// `block_sizes[level][dim]`, in array elements.
    block_sizes: Vec<Coords>,
    /// `block_sizes[level] / block_sizes[0]`
    relative_to_base: Vec<Coords>,
    /// `block_sizes[level] / block_sizes[level - 1]`, all ones for level 0.
    relative_to_adjacent: Vec<Coords>,
}

impl NestedGrid {
    /// # Errors
    /// - [ShardError::ArgErr](nested_shard_common::ShardError::ArgErr) when there is no level, when
    ///   the levels disagree on dimensionality, or when a level is not a positive exact multiple
    ///   of the level below it.
    pub fn new(block_sizes: Vec<Coords>) -> ShardResult<Self> {
        let Some(base) = block_sizes.first() else {
            return Err(arg_err!("a nested grid needs at least one level"));
        };
        let n = base.len();
        if n == 0 {
            return Err(arg_err!("a nested grid needs at least one dimension"));
        }

        let mut relative_to_base = Vec::with_capacity(block_sizes.len());
        let mut relative_to_adjacent = Vec::with_capacity(block_sizes.len());
        for (level, size) in block_sizes.iter().enumerate() {
            if size.len() != n {
                return Err(arg_err!(
                    "level {} has {} dimensions, expected {}",
                    level,
                    size.len(),
                    n
                ));
            }
            if let Some(d) = size.iter().position(|&s| s == 0) {
                return Err(arg_err!("level {} has a zero block size in dimension {}", level, d));
            }
            if level == 0 {
                relative_to_base.push(smallvec![1; n]);
                relative_to_adjacent.push(smallvec![1; n]);
                continue;
            }

            let prev = &block_sizes[level - 1];
            let mut adjacent = Coords::with_capacity(n);
            for d in 0..n {
                if size[d] < prev[d] {
                    return Err(arg_err!(
                        "level {} block size {} is smaller than level {} block size {} in dimension {}",
                        level,
                        size[d],
                        level - 1,
                        prev[d],
                        d
                    ));
                }
                if size[d] % prev[d] != 0 {
                    return Err(arg_err!(
                        "level {} block size {} is not a multiple of level {} block size {} in dimension {}",
                        level,
                        size[d],
                        level - 1,
                        prev[d],
                        d
                    ));
                }
                adjacent.push(size[d] / prev[d]);
            }
            relative_to_base.push(size.iter().zip(base.iter()).map(|(s, b)| s / b).collect());
            relative_to_adjacent.push(adjacent);
        }

        Ok(Self {
            block_sizes,
            relative_to_base,
            relative_to_adjacent,
        })
    }

    pub fn num_levels(&self) -> usize {
        self.block_sizes.len()
    }

    pub fn num_dimensions(&self) -> usize {
        self.block_sizes[0].len()
    }

    pub fn block_size(&self, level: usize) -> &[u64] {
        &self.block_sizes[level]
    }

    /// Number of level `level - 1` elements along each dimension of one
    /// level `level` element. All ones for level 0.
    pub fn relative_block_size(&self, level: usize) -> &[u64] {
        &self.relative_to_adjacent[level]
    }

    /// Number of sub-element slots in one shard at `level`.
    pub fn num_slots(&self, level: usize) -> u64 {
        self.relative_to_adjacent[level].iter().product()
    }

    /// Moves a coordinate given at `source_level` to `target_level`. Going up
    /// yields the containing element, going down yields the first contained one.
    pub fn absolute_position(&self, pos: &[u64], source_level: usize, target_level: usize) -> Coords {
        debug_assert_eq!(pos.len(), self.num_dimensions());
        let source = &self.relative_to_base[source_level];
        let target = &self.relative_to_base[target_level];
        pos.iter()
            .zip(source.iter().zip(target.iter()))
            .map(|(&p, (&s, &t))| p * s / t)
            .collect()
    }

    /// Like [`Self::absolute_position`] but relative to the parent element at
    /// `target_level + 1`. At the outermost level there is no parent and the
    /// absolute coordinate is returned.
    pub fn relative_position(&self, pos: &[u64], source_level: usize, target_level: usize) -> Coords {
        let mut ans = self.absolute_position(pos, source_level, target_level);
        if target_level + 1 < self.num_levels() {
            let ratio = &self.relative_to_adjacent[target_level + 1];
            for (p, r) in ans.iter_mut().zip(ratio.iter()) {
                *p %= r;
            }
        }
        ans
    }

    /// Every `sub_level` coordinate contained in the element at `(pos, level)`,
    /// dimension 0 varying fastest.
    pub fn position_in_sub_grid(&self, pos: &[u64], level: usize, sub_level: usize) -> Vec<Coords> {
        debug_assert!(sub_level <= level);
        let first = self.absolute_position(pos, level, sub_level);
        let extent: Coords = self.relative_to_base[level]
            .iter()
            .zip(self.relative_to_base[sub_level].iter())
            .map(|(l, s)| l / s)
            .collect();
        let count: u64 = extent.iter().product();
        (0..count)
            .map(|i| {
                let offset = nested_shard_common::unflatten(i, &extent);
                first.iter().zip(offset.iter()).map(|(f, o)| f + o).collect()
            })
            .collect()
    }
}
