use std::{cmp::Ordering, ops::Range, sync::Arc};

use nested_shard_common::{arg_err, Coords, ShardResult};

use crate::grid::NestedGrid;

/// A coordinate bound to a [`NestedGrid`] and a nesting level.
///
/// The coordinate is kept at level 0; `level` only decides which view
/// [`Ord`] compares, so positions of different blocks inside the same shard
/// compare equal at that shard's level.
#[derive(Debug, Clone)]
pub struct NestedPosition {
    grid: Arc<NestedGrid>,
    base: Coords,
    level: usize,
}

impl NestedPosition {
    /// `pos` is a coordinate at `level`.
    ///
    /// # Errors
    /// - [ShardError::ArgErr](nested_shard_common::ShardError::ArgErr) if the dimensionality or
    ///   the level does not fit the grid.
    pub fn new(grid: Arc<NestedGrid>, pos: &[u64], level: usize) -> ShardResult<Self> {
        if pos.len() != grid.num_dimensions() {
            return Err(arg_err!(
                "position {:?} has {} dimensions, the grid has {}",
                pos,
                pos.len(),
                grid.num_dimensions()
            ));
        }
        if level >= grid.num_levels() {
            return Err(arg_err!(
                "level {} out of range, the grid has {} levels",
                level,
                grid.num_levels()
            ));
        }
        let base = grid.absolute_position(pos, level, 0);
        Ok(Self { grid, base, level })
    }

    pub fn grid(&self) -> &Arc<NestedGrid> {
        &self.grid
    }

    pub fn level(&self) -> usize {
        self.level
    }

    pub fn num_dimensions(&self) -> usize {
        self.base.len()
    }

    pub fn absolute(&self, level: usize) -> Coords {
        self.grid.absolute_position(&self.base, 0, level)
    }

    pub fn relative(&self, level: usize) -> Coords {
        self.grid.relative_position(&self.base, 0, level)
    }

    /// The store key: the coordinate at the outermost level.
    pub fn key(&self) -> Coords {
        self.absolute(self.grid.num_levels() - 1)
    }

    /// The same position viewed at another level.
    pub fn at_level(&self, level: usize) -> NestedPosition {
        debug_assert!(level < self.grid.num_levels());
        NestedPosition {
            grid: self.grid.clone(),
            base: self.grid.absolute_position(&self.absolute(level), level, 0),
            level,
        }
    }
}

impl PartialEq for NestedPosition {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for NestedPosition {}

impl PartialOrd for NestedPosition {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for NestedPosition {
    fn cmp(&self, other: &Self) -> Ordering {
        self.num_dimensions()
            .cmp(&other.num_dimensions())
            .then_with(|| self.level.cmp(&other.level))
            .then_with(|| {
                let a = self.absolute(self.level);
                let b = other.absolute(self.level);
                // the last dimension is the most significant
                a.iter().rev().cmp(b.iter().rev())
            })
    }
}

/// Stable-sorts `items` by their ancestor at `level` and returns the ranges
/// that share one ancestor. Requests for the same position keep their
/// relative order.
pub(crate) fn group_by_ancestor<I>(
    items: &mut [I],
    level: usize,
    position: impl Fn(&I) -> &NestedPosition,
) -> Vec<Range<usize>> {
    items.sort_by_cached_key(|item| position(item).at_level(level));
    let mut groups = Vec::new();
    let mut start = 0;
    for i in 1..=items.len() {
        if i == items.len()
            || position(&items[i]).absolute(level) != position(&items[start]).absolute(level)
        {
            if start < i {
                groups.push(start..i);
            }
            start = i;
        }
    }
    groups
}

/// Fails unless every item has the same ancestor at `level`.
pub(crate) fn ensure_same_ancestor<'a>(
    mut positions: impl Iterator<Item = &'a NestedPosition>,
    level: usize,
) -> ShardResult<()> {
    let Some(first) = positions.next() else {
        return Ok(());
    };
    let ancestor = first.absolute(level);
    for p in positions {
        let other = p.absolute(level);
        if other != ancestor {
            return Err(arg_err!(
                "positions {:?} and {:?} do not share an ancestor at level {}",
                ancestor,
                other,
                level
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;

    fn grid() -> Arc<NestedGrid> {
        Arc::new(NestedGrid::new(vec![smallvec![3, 3, 3], smallvec![6, 6, 6]]).unwrap())
    }

    fn pos(g: &Arc<NestedGrid>, p: &[u64]) -> NestedPosition {
        NestedPosition::new(g.clone(), p, 0).unwrap()
    }

    #[test]
    fn views() {
        let g = grid();
        let p = pos(&g, &[3, 2, 1]);
        assert_eq!(p.absolute(0).as_slice(), &[3, 2, 1]);
        assert_eq!(p.relative(0).as_slice(), &[1, 0, 1]);
        assert_eq!(p.key().as_slice(), &[1, 1, 0]);
        let shard = NestedPosition::new(g.clone(), &[1, 1, 0], 1).unwrap();
        assert_eq!(shard.absolute(0).as_slice(), &[2, 2, 0]);
        assert_eq!(p.at_level(1), shard);
        assert!(NestedPosition::new(g.clone(), &[0, 0], 0).is_err());
        assert!(NestedPosition::new(g, &[0, 0, 0], 2).is_err());
    }

    #[test]
    fn order_is_last_dimension_major() {
        let g = grid();
        let a = pos(&g, &[5, 0, 0]);
        let b = pos(&g, &[0, 1, 0]);
        let c = pos(&g, &[0, 0, 1]);
        assert!(a < b);
        assert!(b < c);
        // level dominates coordinates
        assert!(c < a.at_level(1));
        // siblings collapse at the shard level
        assert_eq!(pos(&g, &[0, 0, 0]).at_level(1), pos(&g, &[1, 1, 1]).at_level(1));
    }

    #[test]
    fn grouping_splits_on_ancestor() {
        let g = grid();
        let mut items = vec![
            (0, pos(&g, &[3, 2, 1])),
            (1, pos(&g, &[1, 0, 0])),
            (2, pos(&g, &[0, 0, 0])),
            (3, pos(&g, &[2, 3, 1])),
            (4, pos(&g, &[1, 0, 0])),
        ];
        let groups = group_by_ancestor(&mut items, 1, |(_, p)| p);
        assert_eq!(groups, vec![0..3, 3..5]);
        let order: Vec<usize> = items.iter().map(|(i, _)| *i).collect();
        // stable inside a group
        assert_eq!(order, vec![1, 2, 4, 0, 3]);
        for g in groups {
            assert!(ensure_same_ancestor(items[g].iter().map(|(_, p)| p), 1).is_ok());
        }
        assert!(ensure_same_ancestor(items.iter().map(|(_, p)| p), 1).is_err());
        assert!(ensure_same_ancestor(std::iter::empty(), 1).is_ok());
    }
}
