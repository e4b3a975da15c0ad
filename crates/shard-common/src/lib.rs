use smallvec::SmallVec;

mod error;

pub use error::{ShardError, ShardResult};

/// A grid coordinate or a per-dimension size. Most datasets have at most
/// four dimensions, so it stays inline.
pub type Coords = SmallVec<[u64; 4]>;

/// Product of all entries, i.e. the number of cells in a box of this shape.
pub fn num_elements(shape: &[u64]) -> u64 {
    shape.iter().product()
}

/// [`num_elements`] for untrusted shapes; `None` on overflow.
pub fn checked_num_elements(shape: &[u64]) -> Option<u64> {
    shape.iter().try_fold(1u64, |acc, &s| acc.checked_mul(s))
}

/// Flattens `pos` inside a box of `shape`, dimension 0 varying fastest.
///
/// # Panics
/// If `pos` does not lie inside `shape`.
pub fn flat_index(pos: &[u64], shape: &[u64]) -> usize {
    assert_eq!(pos.len(), shape.len(), "position {:?} in a box of {:?}", pos, shape);
    let mut idx = 0u64;
    for d in (0..shape.len()).rev() {
        assert!(pos[d] < shape[d], "position {:?} outside a box of {:?}", pos, shape);
        idx = idx * shape[d] + pos[d];
    }
    idx as usize
}

/// Inverse of [`flat_index`].
pub fn unflatten(mut idx: u64, shape: &[u64]) -> Coords {
    let mut pos = Coords::with_capacity(shape.len());
    for &s in shape {
        pos.push(idx % s);
        idx /= s;
    }
    pos
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_index_dimension_zero_is_fastest() {
        let shape = [2, 3, 4];
        assert_eq!(flat_index(&[0, 0, 0], &shape), 0);
        assert_eq!(flat_index(&[1, 0, 0], &shape), 1);
        assert_eq!(flat_index(&[0, 1, 0], &shape), 2);
        assert_eq!(flat_index(&[0, 0, 1], &shape), 6);
        assert_eq!(flat_index(&[1, 2, 3], &shape), 23);
        for i in 0..num_elements(&shape) {
            let pos = unflatten(i, &shape);
            assert_eq!(flat_index(&pos, &shape) as u64, i);
        }
    }

    #[test]
    #[should_panic]
    fn flat_index_rejects_out_of_range() {
        // would alias [1, 1] if unchecked
        flat_index(&[3, 0], &[2, 2]);
    }

    #[test]
    fn checked_num_elements_overflow() {
        assert_eq!(checked_num_elements(&[2, 3, 4]), Some(24));
        assert_eq!(checked_num_elements(&[]), Some(1));
        assert_eq!(checked_num_elements(&[65536; 4]), None);
    }
}
