use bytes::Bytes;
use nested_shard_common::{arg_err, flat_index, num_elements, unflatten, Coords, ShardResult};

use crate::segment::Segment;

/// The sub-element byte ranges of one shard.
///
/// A shard read from storage keeps its source blob alive and its segments
/// are views into it. Encoding always writes every present segment anew;
/// unmodified ranges are not preserved in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawShard {
    shape: Coords,
    segments: Vec<Option<Segment>>,
    source: Option<Bytes>,
}

impl RawShard {
    /// A shard with every slot absent and no source.
    pub fn empty(shape: &[u64]) -> Self {
        Self {
            shape: Coords::from_slice(shape),
            segments: vec![None; num_elements(shape) as usize],
            source: None,
        }
    }

    pub(crate) fn from_source(shape: &[u64], segments: Vec<Option<Segment>>, source: Bytes) -> Self {
        debug_assert_eq!(segments.len() as u64, num_elements(shape));
        Self {
            shape: Coords::from_slice(shape),
            segments,
            source: Some(source),
        }
    }

    pub fn shape(&self) -> &[u64] {
        &self.shape
    }

    pub fn source(&self) -> Option<&Bytes> {
        self.source.as_ref()
    }

    pub fn num_slots(&self) -> usize {
        self.segments.len()
    }

    /// # Errors
    /// - [ShardError::ArgErr](nested_shard_common::ShardError::ArgErr) if `pos` is outside the shard
    pub fn check_position(&self, pos: &[u64]) -> ShardResult<()> {
        check_relative_position(pos, &self.shape)
    }

    pub fn segment(&self, pos: &[u64]) -> Option<&Segment> {
        self.segments[flat_index(pos, &self.shape)].as_ref()
    }

    /// The encoded bytes of the sub-element at `pos`, if present.
    ///
    /// # Panics
    /// If `pos` is outside the shard; see [`RawShard::check_position`].
    pub fn get_element_data(&self, pos: &[u64]) -> Option<Bytes> {
        self.segment(pos).map(|s| s.bytes().clone())
    }

    /// Installs `data` as the sub-element at `pos`, or clears the slot for `None`.
    ///
    /// # Panics
    /// If `pos` is outside the shard.
    pub fn set_element_data(&mut self, data: Option<Bytes>, pos: &[u64]) {
        let slot = flat_index(pos, &self.shape);
        self.segments[slot] = data.map(Segment::new);
    }

    pub fn is_empty(&self) -> bool {
        self.segments.iter().all(Option::is_none)
    }

    /// Number of present sub-elements.
    pub fn len(&self) -> usize {
        self.segments.iter().filter(|s| s.is_some()).count()
    }

    /// `(relative position, segment)` of every present slot in flat order.
    pub fn iter(&self) -> impl Iterator<Item = (Coords, &Segment)> + '_ {
        self.segments
            .iter()
            .enumerate()
            .filter_map(|(slot, s)| s.as_ref().map(|s| (unflatten(slot as u64, &self.shape), s)))
    }

    pub(crate) fn segments(&self) -> &[Option<Segment>] {
        &self.segments
    }
}

pub(crate) fn check_relative_position(pos: &[u64], shape: &[u64]) -> ShardResult<()> {
    if pos.len() != shape.len() || pos.iter().zip(shape.iter()).any(|(p, s)| p >= s) {
        return Err(arg_err!(
            "relative position {:?} is outside a shard of {:?} slots",
            pos,
            shape
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_set_clear() {
        let mut shard = RawShard::empty(&[2, 2]);
        assert!(shard.is_empty());
        assert!(shard.source().is_none());
        assert_eq!(shard.get_element_data(&[1, 1]), None);
        shard.set_element_data(Some(Bytes::from_static(b"xyz")), &[1, 1]);
        assert_eq!(shard.get_element_data(&[1, 1]), Some(Bytes::from_static(b"xyz")));
        assert_eq!(shard.len(), 1);
        let present: Vec<_> = shard.iter().map(|(p, s)| (p.to_vec(), s.len())).collect();
        assert_eq!(present, vec![(vec![1, 1], 3)]);
        shard.set_element_data(None, &[1, 1]);
        assert!(shard.is_empty());
    }

    #[test]
    fn position_check() {
        let shard = RawShard::empty(&[2, 3]);
        assert!(shard.check_position(&[1, 2]).is_ok());
        assert!(shard.check_position(&[2, 0]).is_err());
        assert!(shard.check_position(&[0]).is_err());
    }

    #[test]
    #[should_panic]
    fn out_of_range_position_never_aliases_a_slot() {
        let mut shard = RawShard::empty(&[2, 2]);
        shard.set_element_data(Some(Bytes::from_static(b"a")), &[3, 0]);
    }
}
