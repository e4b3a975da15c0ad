use bytes::{BufMut, Bytes};
use nested_shard_common::{arg_err, Coords, ShardResult};

use super::BlockCodec;
use crate::{
    index::{IndexCodecs, IndexLocation, ShardIndex},
    raw_shard::RawShard,
    segment::Segment,
};

/// Encodes one shard level.
///
/// ┌──────────────────────────────────────────────────────────┐
/// │ Shard (IndexLocation::End)                               │
/// │┌ ─ ─ ─ ─ ─ ─ ┬ ─ ─ ─┌ ─ ─ ─ ─ ─ ─ ─ ┬ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─│
/// │  element 0   │ ...  │  element k    │    Shard Index    ││
/// ││   bytes     │      │    bytes      │      bytes         │
/// │ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ┘─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─┘│
/// └──────────────────────────────────────────────────────────┘
///
/// Present elements are concatenated in flat slot order; absent ones take no
/// space. With [`IndexLocation::Start`] the index comes first.
#[derive(Debug, Clone)]
pub struct ShardCodec {
    shape: Coords,
    location: IndexLocation,
    index_codecs: IndexCodecs,
}

impl ShardCodec {
    pub fn new(shape: &[u64], location: IndexLocation, index_codecs: IndexCodecs) -> Self {
        Self {
            shape: Coords::from_slice(shape),
            location,
            index_codecs,
        }
    }

    /// Slots per dimension.
    pub fn shape(&self) -> &[u64] {
        &self.shape
    }

    pub fn location(&self) -> IndexLocation {
        self.location
    }

    pub fn index_codecs(&self) -> &IndexCodecs {
        &self.index_codecs
    }

    pub fn empty_index(&self) -> ShardIndex {
        ShardIndex::new_empty(&self.shape, self.location, self.index_codecs.clone())
    }

    pub fn empty_shard(&self) -> RawShard {
        RawShard::empty(&self.shape)
    }

    /// Decodes only the index of `blob`, returning it with the payload region.
    pub fn read_index(&self, blob: &Bytes) -> ShardResult<(ShardIndex, Bytes)> {
        ShardIndex::read(blob, &self.shape, self.location, self.index_codecs.clone())
    }

    /// Writes `elements` (one per slot, in slot order) as a canonical shard.
    pub(crate) fn encode_elements<'a>(
        &self,
        elements: impl Iterator<Item = Option<&'a [u8]>>,
    ) -> Bytes {
        let mut index = self.empty_index();
        let mut payload = Vec::new();
        for (slot, element) in elements.enumerate() {
            if let Some(bytes) = element {
                index.set_at(slot, payload.len() as u64, bytes.len() as u64);
                payload.put_slice(bytes);
            }
        }
        index.write(&payload)
    }
}

impl BlockCodec<RawShard> for ShardCodec {
    fn encode(&self, shard: &RawShard) -> ShardResult<Bytes> {
        if shard.shape() != self.shape.as_slice() {
            return Err(arg_err!(
                "shard of {:?} slots given to a codec for {:?} slots",
                shard.shape(),
                self.shape
            ));
        }
        Ok(self.encode_elements(
            shard
                .segments()
                .iter()
                .map(|s| s.as_ref().map(|s| s.bytes().as_ref())),
        ))
    }

    fn decode(&self, blob: Bytes, grid_position: &[u64]) -> ShardResult<RawShard> {
        let (index, payload) = self.read_index(&blob)?;
        let segments = (0..index.num_slots())
            .map(|slot| {
                index.exists_at(slot).then(|| {
                    Segment::slice_of(&payload, index.offset_at(slot), index.num_bytes_at(slot))
                })
            })
            .collect();
        tracing::trace!(
            ?grid_position,
            blob_len = blob.len(),
            index_len = index.num_bytes(),
            "decoded shard"
        );
        Ok(RawShard::from_source(&self.shape, segments, blob))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rand::{rngs::StdRng, Rng, SeedableRng};

    use super::*;
    use crate::index::{IndexCodec, Xxh32Checksum};

    fn codec(location: IndexLocation) -> ShardCodec {
        let codecs: IndexCodecs = Arc::from(vec![Arc::new(Xxh32Checksum) as Arc<dyn IndexCodec>]);
        ShardCodec::new(&[2, 3], location, codecs)
    }

    #[test]
    fn layout_is_payload_in_slot_order() {
        let codec = codec(IndexLocation::End);
        let mut shard = codec.empty_shard();
        shard.set_element_data(Some(Bytes::from_static(b"bb")), &[1, 2]);
        shard.set_element_data(Some(Bytes::from_static(b"a")), &[0, 1]);
        let blob = codec.encode(&shard).unwrap();
        assert_eq!(&blob[..3], b"abb");
        let (index, payload) = codec.read_index(&blob).unwrap();
        assert_eq!(payload.as_ref(), b"abb");
        assert_eq!((index.offset(&[0, 1]), index.num_bytes_of(&[0, 1])), (0, 1));
        assert_eq!((index.offset(&[1, 2]), index.num_bytes_of(&[1, 2])), (1, 2));

        let start = ShardCodec::new(&[2, 3], IndexLocation::Start, codec.index_codecs().clone());
        let blob = start.encode(&shard).unwrap();
        assert_eq!(&blob[blob.len() - 3..], b"abb");
    }

    #[test]
    fn empty_shard_is_only_an_index() {
        let codec = codec(IndexLocation::Start);
        let blob = codec.encode(&codec.empty_shard()).unwrap();
        assert_eq!(blob.len(), codec.empty_index().num_bytes());
        assert!(codec.decode(blob, &[0, 0]).unwrap().is_empty());
    }

    #[test]
    fn random_subsets_round_trip() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        for location in [IndexLocation::Start, IndexLocation::End] {
            let codec = codec(location);
            for _ in 0..64 {
                let mut shard = codec.empty_shard();
                for x in 0..2 {
                    for y in 0..3 {
                        if rng.gen_bool(0.5) {
                            let len = rng.gen_range(0..20);
                            let data: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
                            shard.set_element_data(Some(data.into()), &[x, y]);
                        }
                    }
                }
                let blob = codec.encode(&shard).unwrap();
                let decoded = codec.decode(blob.clone(), &[0, 0]).unwrap();
                assert_eq!(decoded.source(), Some(&blob));
                let before: Vec<_> = shard.iter().map(|(p, s)| (p, s.bytes().clone())).collect();
                let after: Vec<_> = decoded.iter().map(|(p, s)| (p, s.bytes().clone())).collect();
                assert_eq!(before, after);
                // re-encoding a decoded shard is byte-identical
                assert_eq!(codec.encode(&decoded).unwrap(), blob);
            }
        }
    }

    #[test]
    fn shape_mismatch_is_an_argument_error() {
        let codec = codec(IndexLocation::End);
        let err = codec.encode(&RawShard::empty(&[3, 2])).unwrap_err();
        assert!(!err.is_corruption());
    }
}
