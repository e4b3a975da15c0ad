use std::ops::Range;

use bytes::Bytes;

/// A byte range of some underlying byte sequence.
///
/// Segments rehydrated from a stored shard remember where they came from, so
/// callers can read them in storage order. Segments built from fresh bytes
/// have no origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    data: Bytes,
    origin: Option<Range<u64>>,
}

impl Segment {
    pub fn new(data: Bytes) -> Self {
        Self { data, origin: None }
    }

    /// A view of `source[offset..offset + len]`. The caller checks the bounds.
    pub(crate) fn slice_of(source: &Bytes, offset: u64, len: u64) -> Self {
        let range = offset as usize..(offset + len) as usize;
        Self {
            data: source.slice(range),
            origin: Some(offset..offset + len),
        }
    }

    pub fn bytes(&self) -> &Bytes {
        &self.data
    }

    pub fn into_bytes(self) -> Bytes {
        self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The range in the source payload, if this segment was read from storage.
    pub fn origin(&self) -> Option<&Range<u64>> {
        self.origin.as_ref()
    }
}
