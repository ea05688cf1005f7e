//! Read-ahead and write-behind buffers.
//!
//! Both buffers are plain values. The stream stages a new buffer state while
//! remote requests are in flight and swaps it in only once they succeed.

use bytes::{Bytes, BytesMut};
use std::ops::Range;

/// Prefetched bytes that have not been handed to the caller yet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ReadAhead {
    /// Nothing cached
    #[default]
    Empty,
    /// `data` holds the file contents starting at `offset`
    Filled {
        /// File offset of `data[0]`
        offset: u64,
        /// Valid bytes
        data: Bytes,
    },
}

impl ReadAhead {
    /// Builds a read-ahead buffer, collapsing empty data to `Empty`.
    pub fn filled(offset: u64, data: Bytes) -> Self {
        if data.is_empty() {
            ReadAhead::Empty
        } else {
            ReadAhead::Filled { offset, data }
        }
    }

    /// Number of cached bytes.
    pub fn len(&self) -> usize {
        match self {
            ReadAhead::Empty => 0,
            ReadAhead::Filled { data, .. } => data.len(),
        }
    }

    /// True if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True if the byte at `position` is cached.
    pub fn covers(&self, position: u64) -> bool {
        match self {
            ReadAhead::Empty => false,
            ReadAhead::Filled { offset, data } => {
                position >= *offset && position - *offset < data.len() as u64
            }
        }
    }

    /// Copies cached bytes starting at `position` into `dst`.
    ///
    /// Returns the number of bytes copied and the buffer that remains
    /// afterwards. A position outside the cached range copies nothing and
    /// yields `Empty`.
    pub fn serve(&self, position: u64, dst: &mut [u8]) -> (usize, ReadAhead) {
        let ReadAhead::Filled { offset, data } = self else {
            return (0, ReadAhead::Empty);
        };
        if !self.covers(position) {
            return (0, ReadAhead::Empty);
        }

        let start = (position - offset) as usize;
        let n = dst.len().min(data.len() - start);
        dst[..n].copy_from_slice(&data[start..start + n]);

        (n, ReadAhead::filled(position + n as u64, data.slice(start + n..)))
    }
}

/// Where the bytes of a planned write request come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkSource {
    /// Bytes assembled from the write-behind buffer
    Buffered(Bytes),
    /// A range of the caller's slice, sent without copying
    Caller(Range<usize>),
}

/// One remote write a caller's write turns into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteChunk {
    /// File offset
    pub offset: u64,
    /// Payload
    pub source: ChunkSource,
}

impl WriteChunk {
    /// Resolves the payload against the caller's slice.
    pub fn bytes<'a>(&'a self, caller: &'a [u8]) -> &'a [u8] {
        match &self.source {
            ChunkSource::Buffered(bytes) => bytes,
            ChunkSource::Caller(range) => &caller[range.clone()],
        }
    }

    /// Payload length.
    pub fn len(&self) -> usize {
        match &self.source {
            ChunkSource::Buffered(bytes) => bytes.len(),
            ChunkSource::Caller(range) => range.len(),
        }
    }

    /// True for an empty payload.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Remote writes plus the buffer state to keep once they all succeed.
#[derive(Debug)]
pub struct WritePlan {
    /// Requests in the order they must be issued
    pub chunks: Vec<WriteChunk>,
    /// Write-behind buffer after the last request completes
    pub remainder: WriteBehind,
}

/// Bytes accepted from the caller but not yet sent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum WriteBehind {
    /// Nothing pending
    #[default]
    Empty,
    /// `data` will land at `offset` once flushed
    Pending {
        /// File offset of `data[0]`
        offset: u64,
        /// Buffered bytes, never more than the write buffer size
        data: BytesMut,
    },
}

impl WriteBehind {
    /// Number of pending bytes.
    pub fn len(&self) -> usize {
        match self {
            WriteBehind::Empty => 0,
            WriteBehind::Pending { data, .. } => data.len(),
        }
    }

    /// True if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// File offset just past the pending bytes.
    pub fn end(&self) -> Option<u64> {
        match self {
            WriteBehind::Empty => None,
            WriteBehind::Pending { offset, data } => Some(offset + data.len() as u64),
        }
    }

    /// True if `len` bytes written at `position` can be buffered without
    /// filling the buffer and without a request.
    pub fn can_absorb(&self, position: u64, len: usize, capacity: usize) -> bool {
        match self {
            WriteBehind::Empty => len < capacity,
            WriteBehind::Pending { data, .. } => {
                self.end() == Some(position) && data.len() + len < capacity
            }
        }
    }

    /// Buffers `bytes` at `position`. Callers check [`can_absorb`](Self::can_absorb) first.
    pub fn absorb(&mut self, position: u64, bytes: &[u8]) {
        match self {
            WriteBehind::Empty => {
                *self = WriteBehind::Pending {
                    offset: position,
                    data: BytesMut::from(bytes),
                };
            }
            WriteBehind::Pending { data, .. } => data.extend_from_slice(bytes),
        }
    }

    /// The single request that empties this buffer, if any.
    pub fn flush_chunk(&self) -> Option<WriteChunk> {
        match self {
            WriteBehind::Empty => None,
            WriteBehind::Pending { offset, data } => Some(WriteChunk {
                offset: *offset,
                source: ChunkSource::Buffered(Bytes::copy_from_slice(data)),
            }),
        }
    }

    /// Plans the requests for writing `data` at `position` with a buffer of
    /// `capacity` bytes.
    ///
    /// Pending bytes that do not end at `position` are flushed first. Pending
    /// bytes that do are topped up from `data` and sent once the buffer is
    /// full. Whole buffers worth of `data` go out directly; the tail stays
    /// buffered.
    pub fn plan(&self, position: u64, data: &[u8], capacity: usize) -> WritePlan {
        if data.is_empty() {
            return WritePlan {
                chunks: Vec::new(),
                remainder: self.clone(),
            };
        }

        let mut chunks = Vec::new();
        let mut consumed = 0usize;
        let mut cursor = position;

        match self {
            WriteBehind::Pending {
                offset,
                data: pending,
            } if self.end() == Some(position) => {
                let take = (capacity - pending.len()).min(data.len());
                if pending.len() + take == capacity {
                    let mut full = BytesMut::with_capacity(capacity);
                    full.extend_from_slice(pending);
                    full.extend_from_slice(&data[..take]);
                    chunks.push(WriteChunk {
                        offset: *offset,
                        source: ChunkSource::Buffered(full.freeze()),
                    });
                    consumed = take;
                    cursor += take as u64;
                } else {
                    let mut grown = pending.clone();
                    grown.extend_from_slice(data);
                    return WritePlan {
                        chunks,
                        remainder: WriteBehind::Pending {
                            offset: *offset,
                            data: grown,
                        },
                    };
                }
            }
            WriteBehind::Pending { .. } => chunks.extend(self.flush_chunk()),
            WriteBehind::Empty => {}
        }

        while data.len() - consumed >= capacity {
            chunks.push(WriteChunk {
                offset: cursor,
                source: ChunkSource::Caller(consumed..consumed + capacity),
            });
            consumed += capacity;
            cursor += capacity as u64;
        }

        let remainder = if consumed < data.len() {
            WriteBehind::Pending {
                offset: cursor,
                data: BytesMut::from(&data[consumed..]),
            }
        } else {
            WriteBehind::Empty
        };

        WritePlan { chunks, remainder }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending(offset: u64, data: &[u8]) -> WriteBehind {
        WriteBehind::Pending {
            offset,
            data: BytesMut::from(data),
        }
    }

    #[test]
    fn test_read_ahead_serve_partial() {
        let buffer = ReadAhead::filled(100, Bytes::from_static(b"abcdef"));
        assert!(buffer.covers(100));
        assert!(buffer.covers(105));
        assert!(!buffer.covers(106));
        assert!(!buffer.covers(99));

        let mut dst = [0u8; 4];
        let (n, rest) = buffer.serve(102, &mut dst);
        assert_eq!(n, 4);
        assert_eq!(&dst, b"cdef");
        assert_eq!(rest, ReadAhead::Empty);
    }

    #[test]
    fn test_read_ahead_serve_keeps_surplus() {
        let buffer = ReadAhead::filled(0, Bytes::from_static(b"abcdef"));
        let mut dst = [0u8; 2];
        let (n, rest) = buffer.serve(0, &mut dst);
        assert_eq!(n, 2);
        assert_eq!(&dst, b"ab");
        assert_eq!(rest, ReadAhead::filled(2, Bytes::from_static(b"cdef")));
    }

    #[test]
    fn test_read_ahead_outside_range() {
        let buffer = ReadAhead::filled(10, Bytes::from_static(b"xyz"));
        let mut dst = [0u8; 3];
        let (n, rest) = buffer.serve(20, &mut dst);
        assert_eq!(n, 0);
        assert!(rest.is_empty());
        assert!(ReadAhead::filled(0, Bytes::new()).is_empty());
    }

    #[test]
    fn test_absorb_small_writes() {
        let mut buffer = WriteBehind::Empty;
        assert!(buffer.can_absorb(0, 3, 8));
        buffer.absorb(0, b"abc");
        assert!(buffer.can_absorb(3, 4, 8));
        assert!(!buffer.can_absorb(3, 5, 8), "filling the buffer needs a flush");
        assert!(!buffer.can_absorb(4, 1, 8), "gap after pending bytes");
        buffer.absorb(3, b"defg");
        assert_eq!(buffer, pending(0, b"abcdefg"));
        assert_eq!(buffer.end(), Some(7));
    }

    #[test]
    fn test_plan_exact_capacity_from_empty() {
        let data = [7u8; 8];
        let plan = WriteBehind::Empty.plan(0, &data, 8);
        assert_eq!(plan.chunks.len(), 1);
        assert_eq!(plan.chunks[0].offset, 0);
        assert_eq!(plan.chunks[0].source, ChunkSource::Caller(0..8));
        assert_eq!(plan.remainder, WriteBehind::Empty);
    }

    #[test]
    fn test_plan_tops_up_pending() {
        let buffer = pending(10, b"abc");
        let plan = buffer.plan(13, b"defghijklmno", 8);

        assert_eq!(plan.chunks.len(), 1);
        assert_eq!(plan.chunks[0].offset, 10);
        assert_eq!(plan.chunks[0].bytes(b"defghijklmno"), b"abcdefgh");
        assert_eq!(plan.remainder, pending(18, b"ijklmno"));
    }

    #[test]
    fn test_plan_contiguous_chunks() {
        let data: Vec<u8> = (0..25).collect();
        let plan = pending(0, b"xy").plan(2, &data, 8);

        let offsets: Vec<u64> = plan.chunks.iter().map(|c| c.offset).collect();
        assert_eq!(offsets, vec![0, 8, 16]);
        assert!(plan.chunks.iter().all(|c| c.len() == 8));
        assert_eq!(plan.chunks[1].source, ChunkSource::Caller(6..14));
        assert_eq!(plan.chunks[2].source, ChunkSource::Caller(14..22));
        assert_eq!(plan.remainder, pending(24, &data[22..]));
    }

    #[test]
    fn test_plan_non_sequential_flushes_first() {
        let plan = pending(0, b"abc").plan(100, b"zz", 8);
        assert_eq!(plan.chunks.len(), 1);
        assert_eq!(plan.chunks[0].offset, 0);
        assert_eq!(plan.chunks[0].bytes(b"zz"), b"abc");
        assert_eq!(plan.remainder, pending(100, b"zz"));
    }

    #[test]
    fn test_plan_empty_data_keeps_pending() {
        let behind = pending(0, b"abc");
        let plan = behind.plan(100, b"", 8);
        assert!(plan.chunks.is_empty());
        assert_eq!(plan.remainder, behind);
    }

    #[test]
    fn test_flush_chunk() {
        assert!(WriteBehind::Empty.flush_chunk().is_none());
        let chunk = pending(5, b"hello").flush_chunk().unwrap();
        assert_eq!(chunk.offset, 5);
        assert_eq!(chunk.bytes(&[]), b"hello");
    }
}
