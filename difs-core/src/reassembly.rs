use bytes::Bytes;
use std::collections::BTreeMap;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Segments of one fetch, keyed by segment number.
///
/// Arrival order is unconstrained; draining always writes in ascending
/// segment order. The buffer is consumed by `drain_into`.
#[derive(Debug, Default)]
pub struct ReassemblyBuffer {
    segments: BTreeMap<u64, Bytes>,
    bytes: u64,
}

impl ReassemblyBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if the segment was already present; the first copy
    /// wins.
    pub fn insert(&mut self, segment: u64, payload: Bytes) -> bool {
        if self.segments.contains_key(&segment) {
            return false;
        }
        self.bytes += payload.len() as u64;
        self.segments.insert(segment, payload);
        true
    }

    pub fn contains(&self, segment: u64) -> bool {
        self.segments.contains_key(&segment)
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Holds every segment in `0..=final_segment`.
    pub fn is_complete(&self, final_segment: u64) -> bool {
        final_segment.checked_add(1) == Some(self.segments.len() as u64)
            && self.segments.keys().next_back() == Some(&final_segment)
    }

    pub async fn drain_into<W>(self, sink: &mut W) -> std::io::Result<u64>
    where
        W: AsyncWrite + Unpin,
    {
        let mut written = 0u64;
        for (_, payload) in self.segments {
            sink.write_all(&payload).await?;
            written += payload.len() as u64;
        }
        sink.flush().await?;
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(segment: u64) -> Bytes {
        Bytes::from(format!("<{}>", segment))
    }

    async fn reassemble(order: &[u64]) -> Vec<u8> {
        let mut buffer = ReassemblyBuffer::new();
        for &segment in order {
            buffer.insert(segment, payload(segment));
        }
        assert!(buffer.is_complete(9));
        let mut out = Vec::new();
        buffer.drain_into(&mut out).await.unwrap();
        out
    }

    #[tokio::test]
    async fn test_arrival_order_does_not_change_output() {
        let in_order: Vec<u64> = (0..10).collect();
        let reverse: Vec<u64> = (0..10).rev().collect();
        let shuffled = [7, 2, 9, 0, 4, 1, 8, 3, 6, 5];
        let interleaved = [0, 5, 1, 6, 2, 7, 3, 8, 4, 9];

        let expected = reassemble(&in_order).await;
        assert_eq!(
            expected,
            b"<0><1><2><3><4><5><6><7><8><9>".to_vec()
        );
        assert_eq!(reassemble(&reverse).await, expected);
        assert_eq!(reassemble(&shuffled).await, expected);
        assert_eq!(reassemble(&interleaved).await, expected);
    }

    #[tokio::test]
    async fn test_writes_are_issued_in_segment_order() {
        let mut buffer = ReassemblyBuffer::new();
        buffer.insert(2, Bytes::from_static(b"cc"));
        buffer.insert(0, Bytes::from_static(b"a"));
        buffer.insert(1, Bytes::from_static(b"bbb"));

        let mut sink = tokio_test::io::Builder::new()
            .write(b"a")
            .write(b"bbb")
            .write(b"cc")
            .build();
        assert_eq!(buffer.drain_into(&mut sink).await.unwrap(), 6);
    }

    #[test]
    fn test_duplicates_and_completion() {
        let mut buffer = ReassemblyBuffer::new();
        assert!(buffer.insert(1, Bytes::from_static(b"x")));
        assert!(!buffer.insert(1, Bytes::from_static(b"yy")));
        assert_eq!(buffer.bytes(), 1);
        assert!(!buffer.is_complete(1));

        buffer.insert(0, Bytes::from_static(b"z"));
        assert!(buffer.is_complete(1));
        assert!(!buffer.is_complete(2));
        assert!(!buffer.is_complete(u64::MAX));
    }
}
