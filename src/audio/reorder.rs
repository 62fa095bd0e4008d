//! Restores sequence order for audio chunks
//!
//! Chunks arrive tagged with a sequence index but not necessarily in order.
//! The reorderer holds early chunks until every lower index has been
//! delivered; it never skips a gap and never delivers an index twice.

use bytes::Bytes;
use std::collections::BTreeMap;

/// Reordering buffer in front of an in-order sink
pub struct AudioChunkReorderer<F> {
    /// Early chunks keyed by sequence index
    pending: BTreeMap<u64, Bytes>,
    /// Next index the sink is waiting for
    next_index: u64,
    sink: F,
    delivered: u64,
    duplicates: u64,
    discarded: u64,
}

impl<F> AudioChunkReorderer<F>
where
    F: FnMut(u64, Bytes),
{
    pub fn new(sink: F) -> Self {
        Self {
            pending: BTreeMap::new(),
            next_index: 0,
            sink,
            delivered: 0,
            duplicates: 0,
            discarded: 0,
        }
    }

    /// Accept a chunk and deliver every contiguous chunk now available.
    /// Returns how many chunks reached the sink.
    pub fn insert(&mut self, index: u64, data: Bytes) -> usize {
        if index < self.next_index || self.pending.contains_key(&index) {
            self.duplicates += 1;
            tracing::debug!("Dropping duplicate audio chunk {}", index);
            return 0;
        }

        self.pending.insert(index, data);

        let mut released = 0;
        while let Some(data) = self.pending.remove(&self.next_index) {
            (self.sink)(self.next_index, data);
            self.next_index += 1;
            released += 1;
        }
        self.delivered += released as u64;
        released
    }

    /// Drop every buffered chunk and start again at index 0.
    /// Returns how many chunks were discarded.
    pub fn reset(&mut self) -> usize {
        let discarded = self.pending.len();
        if discarded > 0 {
            tracing::debug!(
                "Discarding {} undelivered audio chunks (waiting for {})",
                discarded,
                self.next_index
            );
        }
        self.pending.clear();
        self.next_index = 0;
        self.discarded += discarded as u64;
        discarded
    }

    /// Index the sink expects next
    pub fn next_index(&self) -> u64 {
        self.next_index
    }

    /// Chunks waiting for a predecessor
    pub fn buffered(&self) -> usize {
        self.pending.len()
    }

    pub fn stats(&self) -> ReorderStats {
        ReorderStats {
            next_index: self.next_index,
            buffered: self.pending.len(),
            delivered: self.delivered,
            duplicates: self.duplicates,
            discarded: self.discarded,
        }
    }
}

/// Reorderer statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReorderStats {
    pub next_index: u64,
    pub buffered: usize,
    pub delivered: u64,
    pub duplicates: u64,
    pub discarded: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn recording() -> (Rc<RefCell<Vec<(u64, Bytes)>>>, impl FnMut(u64, Bytes)) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink_log = log.clone();
        (log, move |index, data| sink_log.borrow_mut().push((index, data)))
    }

    #[test]
    fn test_out_of_order_delivery() {
        let (log, sink) = recording();
        let mut reorderer = AudioChunkReorderer::new(sink);

        assert_eq!(reorderer.insert(2, Bytes::from_static(b"c")), 0);
        assert_eq!(reorderer.insert(0, Bytes::from_static(b"a")), 1);
        assert_eq!(reorderer.insert(1, Bytes::from_static(b"b")), 2);

        let log = log.borrow();
        let order: Vec<u64> = log.iter().map(|(i, _)| *i).collect();
        assert_eq!(order, vec![0, 1, 2]);
        assert_eq!(log[0].1, Bytes::from_static(b"a"));
        assert_eq!(log[2].1, Bytes::from_static(b"c"));
    }

    #[test]
    fn test_gap_is_never_skipped() {
        let (log, sink) = recording();
        let mut reorderer = AudioChunkReorderer::new(sink);

        for index in 1..50 {
            reorderer.insert(index, Bytes::new());
        }
        assert!(log.borrow().is_empty());
        assert_eq!(reorderer.buffered(), 49);

        reorderer.insert(0, Bytes::new());
        assert_eq!(log.borrow().len(), 50);
        assert_eq!(reorderer.next_index(), 50);
    }

    #[test]
    fn test_duplicates_dropped() {
        let (log, sink) = recording();
        let mut reorderer = AudioChunkReorderer::new(sink);

        reorderer.insert(0, Bytes::from_static(b"first"));
        reorderer.insert(0, Bytes::from_static(b"again"));
        reorderer.insert(2, Bytes::from_static(b"x"));
        reorderer.insert(2, Bytes::from_static(b"y"));

        assert_eq!(log.borrow().len(), 1);
        assert_eq!(reorderer.stats().duplicates, 2);
    }

    #[test]
    fn test_reset_discards_trailing() {
        let (log, sink) = recording();
        let mut reorderer = AudioChunkReorderer::new(sink);

        reorderer.insert(0, Bytes::new());
        reorderer.insert(3, Bytes::new());
        reorderer.insert(4, Bytes::new());

        assert_eq!(reorderer.reset(), 2);
        assert_eq!(reorderer.next_index(), 0);
        assert_eq!(log.borrow().len(), 1);
        assert_eq!(reorderer.stats().discarded, 2);
    }

    proptest! {
        #[test]
        fn delivers_any_permutation_in_order(
            order in Just((0u64..64).collect::<Vec<_>>()).prop_shuffle()
        ) {
            let (log, sink) = recording();
            let mut reorderer = AudioChunkReorderer::new(sink);
            for index in &order {
                reorderer.insert(*index, Bytes::from(index.to_le_bytes().to_vec()));
            }

            let log = log.borrow();
            let delivered: Vec<u64> = log.iter().map(|(i, _)| *i).collect();
            prop_assert_eq!(delivered, (0u64..64).collect::<Vec<_>>());
            for (index, data) in log.iter() {
                prop_assert_eq!(&data[..], &index.to_le_bytes()[..]);
            }
            prop_assert_eq!(reorderer.buffered(), 0);
        }
    }
}
