//! Min-heap of logical clients ordered by their next send time
//!
//! A client is pushed when its pacing delay starts and popped once that
//! delay has passed, so one poller thread can pace any number of clients
//! without sleeping.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

#[derive(Debug, Clone, Eq, PartialEq)]
struct HeapEntry {
    /// When this client may send next (None = immediately)
    ready_at_ns: Option<u64>,
    client_idx: usize,
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap: "greater" pops first
        match (self.ready_at_ns, other.ready_at_ns) {
            (None, None) => other.client_idx.cmp(&self.client_idx),
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            (Some(a), Some(b)) => b.cmp(&a).then_with(|| other.client_idx.cmp(&self.client_idx)),
        }
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Clients waiting for their next send slot
///
/// ```
/// use rceload_core::dispatch::ReadyHeap;
///
/// let mut heap = ReadyHeap::new();
/// heap.push(0, Some(1000));
/// heap.push(1, None);
///
/// assert_eq!(heap.pop_ready(0), Some(1));
/// assert_eq!(heap.pop_ready(500), None);
/// assert_eq!(heap.pop_ready(1000), Some(0));
/// ```
#[derive(Debug, Default)]
pub struct ReadyHeap {
    heap: BinaryHeap<HeapEntry>,
}

impl ReadyHeap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `client_idx` to send at `ready_at_ns` (None = now)
    pub fn push(&mut self, client_idx: usize, ready_at_ns: Option<u64>) {
        self.heap.push(HeapEntry { ready_at_ns, client_idx });
    }

    /// Pop the earliest client whose send time is `<= now_ns`
    pub fn pop_ready(&mut self, now_ns: u64) -> Option<usize> {
        match self.heap.peek()?.ready_at_ns {
            Some(ready_at) if ready_at > now_ns => None,
            _ => self.heap.pop().map(|e| e.client_idx),
        }
    }

    /// Pop every client whose send time is `<= now_ns`
    ///
    /// Clients pushed back while the returned batch is processed wait for the
    /// next pass, so a pass always ends.
    pub fn pop_all_ready(&mut self, now_ns: u64) -> Vec<usize> {
        std::iter::from_fn(|| self.pop_ready(now_ns)).collect()
    }

    /// Earliest scheduled time, `None` if a client is ready now or the heap is empty
    pub fn peek_next_time(&self) -> Option<u64> {
        self.heap.peek()?.ready_at_ns
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_immediate_before_timed() {
        let mut heap = ReadyHeap::new();
        heap.push(0, Some(1000));
        heap.push(1, None);
        heap.push(2, Some(500));

        assert_eq!(heap.pop_ready(0), Some(1));
        assert_eq!(heap.pop_ready(0), None);
        assert_eq!(heap.pop_ready(600), Some(2));
        assert_eq!(heap.pop_ready(600), None);
        assert_eq!(heap.pop_ready(1000), Some(0));
        assert!(heap.is_empty());
    }

    #[test]
    fn test_equal_times_pop_in_client_order() {
        let mut heap = ReadyHeap::new();
        for idx in [3, 1, 2, 0] {
            heap.push(idx, None);
        }
        let order: Vec<usize> = std::iter::from_fn(|| heap.pop_ready(0)).collect();
        assert_eq!(order, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_pop_all_ready_takes_one_batch() {
        let mut heap = ReadyHeap::new();
        heap.push(0, None);
        heap.push(1, Some(100));
        heap.push(2, Some(900));

        let batch = heap.pop_all_ready(500);
        assert_eq!(batch, vec![0, 1]);

        // Re-pushing a client as ready now does not extend the batch taken
        for idx in batch {
            heap.push(idx, None);
        }
        assert_eq!(heap.len(), 3);
        assert_eq!(heap.pop_all_ready(500), vec![0, 1]);
    }

    #[test]
    fn test_peek_next_time() {
        let mut heap = ReadyHeap::new();
        assert_eq!(heap.peek_next_time(), None);

        heap.push(0, Some(3000));
        heap.push(1, Some(1000));
        assert_eq!(heap.peek_next_time(), Some(1000));
        assert_eq!(heap.len(), 2);

        heap.push(2, None);
        assert_eq!(heap.peek_next_time(), None);
    }
}
