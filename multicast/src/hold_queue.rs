//! Hold-back queue for totally-ordered delivery.
//!
//! A binary min-heap over [`HoldEntry`] with a side index from message id to
//! heap slot, so an entry's key can be changed (or the entry removed) in
//! O(log n) without scanning.

use {
    crate::{config::NodeId, envelope::MessageId},
    std::{cmp::Ordering, collections::HashMap},
};

/// One message waiting for its final position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HoldEntry {
    /// Proposed sequence number until agreed, then the agreed one.
    pub seq: u64,
    pub agreed: bool,
    /// Tie-breaker: the sender before agreement, the winning proposer after.
    pub process_id: NodeId,
    pub msg_id: MessageId,
}

impl HoldEntry {
    pub fn proposed(seq: u64, process_id: NodeId, msg_id: MessageId) -> Self {
        Self {
            seq,
            agreed: false,
            process_id,
            msg_id,
        }
    }
}

impl Ord for HoldEntry {
    /// Sequence number first; at equal sequence numbers an un-agreed entry
    /// sorts before an agreed one, since its final number can only grow.
    fn cmp(&self, other: &Self) -> Ordering {
        self.seq
            .cmp(&other.seq)
            .then_with(|| self.agreed.cmp(&other.agreed))
            .then_with(|| self.process_id.cmp(&other.process_id))
            .then_with(|| self.msg_id.cmp(&other.msg_id))
    }
}

impl PartialOrd for HoldEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Index-tracking binary min-heap of [`HoldEntry`].
#[derive(Debug, Default)]
pub struct HoldQueue {
    heap: Vec<HoldEntry>,
    index: HashMap<MessageId, usize>,
}

impl HoldQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn contains(&self, msg_id: &MessageId) -> bool {
        self.index.contains_key(msg_id)
    }

    pub fn get(&self, msg_id: &MessageId) -> Option<&HoldEntry> {
        self.index.get(msg_id).map(|&slot| &self.heap[slot])
    }

    /// Insert `entry`. An entry with the same message id is replaced.
    pub fn push(&mut self, entry: HoldEntry) {
        if let Some(&slot) = self.index.get(&entry.msg_id) {
            self.heap[slot] = entry;
            self.fix(slot);
            return;
        }
        let slot = self.heap.len();
        self.index.insert(entry.msg_id, slot);
        self.heap.push(entry);
        self.sift_up(slot);
    }

    /// Smallest entry, if any.
    pub fn peek(&self) -> Option<&HoldEntry> {
        self.heap.first()
    }

    pub fn pop(&mut self) -> Option<HoldEntry> {
        self.remove_at(0)
    }

    /// Re-key an entry in place. Returns `false` if `msg_id` is not queued.
    pub fn update(&mut self, msg_id: &MessageId, seq: u64, process_id: NodeId, agreed: bool) -> bool {
        let Some(&slot) = self.index.get(msg_id) else {
            return false;
        };
        let entry = &mut self.heap[slot];
        entry.seq = seq;
        entry.process_id = process_id;
        entry.agreed = agreed;
        self.fix(slot);
        true
    }

    pub fn remove(&mut self, msg_id: &MessageId) -> Option<HoldEntry> {
        let slot = *self.index.get(msg_id)?;
        self.remove_at(slot)
    }

    // ── Heap maintenance ────────────────────────────────────────────────

    fn remove_at(&mut self, slot: usize) -> Option<HoldEntry> {
        let last = self.heap.len().checked_sub(1)?;
        if slot > last {
            return None;
        }
        self.swap(slot, last);
        let removed = self.heap.pop()?;
        self.index.remove(&removed.msg_id);
        if slot < self.heap.len() {
            self.fix(slot);
        }
        Some(removed)
    }

    fn fix(&mut self, slot: usize) {
        if !self.sift_up(slot) {
            self.sift_down(slot);
        }
    }

    /// Returns whether the entry moved.
    fn sift_up(&mut self, mut slot: usize) -> bool {
        let start = slot;
        while slot > 0 {
            let parent = slot.saturating_sub(1) / 2;
            if self.heap[slot] >= self.heap[parent] {
                break;
            }
            self.swap(slot, parent);
            slot = parent;
        }
        slot != start
    }

    fn sift_down(&mut self, mut slot: usize) {
        let len = self.heap.len();
        loop {
            let left = slot.saturating_mul(2).saturating_add(1);
            if left >= len {
                break;
            }
            let right = left.saturating_add(1);
            let child = if right < len && self.heap[right] < self.heap[left] {
                right
            } else {
                left
            };
            if self.heap[child] >= self.heap[slot] {
                break;
            }
            self.swap(slot, child);
            slot = child;
        }
    }

    fn swap(&mut self, a: usize, b: usize) {
        if a == b {
            return;
        }
        self.heap.swap(a, b);
        self.index.insert(self.heap[a].msg_id, a);
        self.index.insert(self.heap[b].msg_id, b);
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use {super::*, crate::envelope::new_message_id};

    fn entry(seq: u64, process: &str) -> HoldEntry {
        HoldEntry::proposed(seq, process.to_string(), new_message_id())
    }

    fn drain(q: &mut HoldQueue) -> Vec<(u64, String)> {
        std::iter::from_fn(|| q.pop())
            .map(|e| (e.seq, e.process_id))
            .collect()
    }

    fn assert_index_consistent(q: &HoldQueue) {
        assert_eq!(q.index.len(), q.heap.len());
        for (slot, e) in q.heap.iter().enumerate() {
            assert_eq!(q.index[&e.msg_id], slot);
        }
    }

    #[test]
    fn test_pop_in_order() {
        let mut q = HoldQueue::new();
        for (seq, p) in [(5, "a"), (1, "c"), (3, "b"), (1, "a"), (4, "a")] {
            q.push(entry(seq, p));
        }
        assert_index_consistent(&q);
        assert_eq!(
            drain(&mut q),
            vec![
                (1, "a".to_string()),
                (1, "c".to_string()),
                (3, "b".to_string()),
                (4, "a".to_string()),
                (5, "a".to_string()),
            ]
        );
        assert!(q.is_empty());
    }

    #[test]
    fn test_unagreed_before_agreed_at_equal_seq() {
        let mut q = HoldQueue::new();
        let agreed = entry(2, "a");
        let pending = entry(2, "z");
        q.push(agreed.clone());
        q.push(pending.clone());
        q.update(&agreed.msg_id, 2, "a".to_string(), true);
        assert_eq!(q.peek().unwrap().msg_id, pending.msg_id);
    }

    #[test]
    fn test_update_moves_entry_back() {
        let mut q = HoldQueue::new();
        let first = entry(1, "a");
        q.push(first.clone());
        q.push(entry(2, "b"));
        q.push(entry(3, "c"));

        assert!(q.update(&first.msg_id, 9, "c".to_string(), true));
        assert_index_consistent(&q);
        assert_eq!(q.peek().unwrap().seq, 2);
        let e = q.get(&first.msg_id).unwrap();
        assert!(e.agreed);
        assert_eq!(e.process_id, "c");

        assert!(!q.update(&new_message_id(), 1, "a".to_string(), true));
    }

    #[test]
    fn test_remove_arbitrary() {
        let mut q = HoldQueue::new();
        let entries: Vec<HoldEntry> = (0..20u64)
            .map(|i| entry(i.wrapping_mul(7) % 11, "p"))
            .collect();
        for e in &entries {
            q.push(e.clone());
        }
        for e in entries.iter().step_by(3) {
            assert_eq!(q.remove(&e.msg_id).unwrap().msg_id, e.msg_id);
            assert_index_consistent(&q);
        }
        assert!(q.remove(&entries[0].msg_id).is_none());

        let drained = drain(&mut q);
        assert!(drained.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(drained.len(), 13);
    }

    #[test]
    fn test_push_same_id_replaces() {
        let mut q = HoldQueue::new();
        let mut e = entry(4, "a");
        q.push(e.clone());
        e.seq = 1;
        q.push(e.clone());
        assert_eq!(q.len(), 1);
        assert_eq!(q.peek().unwrap().seq, 1);
    }
}
