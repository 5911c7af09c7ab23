//! Sequence log
//!
//! Fixed-capacity ring that maps a monotonically increasing sequence index to
//! a frame. Adding past capacity evicts the oldest frame. Indices are never
//! reused, so a consumer cursor stays meaningful across evictions: a lookup
//! for an evicted or not-yet-produced index simply returns `None`.

use super::frame::MediaFrame;

#[derive(Debug)]
struct Slot {
    index: u64,
    frame: MediaFrame,
}

/// Ring buffer of frames keyed by sequence index
#[derive(Debug)]
pub struct SequenceLog {
    slots: Vec<Option<Slot>>,
    /// Index the next `add` will assign
    next: u64,
    /// Indices below this were dropped by `clear`
    floor: u64,
    /// Payload bytes currently held
    bytes: usize,
}

impl SequenceLog {
    /// Create a log holding at most `capacity` frames (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);

        Self {
            slots,
            next: 0,
            floor: 0,
            bytes: 0,
        }
    }

    /// Append a frame, evicting the oldest one if the ring is full
    ///
    /// Returns the index assigned to the frame.
    pub fn add(&mut self, frame: MediaFrame) -> u64 {
        let index = self.next;
        let slot = self.slot_of(index);

        let size = frame.size();
        if let Some(old) = self.slots[slot].replace(Slot { index, frame }) {
            self.bytes -= old.frame.size();
        }
        self.bytes += size;
        self.next += 1;

        index
    }

    /// Look up a retained frame
    pub fn get(&self, index: u64) -> Option<&MediaFrame> {
        if index < self.floor || index >= self.next {
            return None;
        }
        match &self.slots[self.slot_of(index)] {
            Some(slot) if slot.index == index => Some(&slot.frame),
            _ => None,
        }
    }

    /// Newest assigned index, `None` before the first frame
    pub fn last_index(&self) -> Option<u64> {
        self.next.checked_sub(1)
    }

    /// Oldest index still retained, `None` when nothing is retained
    pub fn first_index(&self) -> Option<u64> {
        let last = self.last_index()?;
        let window_start = self.next.saturating_sub(self.capacity() as u64);
        let first = window_start.max(self.floor);
        (first <= last).then_some(first)
    }

    /// Index the next frame will receive
    pub fn next_index(&self) -> u64 {
        self.next
    }

    /// Drop every retained frame
    ///
    /// Index assignment continues from where it was; cleared indices read as
    /// gone.
    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            *slot = None;
        }
        self.floor = self.next;
        self.bytes = 0;
    }

    /// Number of frames currently retained
    pub fn len(&self) -> usize {
        match self.first_index() {
            Some(first) => (self.next - first) as usize,
            None => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Payload bytes currently retained
    pub fn retained_bytes(&self) -> usize {
        self.bytes
    }

    fn slot_of(&self, index: u64) -> usize {
        (index % self.slots.len() as u64) as usize
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    fn frame(ts: u32) -> MediaFrame {
        MediaFrame::video(ts, Bytes::from(vec![0u8; 10]), false, false)
    }

    #[test]
    fn test_empty_log() {
        let log = SequenceLog::new(4);
        assert_eq!(log.last_index(), None);
        assert_eq!(log.first_index(), None);
        assert!(log.get(0).is_none());
        assert!(log.is_empty());
    }

    #[test]
    fn test_indices_are_monotonic() {
        let mut log = SequenceLog::new(4);
        let mut prev = None;

        for ts in 0..20 {
            let index = log.add(frame(ts));
            if let Some(p) = prev {
                assert!(index > p);
            }
            assert_eq!(log.last_index(), Some(index));
            prev = Some(index);
        }
    }

    #[test]
    fn test_bounded_retention() {
        let mut log = SequenceLog::new(4);
        for ts in 0..10 {
            log.add(frame(ts * 10));
        }

        let last = log.last_index().unwrap();
        assert_eq!(last, 9);
        for index in 0..=(last - 4) {
            assert!(log.get(index).is_none(), "index {} should be evicted", index);
        }
        for index in (last - 3)..=last {
            assert_eq!(log.get(index).unwrap().timestamp, index as u32 * 10);
        }
        assert_eq!(log.first_index(), Some(6));
        assert_eq!(log.len(), 4);
    }

    #[test]
    fn test_unborn_index_is_none() {
        let mut log = SequenceLog::new(4);
        log.add(frame(0));
        assert!(log.get(1).is_none());
        assert!(log.get(100).is_none());
    }

    #[test]
    fn test_small_ring_scenario() {
        let mut log = SequenceLog::new(4);
        for ts in 0..6 {
            log.add(frame(ts));
        }

        // Window is [2, 5]
        assert!(log.get(1).is_none());
        assert!(log.get(2).is_some());
        assert_eq!(log.get(4).unwrap().timestamp, 4);
    }

    #[test]
    fn test_clear_keeps_index_monotonic() {
        let mut log = SequenceLog::new(8);
        log.add(frame(0));
        log.add(frame(1));

        log.clear();
        assert!(log.get(0).is_none());
        assert!(log.get(1).is_none());
        assert_eq!(log.last_index(), Some(1));
        assert_eq!(log.first_index(), None);
        assert_eq!(log.retained_bytes(), 0);

        let index = log.add(frame(2));
        assert_eq!(index, 2);
        assert_eq!(log.first_index(), Some(2));
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_retained_bytes_tracks_eviction() {
        let mut log = SequenceLog::new(2);
        log.add(frame(0));
        log.add(frame(1));
        assert_eq!(log.retained_bytes(), 20);

        log.add(frame(2));
        assert_eq!(log.retained_bytes(), 20);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let mut log = SequenceLog::new(0);
        assert_eq!(log.capacity(), 1);
        log.add(frame(0));
        log.add(frame(1));
        assert!(log.get(0).is_none());
        assert!(log.get(1).is_some());
    }
}
