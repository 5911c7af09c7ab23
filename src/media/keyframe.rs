//! Keyframe index for late-joiner support
//!
//! A new consumer cannot decode from an arbitrary frame; it needs the
//! sequence headers followed by a keyframe and everything after it. The index
//! remembers the sequence-log positions of recent video keyframes so a join
//! point can be found without scanning the whole log.

use std::collections::VecDeque;

use super::ring::SequenceLog;

/// Where a fresh consumer starts reading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinPoint {
    /// Sequence-log index of the GOP start
    pub index: u64,
    /// The keyframe was already evicted, so its age could not be checked
    pub best_effort: bool,
}

/// Bounded history of keyframe positions in a [`SequenceLog`]
#[derive(Debug)]
pub struct KeyframeIndex {
    capacity: usize,
    indices: VecDeque<u64>,
}

impl KeyframeIndex {
    /// Create an index remembering at most `capacity` keyframes (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            indices: VecDeque::with_capacity(capacity),
        }
    }

    /// Record a keyframe position, forgetting the oldest past capacity
    pub fn push(&mut self, index: u64) {
        if self.indices.len() == self.capacity {
            self.indices.pop_front();
        }
        self.indices.push_back(index);
    }

    /// Find the newest keyframe at least `staleness_ms` older than
    /// `latest_timestamp`
    ///
    /// Candidates are visited newest to oldest. A candidate whose frame has
    /// already left the log is returned as a best-effort join point, since
    /// its timestamp can no longer be checked. Returns `None` when no
    /// candidate qualifies yet.
    pub fn scan_for_join_point(
        &self,
        log: &SequenceLog,
        latest_timestamp: u32,
        staleness_ms: u32,
    ) -> Option<JoinPoint> {
        for &index in self.indices.iter().rev() {
            let Some(frame) = log.get(index) else {
                return Some(JoinPoint {
                    index,
                    best_effort: true,
                });
            };

            if latest_timestamp.saturating_sub(frame.timestamp) >= staleness_ms {
                return Some(JoinPoint {
                    index,
                    best_effort: false,
                });
            }
        }

        None
    }

    /// Most recent keyframe position
    pub fn latest(&self) -> Option<u64> {
        self.indices.back().copied()
    }

    pub fn clear(&mut self) {
        self.indices.clear();
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}
