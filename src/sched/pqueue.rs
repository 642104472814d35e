//! # Priority index over enabled processes.
//!
//! [`PriorityIndex`] keeps the group's enabled processes ordered by current
//! usage, least-loaded first, so the scheduler can route every request to
//! `top()` in O(1) and fix the ordering in O(log n) after a load change.
//!
//! ## Rules
//! - Key is `(usage, insertion seq)`: ties are broken by insertion order,
//!   so scheduling decisions are deterministic and reproducible in tests.
//! - `erase` and `rekey` address entries by pid; a position map makes both
//!   O(log n) instead of a linear scan.
//! - The insertion seq survives `rekey`, so a process does not lose its
//!   tie-break rank just because its load changed.

use std::collections::HashMap;
use std::sync::Arc;

use crate::process::Process;

struct Entry {
    usage: usize,
    seq: u64,
    process: Arc<Process>,
}

impl Entry {
    #[inline]
    fn key(&self) -> (usize, u64) {
        (self.usage, self.seq)
    }
}

/// Position-indexed binary min-heap of processes keyed by usage.
#[derive(Default)]
pub struct PriorityIndex {
    heap: Vec<Entry>,
    /// pid → index into `heap`.
    pos: HashMap<u32, usize>,
    next_seq: u64,
}

impl PriorityIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn contains(&self, pid: u32) -> bool {
        self.pos.contains_key(&pid)
    }

    /// The least-loaded process, if any.
    pub fn top(&self) -> Option<&Arc<Process>> {
        self.heap.first().map(|e| &e.process)
    }

    /// Inserts a process with the given usage key.
    ///
    /// A pid may appear at most once; re-inserting an existing pid is a
    /// rekey in disguise and is treated as such.
    pub fn push(&mut self, process: Arc<Process>, usage: usize) {
        let pid = process.pid();
        if self.contains(pid) {
            self.rekey(pid, usage);
            return;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        let idx = self.heap.len();
        self.heap.push(Entry {
            usage,
            seq,
            process,
        });
        self.pos.insert(pid, idx);
        self.sift_up(idx);
    }

    /// Removes the entry for `pid`. Returns false when absent.
    pub fn erase(&mut self, pid: u32) -> bool {
        let idx = match self.pos.remove(&pid) {
            Some(i) => i,
            None => return false,
        };
        let last = self.heap.len() - 1;
        if idx != last {
            self.heap.swap(idx, last);
            let moved_pid = self.heap[idx].process.pid();
            self.pos.insert(moved_pid, idx);
        }
        self.heap.pop();
        if idx < self.heap.len() {
            self.fix(idx);
        }
        true
    }

    /// Updates the usage key for `pid` and restores heap order.
    /// Returns false when absent.
    pub fn rekey(&mut self, pid: u32, usage: usize) -> bool {
        let idx = match self.pos.get(&pid) {
            Some(&i) => i,
            None => return false,
        };
        self.heap[idx].usage = usage;
        self.fix(idx);
        true
    }

    pub fn clear(&mut self) {
        self.heap.clear();
        self.pos.clear();
    }

    /// True when every entry reports itself at full capacity.
    ///
    /// Because the heap is keyed by usage, checking the top suffices for
    /// uniform capacities; this walks all entries so mixed-capacity groups
    /// are judged correctly too.
    pub fn all_at_full_capacity(&self) -> bool {
        self.heap.iter().all(|e| e.process.at_full_capacity())
    }

    fn fix(&mut self, idx: usize) {
        if !self.sift_up(idx) {
            self.sift_down(idx);
        }
    }

    /// Returns true when the entry moved.
    fn sift_up(&mut self, mut idx: usize) -> bool {
        let mut moved = false;
        while idx > 0 {
            let parent = (idx - 1) / 2;
            if self.heap[idx].key() >= self.heap[parent].key() {
                break;
            }
            self.swap_entries(idx, parent);
            idx = parent;
            moved = true;
        }
        moved
    }

    fn sift_down(&mut self, mut idx: usize) {
        loop {
            let left = 2 * idx + 1;
            let right = 2 * idx + 2;
            let mut smallest = idx;
            if left < self.heap.len() && self.heap[left].key() < self.heap[smallest].key() {
                smallest = left;
            }
            if right < self.heap.len() && self.heap[right].key() < self.heap[smallest].key() {
                smallest = right;
            }
            if smallest == idx {
                break;
            }
            self.swap_entries(idx, smallest);
            idx = smallest;
        }
    }

    fn swap_entries(&mut self, a: usize, b: usize) {
        self.heap.swap(a, b);
        let pid_a = self.heap[a].process.pid();
        let pid_b = self.heap[b].process.pid();
        self.pos.insert(pid_a, a);
        self.pos.insert(pid_b, b);
    }
}
