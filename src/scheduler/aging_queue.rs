//! Min-priority queue with aging.
//!
//! Every successful [`AgingQueue::pop`] lowers the priority of each entry left
//! behind by [`AGING_STEP`]. Because lower values are served first, a waiting
//! entry becomes strictly more urgent with every dispatch, so an entry pushed
//! with priority `P` is served after at most `ceil(P / AGING_STEP)` further
//! pops unless more urgent work keeps arriving.
//!
//! [`SharedQueue`] owns the only lock around the queue together with the
//! closed flag used during shutdown.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::{Mutex, MutexGuard};

/// Amount subtracted from every remaining entry after each pop.
pub const AGING_STEP: f64 = 0.2;

/// A queued item together with its current, aged priority.
///
/// Uses reversed ordering so `BinaryHeap` (a max-heap) behaves as a min-heap.
#[derive(Debug, Clone)]
pub struct QueueEntry<T> {
    pub priority: f64,
    pub item: T,
}

impl<T> QueueEntry<T> {
    pub fn new(priority: f64, item: T) -> Self {
        Self { priority, item }
    }
}

impl<T> PartialEq for QueueEntry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.priority.total_cmp(&other.priority) == Ordering::Equal
    }
}

impl<T> Eq for QueueEntry<T> {}

impl<T> Ord for QueueEntry<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        other.priority.total_cmp(&self.priority)
    }
}

impl<T> PartialOrd for QueueEntry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Unsynchronized aging min-heap.
#[derive(Debug)]
pub struct AgingQueue<T> {
    heap: BinaryHeap<QueueEntry<T>>,
}

impl<T> Default for AgingQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> AgingQueue<T> {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
        }
    }

    /// Inserts an entry. Any priority is accepted, including duplicates
    /// and negative values.
    pub fn push(&mut self, entry: QueueEntry<T>) {
        self.heap.push(entry);
    }

    /// Removes the entry with the smallest current priority, then ages
    /// every entry still waiting. Ties come out in no particular order.
    pub fn pop(&mut self) -> Option<QueueEntry<T>> {
        let entry = self.heap.pop()?;
        self.age();
        Some(entry)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Iterates over the waiting entries in arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = &QueueEntry<T>> {
        self.heap.iter()
    }

    fn age(&mut self) {
        if self.heap.is_empty() {
            return;
        }
        let mut entries = std::mem::take(&mut self.heap).into_vec();
        for entry in entries.iter_mut() {
            entry.priority -= AGING_STEP;
        }
        self.heap = BinaryHeap::from(entries);
    }
}

/// Result of [`SharedQueue::pop`].
#[derive(Debug)]
pub enum Popped<T> {
    /// The most urgent entry.
    Entry(QueueEntry<T>),
    /// Nothing queued right now.
    Empty,
    /// The queue is closed and fully drained.
    Drained,
}

struct QueueState<T> {
    queue: AgingQueue<T>,
    closed: bool,
}

/// Aging queue behind a single exclusive lock.
///
/// Once closed, pushes are refused and hand the item back, while pops keep
/// draining what is already queued.
pub struct SharedQueue<T> {
    state: Mutex<QueueState<T>>,
}

impl<T> Default for SharedQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SharedQueue<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                queue: AgingQueue::new(),
                closed: false,
            }),
        }
    }

    /// Inserts an entry, or returns the item if the queue is closed.
    pub fn push(&self, priority: f64, item: T) -> Result<(), T> {
        let mut state = self.lock();
        if state.closed {
            return Err(item);
        }
        state.queue.push(QueueEntry::new(priority, item));
        Ok(())
    }

    pub fn pop(&self) -> Popped<T> {
        let mut state = self.lock();
        match state.queue.pop() {
            Some(entry) => Popped::Entry(entry),
            None if state.closed => Popped::Drained,
            None => Popped::Empty,
        }
    }

    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stops accepting new entries.
    pub fn close(&self) {
        self.lock().closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    // A panic while holding the lock cannot leave the heap half-updated in a
    // way that matters here, so poisoning is ignored.
    fn lock(&self) -> MutexGuard<'_, QueueState<T>> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON: f64 = 1e-9;

    fn queue_with(priorities: &[f64]) -> AgingQueue<usize> {
        let mut queue = AgingQueue::new();
        for (i, priority) in priorities.iter().enumerate() {
            queue.push(QueueEntry::new(*priority, i));
        }
        queue
    }

    #[test]
    fn test_pop_returns_minimum() {
        let mut queue = queue_with(&[4.0, -1.5, 9.0, 0.0, 2.5]);

        let entry = queue.pop().expect("non-empty");
        assert_eq!(entry.item, 1);
        assert!((entry.priority - -1.5).abs() < EPSILON);
    }

    #[test]
    fn test_pop_ages_remaining_entries() {
        let mut queue = queue_with(&[1.0, 5.0, 3.0]);
        let mut before: Vec<(usize, f64)> = queue.iter().map(|e| (e.item, e.priority)).collect();

        let popped = queue.pop().expect("non-empty");
        before.retain(|(item, _)| *item != popped.item);

        for (item, priority) in before {
            let after = queue
                .iter()
                .find(|e| e.item == item)
                .expect("entry still queued");
            assert!((after.priority - (priority - AGING_STEP)).abs() < EPSILON);
        }
    }

    #[test]
    fn test_dispatch_order_with_aging() {
        // 5 and 3 age to 4.8 and 2.8 after the first pop.
        let mut queue = queue_with(&[5.0, 1.0, 3.0]);

        let first = queue.pop().expect("first");
        assert_eq!(first.item, 1);

        let second = queue.pop().expect("second");
        assert_eq!(second.item, 2);
        assert!((second.priority - 2.8).abs() < EPSILON);

        let third = queue.pop().expect("third");
        assert_eq!(third.item, 0);
        assert!((third.priority - 4.6).abs() < EPSILON);

        assert!(queue.pop().is_none());
    }

    #[test]
    fn test_priority_goes_negative_without_floor() {
        let mut queue = queue_with(&[0.0, 0.0, 0.0, 0.0]);
        queue.pop();
        queue.pop();
        queue.pop();

        let last = queue.pop().expect("last");
        assert!((last.priority - -0.6).abs() < EPSILON);
    }

    #[test]
    fn test_starvation_bound() {
        // A low-priority entry competes with a steady stream of priority-0
        // arrivals, one per pop. After ceil(P / step) pops it has caught up;
        // allow one more pop for the tie and one for float rounding.
        let initial = 2.0;
        let bound = (initial / AGING_STEP).ceil() as usize + 2;

        let mut queue = AgingQueue::new();
        queue.push(QueueEntry::new(initial, "slow"));

        let mut pops = 0;
        loop {
            queue.push(QueueEntry::new(0.0, "fast"));
            let entry = queue.pop().expect("non-empty");
            pops += 1;
            if entry.item == "slow" {
                break;
            }
            assert!(pops <= bound, "slow entry starved after {} pops", pops);
        }
        assert!(pops <= bound);
    }

    #[test]
    fn test_empty_pop() {
        let mut queue: AgingQueue<()> = AgingQueue::new();
        assert!(queue.pop().is_none());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_shared_queue_close_refuses_push_but_drains() {
        let queue = SharedQueue::new();
        queue.push(1.0, "a").expect("open");
        queue.close();

        assert_eq!(queue.push(0.0, "b"), Err("b"));
        assert!(queue.is_closed());

        match queue.pop() {
            Popped::Entry(entry) => assert_eq!(entry.item, "a"),
            other => panic!("expected entry, got {:?}", other),
        }
        assert!(matches!(queue.pop(), Popped::Drained));
    }

    #[test]
    fn test_shared_queue_empty_while_open() {
        let queue: SharedQueue<u8> = SharedQueue::new();
        assert!(matches!(queue.pop(), Popped::Empty));
        assert_eq!(queue.len(), 0);
    }
}
