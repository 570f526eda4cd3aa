//! [`CommandQueue`] – bounded FIFO of pick-and-place jobs.
//!
//! Producers are the `pick_and_place` invocation handlers, which may run
//! concurrently; the only consumer is the state mirror.  Both the capacity
//! check and the insertion (and the emptiness check and the removal) happen
//! under one lock, so the bound and the FIFO order hold for any interleaving.
//! Neither side ever blocks waiting for space or for work.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use cellbridge_types::PickPlaceJob;

/// Capacity of the reference cell's queue.
pub const DEFAULT_CAPACITY: usize = 3;

#[derive(Debug)]
pub struct CommandQueue {
    capacity: usize,
    jobs: Mutex<VecDeque<PickPlaceJob>>,
}

impl CommandQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            jobs: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Append `job` unless the queue is full.
    ///
    /// Returns `false`, leaving the queue unchanged, when it already holds
    /// `capacity` jobs.
    pub fn enqueue(&self, job: PickPlaceJob) -> bool {
        let mut jobs = self.lock();
        if jobs.len() >= self.capacity {
            return false;
        }
        jobs.push_back(job);
        true
    }

    /// Remove and return the oldest job, or `None` when empty.
    pub fn dequeue(&self) -> Option<PickPlaceJob> {
        self.lock().pop_front()
    }

    pub fn size(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<PickPlaceJob>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for CommandQueue {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn job(pick_id: i32) -> PickPlaceJob {
        PickPlaceJob::new(pick_id, 0, pick_id + 100, 1)
    }

    #[test]
    fn fourth_job_is_rejected() {
        let queue = CommandQueue::default();
        let results: Vec<bool> = (1..=4).map(|i| queue.enqueue(job(i))).collect();
        assert_eq!(results, [true, true, true, false]);
        assert_eq!(queue.size(), 3);
    }

    #[test]
    fn dequeue_is_fifo() {
        let queue = CommandQueue::default();
        for i in 1..=3 {
            assert!(queue.enqueue(job(i)));
        }
        let order: Vec<i32> = std::iter::from_fn(|| queue.dequeue())
            .map(|j| j.pick.module_id)
            .collect();
        assert_eq!(order, [1, 2, 3]);
    }

    #[test]
    fn dequeue_on_empty_returns_none() {
        let queue = CommandQueue::default();
        assert!(queue.is_empty());
        assert!(queue.dequeue().is_none());
    }

    #[test]
    fn rejected_job_leaves_queue_unchanged() {
        let queue = CommandQueue::new(1);
        let first = job(1);
        assert!(queue.enqueue(first.clone()));
        assert!(!queue.enqueue(job(2)));
        assert_eq!(queue.dequeue(), Some(first));
        assert!(queue.dequeue().is_none());
    }

    #[test]
    fn space_frees_up_after_dequeue() {
        let queue = CommandQueue::default();
        for i in 1..=3 {
            queue.enqueue(job(i));
        }
        queue.dequeue();
        assert!(queue.enqueue(job(4)));
        assert!(!queue.enqueue(job(5)));
    }

    #[test]
    fn concurrent_producers_never_exceed_capacity() {
        let queue = Arc::new(CommandQueue::default());
        let handles: Vec<_> = (0..16)
            .map(|i| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || queue.enqueue(job(i)))
            })
            .collect();
        let accepted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();

        assert_eq!(accepted, 3);
        assert_eq!(queue.size(), 3);
    }

    #[test]
    fn concurrent_producer_and_consumer_preserve_order() {
        let queue = Arc::new(CommandQueue::new(2));
        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                let mut accepted = Vec::new();
                let mut next = 0;
                while next < 50 {
                    if queue.enqueue(job(next)) {
                        accepted.push(next);
                        next += 1;
                    } else {
                        thread::yield_now();
                    }
                }
                accepted
            })
        };

        let mut consumed = Vec::new();
        while consumed.len() < 50 {
            assert!(queue.size() <= 2);
            match queue.dequeue() {
                Some(j) => consumed.push(j.pick.module_id),
                None => thread::yield_now(),
            }
        }

        let accepted = producer.join().unwrap();
        assert_eq!(consumed, accepted);
    }
}
