//! The load queue and work queue: unbounded FIFOs with their own mutex and
//! condition variable. A simple head-push/head-pop stack (LIFO) would also
//! satisfy the contract, since ordering is never promised across URLs, but
//! FIFO keeps submissions fair.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

use crate::types::{LoadItem, WorkItem};

/// A blocking FIFO shared between producers (pushing) and a single
/// long-lived consumer (draining/waiting).
pub struct BlockingQueue<T> {
    items: Mutex<VecDeque<T>>,
    cv: Condvar,
}

impl<T> BlockingQueue<T> {
    pub fn new() -> BlockingQueue<T> {
        BlockingQueue {
            items: Mutex::new(VecDeque::new()),
            cv: Condvar::new(),
        }
    }

    /// Push wakes the consumer.
    pub fn push(&self, item: T) {
        self.items.lock().unwrap().push_back(item);
        self.cv.notify_all();
    }

    /// Non-blocking pop, used by the fetcher's admission phase which only
    /// wants "is there more work right now", not "wait for more".
    pub fn try_pop(&self) -> Option<T> {
        self.items.lock().unwrap().pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().unwrap().is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.lock().unwrap().len()
    }

    /// Blocks until the queue is non-empty or `still_running` goes false,
    /// without taking anything -- used by the fetcher's idle phase, which
    /// drains one item at a time through `try_pop` once woken.
    pub fn wait_while_empty<F: Fn() -> bool>(&self, still_running: F) {
        let mut guard = self.items.lock().unwrap();
        while guard.is_empty() && still_running() {
            guard = self.cv.wait(guard).unwrap();
        }
    }

    /// Moves the entire pending list out in one locked operation (so
    /// producers aren't contended against one at a time), blocking first if
    /// the queue is empty and the caller is still running. Returns an empty
    /// vec if woken by shutdown with nothing queued. This is the worker's
    /// batching drain.
    pub fn drain_or_wait<F: Fn() -> bool>(&self, still_running: F) -> Vec<T> {
        let mut guard = self.items.lock().unwrap();
        while guard.is_empty() && still_running() {
            guard = self.cv.wait(guard).unwrap();
        }
        guard.drain(..).collect()
    }

    /// Wakes anyone blocked in `wait_while_empty`/`drain_or_wait` without
    /// pushing anything -- used by `destroy` to unstick an idle fetcher or
    /// worker so it can observe the running flag has flipped.
    pub fn notify_all(&self) {
        self.cv.notify_all();
    }

    pub fn clear(&self) {
        self.items.lock().unwrap().clear();
    }
}

impl<T> Default for BlockingQueue<T> {
    fn default() -> Self {
        BlockingQueue::new()
    }
}

pub type LoadQueue = BlockingQueue<LoadItem>;
pub type WorkQueue = BlockingQueue<WorkItem>;

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn push_pop_is_fifo() {
        let q: BlockingQueue<i32> = BlockingQueue::new();
        q.push(1);
        q.push(2);
        q.push(3);
        assert_eq!(q.try_pop(), Some(1));
        assert_eq!(q.try_pop(), Some(2));
        assert_eq!(q.try_pop(), Some(3));
        assert_eq!(q.try_pop(), None);
    }

    #[test]
    fn drain_or_wait_wakes_on_push() {
        let q = Arc::new(BlockingQueue::<i32>::new());
        let running = Arc::new(AtomicBool::new(true));

        let q2 = q.clone();
        let running2 = running.clone();
        let handle = thread::spawn(move || q2.drain_or_wait(|| running2.load(Ordering::SeqCst)));

        thread::sleep(Duration::from_millis(50));
        q.push(42);
        let drained = handle.join().unwrap();
        assert_eq!(drained, vec![42]);
    }

    #[test]
    fn drain_or_wait_wakes_on_shutdown() {
        let q = Arc::new(BlockingQueue::<i32>::new());
        let running = Arc::new(AtomicBool::new(true));

        let q2 = q.clone();
        let running2 = running.clone();
        let handle = thread::spawn(move || q2.drain_or_wait(|| running2.load(Ordering::SeqCst)));

        thread::sleep(Duration::from_millis(50));
        running.store(false, Ordering::SeqCst);
        q.notify_all();
        let drained = handle.join().unwrap();
        assert!(drained.is_empty());
    }
}
