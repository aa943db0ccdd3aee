//! Single-producer single-consumer hand-off
//!
//! Used for every hand-off out of interrupt-like context: radio callbacks
//! into application tasks and transport readers into the control task.
//! The storage is a fixed-capacity [`heapless::spsc::Queue`]; each end
//! owns one half and only enqueues or dequeues through it. The queue sits
//! behind a lock held for a single enqueue or dequeue, so both halves can
//! move to different threads.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use heapless::spsc::Queue;

type Shared<T, const N: usize> = Arc<Mutex<Queue<T, N>>>;

fn lock<T, const N: usize>(shared: &Shared<T, N>) -> MutexGuard<'_, Queue<T, N>> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Writing end of an SPSC queue
pub struct Producer<T, const N: usize> {
    shared: Shared<T, N>,
}

/// Reading end of an SPSC queue
pub struct Consumer<T, const N: usize> {
    shared: Shared<T, N>,
}

/// Create a queue backed by `N` slots
pub fn spsc<T, const N: usize>() -> (Producer<T, N>, Consumer<T, N>) {
    let shared = Arc::new(Mutex::new(Queue::new()));
    (
        Producer {
            shared: Arc::clone(&shared),
        },
        Consumer { shared },
    )
}

impl<T, const N: usize> Producer<T, N> {
    /// Append one item, handing it back if the queue is full
    pub fn push(&mut self, item: T) -> Result<(), T> {
        lock(&self.shared).enqueue(item)
    }

    /// Append items until the queue is full, returning how many fit
    pub fn push_iter<I: IntoIterator<Item = T>>(&mut self, items: I) -> usize {
        let mut queue = lock(&self.shared);
        let mut pushed = 0;
        for item in items {
            if queue.enqueue(item).is_err() {
                break;
            }
            pushed += 1;
        }
        pushed
    }

    pub fn len(&self) -> usize {
        lock(&self.shared).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.shared).is_empty()
    }

    pub fn capacity(&self) -> usize {
        lock(&self.shared).capacity()
    }
}

impl<T, const N: usize> Consumer<T, N> {
    /// Take the oldest item
    pub fn pop(&mut self) -> Option<T> {
        lock(&self.shared).dequeue()
    }

    /// Move everything currently queued into `out`
    pub fn drain_into(&mut self, out: &mut Vec<T>) -> usize {
        let mut queue = lock(&self.shared);
        let mut n = 0;
        while let Some(item) = queue.dequeue() {
            out.push(item);
            n += 1;
        }
        n
    }

    pub fn len(&self) -> usize {
        lock(&self.shared).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.shared).is_empty()
    }

    pub fn capacity(&self) -> usize {
        lock(&self.shared).capacity()
    }
}

impl<T, const N: usize> fmt::Debug for Producer<T, N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Producer")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .finish()
    }
}

impl<T, const N: usize> fmt::Debug for Consumer<T, N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Consumer")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .finish()
    }
}
