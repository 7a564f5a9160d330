//! Two-tier send queue with strict priority.
//!
//! `push_prioritized` items are always dequeued before any `push` item,
//! regardless of arrival order; each tier is FIFO. A single consumer awaits
//! [`PriorityQueue::pop`].

use std::collections::VecDeque;

use parking_lot::Mutex;
use tokio::sync::Notify;

#[derive(Debug)]
struct Tiers<T> {
    prioritized: VecDeque<T>,
    normal: VecDeque<T>,
    closed: bool,
}

/// Blocking priority queue shared between producers and one consumer.
#[derive(Debug)]
pub struct PriorityQueue<T> {
    tiers: Mutex<Tiers<T>>,
    ready: Notify,
}

impl<T> Default for PriorityQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> PriorityQueue<T> {
    /// Empty, open queue.
    #[must_use]
    pub fn new() -> Self {
        Self {
            tiers: Mutex::new(Tiers {
                prioritized: VecDeque::new(),
                normal: VecDeque::new(),
                closed: false,
            }),
            ready: Notify::new(),
        }
    }

    /// Append to the normal tier.
    ///
    /// # Errors
    ///
    /// Hands the item back if the queue has been closed.
    pub fn push(&self, item: T) -> Result<(), T> {
        self.insert(item, false)
    }

    /// Append to the prioritized tier.
    ///
    /// # Errors
    ///
    /// Hands the item back if the queue has been closed.
    pub fn push_prioritized(&self, item: T) -> Result<(), T> {
        self.insert(item, true)
    }

    fn insert(&self, item: T, prioritized: bool) -> Result<(), T> {
        {
            let mut tiers = self.tiers.lock();
            if tiers.closed {
                return Err(item);
            }
            if prioritized {
                tiers.prioritized.push_back(item);
            } else {
                tiers.normal.push_back(item);
            }
        }
        self.ready.notify_one();
        Ok(())
    }

    /// Dequeue without waiting.
    pub fn try_pop(&self) -> Option<T> {
        let mut tiers = self.tiers.lock();
        tiers
            .prioritized
            .pop_front()
            .or_else(|| tiers.normal.pop_front())
    }

    /// Wait for the next item, prioritized tier first.
    ///
    /// Returns `None` once the queue is closed and drained. Cancel safe: an
    /// item is only removed when this future completes.
    pub async fn pop(&self) -> Option<T> {
        loop {
            {
                let mut tiers = self.tiers.lock();
                if let Some(item) = tiers
                    .prioritized
                    .pop_front()
                    .or_else(|| tiers.normal.pop_front())
                {
                    return Some(item);
                }
                if tiers.closed {
                    return None;
                }
            }
            // notify_one stores a permit, so a push between the check above
            // and this await is not lost.
            self.ready.notified().await;
        }
    }

    /// Refuse further pushes and return everything still queued, in
    /// dequeue order.
    pub fn close(&self) -> Vec<T> {
        let drained = {
            let mut tiers = self.tiers.lock();
            tiers.closed = true;
            let mut drained: Vec<T> = tiers.prioritized.drain(..).collect();
            drained.extend(tiers.normal.drain(..));
            drained
        };
        self.ready.notify_one();
        drained
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.tiers.lock().closed
    }

    /// Items currently queued across both tiers.
    pub fn len(&self) -> usize {
        let tiers = self.tiers.lock();
        tiers.prioritized.len() + tiers.normal.len()
    }

    /// Whether both tiers are empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
