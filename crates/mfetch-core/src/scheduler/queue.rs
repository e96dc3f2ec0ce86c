//! Bounded FIFO of queued job ids.
//!
//! A single mutex guards the deque; idle workers park on a `Notify`. Queued
//! jobs can be removed by id so cancellation never waits for a worker.

use parking_lot::Mutex;
use std::collections::VecDeque;
use tokio::sync::Notify;

use crate::job::JobId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PushError {
    Full,
    Closed,
}

#[derive(Debug, Default)]
struct QueueState {
    items: VecDeque<JobId>,
    closed: bool,
}

#[derive(Debug)]
pub(crate) struct JobQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    capacity: usize,
}

impl JobQueue {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            capacity: capacity.max(1),
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    /// Never blocks: a full queue is reported to the caller as backpressure.
    pub(crate) fn try_push(&self, id: JobId) -> Result<(), PushError> {
        {
            let mut state = self.state.lock();
            if state.closed {
                return Err(PushError::Closed);
            }
            if state.items.len() >= self.capacity {
                return Err(PushError::Full);
            }
            state.items.push_back(id);
        }
        self.notify.notify_one();
        Ok(())
    }

    /// Waits for the oldest queued id. `None` once the queue is closed.
    pub(crate) async fn pop(&self) -> Option<JobId> {
        loop {
            let notified = self.notify.notified();
            {
                let mut state = self.state.lock();
                if state.closed {
                    return None;
                }
                if let Some(id) = state.items.pop_front() {
                    // Pass the wakeup on if more work is waiting.
                    if !state.items.is_empty() {
                        self.notify.notify_one();
                    }
                    return Some(id);
                }
            }
            notified.await;
        }
    }

    pub(crate) fn remove(&self, id: &JobId) -> bool {
        let mut state = self.state.lock();
        match state.items.iter().position(|queued| queued == id) {
            Some(pos) => {
                state.items.remove(pos);
                true
            }
            None => false,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    /// Refuses further pushes, wakes every waiting worker, and returns what
    /// was still queued.
    pub(crate) fn close(&self) -> Vec<JobId> {
        let drained: Vec<JobId> = {
            let mut state = self.state.lock();
            state.closed = true;
            state.items.drain(..).collect()
        };
        self.notify.notify_waiters();
        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn id(s: &str) -> JobId {
        JobId::parse(s).unwrap()
    }

    #[tokio::test]
    async fn fifo_order_and_capacity() {
        let q = JobQueue::new(2);
        q.try_push(id("a")).unwrap();
        q.try_push(id("b")).unwrap();
        assert_eq!(q.try_push(id("c")), Err(PushError::Full));
        assert_eq!(q.pop().await, Some(id("a")));
        assert_eq!(q.pop().await, Some(id("b")));
        assert_eq!(q.len(), 0);
    }

    #[tokio::test]
    async fn remove_by_id() {
        let q = JobQueue::new(4);
        q.try_push(id("a")).unwrap();
        q.try_push(id("b")).unwrap();
        assert!(q.remove(&id("a")));
        assert!(!q.remove(&id("a")));
        assert_eq!(q.pop().await, Some(id("b")));
    }

    #[tokio::test]
    async fn waiting_pop_wakes_on_push() {
        let q = Arc::new(JobQueue::new(1));
        let q2 = Arc::clone(&q);
        let waiter = tokio::spawn(async move { q2.pop().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        q.try_push(id("late")).unwrap();
        assert_eq!(waiter.await.unwrap(), Some(id("late")));
    }

    #[tokio::test]
    async fn close_releases_waiters_and_returns_backlog() {
        let q = Arc::new(JobQueue::new(4));
        q.try_push(id("left")).unwrap();
        assert_eq!(q.close(), vec![id("left")]);
        assert_eq!(q.try_push(id("x")), Err(PushError::Closed));
        assert_eq!(q.pop().await, None);

        let q = Arc::new(JobQueue::new(4));
        let q2 = Arc::clone(&q);
        let waiter = tokio::spawn(async move { q2.pop().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        q.close();
        assert_eq!(waiter.await.unwrap(), None);
    }
}
