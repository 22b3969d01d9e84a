use std::collections::VecDeque;
use std::mem;
use std::sync::Mutex;

/// Multi-producer, single-consumer submission queue with a closed latch.
///
/// Producers on any thread `push`; only the selector thread drains. The
/// closed check and the push happen under one lock acquisition, and
/// [`close`](SubmissionQueue::close) flips the latch under the same lock
/// before taking the backlog. That ordering is what makes the shutdown
/// guarantee airtight: an item accepted by `push` is always seen by a later
/// `drain` or by the `close` backlog, and a rejected item is handed straight
/// back to its producer, so every submission has exactly one owner at all
/// times.
#[derive(Debug)]
pub struct SubmissionQueue<T> {
    entries: Mutex<QueueState<T>>,
}

#[derive(Debug)]
struct QueueState<T> {
    items: VecDeque<T>,
    closed: bool,
}

impl<T> SubmissionQueue<T> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(QueueState {
                items: VecDeque::new(),
                closed: false,
            }),
        }
    }

    /// Appends `item`, or returns it to the caller if the queue is closed.
    pub fn push(&self, item: T) -> Result<(), T> {
        let mut state = self.lock();
        if state.closed {
            return Err(item);
        }
        state.items.push_back(item);
        Ok(())
    }

    /// Takes the current backlog. Selector thread only.
    pub fn drain(&self) -> VecDeque<T> {
        mem::take(&mut self.lock().items)
    }

    /// Latches the queue closed and takes whatever was still pending.
    /// Idempotent; later calls return an empty backlog.
    pub fn close(&self) -> VecDeque<T> {
        let mut state = self.lock();
        state.closed = true;
        mem::take(&mut state.items)
    }

    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueState<T>> {
        // A poisoned queue mutex means a panic while holding the guard; none
        // of the guarded sections run user code, so the state is coherent.
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl<T> Default for SubmissionQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
