//! Write queue: staging of persistent buffers into write batches.
//!
//! Buffers enqueued by user code (from any thread) land on the `pending`
//! list. The session's writer marks `pending` into `marked` — the batch
//! currently under a scatter-gather write — at most one batch at a time.
//! [`mark`](WriteQueue::mark) returns a signed generation so the caller
//! can tell whether it owns a fresh batch (`> 0`), a write is already in
//! flight (`0`), or there is nothing to write (`< 0`).
//!
//! Batch allocations are recycled: marking swaps the (empty) previous
//! batch vector back in as the new pending list, so steady-state writing
//! allocates nothing.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

use crate::persist::PersistentBuffer;

/// Staging queue between `write()` callers and the session's writer.
#[derive(Debug, Default)]
pub struct WriteQueue {
    pending: Mutex<Vec<PersistentBuffer>>,
    marked: Mutex<Vec<PersistentBuffer>>,
    generation: AtomicI64,
}

impl WriteQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one buffer to the pending list. Thread-safe.
    pub fn enqueue(&self, buf: PersistentBuffer) {
        self.pending.lock().unwrap().push(buf);
    }

    /// Append several buffers to the pending list under a single lock
    /// hold, so the group cannot be interleaved with other writers.
    pub fn enqueue_list<I>(&self, bufs: I)
    where
        I: IntoIterator<Item = PersistentBuffer>,
    {
        let mut pending = self.pending.lock().unwrap();
        pending.extend(bufs);
    }

    /// Swap the pending list into the marked batch.
    ///
    /// Returns `+generation` when this call produced a fresh batch (the
    /// caller now owns starting the write), `0` when a batch is already
    /// marked, and `-generation` when there was nothing to mark.
    ///
    /// Called only from the session's writer; `enqueue` may race freely.
    pub fn mark(&self) -> i64 {
        let mut marked = self.marked.lock().unwrap();
        if !marked.is_empty() {
            return 0;
        }
        let mut pending = self.pending.lock().unwrap();
        if pending.is_empty() {
            return -self.generation.load(Ordering::Relaxed);
        }
        // The old (cleared) batch vector becomes the new pending list,
        // recycling its allocation.
        std::mem::swap(&mut *pending, &mut *marked);
        let next = match self.generation.load(Ordering::Relaxed) {
            i64::MAX => 1, // wraps past zero: generation is never 0 again
            g => g + 1,
        };
        self.generation.store(next, Ordering::Relaxed);
        next
    }

    /// The current generation counter.
    pub fn generation(&self) -> i64 {
        self.generation.load(Ordering::Relaxed)
    }

    /// Snapshot the marked batch. The clones share storage with the
    /// queued buffers, so the bytes stay alive for the duration of the
    /// write even if the batch is cleared concurrently.
    pub fn marked_snapshot(&self) -> Vec<PersistentBuffer> {
        self.marked.lock().unwrap().clone()
    }

    /// Release the marked batch after it has been fully written. The
    /// batch allocation is kept for reuse by the next `mark`.
    pub fn clear_marked(&self) {
        self.marked.lock().unwrap().clear();
    }

    /// Discard everything: pending and marked. Used on immediate close.
    pub fn discard(&self) {
        self.marked.lock().unwrap().clear();
        self.pending.lock().unwrap().clear();
    }

    /// Check whether both lists are empty (the graceful-close drain
    /// condition).
    pub fn is_idle(&self) -> bool {
        self.marked.lock().unwrap().is_empty() && self.pending.lock().unwrap().is_empty()
    }

    /// Number of buffers waiting to be marked.
    pub fn pending_len(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    #[cfg(test)]
    fn set_generation(&self, g: i64) {
        self.generation.store(g, Ordering::Relaxed);
    }
}
