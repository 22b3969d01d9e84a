use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::sync::{Arc, Mutex};

use mio::{Registry, Token};

use crate::error::Result;
use crate::key::SelectionKey;
use crate::selector::SelectorRef;

/// Shared handle to a channel as the selector sees it.
pub type ChannelRef = Arc<dyn SocketChannel>;

/// Completion callback for a [`WriteOperation`]. Invoked exactly once, with
/// `Ok(())` after the operation's buffers were fully written or with the
/// first failure observed.
pub type WriteListener = Box<dyn FnOnce(Result<()>) + Send>;

/// One non-blocking TCP socket as consumed by the selector.
///
/// The selector calls `register`, `finish_connect`, and `set_write_interest`
/// only from its own thread. `is_open` may be read from any thread; it is
/// cleared only by closing the channel on the selector thread.
///
/// [`crate::net::TcpSocketChannel`] is the production implementation; tests
/// substitute their own.
pub trait SocketChannel: Send + Sync {
    fn is_open(&self) -> bool;

    /// Whether the underlying connect has completed. Until it has, the
    /// selector will not dispatch read or write readiness for this channel.
    fn is_connect_complete(&self) -> bool;

    /// Drives a pending connect forward. `Ok(true)` once the socket is
    /// connected, `Ok(false)` while still in progress.
    fn finish_connect(&self) -> Result<bool>;

    /// Registers the underlying socket with the OS selector under `token`
    /// and binds the selection key. Called once, on the selector thread.
    fn register(&self, registry: &Registry, token: Token) -> Result<()>;

    /// Sets or clears write interest on the bound key, updating the OS
    /// registration to match. Fails with `CancelledKey` when the key is
    /// cancelled or was never bound.
    fn set_write_interest(&self, interested: bool) -> Result<()>;

    /// The registration cookie, once bound.
    fn selection_key(&self) -> Option<&SelectionKey>;

    fn context(&self) -> &ChannelContext;

    /// Non-owning back-reference to the owning selector, for producers that
    /// reach the submission API through the channel. `None` until the
    /// channel is handed to a selector (or in tests).
    fn selector(&self) -> Option<SelectorRef>;

    /// Closes the channel: clears the open flag, cancels the key, and
    /// releases the socket. Selector thread only; idempotent.
    fn close(&self);

    /// Non-blocking read. `Ok(0)` means the peer closed its end.
    fn try_read(&self, buf: &mut [u8]) -> io::Result<usize> {
        let _ = buf;
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "channel does not support reads",
        ))
    }

    /// Non-blocking write of as much of `buf` as the socket accepts.
    fn try_write(&self, buf: &[u8]) -> io::Result<usize> {
        let _ = buf;
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "channel does not support writes",
        ))
    }
}

impl fmt::Debug for dyn SocketChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketChannel")
            .field("open", &self.is_open())
            .field("connect_complete", &self.is_connect_complete())
            .field("token", &self.selection_key().map(|k| k.token()))
            .finish()
    }
}

/// Per-channel container for writes awaiting flush.
///
/// The selector appends through [`queue_write_operation`]; the event
/// handler's write path pops operations, flushes as much as the socket
/// accepts, and puts a partially written operation back at the front. All of
/// that happens on the selector thread; the mutex only makes the container
/// shareable.
///
/// [`queue_write_operation`]: ChannelContext::queue_write_operation
#[derive(Default)]
pub struct ChannelContext {
    pending: Mutex<VecDeque<WriteOperation>>,
}

impl ChannelContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `op` to the flush FIFO. Selector thread only.
    pub fn queue_write_operation(&self, op: WriteOperation) {
        self.lock().push_back(op);
    }

    /// Pops the next operation to flush.
    pub fn take_write(&self) -> Option<WriteOperation> {
        self.lock().pop_front()
    }

    /// Puts a partially flushed operation back at the head of the FIFO so
    /// the next write-ready iteration resumes it first.
    pub fn restore_write(&self, op: WriteOperation) {
        self.lock().push_front(op);
    }

    pub fn has_pending_writes(&self) -> bool {
        !self.lock().is_empty()
    }

    pub fn pending_writes(&self) -> usize {
        self.lock().len()
    }

    /// Takes every queued operation, for teardown.
    pub fn drain(&self) -> VecDeque<WriteOperation> {
        std::mem::take(&mut *self.lock())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<WriteOperation>> {
        match self.pending.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl fmt::Debug for ChannelContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelContext")
            .field("pending_writes", &self.pending_writes())
            .finish()
    }
}

/// A write submitted to the selector: target channel, ordered buffers, and
/// the completion listener. Immutable after submission except for the flush
/// cursor, which the selector-thread flusher advances as bytes reach the
/// socket.
pub struct WriteOperation {
    channel: ChannelRef,
    buffers: VecDeque<Vec<u8>>,
    offset: usize,
    listener: WriteListener,
}

impl WriteOperation {
    pub fn new(channel: ChannelRef, buffers: Vec<Vec<u8>>, listener: WriteListener) -> Self {
        Self {
            channel,
            buffers: buffers.into(),
            offset: 0,
            listener,
        }
    }

    /// Convenience constructor for a single-buffer write.
    pub fn single(channel: ChannelRef, buffer: Vec<u8>, listener: WriteListener) -> Self {
        Self::new(channel, vec![buffer], listener)
    }

    pub fn channel(&self) -> &ChannelRef {
        &self.channel
    }

    /// The unwritten remainder of the current head buffer, if any.
    pub fn current_buffer(&self) -> Option<&[u8]> {
        self.buffers.front().map(|b| &b[self.offset..])
    }

    /// Records `n` bytes written, dropping buffers as they complete.
    pub fn advance(&mut self, mut n: usize) {
        while n > 0 {
            let remaining = match self.buffers.front() {
                Some(buf) => buf.len() - self.offset,
                None => return,
            };
            if n < remaining {
                self.offset += n;
                return;
            }
            n -= remaining;
            self.offset = 0;
            self.buffers.pop_front();
        }
        // Completed buffers that were empty to begin with still need to go.
        while self.buffers.front().is_some_and(|b| b.len() == self.offset) {
            self.offset = 0;
            self.buffers.pop_front();
        }
    }

    pub fn is_fully_flushed(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn remaining_bytes(&self) -> usize {
        self.buffers.iter().map(Vec::len).sum::<usize>() - self.offset
    }

    /// Consumes the operation, surrendering the listener for dispatch.
    pub fn into_listener(self) -> WriteListener {
        self.listener
    }
}

impl fmt::Debug for WriteOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteOperation")
            .field("buffers", &self.buffers.len())
            .field("remaining_bytes", &self.remaining_bytes())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SelectorError;

    /// Minimal channel stub for exercising context and write-op plumbing.
    struct StubChannel {
        context: ChannelContext,
    }

    impl SocketChannel for StubChannel {
        fn is_open(&self) -> bool {
            true
        }
        fn is_connect_complete(&self) -> bool {
            true
        }
        fn finish_connect(&self) -> Result<bool> {
            Ok(true)
        }
        fn register(&self, _registry: &Registry, _token: Token) -> Result<()> {
            Ok(())
        }
        fn set_write_interest(&self, _interested: bool) -> Result<()> {
            Err(SelectorError::CancelledKey)
        }
        fn selection_key(&self) -> Option<&SelectionKey> {
            None
        }
        fn context(&self) -> &ChannelContext {
            &self.context
        }
        fn selector(&self) -> Option<SelectorRef> {
            None
        }
        fn close(&self) {}
    }

    fn stub() -> ChannelRef {
        Arc::new(StubChannel {
            context: ChannelContext::new(),
        })
    }

    fn noop_listener() -> WriteListener {
        Box::new(|_| {})
    }

    #[test]
    fn advance_walks_buffers_in_order() {
        let mut op = WriteOperation::new(
            stub(),
            vec![vec![0; 4], vec![0; 2], vec![0; 3]],
            noop_listener(),
        );
        assert_eq!(op.remaining_bytes(), 9);
        assert_eq!(op.current_buffer().unwrap().len(), 4);

        op.advance(5);
        assert_eq!(op.remaining_bytes(), 4);
        assert_eq!(op.current_buffer().unwrap().len(), 1);

        op.advance(4);
        assert!(op.is_fully_flushed());
        assert_eq!(op.current_buffer(), None);
    }

    #[test]
    fn advance_skips_empty_buffers() {
        let mut op = WriteOperation::new(
            stub(),
            vec![vec![0; 2], vec![], vec![0; 1]],
            noop_listener(),
        );
        op.advance(2);
        // The empty middle buffer must not leave the op looking unfinished
        // after the final byte goes out.
        assert_eq!(op.current_buffer().unwrap().len(), 1);
        op.advance(1);
        assert!(op.is_fully_flushed());
    }

    #[test]
    fn context_is_fifo_with_front_restore() {
        let ctx = ChannelContext::new();
        assert!(!ctx.has_pending_writes());

        ctx.queue_write_operation(WriteOperation::single(stub(), vec![1], noop_listener()));
        ctx.queue_write_operation(WriteOperation::single(stub(), vec![2, 2], noop_listener()));
        assert_eq!(ctx.pending_writes(), 2);

        let first = ctx.take_write().unwrap();
        assert_eq!(first.remaining_bytes(), 1);
        ctx.restore_write(first);

        let again = ctx.take_write().unwrap();
        assert_eq!(again.remaining_bytes(), 1);
        assert_eq!(ctx.take_write().unwrap().remaining_bytes(), 2);
        assert!(ctx.take_write().is_none());
    }

    #[test]
    fn listener_travels_with_the_operation() {
        let delivered = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&delivered);
        let op = WriteOperation::single(
            stub(),
            vec![0xEE],
            Box::new(move |result| {
                *slot.lock().unwrap() = Some(result.is_ok());
            }),
        );

        (op.into_listener())(Ok(()));
        assert_eq!(*delivered.lock().unwrap(), Some(true));
    }
}
