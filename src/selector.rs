use std::collections::HashMap;
use std::io;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use mio::{Events, Poll, Token, Waker};

use crate::channel::{ChannelRef, WriteListener, WriteOperation};
use crate::config::SelectorConfig;
use crate::error::{Result, SelectorError};
use crate::handler::EventHandler;
use crate::logger::{LogLevel, Logger};
use crate::ops::Ops;
use crate::queue::SubmissionQueue;

/// Token reserved for the selector's wakeup primitive. Channel tokens start
/// above it.
pub const WAKE_TOKEN: Token = Token(0);

const STATE_OPEN: u8 = 0;
const STATE_CLOSING: u8 = 1;
const STATE_CLOSED: u8 = 2;

/// Lifecycle of a selector: `Open` accepts submissions, `Closing` is the
/// window between `close()` and the cleanup pass, `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Open,
    Closing,
    Closed,
}

/// Cross-thread face of a [`SocketSelector`].
///
/// Producers (acceptor threads, request threads) hold this to submit
/// channels and writes; channels hold a weak reference to it so outer layers
/// can reach their selector. The loop-thread-only methods assert thread
/// ownership; calling them from another thread is a programmer error and
/// panics.
pub trait SelectorHandle: Send + Sync {
    /// Enqueues a channel for registration on the next pre-select pass and
    /// wakes the selector. Fails fast once the selector has left `Open`.
    fn schedule_for_registration(&self, channel: ChannelRef) -> Result<()>;

    /// Enqueues a write for placement into its channel's context and wakes
    /// the selector. Once the selector has left `Open`, the operation's
    /// listener is failed synchronously with `ClosedSelector`.
    fn queue_write(&self, op: WriteOperation);

    /// Loop-thread fast path: performs the pre-select drain action for one
    /// write without a queue round-trip. Sets write interest, then hands the
    /// operation to the channel context; an interest failure goes to the
    /// listener instead.
    fn queue_write_in_channel_buffer(&self, op: WriteOperation);

    /// Invokes a completion listener with success. Loop thread only.
    fn execute_listener(&self, listener: WriteListener);

    /// Invokes a completion listener with `error`. Loop thread only.
    fn execute_failed_listener(&self, listener: WriteListener, error: SelectorError);

    fn state(&self) -> RunState;

    fn is_open(&self) -> bool {
        self.state() == RunState::Open
    }

    fn is_on_selector_thread(&self) -> bool;

    /// Requests shutdown: transitions `Open → Closing` and wakes the loop so
    /// it runs its cleanup pass. Idempotent.
    fn close(&self);

    /// Forces a blocked `poll` to return early.
    fn wakeup(&self);
}

/// Shared, cloneable handle to a selector.
pub type SelectorRef = Arc<dyn SelectorHandle>;

/// Single-threaded socket selector loop.
///
/// Owns a `mio::Poll` and a population of registered channels. One dedicated
/// thread calls [`run`](SocketSelector::run); every other thread talks to the
/// selector through its [`SelectorHandle`]. Each loop iteration drains the
/// submission queues (`pre_select`), blocks on the OS selector up to the
/// configured timeout, and dispatches ready channels through the
/// [`EventHandler`] (`process_key`).
///
/// The loop is the integrity boundary: handler errors, listener panics, and
/// dead keys are all routed to their sinks without unwinding it.
pub struct SocketSelector<H: EventHandler> {
    shared: Arc<Shared<H>>,
    poll: Poll,
    events: Events,
    channels: HashMap<Token, ChannelRef>,
    next_token: usize,
    timeout: Duration,
}

struct Shared<H> {
    handler: H,
    queued_channels: SubmissionQueue<ChannelRef>,
    queued_writes: SubmissionQueue<WriteOperation>,
    state: AtomicU8,
    thread: OnceLock<ThreadId>,
    waker: Waker,
    logger: Arc<dyn Logger>,
}

impl<H: EventHandler + 'static> SocketSelector<H> {
    pub fn new(handler: H) -> io::Result<Self> {
        Self::with_config(handler, SelectorConfig::default())
    }

    pub fn with_config(handler: H, config: SelectorConfig) -> io::Result<Self> {
        let poll = Poll::new()?;
        let waker = Waker::new(poll.registry(), WAKE_TOKEN)?;
        let shared = Arc::new(Shared {
            handler,
            queued_channels: SubmissionQueue::new(),
            queued_writes: SubmissionQueue::new(),
            state: AtomicU8::new(STATE_OPEN),
            thread: OnceLock::new(),
            waker,
            logger: config.logger,
        });
        Ok(Self {
            shared,
            poll,
            events: Events::with_capacity(config.events_capacity),
            channels: HashMap::new(),
            next_token: WAKE_TOKEN.0 + 1,
            timeout: config.poll_timeout,
        })
    }

    /// Cross-thread handle for producers and channel back-references.
    pub fn handle(&self) -> SelectorRef {
        self.shared.clone()
    }

    /// Records the calling thread as the selector thread. Invoked by
    /// [`run`](SocketSelector::run); tests driving the loop phases manually
    /// call it themselves.
    ///
    /// # Panics
    ///
    /// Panics if a different thread already claimed the selector.
    pub fn set_thread(&self) {
        self.shared.set_thread();
    }

    pub fn is_on_selector_thread(&self) -> bool {
        self.shared.is_on_selector_thread()
    }

    pub fn state(&self) -> RunState {
        self.shared.state()
    }

    pub fn is_open(&self) -> bool {
        self.shared.is_open()
    }

    /// See [`SelectorHandle::schedule_for_registration`].
    pub fn schedule_for_registration(&self, channel: ChannelRef) -> Result<()> {
        self.shared.schedule_for_registration(channel)
    }

    /// See [`SelectorHandle::queue_write`].
    pub fn queue_write(&self, op: WriteOperation) {
        self.shared.queue_write(op);
    }

    /// See [`SelectorHandle::queue_write_in_channel_buffer`].
    pub fn queue_write_in_channel_buffer(&self, op: WriteOperation) {
        self.shared.queue_write_in_channel_buffer(op);
    }

    pub fn execute_listener(&self, listener: WriteListener) {
        self.shared.execute_listener(listener);
    }

    pub fn execute_failed_listener(&self, listener: WriteListener, error: SelectorError) {
        self.shared.execute_failed_listener(listener, error);
    }

    pub fn close(&self) {
        self.shared.close();
    }

    /// Runs the selector loop on the calling thread until [`close`] is
    /// observed, then tears everything down: every pending and registered
    /// channel reaches `handle_close` and every queued listener is failed
    /// before this returns.
    ///
    /// [`close`]: SelectorHandle::close
    pub fn run(&mut self) {
        self.set_thread();
        while self.shared.is_open() {
            self.pre_select();
            if let Err(err) = self.select() {
                self.shared.logger.log(
                    LogLevel::Error,
                    &format!("selector poll failed, shutting down: {}", err),
                );
                self.shared.close();
            }
        }
        self.cleanup_and_close_channels();
    }

    /// Starts the selector on a dedicated named thread and returns the join
    /// handle together with the cross-thread submission handle.
    pub fn spawn(self, name: &str) -> io::Result<(JoinHandle<()>, SelectorRef)> {
        let handle = self.handle();
        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let mut selector = self;
                selector.run()
            })?;
        Ok((join, handle))
    }

    /// Drains both submission queues: registrations first, then writes, so a
    /// write submitted after its channel's registration in the same window
    /// always finds the channel registered.
    pub fn pre_select(&mut self) {
        self.shared.assert_on_selector_thread("pre_select");
        for channel in self.shared.queued_channels.drain() {
            self.register_channel(channel);
        }
        for op in self.shared.queued_writes.drain() {
            if op.channel().is_open() {
                self.shared.queue_write_in_channel_buffer(op);
            } else {
                self.shared
                    .fail_listener(op.into_listener(), SelectorError::ClosedChannel);
            }
        }
    }

    fn register_channel(&mut self, channel: ChannelRef) {
        if !channel.is_open() {
            self.shared
                .registration_exception(&channel, SelectorError::ClosedChannel);
            return;
        }
        let token = self.allocate_token();
        match channel.register(self.poll.registry(), token) {
            Ok(()) => {
                self.channels.insert(token, channel.clone());
                self.shared.handle_registration(&channel);
                self.shared.attempt_connect(&channel);
            }
            Err(err) => self.shared.registration_exception(&channel, err),
        }
    }

    fn allocate_token(&mut self) -> Token {
        let token = Token(self.next_token);
        self.next_token += 1;
        token
    }

    /// Blocks on the OS selector up to the configured timeout, then
    /// dispatches every ready channel. Pending wakeups make `poll` return
    /// promptly, so a submission never waits out a full timeout.
    fn select(&mut self) -> io::Result<()> {
        match self.poll.poll(&mut self.events, Some(self.timeout)) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::Interrupted => return Ok(()),
            Err(err) => return Err(err),
        }

        let mut retired: Vec<Token> = Vec::new();
        for event in self.events.iter() {
            let token = event.token();
            if token == WAKE_TOKEN {
                continue;
            }
            // Tokens no longer in the registry are stale readiness for a
            // channel retired earlier in this pass.
            let Some(channel) = self.channels.get(&token).cloned() else {
                continue;
            };

            let mut ready = Ops::NONE;
            if event.is_readable() || event.is_read_closed() {
                ready |= Ops::READ;
            }
            // mio reports connect completion (and connect failure) as
            // writability on the pending socket.
            if event.is_writable() || event.is_error() {
                if channel.is_connect_complete() {
                    ready |= Ops::WRITE;
                } else {
                    ready |= Ops::CONNECT;
                }
            }

            self.process_key(&channel, ready);
            if !channel.is_open() {
                retired.push(token);
            }
        }
        for token in retired {
            self.retire_channel(token);
        }
        Ok(())
    }

    /// Dispatches one ready channel through the state machine:
    ///
    /// 1. CONNECT ready: drive `finish_connect`; an error suppresses nothing
    ///    below because the channel stays connect-incomplete.
    /// 2. Channels that are not connect-complete get neither reads nor
    ///    writes this iteration.
    /// 3. WRITE before READ; a write error is reported independently and
    ///    does not suppress the read.
    /// 4. `post_handling` always runs last.
    pub fn process_key(&self, channel: &ChannelRef, ready: Ops) {
        self.shared.assert_on_selector_thread("process_key");
        if ready.is_connectable() {
            self.shared.attempt_connect(channel);
        }
        if channel.is_connect_complete() {
            if ready.is_writable() {
                self.shared.handle_write(channel);
            }
            if ready.is_readable() {
                self.shared.handle_read(channel);
            }
        }
        self.shared.post_handling(channel);
    }

    fn retire_channel(&mut self, token: Token) {
        if let Some(channel) = self.channels.remove(&token) {
            if let Some(key) = channel.selection_key() {
                key.cancel();
            }
            self.shared.channel_closed(&channel);
        }
    }

    /// Shutdown pass, run by the loop after it observes `Closing`:
    ///
    /// 1. pending writes: fail each listener with `ClosedSelector`;
    /// 2. pending registrations: `handle_close` (these never registered);
    /// 3. registered channels: cancel keys, `handle_close`;
    /// 4. state becomes `Closed`; later submissions fail fast.
    pub fn cleanup_and_close_channels(&mut self) {
        self.shared
            .assert_on_selector_thread("cleanup_and_close_channels");
        for op in self.shared.queued_writes.close() {
            self.shared
                .fail_listener(op.into_listener(), SelectorError::ClosedSelector);
        }
        for channel in self.shared.queued_channels.close() {
            self.shared.channel_closed(&channel);
        }
        for (_, channel) in self.channels.drain() {
            if let Some(key) = channel.selection_key() {
                key.cancel();
            }
            self.shared.channel_closed(&channel);
        }
        self.shared.state.store(STATE_CLOSED, Ordering::Release);
    }

    /// Number of currently registered channels.
    pub fn registered_channels(&self) -> usize {
        self.channels.len()
    }
}

impl<H: EventHandler> Shared<H> {
    fn state(&self) -> RunState {
        match self.state.load(Ordering::Acquire) {
            STATE_OPEN => RunState::Open,
            STATE_CLOSING => RunState::Closing,
            _ => RunState::Closed,
        }
    }

    fn set_thread(&self) {
        let current = thread::current().id();
        if self.thread.set(current).is_err() {
            assert_eq!(
                self.thread.get(),
                Some(&current),
                "selector thread is already bound to a different thread"
            );
        }
    }

    fn assert_on_selector_thread(&self, what: &str) {
        assert!(
            self.is_on_selector_thread(),
            "{} may only be called on the selector thread",
            what
        );
    }

    /// Runs a handler callback, keeping any panic out of the loop.
    fn guard(&self, what: &str, f: impl FnOnce()) {
        if catch_unwind(AssertUnwindSafe(f)).is_err() {
            self.logger.log(
                LogLevel::Error,
                &format!("event handler panicked in {}; selector loop continues", what),
            );
        }
    }

    /// Runs a fallible handler callback; `None` means it panicked (already
    /// logged).
    fn guarded<T>(&self, what: &str, f: impl FnOnce() -> T) -> Option<T> {
        match catch_unwind(AssertUnwindSafe(f)) {
            Ok(value) => Some(value),
            Err(_) => {
                self.logger.log(
                    LogLevel::Error,
                    &format!("event handler panicked in {}; selector loop continues", what),
                );
                None
            }
        }
    }

    fn handle_registration(&self, channel: &ChannelRef) {
        if let Some(Err(err)) =
            self.guarded("handle_registration", || self.handler.handle_registration(channel))
        {
            self.registration_exception(channel, err);
        }
    }

    fn registration_exception(&self, channel: &ChannelRef, error: SelectorError) {
        self.guard("registration_exception", || {
            self.handler.registration_exception(channel, error)
        });
    }

    /// Drives a pending connect forward, reporting completion or failure.
    /// An incomplete connect is not an event; the next readiness pass
    /// retries.
    fn attempt_connect(&self, channel: &ChannelRef) {
        match channel.finish_connect() {
            Ok(true) => {
                if let Some(Err(err)) =
                    self.guarded("handle_connect", || self.handler.handle_connect(channel))
                {
                    self.connect_exception(channel, err);
                }
            }
            Ok(false) => {}
            Err(err) => self.connect_exception(channel, err),
        }
    }

    fn connect_exception(&self, channel: &ChannelRef, error: SelectorError) {
        self.guard("connect_exception", || {
            self.handler.connect_exception(channel, error)
        });
    }

    fn handle_read(&self, channel: &ChannelRef) {
        if let Some(Err(err)) = self.guarded("handle_read", || self.handler.handle_read(channel)) {
            self.guard("read_exception", || self.handler.read_exception(channel, err));
        }
    }

    fn handle_write(&self, channel: &ChannelRef) {
        if let Some(Err(err)) = self.guarded("handle_write", || self.handler.handle_write(channel))
        {
            self.guard("write_exception", || {
                self.handler.write_exception(channel, err)
            });
        }
    }

    fn post_handling(&self, channel: &ChannelRef) {
        self.guard("post_handling", || self.handler.post_handling(channel));
    }

    /// Selector-side channel teardown: every write still parked in the
    /// context fails its listener, then the handler gets its terminal
    /// callback.
    fn channel_closed(&self, channel: &ChannelRef) {
        for op in channel.context().drain() {
            self.fail_listener(op.into_listener(), SelectorError::ClosedChannel);
        }
        self.guard("handle_close", || self.handler.handle_close(channel));
    }

    /// Invokes a listener exactly once, catching a panic and routing it to
    /// `listener_exception`. Off the selector thread (a rejected submission
    /// failing fast on its producer) the panic only reaches the logger, so
    /// handler callbacks stay on the loop thread.
    fn deliver_listener(&self, listener: WriteListener, result: Result<()>) {
        if let Err(panic) = catch_unwind(AssertUnwindSafe(move || listener(result))) {
            if self.is_on_selector_thread() {
                self.guard("listener_exception", || {
                    self.handler.listener_exception(panic)
                });
            } else {
                self.logger.log(
                    LogLevel::Error,
                    "completion listener panicked off the selector thread",
                );
            }
        }
    }

    fn fail_listener(&self, listener: WriteListener, error: SelectorError) {
        self.deliver_listener(listener, Err(error));
    }
}

impl<H: EventHandler> SelectorHandle for Shared<H> {
    fn schedule_for_registration(&self, channel: ChannelRef) -> Result<()> {
        if !self.is_open() {
            return Err(SelectorError::ClosedSelector);
        }
        match self.queued_channels.push(channel) {
            Ok(()) => {
                if !self.is_on_selector_thread() {
                    self.wakeup();
                }
                Ok(())
            }
            // Rejected at the latch: the selector never observed this
            // channel, so the caller keeps it and no handle_close is owed.
            Err(_) => Err(SelectorError::ClosedSelector),
        }
    }

    fn queue_write(&self, op: WriteOperation) {
        if !self.is_open() {
            self.fail_listener(op.into_listener(), SelectorError::ClosedSelector);
            return;
        }
        // A close racing past the check above lands in one of two places:
        // the queue latch rejects the push (failed here), or the cleanup
        // pass drains the queue (failed there). Exactly one of them runs.
        match self.queued_writes.push(op) {
            Ok(()) => {
                if !self.is_on_selector_thread() {
                    self.wakeup();
                }
            }
            Err(op) => self.fail_listener(op.into_listener(), SelectorError::ClosedSelector),
        }
    }

    fn queue_write_in_channel_buffer(&self, op: WriteOperation) {
        self.assert_on_selector_thread("queue_write_in_channel_buffer");
        let channel = op.channel().clone();
        match channel.set_write_interest(true) {
            Ok(()) => channel.context().queue_write_operation(op),
            Err(err) => self.fail_listener(op.into_listener(), err),
        }
    }

    fn execute_listener(&self, listener: WriteListener) {
        self.assert_on_selector_thread("execute_listener");
        self.deliver_listener(listener, Ok(()));
    }

    fn execute_failed_listener(&self, listener: WriteListener, error: SelectorError) {
        self.assert_on_selector_thread("execute_failed_listener");
        self.fail_listener(listener, error);
    }

    fn state(&self) -> RunState {
        Shared::state(self)
    }

    fn is_on_selector_thread(&self) -> bool {
        self.thread.get() == Some(&thread::current().id())
    }

    fn close(&self) {
        if self
            .state
            .compare_exchange(
                STATE_OPEN,
                STATE_CLOSING,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
        {
            self.wakeup();
        }
    }

    fn wakeup(&self) {
        if let Err(err) = self.waker.wake() {
            self.logger
                .log(LogLevel::Warn, &format!("selector wakeup failed: {}", err));
        }
    }
}
