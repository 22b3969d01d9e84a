use std::any::Any;

use crate::channel::ChannelRef;
use crate::error::{Result, SelectorError};

/// Payload recovered from a panicking completion listener.
pub type ListenerPanic = Box<dyn Any + Send>;

/// Callback surface the selector drives for every channel event.
///
/// All methods are invoked on the selector thread. The fallible methods may
/// return an error; the selector converts it into the matching `*_exception`
/// callback instead of letting it disturb the loop. The `*_exception`
/// callbacks, `post_handling`, and `handle_close` are terminal sinks: they
/// have no further error routing, and a panic inside one is caught, logged
/// through the configured [`Logger`](crate::logger::Logger), and dropped.
pub trait EventHandler: Send + Sync {
    /// A fresh registration completed; the channel's interest is at its
    /// initial mask.
    fn handle_registration(&self, channel: &ChannelRef) -> Result<()>;

    /// Registration failed; the channel never became live.
    fn registration_exception(&self, channel: &ChannelRef, error: SelectorError);

    /// The channel finished connecting.
    fn handle_connect(&self, channel: &ChannelRef) -> Result<()>;

    fn connect_exception(&self, channel: &ChannelRef, error: SelectorError);

    /// The channel is read-ready.
    fn handle_read(&self, channel: &ChannelRef) -> Result<()>;

    fn read_exception(&self, channel: &ChannelRef, error: SelectorError);

    /// The channel is write-ready; flush its context's queued operations.
    fn handle_write(&self, channel: &ChannelRef) -> Result<()>;

    fn write_exception(&self, channel: &ChannelRef, error: SelectorError);

    /// Runs after every per-key dispatch, whether or not the read/write/
    /// connect paths succeeded. Typical duties: reconcile write interest
    /// with the context's backlog, close channels that went dead.
    fn post_handling(&self, channel: &ChannelRef) {
        let _ = channel;
    }

    /// Terminal callback: the channel will never be dispatched again.
    fn handle_close(&self, channel: &ChannelRef);

    /// A completion listener panicked while being dispatched.
    fn listener_exception(&self, panic: ListenerPanic) {
        let _ = panic;
    }
}

/// Handlers are routinely shared between the selector and the producers that
/// feed it; an `Arc` of a handler is a handler.
impl<H: EventHandler + ?Sized> EventHandler for std::sync::Arc<H> {
    fn handle_registration(&self, channel: &ChannelRef) -> Result<()> {
        (**self).handle_registration(channel)
    }
    fn registration_exception(&self, channel: &ChannelRef, error: SelectorError) {
        (**self).registration_exception(channel, error)
    }
    fn handle_connect(&self, channel: &ChannelRef) -> Result<()> {
        (**self).handle_connect(channel)
    }
    fn connect_exception(&self, channel: &ChannelRef, error: SelectorError) {
        (**self).connect_exception(channel, error)
    }
    fn handle_read(&self, channel: &ChannelRef) -> Result<()> {
        (**self).handle_read(channel)
    }
    fn read_exception(&self, channel: &ChannelRef, error: SelectorError) {
        (**self).read_exception(channel, error)
    }
    fn handle_write(&self, channel: &ChannelRef) -> Result<()> {
        (**self).handle_write(channel)
    }
    fn write_exception(&self, channel: &ChannelRef, error: SelectorError) {
        (**self).write_exception(channel, error)
    }
    fn post_handling(&self, channel: &ChannelRef) {
        (**self).post_handling(channel)
    }
    fn handle_close(&self, channel: &ChannelRef) {
        (**self).handle_close(channel)
    }
    fn listener_exception(&self, panic: ListenerPanic) {
        (**self).listener_exception(panic)
    }
}
