//! # Spindle-IO
//! A single-threaded socket selector loop for Rust, built on top of [`mio`],
//! for servers that want direct control over non-blocking I/O without a
//! heavyweight async runtime.
//! Each [`SocketSelector`] owns one OS readiness primitive (epoll, kqueue,
//! IOCP) and one dedicated thread. Any other thread may hand it channels and
//! write operations through lock-protected submission queues; everything
//! else — registration, readiness dispatch, write queueing, teardown — runs
//! strictly on the selector thread.
//! ## Core Philosophy
//! Spindle-IO was designed for applications that require:
//! - **Predictable performance** with a single dispatch thread and no hidden
//!   executors
//! - **Runtime-agnostic architecture** that doesn't force async/await patterns
//! - **Hard delivery guarantees**: every submitted write's completion
//!   listener fires exactly once, and every channel the selector ever
//!   observed reaches `handle_close`, including on shutdown
//! - **Loop integrity**: a failing or panicking callback is routed to an
//!   error sink, never allowed to unwind the loop
//! ## Architecture Overview
//! ```text
//! producer threads                       selector thread
//! ┌──────────────┐  schedule/queue   ┌──────────────────────┐
//! │ Acceptor /   │─────────────────▶│ SubmissionQueues      │
//! │ Request      │     + wakeup      │   ↓ pre_select        │
//! │ threads      │                   │ mio::Poll (select)    │
//! └──────────────┘                   │   ↓ process_key       │
//!                                    │ EventHandler callbacks│
//!                                    └──────────────────────┘
//! ```
//! ## Quick Start
//!
//! ```rust,no_run
//! use spindle_io::net::TcpSocketChannel;
//! use spindle_io::prelude::*;
//! use std::net::TcpListener;
//!
//! struct LoggingHandler;
//!
//! impl EventHandler for LoggingHandler {
//!     fn handle_registration(&self, channel: &ChannelRef) -> spindle_io::error::Result<()> {
//!         println!("registered: {:?}", channel);
//!         Ok(())
//!     }
//!     fn registration_exception(&self, _: &ChannelRef, e: SelectorError) {
//!         eprintln!("registration failed: {}", e);
//!     }
//!     fn handle_connect(&self, _: &ChannelRef) -> spindle_io::error::Result<()> { Ok(()) }
//!     fn connect_exception(&self, _: &ChannelRef, _: SelectorError) {}
//!     fn handle_read(&self, _: &ChannelRef) -> spindle_io::error::Result<()> { Ok(()) }
//!     fn read_exception(&self, _: &ChannelRef, _: SelectorError) {}
//!     fn handle_write(&self, _: &ChannelRef) -> spindle_io::error::Result<()> { Ok(()) }
//!     fn write_exception(&self, _: &ChannelRef, _: SelectorError) {}
//!     fn handle_close(&self, channel: &ChannelRef) { channel.close(); }
//! }
//!
//! fn main() -> std::io::Result<()> {
//!     let selector = SocketSelector::new(LoggingHandler)?;
//!     let (join, handle) = selector.spawn("selector-io")?;
//!
//!     // Acceptor thread: hand every inbound socket to the selector.
//!     let listener = TcpListener::bind("127.0.0.1:8080")?;
//!     for stream in listener.incoming().take(1) {
//!         let channel = TcpSocketChannel::accepted(stream?, Some(&handle))?;
//!         handle
//!             .schedule_for_registration(channel)
//!             .expect("selector closed");
//!     }
//!
//!     handle.close();
//!     join.join().unwrap();
//!     Ok(())
//! }
//! ```
//!
//! - [`SocketSelector`]: the loop itself; [`SelectorHandle`] is its
//!   cross-thread face
//! - [`EventHandler`]: trait for implementing the per-channel callbacks
//! - [`channel`]: the `SocketChannel` abstraction, write operations, and
//!   per-channel contexts
//! - [`net`]: the concrete TCP channel over `mio`
//! - [`error`]: error types and result handling

pub mod channel;
pub mod config;
pub mod error;
pub mod handler;
pub mod key;
pub mod logger;
pub mod net;
pub mod ops;
pub mod queue;
pub mod selector;

pub use channel::{ChannelContext, ChannelRef, SocketChannel, WriteListener, WriteOperation};
pub use config::SelectorConfig;
pub use error::SelectorError;
pub use handler::EventHandler;
pub use key::SelectionKey;
pub use logger::{LogLevel, Logger, NoOpLogger};
pub use ops::Ops;
pub use selector::{RunState, SelectorHandle, SelectorRef, SocketSelector};

/// A convenient prelude module that re-exports the types most handler and
/// producer code touches.
///
/// ```rust
/// use spindle_io::prelude::*;
/// ```
pub mod prelude {
    pub use crate::channel::{ChannelRef, SocketChannel, WriteOperation};
    pub use crate::error::SelectorError;
    pub use crate::handler::EventHandler;
    pub use crate::ops::Ops;
    pub use crate::selector::{SelectorHandle, SelectorRef, SocketSelector};
}
