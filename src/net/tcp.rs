//! Non-blocking TCP channel backed by `mio::net::TcpStream`.

use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};

use mio::net::TcpStream;
use mio::{Interest, Registry, Token};

use crate::channel::{ChannelContext, SocketChannel};
use crate::error::{Result, SelectorError};
use crate::key::SelectionKey;
use crate::ops::Ops;
use crate::selector::{SelectorHandle, SelectorRef};

/// One non-blocking TCP socket, shared between its selector and the outer
/// layers that feed it.
///
/// The stream lives in a `Mutex<Option<..>>` slot: the selector thread is the
/// only mutator, the mutex makes the channel shareable, and `close` empties
/// the slot so the file descriptor is released the moment the channel dies
/// rather than when the last `Arc` drops.
pub struct TcpSocketChannel {
    stream: Mutex<Option<TcpStream>>,
    open: AtomicBool,
    connect_complete: AtomicBool,
    registration: OnceLock<Registration>,
    context: ChannelContext,
    selector: Option<Weak<dyn SelectorHandle>>,
}

struct Registration {
    key: SelectionKey,
    registry: Registry,
}

impl TcpSocketChannel {
    /// Wraps a stream handed over by an acceptor. The socket is already
    /// connected; only read interest is registered initially.
    pub fn accepted(
        stream: std::net::TcpStream,
        selector: Option<&SelectorRef>,
    ) -> io::Result<Arc<Self>> {
        stream.set_nonblocking(true)?;
        Ok(Arc::new(Self::from_mio(
            TcpStream::from_std(stream),
            true,
            selector,
        )))
    }

    /// Starts a non-blocking outbound connect. Completion is driven by the
    /// selector through `finish_connect` once the socket reports ready.
    pub fn connect(addr: SocketAddr, selector: Option<&SelectorRef>) -> io::Result<Arc<Self>> {
        Ok(Arc::new(Self::from_mio(
            TcpStream::connect(addr)?,
            false,
            selector,
        )))
    }

    fn from_mio(stream: TcpStream, connect_complete: bool, selector: Option<&SelectorRef>) -> Self {
        Self {
            stream: Mutex::new(Some(stream)),
            open: AtomicBool::new(true),
            connect_complete: AtomicBool::new(connect_complete),
            registration: OnceLock::new(),
            context: ChannelContext::new(),
            selector: selector.map(Arc::downgrade),
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.with_stream(|stream| stream.local_addr())
    }

    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.with_stream(|stream| stream.peer_addr())
    }

    fn with_stream<T>(&self, f: impl FnOnce(&mut TcpStream) -> io::Result<T>) -> io::Result<T> {
        let mut guard = self.lock_stream();
        match guard.as_mut() {
            Some(stream) => f(stream),
            None => Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "channel is closed",
            )),
        }
    }

    fn lock_stream(&self) -> std::sync::MutexGuard<'_, Option<TcpStream>> {
        match self.stream.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl SocketChannel for TcpSocketChannel {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn is_connect_complete(&self) -> bool {
        self.connect_complete.load(Ordering::Acquire)
    }

    fn finish_connect(&self) -> Result<bool> {
        if self.is_connect_complete() {
            return Ok(true);
        }
        let mut guard = self.lock_stream();
        let stream = guard.as_mut().ok_or(SelectorError::ClosedChannel)?;

        // A failed connect surfaces through the socket's error slot.
        if let Some(err) = stream.take_error()? {
            return Err(SelectorError::Io(err));
        }
        match stream.peer_addr() {
            Ok(_) => {
                self.connect_complete.store(true, Ordering::Release);
                // The socket is established; connect interest would otherwise
                // keep it registered for writability it no longer wants.
                if let Some(registration) = self.registration.get() {
                    let current = registration.key.interest_ops()?;
                    let next = current.without(Ops::CONNECT);
                    if next != current {
                        registration.registry.reregister(
                            stream,
                            registration.key.token(),
                            mio_interest(next),
                        )?;
                        registration.key.set_interest_ops(next)?;
                    }
                }
                Ok(true)
            }
            Err(err) if err.kind() == io::ErrorKind::NotConnected => Ok(false),
            #[cfg(unix)]
            Err(err) if err.raw_os_error() == Some(libc::EINPROGRESS) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    fn register(&self, registry: &Registry, token: Token) -> Result<()> {
        if !self.is_open() {
            return Err(SelectorError::ClosedChannel);
        }
        let interest = if self.is_connect_complete() {
            Ops::READ
        } else {
            // Connect completion is reported as writability.
            Ops::READ | Ops::CONNECT
        };

        let mut guard = self.lock_stream();
        let stream = guard.as_mut().ok_or(SelectorError::ClosedChannel)?;
        registry.register(stream, token, mio_interest(interest))?;

        let registration = Registration {
            key: SelectionKey::new(token, interest),
            registry: registry.try_clone()?,
        };
        if self.registration.set(registration).is_err() {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                "channel is already registered",
            )
            .into());
        }
        Ok(())
    }

    fn set_write_interest(&self, interested: bool) -> Result<()> {
        let registration = self
            .registration
            .get()
            .ok_or(SelectorError::CancelledKey)?;
        let current = registration.key.interest_ops()?;
        let next = if interested {
            current.with(Ops::WRITE)
        } else {
            current.without(Ops::WRITE)
        };
        if next == current {
            return Ok(());
        }

        let mut guard = self.lock_stream();
        let stream = guard.as_mut().ok_or(SelectorError::ClosedChannel)?;
        registration
            .registry
            .reregister(stream, registration.key.token(), mio_interest(next))?;
        registration.key.set_interest_ops(next)?;
        Ok(())
    }

    fn selection_key(&self) -> Option<&SelectionKey> {
        self.registration.get().map(|r| &r.key)
    }

    fn context(&self) -> &ChannelContext {
        &self.context
    }

    fn selector(&self) -> Option<SelectorRef> {
        self.selector.as_ref().and_then(Weak::upgrade)
    }

    fn close(&self) {
        self.open.store(false, Ordering::Release);
        let mut guard = self.lock_stream();
        if let Some(mut stream) = guard.take() {
            if let Some(registration) = self.registration.get() {
                registration.key.cancel();
                let _ = registration.registry.deregister(&mut stream);
            }
        }
    }

    fn try_read(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.with_stream(|stream| stream.read(buf))
    }

    fn try_write(&self, buf: &[u8]) -> io::Result<usize> {
        self.with_stream(|stream| stream.write(buf))
    }
}

fn mio_interest(ops: Ops) -> Interest {
    let mut interest = if ops.is_readable() {
        Interest::READABLE
    } else {
        Interest::WRITABLE
    };
    if ops.is_writable() || ops.is_connectable() {
        interest |= Interest::WRITABLE;
    }
    interest
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{ChannelRef, WriteOperation};
    use crate::config::SelectorConfig;
    use crate::error::Result;
    use crate::handler::EventHandler;
    use crate::selector::SocketSelector;
    use mio::{Events, Poll};
    use std::net::TcpListener;
    use std::thread;
    use std::time::{Duration, Instant};

    const DEADLINE: Duration = Duration::from_secs(5);

    fn wait_until(mut condition: impl FnMut() -> bool, what: &str) {
        let deadline = Instant::now() + DEADLINE;
        while !condition() {
            assert!(Instant::now() < deadline, "timed out waiting for {}", what);
            thread::sleep(Duration::from_millis(1));
        }
    }

    fn accepted_pair() -> (Arc<TcpSocketChannel>, std::net::TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = std::net::TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (accepted, _) = listener.accept().unwrap();
        let channel = TcpSocketChannel::accepted(accepted, None).unwrap();
        (channel, client)
    }

    #[test]
    fn accepted_channel_registers_with_read_interest() {
        let (channel, _client) = accepted_pair();
        let poll = Poll::new().unwrap();

        assert!(channel.is_open());
        assert!(channel.is_connect_complete());
        assert!(channel.selection_key().is_none());

        channel.register(poll.registry(), Token(1)).unwrap();

        let key = channel.selection_key().unwrap();
        assert_eq!(key.token(), Token(1));
        assert_eq!(key.interest_ops().unwrap(), Ops::READ);
    }

    #[test]
    fn register_twice_is_an_error() {
        let (channel, _client) = accepted_pair();
        let poll = Poll::new().unwrap();

        channel.register(poll.registry(), Token(1)).unwrap();
        assert!(channel.register(poll.registry(), Token(2)).is_err());
    }

    #[test]
    fn write_interest_toggles_on_the_key() {
        let (channel, _client) = accepted_pair();
        let poll = Poll::new().unwrap();
        channel.register(poll.registry(), Token(1)).unwrap();

        channel.set_write_interest(true).unwrap();
        assert!(channel
            .selection_key()
            .unwrap()
            .interest_ops()
            .unwrap()
            .is_writable());

        channel.set_write_interest(false).unwrap();
        assert!(!channel
            .selection_key()
            .unwrap()
            .interest_ops()
            .unwrap()
            .is_writable());
    }

    #[test]
    fn write_interest_without_registration_is_cancelled_key() {
        let (channel, _client) = accepted_pair();
        assert!(matches!(
            channel.set_write_interest(true),
            Err(SelectorError::CancelledKey)
        ));
    }

    #[test]
    fn close_releases_the_socket_and_cancels_the_key() {
        let (channel, _client) = accepted_pair();
        let poll = Poll::new().unwrap();
        channel.register(poll.registry(), Token(1)).unwrap();

        channel.close();

        assert!(!channel.is_open());
        assert!(!channel.selection_key().unwrap().is_valid());
        assert!(matches!(
            channel.set_write_interest(true),
            Err(SelectorError::CancelledKey)
        ));
        assert!(channel.try_read(&mut [0u8; 8]).is_err());
    }

    #[test]
    fn outbound_connect_completes() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let channel =
            TcpSocketChannel::connect(listener.local_addr().unwrap(), None).unwrap();
        let mut poll = Poll::new().unwrap();
        channel.register(poll.registry(), Token(1)).unwrap();

        let key = channel.selection_key().unwrap();
        assert!(key.interest_ops().unwrap().is_connectable());

        let mut events = Events::with_capacity(8);
        let deadline = Instant::now() + DEADLINE;
        loop {
            match channel.finish_connect() {
                Ok(true) => break,
                Ok(false) => {}
                Err(err) => panic!("connect failed: {}", err),
            }
            assert!(Instant::now() < deadline, "connect never completed");
            poll.poll(&mut events, Some(Duration::from_millis(10))).unwrap();
        }
        assert!(channel.is_connect_complete());
        // Connect interest drops once the socket is established.
        assert!(!key.interest_ops().unwrap().is_connectable());
        assert!(key.interest_ops().unwrap().is_readable());
        let _ = listener.accept().unwrap();
    }

    /// Flush-capable echo handler: everything read is queued straight back
    /// through the loop-thread write path and drained on write readiness.
    struct EchoHandler;

    fn flush_channel(channel: &ChannelRef) -> Result<()> {
        let selector = channel.selector().expect("channel has no selector");
        while let Some(mut op) = channel.context().take_write() {
            while let Some(buf) = op.current_buffer() {
                match channel.try_write(buf) {
                    Ok(n) => op.advance(n),
                    Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                        channel.context().restore_write(op);
                        return Ok(());
                    }
                    Err(err) => {
                        selector.execute_failed_listener(op.into_listener(), err.into());
                        return Ok(());
                    }
                }
            }
            selector.execute_listener(op.into_listener());
        }
        Ok(())
    }

    impl EventHandler for EchoHandler {
        fn handle_registration(&self, _channel: &ChannelRef) -> Result<()> {
            Ok(())
        }

        fn registration_exception(&self, _channel: &ChannelRef, _error: SelectorError) {}

        fn handle_connect(&self, _channel: &ChannelRef) -> Result<()> {
            Ok(())
        }

        fn connect_exception(&self, _channel: &ChannelRef, _error: SelectorError) {}

        fn handle_read(&self, channel: &ChannelRef) -> Result<()> {
            let selector = channel.selector().expect("channel has no selector");
            let mut buf = [0u8; 4096];
            loop {
                match channel.try_read(&mut buf) {
                    Ok(0) => {
                        channel.close();
                        return Ok(());
                    }
                    Ok(n) => {
                        let echo = WriteOperation::single(
                            channel.clone(),
                            buf[..n].to_vec(),
                            Box::new(|_| {}),
                        );
                        selector.queue_write_in_channel_buffer(echo);
                    }
                    Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                    Err(err) => {
                        channel.close();
                        return Err(err.into());
                    }
                }
            }
        }

        fn read_exception(&self, _channel: &ChannelRef, _error: SelectorError) {}

        fn handle_write(&self, channel: &ChannelRef) -> Result<()> {
            flush_channel(channel)
        }

        fn write_exception(&self, _channel: &ChannelRef, _error: SelectorError) {}

        fn post_handling(&self, channel: &ChannelRef) {
            if channel.is_open() && !channel.context().has_pending_writes() {
                let _ = channel.set_write_interest(false);
            }
        }

        fn handle_close(&self, channel: &ChannelRef) {
            channel.close();
        }
    }

    #[test]
    fn echoes_bytes_end_to_end() {
        let selector = SocketSelector::with_config(
            EchoHandler,
            SelectorConfig::builder()
                .poll_timeout(Duration::from_millis(20))
                .build(),
        )
        .unwrap();
        let (join, handle) = selector.spawn("spindle-io-echo").unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut client = std::net::TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (accepted, _) = listener.accept().unwrap();
        let channel = TcpSocketChannel::accepted(accepted, Some(&handle)).unwrap();
        handle.schedule_for_registration(channel).unwrap();

        client.write_all(b"spindle").unwrap();
        client
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let mut echoed = [0u8; 7];
        client.read_exact(&mut echoed).unwrap();
        assert_eq!(&echoed, b"spindle");

        handle.close();
        join.join().unwrap();
    }

    #[test]
    fn peer_disconnect_reaches_handle_close() {
        let selector = SocketSelector::with_config(
            EchoHandler,
            SelectorConfig::builder()
                .poll_timeout(Duration::from_millis(20))
                .build(),
        )
        .unwrap();
        let (join, handle) = selector.spawn("spindle-io-close").unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = std::net::TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (accepted, _) = listener.accept().unwrap();
        let channel = TcpSocketChannel::accepted(accepted, Some(&handle)).unwrap();
        handle.schedule_for_registration(channel.clone()).unwrap();

        drop(client);
        wait_until(|| !channel.is_open(), "channel close after peer disconnect");

        handle.close();
        join.join().unwrap();
    }
}
