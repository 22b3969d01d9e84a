//! TCP echo server on a single selector thread.
//!
//! An acceptor thread owns the listener and hands every inbound socket to
//! the selector; the selector thread does all reads, writes, and teardown.
//!
//! Run with `cargo run --example echo_server [addr]`, then try
//! `nc 127.0.0.1 8080`.

use spindle_io::error::Result;
use spindle_io::net::TcpSocketChannel;
use spindle_io::prelude::*;
use spindle_io::{LogLevel, Logger, SelectorConfig, SelectorError};
use std::io::{self, ErrorKind};
use std::net::TcpListener;
use std::sync::Arc;

struct StderrLogger;

impl Logger for StderrLogger {
    fn log(&self, level: LogLevel, message: &str) {
        eprintln!("[{:?}] {}", level, message);
    }
}

struct EchoHandler;

impl EchoHandler {
    /// Drains the channel's queued writes until the socket pushes back.
    fn flush(&self, channel: &ChannelRef) -> Result<()> {
        let selector = channel.selector().expect("channel has no selector");
        while let Some(mut op) = channel.context().take_write() {
            while let Some(buf) = op.current_buffer() {
                match channel.try_write(buf) {
                    Ok(n) => op.advance(n),
                    Err(err) if err.kind() == ErrorKind::WouldBlock => {
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
}

impl EventHandler for EchoHandler {
    fn handle_registration(&self, channel: &ChannelRef) -> Result<()> {
        println!("new connection: {:?}", channel);
        Ok(())
    }

    fn registration_exception(&self, _channel: &ChannelRef, error: SelectorError) {
        eprintln!("registration failed: {}", error);
    }

    fn handle_connect(&self, _channel: &ChannelRef) -> Result<()> {
        Ok(())
    }

    fn connect_exception(&self, _channel: &ChannelRef, error: SelectorError) {
        eprintln!("connect failed: {}", error);
    }

    fn handle_read(&self, channel: &ChannelRef) -> Result<()> {
        let selector = channel.selector().expect("channel has no selector");
        let mut buf = [0u8; 8192];
        loop {
            match channel.try_read(&mut buf) {
                Ok(0) => {
                    // Peer closed; the selector retires the channel after
                    // this dispatch.
                    channel.close();
                    return Ok(());
                }
                Ok(n) => {
                    let echo = WriteOperation::single(
                        channel.clone(),
                        buf[..n].to_vec(),
                        Box::new(|result| {
                            if let Err(err) = result {
                                eprintln!("echo write failed: {}", err);
                            }
                        }),
                    );
                    selector.queue_write_in_channel_buffer(echo);
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => return Ok(()),
                Err(err) => {
                    channel.close();
                    return Err(err.into());
                }
            }
        }
    }

    fn read_exception(&self, _channel: &ChannelRef, error: SelectorError) {
        eprintln!("read failed: {}", error);
    }

    fn handle_write(&self, channel: &ChannelRef) -> Result<()> {
        self.flush(channel)
    }

    fn write_exception(&self, _channel: &ChannelRef, error: SelectorError) {
        eprintln!("write failed: {}", error);
    }

    fn post_handling(&self, channel: &ChannelRef) {
        // Keep the write-interest bit in step with the context backlog.
        if channel.is_open() && !channel.context().has_pending_writes() {
            let _ = channel.set_write_interest(false);
        }
    }

    fn handle_close(&self, channel: &ChannelRef) {
        println!("connection closed: {:?}", channel);
        channel.close();
    }
}

fn main() -> io::Result<()> {
    let addr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:8080".to_string());

    let selector = SocketSelector::with_config(
        EchoHandler,
        SelectorConfig::builder()
            .logger(Arc::new(StderrLogger))
            .build(),
    )?;
    let (join, handle) = selector.spawn("spindle-io")?;

    let listener = TcpListener::bind(&addr)?;
    println!("echo server listening on {}", addr);

    // Acceptor loop: the only producer in this demo.
    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let channel = TcpSocketChannel::accepted(stream, Some(&handle))?;
                if handle.schedule_for_registration(channel).is_err() {
                    break;
                }
            }
            Err(err) => {
                eprintln!("accept error: {}", err);
                break;
            }
        }
    }

    handle.close();
    join.join().expect("selector thread panicked");
    Ok(())
}
