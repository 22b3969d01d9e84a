//! Concrete channel implementations over `mio`'s network types.
//!
//! The selector core only knows the [`SocketChannel`](crate::channel::SocketChannel)
//! trait; this module supplies the production TCP implementation. Channels are
//! created by outer layers (an acceptor thread for inbound sockets, a connect
//! call for outbound ones) and handed to a selector via
//! `schedule_for_registration`.

pub mod tcp;

pub use tcp::TcpSocketChannel;
