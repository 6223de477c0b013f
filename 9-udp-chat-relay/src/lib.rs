//! Chat relay over plain UDP datagrams.
//!
//! A relay tracks participants by the address their datagrams come from and
//! forwards broadcast and private text or image messages between them. There
//! is no handshake, acknowledgment or retry: every message is one datagram,
//! delivered best-effort. Each module focuses on one concern:
//!
//! - [`message`] is the colon-delimited text protocol and its size limit.
//! - [`registry`] maps endpoints to display names behind a lock.
//! - [`router`] turns each inbound datagram into the deliveries it causes.
//! - [`presence`] builds the `LIST:` snapshot sent on every join.
//! - [`transport`] owns the UDP socket and performs best-effort sends.
//! - [`relay`] runs the receive loop for the server.
//! - [`client`] is a terminal participant that speaks the same protocol.
//! - [`cli`] parses the command line for both modes.
//!
//! Integration tests drive a real relay over loopback sockets.

pub mod cli;
pub mod client;
pub mod message;
pub mod presence;
pub mod registry;
pub mod relay;
pub mod router;
pub mod transport;
