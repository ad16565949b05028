//! The core of a user-space TCP/IP stack, written as a ["sans-I/O"][sans-io] library: it never
//! touches a socket or a clock itself, it just accepts bytes, segments, and frames, and produces
//! the same. The caller wires the pieces to real I/O and reports the passage of time through the
//! `tick` methods.
//!
//! [sans-io]: https://sans-io.readthedocs.io
//!
//! The pieces, from the inside out:
//!
//! - [`ByteStream`] — a bounded, in-order byte buffer with distinct writing and reading halves.
//! - [`Wrap32`] — the 32-bit wrapping sequence-number space and its checkpoint-guided inverse.
//! - [`Reassembler`] — turns out-of-order, overlapping substrings back into a contiguous stream.
//! - [`TcpReceiver`] / [`TcpSender`] — the two halves of reliable transport: cumulative
//!   acknowledgments and window advertisement on one side, window-respecting segmentation and
//!   timer-driven retransmission on the other.
//! - [`NetworkInterface`] and [`Router`] — Ethernet framing with ARP resolution, and
//!   longest-prefix-match forwarding between interfaces.
//!
//! Everything is single-threaded and event-driven: each operation runs to completion, and
//! ordering between operations is the caller's concern.
//!
//! ```
//! use netstack::{ByteStream, TcpSender, Wrap32};
//!
//! let mut sender = TcpSender::new(ByteStream::new(64), Wrap32::new(12_000), 1_000);
//!
//! // the first push emits the SYN
//! let mut sent = Vec::new();
//! sender.push(|msg| sent.push(msg));
//! assert!(sent[0].syn);
//! assert_eq!(sent[0].seqno, Wrap32::new(12_000));
//! ```

#![forbid(unsafe_code)]

use bytes::Bytes;

mod interface;
mod reassembler;
mod receiver;
mod router;
mod sender;
mod stream;
mod wire;
mod wrap;

#[cfg(test)]
mod tests;

pub use crate::interface::{NetworkInterface, OutputPort};
pub use crate::reassembler::Reassembler;
pub use crate::receiver::TcpReceiver;
pub use crate::router::Router;
pub use crate::sender::TcpSender;
pub use crate::stream::{ByteStream, Reader, Writer};
pub use crate::wire::{
    ArpMessage, EthernetAddress, EthernetFrame, EthernetHeader, Ipv4Datagram, Ipv4Header,
    ParseError, ETHERTYPE_ARP, ETHERTYPE_IPV4,
};
pub use crate::wrap::Wrap32;

/// The most payload bytes a single segment may carry.
pub const MAX_PAYLOAD_SIZE: usize = 1000;

/// What a [`TcpSender`] puts on the wire: a position in sequence space, the connection-delimiting
/// flags, and up to [`MAX_PAYLOAD_SIZE`] bytes of the stream.
#[derive(Clone, Debug, Default)]
pub struct TcpSenderMessage {
    pub seqno: Wrap32,
    pub syn: bool,
    pub payload: Bytes,
    pub fin: bool,
    pub rst: bool,
}

impl TcpSenderMessage {
    /// Number of sequence numbers the message occupies: SYN and FIN count one each, plus one per
    /// payload byte. The sender never transmits a message of length zero.
    pub fn sequence_length(&self) -> u64 {
        u64::from(self.syn) + self.payload.len() as u64 + u64::from(self.fin)
    }
}

/// What a [`TcpReceiver`] sends back: the cumulative acknowledgment (absent until the peer's SYN
/// arrives), the free space in its receive buffer, and the reset state.
#[derive(Copy, Clone, Debug, Default)]
pub struct TcpReceiverMessage {
    pub ackno: Option<Wrap32>,
    pub window_size: u16,
    pub rst: bool,
}

/// Per-connection tunables.
#[derive(Copy, Clone, Debug)]
#[non_exhaustive]
pub struct TcpConfig {
    pub(crate) capacity: usize,
    pub(crate) initial_rto_ms: u64,
    pub(crate) fixed_isn: Option<Wrap32>,
}

impl TcpConfig {
    /// Capacity of each byte stream, and thereby the largest window ever advertised.
    pub fn capacity(&mut self, capacity: usize) {
        self.capacity = capacity;
    }

    /// Retransmission timeout before any back-off, in milliseconds.
    pub fn initial_rto_ms(&mut self, ms: u64) {
        self.initial_rto_ms = ms;
    }

    /// Pins the initial sequence number instead of drawing a random one.
    pub fn fixed_isn(&mut self, isn: Wrap32) {
        self.fixed_isn = Some(isn);
    }

    pub(crate) fn isn(&self) -> Wrap32 {
        self.fixed_isn
            .unwrap_or_else(|| Wrap32::new(rand::random()))
    }
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            capacity: 64_000,
            initial_rto_ms: 1_000,
            fixed_isn: None,
        }
    }
}

impl TcpSender {
    /// A sender over a fresh stream, configured by `config`.
    pub fn with_config(config: &TcpConfig) -> Self {
        Self::new(
            ByteStream::new(config.capacity),
            config.isn(),
            config.initial_rto_ms,
        )
    }
}

impl TcpReceiver {
    /// A receiver over a fresh stream, configured by `config`.
    pub fn with_config(config: &TcpConfig) -> Self {
        Self::new(Reassembler::new(ByteStream::new(config.capacity)))
    }
}
