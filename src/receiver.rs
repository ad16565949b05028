use crate::reassembler::Reassembler;
use crate::stream::{ByteStream, Reader};
use crate::wrap::Wrap32;
use crate::{TcpReceiverMessage, TcpSenderMessage};

/// The receiving half of a TCP connection: feeds inbound segments through a [`Reassembler`] and
/// reports the cumulative acknowledgment, the receive window, and reset state to the peer.
///
/// The peer's initial sequence number, learned from the SYN, anchors the wrapped sequence space;
/// until it arrives every non-SYN segment is discarded. The acknowledgment is held as an absolute
/// sequence number (SYN occupies index 0, the FIN one index past the last byte) and wrapped on
/// the way out.
#[derive(Debug)]
pub struct TcpReceiver {
    reassembler: Reassembler,
    zero_point: Option<Wrap32>,
    ackno_abs: u64,
}

impl TcpReceiver {
    pub fn new(reassembler: Reassembler) -> Self {
        Self {
            reassembler,
            zero_point: None,
            ackno_abs: 0,
        }
    }

    /// Processes one segment from the peer's sender.
    pub fn receive(&mut self, msg: TcpSenderMessage) {
        if msg.rst {
            self.reassembler.reader().set_error();
            return;
        }

        if self.stream().has_error() {
            return;
        }
        if msg.syn {
            self.zero_point = Some(msg.seqno);
        }
        let Some(zero_point) = self.zero_point else {
            return;
        };

        // the SYN consumed absolute index 0, so stream indices sit one below absolute seqnos;
        // a bogus seqno equal to the zero point wraps far outside the acceptance window
        let stream_index = if msg.syn {
            0
        } else {
            msg.seqno.unwrap(zero_point, self.ackno_abs).wrapping_sub(1)
        };

        self.reassembler.insert(stream_index, msg.payload, msg.fin);

        self.ackno_abs =
            1 + self.stream().bytes_pushed() + u64::from(self.stream().is_closed());
    }

    /// The message advertised back to the peer: cumulative ackno (absent before the SYN), the
    /// receive window clamped to the 16-bit field, and the sticky error state.
    pub fn send(&self) -> TcpReceiverMessage {
        TcpReceiverMessage {
            ackno: self
                .zero_point
                .map(|zero_point| Wrap32::wrap(self.ackno_abs, zero_point)),
            window_size: self.stream().available_capacity().min(usize::from(u16::MAX)) as u16,
            rst: self.stream().has_error(),
        }
    }

    pub fn stream(&self) -> &ByteStream {
        self.reassembler.stream()
    }

    /// The application-facing end of the inbound stream.
    pub fn reader(&mut self) -> Reader<'_> {
        self.reassembler.reader()
    }

    pub fn bytes_pending(&self) -> u64 {
        self.reassembler.bytes_pending()
    }
}
