use std::collections::VecDeque;

use bytes::Bytes;

use crate::stream::{ByteStream, Writer};
use crate::wrap::Wrap32;
use crate::{TcpReceiverMessage, TcpSenderMessage, MAX_PAYLOAD_SIZE};

/// The sending half of a TCP connection: slices the outbound [`ByteStream`] into segments that
/// respect the peer's advertised window, keeps every unacknowledged segment for retransmission,
/// and backs the retransmission timeout off exponentially while losses persist.
///
/// Sequence numbers are tracked as absolute 64-bit values and wrapped against the initial
/// sequence number only at the edge. A zero advertised window is probed with an effective window
/// of one sequence number; timeouts during such probing do not back off the timer, since the
/// peer is signalling congestion of its receiver, not of the path.
#[derive(Debug)]
pub struct TcpSender {
    input: ByteStream,
    isn: Wrap32,
    initial_rto_ms: u64,

    outstanding: VecDeque<Segment>,
    timer: Timer,
    rto_multiplier: u64,
    ack_base: u64,
    seq_current: u64,
    window_size: u16,
    consecutive_retransmissions: u64,
}

/// An outbound segment in absolute sequence space, owned until acknowledged.
#[derive(Clone, Debug)]
struct Segment {
    seqno: u64,
    syn: bool,
    fin: bool,
    rst: bool,
    payload: Bytes,
}

impl Segment {
    fn empty(seqno: u64) -> Self {
        Self {
            seqno,
            syn: false,
            fin: false,
            rst: false,
            payload: Bytes::new(),
        }
    }

    /// Number of sequence numbers the segment occupies.
    fn sequence_length(&self) -> u64 {
        u64::from(self.syn) + self.payload.len() as u64 + u64::from(self.fin)
    }
}

impl TcpSender {
    pub fn new(input: ByteStream, isn: Wrap32, initial_rto_ms: u64) -> Self {
        Self {
            input,
            isn,
            initial_rto_ms,
            outstanding: VecDeque::new(),
            timer: Timer::default(),
            rto_multiplier: 1,
            ack_base: 0,
            seq_current: 0,
            // assume a window of one sequence number until the peer advertises one
            window_size: 1,
            consecutive_retransmissions: 0,
        }
    }

    /// Slices as much of the outbound stream into segments as the peer's window allows, handing
    /// each to `transmit`. The SYN rides the first sequence number; the FIN is attached only once
    /// the stream is finished and the FIN itself fits inside the window.
    pub fn push(&mut self, mut transmit: impl FnMut(TcpSenderMessage)) {
        if self.input.has_error() {
            let mut seg = Segment::empty(self.seq_current);
            seg.rst = true;
            self.emit(seg, &mut transmit, false);
            return;
        }

        let seq_window = self.ack_base + u64::from(self.window_size).max(1);
        let Some(mut max_seq_size) = seq_window.checked_sub(self.seq_current) else {
            return;
        };

        let mut seg = Segment::empty(self.seq_current);
        if seg.sequence_length() < max_seq_size {
            seg.syn = self.seq_current == 0;
        }

        while self.input.bytes_buffered() > 0 && max_seq_size > 0 {
            let max_data_size =
                MAX_PAYLOAD_SIZE.min((max_seq_size - seg.sequence_length()) as usize);
            seg.payload = self.input.reader().pop_bytes(max_data_size);

            if seg.sequence_length() < max_seq_size {
                seg.fin = self.input.is_finished();
            }

            self.emit(seg, &mut transmit, true);
            max_seq_size = seq_window - self.seq_current;
            seg = Segment::empty(self.seq_current);
        }

        // a lone FIN, once every payload byte is out and it fits in the window
        if self.seq_current <= self.input.bytes_popped() + 1
            && seg.sequence_length() < max_seq_size
        {
            seg.fin = self.input.is_finished();
        }

        if seg.sequence_length() > 0 {
            self.emit(seg, &mut transmit, true);
        }
    }

    /// Processes an acknowledgment and window update from the peer's receiver.
    pub fn receive(&mut self, msg: TcpReceiverMessage) {
        if msg.rst {
            self.input.set_error();
        }

        self.window_size = msg.window_size;

        let Some(ackno) = msg.ackno else {
            return;
        };
        let ack_no = ackno.unwrap(self.isn, self.ack_base);

        // acks must fall in (ack_base, seq_current]; anything else is stale or ahead of what
        // was ever sent
        if ack_no <= self.ack_base || ack_no > self.seq_current {
            return;
        }

        self.rto_multiplier = 1;
        self.consecutive_retransmissions = 0;
        self.timer.restart();

        while let Some(seg) = self.outstanding.front() {
            let seg_end = seg.seqno + seg.sequence_length();
            if seg_end > ack_no {
                break;
            }
            self.ack_base = seg_end;
            self.outstanding.pop_front();
            self.timer.restart();
        }

        if self.outstanding.is_empty() {
            self.timer.stop();
        }
    }

    /// Advances the retransmission timer. On expiry, retransmits the oldest outstanding segment
    /// and, unless the peer advertised a zero window, doubles the timeout.
    pub fn tick(&mut self, ms_since_last_tick: u64, mut transmit: impl FnMut(TcpSenderMessage)) {
        self.timer.tick(ms_since_last_tick);

        if self.timer.expired(self.rto_multiplier * self.initial_rto_ms) {
            if self.window_size != 0 {
                self.consecutive_retransmissions += 1;
                self.rto_multiplier *= 2;
            }
            self.timer.restart();

            if let Some(seg) = self.outstanding.front().cloned() {
                log::trace!(
                    "retransmitting seqno {} after {} consecutive timeouts",
                    seg.seqno,
                    self.consecutive_retransmissions
                );
                self.emit(seg, &mut transmit, false);
            }
        }
    }

    /// An empty segment carrying the current sequence number, for acks and keep-alives.
    pub fn make_empty_message(&self) -> TcpSenderMessage {
        TcpSenderMessage {
            seqno: Wrap32::wrap(self.seq_current, self.isn),
            rst: self.input.has_error(),
            ..Default::default()
        }
    }

    /// Sequence numbers sent but not yet acknowledged.
    pub fn sequence_numbers_in_flight(&self) -> u64 {
        self.seq_current - self.ack_base
    }

    pub fn consecutive_retransmissions(&self) -> u64 {
        self.consecutive_retransmissions
    }

    /// The application-facing end of the outbound stream.
    pub fn writer(&mut self) -> Writer<'_> {
        self.input.writer()
    }

    pub fn stream(&self) -> &ByteStream {
        &self.input
    }

    fn emit(&mut self, seg: Segment, transmit: &mut impl FnMut(TcpSenderMessage), track: bool) {
        transmit(TcpSenderMessage {
            seqno: Wrap32::wrap(seg.seqno, self.isn),
            syn: seg.syn,
            payload: seg.payload.clone(),
            fin: seg.fin,
            rst: seg.rst,
        });

        if track {
            self.seq_current = self.seq_current.max(seg.seqno + seg.sequence_length());
            self.outstanding.push_back(seg);
            if !self.timer.is_running() {
                self.timer.restart();
            }
        }
    }
}

/// Retransmission timer: a running flag plus accumulated milliseconds. The owner compares the
/// elapsed time against the scaled timeout.
#[derive(Debug, Default)]
struct Timer {
    running: bool,
    elapsed_ms: u64,
}

impl Timer {
    fn restart(&mut self) {
        self.running = true;
        self.elapsed_ms = 0;
    }

    fn stop(&mut self) {
        self.running = false;
    }

    fn is_running(&self) -> bool {
        self.running
    }

    fn tick(&mut self, ms: u64) {
        if self.running {
            self.elapsed_ms += ms;
        }
    }

    fn expired(&self, timeout_ms: u64) -> bool {
        self.running && self.elapsed_ms >= timeout_ms
    }
}
