//! Scenario tests wiring the pieces together: a sender and receiver exchanging messages over an
//! imaginary (and sometimes lossy) link, and interfaces joined by shared wires into a routed
//! topology. The harness types stand in for the event loop a real host would run.


use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use crate::{
    ByteStream, EthernetFrame, NetworkInterface, OutputPort, Reassembler, TcpReceiver,
    TcpReceiverMessage, TcpSender, TcpSenderMessage, Wrap32,
};

/// One direction of a TCP connection: our sender feeding the peer's receiver, with the peer's
/// acknowledgments looped straight back unless a test withholds them.
pub(crate) struct TestConnection {
    pub tx: TcpSender,
    pub rx: TcpReceiver,
}

impl TestConnection {
    pub fn new(isn: u32, capacity: usize, rto_ms: u64) -> Self {
        Self {
            tx: TcpSender::new(ByteStream::new(capacity), Wrap32::new(isn), rto_ms),
            rx: TcpReceiver::new(Reassembler::new(ByteStream::new(capacity))),
        }
    }

    /// Collects whatever the sender wants to transmit, without delivering it.
    pub fn push_segments(&mut self) -> Vec<TcpSenderMessage> {
        let mut out = Vec::new();
        self.tx.push(|msg| out.push(msg));
        out
    }

    /// Hands one segment to the receiver and loops its acknowledgment back to the sender.
    pub fn deliver(&mut self, msg: TcpSenderMessage) -> TcpReceiverMessage {
        self.rx.receive(msg);
        let ack = self.rx.send();
        self.tx.receive(ack);
        ack
    }

    /// Pushes and delivers until the connection goes quiet. Returns the number of segments that
    /// crossed the link.
    pub fn drive(&mut self) -> usize {
        let mut delivered = 0;
        loop {
            let segments = self.push_segments();
            if segments.is_empty() {
                return delivered;
            }
            for msg in segments {
                self.deliver(msg);
                delivered += 1;
            }
        }
    }

    /// Advances time, collecting any retransmissions without delivering them.
    pub fn tick(&mut self, ms: u64) -> Vec<TcpSenderMessage> {
        let mut out = Vec::new();
        self.tx.tick(ms, |msg| out.push(msg));
        out
    }

    /// Reads everything buffered on the receiving side.
    pub fn read_received(&mut self) -> Vec<u8> {
        let mut out = Vec::new();
        let mut reader = self.rx.reader();
        while reader.bytes_buffered() > 0 {
            let chunk = reader.pop_bytes(usize::MAX);
            out.extend_from_slice(&chunk);
        }
        out
    }
}

/// An Ethernet segment shared by the interfaces attached to it. Transmissions pile up until
/// [`pump`] carries them to the other attached parties.
#[derive(Debug, Default)]
pub(crate) struct SharedWire {
    frames: RefCell<VecDeque<EthernetFrame>>,
}

impl OutputPort for SharedWire {
    fn transmit(&self, _sender: &NetworkInterface, frame: EthernetFrame) {
        self.frames.borrow_mut().push_back(frame);
    }
}

/// Delivers queued frames to every attached interface except the one that sent each, until the
/// wire is quiet. Returns the number of frames carried.
pub(crate) fn pump(wire: &SharedWire, parties: &[Rc<RefCell<NetworkInterface>>]) -> usize {
    let mut carried = 0;
    loop {
        let frame = wire.frames.borrow_mut().pop_front();
        let Some(frame) = frame else {
            return carried;
        };
        carried += 1;

        for party in parties {
            let mut interface = party.borrow_mut();
            if interface.ethernet_address() != frame.header.src {
                interface.recv_frame(frame.clone());
            }
        }
    }
}
