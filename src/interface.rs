use std::collections::{HashMap, VecDeque};
use std::fmt::Debug;
use std::net::Ipv4Addr;
use std::rc::Rc;

use bytes::Bytes;

use crate::wire::{
    ArpMessage, EthernetAddress, EthernetFrame, EthernetHeader, Ipv4Datagram, ETHERTYPE_ARP,
    ETHERTYPE_IPV4,
};

/// The physical layer an interface transmits frames on. Multiple interfaces may share one port;
/// transmission does not fail observably.
pub trait OutputPort: Debug {
    fn transmit(&self, sender: &NetworkInterface, frame: EthernetFrame);
}

// how long an address learned from ARP stays usable
const ARP_ENTRY_TTL_MS: u64 = 30_000;
// how long an unanswered ARP request suppresses re-asking
const ARP_REQUEST_COOLDOWN_MS: u64 = 5_000;

#[derive(Debug)]
struct ArpEntry {
    ethernet_address: EthernetAddress,
    age_ms: u64,
}

/// Connects the internet layer with the link layer: turns datagrams into Ethernet frames,
/// resolving next-hop Ethernet addresses over ARP, and turns received frames back into datagrams
/// for the owner to collect.
///
/// Datagrams for a next hop whose Ethernet address is unknown wait in a per-destination queue
/// while an ARP request is outstanding; at most one request per destination is sent every five
/// seconds, and any ARP message from a host both answers the request and teaches the mapping.
/// The same type serves as the building block of a [`Router`](crate::Router), which holds one
/// interface per attached network.
#[derive(Debug)]
pub struct NetworkInterface {
    name: String,
    port: Rc<dyn OutputPort>,
    ethernet_address: EthernetAddress,
    ip_address: Ipv4Addr,

    datagrams_received: VecDeque<Ipv4Datagram>,
    arp_table: HashMap<Ipv4Addr, ArpEntry>,
    arp_waited: HashMap<Ipv4Addr, u64>,
    // per-destination datagrams awaiting resolution, oldest first
    data_queued: HashMap<Ipv4Addr, VecDeque<Ipv4Datagram>>,
}

impl NetworkInterface {
    pub fn new(
        name: impl Into<String>,
        port: Rc<dyn OutputPort>,
        ethernet_address: EthernetAddress,
        ip_address: Ipv4Addr,
    ) -> Self {
        let name = name.into();
        log::debug!("interface {name} has Ethernet address {ethernet_address} and IP address {ip_address}");

        Self {
            name,
            port,
            ethernet_address,
            ip_address,
            datagrams_received: VecDeque::new(),
            arp_table: HashMap::new(),
            arp_waited: HashMap::new(),
            data_queued: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ethernet_address(&self) -> EthernetAddress {
        self.ethernet_address
    }

    pub fn ip_address(&self) -> Ipv4Addr {
        self.ip_address
    }

    /// Datagrams received and waiting for the owner.
    pub fn datagrams_received(&mut self) -> &mut VecDeque<Ipv4Datagram> {
        &mut self.datagrams_received
    }

    /// Sends `dgram` toward `next_hop`, resolving the next hop's Ethernet address first. With no
    /// fresh ARP entry the datagram waits in the pending queue and a request is broadcast, unless
    /// one already is in flight.
    pub fn send_datagram(&mut self, dgram: Ipv4Datagram, next_hop: Ipv4Addr) {
        if let Some(entry) = self.arp_table.get(&next_hop) {
            let frame =
                self.encapsulate(dgram.serialize(), entry.ethernet_address, ETHERTYPE_IPV4);
            self.transmit(frame);
            return;
        }

        self.data_queued.entry(next_hop).or_default().push_back(dgram);

        if !self.arp_waited.contains_key(&next_hop) {
            log::debug!("{}: broadcasting ARP request for {next_hop}", self.name);
            self.send_arp_message(
                next_hop,
                EthernetAddress::BROADCAST,
                ArpMessage::OPCODE_REQUEST,
            );
            self.arp_waited.insert(next_hop, 0);
        }
    }

    /// Accepts one frame from the wire. Frames addressed to neither this interface nor broadcast
    /// are ignored, as are payloads that fail to parse.
    pub fn recv_frame(&mut self, frame: EthernetFrame) {
        if frame.header.dst != self.ethernet_address
            && frame.header.dst != EthernetAddress::BROADCAST
        {
            return;
        }

        match frame.header.ether_type {
            ETHERTYPE_IPV4 => {
                if let Ok(dgram) = Ipv4Datagram::parse(&frame.payload) {
                    self.datagrams_received.push_back(dgram);
                }
            }
            ETHERTYPE_ARP => {
                if let Ok(arp) = ArpMessage::parse(&frame.payload) {
                    self.handle_arp(arp);
                }
            }
            _ => {}
        }
    }

    fn handle_arp(&mut self, arp: ArpMessage) {
        let sender_ip = arp.sender_ip_address;

        // learn from requests and replies alike
        log::debug!(
            "{}: learned {sender_ip} is at {}",
            self.name,
            arp.sender_ethernet_address
        );
        self.arp_table.insert(
            sender_ip,
            ArpEntry {
                ethernet_address: arp.sender_ethernet_address,
                age_ms: 0,
            },
        );

        if let Some(queued) = self.data_queued.remove(&sender_ip) {
            for dgram in queued {
                self.send_datagram(dgram, sender_ip);
            }
        }

        if arp.opcode == ArpMessage::OPCODE_REQUEST && arp.target_ip_address == self.ip_address {
            self.send_arp_message(
                sender_ip,
                arp.sender_ethernet_address,
                ArpMessage::OPCODE_REPLY,
            );
        }
    }

    /// Ages the ARP cache and the outstanding-request set by `ms_since_last_tick` milliseconds,
    /// dropping what has expired.
    pub fn tick(&mut self, ms_since_last_tick: u64) {
        let name = &self.name;

        self.arp_waited.retain(|_ip, age_ms| {
            *age_ms += ms_since_last_tick;
            *age_ms < ARP_REQUEST_COOLDOWN_MS
        });

        self.arp_table.retain(|ip, entry| {
            entry.age_ms += ms_since_last_tick;
            if entry.age_ms >= ARP_ENTRY_TTL_MS {
                log::debug!("{name}: ARP entry for {ip} expired");
                false
            } else {
                true
            }
        });
    }

    fn transmit(&self, frame: EthernetFrame) {
        self.port.transmit(self, frame);
    }

    fn encapsulate(
        &self,
        payload: Bytes,
        dst: EthernetAddress,
        ether_type: u16,
    ) -> EthernetFrame {
        EthernetFrame {
            header: EthernetHeader {
                dst,
                src: self.ethernet_address,
                ether_type,
            },
            payload,
        }
    }

    fn send_arp_message(&self, target_ip: Ipv4Addr, dst: EthernetAddress, opcode: u16) {
        let message = ArpMessage {
            opcode,
            sender_ethernet_address: self.ethernet_address,
            sender_ip_address: self.ip_address,
            target_ethernet_address: if opcode == ArpMessage::OPCODE_REQUEST {
                EthernetAddress::ZERO
            } else {
                dst
            },
            target_ip_address: target_ip,
        };
        self.transmit(self.encapsulate(message.serialize(), dst, ETHERTYPE_ARP));
    }
}
