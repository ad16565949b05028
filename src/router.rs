use std::cell::RefCell;
use std::net::Ipv4Addr;
use std::rc::Rc;

use crate::interface::NetworkInterface;
use crate::wire::Ipv4Datagram;

/// A forwarding rule: where matching datagrams leave, and through whom. `next_hop` is absent for
/// directly-attached networks, in which case the datagram's own destination is the next hop.
#[derive(Clone, Debug, PartialEq, Eq)]
struct RouteEntry {
    next_hop: Option<Ipv4Addr>,
    interface_index: usize,
}

#[derive(Debug, Default)]
struct TrieNode {
    entry: Option<RouteEntry>,
    // children[0] continues with a 0 bit, children[1] with a 1 bit
    children: [Option<Box<TrieNode>>; 2],
}

/// Routes keyed by address prefix, stored as a binary trie over the bits of the prefix from the
/// most significant down. Each node owns its children; a node `length` bits deep holding an entry
/// represents a `/length` route.
#[derive(Debug, Default)]
struct RouteTable {
    root: TrieNode,
}

impl RouteTable {
    fn add(&mut self, route_prefix: u32, prefix_length: u8, entry: RouteEntry) {
        let mut node = &mut self.root;
        for i in 0..prefix_length {
            let bit = (route_prefix >> (31 - i)) & 1;
            node = node.children[bit as usize].get_or_insert_with(Box::default);
        }
        node.entry = Some(entry);
    }

    /// Longest-prefix match: walks toward `address`, remembering the deepest entry passed, until
    /// the trie runs out or all 32 bits are consumed.
    fn lookup(&self, address: u32) -> Option<&RouteEntry> {
        let mut node = &self.root;
        let mut best = node.entry.as_ref();

        for i in 0..32 {
            let bit = (address >> (31 - i)) & 1;
            match &node.children[bit as usize] {
                Some(child) => {
                    node = child;
                    best = node.entry.as_ref().or(best);
                }
                None => break,
            }
        }

        best
    }
}

/// Forwards datagrams between [`NetworkInterface`]s by longest-prefix match on their destination
/// addresses. Interfaces are shared handles, so the same interface object can also keep serving
/// its own host stack.
#[derive(Debug, Default)]
pub struct Router {
    interfaces: Vec<Rc<RefCell<NetworkInterface>>>,
    table: RouteTable,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an interface and returns its index for use in routes.
    pub fn add_interface(&mut self, interface: Rc<RefCell<NetworkInterface>>) -> usize {
        self.interfaces.push(interface);
        self.interfaces.len() - 1
    }

    pub fn interface(&self, index: usize) -> &Rc<RefCell<NetworkInterface>> {
        &self.interfaces[index]
    }

    /// Adds a route matching the `prefix_length` most significant bits of `route_prefix`.
    pub fn add_route(
        &mut self,
        route_prefix: u32,
        prefix_length: u8,
        next_hop: Option<Ipv4Addr>,
        interface_index: usize,
    ) {
        assert!(prefix_length <= 32);
        assert!(interface_index < self.interfaces.len());

        log::debug!(
            "route {}/{prefix_length} via {next_hop:?} on interface {interface_index}",
            Ipv4Addr::from(route_prefix),
        );
        self.table.add(
            route_prefix,
            prefix_length,
            RouteEntry {
                next_hop,
                interface_index,
            },
        );
    }

    /// Moves every datagram waiting on any interface out the interface its destination's route
    /// names. Datagrams out of hops or without a matching route are dropped.
    pub fn route(&mut self) {
        for i in 0..self.interfaces.len() {
            let queued = std::mem::take(self.interfaces[i].borrow_mut().datagrams_received());

            for mut dgram in queued {
                let dst = dgram.header.dst;

                if dgram.header.ttl <= 1 {
                    log::debug!("dropping datagram for {dst}: TTL expired");
                    continue;
                }

                let Some(entry) = self.table.lookup(u32::from(dst)) else {
                    log::debug!("dropping datagram for {dst}: no route");
                    continue;
                };

                dgram.header.ttl -= 1;
                dgram.header.compute_checksum();

                let next_hop = entry.next_hop.unwrap_or(dst);
                self.interfaces[entry.interface_index]
                    .borrow_mut()
                    .send_datagram(dgram, next_hop);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::VecDeque;

    use bytes::Bytes;

    use crate::interface::OutputPort;
    use crate::wire::{EthernetAddress, EthernetFrame, ETHERTYPE_ARP, ETHERTYPE_IPV4};

    /// Captures transmitted frames per interface.
    #[derive(Debug, Default)]
    struct CapturePort {
        frames: RefCell<VecDeque<EthernetFrame>>,
    }

    impl OutputPort for CapturePort {
        fn transmit(&self, _sender: &NetworkInterface, frame: EthernetFrame) {
            self.frames.borrow_mut().push_back(frame);
        }
    }

    fn ip(s: &str) -> Ipv4Addr {
        s.parse().unwrap()
    }

    fn prefix(s: &str) -> u32 {
        u32::from(ip(s))
    }

    fn entry(interface_index: usize) -> RouteEntry {
        RouteEntry {
            next_hop: None,
            interface_index,
        }
    }

    fn datagram(dst: &str, ttl: u8) -> Ipv4Datagram {
        Ipv4Datagram::new(ip("172.16.0.9"), ip(dst), 17, ttl, Bytes::from_static(b"x"))
    }

    struct TestRouter {
        router: Router,
        ports: Vec<Rc<CapturePort>>,
    }

    impl TestRouter {
        fn with_interfaces(n: usize) -> Self {
            let mut router = Router::new();
            let mut ports = Vec::new();
            for i in 0..n {
                let port = Rc::new(CapturePort::default());
                let interface = NetworkInterface::new(
                    format!("if{i}"),
                    port.clone(),
                    EthernetAddress([2, 0, 0, 0, 0, i as u8]),
                    Ipv4Addr::new(10, 100, i as u8, 1),
                );
                router.add_interface(Rc::new(RefCell::new(interface)));
                ports.push(port);
            }
            Self { router, ports }
        }

        fn inject(&self, interface_index: usize, dgram: Ipv4Datagram) {
            self.router
                .interface(interface_index)
                .borrow_mut()
                .datagrams_received()
                .push_back(dgram);
        }

        /// Frames that egressed each interface since the last call.
        fn egress(&self, interface_index: usize) -> Vec<EthernetFrame> {
            self.ports[interface_index].frames.borrow_mut().drain(..).collect()
        }
    }

    #[test]
    fn test_lookup_prefers_longest_prefix() {
        let mut table = RouteTable::default();
        table.add(prefix("10.0.0.0"), 8, entry(0));
        table.add(prefix("10.1.0.0"), 16, entry(1));

        assert_eq!(table.lookup(prefix("10.1.2.3")), Some(&entry(1)));
        assert_eq!(table.lookup(prefix("10.2.2.2")), Some(&entry(0)));
        assert_eq!(table.lookup(prefix("11.0.0.1")), None);
    }

    #[test]
    fn test_lookup_default_route() {
        let mut table = RouteTable::default();
        table.add(0, 0, entry(0));
        table.add(prefix("192.168.0.0"), 16, entry(1));

        assert_eq!(table.lookup(prefix("8.8.8.8")), Some(&entry(0)));
        assert_eq!(table.lookup(prefix("192.168.3.1")), Some(&entry(1)));
    }

    #[test]
    fn test_lookup_host_route() {
        let mut table = RouteTable::default();
        table.add(prefix("10.0.0.0"), 8, entry(0));
        table.add(prefix("10.0.0.42"), 32, entry(1));

        assert_eq!(table.lookup(prefix("10.0.0.42")), Some(&entry(1)));
        assert_eq!(table.lookup(prefix("10.0.0.43")), Some(&entry(0)));
    }

    #[test]
    fn test_route_between_interfaces() {
        let mut net = TestRouter::with_interfaces(2);
        net.router.add_route(prefix("10.0.0.0"), 8, None, 0);
        net.router.add_route(prefix("10.1.0.0"), 16, None, 1);

        net.inject(0, datagram("10.1.2.3", 64));
        net.inject(1, datagram("10.2.2.2", 64));
        net.router.route();

        // each datagram left by the more specific (or only) matching interface; both next hops
        // are unresolved, so what egresses first is the ARP request for the destination itself
        let frames = net.egress(1);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].header.ether_type, ETHERTYPE_ARP);
        let frames = net.egress(0);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].header.ether_type, ETHERTYPE_ARP);
    }

    #[test]
    fn test_forwarded_datagram_decrements_ttl_and_rechecksums() {
        let mut net = TestRouter::with_interfaces(2);
        net.router.add_route(prefix("10.1.0.0"), 16, None, 1);
        net.inject(0, datagram("10.1.2.3", 64));
        net.router.route();

        // resolve the pending next hop so the datagram egresses as IPv4
        let peer = EthernetAddress([2, 9, 9, 9, 9, 9]);
        let reply = crate::wire::ArpMessage {
            opcode: crate::wire::ArpMessage::OPCODE_REPLY,
            sender_ethernet_address: peer,
            sender_ip_address: ip("10.1.2.3"),
            target_ethernet_address: net.router.interface(1).borrow().ethernet_address(),
            target_ip_address: net.router.interface(1).borrow().ip_address(),
        };
        let frame = EthernetFrame {
            header: crate::wire::EthernetHeader {
                dst: net.router.interface(1).borrow().ethernet_address(),
                src: peer,
                ether_type: ETHERTYPE_ARP,
            },
            payload: reply.serialize(),
        };
        net.router.interface(1).borrow_mut().recv_frame(frame);

        let frames = net.egress(1);
        let ipv4: Vec<_> = frames
            .iter()
            .filter(|f| f.header.ether_type == ETHERTYPE_IPV4)
            .collect();
        assert_eq!(ipv4.len(), 1);
        assert_eq!(ipv4[0].header.dst, peer);

        // the checksum was recomputed, so the decremented datagram still parses
        let dgram = Ipv4Datagram::parse(&ipv4[0].payload).unwrap();
        assert_eq!(dgram.header.ttl, 63);
    }

    #[test]
    fn test_ttl_expiry_drops() {
        let mut net = TestRouter::with_interfaces(2);
        net.router.add_route(prefix("10.1.0.0"), 16, None, 1);

        net.inject(0, datagram("10.1.2.3", 1));
        net.inject(0, datagram("10.1.2.3", 0));
        net.router.route();

        assert!(net.egress(1).is_empty());
    }

    #[test]
    fn test_no_route_drops() {
        let mut net = TestRouter::with_interfaces(2);
        net.router.add_route(prefix("10.1.0.0"), 16, None, 1);

        net.inject(0, datagram("172.30.0.1", 64));
        net.router.route();

        assert!(net.egress(0).is_empty());
        assert!(net.egress(1).is_empty());
    }

    #[test]
    fn test_configured_next_hop_wins() {
        let mut net = TestRouter::with_interfaces(2);
        net.router
            .add_route(0, 0, Some(ip("10.100.1.254")), 1);

        net.inject(0, datagram("93.184.216.34", 64));
        net.router.route();

        // the ARP request targets the gateway, not the final destination
        let frames = net.egress(1);
        assert_eq!(frames.len(), 1);
        let request = crate::wire::ArpMessage::parse(&frames[0].payload).unwrap();
        assert_eq!(request.target_ip_address, ip("10.100.1.254"));
    }
}
