//! Value types for the Ethernet, ARP, and IPv4 wire formats, with `parse`/`serialize` over byte
//! sequences. Only the shapes this stack exchanges are understood: Ethernet II framing, ARP over
//! Ethernet/IPv4, and option-less IPv4 headers.

use std::net::Ipv4Addr;

use bytes::{BufMut, Bytes, BytesMut};

pub const ETHERTYPE_IPV4: u16 = 0x0800;
pub const ETHERTYPE_ARP: u16 = 0x0806;

/// Why a byte sequence was rejected.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ParseError {
    Truncated,
    UnsupportedFormat,
    BadChecksum,
}

/// A 48-bit Ethernet (link-layer) address.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Default)]
pub struct EthernetAddress(pub [u8; 6]);

impl EthernetAddress {
    /// The all-ones broadcast address.
    pub const BROADCAST: Self = Self([0xff; 6]);

    /// The all-zero address, used as the target of an ARP request.
    pub const ZERO: Self = Self([0; 6]);
}

impl std::fmt::Debug for EthernetAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(self, f)
    }
}

impl std::fmt::Display for EthernetAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct EthernetHeader {
    pub dst: EthernetAddress,
    pub src: EthernetAddress,
    pub ether_type: u16,
}

impl EthernetHeader {
    pub const LENGTH: usize = 14;
}

/// An Ethernet II frame: header plus opaque payload.
#[derive(Clone, Debug)]
pub struct EthernetFrame {
    pub header: EthernetHeader,
    pub payload: Bytes,
}

impl EthernetFrame {
    pub fn parse(buf: &[u8]) -> Result<Self, ParseError> {
        if buf.len() < EthernetHeader::LENGTH {
            return Err(ParseError::Truncated);
        }

        let mut dst = [0u8; 6];
        let mut src = [0u8; 6];
        dst.copy_from_slice(&buf[0..6]);
        src.copy_from_slice(&buf[6..12]);

        Ok(Self {
            header: EthernetHeader {
                dst: EthernetAddress(dst),
                src: EthernetAddress(src),
                ether_type: u16::from_be_bytes([buf[12], buf[13]]),
            },
            payload: Bytes::copy_from_slice(&buf[EthernetHeader::LENGTH..]),
        })
    }

    pub fn serialize(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(EthernetHeader::LENGTH + self.payload.len());
        out.put_slice(&self.header.dst.0);
        out.put_slice(&self.header.src.0);
        out.put_u16(self.header.ether_type);
        out.put_slice(&self.payload);
        out.freeze()
    }
}

/// An ARP message for the Ethernet/IPv4 pairing (hardware type 1, protocol type 0x0800).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ArpMessage {
    pub opcode: u16,
    pub sender_ethernet_address: EthernetAddress,
    pub sender_ip_address: Ipv4Addr,
    pub target_ethernet_address: EthernetAddress,
    pub target_ip_address: Ipv4Addr,
}

impl ArpMessage {
    pub const OPCODE_REQUEST: u16 = 1;
    pub const OPCODE_REPLY: u16 = 2;

    pub const LENGTH: usize = 28;

    const HTYPE_ETHERNET: u16 = 1;
    const HLEN_ETHERNET: u8 = 6;
    const PLEN_IPV4: u8 = 4;

    pub fn parse(buf: &[u8]) -> Result<Self, ParseError> {
        if buf.len() < Self::LENGTH {
            return Err(ParseError::Truncated);
        }

        let htype = u16::from_be_bytes([buf[0], buf[1]]);
        let ptype = u16::from_be_bytes([buf[2], buf[3]]);
        if htype != Self::HTYPE_ETHERNET
            || ptype != ETHERTYPE_IPV4
            || buf[4] != Self::HLEN_ETHERNET
            || buf[5] != Self::PLEN_IPV4
        {
            return Err(ParseError::UnsupportedFormat);
        }

        let mut sender_ethernet = [0u8; 6];
        let mut target_ethernet = [0u8; 6];
        sender_ethernet.copy_from_slice(&buf[8..14]);
        target_ethernet.copy_from_slice(&buf[18..24]);

        let sender_ip: [u8; 4] = buf[14..18].try_into().unwrap();
        let target_ip: [u8; 4] = buf[24..28].try_into().unwrap();

        Ok(Self {
            opcode: u16::from_be_bytes([buf[6], buf[7]]),
            sender_ethernet_address: EthernetAddress(sender_ethernet),
            sender_ip_address: Ipv4Addr::from(sender_ip),
            target_ethernet_address: EthernetAddress(target_ethernet),
            target_ip_address: Ipv4Addr::from(target_ip),
        })
    }

    pub fn serialize(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(Self::LENGTH);
        out.put_u16(Self::HTYPE_ETHERNET);
        out.put_u16(ETHERTYPE_IPV4);
        out.put_u8(Self::HLEN_ETHERNET);
        out.put_u8(Self::PLEN_IPV4);
        out.put_u16(self.opcode);
        out.put_slice(&self.sender_ethernet_address.0);
        out.put_slice(&self.sender_ip_address.octets());
        out.put_slice(&self.target_ethernet_address.0);
        out.put_slice(&self.target_ip_address.octets());
        out.freeze()
    }
}

/// An option-less IPv4 header. The total length is derived from `payload_length`; the checksum
/// field is stored as-is and re-derived with [`compute_checksum`](Self::compute_checksum) after
/// mutation.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Ipv4Header {
    pub tos: u8,
    pub identification: u16,
    pub flags_and_offset: u16,
    pub ttl: u8,
    pub protocol: u8,
    pub checksum: u16,
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub payload_length: u16,
}

impl Ipv4Header {
    pub const LENGTH: usize = 20;

    const VERSION: u8 = 4;
    // header length in 32-bit words, no options
    const IHL: u8 = 5;

    pub fn parse(buf: &[u8]) -> Result<Self, ParseError> {
        if buf.len() < Self::LENGTH {
            return Err(ParseError::Truncated);
        }
        if buf[0] >> 4 != Self::VERSION || buf[0] & 0x0f != Self::IHL {
            return Err(ParseError::UnsupportedFormat);
        }

        let total_length = u16::from_be_bytes([buf[2], buf[3]]);
        if usize::from(total_length) < Self::LENGTH || usize::from(total_length) > buf.len() {
            return Err(ParseError::Truncated);
        }

        if internet_checksum(&buf[..Self::LENGTH]) != 0 {
            return Err(ParseError::BadChecksum);
        }

        let src: [u8; 4] = buf[12..16].try_into().unwrap();
        let dst: [u8; 4] = buf[16..20].try_into().unwrap();

        Ok(Self {
            tos: buf[1],
            identification: u16::from_be_bytes([buf[4], buf[5]]),
            flags_and_offset: u16::from_be_bytes([buf[6], buf[7]]),
            ttl: buf[8],
            protocol: buf[9],
            checksum: u16::from_be_bytes([buf[10], buf[11]]),
            src: Ipv4Addr::from(src),
            dst: Ipv4Addr::from(dst),
            payload_length: total_length - Self::LENGTH as u16,
        })
    }

    /// Re-derives the header checksum from the current field values.
    pub fn compute_checksum(&mut self) {
        self.checksum = 0;
        self.checksum = internet_checksum(&self.to_bytes());
    }

    fn to_bytes(&self) -> [u8; Self::LENGTH] {
        let mut out = [0u8; Self::LENGTH];
        out[0] = Self::VERSION << 4 | Self::IHL;
        out[1] = self.tos;
        out[2..4].copy_from_slice(&(Self::LENGTH as u16 + self.payload_length).to_be_bytes());
        out[4..6].copy_from_slice(&self.identification.to_be_bytes());
        out[6..8].copy_from_slice(&self.flags_and_offset.to_be_bytes());
        out[8] = self.ttl;
        out[9] = self.protocol;
        out[10..12].copy_from_slice(&self.checksum.to_be_bytes());
        out[12..16].copy_from_slice(&self.src.octets());
        out[16..20].copy_from_slice(&self.dst.octets());
        out
    }
}

/// An IPv4 datagram: header plus opaque payload.
#[derive(Clone, Debug)]
pub struct Ipv4Datagram {
    pub header: Ipv4Header,
    pub payload: Bytes,
}

impl Ipv4Datagram {
    pub fn new(src: Ipv4Addr, dst: Ipv4Addr, protocol: u8, ttl: u8, payload: Bytes) -> Self {
        let mut header = Ipv4Header {
            tos: 0,
            identification: 0,
            flags_and_offset: 0,
            ttl,
            protocol,
            checksum: 0,
            src,
            dst,
            payload_length: payload.len() as u16,
        };
        header.compute_checksum();
        Self { header, payload }
    }

    pub fn parse(buf: &[u8]) -> Result<Self, ParseError> {
        let header = Ipv4Header::parse(buf)?;
        let end = Ipv4Header::LENGTH + usize::from(header.payload_length);
        Ok(Self {
            header,
            payload: Bytes::copy_from_slice(&buf[Ipv4Header::LENGTH..end]),
        })
    }

    pub fn serialize(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(Ipv4Header::LENGTH + self.payload.len());
        out.put_slice(&self.header.to_bytes());
        out.put_slice(&self.payload);
        out.freeze()
    }
}

/// RFC 1071 ones'-complement sum over `data`. Verifying a header including its checksum field
/// yields zero.
fn internet_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    for chunk in data.chunks(2) {
        let word = if chunk.len() == 2 {
            u16::from_be_bytes([chunk[0], chunk[1]])
        } else {
            u16::from_be_bytes([chunk[0], 0])
        };
        sum += u32::from(word);
    }
    while sum > 0xffff {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}
