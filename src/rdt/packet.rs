use std::fmt;

use bitflags::bitflags;

use super::{HEADER_LEN, MSS};

bitflags! {
    /// Control bits carried in the header's flag byte. Bits outside this set
    /// are masked out on decode.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Flags: u8 {
        const ACK = 0b001;
        const SYN = 0b010;
        const FIN = 0b100;
    }
}

/// One on-the-wire segment: `seq:4 BE | flags:1 | payload:0..MSS`.
///
/// For data segments `seq` is the byte offset of the payload within the
/// sender's stream; for pure ACKs it is the receiver's cumulative
/// next-expected offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub seq: u32,
    pub flags: Flags,
    pub payload: Vec<u8>,
}

impl Packet {
    pub fn data(seq: u32, payload: &[u8]) -> Packet {
        debug_assert!(payload.len() <= MSS);

        Packet {
            seq,
            flags: Flags::empty(),
            payload: payload.to_vec(),
        }
    }

    pub fn ack(seq: u32) -> Packet {
        Packet {
            seq,
            flags: Flags::ACK,
            payload: Vec::new(),
        }
    }

    /// Bare SYN opening a connection; the payload carries the recovery mode.
    pub fn syn(payload: Vec<u8>) -> Packet {
        Packet {
            seq: 0,
            flags: Flags::SYN,
            payload,
        }
    }

    pub fn fin(seq: u32) -> Packet {
        Packet {
            seq,
            flags: Flags::FIN,
            payload: Vec::new(),
        }
    }

    /// Payload-less control segment with the given flag combination.
    pub fn control(flags: Flags) -> Packet {
        Packet {
            seq: 0,
            flags,
            payload: Vec::new(),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_LEN + self.payload.len());
        buf.extend_from_slice(&self.seq.to_be_bytes());
        buf.push(self.flags.bits());
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Parses one datagram. Anything shorter than the header is rejected.
    pub fn decode(buf: &[u8]) -> Option<Packet> {
        if buf.len() < HEADER_LEN {
            return None;
        }

        let seq = u32::from_be_bytes(buf[..4].try_into().unwrap());
        let flags = Flags::from_bits_truncate(buf[4]);

        Some(Packet {
            seq,
            flags,
            payload: buf[HEADER_LEN..].to_vec(),
        })
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "seq={} flags={:?} len={}",
            self.seq,
            self.flags,
            self.payload.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_data() {
        let packet = Packet::data(7, b"hello");
        assert_eq!(Packet::decode(&packet.encode()), Some(packet));
    }

    #[test]
    fn round_trip_empty_payload() {
        let packet = Packet::ack(4096);
        let wire = packet.encode();
        assert_eq!(wire.len(), HEADER_LEN);
        assert_eq!(Packet::decode(&wire), Some(packet));
    }

    #[test]
    fn round_trip_full_segment() {
        let packet = Packet::data(0, &vec![0xA5; MSS]);
        assert_eq!(Packet::decode(&packet.encode()), Some(packet));
    }

    #[test]
    fn rejects_truncated_header() {
        assert_eq!(Packet::decode(&[0, 0, 0, 1]), None);
        assert_eq!(Packet::decode(&[]), None);
    }

    #[test]
    fn masks_unknown_flag_bits() {
        let wire = [0, 0, 0, 0, 0b1111_1011];
        let packet = Packet::decode(&wire).unwrap();
        assert_eq!(packet.flags, Flags::ACK | Flags::SYN);
    }

    #[test]
    fn seq_is_big_endian() {
        let wire = Packet::data(0x0102_0304, b"").encode();
        assert_eq!(&wire[..4], &[1, 2, 3, 4]);
    }
}
