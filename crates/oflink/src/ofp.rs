//! OpenFlow framing header.
//!
//! Every OpenFlow message begins with a fixed 8-byte header whose `length`
//! field (network byte order, inclusive of the header) frames the stream.
//! The transport layer cares only about this header; message semantics live
//! above it.

use std::mem;

use zerocopy::byteorder::network_endian::{U16, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

/// Default TCP port an OpenFlow controller listens on.
pub const OFP_TCP_PORT: u16 = 6633;

/// Protocol version stamped into outgoing headers.
pub const OFP_VERSION: u8 = 1;

// Message types used by the connection layer itself.
pub const OFPT_HELLO: u8 = 0;
pub const OFPT_ERROR: u8 = 1;
pub const OFPT_ECHO_REQUEST: u8 = 2;
pub const OFPT_ECHO_REPLY: u8 = 3;

/// Fixed prefix of every OpenFlow message.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct OfpHeader {
    /// Protocol version.
    pub version: u8,
    /// Message type.
    pub msg_type: u8,
    /// Total frame length including this header, network byte order.
    pub length: U16,
    /// Transaction id echoed by replies.
    pub xid: U32,
}

/// Size of the OpenFlow header in bytes.
pub const OFP_HEADER_LEN: usize = mem::size_of::<OfpHeader>();

impl OfpHeader {
    /// Create a header for a frame of `length` total bytes.
    pub fn new(msg_type: u8, length: u16, xid: u32) -> Self {
        Self {
            version: OFP_VERSION,
            msg_type,
            length: U16::new(length),
            xid: U32::new(xid),
        }
    }

    /// Frame length as a host-order byte count.
    pub fn length(&self) -> usize {
        self.length.get() as usize
    }

    /// Parse a header from the start of `data`.
    ///
    /// Returns `None` if the slice is too short.
    pub fn from_bytes(data: &[u8]) -> Option<&Self> {
        Self::ref_from_prefix(data).map(|(hdr, _)| hdr).ok()
    }

    /// The header as wire bytes.
    pub fn as_bytes(&self) -> &[u8] {
        <Self as IntoBytes>::as_bytes(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_is_eight_bytes() {
        assert_eq!(OFP_HEADER_LEN, 8);
    }

    #[test]
    fn length_is_network_order() {
        let hdr = OfpHeader::new(OFPT_HELLO, 0x1234, 7);
        let bytes = hdr.as_bytes();
        assert_eq!(bytes[2], 0x12);
        assert_eq!(bytes[3], 0x34);
        let parsed = OfpHeader::from_bytes(bytes).unwrap();
        assert_eq!(parsed.length(), 0x1234);
        assert_eq!(parsed.xid.get(), 7);
    }

    #[test]
    fn from_bytes_rejects_runt() {
        assert!(OfpHeader::from_bytes(&[1, 0, 0]).is_none());
    }
}
