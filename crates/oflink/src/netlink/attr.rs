//! Netlink attribute (`nlattr`) wire format.
//!
//! Attributes are TLV records: a 4-byte header carrying the total length
//! (header included, unaligned) and the type, followed by the payload and
//! zero padding up to a 4-byte boundary.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::error::{Error, Result};

/// Netlink attribute alignment.
pub const NLA_ALIGNTO: usize = 4;

/// Align a length to the attribute boundary.
#[inline]
pub const fn nla_align(len: usize) -> usize {
    (len + NLA_ALIGNTO - 1) & !(NLA_ALIGNTO - 1)
}

/// Size of the attribute header.
pub const NLA_HDRLEN: usize = 4;

/// Netlink attribute header (mirrors `struct nlattr`).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct NlAttrHdr {
    /// Total length including this header, unaligned.
    pub nla_len: u16,
    /// Attribute type.
    pub nla_type: u16,
}

impl NlAttrHdr {
    /// Create a header for `payload_len` bytes of payload.
    pub fn new(nla_type: u16, payload_len: usize) -> Self {
        Self {
            nla_len: (NLA_HDRLEN + payload_len) as u16,
            nla_type,
        }
    }

    /// The header as wire bytes.
    pub fn as_bytes(&self) -> &[u8] {
        <Self as IntoBytes>::as_bytes(self)
    }
}

/// A validated attribute: its type and a view of its payload.
///
/// Produced by [`policy::parse`](crate::netlink::policy::parse), which has
/// already checked each payload against the schema's length rules. The typed
/// accessors therefore assert rather than return errors, like the bounds
/// checks on [`Buffer::at_assert`](crate::buffer::Buffer::at_assert).
#[derive(Debug, Clone, Copy)]
pub struct Attr<'a> {
    ty: u16,
    payload: &'a [u8],
}

impl<'a> Attr<'a> {
    pub(crate) fn new(ty: u16, payload: &'a [u8]) -> Self {
        Self { ty, payload }
    }

    /// The attribute type.
    pub fn ty(&self) -> u16 {
        self.ty
    }

    /// The raw payload, padding excluded.
    pub fn payload(&self) -> &'a [u8] {
        self.payload
    }

    /// The payload length in bytes.
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// The 8-bit value in the payload.
    ///
    /// # Panics
    ///
    /// Panics if the payload is shorter than 1 byte.
    pub fn u8(&self) -> u8 {
        self.payload[0]
    }

    /// The 16-bit value in the payload, host byte order.
    ///
    /// # Panics
    ///
    /// Panics if the payload is shorter than 2 bytes.
    pub fn u16(&self) -> u16 {
        u16::from_ne_bytes([self.payload[0], self.payload[1]])
    }

    /// The 32-bit value in the payload, host byte order.
    ///
    /// # Panics
    ///
    /// Panics if the payload is shorter than 4 bytes.
    pub fn u32(&self) -> u32 {
        u32::from_ne_bytes([self.payload[0], self.payload[1], self.payload[2], self.payload[3]])
    }

    /// The 64-bit value in the payload, host byte order.
    ///
    /// # Panics
    ///
    /// Panics if the payload is shorter than 8 bytes.
    pub fn u64(&self) -> u64 {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&self.payload[..8]);
        u64::from_ne_bytes(bytes)
    }

    /// The NUL-terminated string in the payload, terminator stripped.
    ///
    /// The schema guarantees termination; UTF-8 validity is checked here
    /// because the kernel does not promise it.
    pub fn string(&self) -> Result<&'a str> {
        let bytes = &self.payload[..self.payload.len() - 1];
        std::str::from_utf8(bytes)
            .map_err(|err| Error::InvalidMessage(format!("attribute string is not UTF-8: {err}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alignment() {
        assert_eq!(nla_align(0), 0);
        assert_eq!(nla_align(1), 4);
        assert_eq!(nla_align(4), 4);
        assert_eq!(nla_align(5), 8);
    }

    #[test]
    fn header_length_is_unaligned() {
        let hdr = NlAttrHdr::new(3, 5);
        assert_eq!(hdr.nla_len, 9);
        assert_eq!(hdr.nla_type, 3);
    }

    #[test]
    fn typed_accessors() {
        assert_eq!(Attr::new(1, &[0x5a]).u8(), 0x5a);
        assert_eq!(Attr::new(1, &0xbeef_u16.to_ne_bytes()).u16(), 0xbeef);
        assert_eq!(Attr::new(1, &0xdead_beef_u32.to_ne_bytes()).u32(), 0xdead_beef);
        let value = 0x0123_4567_89ab_cdef_u64;
        assert_eq!(Attr::new(1, &value.to_ne_bytes()).u64(), value);
    }

    #[test]
    fn string_strips_terminator() {
        let attr = Attr::new(2, b"name\0");
        assert_eq!(attr.string().unwrap(), "name");
    }
}
