//! Netlink message header, flags, and header accessors.
//!
//! Netlink messages are built and carried in a [`Buffer`]; the functions here
//! read and patch the leading `nlmsghdr` in place. Patch-style writers are
//! what make late finalization possible: `nlmsg_len` is stamped immediately
//! before a message is sent, after every attribute has been appended.

use tracing::error;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::buffer::Buffer;

/// Netlink message header alignment.
pub const NLMSG_ALIGNTO: usize = 4;

/// Align a length to the netlink message boundary.
#[inline]
pub const fn nlmsg_align(len: usize) -> usize {
    (len + NLMSG_ALIGNTO - 1) & !(NLMSG_ALIGNTO - 1)
}

/// Size of the netlink message header.
pub const NLMSG_HDRLEN: usize = nlmsg_align(std::mem::size_of::<NlMsgHdr>());

/// Netlink message header (mirrors `struct nlmsghdr`).
///
/// All fields are host byte order, per netlink convention.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct NlMsgHdr {
    /// Length of message including header.
    pub nlmsg_len: u32,
    /// Message type.
    pub nlmsg_type: u16,
    /// Additional flags.
    pub nlmsg_flags: u16,
    /// Sequence number.
    pub nlmsg_seq: u32,
    /// Sending port ID.
    pub nlmsg_pid: u32,
}

impl NlMsgHdr {
    /// The header as wire bytes.
    pub fn as_bytes(&self) -> &[u8] {
        <Self as IntoBytes>::as_bytes(self)
    }
}

// Standard control message types.
pub const NLMSG_NOOP: u16 = 1;
pub const NLMSG_ERROR: u16 = 2;
pub const NLMSG_DONE: u16 = 3;
pub const NLMSG_OVERRUN: u16 = 4;

// Netlink message flags.
pub const NLM_F_REQUEST: u16 = 0x01;
pub const NLM_F_MULTI: u16 = 0x02;
pub const NLM_F_ACK: u16 = 0x04;
pub const NLM_F_ECHO: u16 = 0x08;

// Modifiers to GET requests.
pub const NLM_F_ROOT: u16 = 0x100;
pub const NLM_F_MATCH: u16 = 0x200;
pub const NLM_F_ATOMIC: u16 = 0x400;
pub const NLM_F_DUMP: u16 = NLM_F_ROOT | NLM_F_MATCH;

// Modifiers to NEW requests.
pub const NLM_F_REPLACE: u16 = 0x100;
pub const NLM_F_EXCL: u16 = 0x200;
pub const NLM_F_CREATE: u16 = 0x400;
pub const NLM_F_APPEND: u16 = 0x800;

/// Read the `nlmsghdr` at the head of `msg`.
///
/// # Panics
///
/// Panics if `msg` is shorter than a header.
pub fn nlmsghdr(msg: &Buffer) -> NlMsgHdr {
    let (hdr, _) = NlMsgHdr::read_from_prefix(msg.at_assert(0, NLMSG_HDRLEN))
        .expect("header length checked");
    hdr
}

/// Patch the `nlmsg_len` field of the header at the head of `msg`.
pub fn set_nlmsg_len(msg: &mut Buffer, len: u32) {
    msg.at_assert(0, NLMSG_HDRLEN);
    msg.data_mut()[0..4].copy_from_slice(&len.to_ne_bytes());
}

/// Patch the `nlmsg_flags` field of the header at the head of `msg`.
pub fn set_nlmsg_flags(msg: &mut Buffer, flags: u16) {
    msg.at_assert(0, NLMSG_HDRLEN);
    msg.data_mut()[6..8].copy_from_slice(&flags.to_ne_bytes());
}

/// Decode `msg` as an error/ACK message.
///
/// Returns `None` if `msg` is not an error message. Otherwise returns the
/// errno it carries: 0 for an ACK, positive errno for a NAK. An error
/// message with a truncated or out-of-range code decodes as `EPROTO`.
///
/// # Panics
///
/// Panics if `msg` is shorter than a header.
pub fn nlmsgerr(msg: &Buffer) -> Option<i32> {
    if nlmsghdr(msg).nlmsg_type != NLMSG_ERROR {
        return None;
    }
    let code = match msg.at(NLMSG_HDRLEN, 4) {
        Some(payload) => {
            i32::from_ne_bytes([payload[0], payload[1], payload[2], payload[3]])
        }
        None => {
            error!(size = msg.size(), "received truncated error message");
            return Some(libc::EPROTO);
        }
    };
    if code <= 0 && code > i32::MIN {
        Some(-code)
    } else {
        Some(libc::EPROTO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn error_msg(seq: u32, code: i32) -> Buffer {
        let mut msg = Buffer::new(64);
        let hdr = NlMsgHdr {
            nlmsg_len: (NLMSG_HDRLEN + 4) as u32,
            nlmsg_type: NLMSG_ERROR,
            nlmsg_flags: 0,
            nlmsg_seq: seq,
            nlmsg_pid: 0,
        };
        msg.put(hdr.as_bytes());
        msg.put(&code.to_ne_bytes());
        msg
    }

    #[test]
    fn header_roundtrip() {
        let mut msg = Buffer::new(64);
        let hdr = NlMsgHdr {
            nlmsg_len: 0,
            nlmsg_type: 18,
            nlmsg_flags: NLM_F_REQUEST,
            nlmsg_seq: 7,
            nlmsg_pid: 99,
        };
        msg.put(hdr.as_bytes());
        set_nlmsg_len(&mut msg, 16);
        set_nlmsg_flags(&mut msg, NLM_F_REQUEST | NLM_F_ACK);
        let read = nlmsghdr(&msg);
        assert_eq!(read.nlmsg_len, 16);
        assert_eq!(read.nlmsg_flags, NLM_F_REQUEST | NLM_F_ACK);
        assert_eq!(read.nlmsg_seq, 7);
        assert_eq!(read.nlmsg_pid, 99);
    }

    #[test]
    fn ack_decodes_to_zero() {
        assert_eq!(nlmsgerr(&error_msg(1, 0)), Some(0));
    }

    #[test]
    fn nak_decodes_to_errno() {
        assert_eq!(nlmsgerr(&error_msg(1, -libc::ENOENT)), Some(libc::ENOENT));
    }

    #[test]
    fn positive_code_coerces_to_proto_error() {
        assert_eq!(nlmsgerr(&error_msg(1, 17)), Some(libc::EPROTO));
    }

    #[test]
    fn int_min_coerces_to_proto_error() {
        assert_eq!(nlmsgerr(&error_msg(1, i32::MIN)), Some(libc::EPROTO));
    }

    #[test]
    fn truncated_error_coerces_to_proto_error() {
        let mut msg = Buffer::new(32);
        let hdr = NlMsgHdr {
            nlmsg_len: NLMSG_HDRLEN as u32,
            nlmsg_type: NLMSG_ERROR,
            ..Default::default()
        };
        msg.put(hdr.as_bytes());
        assert_eq!(nlmsgerr(&msg), Some(libc::EPROTO));
    }

    #[test]
    fn non_error_message_is_none() {
        let mut msg = Buffer::new(32);
        let hdr = NlMsgHdr {
            nlmsg_len: NLMSG_HDRLEN as u32,
            nlmsg_type: 18,
            ..Default::default()
        };
        msg.put(hdr.as_bytes());
        assert_eq!(nlmsgerr(&msg), None);
    }
}
