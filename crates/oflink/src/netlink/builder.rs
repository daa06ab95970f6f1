//! Netlink message construction.
//!
//! Messages are laid out directly into a [`Buffer`]: a header first, then a
//! sequence of aligned attributes. `nlmsg_len` is left at zero here and
//! finalized by the socket immediately before the message hits the wire, so
//! attributes can be appended freely after the header is placed.

use crate::buffer::Buffer;
use crate::netlink::attr::{NLA_HDRLEN, NlAttrHdr, nla_align};
use crate::netlink::genl::{GENL_HDRLEN, GenlMsgHdr};
use crate::netlink::message::{NLMSG_HDRLEN, NlMsgHdr, nlmsg_align, nlmsghdr, set_nlmsg_len};
use crate::netlink::socket::{NlSock, next_seq};

/// Ensure `msg` has room for `size` more bytes plus netlink padding.
pub fn reserve(msg: &mut Buffer, size: usize) {
    msg.reserve_tailroom(nlmsg_align(size));
}

/// Place a `nlmsghdr` at the start of `msg`, which must be empty.
///
/// The header takes a fresh process-wide sequence number and the PID of
/// `sock`, so replies route back to it. `expected_payload` is a sizing hint;
/// zero is fine when the payload size is unknown. `nlmsg_len` is finalized
/// at send time.
///
/// # Panics
///
/// Panics if `msg` is not empty.
pub fn put_nlmsghdr(msg: &mut Buffer, sock: &NlSock, expected_payload: usize, ty: u16, flags: u16) {
    assert!(msg.is_empty(), "header must be placed before any payload");
    reserve(msg, NLMSG_HDRLEN + expected_payload);
    let hdr = NlMsgHdr {
        nlmsg_len: 0,
        nlmsg_type: ty,
        nlmsg_flags: flags,
        nlmsg_seq: next_seq(),
        nlmsg_pid: sock.pid(),
    };
    put(msg, hdr.as_bytes());
}

/// Place a `nlmsghdr` and a `genlmsghdr` at the start of `msg`, which must
/// be empty.
///
/// `family` is the numeric family id, resolved through
/// [`genl::FamilyCache`](crate::netlink::genl::FamilyCache) for dynamic
/// families. `cmd` and `version` are family-specific.
pub fn put_genlmsghdr(
    msg: &mut Buffer,
    sock: &NlSock,
    expected_payload: usize,
    family: u16,
    flags: u16,
    cmd: u8,
    version: u8,
) {
    put_nlmsghdr(msg, sock, GENL_HDRLEN + expected_payload, family, flags);
    debug_assert_eq!(msg.size(), NLMSG_HDRLEN);
    put(msg, GenlMsgHdr::new(cmd, version).as_bytes());
}

/// Append `size` bytes plus netlink padding to `msg` and return the new
/// region for the caller to fill. Padding bytes are zeroed.
pub fn put_uninit(msg: &mut Buffer, size: usize) -> &mut [u8] {
    let padded = nlmsg_align(size);
    let region = msg.put_uninit(padded);
    region[size..].fill(0);
    &mut region[..size]
}

/// Append a copy of `data` plus netlink padding to `msg`.
pub fn put(msg: &mut Buffer, data: &[u8]) {
    put_uninit(msg, data.len()).copy_from_slice(data);
}

/// Append an attribute header with room for `size` payload bytes and return
/// the payload region for the caller to fill.
///
/// # Panics
///
/// Panics if the aligned attribute would not fit in the 16-bit length field.
pub fn put_unspec_uninit(msg: &mut Buffer, ty: u16, size: usize) -> &mut [u8] {
    let total = NLA_HDRLEN + size;
    assert!(nla_align(total) <= u16::MAX as usize, "attribute payload of {size} bytes too large");
    let region = put_uninit(msg, total);
    region[..NLA_HDRLEN].copy_from_slice(NlAttrHdr::new(ty, size).as_bytes());
    &mut region[NLA_HDRLEN..]
}

/// Append an attribute of the given `ty` with `data` as its payload.
pub fn put_unspec(msg: &mut Buffer, ty: u16, data: &[u8]) {
    put_unspec_uninit(msg, ty, data.len()).copy_from_slice(data);
}

/// Append an attribute with no payload. Some families use bare presence as
/// a boolean flag.
pub fn put_flag(msg: &mut Buffer, ty: u16) {
    put_unspec(msg, ty, &[]);
}

/// Append an 8-bit attribute.
pub fn put_u8(msg: &mut Buffer, ty: u16, value: u8) {
    put_unspec(msg, ty, &value.to_ne_bytes());
}

/// Append a 16-bit attribute, host byte order.
pub fn put_u16(msg: &mut Buffer, ty: u16, value: u16) {
    put_unspec(msg, ty, &value.to_ne_bytes());
}

/// Append a 32-bit attribute, host byte order.
pub fn put_u32(msg: &mut Buffer, ty: u16, value: u32) {
    put_unspec(msg, ty, &value.to_ne_bytes());
}

/// Append a 64-bit attribute, host byte order.
pub fn put_u64(msg: &mut Buffer, ty: u16, value: u64) {
    put_unspec(msg, ty, &value.to_ne_bytes());
}

/// Append a string attribute with its NUL terminator.
pub fn put_string(msg: &mut Buffer, ty: u16, value: &str) {
    debug_assert!(!value.as_bytes().contains(&0));
    let payload = put_unspec_uninit(msg, ty, value.len() + 1);
    payload[..value.len()].copy_from_slice(value.as_bytes());
    payload[value.len()] = 0;
}

/// Append `nested` as the payload of an attribute of the given `ty`,
/// finalizing the nested message's own `nlmsg_len` first.
pub fn put_nested(msg: &mut Buffer, ty: u16, nested: &mut Buffer) {
    set_nlmsg_len(nested, nested.size() as u32);
    put_unspec(msg, ty, nested.data());
}

/// Read back the sequence number stamped into `msg` by
/// [`put_nlmsghdr`].
pub fn seq(msg: &Buffer) -> u32 {
    nlmsghdr(msg).nlmsg_seq
}
