//! Schema-driven attribute validation.
//!
//! A policy is a table indexed by attribute type. Parsing walks the
//! attribute stream of a generic netlink message, validates each known
//! attribute against its schema entry, and hands back a table of validated
//! [`Attr`] views. Unknown attribute types are skipped, which is what lets
//! old binaries talk to newer kernels.

use tracing::debug;
use zerocopy::FromBytes;

use crate::buffer::Buffer;
use crate::netlink::attr::{Attr, NLA_HDRLEN, NlAttrHdr, nla_align};
use crate::netlink::genl::GENL_HDRLEN;
use crate::netlink::message::NLMSG_HDRLEN;

/// Semantic kind of an attribute, driving its default length rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrKind {
    /// No attribute expected at this type id.
    NoAttr,
    /// Arbitrary payload.
    Unspec,
    U8,
    U16,
    U32,
    U64,
    /// NUL-terminated string with no embedded NUL.
    String,
    /// Presence-only boolean.
    Flag,
    /// Payload is itself a netlink message.
    Nested,
}

impl AttrKind {
    /// Default minimum and maximum payload lengths for this kind.
    fn length_range(self) -> (usize, usize) {
        match self {
            AttrKind::U8 => (1, 1),
            AttrKind::U16 => (2, 2),
            AttrKind::U32 => (4, 4),
            AttrKind::U64 => (8, 8),
            AttrKind::String => (1, usize::MAX),
            AttrKind::Nested => (NLMSG_HDRLEN, usize::MAX),
            AttrKind::NoAttr | AttrKind::Unspec | AttrKind::Flag => (0, usize::MAX),
        }
    }
}

/// One schema entry: how the attribute with this table index is validated.
#[derive(Debug, Clone, Copy)]
pub struct NlPolicy {
    /// Semantic kind.
    pub kind: AttrKind,
    /// Minimum payload length; 0 means the kind's default.
    pub min_len: usize,
    /// Maximum payload length; 0 means the kind's default.
    pub max_len: usize,
    /// Whether the attribute may be absent.
    pub optional: bool,
}

impl NlPolicy {
    /// Entry for a type id that carries nothing.
    pub const NONE: NlPolicy = NlPolicy {
        kind: AttrKind::NoAttr,
        min_len: 0,
        max_len: 0,
        optional: false,
    };

    /// A required attribute of the given kind.
    pub const fn required(kind: AttrKind) -> NlPolicy {
        NlPolicy { kind, min_len: 0, max_len: 0, optional: false }
    }

    /// An optional attribute of the given kind.
    pub const fn optional(kind: AttrKind) -> NlPolicy {
        NlPolicy { kind, min_len: 0, max_len: 0, optional: true }
    }

    fn length_range(&self) -> (usize, usize) {
        let (default_min, default_max) = self.kind.length_range();
        (
            if self.min_len != 0 { self.min_len } else { default_min },
            if self.max_len != 0 { self.max_len } else { default_max },
        )
    }

    fn counts_as_required(&self) -> bool {
        !matches!(self.kind, AttrKind::NoAttr | AttrKind::Flag) && !self.optional
    }
}

/// Parse the generic netlink payload of `msg` as a sequence of attributes
/// validated against `policy`.
///
/// On success, slot `i` of the result holds the first attribute whose type
/// is `i`, or `None` if an optional attribute was absent. Returns `None` if
/// the stream is malformed, a known attribute violates its schema entry, or
/// a required attribute is missing.
pub fn parse<'a>(msg: &'a Buffer, policy: &[NlPolicy]) -> Option<Vec<Option<Attr<'a>>>> {
    let mut attrs: Vec<Option<Attr<'a>>> = vec![None; policy.len()];
    let mut required = policy.iter().filter(|entry| entry.counts_as_required()).count();

    let Some(mut rest) = msg.at(NLMSG_HDRLEN + GENL_HDRLEN, 0) else {
        debug!("message too short for netlink and genl headers");
        return None;
    };
    let mut offset = NLMSG_HDRLEN + GENL_HDRLEN;

    while !rest.is_empty() {
        if rest.len() < NLA_HDRLEN {
            debug!(offset, left = rest.len(), "trailing bytes shorter than an attribute header");
            return None;
        }
        let (hdr, _) = NlAttrHdr::read_from_prefix(rest).expect("header length checked");
        let total = hdr.nla_len as usize;
        if total < NLA_HDRLEN {
            debug!(offset, nla_len = hdr.nla_len, "attribute shorter than its header");
            return None;
        }
        if total > rest.len() {
            debug!(
                offset,
                nla_type = hdr.nla_type,
                nla_len = hdr.nla_len,
                left = rest.len(),
                "attribute overruns the message"
            );
            return None;
        }
        let payload = &rest[NLA_HDRLEN..total];

        let ty = hdr.nla_type as usize;
        if ty < policy.len() && policy[ty].kind != AttrKind::NoAttr {
            let entry = &policy[ty];
            let (min_len, max_len) = entry.length_range();
            if payload.len() < min_len || payload.len() > max_len {
                debug!(
                    offset,
                    nla_type = hdr.nla_type,
                    len = payload.len(),
                    min_len,
                    "attribute length outside allowed range"
                );
                return None;
            }
            if entry.kind == AttrKind::String {
                if payload[payload.len() - 1] != 0 {
                    debug!(offset, nla_type = hdr.nla_type, "string attribute lacks NUL terminator");
                    return None;
                }
                if payload[..payload.len() - 1].contains(&0) {
                    debug!(offset, nla_type = hdr.nla_type, "string attribute has embedded NUL");
                    return None;
                }
            }
            if attrs[ty].is_none() {
                if entry.counts_as_required() {
                    required -= 1;
                }
                attrs[ty] = Some(Attr::new(hdr.nla_type, payload));
            }
        }

        // A trailing attribute may legally omit its final padding.
        let advance = nla_align(total).min(rest.len());
        rest = &rest[advance..];
        offset += advance;
    }

    if required != 0 {
        debug!(required, "required attributes missing");
        return None;
    }
    Some(attrs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netlink::builder;
    use crate::netlink::genl::GenlMsgHdr;
    use crate::netlink::message::{NLM_F_REQUEST, NlMsgHdr};

    fn genl_msg() -> Buffer {
        let mut msg = Buffer::new(0);
        let hdr = NlMsgHdr {
            nlmsg_len: 0,
            nlmsg_type: 0x10,
            nlmsg_flags: NLM_F_REQUEST,
            nlmsg_seq: 1,
            nlmsg_pid: 0,
        };
        builder::put(&mut msg, hdr.as_bytes());
        builder::put(&mut msg, GenlMsgHdr::new(1, 1).as_bytes());
        msg
    }

    #[test]
    fn typed_round_trips() {
        let mut msg = genl_msg();
        builder::put_u8(&mut msg, 1, 0x5a);
        builder::put_u16(&mut msg, 2, 0x1234);
        builder::put_u32(&mut msg, 3, 0xdead_beef);
        builder::put_u64(&mut msg, 4, 0x0123_4567_89ab_cdef);

        let policy = [
            NlPolicy::NONE,
            NlPolicy::required(AttrKind::U8),
            NlPolicy::required(AttrKind::U16),
            NlPolicy::required(AttrKind::U32),
            NlPolicy::required(AttrKind::U64),
        ];
        let attrs = parse(&msg, &policy).expect("well-formed message");
        assert_eq!(attrs[1].unwrap().u8(), 0x5a);
        assert_eq!(attrs[2].unwrap().u16(), 0x1234);
        assert_eq!(attrs[3].unwrap().u32(), 0xdead_beef);
        assert_eq!(attrs[4].unwrap().u64(), 0x0123_4567_89ab_cdef);
    }

    #[test]
    fn string_round_trip() {
        let mut msg = genl_msg();
        builder::put_string(&mut msg, 1, "ovs_datapath");
        let policy = [NlPolicy::NONE, NlPolicy::required(AttrKind::String)];
        let attrs = parse(&msg, &policy).expect("well-formed message");
        assert_eq!(attrs[1].unwrap().string().unwrap(), "ovs_datapath");
    }

    #[test]
    fn nested_round_trip() {
        let mut inner = Buffer::new(0);
        let hdr = NlMsgHdr { nlmsg_type: 18, ..Default::default() };
        builder::put(&mut inner, hdr.as_bytes());
        builder::put_u32(&mut inner, 1, 42);
        let inner_bytes = {
            let mut copy = inner.data().to_vec();
            copy[0..4].copy_from_slice(&(inner.size() as u32).to_ne_bytes());
            copy
        };

        let mut msg = genl_msg();
        builder::put_nested(&mut msg, 1, &mut inner);

        let policy = [NlPolicy::NONE, NlPolicy::required(AttrKind::Nested)];
        let attrs = parse(&msg, &policy).expect("well-formed message");
        assert_eq!(attrs[1].unwrap().payload(), &inner_bytes[..]);
    }

    #[test]
    fn flag_presence() {
        let mut msg = genl_msg();
        builder::put_flag(&mut msg, 2);
        let policy = [
            NlPolicy::NONE,
            NlPolicy { optional: true, ..NlPolicy::required(AttrKind::Flag) },
            NlPolicy::required(AttrKind::Flag),
        ];
        let attrs = parse(&msg, &policy).expect("flags are never required");
        assert!(attrs[1].is_none());
        assert!(attrs[2].is_some());
    }

    #[test]
    fn unknown_types_are_skipped() {
        let mut msg = genl_msg();
        builder::put_u32(&mut msg, 9, 1);
        builder::put_u32(&mut msg, 1, 2);
        let policy = [NlPolicy::NONE, NlPolicy::required(AttrKind::U32)];
        let attrs = parse(&msg, &policy).expect("unknown type 9 skipped");
        assert_eq!(attrs[1].unwrap().u32(), 2);
    }

    #[test]
    fn first_occurrence_wins() {
        let mut msg = genl_msg();
        builder::put_u32(&mut msg, 1, 111);
        builder::put_u32(&mut msg, 1, 222);
        let policy = [NlPolicy::NONE, NlPolicy::required(AttrKind::U32)];
        let attrs = parse(&msg, &policy).unwrap();
        assert_eq!(attrs[1].unwrap().u32(), 111);
    }

    #[test]
    fn missing_required_attribute_fails() {
        let msg = genl_msg();
        let policy = [NlPolicy::NONE, NlPolicy::required(AttrKind::U32)];
        assert!(parse(&msg, &policy).is_none());
    }

    #[test]
    fn optional_attribute_may_be_absent() {
        let msg = genl_msg();
        let policy = [NlPolicy::NONE, NlPolicy::optional(AttrKind::U32)];
        let attrs = parse(&msg, &policy).expect("optional absent is fine");
        assert!(attrs[1].is_none());
    }

    #[test]
    fn runt_attribute_header_fails() {
        let mut msg = genl_msg();
        // nla_len = 3: below the attribute header size.
        msg.put(&3u16.to_ne_bytes());
        msg.put(&1u16.to_ne_bytes());
        let policy = [NlPolicy::NONE, NlPolicy::optional(AttrKind::U32)];
        assert!(parse(&msg, &policy).is_none());
    }

    #[test]
    fn overrunning_attribute_fails() {
        let mut msg = genl_msg();
        // Claims 64 bytes but only the header is present.
        msg.put(&64u16.to_ne_bytes());
        msg.put(&1u16.to_ne_bytes());
        let policy = [NlPolicy::NONE, NlPolicy::optional(AttrKind::U32)];
        assert!(parse(&msg, &policy).is_none());
    }

    #[test]
    fn wrong_length_fails() {
        let mut msg = genl_msg();
        builder::put_u16(&mut msg, 1, 5);
        let policy = [NlPolicy::NONE, NlPolicy::required(AttrKind::U32)];
        assert!(parse(&msg, &policy).is_none());
    }

    #[test]
    fn string_without_terminator_fails() {
        let mut msg = genl_msg();
        builder::put_unspec(&mut msg, 1, b"abc");
        let policy = [NlPolicy::NONE, NlPolicy::required(AttrKind::String)];
        assert!(parse(&msg, &policy).is_none());
    }

    #[test]
    fn string_with_embedded_nul_fails() {
        let mut msg = genl_msg();
        builder::put_unspec(&mut msg, 1, b"a\0c\0");
        let policy = [NlPolicy::NONE, NlPolicy::required(AttrKind::String)];
        assert!(parse(&msg, &policy).is_none());
    }

    #[test]
    fn trailing_unpadded_attribute_is_accepted() {
        let mut msg = genl_msg();
        // A 5-byte string attribute written without its final 3 pad bytes,
        // as some emitters produce for the last attribute.
        msg.put(&9u16.to_ne_bytes());
        msg.put(&1u16.to_ne_bytes());
        msg.put(b"name\0");
        let policy = [NlPolicy::NONE, NlPolicy::required(AttrKind::String)];
        let attrs = parse(&msg, &policy).expect("trailing pad is optional");
        assert_eq!(attrs[1].unwrap().string().unwrap(), "name");
    }

    #[test]
    fn headerless_message_fails() {
        let mut msg = Buffer::new(0);
        msg.put(&[0u8; 8]);
        let policy = [NlPolicy::optional(AttrKind::U32)];
        assert!(parse(&msg, &policy).is_none());
    }
}
