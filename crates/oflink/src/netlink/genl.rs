//! Generic netlink: control family constants and family-name resolution.
//!
//! Generic netlink multiplexes many kernel subsystems over one protocol;
//! clients resolve a string family name (e.g. the datapath module's name)
//! to a numeric id through the fixed control family before they can talk to
//! it. Resolution results, including failures, are cached, since a family
//! id is stable for the lifetime of the module that registered it.

use std::collections::HashMap;
use std::mem;
use std::sync::RwLock;

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::buffer::Buffer;
use crate::error::{Error, Result};
use crate::netlink::builder;
use crate::netlink::message::{NLM_F_REQUEST, NLMSG_HDRLEN};
use crate::netlink::policy::{AttrKind, NlPolicy, parse};
use crate::netlink::socket::{NlSock, Protocol};

/// Fixed id of the generic netlink control family.
pub const GENL_ID_CTRL: u16 = 0x10;

/// Control family commands.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CtrlCmd {
    Unspec = 0,
    NewFamily = 1,
    DelFamily = 2,
    GetFamily = 3,
}

/// Control family attributes.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CtrlAttr {
    Unspec = 0,
    FamilyId = 1,
    FamilyName = 2,
    Version = 3,
    HdrSize = 4,
    MaxAttr = 5,
}

/// Generic netlink message header, immediately after the `nlmsghdr`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct GenlMsgHdr {
    /// Command identifier, family-specific.
    pub cmd: u8,
    /// Interface version.
    pub version: u8,
    /// Reserved, always zero.
    pub reserved: u16,
}

/// Size of the generic netlink header in bytes.
pub const GENL_HDRLEN: usize = mem::size_of::<GenlMsgHdr>();

impl GenlMsgHdr {
    /// Create a header with the given command and version.
    #[inline]
    pub const fn new(cmd: u8, version: u8) -> Self {
        Self { cmd, version, reserved: 0 }
    }

    /// The header as wire bytes.
    pub fn as_bytes(&self) -> &[u8] {
        <Self as IntoBytes>::as_bytes(self)
    }
}

/// Read the `genlmsghdr` just past the `nlmsghdr` of `msg`.
///
/// Returns `None` if `msg` is too short to contain both headers.
pub fn genlmsghdr(msg: &Buffer) -> Option<GenlMsgHdr> {
    let slice = msg.at(NLMSG_HDRLEN, GENL_HDRLEN)?;
    GenlMsgHdr::read_from_prefix(slice).map(|(hdr, _)| hdr).ok()
}

const FAMILY_POLICY: [NlPolicy; 2] = [NlPolicy::NONE, NlPolicy::required(AttrKind::U16)];

fn family_id_from_reply(reply: &Buffer) -> Result<u16> {
    let attrs = parse(reply, &FAMILY_POLICY)
        .ok_or_else(|| Error::InvalidMessage("malformed family lookup reply".to_string()))?;
    let id = attrs[CtrlAttr::FamilyId as usize]
        .expect("required by policy")
        .u16();
    if id == 0 {
        return Err(Error::InvalidMessage("kernel reported family id 0".to_string()));
    }
    Ok(id)
}

/// Resolve a generic netlink family name to its numeric id with a one-shot
/// `CTRL_CMD_GETFAMILY` transaction on a fresh socket.
///
/// Most callers want [`FamilyCache::lookup`] instead.
pub async fn resolve_family(name: &str) -> Result<u16> {
    let sock = NlSock::new(Protocol::Generic)?;
    let mut request = Buffer::new(0);
    builder::put_genlmsghdr(
        &mut request,
        &sock,
        0,
        GENL_ID_CTRL,
        NLM_F_REQUEST,
        CtrlCmd::GetFamily as u8,
        1,
    );
    builder::put_string(&mut request, CtrlAttr::FamilyName as u16, name);

    let reply = sock
        .transact(&mut request)
        .await?
        .ok_or_else(|| Error::InvalidMessage("family lookup got a bare ACK".to_string()))?;
    family_id_from_reply(&reply)
}

/// Memoized family-name resolution.
///
/// The first lookup of a name performs the kernel round trip; every later
/// lookup of that name, successful or not, is answered from the cache
/// without I/O.
#[derive(Default)]
pub struct FamilyCache {
    cache: RwLock<HashMap<String, std::result::Result<u16, i32>>>,
}

impl FamilyCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve `name`, consulting the cache first.
    pub async fn lookup(&self, name: &str) -> Result<u16> {
        if let Some(cached) = self.cache.read().unwrap().get(name) {
            return match *cached {
                Ok(id) => Ok(id),
                Err(errno) => Err(Error::kernel(errno)),
            };
        }

        let result = resolve_family(name).await;
        let cached = match &result {
            Ok(id) => Ok(*id),
            Err(err) => Err(err.raw_os_error().unwrap_or(libc::EPROTO)),
        };
        self.cache.write().unwrap().insert(name.to_string(), cached);
        result
    }
}

impl std::fmt::Debug for FamilyCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FamilyCache")
            .field("entries", &self.cache.read().map(|cache| cache.len()).unwrap_or(0))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netlink::message::NlMsgHdr;

    fn family_reply(name: &str, id: u16) -> Buffer {
        let mut reply = Buffer::new(0);
        let hdr = NlMsgHdr {
            nlmsg_len: 0,
            nlmsg_type: GENL_ID_CTRL,
            nlmsg_flags: 0,
            nlmsg_seq: 1,
            nlmsg_pid: 0,
        };
        builder::put(&mut reply, hdr.as_bytes());
        builder::put(&mut reply, GenlMsgHdr::new(CtrlCmd::NewFamily as u8, 1).as_bytes());
        builder::put_string(&mut reply, CtrlAttr::FamilyName as u16, name);
        builder::put_u16(&mut reply, CtrlAttr::FamilyId as u16, id);
        builder::put_u32(&mut reply, CtrlAttr::Version as u16, 1);
        reply
    }

    #[test]
    fn genl_header_is_four_bytes() {
        assert_eq!(GENL_HDRLEN, 4);
    }

    #[test]
    fn genlmsghdr_reads_past_nlmsghdr() {
        let reply = family_reply("ovs_datapath", 0x1234);
        let genl = genlmsghdr(&reply).unwrap();
        assert_eq!(genl.cmd, CtrlCmd::NewFamily as u8);
        assert_eq!(genl.version, 1);

        let runt = Buffer::new(0);
        assert!(genlmsghdr(&runt).is_none());
    }

    #[test]
    fn family_reply_parses_to_id() {
        let reply = family_reply("ovs_datapath", 0x1234);
        assert_eq!(family_id_from_reply(&reply).unwrap(), 0x1234);
    }

    #[test]
    fn family_id_zero_is_rejected() {
        let reply = family_reply("ovs_datapath", 0);
        assert!(family_id_from_reply(&reply).is_err());
    }

    #[test]
    fn reply_without_id_is_rejected() {
        let mut reply = Buffer::new(0);
        let hdr = NlMsgHdr { nlmsg_type: GENL_ID_CTRL, ..Default::default() };
        builder::put(&mut reply, hdr.as_bytes());
        builder::put(&mut reply, GenlMsgHdr::new(CtrlCmd::NewFamily as u8, 1).as_bytes());
        builder::put_string(&mut reply, CtrlAttr::FamilyName as u16, "ovs_datapath");
        assert!(family_id_from_reply(&reply).is_err());
    }

    #[tokio::test]
    async fn cache_hits_short_circuit() {
        let cache = FamilyCache::new();
        cache
            .cache
            .write()
            .unwrap()
            .insert("ovs_datapath".to_string(), Ok(0x1234));
        cache
            .cache
            .write()
            .unwrap()
            .insert("ovs_missing".to_string(), Err(libc::ENOENT));

        // Both answers come straight from the cache; no socket is opened.
        assert_eq!(cache.lookup("ovs_datapath").await.unwrap(), 0x1234);
        let err = cache.lookup("ovs_missing").await.unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::ENOENT));
    }
}
