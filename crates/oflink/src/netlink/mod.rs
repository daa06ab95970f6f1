//! Netlink transport: wire codec, sockets, and reliable transactions.
//!
//! This is the kernel-facing half of the control plane. Messages are built
//! into a [`Buffer`](crate::buffer::Buffer) with the [`builder`] functions,
//! sent over an [`NlSock`], and parsed on the way back with a
//! [`policy`](crate::netlink::policy) schema:
//!
//! ```ignore
//! use oflink::Buffer;
//! use oflink::netlink::{builder, genl, message, policy};
//! use oflink::netlink::{NlSock, Protocol};
//!
//! let families = genl::FamilyCache::new();
//! let datapath = families.lookup("ovs_datapath").await?;
//!
//! let sock = NlSock::new(Protocol::Generic)?;
//! let mut request = Buffer::new(0);
//! builder::put_genlmsghdr(&mut request, &sock, 0, datapath, message::NLM_F_REQUEST, 1, 1);
//! builder::put_u32(&mut request, 1, ifindex);
//! let reply = sock.transact(&mut request).await?;
//! ```

pub mod attr;
pub mod builder;
pub mod genl;
pub mod message;
pub mod policy;
mod socket;

pub use attr::{Attr, NlAttrHdr};
pub use message::{NLMSG_HDRLEN, NlMsgHdr};
pub use policy::{AttrKind, NlPolicy};
pub use socket::{NlSock, Protocol, SockOptions};
