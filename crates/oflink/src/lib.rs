//! Control-plane transport core for an OpenFlow software switch.
//!
//! Two tightly coupled subsystems move structured messages between the
//! switch process and its peers:
//!
//! - **Kernel side**: a netlink/generic-netlink codec and socket layer with
//!   reliable request/reply transactions ([`netlink`]).
//! - **Controller side**: polymorphic "virtual connections" carrying
//!   length-framed OpenFlow messages over a stream transport ([`vconn`]).
//!
//! Both sides exchange messages through the same owned byte carrier,
//! [`Buffer`], and the same non-blocking readiness model on top of tokio.
//!
//! # Talking to the kernel
//!
//! ```ignore
//! use oflink::Buffer;
//! use oflink::netlink::{NlSock, Protocol, builder, genl, message};
//!
//! let families = genl::FamilyCache::new();
//! let family = families.lookup("ovs_datapath").await?;
//!
//! let sock = NlSock::new(Protocol::Generic)?;
//! let mut request = Buffer::new(0);
//! builder::put_genlmsghdr(&mut request, &sock, 0, family, message::NLM_F_REQUEST, 1, 1);
//! let reply = sock.transact(&mut request).await?;
//! ```
//!
//! # Talking to a controller
//!
//! ```ignore
//! let mut vconn = oflink::vconn::open("tcp:127.0.0.1:6633").await?;
//! let hello = oflink::vconn::recv(&mut *vconn).await?;
//! oflink::vconn::send(&mut *vconn, reply).await?;
//! ```

pub mod buffer;
pub mod error;
pub mod netlink;
pub mod ofp;
pub mod vconn;

pub use buffer::Buffer;
pub use error::{Error, Result};
