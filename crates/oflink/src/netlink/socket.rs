//! Netlink sockets with reliable request/reply transactions.
//!
//! Bare netlink is a lossy datagram channel: the kernel drops replies under
//! receive-buffer pressure and signals the drop with `ENOBUFS` on the next
//! read. [`NlSock::transact`] layers reliable delivery on top by resending
//! the request (which must therefore be idempotent) and filtering replies by
//! sequence number.
//!
//! Two pieces of state are process-wide. Sequence numbers are unique across
//! all sockets to close a race: a reply that outlives its socket and lands
//! on a reused PID cannot be mistaken for a current reply. PIDs themselves
//! are structured, the low 22 bits from the Unix process id and the high 10
//! bits from a per-process slot, so every socket in the process binds a
//! distinct address while staying recognizable in traces.

use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::process;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

use netlink_sys::{Socket, SocketAddr, protocols};
use tokio::io::Interest;
use tokio::io::unix::AsyncFd;
use tracing::{debug, error};

use crate::buffer::Buffer;
use crate::error::{Error, Result};
use crate::netlink::message::{NLM_F_ACK, NLMSG_HDRLEN, nlmsgerr, nlmsghdr, set_nlmsg_flags, set_nlmsg_len};

/// Netlink protocol families.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// Routing/device hook.
    Route,
    /// Generic netlink.
    Generic,
}

impl Protocol {
    fn as_isize(self) -> isize {
        match self {
            Protocol::Route => protocols::NETLINK_ROUTE,
            Protocol::Generic => protocols::NETLINK_GENERIC,
        }
    }
}

/// Socket creation options.
#[derive(Debug, Clone, Copy, Default)]
pub struct SockOptions {
    /// Multicast group to subscribe to; 0 for none. Groups 1–32 join
    /// through the legacy bind mask, higher groups through
    /// `NETLINK_ADD_MEMBERSHIP`.
    pub multicast_group: u32,
    /// SO_SNDBUF override; 0 keeps the kernel default.
    pub so_sndbuf: usize,
    /// SO_RCVBUF override; 0 keeps the kernel default.
    pub so_rcvbuf: usize,
}

// How many PID bits are per-socket and how many come from the process id.
const SOCKET_BITS: u32 = 10;
const MAX_SOCKETS: usize = 1 << SOCKET_BITS;
const PROCESS_BITS: u32 = 32 - SOCKET_BITS;
const PROCESS_MASK: u32 = (1u32 << PROCESS_BITS) - 1;

/// Bit vector of in-use per-process socket slots.
static TAKEN_SLOTS: Mutex<[u32; MAX_SOCKETS / 32]> = Mutex::new([0; MAX_SOCKETS / 32]);

/// Process-wide sequence counter, seeded on first use.
static NEXT_SEQ: OnceLock<AtomicU32> = OnceLock::new();

/// Take the next process-wide sequence number. Strictly monotonic
/// (mod 2^32) for the lifetime of the process.
pub(crate) fn next_seq() -> u32 {
    let counter = NEXT_SEQ.get_or_init(|| {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs() as u32)
            .unwrap_or(0);
        AtomicU32::new(process::id() ^ now)
    });
    counter.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
}

fn alloc_pid() -> Result<u32> {
    let mut slots = TAKEN_SLOTS.lock().unwrap();
    for slot in 0..MAX_SOCKETS {
        let (word, bit) = (slot / 32, 1u32 << (slot % 32));
        if slots[word] & bit == 0 {
            slots[word] |= bit;
            return Ok((process::id() & PROCESS_MASK) | ((slot as u32) << PROCESS_BITS));
        }
    }
    error!("netlink pid space exhausted");
    Err(Error::Io(io::Error::from_raw_os_error(libc::ENOBUFS)))
}

fn free_pid(pid: u32) {
    let slot = (pid >> PROCESS_BITS) as usize;
    let mut slots = TAKEN_SLOTS.lock().unwrap();
    debug_assert!(slots[slot / 32] & (1 << (slot % 32)) != 0);
    slots[slot / 32] &= !(1 << (slot % 32));
}

/// A PID slot that returns itself to the pool when dropped, so constructor
/// failures after allocation cannot leak slots.
#[derive(Debug)]
struct PidSlot(u32);

impl PidSlot {
    fn alloc() -> Result<Self> {
        alloc_pid().map(PidSlot)
    }

    fn get(&self) -> u32 {
        self.0
    }
}

impl Drop for PidSlot {
    fn drop(&mut self) {
        free_pid(self.0);
    }
}

fn set_buffer_size(fd: RawFd, option: libc::c_int, size: usize) -> io::Result<()> {
    let value = size as libc::c_int;
    // SAFETY: fd is a valid open socket and value outlives the call.
    let rc = unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            option,
            (&value as *const libc::c_int).cast(),
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// A netlink socket bound to a process-unique PID and connected to the
/// kernel.
pub struct NlSock {
    fd: AsyncFd<Socket>,
    pid: PidSlot,
    protocol: Protocol,
}

impl NlSock {
    /// Create a socket for `protocol` with default options.
    pub fn new(protocol: Protocol) -> Result<Self> {
        Self::create(protocol, &SockOptions::default())
    }

    /// Create a socket for `protocol`.
    pub fn create(protocol: Protocol, options: &SockOptions) -> Result<Self> {
        let mut socket = Socket::new(protocol.as_isize())?;
        let pid = PidSlot::alloc()?;

        if options.so_sndbuf != 0 {
            set_buffer_size(socket.as_raw_fd(), libc::SO_SNDBUF, options.so_sndbuf)?;
        }
        if options.so_rcvbuf != 0 {
            set_buffer_size(socket.as_raw_fd(), libc::SO_RCVBUF, options.so_rcvbuf)?;
        }

        let groups = match options.multicast_group {
            1..=32 => 1u32 << (options.multicast_group - 1),
            _ => 0,
        };
        socket.bind(&SocketAddr::new(pid.get(), groups))?;

        // The peer is always the kernel.
        socket.connect(&SocketAddr::new(0, 0))?;

        if options.multicast_group > 32 {
            socket.add_membership(options.multicast_group)?;
        }

        socket.set_non_blocking(true)?;
        let fd = AsyncFd::new(socket)?;

        Ok(Self { fd, pid, protocol })
    }

    /// The netlink PID this socket is bound to.
    pub fn pid(&self) -> u32 {
        self.pid.get()
    }

    /// The protocol family.
    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Send `msg`, waiting for socket buffer space. `nlmsg_len` is
    /// finalized to the buffer size before the message goes out.
    pub async fn send(&self, msg: &mut Buffer) -> Result<()> {
        set_nlmsg_len(msg, msg.size() as u32);
        loop {
            let mut guard = self.fd.ready(Interest::WRITABLE).await?;
            match guard.try_io(|inner| send_datagram(inner.get_ref(), msg.data())) {
                Ok(result) => {
                    result?;
                    return Ok(());
                }
                Err(_would_block) => continue,
            }
        }
    }

    /// Like [`send`](Self::send), but fails with `WouldBlock` instead of
    /// waiting when the send buffer is full.
    pub fn try_send(&self, msg: &mut Buffer) -> Result<()> {
        set_nlmsg_len(msg, msg.size() as u32);
        send_datagram(self.fd.get_ref(), msg.data())?;
        Ok(())
    }

    /// Receive one message, waiting until one is ready. The returned buffer
    /// holds exactly the datagram and is owned by the caller.
    pub async fn recv(&self) -> Result<Buffer> {
        loop {
            let mut guard = self.fd.ready(Interest::READABLE).await?;
            match guard.try_io(|inner| recv_datagram(inner.get_ref())) {
                Ok(result) => return validate(result?),
                Err(_would_block) => continue,
            }
        }
    }

    /// Like [`recv`](Self::recv), but fails with `WouldBlock` instead of
    /// waiting when the receive queue is empty.
    pub fn try_recv(&self) -> Result<Buffer> {
        validate(recv_datagram(self.fd.get_ref())?)
    }

    /// Send `request` and wait for its reply, resending on kernel-side
    /// drops.
    ///
    /// `NLM_F_ACK` is forced onto the request so even fire-and-forget
    /// message types produce a reply. `ENOBUFS` on receive means the kernel
    /// dropped our reply under buffer pressure; the request is resent, so it
    /// must be idempotent. Replies with a stray sequence number (late
    /// replies from prior transactions, stray multicasts) are discarded,
    /// which also means transactions on one socket must not overlap.
    ///
    /// Returns `Ok(Some(reply))` for a substantive reply, `Ok(None)` for a
    /// plain ACK, and the decoded errno for a NAK. A NAK carrying `EAGAIN`
    /// is remapped to `EPROTO` so it cannot be confused with the
    /// would-block signal of the non-blocking paths.
    pub async fn transact(&self, request: &mut Buffer) -> Result<Option<Buffer>> {
        transact_on(self, request).await
    }
}

impl AsRawFd for NlSock {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.get_ref().as_raw_fd()
    }
}

impl std::fmt::Debug for NlSock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NlSock")
            .field("pid", &self.pid.get())
            .field("protocol", &self.protocol)
            .finish()
    }
}

fn send_datagram(socket: &Socket, data: &[u8]) -> io::Result<()> {
    loop {
        match socket.send(data, 0) {
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
            Ok(_) => return Ok(()),
        }
    }
}

/// Receive one datagram without knowing its size up front: peek into a
/// guess-sized buffer, doubling while the peek fills the window, then drain
/// the datagram from the queue with a one-byte read.
fn recv_datagram(socket: &Socket) -> io::Result<Buffer> {
    let mut bufsize = 2048;
    let mut buf = Buffer::new(bufsize);
    loop {
        buf.reinit(bufsize);
        let nbytes = loop {
            match socket.recv(&mut buf.tail_mut(bufsize), libc::MSG_PEEK) {
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
                Ok(nbytes) => break nbytes,
            }
        };
        if nbytes == bufsize {
            // Possibly truncated; retry with a bigger window.
            bufsize *= 2;
            continue;
        }
        buf.grow(nbytes);
        break;
    }

    // The message was peeked intact; a one-byte read clears it from the
    // queue.
    let mut tmp = [0u8; 1];
    loop {
        match socket.recv(&mut &mut tmp[..], libc::MSG_DONTWAIT) {
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => {
                error!(error = %err, "failed to remove message from receive queue");
                break;
            }
            Ok(_) => break,
        }
    }

    Ok(buf)
}

fn validate(buf: Buffer) -> Result<Buffer> {
    if buf.at(0, NLMSG_HDRLEN).is_none() {
        return Err(Error::InvalidMessage(format!(
            "received runt message ({} bytes < {NLMSG_HDRLEN})",
            buf.size()
        )));
    }
    let len = nlmsghdr(&buf).nlmsg_len as usize;
    if len < NLMSG_HDRLEN || len > buf.size() {
        return Err(Error::InvalidMessage(format!(
            "received message with bad length {len} ({} bytes on the wire)",
            buf.size()
        )));
    }
    Ok(buf)
}

/// The send/receive seam [`transact_on`] runs over: the real socket in
/// production, a scripted peer in tests.
pub(crate) trait Channel {
    async fn send_msg(&self, msg: &mut Buffer) -> Result<()>;
    async fn recv_msg(&self) -> Result<Buffer>;
}

impl Channel for NlSock {
    async fn send_msg(&self, msg: &mut Buffer) -> Result<()> {
        self.send(msg).await
    }

    async fn recv_msg(&self) -> Result<Buffer> {
        self.recv().await
    }
}

pub(crate) async fn transact_on<C: Channel>(
    channel: &C,
    request: &mut Buffer,
) -> Result<Option<Buffer>> {
    let header = nlmsghdr(request);
    let seq = header.nlmsg_seq;

    // Force a reply even for message types that don't ordinarily get one.
    set_nlmsg_flags(request, header.nlmsg_flags | NLM_F_ACK);

    'send: loop {
        channel.send_msg(request).await?;

        loop {
            let reply = match channel.recv_msg().await {
                Err(err) if err.raw_os_error() == Some(libc::ENOBUFS) => {
                    debug!("receive buffer overflow, resending request");
                    continue 'send;
                }
                other => other?,
            };
            let reply_seq = nlmsghdr(&reply).nlmsg_seq;
            if reply_seq != seq {
                debug!(got = reply_seq, expected = seq, "ignoring reply with stray sequence number");
                continue;
            }
            if let Some(errno) = nlmsgerr(&reply) {
                if errno == 0 {
                    return Ok(None);
                }
                debug!(errno, "received NAK");
                // EAGAIN from the kernel would read as "would block" to the
                // caller; report it as a protocol error instead.
                let errno = if errno == libc::EAGAIN { libc::EPROTO } else { errno };
                return Err(Error::kernel(errno));
            }
            return Ok(Some(reply));
        }
    }
}
