//! TCP transports: active (`tcp`) and passive (`ptcp`).
//!
//! OpenFlow frames the TCP byte stream with its own header: bytes 3–4 of
//! every message carry the total frame length in network byte order. The
//! receive path reassembles exactly one frame at a time into a [`Buffer`];
//! the send path writes what the socket accepts and stages the remainder.

use std::net::{Ipv4Addr, SocketAddr};
use std::task::{Context, Poll};

use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tracing::error;

use crate::buffer::Buffer;
use crate::error::{Error, Result};
use crate::ofp::{OFP_HEADER_LEN, OFP_TCP_PORT, OfpHeader};
use crate::vconn::{Listener, TrySendError, Vconn};

/// Initial size of the receive-assembly buffer; most control messages fit.
const RX_BUFSIZE: usize = 1564;

/// An active TCP connection carrying OpenFlow messages.
pub struct TcpVconn {
    name: String,
    stream: TcpStream,
    /// Partially reassembled incoming message, if any.
    rxbuf: Option<Buffer>,
    /// Staged outgoing message whose send came up short, if any.
    txbuf: Option<Buffer>,
}

impl TcpVconn {
    /// Connect to `suffix` (`host[:port]`, default port 6633).
    ///
    /// The connect itself runs to completion here (this path is setup, not
    /// steady state); the socket is non-blocking with TCP_NODELAY from then
    /// on.
    pub(crate) async fn open(name: &str, suffix: &str) -> Result<Self> {
        // Tolerate consecutive colons: "host::6633" parses like "host:6633".
        let mut parts = suffix.split(':').filter(|part| !part.is_empty());
        let host = parts
            .next()
            .ok_or_else(|| Error::InvalidTarget(format!("{name}: missing host")))?;
        let port = match parts.next() {
            Some(port) => port
                .parse::<u16>()
                .map_err(|_| Error::InvalidTarget(format!("{name}: bad port {port:?}")))?,
            None => OFP_TCP_PORT,
        };

        let stream = TcpStream::connect((host, port)).await?;
        Self::from_stream(stream, name.to_string())
    }

    /// Wrap an already-connected stream. Used by the passive side's accept
    /// path and by callers that do their own socket setup.
    pub fn from_stream(stream: TcpStream, name: String) -> Result<Self> {
        stream.set_nodelay(true)?;
        Ok(Self { name, stream, rxbuf: None, txbuf: None })
    }
}

/// How many more bytes the frame in `rx` needs, or an error if the header
/// announces an impossible length. Zero means the frame is complete, which
/// includes the legal case of a frame that is nothing but a header.
fn frame_remaining(rx: &Buffer) -> Result<usize> {
    if rx.size() < OFP_HEADER_LEN {
        return Ok(OFP_HEADER_LEN - rx.size());
    }
    let header = OfpHeader::from_bytes(rx.data()).expect("header length checked");
    let length = header.length();
    if length < OFP_HEADER_LEN {
        error!(length, "received too-short ofp_header");
        return Err(Error::InvalidMessage(format!(
            "frame length {length} shorter than the {OFP_HEADER_LEN} byte header"
        )));
    }
    Ok(length - rx.size())
}

impl Vconn for TcpVconn {
    fn name(&self) -> &str {
        &self.name
    }

    fn needs_flush(&self) -> bool {
        self.txbuf.is_some()
    }

    fn poll_recv(&mut self, cx: &mut Context<'_>) -> Poll<Result<Buffer>> {
        loop {
            let rx = self.rxbuf.get_or_insert_with(|| Buffer::new(RX_BUFSIZE));
            let want = match frame_remaining(rx) {
                Ok(0) => {
                    let msg = self.rxbuf.take().expect("frame just completed");
                    return Poll::Ready(Ok(msg));
                }
                Ok(want) => want,
                Err(err) => return Poll::Ready(Err(err)),
            };

            match self.stream.poll_read_ready(cx) {
                Poll::Ready(Ok(())) => {}
                Poll::Ready(Err(err)) => return Poll::Ready(Err(err.into())),
                Poll::Pending => return Poll::Pending,
            }

            rx.reserve_tailroom(want);
            match self.stream.try_read(rx.tail_mut(want)) {
                Ok(0) => {
                    return Poll::Ready(Err(if rx.is_empty() {
                        Error::Disconnected
                    } else {
                        Error::InvalidMessage(format!(
                            "connection closed with {} bytes of a partial frame",
                            rx.size()
                        ))
                    }));
                }
                Ok(nread) => rx.grow(nread),
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => continue,
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(err) => return Poll::Ready(Err(err.into())),
            }
        }
    }

    fn try_send(&mut self, mut msg: Buffer) -> std::result::Result<(), TrySendError> {
        if self.txbuf.is_some() {
            return Err(TrySendError::Full(msg));
        }
        loop {
            match self.stream.try_write(msg.data()) {
                Ok(sent) if sent == msg.size() => return Ok(()),
                Ok(sent) => {
                    msg.pull(sent);
                    self.txbuf = Some(msg);
                    return Ok(());
                }
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                    self.txbuf = Some(msg);
                    return Ok(());
                }
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(TrySendError::Io(err.into())),
            }
        }
    }

    fn poll_flush(&mut self, cx: &mut Context<'_>) -> Poll<Result<()>> {
        while let Some(tx) = self.txbuf.as_mut() {
            match self.stream.poll_write_ready(cx) {
                Poll::Ready(Ok(())) => {}
                Poll::Ready(Err(err)) => {
                    error!(error = %err, "send");
                    return Poll::Ready(Err(err.into()));
                }
                Poll::Pending => return Poll::Pending,
            }

            match self.stream.try_write(tx.data()) {
                Ok(sent) => {
                    tx.pull(sent);
                    if tx.is_empty() {
                        self.txbuf = None;
                    }
                }
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => continue,
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    error!(error = %err, "send");
                    return Poll::Ready(Err(err.into()));
                }
            }
        }
        Poll::Ready(Ok(()))
    }
}

impl std::fmt::Debug for TcpVconn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpVconn")
            .field("name", &self.name)
            .field("rx_partial", &self.rxbuf.as_ref().map(Buffer::size))
            .field("tx_staged", &self.txbuf.as_ref().map(Buffer::size))
            .finish()
    }
}

/// A passive TCP endpoint accepting OpenFlow connections.
pub struct PtcpListener {
    name: String,
    listener: TcpListener,
}

impl PtcpListener {
    /// Listen on `suffix` (a port number; empty for the default 6633) on
    /// all local addresses.
    pub(crate) fn open(name: &str, suffix: &str) -> Result<Self> {
        let port = if suffix.is_empty() {
            OFP_TCP_PORT
        } else {
            suffix
                .parse::<u16>()
                .map_err(|_| Error::InvalidTarget(format!("{name}: bad port {suffix:?}")))?
        };

        let socket = TcpSocket::new_v4()?;
        socket.set_reuseaddr(true)?;
        socket.bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)))?;
        let listener = socket.listen(10)?;

        Ok(Self { name: name.to_string(), listener })
    }
}

impl Listener for PtcpListener {
    fn name(&self) -> &str {
        &self.name
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    fn poll_accept(&mut self, cx: &mut Context<'_>) -> Poll<Result<Box<dyn Vconn>>> {
        match self.listener.poll_accept(cx) {
            Poll::Ready(Ok((stream, peer))) => Poll::Ready(
                TcpVconn::from_stream(stream, format!("tcp:{peer}"))
                    .map(|vconn| Box::new(vconn) as Box<dyn Vconn>),
            ),
            Poll::Ready(Err(err)) => Poll::Ready(Err(err.into())),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl std::fmt::Debug for PtcpListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PtcpListener").field("name", &self.name).finish()
    }
}
