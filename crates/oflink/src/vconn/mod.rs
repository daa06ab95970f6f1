//! Virtual connections: polymorphic transports for OpenFlow messages.
//!
//! A vconn hides which transport carries the control channel behind a pair
//! of object-safe traits. Connections are named by `scheme:target` strings
//! and dispatched to the transport registered for the scheme, currently
//! `tcp` (active) and `ptcp` (passive).
//!
//! The I/O model is non-blocking throughout: [`Vconn::poll_recv`] registers
//! read interest and reassembles one frame at a time, [`Vconn::try_send`]
//! writes what it can and stages at most one partially-sent message, and
//! [`Vconn::poll_flush`] drains the staged message when the socket becomes
//! writable again. Callers that don't drive a poll loop by hand can use the
//! async helpers [`recv`], [`send`], and [`accept`], or the [`Frames`] /
//! [`Incoming`] streams.

use std::future::poll_fn;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio_stream::Stream;

use crate::buffer::Buffer;
use crate::error::{Error, Result};

pub mod tcp;

pub use tcp::{PtcpListener, TcpVconn};

/// An active connection carrying length-framed OpenFlow messages.
pub trait Vconn: Send {
    /// The target string this connection was opened with.
    fn name(&self) -> &str;

    /// Whether a staged outgoing message is waiting for socket space.
    /// While this is true the caller should drive [`poll_flush`](Self::poll_flush).
    fn needs_flush(&self) -> bool;

    /// Receive one complete message. Partial frames are retained across
    /// calls, so `Pending` never loses progress.
    fn poll_recv(&mut self, cx: &mut Context<'_>) -> Poll<Result<Buffer>>;

    /// Send `msg`, staging it if the socket cannot take all of it now.
    ///
    /// At most one message may be staged: while [`needs_flush`](Self::needs_flush)
    /// is true, further sends fail with [`TrySendError::Full`], handing the
    /// message back to the caller.
    fn try_send(&mut self, msg: Buffer) -> std::result::Result<(), TrySendError>;

    /// Push the staged message (if any) out. Ready once nothing is staged.
    fn poll_flush(&mut self, cx: &mut Context<'_>) -> Poll<Result<()>>;
}

/// A passive endpoint accepting [`Vconn`]s.
pub trait Listener: Send {
    /// The target string this listener was opened with.
    fn name(&self) -> &str;

    /// The local address the listener is bound to.
    fn local_addr(&self) -> Result<SocketAddr>;

    /// Accept one incoming connection.
    fn poll_accept(&mut self, cx: &mut Context<'_>) -> Poll<Result<Box<dyn Vconn>>>;
}

/// Error from [`Vconn::try_send`].
#[derive(Debug)]
pub enum TrySendError {
    /// A message is already staged; the rejected message is handed back.
    Full(Buffer),
    /// The connection failed.
    Io(Error),
}

impl std::fmt::Display for TrySendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrySendError::Full(_) => write!(f, "a message is already staged"),
            TrySendError::Io(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for TrySendError {}

/// Open an active connection to `name`, e.g. `tcp:127.0.0.1` or
/// `tcp:switch.example.org:6633`.
pub async fn open(name: &str) -> Result<Box<dyn Vconn>> {
    let (scheme, suffix) = split_scheme(name)?;
    match scheme {
        "tcp" => Ok(Box::new(TcpVconn::open(name, suffix).await?)),
        _ => Err(Error::InvalidTarget(format!("{name}: unknown scheme {scheme:?}"))),
    }
}

/// Open a passive endpoint on `name`, e.g. `ptcp:` (default port) or
/// `ptcp:6633`.
pub fn listen(name: &str) -> Result<Box<dyn Listener>> {
    let (scheme, suffix) = split_scheme(name)?;
    match scheme {
        "ptcp" => Ok(Box::new(PtcpListener::open(name, suffix)?)),
        _ => Err(Error::InvalidTarget(format!("{name}: unknown scheme {scheme:?}"))),
    }
}

fn split_scheme(name: &str) -> Result<(&str, &str)> {
    name.split_once(':')
        .ok_or_else(|| Error::InvalidTarget(format!("{name}: expected scheme:target")))
}

/// Receive one message from `vconn`, waiting as needed.
pub async fn recv<V: Vconn + ?Sized>(vconn: &mut V) -> Result<Buffer> {
    poll_fn(|cx| vconn.poll_recv(cx)).await
}

/// Flush any staged message on `vconn`.
pub async fn flush<V: Vconn + ?Sized>(vconn: &mut V) -> Result<()> {
    poll_fn(|cx| vconn.poll_flush(cx)).await
}

/// Send `msg` on `vconn` and wait for it to be fully written out.
pub async fn send<V: Vconn + ?Sized>(vconn: &mut V, msg: Buffer) -> Result<()> {
    flush(vconn).await?;
    match vconn.try_send(msg) {
        Ok(()) => flush(vconn).await,
        Err(TrySendError::Full(_)) => {
            Err(Error::Io(std::io::Error::from(std::io::ErrorKind::WouldBlock)))
        }
        Err(TrySendError::Io(err)) => Err(err),
    }
}

/// Accept one connection from `listener`, waiting as needed.
pub async fn accept<L: Listener + ?Sized>(listener: &mut L) -> Result<Box<dyn Vconn>> {
    poll_fn(|cx| listener.poll_accept(cx)).await
}

/// A [`Stream`] of incoming messages borrowed from a [`Vconn`].
/// Ends when the peer closes the connection cleanly.
pub struct Frames<'a, V: Vconn + ?Sized> {
    vconn: &'a mut V,
}

impl<'a, V: Vconn + ?Sized> Frames<'a, V> {
    pub fn new(vconn: &'a mut V) -> Self {
        Self { vconn }
    }
}

impl<V: Vconn + ?Sized> Stream for Frames<'_, V> {
    type Item = Result<Buffer>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.get_mut().vconn.poll_recv(cx) {
            Poll::Ready(Ok(msg)) => Poll::Ready(Some(Ok(msg))),
            Poll::Ready(Err(Error::Disconnected)) => Poll::Ready(None),
            Poll::Ready(Err(err)) => Poll::Ready(Some(Err(err))),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<V: Vconn + ?Sized> Unpin for Frames<'_, V> {}

/// A [`Stream`] of accepted connections borrowed from a [`Listener`].
pub struct Incoming<'a, L: Listener + ?Sized> {
    listener: &'a mut L,
}

impl<'a, L: Listener + ?Sized> Incoming<'a, L> {
    pub fn new(listener: &'a mut L) -> Self {
        Self { listener }
    }
}

impl<L: Listener + ?Sized> Stream for Incoming<'_, L> {
    type Item = Result<Box<dyn Vconn>>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().listener.poll_accept(cx).map(Some)
    }
}

impl<L: Listener + ?Sized> Unpin for Incoming<'_, L> {}
