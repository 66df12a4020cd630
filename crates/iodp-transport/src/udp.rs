use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::time::Duration;

use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::traits::Link;

/// UDP socket connected to exactly one remote endpoint.
///
/// Each `write` sends one datagram; each `read` returns at most one datagram.
/// Datagrams from any other source are filtered by the kernel once connected.
#[derive(Debug)]
pub struct UdpLink {
    socket: UdpSocket,
}

impl UdpLink {
    /// Bind to a local address without choosing a remote yet.
    pub fn bind(local: impl ToSocketAddrs) -> Result<Self> {
        let addr = resolve(local)?;
        let socket = UdpSocket::bind(addr).map_err(|source| TransportError::Bind { addr, source })?;
        debug!(%addr, "bound udp link");
        Ok(Self { socket })
    }

    /// Fix the remote endpoint all reads and writes go through.
    pub fn connect(&self, remote: impl ToSocketAddrs) -> Result<()> {
        let addr = resolve(remote)?;
        self.socket
            .connect(addr)
            .map_err(|source| TransportError::Connect { addr, source })?;
        info!(local = ?self.socket.local_addr().ok(), remote = %addr, "udp link connected");
        Ok(())
    }

    /// Bind to `local` and connect to `remote` in one step.
    pub fn open(local: impl ToSocketAddrs, remote: impl ToSocketAddrs) -> Result<Self> {
        let link = Self::bind(local)?;
        link.connect(remote)?;
        Ok(link)
    }

    /// Local address the socket is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.socket.local_addr().map_err(Into::into)
    }

    /// Remote address the socket is connected to.
    pub fn peer_addr(&self) -> Result<SocketAddr> {
        self.socket.peer_addr().map_err(Into::into)
    }
}

impl Link for UdpLink {
    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.socket.recv(buf)
    }

    fn write(&self, buf: &[u8]) -> io::Result<usize> {
        self.socket.send(buf)
    }

    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        // A zero duration is rejected by the socket layer; treat it as the shortest wait.
        let timeout = timeout.map(|t| t.max(Duration::from_millis(1)));
        self.socket.set_read_timeout(timeout)
    }
}

fn resolve(addr: impl ToSocketAddrs) -> Result<SocketAddr> {
    addr.to_socket_addrs()?.next().ok_or_else(|| {
        TransportError::Io(io::Error::new(
            io::ErrorKind::InvalidInput,
            "address resolved to nothing",
        ))
    })
}
