use log::debug;
use std::io;
use std::net::{SocketAddr, SocketAddrV4, UdpSocket};
use std::time::Duration;

/// Maximum UDP payload size
const MAX_DATAGRAM: usize = 65_535;

/// Byte I/O used by the datagram transport. Protocol logic lives elsewhere.
pub trait DatagramSocket {
    fn send_to(&mut self, payload: &[u8], peer: SocketAddrV4) -> io::Result<()>;

    /// Block for up to `timeout` until a datagram is pending, without consuming it
    fn wait_readable(&mut self, timeout: Duration) -> io::Result<bool>;

    /// Take the next pending datagram, or `None` when nothing is queued
    fn try_recv(&mut self) -> io::Result<Option<(Vec<u8>, SocketAddr)>>;
}

/// [`DatagramSocket`] over a non-blocking `std::net::UdpSocket`
#[derive(Debug)]
pub struct UdpDatagramSocket {
    socket: UdpSocket,
}

impl UdpDatagramSocket {
    /// Bind to an ephemeral IPv4 port
    pub fn bind() -> io::Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.set_nonblocking(true)?;
        debug!("UDP socket bound to {}", socket.local_addr()?);
        Ok(Self { socket })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

impl DatagramSocket for UdpDatagramSocket {
    fn send_to(&mut self, payload: &[u8], peer: SocketAddrV4) -> io::Result<()> {
        self.socket.send_to(payload, peer)?;
        Ok(())
    }

    fn wait_readable(&mut self, timeout: Duration) -> io::Result<bool> {
        // A zero read timeout is rejected by the OS
        let timeout = timeout.max(Duration::from_millis(1));

        self.socket.set_nonblocking(false)?;
        self.socket.set_read_timeout(Some(timeout))?;
        let mut probe = [0u8; 1];
        let result = self.socket.peek_from(&mut probe);
        self.socket.set_nonblocking(true)?;

        match result {
            Ok(_) => Ok(true),
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                ) =>
            {
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    fn try_recv(&mut self) -> io::Result<Option<(Vec<u8>, SocketAddr)>> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        match self.socket.recv_from(&mut buf) {
            Ok((size, from)) => {
                buf.truncate(size);
                Ok(Some((buf, from)))
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }
}
