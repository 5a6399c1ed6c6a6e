//! Byte transports between the driver and a device.
//!
//! The capture core only needs a duplex byte channel; framing is handled
//! above by [`crate::protocol::frame`]. TCP carries the frame stream with no
//! message boundaries, UDP carries one complete framed unit per datagram,
//! and the loopback transport backs tests and the emulated device. Serial
//! ports implement the same trait outside this crate.

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream, UdpSocket};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use socket2::{Domain, Protocol, Socket, Type};

/// Upper bound on a single transport read.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Duplex byte channel owned by exactly one driver.
///
/// Methods take `&self` so a capture worker can read while the owning driver
/// writes a stop command on the same channel.
pub trait Transport: Send + Sync {
    /// Write one complete command atomically.
    fn write(&self, data: &[u8]) -> io::Result<()>;

    /// Read available bytes, blocking up to the configured timeout.
    /// `Ok(0)` means the peer closed the channel.
    fn read(&self, buf: &mut [u8]) -> io::Result<usize>;

    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()>;

    /// Best-effort shutdown; reads fail afterwards.
    fn close(&self);
}

/// TCP stream transport.
pub struct TcpTransport {
    stream: TcpStream,
}

impl TcpTransport {
    /// Connect with a bounded handshake time and the default read timeout.
    pub fn connect(addr: SocketAddr, connect_timeout: Duration) -> io::Result<Self> {
        let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
        socket.connect_timeout(&addr.into(), connect_timeout)?;
        socket.set_nodelay(true)?;
        socket.set_read_timeout(Some(DEFAULT_READ_TIMEOUT))?;

        let stream: TcpStream = socket.into();
        Ok(Self { stream })
    }
}

impl Transport for TcpTransport {
    fn write(&self, data: &[u8]) -> io::Result<()> {
        (&self.stream).write_all(data)
    }

    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        (&self.stream).read(buf)
    }

    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.stream.set_read_timeout(timeout)
    }

    fn close(&self) {
        let _ = self.stream.shutdown(std::net::Shutdown::Both);
    }
}

/// UDP datagram transport; each datagram is one complete framed unit.
pub struct UdpTransport {
    socket: UdpSocket,
}

impl UdpTransport {
    /// Bind an ephemeral local port and connect it to the device address.
    pub fn connect(remote: SocketAddr) -> io::Result<Self> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        socket.bind(&SocketAddr::from(([0, 0, 0, 0], 0)).into())?;
        socket.set_read_timeout(Some(DEFAULT_READ_TIMEOUT))?;
        let _ = socket.set_recv_buffer_size(1024 * 1024);

        let socket: UdpSocket = socket.into();
        socket.connect(remote)?;
        Ok(Self { socket })
    }
}

impl Transport for UdpTransport {
    fn write(&self, data: &[u8]) -> io::Result<()> {
        self.socket.send(data).map(|_| ())
    }

    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.socket.recv(buf)
    }

    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.socket.set_read_timeout(timeout)
    }

    fn close(&self) {
        // Datagram sockets close on drop; unblock any reader quickly.
        let _ = self.socket.set_read_timeout(Some(Duration::from_millis(1)));
    }
}

struct LoopbackInner {
    inbound: Vec<u8>,
    outbound: Vec<u8>,
    closed: bool,
}

/// In-memory transport for tests and the emulated device.
///
/// Reads block on queued inbound bytes up to the configured timeout; writes
/// are recorded for inspection.
pub struct LoopbackTransport {
    inner: Mutex<LoopbackInner>,
    readable: Condvar,
    read_timeout: Mutex<Option<Duration>>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(LoopbackInner {
                inbound: Vec::new(),
                outbound: Vec::new(),
                closed: false,
            }),
            readable: Condvar::new(),
            read_timeout: Mutex::new(Some(DEFAULT_READ_TIMEOUT)),
        }
    }

    /// Queue bytes for the next reads, waking any blocked reader.
    pub fn push_incoming(&self, data: &[u8]) {
        let mut inner = self.inner.lock();
        inner.inbound.extend_from_slice(data);
        self.readable.notify_all();
    }

    /// Take everything written so far.
    pub fn take_written(&self) -> Vec<u8> {
        std::mem::take(&mut self.inner.lock().outbound)
    }

    /// Bytes written so far without consuming them.
    pub fn written_len(&self) -> usize {
        self.inner.lock().outbound.len()
    }
}

impl Default for LoopbackTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for LoopbackTransport {
    fn write(&self, data: &[u8]) -> io::Result<()> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "transport closed"));
        }
        inner.outbound.extend_from_slice(data);
        Ok(())
    }

    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        let timeout = *self.read_timeout.lock();
        let mut inner = self.inner.lock();

        while inner.inbound.is_empty() {
            if inner.closed {
                return Ok(0);
            }
            match timeout {
                Some(t) => {
                    if self.readable.wait_for(&mut inner, t).timed_out()
                        && inner.inbound.is_empty()
                    {
                        return Err(io::Error::new(io::ErrorKind::TimedOut, "read timed out"));
                    }
                }
                None => self.readable.wait(&mut inner),
            }
        }

        let n = buf.len().min(inner.inbound.len());
        buf[..n].copy_from_slice(&inner.inbound[..n]);
        inner.inbound.drain(..n);
        Ok(n)
    }

    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        *self.read_timeout.lock() = timeout;
        Ok(())
    }

    fn close(&self) {
        self.inner.lock().closed = true;
        self.readable.notify_all();
    }
}
