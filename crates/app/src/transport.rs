//! Socket-backed channels.
//!
//! [`UdpChannel`] sends each packet as one datagram. [`TcpChannel`] frames
//! packets on the byte stream with a 4-byte big-endian length prefix. Both
//! implement the blocking wait-with-deadline [`Channel`] contract by setting
//! the socket read timeout for each `receive`. Neither adds any integrity
//! of its own; that is the protocol's job.

use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs, UdpSocket};
use std::time::{Duration, Instant};

use log::{debug, trace};
use rdt_sim_core::channel::Channel;
use rdt_sim_core::error::{Error, Result};

/// Largest UDP payload.
const MAX_DATAGRAM: usize = 65_507;

/// Length prefix of a TCP frame.
const FRAME_HEADER: usize = 4;

fn is_timeout(kind: ErrorKind) -> bool {
    matches!(kind, ErrorKind::WouldBlock | ErrorKind::TimedOut)
}

/// A zero read timeout is rejected by the OS; round it up.
fn read_timeout(timeout: Option<Duration>) -> Option<Duration> {
    timeout.map(|t| t.max(Duration::from_millis(1)))
}

/// Datagram channel to one peer.
///
/// A server-side channel learns its peer from the first datagram it
/// receives; a client-side channel is given its peer up front.
#[derive(Debug)]
pub struct UdpChannel {
    socket: UdpSocket,
    peer: Option<SocketAddr>,
    closed: bool,
}

impl UdpChannel {
    pub fn bind(addr: &str) -> Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        debug!("udp bound to {}", socket.local_addr()?);
        Ok(Self {
            socket,
            peer: None,
            closed: false,
        })
    }

    pub fn connect(addr: &str) -> Result<Self> {
        let peer = addr
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| Error::Config(format!("cannot resolve {addr}")))?;
        let local: SocketAddr = if peer.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };
        let socket = UdpSocket::bind(local)?;
        debug!("udp {} -> {peer}", socket.local_addr()?);
        Ok(Self {
            socket,
            peer: Some(peer),
            closed: false,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Forget the current peer so the next datagram starts a new exchange.
    pub fn reset(&mut self) {
        self.peer = None;
        self.closed = false;
    }
}

impl Channel for UdpChannel {
    fn send(&mut self, bytes: &[u8]) -> Result<()> {
        if self.closed {
            return Err(Error::ChannelClosed);
        }
        let peer = self.peer.ok_or(Error::ChannelClosed)?;
        match self.socket.send_to(bytes, peer) {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == ErrorKind::ConnectionRefused => Err(Error::ChannelClosed),
            Err(e) => Err(e.into()),
        }
    }

    fn receive(&mut self, timeout: Option<Duration>) -> Result<Option<Vec<u8>>> {
        if self.closed {
            return Err(Error::ChannelClosed);
        }
        self.socket.set_read_timeout(read_timeout(timeout))?;
        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            match self.socket.recv_from(&mut buf) {
                Ok((n, from)) => {
                    match self.peer {
                        None => {
                            debug!("udp peer {from}");
                            self.peer = Some(from);
                        }
                        Some(peer) if peer != from => {
                            trace!("udp ignoring {n} bytes from {from}");
                            continue;
                        }
                        Some(_) => {}
                    }
                    buf.truncate(n);
                    return Ok(Some(buf));
                }
                Err(e) if is_timeout(e.kind()) => return Ok(None),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == ErrorKind::ConnectionRefused => {
                    return Err(Error::ChannelClosed)
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}

/// Length-prefixed frames over a TCP stream.
#[derive(Debug)]
pub struct TcpChannel {
    stream: TcpStream,
    /// Bytes read but not yet returned as a frame
    pending: Vec<u8>,
    closed: bool,
}

impl TcpChannel {
    pub fn connect(addr: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr)?;
        debug!("tcp {} -> {}", stream.local_addr()?, stream.peer_addr()?);
        Ok(Self::new(stream))
    }

    /// Wait for one incoming connection.
    pub fn accept(listener: &TcpListener) -> Result<Self> {
        let (stream, peer) = listener.accept()?;
        debug!("tcp accepted {peer}");
        Ok(Self::new(stream))
    }

    fn new(stream: TcpStream) -> Self {
        // Packets are small and latency-bound
        if let Err(e) = stream.set_nodelay(true) {
            debug!("tcp nodelay not set: {e}");
        }
        Self {
            stream,
            pending: Vec::new(),
            closed: false,
        }
    }

    pub fn peer_addr(&self) -> Result<SocketAddr> {
        Ok(self.stream.peer_addr()?)
    }

    fn take_frame(&mut self) -> Option<Vec<u8>> {
        if self.pending.len() < FRAME_HEADER {
            return None;
        }
        let mut prefix = [0u8; FRAME_HEADER];
        prefix.copy_from_slice(&self.pending[..FRAME_HEADER]);
        let len = u32::from_be_bytes(prefix) as usize;
        if self.pending.len() < FRAME_HEADER + len {
            return None;
        }
        let frame = self.pending[FRAME_HEADER..FRAME_HEADER + len].to_vec();
        self.pending.drain(..FRAME_HEADER + len);
        Some(frame)
    }
}

impl Channel for TcpChannel {
    fn send(&mut self, bytes: &[u8]) -> Result<()> {
        if self.closed {
            return Err(Error::ChannelClosed);
        }
        let len = u32::try_from(bytes.len())
            .map_err(|_| Error::Config(format!("frame of {} bytes too large", bytes.len())))?;
        let mut frame = Vec::with_capacity(FRAME_HEADER + bytes.len());
        frame.extend_from_slice(&len.to_be_bytes());
        frame.extend_from_slice(bytes);
        match self.stream.write_all(&frame) {
            Ok(()) => Ok(()),
            Err(e) if matches!(e.kind(), ErrorKind::BrokenPipe | ErrorKind::ConnectionReset) => {
                Err(Error::ChannelClosed)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn receive(&mut self, timeout: Option<Duration>) -> Result<Option<Vec<u8>>> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut buf = [0u8; 4096];

        loop {
            if let Some(frame) = self.take_frame() {
                return Ok(Some(frame));
            }

            let wait = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(None);
                    }
                    Some(deadline - now)
                }
                None => None,
            };
            self.stream.set_read_timeout(read_timeout(wait))?;

            match self.stream.read(&mut buf) {
                Ok(0) => return Err(Error::ChannelClosed),
                Ok(n) => self.pending.extend_from_slice(&buf[..n]),
                Err(e) if is_timeout(e.kind()) => continue,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == ErrorKind::ConnectionReset => {
                    return Err(Error::ChannelClosed)
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            self.stream.flush()?;
            match self.stream.shutdown(std::net::Shutdown::Write) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotConnected => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_udp_exchange() {
        let mut server = UdpChannel::bind("127.0.0.1:0").unwrap();
        let addr = server.local_addr().unwrap().to_string();
        let mut client = UdpChannel::connect(&addr).unwrap();

        assert!(matches!(server.send(b"nobody yet"), Err(Error::ChannelClosed)));

        client.send(b"HEADER S:0001 T:0001 F:00\nhi").unwrap();
        let got = server.receive(Some(Duration::from_secs(2))).unwrap();
        assert_eq!(got, Some(b"HEADER S:0001 T:0001 F:00\nhi".to_vec()));
        assert!(server.peer().is_some());

        server.send(b"reply").unwrap();
        assert_eq!(
            client.receive(Some(Duration::from_secs(2))).unwrap(),
            Some(b"reply".to_vec())
        );
        assert_eq!(client.receive(Some(Duration::from_millis(20))).unwrap(), None);
    }

    #[test]
    fn test_tcp_framing() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let handle = std::thread::spawn(move || {
            let mut server = TcpChannel::accept(&listener).unwrap();
            let first = server.receive(None).unwrap().unwrap();
            let second = server.receive(None).unwrap().unwrap();
            let closed = server.receive(None);
            (first, second, closed)
        });

        let mut client = TcpChannel::connect(&addr).unwrap();
        client.send(b"first\npacket").unwrap();
        client.send(b"").unwrap();
        client.close().unwrap();

        let (first, second, closed) = handle.join().unwrap();
        assert_eq!(first, b"first\npacket");
        assert!(second.is_empty());
        assert!(matches!(closed, Err(Error::ChannelClosed)));
    }

    #[test]
    fn test_tcp_receive_deadline() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let _client = TcpChannel::connect(&addr).unwrap();
        let mut server = TcpChannel::accept(&listener).unwrap();
        assert_eq!(server.receive(Some(Duration::from_millis(20))).unwrap(), None);
    }

    #[test]
    fn test_tcp_nodelay() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let client = TcpChannel::connect(&addr).unwrap();
        let server = TcpChannel::accept(&listener).unwrap();
        assert!(client.stream.nodelay().unwrap());
        assert!(server.stream.nodelay().unwrap());
    }
}
