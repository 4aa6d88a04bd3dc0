//! Non-blocking TCP transport between replica processes.
//!
//! Every wire message is framed as a 4-byte big-endian length prefix
//! followed by the `postcard`-encoded [`Envelope`] -- `postcard` itself
//! doesn't delimit messages on a byte stream, so the prefix plays the same
//! role the frame header plays in the teacher's binary protocol, just
//! sized for this crate's smaller messages.
//!
//! A connection's remote socket address (as seen by `accept()`) is the
//! peer's ephemeral outbound port, not the listening address configured
//! for it, so it can't be used to recognize which replica dialed in. The
//! dialing side therefore sends its own 32-byte [`Address`] as the very
//! first bytes on a new connection, before any framed envelope; the
//! accepting side consumes exactly those 32 bytes to learn the peer's
//! identity before it starts decoding frames.

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::net::SocketAddr;

use bytes::BytesMut;
use concord_types::{Address, ADDRESS_SIZE};
use concord_wire::{decode_envelope, encode_envelope, Envelope};
use mio::net::{TcpListener, TcpStream};
use mio::{Interest, Poll, Token};
use tracing::{debug, trace, warn};

use crate::error::NodeError;

pub const LISTENER_TOKEN: Token = Token(0);
const FRAME_HEADER_SIZE: usize = 4;
const FIRST_PEER_TOKEN: usize = 16;

/// One outbound or inbound peer connection.
struct PeerConn {
    stream: TcpStream,
    read_buf: BytesMut,
    write_buf: BytesMut,
    /// Known immediately for connections we dialed; learned from the
    /// identity handshake for connections we accepted.
    peer: Option<Address>,
}

impl PeerConn {
    fn outbound(stream: TcpStream, self_key: Address, peer: Address) -> Self {
        let mut write_buf = BytesMut::with_capacity(4096);
        write_buf.extend_from_slice(self_key.as_bytes());
        Self {
            stream,
            read_buf: BytesMut::with_capacity(4096),
            write_buf,
            peer: Some(peer),
        }
    }

    fn inbound(stream: TcpStream) -> Self {
        Self {
            stream,
            read_buf: BytesMut::with_capacity(4096),
            write_buf: BytesMut::with_capacity(4096),
            peer: None,
        }
    }

    fn interest(&self) -> Interest {
        if self.write_buf.is_empty() {
            Interest::READABLE
        } else {
            Interest::READABLE | Interest::WRITABLE
        }
    }

    fn queue(&mut self, envelope: &Envelope) -> Result<(), NodeError> {
        let body = encode_envelope(envelope)?;
        let len = u32::try_from(body.len())
            .map_err(|_| NodeError::MalformedFrame("envelope too large to frame".into()))?;
        self.write_buf.extend_from_slice(&len.to_be_bytes());
        self.write_buf.extend_from_slice(&body);
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        while !self.write_buf.is_empty() {
            match self.stream.write(&self.write_buf) {
                Ok(0) => return Err(io::Error::new(io::ErrorKind::WriteZero, "peer write zero")),
                Ok(n) => {
                    let _ = self.write_buf.split_to(n);
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Reads available bytes, consumes the identity handshake if this
    /// connection hasn't been matched to a peer yet, then drains every
    /// complete frame found. Returns `false` in the first slot once the
    /// peer has closed its side.
    fn read_frames(&mut self) -> io::Result<(bool, Vec<Envelope>)> {
        let mut temp = [0u8; 4096];
        loop {
            match self.stream.read(&mut temp) {
                Ok(0) => return Ok((false, self.drain_frames())),
                Ok(n) => self.read_buf.extend_from_slice(&temp[..n]),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return Ok((true, self.drain_frames()))
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn drain_frames(&mut self) -> Vec<Envelope> {
        if self.peer.is_none() {
            if self.read_buf.len() < ADDRESS_SIZE {
                return Vec::new();
            }
            let mut bytes = [0u8; ADDRESS_SIZE];
            bytes.copy_from_slice(&self.read_buf.split_to(ADDRESS_SIZE));
            self.peer = Some(Address::new(bytes));
        }

        let mut out = Vec::new();
        loop {
            if self.read_buf.len() < FRAME_HEADER_SIZE {
                return out;
            }
            let len =
                u32::from_be_bytes(self.read_buf[..FRAME_HEADER_SIZE].try_into().unwrap()) as usize;
            if self.read_buf.len() < FRAME_HEADER_SIZE + len {
                return out;
            }
            let _ = self.read_buf.split_to(FRAME_HEADER_SIZE);
            let body = self.read_buf.split_to(len);
            match decode_envelope(&body) {
                Ok(envelope) => out.push(envelope),
                Err(e) => warn!(error = %e, "dropping malformed frame"),
            }
        }
    }
}

/// Owns the listening socket plus one connection per known peer, keyed by
/// the [`Token`] mio hands back from `Poll::poll`.
pub struct Transport {
    self_key: Address,
    listener: TcpListener,
    conns: HashMap<Token, PeerConn>,
    addr_to_token: HashMap<Address, Token>,
    peer_addrs: HashMap<Address, SocketAddr>,
    next_token: usize,
}

impl Transport {
    pub fn bind(
        self_key: Address,
        bind_addr: SocketAddr,
        peer_addrs: HashMap<Address, SocketAddr>,
        poll: &Poll,
    ) -> Result<Self, NodeError> {
        let mut listener = TcpListener::bind(bind_addr)?;
        poll.registry()
            .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;
        debug!(%bind_addr, "transport listening");
        Ok(Self {
            self_key,
            listener,
            conns: HashMap::new(),
            addr_to_token: HashMap::new(),
            peer_addrs,
            next_token: FIRST_PEER_TOKEN,
        })
    }

    /// The replica this token's connection has been matched to, once its
    /// identity handshake (inbound) or dial target (outbound) is known.
    pub fn peer_of(&self, token: Token) -> Option<Address> {
        self.conns.get(&token).and_then(|conn| conn.peer)
    }

    fn allocate_token(&mut self) -> Token {
        let token = Token(self.next_token);
        self.next_token += 1;
        token
    }

    fn register(&mut self, mut conn: PeerConn, poll: &Poll) -> io::Result<Token> {
        let token = self.allocate_token();
        poll.registry()
            .register(&mut conn.stream, token, conn.interest())?;
        self.conns.insert(token, conn);
        Ok(token)
    }

    fn dial(&mut self, peer: Address, poll: &Poll) -> io::Result<Token> {
        if let Some(token) = self.addr_to_token.get(&peer) {
            return Ok(*token);
        }
        let addr = *self
            .peer_addrs
            .get(&peer)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "unknown peer address"))?;
        let stream = TcpStream::connect(addr)?;
        let conn = PeerConn::outbound(stream, self.self_key, peer);
        let token = self.register(conn, poll)?;
        self.addr_to_token.insert(peer, token);
        Ok(token)
    }

    /// Queues `envelope` to `peer`, dialing a fresh connection if needed.
    pub fn send(&mut self, peer: Address, envelope: &Envelope, poll: &Poll) -> Result<(), NodeError> {
        let token = self.dial(peer, poll)?;
        if let Some(conn) = self.conns.get_mut(&token) {
            conn.queue(envelope)?;
            conn.flush()?;
            poll.registry()
                .reregister(&mut conn.stream, token, conn.interest())?;
        }
        Ok(())
    }

    /// Accepts every pending inbound connection on the listener.
    pub fn accept_all(&mut self, poll: &Poll) -> Result<(), NodeError> {
        loop {
            match self.listener.accept() {
                Ok((stream, addr)) => {
                    trace!(%addr, "accepted inbound connection, awaiting identity");
                    let conn = PeerConn::inbound(stream);
                    self.register(conn, poll)?;
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Services the connection behind `token`, returning every envelope
    /// fully received plus `false` if the peer closed its side. A
    /// newly-identified inbound connection not found among configured
    /// peers is dropped and reported as closed.
    pub fn readable(
        &mut self,
        token: Token,
        poll: &Poll,
    ) -> Result<(bool, Vec<Envelope>), NodeError> {
        let Some(conn) = self.conns.get_mut(&token) else {
            return Ok((true, Vec::new()));
        };
        let (still_open, envelopes) = conn.read_frames()?;

        if let Some(peer) = conn.peer {
            if !self.peer_addrs.contains_key(&peer) {
                warn!(?peer, "dropping connection from unconfigured peer");
                self.drop_connection(token, poll);
                return Ok((false, Vec::new()));
            }
            self.addr_to_token.entry(peer).or_insert(token);
        }

        if !still_open {
            self.drop_connection(token, poll);
        }
        Ok((still_open, envelopes))
    }

    pub fn writable(&mut self, token: Token, poll: &Poll) -> Result<(), NodeError> {
        if let Some(conn) = self.conns.get_mut(&token) {
            conn.flush()?;
            poll.registry()
                .reregister(&mut conn.stream, token, conn.interest())?;
        }
        Ok(())
    }

    fn drop_connection(&mut self, token: Token, poll: &Poll) {
        if let Some(mut conn) = self.conns.remove(&token) {
            let _ = poll.registry().deregister(&mut conn.stream);
            if let Some(peer) = conn.peer {
                self.addr_to_token.remove(&peer);
            }
        }
    }

    pub fn is_known_token(&self, token: Token) -> bool {
        token != LISTENER_TOKEN && self.conns.contains_key(&token)
    }
}
