use std::io::{self, Read, Write};
use std::net::{SocketAddr, SocketAddrV4, TcpListener, TcpStream};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::error::{DisconnectReason, InitError};
use crate::framer::{Frame, LineFramer};
use crate::registry::Registry;

const READ_CHUNK: usize = 512;
const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Listening,
    /// Peer connected but has not sent `READY` yet.
    Accepted,
    Active,
    /// Neither listening nor connected, e.g. after shutdown or a failed
    /// re-bind.
    Closed,
}

/// The single connected peer.
#[derive(Debug)]
pub struct Session {
    stream: TcpStream,
    peer: SocketAddr,
    framer: LineFramer,
    attached: bool,
}

impl Session {
    pub fn state(&self) -> SessionState {
        if self.attached {
            SessionState::Active
        } else {
            SessionState::Accepted
        }
    }
}

#[derive(Debug)]
enum Link {
    Listening(TcpListener),
    Connected(Session),
    Closed,
}

/// Owns either the listening socket or the session, never both.
#[derive(Debug)]
pub struct ConnectionManager {
    addr: SocketAddrV4,
    max_line_len: usize,
    link: Link,
    accepts: usize,
    listens: usize,
}

impl ConnectionManager {
    /// Binds the non-blocking listener. Port 0 picks a free port, which is
    /// then reused by every later re-listen.
    pub fn start_listening(addr: SocketAddrV4, max_line_len: usize) -> Result<Self, InitError> {
        let listener = Self::listen(addr)?;
        let port = listener.local_addr().map(|a| a.port()).unwrap_or(addr.port());
        Ok(Self {
            addr: SocketAddrV4::new(*addr.ip(), port),
            max_line_len,
            link: Link::Listening(listener),
            accepts: 0,
            listens: 1,
        })
    }

    fn listen(addr: SocketAddrV4) -> Result<TcpListener, InitError> {
        let listener = TcpListener::bind(addr)
            .map_err(|source| InitError::Bind { addr, source })?;
        listener.set_nonblocking(true).map_err(InitError::NonBlocking)?;
        info!(
            addr = %listener.local_addr().map(|a| a.to_string()).unwrap_or_default(),
            "Listening for debugger connections"
        );
        Ok(listener)
    }

    pub fn state(&self) -> SessionState {
        match &self.link {
            Link::Listening(_) => SessionState::Listening,
            Link::Connected(session) => session.state(),
            Link::Closed => SessionState::Closed,
        }
    }

    /// Address of the listening socket, if currently listening.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &self.link {
            Link::Listening(listener) => listener.local_addr().ok(),
            _ => None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state() == SessionState::Active
    }

    /// Marks the session active. Returns `false` without a session.
    pub fn attach(&mut self) -> bool {
        match &mut self.link {
            Link::Connected(session) => {
                session.attached = true;
                true
            }
            _ => false,
        }
    }

    /// Number of connections accepted so far.
    pub fn accepts(&self) -> usize {
        self.accepts
    }

    /// Number of times a listener was bound, the initial bind included.
    pub fn listens(&self) -> usize {
        self.listens
    }

    /// Accepts a pending peer. Returns `true` when a session exists
    /// afterwards. A new connection retires the listener and clears every
    /// breakpoint and watch in `registry`.
    pub fn poll_accept(&mut self, registry: &mut Registry) -> bool {
        match self.link {
            Link::Connected(_) => return true,
            Link::Closed => {
                if let Err(e) = self.relisten() {
                    debug!(error = %e, "Listener still unavailable");
                }
                return false;
            }
            Link::Listening(_) => {}
        }
        let Link::Listening(listener) = &self.link else {
            return false;
        };

        let (stream, peer) = match listener.accept() {
            Ok(accepted) => accepted,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return false,
            Err(e) => {
                warn!(error = %e, "Failed to accept connection");
                return false;
            }
        };

        if let Err(e) = Self::configure(&stream) {
            warn!(peer = %peer, error = %e, "Failed to configure accepted socket");
            return false;
        }

        info!(peer = %peer, "Debugger connected");
        self.link = Link::Connected(Session {
            stream,
            peer,
            framer: LineFramer::new(self.max_line_len),
            attached: false,
        });
        self.accepts += 1;
        registry.clear_all();
        true
    }

    fn configure(stream: &TcpStream) -> io::Result<()> {
        stream.set_nonblocking(true)?;
        stream.set_nodelay(true)?;
        stream.set_write_timeout(Some(WRITE_TIMEOUT))
    }

    /// Zero-timeout readability check. Never blocks.
    pub fn poll_readable(&self) -> bool {
        let Link::Connected(session) = &self.link else {
            return false;
        };
        if session.framer.has_frame() {
            return true;
        }

        let mut byte = [0u8; 1];
        match session.stream.peek(&mut byte) {
            Ok(_) => true,
            Err(e) => !matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted),
        }
    }

    /// Reads what is available and returns the next complete frame.
    ///
    /// At most `max(max_line_len, READ_CHUNK)` bytes are read per call, so
    /// a peer streaming without `\n` cannot hold the caller. A closed or
    /// failed socket tears the session down, binds a new listener and
    /// reports the reason.
    pub fn receive_line(&mut self) -> Result<Option<Frame>, DisconnectReason> {
        let Link::Connected(session) = &mut self.link else {
            return Ok(None);
        };

        let budget = self.max_line_len.max(READ_CHUNK);
        let mut consumed = 0;
        let mut chunk = [0u8; READ_CHUNK];
        let outcome = loop {
            if session.framer.has_frame() {
                break Ok(session.framer.next_frame());
            }
            if consumed >= budget {
                break Ok(None);
            }
            let want = (budget - consumed).min(READ_CHUNK);
            match session.stream.read(&mut chunk[..want]) {
                Ok(0) => break Err(DisconnectReason::PeerClosed),
                Ok(n) => {
                    consumed += n;
                    session.framer.push(&chunk[..n]);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break Ok(None),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => break Err(DisconnectReason::Io(e.kind())),
            }
        };

        outcome.map_err(|reason| self.disconnect(reason))
    }

    /// Writes one encoded line to the peer.
    pub fn send_line(&mut self, line: &[u8]) -> Result<(), DisconnectReason> {
        let Link::Connected(session) = &mut self.link else {
            return Ok(());
        };

        let result = session
            .stream
            .set_nonblocking(false)
            .and_then(|_| session.stream.write_all(line))
            .and_then(|_| session.stream.flush())
            .and_then(|_| session.stream.set_nonblocking(true));

        match result {
            Ok(()) => Ok(()),
            Err(e) => Err(self.disconnect(DisconnectReason::Io(e.kind()))),
        }
    }

    /// Ends the session and listens again. Returns `reason` for chaining.
    pub fn disconnect(&mut self, reason: DisconnectReason) -> DisconnectReason {
        if let Link::Connected(session) = &self.link {
            info!(peer = %session.peer, %reason, "Debugger disconnected");
        }
        self.link = Link::Closed;
        if let Err(e) = self.relisten() {
            error!(error = %e, "Failed to listen again");
        }
        reason
    }

    /// Binds a fresh listener unless a session or listener already exists.
    pub fn relisten(&mut self) -> Result<(), InitError> {
        if !matches!(self.link, Link::Closed) {
            return Ok(());
        }
        self.listens += 1;
        let listener = Self::listen(self.addr)?;
        self.link = Link::Listening(listener);
        Ok(())
    }

    /// Drops the session or listener. Idempotent.
    pub fn close(&mut self) {
        if !matches!(self.link, Link::Closed) {
            debug!("Closing debugger connection");
        }
        self.link = Link::Closed;
    }
}
