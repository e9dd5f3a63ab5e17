//! Socket transport speaking length-prefixed CBOR frames.
//!
//! Remotes are written `unix:PATH` or `tcp:HOST:PORT`.

use crate::config::IdlConfig;
use crate::error::{IdlError, IdlResult};
use crate::transport::Transport;
use ovsdb_protocol::{encode_frame, ClientMessage, FrameDecoder, ServerMessage};
use std::fmt;
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
#[cfg(unix)]
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

const READ_CHUNK: usize = 8192;

/// Address of a database server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Remote {
    /// Unix domain socket path.
    Unix(PathBuf),
    /// TCP `host:port`.
    Tcp(String),
}

impl Remote {
    /// Unix socket remote.
    pub fn unix(path: impl Into<PathBuf>) -> Self {
        Remote::Unix(path.into())
    }
}

impl FromStr for Remote {
    type Err = IdlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(path) = s.strip_prefix("unix:") {
            if path.is_empty() {
                return Err(IdlError::connection("empty unix socket path"));
            }
            return Ok(Remote::Unix(PathBuf::from(path)));
        }
        if let Some(addr) = s.strip_prefix("tcp:") {
            if !addr.contains(':') {
                return Err(IdlError::connection(format!("tcp remote {s} lacks a port")));
            }
            return Ok(Remote::Tcp(addr.to_string()));
        }
        Err(IdlError::connection(format!("unsupported remote {s}")))
    }
}

impl fmt::Display for Remote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Remote::Unix(path) => write!(f, "unix:{}", path.display()),
            Remote::Tcp(addr) => write!(f, "tcp:{addr}"),
        }
    }
}

enum Socket {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
}

impl Socket {
    fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        match self {
            Socket::Tcp(s) => s.set_nonblocking(nonblocking),
            #[cfg(unix)]
            Socket::Unix(s) => s.set_nonblocking(nonblocking),
        }
    }

    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        match self {
            Socket::Tcp(s) => s.set_read_timeout(timeout),
            #[cfg(unix)]
            Socket::Unix(s) => s.set_read_timeout(timeout),
        }
    }

    fn shutdown(&self) -> io::Result<()> {
        match self {
            Socket::Tcp(s) => s.shutdown(Shutdown::Both),
            #[cfg(unix)]
            Socket::Unix(s) => s.shutdown(Shutdown::Both),
        }
    }
}

impl Read for Socket {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Socket::Tcp(s) => s.read(buf),
            #[cfg(unix)]
            Socket::Unix(s) => s.read(buf),
        }
    }
}

impl Write for Socket {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Socket::Tcp(s) => s.write(buf),
            #[cfg(unix)]
            Socket::Unix(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Socket::Tcp(s) => s.flush(),
            #[cfg(unix)]
            Socket::Unix(s) => s.flush(),
        }
    }
}

/// Transport over a TCP or Unix domain socket.
pub struct StreamTransport {
    socket: Option<Socket>,
    decoder: FrameDecoder,
    remote: Remote,
}

impl StreamTransport {
    /// Connects to `remote`, bounding TCP connection setup by `timeout`.
    pub fn connect(remote: &Remote, timeout: Duration, max_frame_size: usize) -> IdlResult<Self> {
        let socket = match remote {
            Remote::Tcp(addr) => {
                let addrs = addr
                    .to_socket_addrs()
                    .map_err(|e| IdlError::io(format!("resolving {addr}"), e))?;
                let mut last_err = None;
                let mut stream = None;
                for candidate in addrs {
                    match TcpStream::connect_timeout(&candidate, timeout) {
                        Ok(s) => {
                            stream = Some(s);
                            break;
                        }
                        Err(e) => last_err = Some(e),
                    }
                }
                match (stream, last_err) {
                    (Some(s), _) => {
                        s.set_nodelay(true)
                            .map_err(|e| IdlError::io(format!("configuring {remote}"), e))?;
                        Socket::Tcp(s)
                    }
                    (None, Some(e)) => {
                        return Err(IdlError::io(format!("connecting to {remote}"), e))
                    }
                    (None, None) => {
                        return Err(IdlError::connection(format!("{addr} resolved to nothing")))
                    }
                }
            }
            #[cfg(unix)]
            Remote::Unix(path) => Socket::Unix(
                UnixStream::connect(path)
                    .map_err(|e| IdlError::io(format!("connecting to {remote}"), e))?,
            ),
            #[cfg(not(unix))]
            Remote::Unix(_) => {
                return Err(IdlError::connection(format!(
                    "{remote}: unix sockets are unsupported on this platform"
                )))
            }
        };

        debug!(remote = %remote, "stream transport connected");
        Ok(Self {
            socket: Some(socket),
            decoder: FrameDecoder::new(max_frame_size),
            remote: remote.clone(),
        })
    }

    /// Parses `remote` and connects using the timeouts of `config`.
    pub fn open(remote: &str, config: &IdlConfig) -> IdlResult<Self> {
        let remote: Remote = remote.parse()?;
        Self::connect(&remote, config.sync_timeout, config.max_frame_size)
    }

    /// Returns the remote address.
    pub fn remote(&self) -> &Remote {
        &self.remote
    }

    fn read_available(&mut self) -> IdlResult<()> {
        let remote = self.remote.to_string();
        let socket = self.socket.as_mut().ok_or(IdlError::Closed)?;
        socket
            .set_nonblocking(true)
            .map_err(|e| IdlError::io(format!("configuring {remote}"), e))?;

        let mut buf = [0u8; READ_CHUNK];
        loop {
            match socket.read(&mut buf) {
                Ok(0) => return Err(hung_up(&remote)),
                Ok(n) => self.decoder.extend(&buf[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(IdlError::io(format!("reading from {remote}"), e)),
            }
        }
    }
}

fn hung_up(remote: &str) -> IdlError {
    IdlError::connection(format!("{remote} closed the connection"))
}

impl fmt::Debug for StreamTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamTransport")
            .field("remote", &self.remote)
            .field("open", &self.socket.is_some())
            .field("buffered", &self.decoder.buffered())
            .finish()
    }
}

impl Transport for StreamTransport {
    fn send(&mut self, message: ClientMessage) -> IdlResult<()> {
        let frame = encode_frame(&message)?;
        let remote = self.remote.to_string();
        let socket = self.socket.as_mut().ok_or(IdlError::Closed)?;
        let written = match socket.set_nonblocking(false) {
            Ok(()) => socket.write_all(&frame).and_then(|()| socket.flush()),
            Err(e) => Err(e),
        };
        written.map_err(|e| IdlError::io(format!("writing to {remote}"), e))
    }

    fn try_recv(&mut self) -> IdlResult<Option<ServerMessage>> {
        if let Some(message) = self.decoder.next_frame()? {
            return Ok(Some(message));
        }
        self.read_available()?;
        Ok(self.decoder.next_frame()?)
    }

    fn wait_readable(&mut self, timeout: Duration) -> IdlResult<bool> {
        if self.decoder.has_frame()? {
            return Ok(true);
        }
        let remote = self.remote.to_string();
        let socket = self.socket.as_mut().ok_or(IdlError::Closed)?;
        socket
            .set_nonblocking(false)
            .and_then(|()| socket.set_read_timeout(Some(timeout.max(Duration::from_millis(1)))))
            .map_err(|e| IdlError::io(format!("configuring {remote}"), e))?;

        let mut buf = [0u8; READ_CHUNK];
        loop {
            match socket.read(&mut buf) {
                Ok(0) => return Err(hung_up(&remote)),
                Ok(n) => {
                    self.decoder.extend(&buf[..n]);
                    return Ok(true);
                }
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                    ) =>
                {
                    return Ok(false)
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(IdlError::io(format!("reading from {remote}"), e)),
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.socket.is_some()
    }

    fn close(&mut self) -> IdlResult<()> {
        if let Some(socket) = self.socket.take() {
            // The peer may already be gone.
            let _ = socket.shutdown();
            debug!(remote = %self.remote, "stream transport closed");
        }
        Ok(())
    }

    fn peer(&self) -> String {
        self.remote.to_string()
    }
}
