//! Socket listeners.
//!
//! Each accepted connection gets a reader thread that decodes request
//! frames and feeds them to the [`RequestHandler`], and a writer thread that
//! encodes everything the session is sent.

use crate::error::{ServerError, ServerResult};
use crate::handler::RequestHandler;
use ovsdb_protocol::{encode_frame, ClientMessage, FrameDecoder, ServerMessage};
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
#[cfg(unix)]
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

const READ_CHUNK: usize = 8192;

enum Conn {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
}

impl Conn {
    fn try_clone(&self) -> io::Result<Conn> {
        match self {
            Conn::Tcp(s) => s.try_clone().map(Conn::Tcp),
            #[cfg(unix)]
            Conn::Unix(s) => s.try_clone().map(Conn::Unix),
        }
    }

    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        match self {
            Conn::Tcp(s) => s.set_read_timeout(timeout),
            #[cfg(unix)]
            Conn::Unix(s) => s.set_read_timeout(timeout),
        }
    }

    fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        match self {
            Conn::Tcp(s) => s.set_nonblocking(nonblocking),
            #[cfg(unix)]
            Conn::Unix(s) => s.set_nonblocking(nonblocking),
        }
    }

    fn shutdown(&self) {
        let _ = match self {
            Conn::Tcp(s) => s.shutdown(Shutdown::Both),
            #[cfg(unix)]
            Conn::Unix(s) => s.shutdown(Shutdown::Both),
        };
    }
}

impl Read for Conn {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Conn::Tcp(s) => s.read(buf),
            #[cfg(unix)]
            Conn::Unix(s) => s.read(buf),
        }
    }
}

impl Write for Conn {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Conn::Tcp(s) => s.write(buf),
            #[cfg(unix)]
            Conn::Unix(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Conn::Tcp(s) => s.flush(),
            #[cfg(unix)]
            Conn::Unix(s) => s.flush(),
        }
    }
}

enum Acceptor {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(UnixListener, PathBuf),
}

impl Acceptor {
    fn accept(&self) -> io::Result<Conn> {
        match self {
            Acceptor::Tcp(l) => l.accept().map(|(s, _)| Conn::Tcp(s)),
            #[cfg(unix)]
            Acceptor::Unix(l, _) => l.accept().map(|(s, _)| Conn::Unix(s)),
        }
    }
}

impl Drop for Acceptor {
    fn drop(&mut self) {
        match self {
            #[cfg(unix)]
            Acceptor::Unix(_, path) => {
                let _ = std::fs::remove_file(path);
            }
            _ => {}
        }
    }
}

/// A running socket listener. Dropping it stops accepting connections.
#[derive(Debug)]
pub struct ListenerHandle {
    address: String,
    local_addr: Option<SocketAddr>,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl ListenerHandle {
    /// Remote string clients connect with, `unix:PATH` or `tcp:HOST:PORT`.
    pub fn remote(&self) -> &str {
        &self.address
    }

    /// Bound TCP address, if this is a TCP listener.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Stops accepting connections and waits for the accept loop to exit.
    /// Established connections close within one poll interval.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!(remote = %self.address, "accept loop panicked");
            }
        }
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Listens on a unix socket, replacing any stale socket file.
#[cfg(unix)]
pub(crate) fn listen_unix(
    handler: RequestHandler,
    path: PathBuf,
    poll: Duration,
) -> ServerResult<ListenerHandle> {
    if path.exists() {
        std::fs::remove_file(&path)?;
    }
    let listener = UnixListener::bind(&path)?;
    listener.set_nonblocking(true)?;
    let address = format!("unix:{}", path.display());
    spawn_accept_loop(handler, Acceptor::Unix(listener, path), address, None, poll)
}

/// Listens on a TCP address. Port 0 picks a free port.
pub(crate) fn listen_tcp(
    handler: RequestHandler,
    addr: &str,
    poll: Duration,
) -> ServerResult<ListenerHandle> {
    let listener = TcpListener::bind(addr)?;
    listener.set_nonblocking(true)?;
    let local = listener.local_addr()?;
    let address = format!("tcp:{local}");
    spawn_accept_loop(handler, Acceptor::Tcp(listener), address, Some(local), poll)
}

fn spawn_accept_loop(
    handler: RequestHandler,
    acceptor: Acceptor,
    address: String,
    local_addr: Option<SocketAddr>,
    poll: Duration,
) -> ServerResult<ListenerHandle> {
    let stop = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&stop);
    let name = address.clone();
    let thread = thread::Builder::new()
        .name("ovsdb-accept".into())
        .spawn(move || {
            info!(remote = %name, "listening");
            while !flag.load(Ordering::SeqCst) {
                match acceptor.accept() {
                    Ok(conn) => {
                        if let Err(e) = serve(handler.clone(), conn, Arc::clone(&flag), poll) {
                            warn!(error = %e, "failed to start connection");
                        }
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => thread::sleep(poll),
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        thread::sleep(poll);
                    }
                }
            }
            info!(remote = %name, "listener stopped");
        })
        .map_err(|e| ServerError::Internal(format!("failed to spawn accept loop: {e}")))?;

    Ok(ListenerHandle {
        address,
        local_addr,
        stop,
        thread: Some(thread),
    })
}

fn serve(
    handler: RequestHandler,
    conn: Conn,
    stop: Arc<AtomicBool>,
    poll: Duration,
) -> ServerResult<()> {
    conn.set_nonblocking(false)?;
    conn.set_read_timeout(Some(poll))?;
    let writer = conn.try_clone()?;

    let (tx, rx) = mpsc::channel();
    let session = handler.open_session(tx)?;
    let max_frame_size = handler.context().config.max_frame_size;

    thread::Builder::new()
        .name(format!("ovsdb-write-{session}"))
        .spawn(move || write_loop(writer, rx))
        .map_err(|e| ServerError::Internal(format!("failed to spawn writer: {e}")))?;
    thread::Builder::new()
        .name(format!("ovsdb-read-{session}"))
        .spawn(move || {
            if let Err(e) = read_loop(&handler, session, conn, &stop, max_frame_size) {
                debug!(session, error = %e, "connection ended");
            }
            // Dropping the session drops its sender, which ends the writer.
            handler.close_session(session);
        })
        .map_err(|e| ServerError::Internal(format!("failed to spawn reader: {e}")))?;
    Ok(())
}

fn read_loop(
    handler: &RequestHandler,
    session: u64,
    mut conn: Conn,
    stop: &AtomicBool,
    max_frame_size: usize,
) -> ServerResult<()> {
    let mut decoder = FrameDecoder::new(max_frame_size);
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        if stop.load(Ordering::SeqCst) {
            conn.shutdown();
            return Ok(());
        }
        match conn.read(&mut buf) {
            Ok(0) => return Ok(()),
            Ok(n) => decoder.extend(&buf[..n]),
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
                ) =>
            {
                continue;
            }
            Err(e) => return Err(e.into()),
        }
        while let Some(message) = decoder.next_frame::<ClientMessage>()? {
            handler.handle(session, message)?;
        }
    }
}

fn write_loop(mut conn: Conn, rx: Receiver<ServerMessage>) {
    for message in rx {
        let written = encode_frame(&message)
            .map_err(ServerError::from)
            .and_then(|frame| {
                conn.write_all(&frame)?;
                conn.flush()?;
                Ok(())
            });
        if let Err(e) = written {
            debug!(error = %e, "write failed");
            break;
        }
    }
    conn.shutdown();
}
