//! Transport abstraction between the replica and the database server.
//!
//! A transport moves whole protocol messages. Reads are split into a
//! non-blocking [`Transport::try_recv`] and a bounded
//! [`Transport::wait_readable`] so the IDL can drive its own event loop.

use crate::error::{IdlError, IdlResult};
use ovsdb_protocol::{ClientMessage, ServerMessage};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Message transport to a database server.
pub trait Transport: Send {
    /// Sends one message.
    fn send(&mut self, message: ClientMessage) -> IdlResult<()>;

    /// Returns the next received message without blocking.
    fn try_recv(&mut self) -> IdlResult<Option<ServerMessage>>;

    /// Blocks until a message may be available or `timeout` elapses.
    ///
    /// Returns true if [`Transport::try_recv`] is likely to yield a message.
    fn wait_readable(&mut self, timeout: Duration) -> IdlResult<bool>;

    /// Returns true while the transport can send and receive.
    fn is_connected(&self) -> bool;

    /// Closes the transport. Closing twice is a no-op.
    fn close(&mut self) -> IdlResult<()>;

    /// Describes the remote end for logs.
    fn peer(&self) -> String {
        "remote".to_string()
    }
}

/// In-process transport over a pair of channels.
///
/// Used to attach a client to a server running on another thread of the
/// same process.
#[derive(Debug)]
pub struct ChannelTransport {
    tx: Option<Sender<ClientMessage>>,
    rx: Receiver<ServerMessage>,
    pending: VecDeque<ServerMessage>,
    peer: String,
}

/// Server side of a [`ChannelTransport::pair`].
#[derive(Debug)]
pub struct ChannelPeer {
    /// Messages sent by the client.
    pub incoming: Receiver<ClientMessage>,
    /// Messages delivered to the client.
    pub outgoing: Sender<ServerMessage>,
}

impl ChannelTransport {
    /// Wraps existing channel ends.
    pub fn new(tx: Sender<ClientMessage>, rx: Receiver<ServerMessage>) -> Self {
        Self {
            tx: Some(tx),
            rx,
            pending: VecDeque::new(),
            peer: "channel".to_string(),
        }
    }

    /// Creates a connected transport together with its server side.
    pub fn pair() -> (Self, ChannelPeer) {
        let (client_tx, incoming) = mpsc::channel();
        let (outgoing, client_rx) = mpsc::channel();
        (
            Self::new(client_tx, client_rx),
            ChannelPeer { incoming, outgoing },
        )
    }

    /// Sets the peer description used in logs.
    pub fn with_peer(mut self, peer: impl Into<String>) -> Self {
        self.peer = peer.into();
        self
    }
}

impl Transport for ChannelTransport {
    fn send(&mut self, message: ClientMessage) -> IdlResult<()> {
        let tx = self.tx.as_ref().ok_or(IdlError::Closed)?;
        tx.send(message)
            .map_err(|_| IdlError::connection(format!("{} hung up", self.peer)))
    }

    fn try_recv(&mut self) -> IdlResult<Option<ServerMessage>> {
        if self.tx.is_none() {
            return Err(IdlError::Closed);
        }
        if let Some(message) = self.pending.pop_front() {
            return Ok(Some(message));
        }
        match self.rx.try_recv() {
            Ok(message) => Ok(Some(message)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => {
                Err(IdlError::connection(format!("{} hung up", self.peer)))
            }
        }
    }

    fn wait_readable(&mut self, timeout: Duration) -> IdlResult<bool> {
        if self.tx.is_none() {
            return Err(IdlError::Closed);
        }
        if !self.pending.is_empty() {
            return Ok(true);
        }
        match self.rx.recv_timeout(timeout) {
            Ok(message) => {
                self.pending.push_back(message);
                Ok(true)
            }
            Err(RecvTimeoutError::Timeout) => Ok(false),
            Err(RecvTimeoutError::Disconnected) => {
                Err(IdlError::connection(format!("{} hung up", self.peer)))
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.tx.is_some()
    }

    fn close(&mut self) -> IdlResult<()> {
        self.tx = None;
        self.pending.clear();
        Ok(())
    }

    fn peer(&self) -> String {
        self.peer.clone()
    }
}

type Responder = Box<dyn FnMut(&ClientMessage) -> Vec<ServerMessage> + Send>;

struct MockState {
    connected: bool,
    inbox: VecDeque<ServerMessage>,
    sent: Vec<ClientMessage>,
    responder: Option<Responder>,
    closes: usize,
}

/// Scripted transport for tests.
///
/// Clones share state, so a test can keep a handle after moving the
/// transport into an [`Idl`](crate::Idl).
#[derive(Clone)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    /// Creates a connected mock with no scripted replies.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                connected: true,
                inbox: VecDeque::new(),
                sent: Vec::new(),
                responder: None,
                closes: 0,
            })),
        }
    }

    /// Creates a mock that answers every sent message with `responder`.
    pub fn with_responder(
        responder: impl FnMut(&ClientMessage) -> Vec<ServerMessage> + Send + 'static,
    ) -> Self {
        let mock = Self::new();
        mock.state.lock().responder = Some(Box::new(responder));
        mock
    }

    /// Queues a message for the client to receive.
    pub fn push(&self, message: ServerMessage) {
        self.state.lock().inbox.push_back(message);
    }

    /// Returns every message sent so far.
    pub fn sent(&self) -> Vec<ClientMessage> {
        self.state.lock().sent.clone()
    }

    /// Simulates connection loss or recovery.
    pub fn set_connected(&self, connected: bool) {
        self.state.lock().connected = connected;
    }

    /// Returns how many times the transport was closed.
    pub fn close_count(&self) -> usize {
        self.state.lock().closes
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MockTransport")
            .field("connected", &state.connected)
            .field("inbox", &state.inbox.len())
            .field("sent", &state.sent.len())
            .finish()
    }
}

impl Transport for MockTransport {
    fn send(&mut self, message: ClientMessage) -> IdlResult<()> {
        let responder = {
            let mut state = self.state.lock();
            if !state.connected {
                return Err(IdlError::connection("mock transport disconnected"));
            }
            state.sent.push(message.clone());
            state.responder.take()
        };

        if let Some(mut responder) = responder {
            let replies = responder(&message);
            let mut state = self.state.lock();
            state.inbox.extend(replies);
            state.responder = Some(responder);
        }
        Ok(())
    }

    fn try_recv(&mut self) -> IdlResult<Option<ServerMessage>> {
        let mut state = self.state.lock();
        if !state.connected {
            return Err(IdlError::connection("mock transport disconnected"));
        }
        Ok(state.inbox.pop_front())
    }

    fn wait_readable(&mut self, timeout: Duration) -> IdlResult<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            {
                let state = self.state.lock();
                if !state.connected {
                    return Err(IdlError::connection("mock transport disconnected"));
                }
                if !state.inbox.is_empty() {
                    return Ok(true);
                }
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            std::thread::sleep((deadline - now).min(Duration::from_millis(1)));
        }
    }

    fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    fn close(&mut self) -> IdlResult<()> {
        let mut state = self.state.lock();
        state.connected = false;
        state.closes += 1;
        Ok(())
    }

    fn peer(&self) -> String {
        "mock".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_pair_round_trip() {
        let (mut transport, peer) = ChannelTransport::pair();
        transport.send(ClientMessage::Echo { id: 1 }).unwrap();
        assert_eq!(peer.incoming.recv().unwrap(), ClientMessage::Echo { id: 1 });

        assert_eq!(transport.try_recv().unwrap(), None);
        peer.outgoing.send(ServerMessage::EchoReply { id: 1 }).unwrap();
        assert!(transport.wait_readable(Duration::from_secs(1)).unwrap());
        assert_eq!(
            transport.try_recv().unwrap(),
            Some(ServerMessage::EchoReply { id: 1 })
        );
    }

    #[test]
    fn channel_wait_times_out() {
        let (mut transport, _peer) = ChannelTransport::pair();
        assert!(!transport.wait_readable(Duration::from_millis(10)).unwrap());
    }

    #[test]
    fn channel_reports_hang_up() {
        let (mut transport, peer) = ChannelTransport::pair();
        drop(peer);
        assert!(matches!(
            transport.try_recv(),
            Err(IdlError::Connection { .. })
        ));
    }

    #[test]
    fn channel_close_is_idempotent() {
        let (mut transport, _peer) = ChannelTransport::pair();
        transport.close().unwrap();
        transport.close().unwrap();
        assert!(!transport.is_connected());
        assert!(matches!(
            transport.send(ClientMessage::Echo { id: 2 }),
            Err(IdlError::Closed)
        ));
    }

    #[test]
    fn mock_responder_replies() {
        let mut mock = MockTransport::with_responder(|message| match message {
            ClientMessage::Echo { id } => vec![ServerMessage::EchoReply { id: *id }],
            _ => vec![],
        });
        let handle = mock.clone();

        mock.send(ClientMessage::Echo { id: 9 }).unwrap();
        assert_eq!(handle.sent().len(), 1);
        assert!(mock.wait_readable(Duration::ZERO).unwrap());
        assert_eq!(
            mock.try_recv().unwrap(),
            Some(ServerMessage::EchoReply { id: 9 })
        );
    }

    #[test]
    fn mock_disconnected_errors() {
        let mut mock = MockTransport::new();
        mock.set_connected(false);
        assert!(matches!(
            mock.send(ClientMessage::Echo { id: 1 }),
            Err(IdlError::Connection { .. })
        ));
    }

    #[test]
    fn mock_counts_closes() {
        let mut mock = MockTransport::new();
        let handle = mock.clone();
        mock.close().unwrap();
        assert_eq!(handle.close_count(), 1);
        assert!(!handle.is_connected());
    }
}
