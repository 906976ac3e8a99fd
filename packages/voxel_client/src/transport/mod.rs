//! Handle to the network IO connection to the server.
//!
//! Transports move whole binary frames. Received frames are handed out undecoded so that
//! decoding can happen on the decode pool, and messages sent are encoded by the transport.

mod ws;
mod in_mem;

pub use self::in_mem::{
    InMemConnection,
    InMemServer,
    in_mem_pair,
};

use protocol::UpMsg;
use tokio::runtime::Handle;


/// Handle to the network IO connection to the server.
///
/// Closes the connection when dropped.
pub struct Transport {
    inner: TransportInner,
    // whether a closed event has been returned
    closed: bool,
}

enum TransportInner {
    Ws(ws::Connection),
    InMem(InMemConnection),
}

/// Network event for the client.
#[derive(Debug)]
pub enum TransportEvent {
    /// Binary frame received from connection, not yet decoded.
    Received(Vec<u8>),
    /// Connection closed. No further events will occur after this. May contain message suitable
    /// for displaying to user.
    Closed(Option<String>),
}

impl Transport {
    /// Connect to a server at the given websocket url.
    ///
    /// Returns immediately without blocking or erroring, spawning a task to initialize the
    /// connection in the background. If that initialization fails, will simply appear as the
    /// connection closing.
    pub fn connect(url: &str, rt: &Handle) -> Self {
        Self::from_inner(TransportInner::Ws(ws::Connection::connect(url, rt)))
    }

    /// Wrap around an in-memory connection.
    pub fn in_mem(inner: InMemConnection) -> Self {
        Self::from_inner(TransportInner::InMem(inner))
    }

    fn from_inner(inner: TransportInner) -> Self {
        Transport { inner, closed: false }
    }

    /// Enqueue a message to be transmitted to the server.
    pub fn send<M: Into<UpMsg>>(&self, msg: M) {
        match &self.inner {
            &TransportInner::Ws(ref inner) => inner.send(msg.into()),
            &TransportInner::InMem(ref inner) => inner.send(msg.into()),
        }
    }

    /// Poll for the next network event without blocking.
    pub fn poll(&mut self) -> Option<TransportEvent> {
        if self.closed {
            return None;
        }
        let event = match &self.inner {
            &TransportInner::Ws(ref inner) => inner.poll(),
            &TransportInner::InMem(ref inner) => match inner.poll() {
                Ok(opt_frame) => opt_frame.map(TransportEvent::Received),
                Err(e) => Some(TransportEvent::Closed(Some(e.to_string()))),
            },
        };
        if let Some(TransportEvent::Closed(_)) = event {
            self.closed = true;
        }
        event
    }

    /// Whether a closed event has been returned by `poll`.
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl From<InMemConnection> for Transport {
    fn from(inner: InMemConnection) -> Self {
        Self::in_mem(inner)
    }
}
