//! Connection implementation for in-memory transport to a server in the same process.
//!
//! Frames still go through the codec in both directions, so an in-memory server sees exactly the
//! bytes a websocket server would.

use protocol::{
    DownMsg,
    UpMsg,
    EncodeOptions,
    encode_up,
    decode_up,
    encode_down,
};
use std::sync::{
    atomic::{
        AtomicBool,
        Ordering,
    },
    Arc,
};
use crossbeam_channel::{
    Sender,
    Receiver,
    TryRecvError,
    unbounded,
};
use parking_lot::Mutex;
use anyhow::{
    Result,
    bail,
};


// shared state between both ends of an in-mem connection
#[derive(Default)]
struct InMemShared {
    // whether either end has closed the connection
    killed: AtomicBool,
    // message given by whichever end closed the connection, if any
    close_reason: Mutex<Option<String>>,
}

/// Client end of an in-memory connection. Closes the connection if dropped.
pub struct InMemConnection {
    shared: Arc<InMemShared>,
    send_up: Sender<Vec<u8>>,
    recv_down: Receiver<Vec<u8>>,
}

/// Server end of an in-memory connection. Closes the connection if dropped.
pub struct InMemServer {
    shared: Arc<InMemShared>,
    send_down: Sender<Vec<u8>>,
    recv_up: Receiver<Vec<u8>>,
}

/// Create both ends of an in-memory connection.
pub fn in_mem_pair() -> (InMemConnection, InMemServer) {
    let shared = Arc::new(InMemShared::default());
    let (send_up, recv_up) = unbounded();
    let (send_down, recv_down) = unbounded();
    let client = InMemConnection {
        shared: Arc::clone(&shared),
        send_up,
        recv_down,
    };
    let server = InMemServer {
        shared,
        send_down,
        recv_up,
    };
    (client, server)
}

impl InMemConnection {
    /// Encode and send a message to the server.
    pub fn send(&self, msg: UpMsg) {
        if self.shared.killed.load(Ordering::Relaxed) {
            return;
        }
        match encode_up(&msg) {
            Ok(frame) => {
                let _ = self.send_up.send(frame);
            }
            Err(e) => {
                error!(%e, kind = ?msg.kind(), "error encoding up msg (closing connection)");
                kill(&self.shared, Some(format!("error encoding message: {}", e)));
            }
        }
    }

    /// Poll for a frame received from the server.
    ///
    /// Frames sent before the connection was closed are still delivered. After that, errors.
    pub fn poll(&self) -> Result<Option<Vec<u8>>> {
        match self.recv_down.try_recv() {
            Ok(frame) => Ok(Some(frame)),
            Err(TryRecvError::Empty) if !self.shared.killed.load(Ordering::Relaxed) => Ok(None),
            Err(_) => match self.shared.close_reason.lock().as_ref() {
                Some(reason) => bail!("in-mem connection closed: {}", reason),
                None => bail!("in-mem connection closed"),
            },
        }
    }
}

impl Drop for InMemConnection {
    fn drop(&mut self) {
        kill(&self.shared, None);
    }
}

impl InMemServer {
    /// Encode and send a message to the client.
    pub fn send_msg(&self, msg: &DownMsg, options: EncodeOptions) -> protocol::Result<()> {
        let frame = encode_down(msg, options)?;
        self.send_frame(frame);
        Ok(())
    }

    /// Send an already encoded frame to the client.
    pub fn send_frame(&self, frame: Vec<u8>) {
        if !self.shared.killed.load(Ordering::Relaxed) {
            let _ = self.send_down.send(frame);
        }
    }

    /// Receive and decode the next message from the client, if any.
    pub fn try_recv(&self) -> protocol::Result<Option<UpMsg>> {
        match self.recv_up.try_recv() {
            Ok(frame) => decode_up(&frame).map(Some),
            Err(_) => Ok(None),
        }
    }

    /// Receive and decode all messages from the client currently queued.
    pub fn recv_all(&self) -> protocol::Result<Vec<UpMsg>> {
        let mut msgs = Vec::new();
        while let Some(msg) = self.try_recv()? {
            msgs.push(msg);
        }
        Ok(msgs)
    }

    /// Close the connection, with a message for the client.
    pub fn close(&self, reason: Option<String>) {
        kill(&self.shared, reason);
    }

    /// Whether either end has closed the connection.
    pub fn is_closed(&self) -> bool {
        self.shared.killed.load(Ordering::Relaxed)
    }
}

impl Drop for InMemServer {
    fn drop(&mut self) {
        kill(&self.shared, None);
    }
}

// close the connection, if not already closed. the first reason given wins.
fn kill(shared: &InMemShared, reason: Option<String>) {
    let mut close_reason = shared.close_reason.lock();
    if !shared.killed.swap(true, Ordering::Relaxed) {
        *close_reason = reason;
    }
}


#[test]
fn test_in_mem_round_trip() {
    use protocol::UpMsgLoad;
    use vek::*;

    let (client, server) = in_mem_pair();
    let msg = UpMsg::from(UpMsgLoad {
        center: Some(Vec2::new(0, 0)),
        chunks: vec![Vec2::new(1, 2)],
    });
    client.send(msg.clone());
    assert_eq!(server.recv_all().unwrap(), [msg]);

    server.send_msg(&DownMsg::Error("hi".to_owned()), EncodeOptions::default()).unwrap();
    let frame = client.poll().unwrap().unwrap();
    assert!(matches!(protocol::decode_down(&frame).unwrap(), DownMsg::Error(s) if s == "hi"));
    assert!(client.poll().unwrap().is_none());
}

#[test]
fn test_in_mem_close_delivers_queued_frames() {
    let (client, server) = in_mem_pair();
    server.send_frame(vec![1, 2, 3]);
    server.close(Some("bye".to_owned()));
    assert_eq!(client.poll().unwrap(), Some(vec![1, 2, 3]));
    let e = client.poll().unwrap_err();
    assert!(e.to_string().contains("bye"));
}

#[test]
fn test_in_mem_drop_closes() {
    let (client, server) = in_mem_pair();
    drop(client);
    assert!(server.is_closed());
}
