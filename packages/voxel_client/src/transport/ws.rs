//! Connection implementation for websocket transport.
//!
//! Each down message arrives as one binary websocket message holding one frame, and each up
//! message is sent as one. A receive task reads frames and answers pings, a send task encodes and
//! writes messages, and either one closing tells the other to shut down.

use super::TransportEvent;
use crate::util_net::{
    try_close,
    some_or_pending,
};
use protocol::{
    UpMsg,
    encode_up,
};
use std::{
    sync::Arc,
    time::Duration,
    convert::Infallible,
};
use url::{
    Url,
    ParseError,
};
use tokio::{
    sync::{
        mpsc::{
            Sender,
            Receiver,
            UnboundedSender,
            UnboundedReceiver,
            channel,
            unbounded_channel,
        },
        Notify,
    },
    runtime::Handle,
};
use tokio_tungstenite::{
    tungstenite::{
        protocol::WebSocketConfig,
        error::Error as TungsteniteError,
        Message,
    },
    connect_async_with_config,
};
use futures::{
    stream::{Stream, StreamExt},
    sink::{Sink, SinkExt},
    FutureExt,
    select_biased,
};
use anyhow::{
    Error,
    bail,
};


// number of simultaneous ping pong messages the client will buffer for sending back in a response
// before backpressure is triggered on receive from the websocket connection.
const PING_PONG_BUFFER_LIMIT: usize = 10;

// 16 MiB. maximum message size we tell the websocket implementation to be willing to receive.
const RECEIVE_BUFFER_LIMIT: usize = 16 << 20;

// timeout for attempting to send a close frame on a websocket connection.
const SEND_CLOSE_TIMEOUT: Duration = Duration::from_secs(10);

// port used if the url doesn't give one.
const DEFAULT_PORT: u16 = 4000;


// connection inner type for websocket transport
pub(super) struct Connection {
    // sender for queue of messages to be transmitted to server
    send_send: UnboundedSender<UpMsg>,
    // receiver for events produced by the receive task
    recv_event: crossbeam_channel::Receiver<TransportEvent>,
    // connection-level shared state
    shared: Arc<ConnShared>,
}

struct ConnShared {
    // tell the receive task to cleanly close the connection, can be called from anywhere.
    shutdown_recv: Notify,
    // tell the send task to send a close message if it can, then terminate. only called from the
    // receive task.
    shutdown_send: Notify,
}


impl Connection {
    // initiate connection. returns immediately and has the connection initialize in the
    // background, closing the connection if that process fails.
    pub(super) fn connect(url: &str, rt: &Handle) -> Self {
        let (send_send, recv_send) = unbounded_channel();
        let (send_event, recv_event) = crossbeam_channel::unbounded();
        let shared_1 = Arc::new(ConnShared {
            shutdown_recv: Notify::new(),
            shutdown_send: Notify::new(),
        });
        let shared_2 = Arc::clone(&shared_1);
        rt.spawn(recv_task(url.to_owned(), recv_send, send_event, rt.clone(), shared_1));
        Connection { send_send, recv_event, shared: shared_2 }
    }

    // see outer type
    pub(super) fn send(&self, msg: UpMsg) {
        let _ = self.send_send.send(msg);
    }

    // see outer type
    pub(super) fn poll(&self) -> Option<TransportEvent> {
        match self.recv_event.try_recv() {
            Ok(event) => Some(event),
            Err(crossbeam_channel::TryRecvError::Empty) => None,
            Err(crossbeam_channel::TryRecvError::Disconnected) => {
                Some(TransportEvent::Closed(None))
            }
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.shared.shutdown_recv.notify_one();
    }
}

// body of the receive task for a connection.
async fn recv_task(
    url: String,
    recv_send: UnboundedReceiver<UpMsg>,
    send_event: crossbeam_channel::Sender<TransportEvent>,
    rt: Handle,
    shared: Arc<ConnShared>,
) {
    // parse url
    let url = match parse_url(&url) {
        Ok(url) => url,
        Err(e) => {
            error!(%e, ?url, "error parsing url");
            let _ = send_event.send(TransportEvent::Closed(Some(format!("invalid url: {}", e))));
            return;
        }
    };
    info!("connecting to {}", url);

    // try to connect and do ws handshake
    let connect = connect_async_with_config(
        url,
        Some(WebSocketConfig {
            max_message_size: Some(RECEIVE_BUFFER_LIMIT),
            ..Default::default()
        }),
        true
    );
    let result = select_biased! {
        _ = shared.shutdown_recv.notified().fuse() => {
            // abandon attempt if connection dropped by user
            trace!("abandoning ws connect because connection closed");
            return;
        }
        result = connect.fuse() => result
    };
    let ws = match result {
        Ok((ws, _)) => ws,
        Err(e) => {
            // close connection on failure
            error!(%e, "error establishing ws connection");
            let _ = send_event.send(TransportEvent::Closed(Some(
                format!("unable to connect: {}", e)
            )));
            return;
        }
    };
    info!("connected");
    let (ws_send, mut ws_recv) = ws.split();

    // spawn the send task
    let (send_pong, recv_pong) = channel(PING_PONG_BUFFER_LIMIT);
    rt.spawn(send_task(ws_send, Arc::clone(&shared), recv_pong, recv_send));

    // enter recv loop until something breaks it
    let recv_loop = recv_loop(&mut ws_recv, send_pong, &send_event);
    let closed_event = select_biased! {
        _ = shared.shutdown_recv.notified().fuse() => {
            // shutdown requested
            trace!("recv task shutting down because shut down requested");
            None
        }
        result = recv_loop.fuse() => {
            // recv loop errored
            let e = match result {
                Err(e) => e,
                Ok(never) => match never {},
            };
            error!(%e, "recv loop error (closing connection)");
            Some(TransportEvent::Closed(Some(e.to_string())))
        }
    };

    // shut down elegantly
    shared.shutdown_send.notify_one();
    if let Some(closed_event) = closed_event {
        let _ = send_event.send(closed_event);
    }
}

// message receiving loop for the portion of recv task where the connection is alive
async fn recv_loop<W>(
    ws: &mut W,
    send_pong: Sender<Vec<u8>>,
    send_event: &crossbeam_channel::Sender<TransportEvent>,
) -> Result<Infallible, Error>
where
    W: Stream<Item=Result<Message, TungsteniteError>> + Unpin,
{
    loop {
        // receive next binary message or early escape loop iteration
        let item = ws.next().await;
        let frame = match item {
            // found binary message
            Some(Ok(Message::Binary(frame))) => frame,
            Some(Ok(Message::Ping(msg))) => {
                // respond to ping with pong and continue
                let _ = send_pong.send(msg).await;
                continue;
            }
            Some(Ok(Message::Pong(_))) => continue,
            Some(Ok(Message::Close(close_frame))) => {
                // if connection closed on ws level, that's an error
                if let Some(close_frame) = close_frame {
                    trace!(?close_frame, "received close frame from server");
                }
                bail!("server closed connection");
            }
            // other message types are protocol errors
            Some(Ok(_)) => bail!("server send invalid ws msg type"),
            // errors are errors
            Some(Err(e)) => Err(e)?,
            // closing in this way is an error
            None => bail!("ws connection closed"),
        };

        // deliver received frame to user, undecoded
        if send_event.send(TransportEvent::Received(frame)).is_err() {
            bail!("connection handle dropped");
        }
    }
}

// body of the send task for a connection
async fn send_task<W>(
    mut ws: W,
    shared: Arc<ConnShared>,
    recv_pong: Receiver<Vec<u8>>,
    recv_send: UnboundedReceiver<UpMsg>,
)
where
    W: Sink<Message, Error=TungsteniteError> + Unpin,
{
    // enter send loop until something breaks it
    let send_loop = send_loop(&mut ws, recv_pong, recv_send);
    select_biased! {
        _ = shared.shutdown_send.notified().fuse() => {
            // shutdown requested
            trace!("send task shutting down because shut down requested");
        }
        result = send_loop.fuse() => {
            // send loop errored
            let e = match result {
                Err(e) => e,
                Ok(never) => match never {},
            };
            // tell the receive task to shut down in this case
            error!(%e, "send loop error (closing connection)");
            shared.shutdown_recv.notify_one();
        }
    }

    // try to close elegantly
    try_close(ws, None, SEND_CLOSE_TIMEOUT).await;
}

// message sending loop for the portion of send task where the connection is alive
async fn send_loop<W>(
    ws: &mut W,
    mut recv_pong: Receiver<Vec<u8>>,
    mut recv_send: UnboundedReceiver<UpMsg>,
) -> Result<Infallible, Error>
where
    W: Sink<Message, Error=TungsteniteError> + Unpin,
{
    loop {
        // get message to send or early escape loop iteration
        let msg = select_biased! {
            msg = some_or_pending(recv_pong.recv()).fuse() => {
                // respond to ping with pong then skip to next loop iteration
                ws.send(Message::Pong(msg)).await?;
                continue
            }
            msg = some_or_pending(recv_send.recv()).fuse() => msg,
        };

        // encode and transmit
        let frame = encode_up(&msg)?;
        ws.send(Message::Binary(frame)).await?;
    }
}

// parse url and fill in default parts if absent
fn parse_url(url: &str) -> Result<Url, Error> {
    let mut url = match Url::parse(url) {
        Ok(url) => url,
        Err(ParseError::RelativeUrlWithoutBase) => Url::parse(&format!("ws://{}", url))?,
        Err(e) => Err(e)?,
    };
    if url.port().is_none() {
        url
            .set_port(Some(DEFAULT_PORT))
            .map_err(|()| anyhow::anyhow!("url cannot have a port"))?;
    }
    Ok(url)
}


#[test]
fn test_parse_url_defaults() {
    let url = parse_url("localhost").unwrap();
    assert_eq!(url.scheme(), "ws");
    assert_eq!(url.port(), Some(DEFAULT_PORT));

    let url = parse_url("wss://example.com:1234/world").unwrap();
    assert_eq!(url.scheme(), "wss");
    assert_eq!(url.port(), Some(1234));
    assert_eq!(url.path(), "/world");
}
