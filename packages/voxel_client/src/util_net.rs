//! Network utilities.

use std::time::Duration;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::{
    protocol::frame::{
        coding::CloseCode,
        CloseFrame,
    },
    error::Error as TungsteniteError,
    Message,
};
use futures::{
    sink::{Sink, SinkExt},
    future::pending,
    Future,
};


/// Attempt to elegantly close a websocket connection by sending a close message, with a timeout.
/// If `reason` is given it will be sent in a close frame to the server.
pub async fn try_close<W>(mut ws: W, reason: Option<&'static str>, timeout_duration: Duration)
where
    W: Sink<Message, Error=TungsteniteError> + Unpin,
{
    trace!(?reason, "sending ws close frame");
    let close_frame = reason
        .map(|reason| CloseFrame {
            code: CloseCode::Normal,
            reason: reason.into(),
        });
    let result = timeout(timeout_duration, ws.send(Message::Close(close_frame))).await;
    match result {
        Ok(Ok(())) => (),
        Ok(Err(e)) => trace!(%e, "error sending close frame"),
        Err(_) => trace!("timeout sending close frame"),
    }
}

/// Wrapper around a future option that resolves to the some value or pends forever.
pub async fn some_or_pending<T, F: Future<Output=Option<T>>>(option: F) -> T {
    match option.await {
        Some(t) => t,
        None => pending().await,
    }
}
