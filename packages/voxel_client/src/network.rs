//! Client side of the connection to the server: a transport plus a decode pipeline.

use crate::{
    transport::{
        Transport,
        TransportEvent,
    },
    decode::DecodePipeline,
    settings::NetworkSettings,
    worker_pool::PoolContext,
};
use protocol::{
    DownMsg,
    UpMsg,
};
use anyhow::Result;


/// Connection to the server which decodes received frames off the calling thread.
pub struct Network {
    transport: Transport,
    decode: DecodePipeline,
    // set once the transport reports closing
    closed: Option<Option<String>>,
}

impl Network {
    /// Construct, spawning decode worker threads.
    pub fn new(transport: Transport, settings: &NetworkSettings) -> Result<Self> {
        Self::with_context(transport, settings, PoolContext::new())
    }

    /// Construct, counting busy decode worker threads in the given context.
    pub fn with_context(
        transport: Transport,
        settings: &NetworkSettings,
        ctx: PoolContext,
    ) -> Result<Self> {
        let decode = DecodePipeline::with_context(
            settings.decode_worker_count(),
            settings.max_packets_per_tick,
            ctx,
        )?;
        Ok(Network {
            transport,
            decode,
            closed: None,
        })
    }

    /// Pull received frames into the decode pipeline and return whatever messages finished
    /// decoding, in the order they were received.
    pub fn tick(&mut self) -> Vec<DownMsg> {
        while let Some(event) = self.transport.poll() {
            match event {
                TransportEvent::Received(frame) => self.decode.push_frame(frame),
                TransportEvent::Closed(reason) => {
                    match reason.as_ref() {
                        Some(reason) => info!(%reason, "connection closed"),
                        None => info!("connection closed"),
                    }
                    self.closed = Some(reason);
                }
            }
        }
        self.decode.tick()
    }

    /// Enqueue a message to be transmitted to the server.
    pub fn send<M: Into<UpMsg>>(&self, msg: M) {
        self.transport.send(msg);
    }

    /// Whether the connection has closed. Frames received before closing may still be decoding.
    pub fn is_closed(&self) -> bool {
        self.closed.is_some()
    }

    /// Message the connection closed with, if it's closed and gave one.
    pub fn close_reason(&self) -> Option<&str> {
        self.closed.as_ref().and_then(|reason| reason.as_deref())
    }

    /// Whether the connection has closed and every received frame has been decoded and returned.
    pub fn is_finished(&self) -> bool {
        self.is_closed() && self.decode.is_idle()
    }

    pub fn decode(&self) -> &DecodePipeline {
        &self.decode
    }
}
