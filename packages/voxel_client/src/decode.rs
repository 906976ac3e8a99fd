//! Decoding received frames into messages on a worker pool.

use crate::worker_pool::{
    Worker,
    WorkerPool,
    PoolContext,
    JobHandle,
    JobStatus,
};
use protocol::{
    DownMsg,
    decode_down,
};
use std::collections::VecDeque;
use anyhow::{
    Result,
    Context,
};


/// Worker which decodes a batch of frames. Any frame failing to decode fails the whole batch.
#[derive(Debug, Default)]
pub struct DecodeWorker;

impl Worker for DecodeWorker {
    type Msg = Vec<Vec<u8>>;
    type Out = Vec<DownMsg>;
    type Config = ();

    fn handle(&mut self, frames: Vec<Vec<u8>>) -> Result<Vec<DownMsg>> {
        frames
            .iter()
            .enumerate()
            .map(|(i, frame)| decode_down(frame)
                .with_context(|| format!("decoding frame {} of batch", i)))
            .collect()
    }

    fn configure(&mut self, (): ()) {}
}


/// Queue of received frames which decodes them in batches off the calling thread.
///
/// At most one batch is submitted per tick, and only when the pool has an idle worker. Decoded
/// messages come out in the order their frames were pushed in.
pub struct DecodePipeline {
    pool: WorkerPool<DecodeWorker>,
    // frames not yet submitted
    queue: VecDeque<Vec<u8>>,
    // submitted batches, in submission order
    in_flight: VecDeque<JobHandle<Vec<DownMsg>>>,
    max_packets_per_tick: usize,
}

impl DecodePipeline {
    /// Construct, spawning `workers` decode threads.
    pub fn new(workers: usize, max_packets_per_tick: usize) -> Result<Self> {
        Self::with_context(workers, max_packets_per_tick, PoolContext::new())
    }

    /// Construct, counting busy decode threads in the given context.
    pub fn with_context(
        workers: usize,
        max_packets_per_tick: usize,
        ctx: PoolContext,
    ) -> Result<Self> {
        Ok(DecodePipeline {
            pool: WorkerPool::with_context("decode", workers, ctx, |_| DecodeWorker)?,
            queue: VecDeque::new(),
            in_flight: VecDeque::new(),
            max_packets_per_tick: max_packets_per_tick.max(1),
        })
    }

    /// Enqueue a received frame.
    pub fn push_frame(&mut self, frame: Vec<u8>) {
        self.queue.push_back(frame);
    }

    /// Number of frames not yet submitted for decoding.
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Number of submitted batches not yet delivered.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Whether nothing is queued or in flight.
    pub fn is_idle(&self) -> bool {
        self.queue.is_empty() && self.in_flight.is_empty()
    }

    /// Submit a batch if the pool is free, and return messages from batches which finished, in
    /// order.
    ///
    /// A batch that fails to decode is logged and dropped. Its frames are not retried.
    pub fn tick(&mut self) -> Vec<DownMsg> {
        self.pool.poll();

        if !self.pool.is_busy() && !self.queue.is_empty() {
            let n = self.queue.len().min(self.max_packets_per_tick);
            let batch: Vec<Vec<u8>> = self.queue.drain(..n).collect();
            trace!(frames = batch.len(), "submitting decode batch");
            self.in_flight.push_back(self.pool.add_job(batch));
        }

        let mut msgs = Vec::new();
        while let Some(handle) = self.in_flight.front_mut() {
            match handle.poll() {
                JobStatus::Pending => break,
                JobStatus::Resolved(batch) => msgs.extend(batch),
                JobStatus::Rejected(e) => error!(?e, "failed to decode batch (dropping it)"),
            }
            self.in_flight.pop_front();
        }
        msgs
    }
}


#[cfg(test)]
fn tick_until<F>(pipeline: &mut DecodePipeline, mut done: F) -> Vec<DownMsg>
where
    F: FnMut(&DecodePipeline, &[DownMsg]) -> bool,
{
    let start = std::time::Instant::now();
    let mut msgs = Vec::new();
    while !done(pipeline, &msgs) {
        assert!(start.elapsed() < std::time::Duration::from_secs(10), "decoding timed out");
        msgs.extend(pipeline.tick());
        std::thread::sleep(std::time::Duration::from_millis(1));
    }
    msgs
}

#[cfg(test)]
fn chat_frame(text: &str, frame: protocol::Compression) -> Vec<u8> {
    let options = protocol::EncodeOptions {
        frame,
        ..Default::default()
    };
    protocol::encode_down(&DownMsg::Chat(text.to_owned()), options).unwrap()
}

#[test]
fn test_decode_order() {
    use protocol::Compression;

    let mut pipeline = DecodePipeline::new(4, 16).unwrap();
    // differing compression so the frames cost differing amounts to decode
    pipeline.push_frame(chat_frame(&"A".repeat(100_000), Compression::Zlib));
    pipeline.push_frame(chat_frame("B", Compression::None));
    pipeline.push_frame(chat_frame("C", Compression::Lz4));
    let msgs = tick_until(&mut pipeline, |p, _| p.is_idle());
    let texts: Vec<String> = msgs
        .into_iter()
        .map(|msg| match msg {
            DownMsg::Chat(text) => text.chars().take(1).collect(),
            msg => panic!("unexpected {:?}", msg.kind()),
        })
        .collect();
    assert_eq!(texts, ["A", "B", "C"]);
}

#[test]
fn test_order_across_batches() {
    let mut pipeline = DecodePipeline::new(2, 1).unwrap();
    for i in 0..5 {
        pipeline.push_frame(chat_frame(&i.to_string(), protocol::Compression::None));
    }
    let msgs = tick_until(&mut pipeline, |p, _| p.is_idle());
    let texts: Vec<String> = msgs
        .into_iter()
        .map(|msg| match msg {
            DownMsg::Chat(text) => text,
            msg => panic!("unexpected {:?}", msg.kind()),
        })
        .collect();
    assert_eq!(texts, ["0", "1", "2", "3", "4"]);
}

#[test]
fn test_malformed_frame_drops_batch() {
    let mut pipeline = DecodePipeline::new(1, 16).unwrap();
    pipeline.push_frame(chat_frame("lost", protocol::Compression::None));
    pipeline.push_frame(vec![200, 1, 2, 3]);
    let msgs = tick_until(&mut pipeline, |p, _| p.is_idle());
    assert!(msgs.is_empty());

    // later batches are unaffected
    pipeline.push_frame(chat_frame("kept", protocol::Compression::None));
    let msgs = tick_until(&mut pipeline, |_, msgs| !msgs.is_empty());
    assert!(matches!(&msgs[..], [DownMsg::Chat(text)] if text == "kept"));
}

#[test]
fn test_one_batch_per_free_pool() {
    let mut pipeline = DecodePipeline::new(1, 2).unwrap();
    for i in 0..5 {
        pipeline.push_frame(chat_frame(&i.to_string(), protocol::Compression::None));
    }
    pipeline.tick();
    assert_eq!(pipeline.queue_len(), 3);
    let msgs = tick_until(&mut pipeline, |p, _| p.is_idle());
    assert_eq!(msgs.len(), 5);
}
