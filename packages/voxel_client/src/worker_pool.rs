//! Fixed-size pool of background worker threads which each do one job at a time.
//!
//! All bookkeeping lives on the thread that owns the `WorkerPool`. Each unit is a thread with
//! its own inbox. A job goes straight to an idle unit if there is one, and otherwise waits in a
//! FIFO queue. When a unit finishes it tells the pool, but the pool only notices (and hands
//! the unit its next job) when `poll` is called. This keeps re-dispatch iterative no matter how
//! many jobs finish back-to-back.

use std::{
    any::Any,
    collections::VecDeque,
    panic::{
        catch_unwind,
        AssertUnwindSafe,
    },
    sync::{
        Arc,
        atomic::{
            AtomicUsize,
            Ordering,
        },
    },
    thread,
};
use crossbeam_channel::{
    Sender,
    Receiver,
    TryRecvError,
    SendError,
    unbounded,
    bounded,
};
use anyhow::{
    Result,
    Error,
    Context,
    anyhow,
};


/// Number of units used when asked for 0.
pub const DEFAULT_WORKERS: usize = 8;

/// Most units a single pool will create.
pub const MAX_WORKERS: usize = 256;

/// Clamp a requested unit count into `1..=MAX_WORKERS`, with 0 meaning `DEFAULT_WORKERS`.
pub fn normalize_worker_count(count: usize) -> usize {
    if count == 0 {
        DEFAULT_WORKERS
    } else {
        count.min(MAX_WORKERS)
    }
}


/// Logic that runs on a unit. Each unit owns its own instance.
pub trait Worker: Send + 'static {
    /// Job input.
    type Msg: Send + 'static;
    /// Job output.
    type Out: Send + 'static;
    /// Reconfiguration broadcast to all units.
    type Config: Clone + Send + 'static;

    fn handle(&mut self, msg: Self::Msg) -> Result<Self::Out>;

    fn configure(&mut self, config: Self::Config);
}


/// Count of busy units, shareable between pools.
#[derive(Debug, Default, Clone)]
pub struct PoolContext(Arc<AtomicUsize>);

impl PoolContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of units currently working on a job, across all pools sharing this context.
    pub fn working_count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}


/// Terminal or non-terminal status of a job.
#[derive(Debug)]
pub enum JobStatus<T> {
    Pending,
    Resolved(T),
    Rejected(Error),
}

/// Handle to a job's eventual result.
///
/// Dropping the handle doesn't cancel the job, it just discards the result.
#[derive(Debug)]
pub struct JobHandle<T> {
    recv: Receiver<Result<T>>,
    done: bool,
}

impl<T> JobHandle<T> {
    /// Check for the result without blocking.
    ///
    /// Returns a terminal status at most once. Polling again after that is a bug.
    pub fn poll(&mut self) -> JobStatus<T> {
        debug_assert!(!self.done, "JobHandle polled after completion");
        match self.recv.try_recv() {
            Ok(Ok(out)) => {
                self.done = true;
                JobStatus::Resolved(out)
            }
            Ok(Err(e)) => {
                self.done = true;
                JobStatus::Rejected(e)
            }
            Err(TryRecvError::Empty) => JobStatus::Pending,
            Err(TryRecvError::Disconnected) => {
                self.done = true;
                JobStatus::Rejected(anyhow!("worker pool dropped before job finished"))
            }
        }
    }

    /// Whether a result is ready to be taken by `poll`.
    pub fn is_done(&self) -> bool {
        !self.done && !self.recv.is_empty()
    }

    /// Block until the job finishes.
    pub fn wait(self) -> Result<T> {
        self.recv.recv().unwrap_or_else(|_| Err(anyhow!("worker pool dropped before job finished")))
    }
}


// message to a unit
enum UnitMsg<W: Worker> {
    Job {
        msg: W::Msg,
        reply: Sender<Result<W::Out>>,
    },
    Configure(W::Config),
}

/// Fixed-size pool of background worker threads.
pub struct WorkerPool<W: Worker> {
    name: String,
    // inbox of each unit
    units: Vec<Sender<UnitMsg<W>>>,
    // indices of idle units
    available: Vec<usize>,
    // jobs waiting for an idle unit
    queue: VecDeque<UnitMsg<W>>,
    // units send their index here when they finish a job
    recv_free: Receiver<usize>,
    ctx: PoolContext,
}

impl<W: Worker> WorkerPool<W> {
    /// Construct with its own context, spawning `normalize_worker_count(count)` threads, each
    /// with a worker from `make_worker`.
    pub fn new<F>(name: &str, count: usize, make_worker: F) -> Result<Self>
    where
        F: FnMut(usize) -> W,
    {
        Self::with_context(name, count, PoolContext::new(), make_worker)
    }

    /// Construct, counting busy units in the given context.
    pub fn with_context<F>(
        name: &str,
        count: usize,
        ctx: PoolContext,
        mut make_worker: F,
    ) -> Result<Self>
    where
        F: FnMut(usize) -> W,
    {
        let count = normalize_worker_count(count);
        let (send_free, recv_free) = unbounded();
        let mut units = Vec::with_capacity(count);
        for i in 0..count {
            let (send_msg, recv_msg) = unbounded();
            let worker = make_worker(i);
            let send_free = send_free.clone();
            let ctx = ctx.clone();
            thread::Builder::new()
                .name(format!("{}-{}", name, i))
                .spawn(move || unit_body(i, worker, recv_msg, send_free, ctx))
                .with_context(|| format!("spawning {} worker thread {}", name, i))?;
            units.push(send_msg);
        }
        debug!(%name, count, "started worker pool");
        Ok(WorkerPool {
            name: name.to_owned(),
            units,
            // reversed so that units are handed out in index order
            available: (0..count).rev().collect(),
            queue: VecDeque::new(),
            recv_free,
            ctx,
        })
    }

    /// Submit a job. Dispatches immediately if a unit is idle, otherwise queues.
    pub fn add_job(&mut self, msg: W::Msg) -> JobHandle<W::Out> {
        let (reply, recv) = bounded(1);
        self.queue.push_back(UnitMsg::Job { msg, reply });
        self.dispatch();
        JobHandle { recv, done: false }
    }

    /// Broadcast a configuration to every unit. Each unit applies it after any job it's
    /// currently doing, and before any job it's given afterwards.
    pub fn post_all(&mut self, config: W::Config) {
        for unit in &self.units {
            let _ = unit.send(UnitMsg::Configure(config.clone()));
        }
    }

    /// Notice units which have finished, and hand them queued jobs.
    pub fn poll(&mut self) {
        while let Ok(i) = self.recv_free.try_recv() {
            debug_assert!(!self.available.contains(&i));
            self.available.push(i);
        }
        self.dispatch();
    }

    // hand queued jobs to idle units
    fn dispatch(&mut self) {
        while !self.queue.is_empty() {
            let i = match self.available.pop() {
                Some(i) => i,
                None => break,
            };
            if let Some(job) = self.queue.pop_front() {
                // counted before sending, since the unit decrements as soon as it's done
                self.ctx.0.fetch_add(1, Ordering::SeqCst);
                if self.units[i].send(job).is_err() {
                    self.ctx.0.fetch_sub(1, Ordering::SeqCst);
                    // the job's reply sender is dropped with it, rejecting its handle. the dead
                    // unit is never made available again.
                    error!(pool = %self.name, worker = i, "worker thread died");
                }
            }
        }
    }

    /// Whether every unit has a job.
    pub fn is_busy(&self) -> bool {
        self.available.is_empty()
    }

    /// Number of units with a job, as of the last `poll`.
    pub fn working_count(&self) -> usize {
        self.units.len() - self.available.len()
    }

    /// Number of idle units, as of the last `poll`.
    pub fn available_count(&self) -> usize {
        self.available.len()
    }

    /// Number of jobs waiting for a unit.
    pub fn queued_count(&self) -> usize {
        self.queue.len()
    }

    pub fn worker_count(&self) -> usize {
        self.units.len()
    }

    pub fn context(&self) -> &PoolContext {
        &self.ctx
    }
}

// body of a unit thread. exits when the pool is dropped.
fn unit_body<W: Worker>(
    i: usize,
    mut worker: W,
    recv_msg: Receiver<UnitMsg<W>>,
    send_free: Sender<usize>,
    ctx: PoolContext,
) {
    while let Ok(msg) = recv_msg.recv() {
        match msg {
            UnitMsg::Job { msg, reply } => {
                let result = catch_unwind(AssertUnwindSafe(|| worker.handle(msg)))
                    .unwrap_or_else(|panic| Err(anyhow!("job panicked: {}", panic_msg(&panic))));
                if let Err(SendError(Err(e))) = reply.send(result) {
                    warn!(%e, worker = i, "job failed with no rejection handler");
                }
                ctx.0.fetch_sub(1, Ordering::SeqCst);
                if send_free.send(i).is_err() {
                    break;
                }
            }
            UnitMsg::Configure(config) => worker.configure(config),
        }
    }
    trace!(worker = i, "worker thread exiting");
}

fn panic_msg(panic: &Box<dyn Any + Send>) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "<non-string panic payload>"
    }
}


#[cfg(test)]
struct TestWorker {
    offset: u32,
}

#[cfg(test)]
impl Worker for TestWorker {
    type Msg = (u32, std::time::Duration);
    type Out = u32;
    type Config = u32;

    fn handle(&mut self, (n, sleep): (u32, std::time::Duration)) -> Result<u32> {
        thread::sleep(sleep);
        anyhow::ensure!(n != 13, "unlucky");
        if n == 666 {
            panic!("evil");
        }
        Ok(n + self.offset)
    }

    fn configure(&mut self, offset: u32) {
        self.offset = offset;
    }
}

#[cfg(test)]
fn drain<T>(pool: &mut WorkerPool<TestWorker>, handles: &mut Vec<(usize, JobHandle<T>)>) -> Vec<(usize, JobStatus<T>)> {
    let mut out = Vec::new();
    let start = std::time::Instant::now();
    while !handles.is_empty() {
        assert!(start.elapsed() < std::time::Duration::from_secs(10), "jobs never finished");
        pool.poll();
        let mut i = 0;
        while i < handles.len() {
            match handles[i].1.poll() {
                JobStatus::Pending => i += 1,
                status => out.push((handles.remove(i).0, status)),
            }
        }
        thread::sleep(std::time::Duration::from_millis(1));
    }
    out.sort_by_key(|&(i, _)| i);
    out
}

#[test]
fn test_normalize_worker_count() {
    assert_eq!(normalize_worker_count(0), DEFAULT_WORKERS);
    assert_eq!(normalize_worker_count(1), 1);
    assert_eq!(normalize_worker_count(300), MAX_WORKERS);
}

#[test]
fn test_queues_beyond_capacity() {
    let mut pool = WorkerPool::new("test", 2, |_| TestWorker { offset: 0 }).unwrap();
    assert_eq!(pool.worker_count(), 2);
    let mut handles = (0..6)
        .map(|n| (n as usize, pool.add_job((n, std::time::Duration::from_millis(5)))))
        .collect::<Vec<_>>();
    assert!(pool.is_busy());
    assert_eq!(pool.working_count(), 2);
    assert_eq!(pool.available_count(), 0);
    assert_eq!(pool.queued_count(), 4);

    let results = drain(&mut pool, &mut handles);
    for (i, status) in results {
        match status {
            JobStatus::Resolved(n) => assert_eq!(n as usize, i),
            status => panic!("job {} ended {:?}", i, status),
        }
    }
    // units report themselves free just after replying
    let start = std::time::Instant::now();
    while pool.available_count() < 2 {
        assert!(start.elapsed() < std::time::Duration::from_secs(10), "units never freed");
        thread::sleep(std::time::Duration::from_millis(1));
        pool.poll();
    }
    assert!(!pool.is_busy());
    assert_eq!(pool.available_count(), 2);
    assert_eq!(pool.queued_count(), 0);
    assert_eq!(pool.context().working_count(), 0);
}

#[test]
fn test_failures_dont_stall_pool() {
    let mut pool = WorkerPool::new("test", 1, |_| TestWorker { offset: 0 }).unwrap();
    let mut handles = [1, 13, 666, 2]
        .into_iter()
        .enumerate()
        .map(|(i, n)| (i, pool.add_job((n, std::time::Duration::ZERO))))
        .collect::<Vec<_>>();
    let results = drain(&mut pool, &mut handles);
    assert!(matches!(results[0].1, JobStatus::Resolved(1)));
    assert!(matches!(results[1].1, JobStatus::Rejected(_)));
    match &results[2].1 {
        JobStatus::Rejected(e) => assert!(e.to_string().contains("evil")),
        status => panic!("panicking job ended {:?}", status),
    }
    assert!(matches!(results[3].1, JobStatus::Resolved(2)));
}

#[test]
fn test_post_all_and_dropped_handle() {
    let mut pool = WorkerPool::new("test", 3, |_| TestWorker { offset: 0 }).unwrap();
    pool.post_all(100);
    // result of a failing job whose handle is gone just gets logged
    drop(pool.add_job((13, std::time::Duration::ZERO)));
    let mut handles = (0..3)
        .map(|n| (n as usize, pool.add_job((n, std::time::Duration::from_millis(2)))))
        .collect::<Vec<_>>();
    for (i, status) in drain(&mut pool, &mut handles) {
        assert!(matches!(status, JobStatus::Resolved(n) if n as usize == i + 100));
    }
}

#[test]
fn test_shared_context() {
    let ctx = PoolContext::new();
    let mut a = WorkerPool::with_context("a", 1, ctx.clone(), |_| TestWorker { offset: 0 }).unwrap();
    let mut b = WorkerPool::with_context("b", 1, ctx.clone(), |_| TestWorker { offset: 0 }).unwrap();
    let ha = a.add_job((1, std::time::Duration::from_millis(50)));
    let hb = b.add_job((2, std::time::Duration::from_millis(50)));
    assert!(ctx.working_count() >= 1);
    assert_eq!(ha.wait().unwrap(), 1);
    assert_eq!(hb.wait().unwrap(), 2);
}

#[test]
fn test_context_never_exceeds_units() {
    let ctx = PoolContext::new();
    let mut pool = WorkerPool::with_context("test", 2, ctx.clone(), |_| TestWorker { offset: 0 })
        .unwrap();
    let mut handles = (0..200)
        .map(|n| (n as usize, pool.add_job((n, std::time::Duration::ZERO))))
        .collect::<Vec<_>>();
    let start = std::time::Instant::now();
    while !handles.is_empty() {
        assert!(start.elapsed() < std::time::Duration::from_secs(10), "jobs never finished");
        assert!(ctx.working_count() <= pool.worker_count(), "busy count {}", ctx.working_count());
        pool.poll();
        handles.retain_mut(|(_, handle)| matches!(handle.poll(), JobStatus::Pending));
    }
}
