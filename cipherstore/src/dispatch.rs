//! Background execution primitives.
//!
//! - [`DispatchQueue`]: a named worker thread draining jobs in FIFO order.
//! - [`TimerQueue`]: one thread firing cancellable one-shot timers.
//! - [`Pending`]: a one-shot result delivered from another thread.
//! - [`Scheduler`]: where observation callbacks are delivered.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc, Arc, OnceLock};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::{Error, Result};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Delivers callbacks somewhere.
pub trait Scheduler: Send + Sync {
    /// Runs `job`, now or later, on some thread.
    fn schedule(&self, job: Box<dyn FnOnce() + Send + 'static>);
}

/// Runs jobs inline on the calling thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImmediateScheduler;

impl Scheduler for ImmediateScheduler {
    fn schedule(&self, job: Box<dyn FnOnce() + Send + 'static>) {
        job();
    }
}

/// A serial queue backed by one worker thread.
///
/// Dropping the queue lets already queued jobs finish and joins the worker.
pub struct DispatchQueue {
    label: String,
    sender: Option<mpsc::Sender<Job>>,
    worker: Option<JoinHandle<()>>,
    worker_id: ThreadId,
}

impl DispatchQueue {
    /// Spawns a queue whose thread is named `label`.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the thread cannot be spawned.
    pub fn new(label: impl Into<String>) -> Result<Self> {
        let label = label.into();
        let (sender, receiver) = mpsc::channel::<Job>();
        let worker = thread::Builder::new().name(label.clone()).spawn(move || {
            while let Ok(job) = receiver.recv() {
                job();
            }
        })?;
        Ok(Self {
            worker_id: worker.thread().id(),
            label,
            sender: Some(sender),
            worker: Some(worker),
        })
    }

    /// The queue's label (also its thread name).
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Queues `job`.
    pub fn dispatch(&self, job: impl FnOnce() + Send + 'static) {
        self.enqueue(Box::new(job));
    }

    /// Queues `job` and returns a handle to its result.
    pub fn submit<T: Send + 'static>(
        &self,
        job: impl FnOnce() -> Result<T> + Send + 'static,
    ) -> Pending<T> {
        let (completer, pending) = Pending::channel();
        self.dispatch(move || completer.complete(job()));
        pending
    }

    fn enqueue(&self, job: Job) {
        let sent = self.sender.as_ref().map(|s| s.send(job));
        if !matches!(sent, Some(Ok(()))) {
            log::error!("Dispatch queue {} has shut down, dropping job", self.label);
        }
    }
}

impl Scheduler for DispatchQueue {
    fn schedule(&self, job: Box<dyn FnOnce() + Send + 'static>) {
        self.enqueue(job);
    }
}

impl Drop for DispatchQueue {
    fn drop(&mut self) {
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            // A job holding the last reference cannot join its own thread
            if thread::current().id() != self.worker_id && worker.join().is_err() {
                log::error!("Dispatch queue {} worker panicked", self.label);
            }
        }
    }
}

impl std::fmt::Debug for DispatchQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchQueue")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

/// A result that another thread will deliver exactly once.
#[derive(Debug)]
pub struct Pending<T> {
    receiver: mpsc::Receiver<Result<T>>,
}

/// The sending half of a [`Pending`].
#[derive(Debug)]
pub struct Completer<T> {
    sender: mpsc::SyncSender<Result<T>>,
}

impl<T> Pending<T> {
    /// Creates a connected completer/pending pair.
    #[must_use]
    pub fn channel() -> (Completer<T>, Self) {
        let (sender, receiver) = mpsc::sync_channel(1);
        (Completer { sender }, Self { receiver })
    }

    /// A pending value that is already resolved.
    #[must_use]
    pub fn ready(result: Result<T>) -> Self {
        let (completer, pending) = Self::channel();
        completer.complete(result);
        pending
    }

    /// Blocks until the result arrives.
    ///
    /// # Errors
    ///
    /// Returns the delivered error, or [`Error::Cancelled`] if the completer
    /// was dropped without delivering.
    pub fn wait(self) -> Result<T> {
        self.receiver.recv().unwrap_or(Err(Error::Cancelled))
    }

    /// Blocks for at most `timeout`. Returns `None` on timeout.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<T>> {
        match self.receiver.recv_timeout(timeout) {
            Ok(result) => Some(result),
            Err(mpsc::RecvTimeoutError::Timeout) => None,
            Err(mpsc::RecvTimeoutError::Disconnected) => Some(Err(Error::Cancelled)),
        }
    }
}

impl<T> Completer<T> {
    /// Delivers the result. A dropped [`Pending`] is ignored.
    pub fn complete(self, result: Result<T>) {
        let _ = self.sender.send(result);
    }
}

struct TimerState {
    deadlines: BinaryHeap<Reverse<(Instant, u64)>>,
    actions: HashMap<u64, Job>,
    shutdown: bool,
}

struct TimerShared {
    state: Mutex<TimerState>,
    wake: Condvar,
    next_id: AtomicU64,
}

/// A thread firing one-shot timers.
pub struct TimerQueue {
    shared: Arc<TimerShared>,
    worker: Option<JoinHandle<()>>,
}

/// A scheduled timer. Cancelling after it fired has no effect.
#[derive(Debug)]
pub struct TimerToken {
    id: u64,
    shared: Arc<TimerShared>,
    fired: Arc<AtomicBool>,
}

impl TimerQueue {
    /// Spawns a timer thread named `label`.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the thread cannot be spawned.
    pub fn new(label: &str) -> Result<Self> {
        let shared = Arc::new(TimerShared {
            state: Mutex::new(TimerState {
                deadlines: BinaryHeap::new(),
                actions: HashMap::new(),
                shutdown: false,
            }),
            wake: Condvar::new(),
            next_id: AtomicU64::new(1),
        });
        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name(label.to_string())
            .spawn(move || timer_loop(&worker_shared))?;
        Ok(Self {
            shared,
            worker: Some(worker),
        })
    }

    /// The process-wide timer queue, or `None` if its thread could not be
    /// spawned.
    pub fn shared() -> Option<&'static Self> {
        static SHARED: OnceLock<Option<TimerQueue>> = OnceLock::new();
        SHARED
            .get_or_init(|| match Self::new("cipherstore.timer") {
                Ok(queue) => Some(queue),
                Err(e) => {
                    log::error!("Unable to start timer thread: {e}");
                    None
                }
            })
            .as_ref()
    }

    /// Runs `action` on the timer thread after `delay`.
    pub fn schedule(&self, delay: Duration, action: impl FnOnce() + Send + 'static) -> TimerToken {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);
        {
            let mut state = self.shared.state.lock();
            state
                .deadlines
                .push(Reverse((Instant::now() + delay, id)));
            state.actions.insert(
                id,
                Box::new(move || {
                    flag.store(true, Ordering::SeqCst);
                    action();
                }),
            );
        }
        self.shared.wake.notify_one();
        TimerToken {
            id,
            shared: Arc::clone(&self.shared),
            fired,
        }
    }
}

impl TimerToken {
    /// Cancels the timer. Returns `true` if it had not fired yet.
    pub fn cancel(&self) -> bool {
        self.shared.state.lock().actions.remove(&self.id).is_some()
    }

    /// Whether the timer action has started running.
    #[must_use]
    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for TimerShared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("TimerShared")
    }
}

impl Drop for TimerQueue {
    fn drop(&mut self) {
        self.shared.state.lock().shutdown = true;
        self.shared.wake.notify_one();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn timer_loop(shared: &TimerShared) {
    let mut state = shared.state.lock();
    loop {
        if state.shutdown {
            return;
        }
        let now = Instant::now();
        match state.deadlines.peek().copied() {
            None => shared.wake.wait(&mut state),
            Some(Reverse((deadline, id))) if deadline <= now => {
                state.deadlines.pop();
                if let Some(action) = state.actions.remove(&id) {
                    drop(state);
                    action();
                    state = shared.state.lock();
                }
            }
            Some(Reverse((deadline, _))) => {
                let _ = shared.wake.wait_until(&mut state, deadline);
            }
        }
    }
}
