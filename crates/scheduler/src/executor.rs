//! Single-worker decode executor
//!
//! Decode requests run one at a time, in submission order, on a dedicated
//! background thread. The executor keeps two books behind one read/write
//! lock: the task currently registered for each tile node, and the
//! cancellation token of every live task. A node never has more than one
//! live task:
//!
//! - submitting a request equal to the node's live task is coalesced;
//! - submitting a different request supersedes the old one, which is
//!   cancelled and, if it has not started yet, pulled from the queue.
//!
//! Running tasks are cancelled cooperatively: the [`DecodeRunner`] polls
//! [`TaskContext::is_dead`] between stages and must publish through
//! [`TaskContext::complete`], which succeeds only for the node's live task.

use crate::CancellationToken;
use parking_lot::{Condvar, Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::fmt::Debug;
use std::hash::Hash;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, trace, warn};

/// Monotonic task identifier
pub type TaskId = u64;

/// A decode request registered with the executor
#[derive(Debug)]
pub struct DecodeTask<K, T> {
    id: TaskId,
    node: K,
    payload: T,
    token: CancellationToken,
}

impl<K, T> DecodeTask<K, T> {
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Tile node the request decodes for
    pub fn node(&self) -> &K {
        &self.node
    }

    pub fn payload(&self) -> &T {
        &self.payload
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

/// Result of [`DecodeExecutor::submit`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// A new task was queued
    Queued(TaskId),
    /// An equal task is already live for the node; nothing was queued
    Coalesced(TaskId),
    /// The executor has been recycled
    Rejected,
}

impl SubmitOutcome {
    /// Id of the task that will serve the request, if any
    pub fn task_id(&self) -> Option<TaskId> {
        match self {
            Self::Queued(id) | Self::Coalesced(id) => Some(*id),
            Self::Rejected => None,
        }
    }
}

/// Work executed on the decode thread
pub trait DecodeRunner<K, T>: Send + 'static {
    /// Execute one task
    ///
    /// Implementations should check `ctx.is_dead(task)` between expensive
    /// stages and publish results only when `ctx.complete(task)` succeeds.
    fn run(&mut self, task: &DecodeTask<K, T>, ctx: &TaskContext<'_, K, T>);

    /// Release resources once the executor is recycled
    ///
    /// Runs on the decode thread after every earlier task.
    fn shutdown(&mut self) {}
}

/// View of the executor's books handed to a running task
pub struct TaskContext<'a, K, T> {
    shared: &'a Shared<K, T>,
}

impl<K, T> TaskContext<'_, K, T>
where
    K: Eq + Hash,
{
    /// Whether the task was cancelled or superseded
    pub fn is_dead(&self, task: &DecodeTask<K, T>) -> bool {
        self.shared.is_dead(task.id)
    }

    /// Unregister the task if it is still live for its node
    ///
    /// Returns whether its result may be published.
    pub fn complete(&self, task: &DecodeTask<K, T>) -> bool {
        self.shared.complete(task)
    }
}

/// Executor counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutorStats {
    /// Tasks queued
    pub submitted: u64,
    /// Requests dropped as duplicates of a live task
    pub coalesced: u64,
    /// Tasks cancelled or superseded
    pub cancelled: u64,
    /// Tasks whose results were allowed to publish
    pub completed: u64,
    /// Dead tasks dequeued without running
    pub skipped: u64,
    /// Tasks waiting in the queue
    pub queued: usize,
    /// Tasks registered as live
    pub live: usize,
}

#[derive(Default)]
struct Counters {
    submitted: AtomicU64,
    coalesced: AtomicU64,
    cancelled: AtomicU64,
    completed: AtomicU64,
    skipped: AtomicU64,
}

struct Books<K, T> {
    by_node: HashMap<K, Arc<DecodeTask<K, T>>>,
    live: HashMap<TaskId, CancellationToken>,
}

enum Work<K, T> {
    Decode(Arc<DecodeTask<K, T>>),
    Finish,
}

struct Shared<K, T> {
    books: RwLock<Books<K, T>>,
    queue: Mutex<VecDeque<Work<K, T>>>,
    available: Condvar,
    recycled: AtomicBool,
    next_id: AtomicU64,
    counters: Counters,
}

impl<K, T> Shared<K, T>
where
    K: Eq + Hash,
{
    fn new() -> Self {
        Self {
            books: RwLock::new(Books {
                by_node: HashMap::new(),
                live: HashMap::new(),
            }),
            queue: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
            recycled: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
            counters: Counters::default(),
        }
    }

    fn is_dead(&self, id: TaskId) -> bool {
        match self.books.read().live.get(&id) {
            Some(token) => token.is_cancelled(),
            None => true,
        }
    }

    fn complete(&self, task: &DecodeTask<K, T>) -> bool {
        let mut books = self.books.write();
        if books.live.remove(&task.id).is_none() || task.token.is_cancelled() {
            return false;
        }
        if books
            .by_node
            .get(&task.node)
            .is_some_and(|current| current.id == task.id)
        {
            books.by_node.remove(&task.node);
        }
        self.counters.completed.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Cancel `task` and pull it from the queue. Caller holds the write lock.
    fn stop(&self, books: &mut Books<K, T>, task: &DecodeTask<K, T>, reason: &str) -> bool
    where
        K: Debug,
    {
        task.token.cancel();
        books.live.remove(&task.id);

        let unqueued = {
            let mut queue = self.queue.lock();
            let before = queue.len();
            queue.retain(|work| !matches!(work, Work::Decode(queued) if queued.id == task.id));
            queue.len() != before
        };

        self.counters.cancelled.fetch_add(1, Ordering::Relaxed);
        debug!(task = task.id, node = ?task.node, reason, unqueued, "decode task cancelled");
        unqueued
    }

    fn push(&self, work: Work<K, T>) {
        self.queue.lock().push_back(work);
        self.available.notify_one();
    }

    fn next_work(&self) -> Work<K, T> {
        let mut queue = self.queue.lock();
        loop {
            if let Some(work) = queue.pop_front() {
                return work;
            }
            self.available.wait(&mut queue);
        }
    }
}

fn worker_loop<K, T, R>(shared: Arc<Shared<K, T>>, mut runner: R)
where
    K: Eq + Hash,
    R: DecodeRunner<K, T>,
{
    debug!("decode worker started");
    loop {
        match shared.next_work() {
            Work::Decode(task) => {
                if shared.is_dead(task.id) {
                    shared.counters.skipped.fetch_add(1, Ordering::Relaxed);
                    trace!(task = task.id, "skipping dead task");
                    continue;
                }
                let ctx = TaskContext {
                    shared: shared.as_ref(),
                };
                runner.run(&task, &ctx);
            }
            Work::Finish => {
                runner.shutdown();
                debug!("decode worker finished");
                break;
            }
        }
    }
}

/// Single-threaded, cancellable decode executor keyed by tile node
///
/// # Example
///
/// ```
/// use docview_scheduler::{DecodeExecutor, DecodeRunner, DecodeTask, SubmitOutcome, TaskContext};
///
/// struct Print;
///
/// impl DecodeRunner<u32, String> for Print {
///     fn run(&mut self, task: &DecodeTask<u32, String>, ctx: &TaskContext<'_, u32, String>) {
///         if !ctx.is_dead(task) && ctx.complete(task) {
///             println!("node {} -> {}", task.node(), task.payload());
///         }
///     }
/// }
///
/// let executor = DecodeExecutor::new(Print).unwrap();
/// assert!(matches!(executor.submit(7, "page 1".into()), SubmitOutcome::Queued(_)));
/// executor.recycle();
/// executor.join();
/// ```
pub struct DecodeExecutor<K, T> {
    shared: Arc<Shared<K, T>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<K, T> DecodeExecutor<K, T>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    T: PartialEq + Debug + Send + Sync + 'static,
{
    /// Start the decode thread with `runner`
    pub fn new<R>(runner: R) -> io::Result<Self>
    where
        R: DecodeRunner<K, T>,
    {
        Self::with_thread_name("docview-decode", runner)
    }

    pub fn with_thread_name<R>(name: &str, runner: R) -> io::Result<Self>
    where
        R: DecodeRunner<K, T>,
    {
        let shared = Arc::new(Shared::new());
        let worker_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || worker_loop(worker_shared, runner))?;

        Ok(Self {
            shared,
            worker: Mutex::new(Some(handle)),
        })
    }

    /// Submit a request for `node`
    pub fn submit(&self, node: K, payload: T) -> SubmitOutcome {
        let mut books = self.shared.books.write();
        if self.shared.recycled.load(Ordering::Acquire) {
            debug!(node = ?node, "decode rejected after recycle");
            return SubmitOutcome::Rejected;
        }

        if let Some(running) = books.by_node.get(&node) {
            let live = books
                .live
                .get(&running.id)
                .is_some_and(|token| !token.is_cancelled());
            if live && running.payload == payload {
                let id = running.id;
                self.shared.counters.coalesced.fetch_add(1, Ordering::Relaxed);
                trace!(task = id, node = ?node, "similar task is already running");
                return SubmitOutcome::Coalesced(id);
            }
        }

        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let task = Arc::new(DecodeTask {
            id,
            node: node.clone(),
            payload,
            token: CancellationToken::new(),
        });
        books.live.insert(id, task.token.clone());
        let superseded = books.by_node.insert(node, Arc::clone(&task));
        trace!(task = id, node = ?task.node, "decode task queued");
        self.shared.push(Work::Decode(task));
        self.shared.counters.submitted.fetch_add(1, Ordering::Relaxed);

        if let Some(old) = superseded {
            if books.live.contains_key(&old.id) {
                self.shared.stop(&mut books, &old, "canceled by new one");
            }
        }
        SubmitOutcome::Queued(id)
    }

    /// Cancel the live task of `node`
    ///
    /// Returns whether a live task was found.
    pub fn cancel(&self, node: &K, reason: &str) -> bool {
        let mut books = self.shared.books.write();
        let Some(task) = books.by_node.remove(node) else {
            return false;
        };
        if !books.live.contains_key(&task.id) {
            return false;
        }
        self.shared.stop(&mut books, &task, reason);
        true
    }

    /// Whether task `id` was cancelled, superseded or already completed
    pub fn is_dead(&self, id: TaskId) -> bool {
        self.shared.is_dead(id)
    }

    /// Task currently registered for `node`
    pub fn current_task(&self, node: &K) -> Option<TaskId> {
        let books = self.shared.books.read();
        books
            .by_node
            .get(node)
            .map(|task| task.id)
            .filter(|id| books.live.contains_key(id))
    }

    /// Cancel everything and schedule the runner's shutdown
    ///
    /// The shutdown job is queued behind whatever is in flight; later
    /// submissions are rejected. Calling this again has no effect.
    pub fn recycle(&self) {
        let mut books = self.shared.books.write();
        if self.shared.recycled.swap(true, Ordering::AcqRel) {
            return;
        }

        let tasks: Vec<_> = books.by_node.drain().map(|(_, task)| task).collect();
        for task in &tasks {
            if books.live.contains_key(&task.id) {
                self.shared.stop(&mut books, task, "executor recycled");
            }
        }
        for (_, token) in books.live.drain() {
            token.cancel();
        }
        self.shared.push(Work::Finish);
        debug!(cancelled = tasks.len(), "decode executor recycled");
    }

    pub fn is_recycled(&self) -> bool {
        self.shared.recycled.load(Ordering::Acquire)
    }

    /// Wait for the decode thread to exit
    ///
    /// Only returns once [`recycle`](Self::recycle) has been called.
    pub fn join(&self) {
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("decode worker panicked");
            }
        }
    }

    pub fn stats(&self) -> ExecutorStats {
        let live = self.shared.books.read().live.len();
        let queued = self.shared.queue.lock().len();
        let counters = &self.shared.counters;
        ExecutorStats {
            submitted: counters.submitted.load(Ordering::Relaxed),
            coalesced: counters.coalesced.load(Ordering::Relaxed),
            cancelled: counters.cancelled.load(Ordering::Relaxed),
            completed: counters.completed.load(Ordering::Relaxed),
            skipped: counters.skipped.load(Ordering::Relaxed),
            queued,
            live,
        }
    }
}

impl<K, T> Drop for DecodeExecutor<K, T> {
    fn drop(&mut self) {
        if !self.shared.recycled.swap(true, Ordering::AcqRel) {
            {
                let mut books = self.shared.books.write();
                books.by_node.clear();
                for (_, token) in books.live.drain() {
                    token.cancel();
                }
            }
            self.shared.queue.lock().push_back(Work::Finish);
            self.shared.available.notify_one();
        }
        if let Some(handle) = self.worker.get_mut().take() {
            if handle.join().is_err() {
                warn!("decode worker panicked");
            }
        }
    }
}
