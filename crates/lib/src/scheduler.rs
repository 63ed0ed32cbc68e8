//! Priority-ordered job scheduling over a single daemon CLI connection.
//!
//! Jobs queue with different priorities and execute strictly one at a time
//! on a dedicated worker thread that owns all socket I/O and fires all job
//! callbacks. Among equal priorities submission order is preserved; there is
//! no guarantee a job ever executes if higher-priority jobs keep arriving.
//!
//! The scheduler must be primed with [`Scheduler::set_connection_details`];
//! any job executed afterwards runs on the connection those details name.
//! [`Scheduler::disconnect`] forces a disconnect and purges the queue;
//! [`Scheduler::reset`] additionally forgets the connection details.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::net::{Shutdown, TcpStream};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;

use thiserror::Error;
use tracing::{error, warn};

use crate::codec::CodecError;
use crate::job::{Job, JobObserver};
use crate::protocol::{Command, Mode, ModeSet, Priority};
use crate::session::Session;

const COMMAND_ENABLE: &str = "enable";
const COMMAND_CONFIG: &str = "configure terminal";
const COMMAND_DISABLE: &str = "disable";
const COMMAND_EXIT: &str = "exit";
const COMMAND_SHUTDOWN: &str = "shutdown";

/// Errors that interrupt a job mid-execution.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("session mode is unknown, cannot switch modes")]
    UnknownMode,
    #[error("still in wrong mode after switching modes")]
    ModeSwitch,
}

struct QueueEntry {
    priority: Priority,
    id: u64,
    job: Job,
}

// BinaryHeap is a max-heap; invert the ordering so the most urgent
// (priority, id) pair surfaces first.
impl Ord for QueueEntry {
    fn cmp(&self, other: &QueueEntry) -> Ordering {
        (other.priority, other.id).cmp(&(self.priority, self.id))
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &QueueEntry) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &QueueEntry) -> bool {
        self.priority == other.priority && self.id == other.id
    }
}

impl Eq for QueueEntry {}

/// State guarded by the queue lock. The connection details live here too so
/// updating them never waits on socket I/O.
struct QueueState {
    entries: BinaryHeap<QueueEntry>,
    last_id: u64,
    port: Option<u16>,
    details_changed: bool,
}

struct Inner {
    queue: Mutex<QueueState>,
    available: Condvar,
    session: Mutex<Session>,
    /// Clone of the live stream, reachable without the session lock, so a
    /// teardown can cut short a read in progress.
    interrupt: Mutex<Option<TcpStream>>,
    started: AtomicBool,
}

/// Handle to the command scheduler. Clones share one queue, worker thread,
/// and connection; construct one per application and pass it to whatever
/// needs to enqueue jobs.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    pub fn new() -> Scheduler {
        Scheduler {
            inner: Arc::new(Inner {
                queue: Mutex::new(QueueState {
                    entries: BinaryHeap::new(),
                    last_id: 0,
                    port: None,
                    details_changed: false,
                }),
                available: Condvar::new(),
                session: Mutex::new(Session::new()),
                interrupt: Mutex::new(None),
                started: AtomicBool::new(false),
            }),
        }
    }

    /// Start the worker thread. Idempotent; calls after the first do
    /// nothing.
    pub fn start(&self) {
        if self.inner.started.swap(true, AtomicOrdering::SeqCst) {
            return;
        }
        let inner = Arc::clone(&self.inner);
        thread::Builder::new()
            .name("scheduler-worker".into())
            .spawn(move || worker_loop(&inner))
            .expect("failed to spawn scheduler worker thread");
    }

    /// Queue a job. Safe from any thread; wakes the worker.
    pub fn enqueue(&self, job: Job, priority: Priority) {
        let mut queue = lock(&self.inner.queue);
        queue.last_id += 1;
        let id = queue.last_id;
        queue.entries.push(QueueEntry { priority, id, job });
        self.inner.available.notify_all();
    }

    /// Queue a job asking the daemon to shut itself down.
    pub fn enqueue_shutdown(&self, priority: Priority) {
        self.enqueue(
            Job::single(COMMAND_SHUTDOWN, ModeSet::only(Mode::Privileged), ()),
            priority,
        );
    }

    /// Point the scheduler at a (new) CLI port. Takes effect with the next
    /// job: any previous connection is torn down first.
    pub fn set_connection_details(&self, port: u16) {
        let mut queue = lock(&self.inner.queue);
        queue.port = Some(port);
        queue.details_changed = true;
    }

    /// Tear down the connection and purge the queue.
    ///
    /// Every still-queued job gets `on_aborted`; a job currently executing
    /// fails with `on_error` through the cut socket. The configured port is
    /// kept, and the next job reconnects fresh.
    pub fn disconnect(&self) {
        self.teardown(false);
    }

    /// As [`disconnect`](Self::disconnect), but also forgets the connection
    /// details.
    pub fn reset(&self) {
        self.teardown(true);
    }

    fn teardown(&self, reset_details: bool) {
        let mut drained = Vec::new();
        {
            let mut queue = lock(&self.inner.queue);
            while let Some(entry) = queue.entries.pop() {
                drained.push(entry);
            }
            if reset_details {
                queue.port = None;
                queue.details_changed = false;
            } else {
                queue.details_changed = true;
            }
        }

        for entry in &mut drained {
            signal(&mut entry.job, "on_aborted", |o| o.on_aborted());
        }

        // cut a read in progress so the session lock comes free
        if let Some(stream) = lock(&self.inner.interrupt).take() {
            let _ = stream.shutdown(Shutdown::Both);
        }

        lock(&self.inner.session).cut();
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

fn worker_loop(inner: &Inner) {
    loop {
        let mut job = inner.next_job();

        if !inner.ensure_connection() {
            warn!("problem establishing connection; skipping job");
            continue;
        }

        if !inner.execute_job(&mut job) {
            warn!("problem while executing job; skipping job");
        }
    }
}

impl Inner {
    /// Block until a job is available and pop the most urgent one.
    fn next_job(&self) -> Job {
        let mut queue = lock(&self.queue);
        loop {
            if let Some(entry) = queue.entries.pop() {
                return entry.job;
            }
            queue = self
                .available
                .wait(queue)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Re-establish the connection if the details changed, connect if no
    /// link is up.
    fn ensure_connection(&self) -> bool {
        let (port, details_changed) = {
            let mut queue = lock(&self.queue);
            let changed = queue.details_changed;
            queue.details_changed = false;
            (queue.port, changed)
        };

        let mut session = lock(&self.session);
        if details_changed {
            session.cut();
        }
        let ok = session.ensure(port);
        *lock(&self.interrupt) = if ok { session.interrupt_handle() } else { None };
        ok
    }

    /// Run a job to completion, firing its callbacks. Returns `false` when
    /// an error cut it short.
    fn execute_job(&self, job: &mut Job) -> bool {
        signal(job, "on_start", |o| o.on_start());

        while let Some(command) = job.next_command() {
            let result = {
                let mut session = lock(&self.session);
                self.run_command(&mut session, &command)
            };

            match result {
                Ok(lines) => signal(job, "on_result", |o| o.on_result(&lines, &command)),
                Err(e) => {
                    error!("error while executing command {:?}: {e}", command.text());
                    signal(job, "on_error", |o| o.on_error());
                    return false;
                }
            }
        }

        signal(job, "on_completed", |o| o.on_completed());
        true
    }

    /// Switch modes if needed, send the command, read its response.
    fn run_command(
        &self,
        session: &mut Session,
        command: &Command,
    ) -> Result<Vec<String>, SchedulerError> {
        if !command.allowed_in(session.mode()) {
            self.change_mode(session, command.modes())?;
            if !command.allowed_in(session.mode()) {
                // transition table bug if this ever fires
                return Err(SchedulerError::ModeSwitch);
            }
        }

        session.send(command.text())?;
        Ok(session.read_response()?)
    }

    /// Move the session into one of the wanted modes. At most two auxiliary
    /// commands are needed from any starting point.
    fn change_mode(&self, session: &mut Session, wanted: ModeSet) -> Result<(), SchedulerError> {
        let current = session.mode().ok_or(SchedulerError::UnknownMode)?;
        let (first, second) = transition_commands(current, wanted);

        session.send(first)?;
        session.read_response()?;

        if let Some(second) = second {
            session.send(second)?;
            session.read_response()?;
        }

        Ok(())
    }
}

/// Auxiliary commands that move `current` into one of the `wanted` modes.
fn transition_commands(current: Mode, wanted: ModeSet) -> (&'static str, Option<&'static str>) {
    match current {
        Mode::Default => {
            if wanted.contains(Mode::Privileged) {
                (COMMAND_ENABLE, None)
            } else {
                (COMMAND_ENABLE, Some(COMMAND_CONFIG))
            }
        }
        Mode::Privileged => {
            if wanted.contains(Mode::Default) {
                (COMMAND_DISABLE, None)
            } else {
                (COMMAND_CONFIG, None)
            }
        }
        Mode::Config => {
            if wanted.contains(Mode::Privileged) {
                (COMMAND_EXIT, None)
            } else {
                (COMMAND_EXIT, Some(COMMAND_DISABLE))
            }
        }
    }
}

/// Fire one callback, catching and logging a panic so the worker survives
/// misbehaving observers.
fn signal(job: &mut Job, name: &str, f: impl FnOnce(&mut dyn JobObserver)) {
    let observer = job.observer_mut();
    if panic::catch_unwind(AssertUnwindSafe(|| f(observer))).is_err() {
        error!("caught panic in {name} callback");
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
