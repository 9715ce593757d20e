//! Fixed-size thread-pool scheduler.
//!
//! One timer thread owns a min-heap of due tasks and hands them to a bounded
//! worker queue. A worker runs the task and sends it back to the timer with
//! its next due time, so a task is never queued twice and never runs
//! concurrently with itself.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};

use crate::error::{ExecutionError, MonitorResult};

use super::{ScheduledHandle, Scheduler, Task, TaskHandle};

struct Entry {
    seq: u64,
    due: Instant,
    delay: Duration,
    task: Task,
    handle: Arc<TaskHandle>,
}

// Reversed so `BinaryHeap` pops the earliest due time first; `seq` keeps FIFO among ties.
impl Ord for Entry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other.due.cmp(&self.due).then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for Entry {}

enum ControlMsg {
    Schedule(Entry),
    Shutdown,
}

/// Shared recurring-task scheduler backed by OS threads.
pub struct ThreadPoolScheduler {
    control_tx: Sender<ControlMsg>,
    next_seq: AtomicU64,
    shut_down: Arc<AtomicBool>,
    /// Handles of tasks that may still run; aborted on shutdown.
    issued: Mutex<Vec<Weak<TaskHandle>>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl ThreadPoolScheduler {
    /// Starts a timer thread and `workers` worker threads.
    ///
    /// # Errors
    ///
    /// Returns `ExecutionError::ThreadSpawn` if the OS refuses a thread.
    pub fn new(workers: usize, queue_capacity: usize) -> MonitorResult<Self> {
        let workers = workers.max(1);
        let (control_tx, control_rx) = unbounded::<ControlMsg>();
        let (job_tx, job_rx) = bounded::<Entry>(queue_capacity.max(1));
        let shut_down = Arc::new(AtomicBool::new(false));

        let mut threads = Vec::with_capacity(workers + 1);
        let timer = spawn("taskmon-timer".to_string(), move || timer_loop(&control_rx, &job_tx))?;
        threads.push(timer);

        for idx in 0..workers {
            let worker_rx = job_rx.clone();
            let worker_tx = control_tx.clone();
            let worker_stop = Arc::clone(&shut_down);
            let worker = spawn(format!("taskmon-worker-{idx}"), move || {
                worker_loop(&worker_rx, &worker_tx, &worker_stop);
            });
            match worker {
                Ok(handle) => threads.push(handle),
                Err(err) => {
                    shut_down.store(true, Ordering::Release);
                    let _ = control_tx.send(ControlMsg::Shutdown);
                    for handle in threads {
                        let _ = handle.join();
                    }
                    return Err(err);
                }
            }
        }
        drop(job_rx);

        tracing::debug!(workers, queue_capacity, "thread pool scheduler started");

        Ok(Self {
            control_tx,
            next_seq: AtomicU64::new(0),
            shut_down,
            issued: Mutex::new(Vec::new()),
            threads: Mutex::new(threads),
        })
    }

    /// Stops accepting new tasks and lets the threads exit.
    ///
    /// Runs already executing finish; nothing else runs afterwards. Every
    /// handle still active is aborted, so its `is_done()` turns true.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.control_tx.send(ControlMsg::Shutdown);

        let issued = std::mem::take(&mut *self.issued.lock().unwrap_or_else(PoisonError::into_inner));
        let aborted = issued
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|handle| handle.abort())
            .count();
        tracing::debug!(aborted, "thread pool scheduler shutting down");
    }

    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }
}

impl Scheduler for ThreadPoolScheduler {
    fn schedule_with_fixed_delay(
        &self,
        task: Task,
        initial_delay: Duration,
        delay: Duration,
    ) -> MonitorResult<Arc<dyn ScheduledHandle>> {
        let handle = Arc::new(TaskHandle::new());
        {
            // Checked under the lock so `shutdown` cannot miss this handle.
            let mut issued = self.issued.lock().unwrap_or_else(PoisonError::into_inner);
            if self.is_shut_down() {
                return Err(ExecutionError::SchedulerShutdown.into());
            }
            if issued.len() == issued.capacity() {
                issued.retain(|h| h.upgrade().is_some_and(|h| h.is_active()));
            }
            issued.push(Arc::downgrade(&handle));
        }

        let entry = Entry {
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
            due: due_after(initial_delay),
            delay,
            task,
            handle: Arc::clone(&handle),
        };

        self.control_tx
            .send(ControlMsg::Schedule(entry))
            .map_err(|_| ExecutionError::SchedulerShutdown)?;

        Ok(handle)
    }
}

impl Drop for ThreadPoolScheduler {
    fn drop(&mut self) {
        self.shutdown();

        let threads = match self.threads.get_mut() {
            Ok(threads) => std::mem::take(threads),
            Err(poisoned) => std::mem::take(poisoned.into_inner()),
        };

        // The last reference can be released by a task running on one of our
        // own threads. The others may be waiting on that thread, so detach all.
        let current = thread::current().id();
        if threads.iter().any(|h| h.thread().id() == current) {
            return;
        }
        for handle in threads {
            let _ = handle.join();
        }
    }
}

impl std::fmt::Debug for ThreadPoolScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadPoolScheduler")
            .field("next_seq", &self.next_seq)
            .field("shut_down", &self.shut_down)
            .finish_non_exhaustive()
    }
}

fn spawn<F>(name: String, f: F) -> MonitorResult<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new().name(name.clone()).spawn(f).map_err(|e| {
        ExecutionError::ThreadSpawn {
            name,
            message: e.to_string(),
        }
        .into()
    })
}

fn due_after(delay: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(delay)
        .unwrap_or_else(|| now + Duration::from_secs(100 * 365 * 24 * 3_600))
}

fn timer_loop(control_rx: &Receiver<ControlMsg>, job_tx: &Sender<Entry>) {
    let mut queue: BinaryHeap<Entry> = BinaryHeap::new();

    loop {
        let msg = match queue.peek() {
            None => control_rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
            Some(next) => control_rx.recv_timeout(next.due.saturating_duration_since(Instant::now())),
        };

        match msg {
            Ok(ControlMsg::Schedule(entry)) => {
                if entry.handle.is_active() {
                    queue.push(entry);
                }
            }
            Ok(ControlMsg::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }

        let now = Instant::now();
        while queue.peek().is_some_and(|e| e.due <= now) {
            let Some(entry) = queue.pop() else { break };
            if !entry.handle.is_active() {
                tracing::trace!(task = entry.seq, "dropping cancelled task");
                continue;
            }
            if job_tx.send(entry).is_err() {
                return;
            }
        }
    }
}

fn worker_loop(job_rx: &Receiver<Entry>, control_tx: &Sender<ControlMsg>, shut_down: &AtomicBool) {
    while let Ok(mut entry) = job_rx.recv() {
        if shut_down.load(Ordering::Acquire) {
            break;
        }
        if !entry.handle.is_active() {
            continue;
        }

        let task = Arc::clone(&entry.task);
        if catch_unwind(AssertUnwindSafe(|| task())).is_err() {
            entry.handle.abort();
            tracing::error!(task = entry.seq, "scheduled task panicked, no further runs");
            continue;
        }

        entry.due = due_after(entry.delay);
        if control_tx.send(ControlMsg::Schedule(entry)).is_err() {
            break;
        }
    }
}
