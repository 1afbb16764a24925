//! [`CommandQueue`] – ordered, single-consumer execution of side effects.
//!
//! Any thread may [`enqueue`][CommandQueue::enqueue] a [`QueuedCommand`].
//! One executor thread wakes on a fixed tick, drains the queue in FIFO
//! order and goes back to sleep.  Commands never overlap: the executor holds
//! an execution lock for the whole drain, so a command that writes several
//! lines to a link finishes before the next command starts.
//!
//! | Operation | Blocking | Wakes executor |
//! |---|---|---|
//! | [`enqueue`][CommandQueue::enqueue] | no | next tick |
//! | [`enqueue_urgent`][CommandQueue::enqueue_urgent] | no | immediately |
//! | [`run_pending`][CommandQueue::run_pending] | until drained | n/a |
//!
//! A command that returns an error or panics is logged and counted; the
//! remaining commands still run.

use std::any::Any;
use std::collections::VecDeque;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use kevinbot_types::ComError;
use tracing::{debug, error, trace};

type CommandFn = Box<dyn FnOnce() -> Result<(), ComError> + Send + 'static>;

/// A deferred unit of side-effecting work.
pub struct QueuedCommand {
    label: String,
    run: CommandFn,
}

impl QueuedCommand {
    pub fn new<F>(label: impl Into<String>, run: F) -> Self
    where
        F: FnOnce() -> Result<(), ComError> + Send + 'static,
    {
        Self {
            label: label.into(),
            run: Box::new(run),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

impl fmt::Debug for QueuedCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueuedCommand").field("label", &self.label).finish()
    }
}

/// Execution counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueStats {
    pub executed: u64,
    pub failed: u64,
}

struct Shared {
    queue: Mutex<VecDeque<QueuedCommand>>,
    wake: Condvar,
    urgent: AtomicBool,
    shutdown: AtomicBool,
    exec: Mutex<()>,
    tick: Duration,
    executed: AtomicU64,
    failed: AtomicU64,
}

/// Cloneable handle to the queue.
#[derive(Clone)]
pub struct CommandQueue {
    shared: Arc<Shared>,
}

impl fmt::Debug for CommandQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandQueue")
            .field("pending", &self.len())
            .field("tick", &self.shared.tick)
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

impl CommandQueue {
    pub fn new(tick: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                queue: Mutex::new(VecDeque::new()),
                wake: Condvar::new(),
                urgent: AtomicBool::new(false),
                shutdown: AtomicBool::new(false),
                exec: Mutex::new(()),
                tick,
                executed: AtomicU64::new(0),
                failed: AtomicU64::new(0),
            }),
        }
    }

    fn queue(&self) -> MutexGuard<'_, VecDeque<QueuedCommand>> {
        self.shared.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a command; it runs on the executor's next tick.
    pub fn enqueue(&self, command: QueuedCommand) {
        trace!(label = command.label(), "command queued");
        self.queue().push_back(command);
    }

    /// Shorthand for `enqueue(QueuedCommand::new(label, run))`.
    pub fn submit<F>(&self, label: impl Into<String>, run: F)
    where
        F: FnOnce() -> Result<(), ComError> + Send + 'static,
    {
        self.enqueue(QueuedCommand::new(label, run));
    }

    /// Append a command and wake the executor now.
    ///
    /// FIFO order is kept: anything queued earlier still runs first.
    pub fn enqueue_urgent(&self, command: QueuedCommand) {
        debug!(label = command.label(), "urgent command queued");
        // Flag and notify under the queue lock so the wake-up cannot slip in
        // between the executor's check and its wait.
        let mut queue = self.queue();
        queue.push_back(command);
        self.shared.urgent.store(true, Ordering::SeqCst);
        self.shared.wake.notify_all();
    }

    pub fn len(&self) -> usize {
        self.queue().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue().is_empty()
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            executed: self.shared.executed.load(Ordering::SeqCst),
            failed: self.shared.failed.load(Ordering::SeqCst),
        }
    }

    /// Drain the queue on the calling thread, one command at a time.
    ///
    /// Commands queued while draining are run in the same pass.  Returns
    /// the number of commands executed.
    pub fn run_pending(&self) -> usize {
        let _exec = self.shared.exec.lock().unwrap_or_else(PoisonError::into_inner);
        let mut ran = 0;
        loop {
            // Release the queue lock before running so producers never wait
            // on a command.
            let next = self.queue().pop_front();
            let Some(command) = next else { break };
            self.execute(command);
            ran += 1;
        }
        ran
    }

    fn execute(&self, command: QueuedCommand) {
        let QueuedCommand { label, run } = command;
        trace!(label = %label, "executing command");
        self.shared.executed.fetch_add(1, Ordering::SeqCst);
        match catch_unwind(AssertUnwindSafe(run)) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                self.shared.failed.fetch_add(1, Ordering::SeqCst);
                error!(label = %label, error = %e, "queued command failed");
            }
            Err(payload) => {
                self.shared.failed.fetch_add(1, Ordering::SeqCst);
                error!(label = %label, panic = %panic_message(payload.as_ref()), "queued command panicked");
            }
        }
    }

    /// Start the executor thread.
    pub fn spawn_executor(&self) -> Result<ExecutorHandle, ComError> {
        let queue = self.clone();
        let join = thread::Builder::new()
            .name("command-queue".to_string())
            .spawn(move || queue.executor_loop())
            .map_err(|e| ComError::Channel(format!("cannot spawn command executor: {e}")))?;
        Ok(ExecutorHandle {
            queue: self.clone(),
            join: Some(join),
        })
    }

    fn executor_loop(&self) {
        debug!(tick = ?self.shared.tick, "command executor started");
        loop {
            self.run_pending();
            if self.shared.shutdown.load(Ordering::SeqCst) {
                // Final drain so nothing queued before shutdown is lost.
                self.run_pending();
                break;
            }
            let guard = self.queue();
            if self.shared.urgent.swap(false, Ordering::SeqCst)
                || self.shared.shutdown.load(Ordering::SeqCst)
            {
                continue;
            }
            let _ = self
                .shared
                .wake
                .wait_timeout(guard, self.shared.tick)
                .unwrap_or_else(PoisonError::into_inner);
            self.shared.urgent.store(false, Ordering::SeqCst);
        }
        debug!("command executor stopped");
    }

    /// Ask the executor to drain and exit.
    pub fn shutdown(&self) {
        let _queue = self.queue();
        self.shared.shutdown.store(true, Ordering::SeqCst);
        self.shared.wake.notify_all();
    }
}

/// Owns the executor thread; dropping it shuts the executor down.
pub struct ExecutorHandle {
    queue: CommandQueue,
    join: Option<JoinHandle<()>>,
}

impl ExecutorHandle {
    /// Drain remaining commands and wait for the executor to exit.
    pub fn stop(mut self) {
        self.stop_inner();
    }

    fn stop_inner(&mut self) {
        self.queue.shutdown();
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                error!("command executor thread panicked");
            }
        }
    }
}

impl Drop for ExecutorHandle {
    fn drop(&mut self) {
        self.stop_inner();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&str) + Clone + Send + 'static) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        let push = move |line: &str| sink.lock().unwrap().push(line.to_string());
        (log, push)
    }

    #[test]
    fn runs_in_submission_order() {
        let queue = CommandQueue::new(Duration::from_millis(100));
        let (log, push) = recorder();
        for i in 0..5 {
            let push = push.clone();
            queue.submit(format!("cmd{i}"), move || {
                push(&format!("cmd{i}"));
                Ok(())
            });
        }
        assert_eq!(queue.run_pending(), 5);
        assert_eq!(*log.lock().unwrap(), vec!["cmd0", "cmd1", "cmd2", "cmd3", "cmd4"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn failures_and_panics_do_not_stop_the_queue() {
        let queue = CommandQueue::new(Duration::from_millis(100));
        let (log, push) = recorder();
        queue.submit("fails", || Err(ComError::Channel("boom".to_string())));
        queue.submit("panics", || panic!("queued command exploded"));
        let p = push.clone();
        queue.submit("after", move || {
            p("after");
            Ok(())
        });

        assert_eq!(queue.run_pending(), 3);
        assert_eq!(*log.lock().unwrap(), vec!["after"]);
        assert_eq!(queue.stats(), QueueStats { executed: 3, failed: 2 });
    }

    #[test]
    fn commands_from_many_threads_never_interleave() {
        let queue = CommandQueue::new(Duration::from_millis(5));
        let executor = queue.spawn_executor().unwrap();
        let (log, push) = recorder();

        let producers: Vec<_> = (0..4)
            .map(|t| {
                let queue = queue.clone();
                let push = push.clone();
                thread::spawn(move || {
                    for n in 0..10 {
                        let push = push.clone();
                        queue.submit(format!("t{t}-{n}"), move || {
                            for step in 0..6 {
                                push(&format!("t{t}-{n}:{step}"));
                                thread::yield_now();
                            }
                            Ok(())
                        });
                    }
                })
            })
            .collect();
        for p in producers {
            p.join().unwrap();
        }
        executor.stop();

        let log = log.lock().unwrap();
        assert_eq!(log.len(), 4 * 10 * 6);
        for block in log.chunks(6) {
            let owner = block[0].split(':').next().unwrap();
            for (step, line) in block.iter().enumerate() {
                assert_eq!(*line, format!("{owner}:{step}"));
            }
        }
        // Per-producer order is preserved.
        for t in 0..4 {
            let firsts: Vec<&String> = log
                .iter()
                .filter(|l| l.starts_with(&format!("t{t}-")) && l.ends_with(":0"))
                .collect();
            let expected: Vec<String> = (0..10).map(|n| format!("t{t}-{n}:0")).collect();
            assert_eq!(firsts.iter().map(|s| s.as_str()).collect::<Vec<_>>(), expected);
        }
    }

    #[test]
    fn urgent_command_runs_before_the_tick() {
        let queue = CommandQueue::new(Duration::from_secs(30));
        let executor = queue.spawn_executor().unwrap();
        // Let the executor reach its wait.
        thread::sleep(Duration::from_millis(50));

        let (tx, rx) = std::sync::mpsc::channel();
        let start = Instant::now();
        queue.enqueue_urgent(QueuedCommand::new("estop", move || {
            tx.send(()).unwrap();
            Ok(())
        }));
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(start.elapsed() < Duration::from_secs(5));
        executor.stop();
    }

    #[test]
    fn stop_drains_remaining_commands() {
        let queue = CommandQueue::new(Duration::from_secs(30));
        let executor = queue.spawn_executor().unwrap();
        let (log, push) = recorder();
        queue.submit("last words", move || {
            push("last words");
            Ok(())
        });
        executor.stop();
        assert_eq!(*log.lock().unwrap(), vec!["last words"]);
    }
}
