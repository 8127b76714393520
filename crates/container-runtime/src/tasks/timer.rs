//! Serial timer executor shared by every task of the container.
//!
//! One tokio task owns a deadline heap. Callbacks run one at a time on that
//! task, in deadline order; ties run in scheduling order.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;

use anyhow::anyhow;
use parking_lot::Mutex;
use stream_types::TaskName;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

type TimerCallback = Box<dyn FnOnce() + Send + 'static>;

enum Command {
    Schedule(Timer),
    Stop,
}

struct Timer {
    deadline: Instant,
    seq: u64,
    task: TaskName,
    callback: TimerCallback,
}

impl PartialEq for Timer {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for Timer {}

impl PartialOrd for Timer {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timer {
    // reversed: BinaryHeap is a max-heap
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

pub struct TimerExecutor {
    tx: mpsc::UnboundedSender<Command>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<Command>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Default for TimerExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl TimerExecutor {
    /// Timers scheduled before `start` are queued and fire once started.
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(Some(rx)),
            handle: Mutex::new(None),
        }
    }

    /// Scheduling handle bound to one task.
    pub fn handle(&self, task: TaskName) -> TimerHandle {
        TimerHandle {
            task,
            tx: self.tx.clone(),
        }
    }

    pub fn start(&self) {
        let Some(rx) = self.rx.lock().take() else {
            return;
        };
        info!("Starting task timer executor");
        *self.handle.lock() = Some(tokio::spawn(run(rx)));
    }

    /// Stop the executor. Pending timers are dropped.
    pub async fn stop(&self) {
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            let _ = self.tx.send(Command::Stop);
            if let Err(e) = handle.await {
                warn!(error = %e, "Timer executor ended abnormally");
            }
        }
    }
}

async fn run(mut rx: mpsc::UnboundedReceiver<Command>) {
    let mut heap: BinaryHeap<Timer> = BinaryHeap::new();
    loop {
        let next = heap.peek().map(|t| t.deadline);
        let far = Instant::now() + Duration::from_secs(3600);
        tokio::select! {
            command = rx.recv() => match command {
                Some(Command::Schedule(timer)) => heap.push(timer),
                Some(Command::Stop) | None => break,
            },
            _ = tokio::time::sleep_until(next.unwrap_or(far)), if next.is_some() => {
                let now = Instant::now();
                while heap.peek().is_some_and(|t| t.deadline <= now) {
                    if let Some(timer) = heap.pop() {
                        fire(timer);
                    }
                }
            }
        }
    }
    debug!(dropped = heap.len(), "Timer executor stopped");
}

fn fire(timer: Timer) {
    let task = timer.task;
    if catch_unwind(AssertUnwindSafe(timer.callback)).is_err() {
        error!(task = %task, "Timer callback panicked");
    }
}

/// Schedules callbacks on the shared executor on behalf of one task.
#[derive(Clone)]
pub struct TimerHandle {
    task: TaskName,
    tx: mpsc::UnboundedSender<Command>,
}

impl TimerHandle {
    pub fn task(&self) -> &TaskName {
        &self.task
    }

    pub fn schedule(
        &self,
        delay: Duration,
        callback: impl FnOnce() + Send + 'static,
    ) -> anyhow::Result<()> {
        static SEQ: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(0);
        let timer = Timer {
            deadline: Instant::now() + delay,
            seq: SEQ.fetch_add(1, std::sync::atomic::Ordering::Relaxed),
            task: self.task.clone(),
            callback: Box::new(callback),
        };
        self.tx
            .send(Command::Schedule(timer))
            .map_err(|_| anyhow!("timer executor is stopped"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_callbacks_fire_in_deadline_order() {
        let executor = TimerExecutor::new();
        let fired = Arc::new(Mutex::new(Vec::new()));
        let handle = executor.handle(TaskName::new("t"));

        for (delay, label) in [(30, "late"), (5, "early"), (15, "middle")] {
            let fired = fired.clone();
            handle
                .schedule(Duration::from_millis(delay), move || fired.lock().push(label))
                .unwrap();
        }

        executor.start();
        tokio::time::sleep(Duration::from_millis(80)).await;
        executor.stop().await;

        assert_eq!(fired.lock().as_slice(), ["early", "middle", "late"]);
    }

    #[tokio::test]
    async fn test_panicking_callback_does_not_stop_executor() {
        let executor = TimerExecutor::new();
        executor.start();
        let handle = executor.handle(TaskName::new("t"));
        let fired = Arc::new(Mutex::new(false));

        handle.schedule(Duration::ZERO, || panic!("boom")).unwrap();
        let flag = fired.clone();
        handle
            .schedule(Duration::from_millis(5), move || *flag.lock() = true)
            .unwrap();

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(*fired.lock());
        executor.stop().await;
    }

    #[tokio::test]
    async fn test_schedule_after_stop_fails() {
        let executor = TimerExecutor::new();
        executor.start();
        executor.stop().await;

        let handle = executor.handle(TaskName::new("t"));
        assert!(handle.schedule(Duration::ZERO, || {}).is_err());
    }
}
