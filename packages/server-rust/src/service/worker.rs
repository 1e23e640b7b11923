//! Background worker for queue-driven send invocations.
//!
//! Provides a generic `BackgroundWorker<R>` that processes tasks from an mpsc channel
//! via a `BackgroundRunnable` implementation, with optional periodic tick callbacks,
//! and the [`SendWorker`] runnable that feeds queue messages to a [`SendDispatcher`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use relay_core::ClockSource;
use tokio::sync::mpsc;
use tracing::{debug, error};

use super::dispatch::SendDispatcher;
use crate::traits::DueEvents;

// ---------------------------------------------------------------------------
// BackgroundRunnable trait
// ---------------------------------------------------------------------------

/// Trait for task handlers executed by `BackgroundWorker`.
///
/// Implementors define how individual tasks are processed, what happens on each
/// periodic tick, and how to clean up on shutdown.
#[async_trait]
pub trait BackgroundRunnable: Send + 'static {
    /// The type of task this runnable processes.
    type Task: Send + 'static;

    /// Process a single task.
    async fn run(&mut self, task: Self::Task);

    /// Called periodically (on each tick interval). Default is a no-op.
    async fn on_tick(&mut self) {}

    /// Called once when the worker is shutting down. Default is a no-op.
    async fn shutdown(&mut self) {}
}

// ---------------------------------------------------------------------------
// BackgroundWorker
// ---------------------------------------------------------------------------

/// Generic background worker that processes tasks via an mpsc channel.
///
/// The worker spawns a tokio task that:
/// 1. Listens for tasks on the mpsc channel
/// 2. Calls `BackgroundRunnable::run()` for each task
/// 3. Periodically calls `BackgroundRunnable::on_tick()` at the configured interval
/// 4. Calls `BackgroundRunnable::shutdown()` when stopped
pub struct BackgroundWorker<R: BackgroundRunnable> {
    tx: Option<mpsc::Sender<R::Task>>,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl<R: BackgroundRunnable> BackgroundWorker<R> {
    /// Start the background worker with the given runnable and tick interval.
    ///
    /// Returns a `BackgroundWorker` handle that can be used to submit tasks
    /// and stop the worker. The channel capacity is fixed at 256.
    pub fn start(mut runnable: R, tick_interval_ms: u64) -> Self {
        let (tx, mut rx) = mpsc::channel::<R::Task>(256);
        let (shutdown_tx, mut shutdown_rx) = tokio::sync::oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            let mut tick_interval =
                tokio::time::interval(std::time::Duration::from_millis(tick_interval_ms));
            // Skip the first immediate tick so on_tick doesn't fire at startup.
            tick_interval.tick().await;

            loop {
                tokio::select! {
                    task = rx.recv() => {
                        match task {
                            Some(t) => runnable.run(t).await,
                            None => break, // Channel closed.
                        }
                    }
                    _ = tick_interval.tick() => {
                        runnable.on_tick().await;
                    }
                    _ = &mut shutdown_rx => {
                        break;
                    }
                }
            }

            runnable.shutdown().await;
        });

        Self {
            tx: Some(tx),
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    /// Submit a task to the worker.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker has been stopped or the channel is full.
    pub async fn submit(&self, task: R::Task) -> anyhow::Result<()> {
        match &self.tx {
            Some(tx) => tx
                .send(task)
                .await
                .map_err(|_| anyhow::anyhow!("worker channel closed")),
            None => Err(anyhow::anyhow!("worker not running")),
        }
    }

    /// Stop the worker gracefully, waiting for the worker task to complete.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

// ---------------------------------------------------------------------------
// SendWorker
// ---------------------------------------------------------------------------

/// Counters shared between a [`SendWorker`] and whoever started it.
#[derive(Debug, Default)]
pub struct WorkerStats {
    handled: AtomicU64,
    active: AtomicU64,
}

impl WorkerStats {
    /// Messages handed to the dispatcher so far.
    #[must_use]
    pub fn handled(&self) -> u64 {
        self.handled.load(Ordering::SeqCst)
    }

    /// True while the worker is handling a message or draining its queue.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.active.load(Ordering::SeqCst) > 0
    }
}

/// Marks the worker busy for as long as it lives.
struct Busy<'a>(&'a WorkerStats);

impl<'a> Busy<'a> {
    fn enter(stats: &'a WorkerStats) -> Self {
        stats.active.fetch_add(1, Ordering::SeqCst);
        Self(stats)
    }
}

impl Drop for Busy<'_> {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Runs submitted queue messages through the dispatcher and, on every tick,
/// pulls the messages that have come due from the scheduled queue.
pub struct SendWorker {
    dispatcher: Arc<SendDispatcher>,
    due: Arc<dyn DueEvents>,
    clock: Arc<dyn ClockSource>,
    stats: Arc<WorkerStats>,
}

impl SendWorker {
    pub fn new(
        dispatcher: Arc<SendDispatcher>,
        due: Arc<dyn DueEvents>,
        clock: Arc<dyn ClockSource>,
    ) -> Self {
        Self {
            dispatcher,
            due,
            clock,
            stats: Arc::new(WorkerStats::default()),
        }
    }

    #[must_use]
    pub fn stats(&self) -> Arc<WorkerStats> {
        self.stats.clone()
    }

    async fn handle(&self, message: &str) {
        let outcome = self.dispatcher.handle_message(message).await;
        self.stats.handled.fetch_add(1, Ordering::SeqCst);
        debug!(outcome = %outcome, "handled queue message");
    }
}

#[async_trait]
impl BackgroundRunnable for SendWorker {
    type Task = String;

    async fn run(&mut self, message: String) {
        let _busy = Busy::enter(&self.stats);
        self.handle(&message).await;
    }

    async fn on_tick(&mut self) {
        let _busy = Busy::enter(&self.stats);
        let messages = match self.due.take_due(self.clock.now()).await {
            Ok(messages) => messages,
            Err(err) => {
                error!(error = %err, "failed to poll scheduled queue");
                return;
            }
        };
        for message in messages {
            self.handle(&message).await;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    use relay_core::{
        BodyFormat, Event, EventAction, Receiver, ReportHeader, SystemClock, TransportConfig,
    };

    use super::*;
    use crate::storage::{
        InMemoryActionHistory, InMemoryEventQueue, InMemoryWorkflowStore, StaticReceiverCatalog,
        TaskState,
    };
    use crate::traits::EventQueue as _;
    use crate::transport::TransportRegistry;

    struct CountingRunnable {
        run_count: Arc<AtomicU32>,
        tick_count: Arc<AtomicU32>,
        shutdown_called: Arc<AtomicU32>,
    }

    #[async_trait]
    impl BackgroundRunnable for CountingRunnable {
        type Task = String;

        async fn run(&mut self, _task: String) {
            self.run_count.fetch_add(1, Ordering::SeqCst);
        }

        async fn on_tick(&mut self) {
            self.tick_count.fetch_add(1, Ordering::SeqCst);
        }

        async fn shutdown(&mut self) {
            self.shutdown_called.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn counting() -> (CountingRunnable, Arc<AtomicU32>, Arc<AtomicU32>, Arc<AtomicU32>) {
        let run_count = Arc::new(AtomicU32::new(0));
        let tick_count = Arc::new(AtomicU32::new(0));
        let shutdown_called = Arc::new(AtomicU32::new(0));
        let runnable = CountingRunnable {
            run_count: run_count.clone(),
            tick_count: tick_count.clone(),
            shutdown_called: shutdown_called.clone(),
        };
        (runnable, run_count, tick_count, shutdown_called)
    }

    #[tokio::test]
    async fn start_submit_and_stop() {
        let (runnable, run_count, _ticks, shutdown_called) = counting();
        let mut worker = BackgroundWorker::start(runnable, 60_000);

        worker.submit("task-1".to_string()).await.unwrap();
        worker.submit("task-2".to_string()).await.unwrap();
        worker.submit("task-3".to_string()).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(run_count.load(Ordering::SeqCst), 3);

        worker.stop().await;
        assert_eq!(shutdown_called.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn tick_fires_periodically() {
        let (runnable, _runs, tick_count, _shutdown) = counting();
        let mut worker = BackgroundWorker::start(runnable, 20);

        tokio::time::sleep(Duration::from_millis(100)).await;
        worker.stop().await;

        assert!(tick_count.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn submit_after_stop_returns_error() {
        let (runnable, _runs, _ticks, _shutdown) = counting();
        let mut worker = BackgroundWorker::start(runnable, 60_000);
        worker.stop().await;

        let result = worker.submit("late-task".to_string()).await;
        assert!(result.is_err());
    }

    fn send_worker(
        receivers: Vec<Receiver>,
    ) -> (
        SendWorker,
        Arc<InMemoryWorkflowStore>,
        Arc<InMemoryEventQueue>,
        Arc<InMemoryActionHistory>,
    ) {
        let store = Arc::new(InMemoryWorkflowStore::new());
        let queue = Arc::new(InMemoryEventQueue::new());
        let history = Arc::new(InMemoryActionHistory::new());
        let dispatcher = Arc::new(SendDispatcher::new(
            store.clone(),
            queue.clone(),
            history.clone(),
            Arc::new(StaticReceiverCatalog::new(receivers)),
            TransportRegistry::new(),
        ));
        let worker = SendWorker::new(dispatcher, queue.clone(), Arc::new(SystemClock));
        (worker, store, queue, history)
    }

    #[tokio::test]
    async fn submitted_messages_are_dispatched() {
        let (runnable, store, _queue, history) =
            send_worker(vec![Receiver::new("ignore.null", Some(TransportConfig::Null))]);
        let id = store
            .insert(ReportHeader::new("ignore.null", BodyFormat::Csv, "a"))
            .unwrap();
        let stats = runnable.stats();
        let mut worker = BackgroundWorker::start(runnable, 60_000);

        let message = Event::receiver(EventAction::Send, "ignore.null")
            .to_queue_message()
            .unwrap();
        worker.submit(message).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        worker.stop().await;

        assert_eq!(stats.handled(), 1);
        assert!(!stats.is_busy());
        assert_eq!(history.len(), 1);
        assert_eq!(store.state_of(id), Some(TaskState::Delivered));
    }

    #[tokio::test]
    async fn tick_drains_due_queue() {
        let (runnable, store, queue, history) =
            send_worker(vec![Receiver::new("ignore.null", Some(TransportConfig::Null))]);
        store
            .insert(ReportHeader::new("ignore.null", BodyFormat::Csv, "a"))
            .unwrap();
        queue
            .enqueue(&Event::receiver(EventAction::Send, "ignore.null"))
            .await
            .unwrap();
        let stats = runnable.stats();
        let mut worker = BackgroundWorker::start(runnable, 10);

        tokio::time::sleep(Duration::from_millis(100)).await;
        worker.stop().await;

        assert!(queue.is_empty());
        assert_eq!(stats.handled(), 1);
        assert_eq!(history.len(), 1);
    }
}
