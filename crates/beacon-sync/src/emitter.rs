//! # Progress Emitter
//!
//! Turns orchestrator callbacks into a one-directional [`SyncEvent`] stream.
//!
//! ## Stream Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  Orchestrator ──on_*()──► ProgressEmitter ──mpsc──► EventStream ──► SSE │
//! │                               ▲    │                    │               │
//! │                heartbeat task ┘    │ select! { done first, send }       │
//! │                (every N secs)      │                    │               │
//! │                                    │            drop (disconnect)       │
//! │                                    ▼                    │               │
//! │                              done signal ◄──── cancel() ┘               │
//! │                                                                         │
//! │  • exactly one `complete` or `failed`, then the stream ends             │
//! │  • after the done signal fires, sends are dropped silently              │
//! │  • the heartbeat stops once, at terminal event or emitter drop          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use beacon_core::{Checkpoint, ErrorRecord, Progress, SyncEvent};
use futures_util::Stream;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, trace};

// =============================================================================
// Observer Trait
// =============================================================================

/// Callbacks the orchestrator reports through.
#[async_trait]
pub trait SyncObserver: Send + Sync {
    async fn on_progress(&self, step: Option<&str>, progress: Progress, message: Option<String>);

    async fn on_checkpoint(&self, checkpoint: &Checkpoint);

    async fn on_errors(&self, errors: &[ErrorRecord]);

    async fn on_warnings(&self, warnings: &[String]);

    async fn on_complete(&self, progress: Progress, errors: &[ErrorRecord]);

    async fn on_failed(&self, error: &ErrorRecord);
}

/// Observer that discards everything.
pub struct NoOpObserver;

#[async_trait]
impl SyncObserver for NoOpObserver {
    async fn on_progress(&self, _step: Option<&str>, _progress: Progress, _message: Option<String>) {}
    async fn on_checkpoint(&self, _checkpoint: &Checkpoint) {}
    async fn on_errors(&self, _errors: &[ErrorRecord]) {}
    async fn on_warnings(&self, _warnings: &[String]) {}
    async fn on_complete(&self, _progress: Progress, _errors: &[ErrorRecord]) {}
    async fn on_failed(&self, _error: &ErrorRecord) {}
}

// =============================================================================
// Emitter
// =============================================================================

struct Shared {
    run_id: String,
    tx: mpsc::Sender<SyncEvent>,
    done: CancellationToken,
    terminated: AtomicBool,
}

impl Shared {
    /// Sends unless the consumer is gone; the done signal wins any race.
    async fn send(&self, event: SyncEvent) -> bool {
        if self.done.is_cancelled() {
            trace!(run_id = %self.run_id, kind = event.kind(), "Consumer gone, dropping event");
            return false;
        }

        tokio::select! {
            biased;
            _ = self.done.cancelled() => {
                trace!(run_id = %self.run_id, "Consumer gone, dropping event");
                false
            }
            sent = self.tx.send(event) => match sent {
                Ok(()) => true,
                Err(_) => {
                    debug!(run_id = %self.run_id, "Event receiver dropped");
                    self.done.cancel();
                    false
                }
            },
        }
    }
}

/// Sender half of a run's event stream.
pub struct ProgressEmitter {
    shared: Arc<Shared>,
    heartbeat_stop: CancellationToken,
    _heartbeat_guard: DropGuard,
}

impl ProgressEmitter {
    /// Creates the emitter/stream pair and starts the heartbeat.
    ///
    /// `parent` cancels the done signal from outside (server shutdown); a
    /// dropped [`EventStream`] cancels it too.
    pub fn channel(
        run_id: impl Into<String>,
        capacity: usize,
        heartbeat_interval: Duration,
        parent: &CancellationToken,
    ) -> (ProgressEmitter, EventStream) {
        let run_id = run_id.into();
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let done = parent.child_token();

        let shared = Arc::new(Shared {
            run_id,
            tx,
            done: done.clone(),
            terminated: AtomicBool::new(false),
        });

        let heartbeat_stop = CancellationToken::new();
        tokio::spawn(heartbeat_loop(
            shared.clone(),
            heartbeat_interval,
            heartbeat_stop.clone(),
        ));

        let emitter = ProgressEmitter {
            shared,
            _heartbeat_guard: heartbeat_stop.clone().drop_guard(),
            heartbeat_stop,
        };
        let stream = EventStream {
            rx,
            done,
            finished: false,
        };
        (emitter, stream)
    }

    pub fn run_id(&self) -> &str {
        &self.shared.run_id
    }

    /// Fires when the consumer disconnects or the parent is cancelled.
    pub fn done_signal(&self) -> CancellationToken {
        self.shared.done.clone()
    }

    pub fn is_terminated(&self) -> bool {
        self.shared.terminated.load(Ordering::SeqCst)
    }

    async fn emit(&self, event: SyncEvent) -> bool {
        if self.is_terminated() {
            return false;
        }
        self.shared.send(event).await
    }

    /// Sends the single terminal event; later calls are ignored.
    async fn terminate(&self, event: SyncEvent) -> bool {
        if self
            .shared
            .terminated
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }
        self.heartbeat_stop.cancel();
        self.shared.send(event).await
    }
}

#[async_trait]
impl SyncObserver for ProgressEmitter {
    async fn on_progress(&self, step: Option<&str>, progress: Progress, message: Option<String>) {
        self.emit(SyncEvent::Progress {
            run_id: self.shared.run_id.clone(),
            step: step.map(str::to_string),
            progress,
            message,
        })
        .await;
    }

    async fn on_checkpoint(&self, checkpoint: &Checkpoint) {
        self.emit(SyncEvent::Checkpoint {
            run_id: self.shared.run_id.clone(),
            checkpoint: checkpoint.clone(),
        })
        .await;
    }

    async fn on_errors(&self, errors: &[ErrorRecord]) {
        if errors.is_empty() {
            return;
        }
        self.emit(SyncEvent::Errors {
            run_id: self.shared.run_id.clone(),
            errors: errors.to_vec(),
        })
        .await;
    }

    async fn on_warnings(&self, warnings: &[String]) {
        if warnings.is_empty() {
            return;
        }
        self.emit(SyncEvent::Warnings {
            run_id: self.shared.run_id.clone(),
            warnings: warnings.to_vec(),
        })
        .await;
    }

    async fn on_complete(&self, progress: Progress, errors: &[ErrorRecord]) {
        self.terminate(SyncEvent::Complete {
            run_id: self.shared.run_id.clone(),
            progress,
            errors: errors.to_vec(),
        })
        .await;
    }

    async fn on_failed(&self, error: &ErrorRecord) {
        self.terminate(SyncEvent::Failed {
            run_id: self.shared.run_id.clone(),
            error: error.clone(),
        })
        .await;
    }
}

async fn heartbeat_loop(shared: Arc<Shared>, every: Duration, stop: CancellationToken) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            _ = shared.done.cancelled() => break,
            _ = ticker.tick() => {
                if !shared.send(SyncEvent::heartbeat(shared.run_id.clone())).await {
                    break;
                }
            }
        }
    }

    trace!(run_id = %shared.run_id, "Heartbeat stopped");
}

// =============================================================================
// Event Stream
// =============================================================================

/// Receiver half; ends after the terminal event or when every sender is gone.
///
/// Dropping it signals disconnect to the run.
pub struct EventStream {
    rx: mpsc::Receiver<SyncEvent>,
    done: CancellationToken,
    finished: bool,
}

impl EventStream {
    pub async fn recv(&mut self) -> Option<SyncEvent> {
        if self.finished {
            return None;
        }
        let event = self.rx.recv().await;
        self.observe(&event);
        event
    }

    /// Drains the stream to completion.
    pub async fn collect_all(mut self) -> Vec<SyncEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.recv().await {
            events.push(event);
        }
        events
    }

    fn observe(&mut self, event: &Option<SyncEvent>) {
        match event {
            Some(e) if e.is_terminal() => self.finished = true,
            None => self.finished = true,
            _ => {}
        }
    }
}

impl Stream for EventStream {
    type Item = SyncEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }
        let polled = this.rx.poll_recv(cx);
        if let Poll::Ready(event) = &polled {
            this.observe(event);
        }
        polled
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        self.done.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_core::{classify, FailureKind};

    fn record() -> ErrorRecord {
        ErrorRecord::new(classify(&FailureKind::Timeout), "timed out", None)
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_fires_without_progress() {
        let parent = CancellationToken::new();
        let (emitter, mut stream) =
            ProgressEmitter::channel("run-1", 8, Duration::from_secs(15), &parent);

        tokio::time::sleep(Duration::from_secs(31)).await;

        let first = stream.recv().await.unwrap();
        let second = stream.recv().await.unwrap();
        assert_eq!(first.kind(), "heartbeat");
        assert_eq!(second.kind(), "heartbeat");
        assert_eq!(first.run_id(), "run-1");
        drop(emitter);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exactly_one_terminal_event() {
        let parent = CancellationToken::new();
        let (emitter, stream) =
            ProgressEmitter::channel("run-1", 8, Duration::from_secs(3600), &parent);

        emitter
            .on_progress(Some("reviews"), Progress::default(), None)
            .await;
        emitter.on_complete(Progress::default(), &[]).await;
        emitter.on_failed(&record()).await;
        emitter
            .on_progress(Some("reviews"), Progress::default(), None)
            .await;
        drop(emitter);

        let kinds: Vec<&str> = stream
            .collect_all()
            .await
            .iter()
            .map(|e| e.kind())
            .collect();
        assert_eq!(kinds, vec!["progress", "complete"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_ends_after_terminal_even_with_live_sender() {
        let parent = CancellationToken::new();
        let (emitter, mut stream) =
            ProgressEmitter::channel("run-1", 8, Duration::from_secs(3600), &parent);

        emitter.on_failed(&record()).await;
        assert_eq!(stream.recv().await.unwrap().kind(), "failed");
        assert!(stream.recv().await.is_none());
        assert!(emitter.is_terminated());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_fires_done_and_drops_sends() {
        let parent = CancellationToken::new();
        let (emitter, stream) =
            ProgressEmitter::channel("run-1", 1, Duration::from_secs(3600), &parent);
        let done = emitter.done_signal();

        drop(stream);
        assert!(done.is_cancelled());

        // Would block forever on a full channel without the done signal.
        for _ in 0..4 {
            emitter
                .on_progress(None, Progress::default(), None)
                .await;
        }
        emitter.on_complete(Progress::default(), &[]).await;
        assert!(!parent.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_parent_cancel_reaches_done_signal() {
        let parent = CancellationToken::new();
        let (emitter, _stream) =
            ProgressEmitter::channel("run-1", 8, Duration::from_secs(15), &parent);

        parent.cancel();
        assert!(emitter.done_signal().is_cancelled());
    }
}
