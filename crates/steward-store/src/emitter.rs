use crate::durable::DurableTier;
use crate::tier::TierError;
use async_trait::async_trait;
use futures_util::future::join_all;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use steward_core::SessionEvent;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Why a single sink failed to take an event.
#[derive(Debug, thiserror::Error)]
pub enum EmitError {
    /// The sink could not be reached.
    #[error("transport error: {0}")]
    Transport(String),
    /// The sink answered with a non-success HTTP status.
    #[error("sink rejected event with status {0}")]
    Rejected(u16),
    /// The event could not be serialized.
    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),
    /// The durable log could not be written.
    #[error("storage error: {0}")]
    Storage(#[from] TierError),
}

/// A sink for session change events.
#[async_trait]
pub trait EventEmitter: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Delivers one event.
    async fn emit(&self, event: &SessionEvent) -> Result<(), EmitError>;
}

/// Forwards each event to every configured sink concurrently.
///
/// A failing or stalled sink is logged and never delays or prevents
/// delivery to the others.
pub struct FanOutEmitter {
    emitters: Vec<Arc<dyn EventEmitter>>,
}

impl FanOutEmitter {
    /// Builds a fan-out over `emitters`.
    pub fn new(emitters: Vec<Arc<dyn EventEmitter>>) -> Self {
        Self { emitters }
    }

    /// Number of sinks.
    pub fn len(&self) -> usize {
        self.emitters.len()
    }

    /// Whether there are no sinks.
    pub fn is_empty(&self) -> bool {
        self.emitters.is_empty()
    }

    /// Hands back the sinks, e.g. to give each its own [`EventDispatcher`]
    /// worker.
    pub fn into_sinks(self) -> Vec<Arc<dyn EventEmitter>> {
        self.emitters
    }

    /// Delivers `event` to every sink and returns how many accepted it.
    pub async fn deliver(&self, event: &SessionEvent) -> usize {
        let outcomes = join_all(
            self.emitters
                .iter()
                .map(|emitter| async move { (emitter, emitter.emit(event).await) }),
        )
        .await;

        let mut delivered = 0;
        for (emitter, outcome) in outcomes {
            match outcome {
                Ok(()) => delivered += 1,
                Err(e) => warn!(
                    emitter = emitter.name(),
                    session_id = %event.session_id,
                    event_type = %event.event_type,
                    error = %e,
                    "Event emitter failed"
                ),
            }
        }
        delivered
    }
}

#[async_trait]
impl EventEmitter for FanOutEmitter {
    fn name(&self) -> &str {
        "fan-out"
    }

    async fn emit(&self, event: &SessionEvent) -> Result<(), EmitError> {
        self.deliver(event).await;
        Ok(())
    }
}

/// Appends events to the durable tier's event table.
pub struct DurableLogEmitter {
    durable: Arc<dyn DurableTier>,
}

impl DurableLogEmitter {
    /// Logs through `durable`.
    pub fn new(durable: Arc<dyn DurableTier>) -> Self {
        Self { durable }
    }
}

#[async_trait]
impl EventEmitter for DurableLogEmitter {
    fn name(&self) -> &str {
        "durable-log"
    }

    async fn emit(&self, event: &SessionEvent) -> Result<(), EmitError> {
        self.durable.append_event(event).await?;
        Ok(())
    }
}

struct SinkWorker {
    name: String,
    tx: mpsc::UnboundedSender<SessionEvent>,
    handle: JoinHandle<()>,
}

impl SinkWorker {
    fn spawn(emitter: Arc<dyn EventEmitter>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<SessionEvent>();
        let name = emitter.name().to_string();

        let handle = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let Err(e) = emitter.emit(&event).await {
                    warn!(
                        emitter = emitter.name(),
                        session_id = %event.session_id,
                        error = %e,
                        "Event delivery failed"
                    );
                }
            }
            debug!(emitter = emitter.name(), "Event worker drained");
        });

        Self { name, tx, handle }
    }
}

/// Runs emitters on background tasks so callers never wait on delivery.
///
/// Each sink gets its own unbounded queue and worker, so a stalled sink
/// only backs up its own queue. Delivery is in order per sink and at most
/// once. Nothing is persisted: events still queued when the process dies
/// are lost.
pub struct EventDispatcher {
    workers: Mutex<Option<Vec<SinkWorker>>>,
}

impl EventDispatcher {
    /// Spawns a single delivery task. Must be called inside a Tokio runtime.
    pub fn spawn(emitter: Arc<dyn EventEmitter>) -> Self {
        Self::spawn_each(vec![emitter])
    }

    /// Spawns one delivery task per sink.
    pub fn spawn_each(emitters: Vec<Arc<dyn EventEmitter>>) -> Self {
        let workers = emitters.into_iter().map(SinkWorker::spawn).collect();
        Self {
            workers: Mutex::new(Some(workers)),
        }
    }

    /// Queues an event for every sink. Never blocks; events sent after
    /// shutdown are dropped.
    pub fn dispatch(&self, event: SessionEvent) {
        let guard = self.workers.lock();
        let Some(workers) = guard.as_ref() else {
            debug!(session_id = %event.session_id, "Dispatcher shut down, dropping event");
            return;
        };
        for worker in workers {
            if worker.tx.send(event.clone()).is_err() {
                warn!(emitter = %worker.name, "Event worker is gone, dropping event");
            }
        }
    }

    /// Stops accepting events and waits up to `timeout` for every queue to
    /// drain. Workers still busy at the deadline are aborted.
    pub async fn shutdown(&self, timeout: Duration) {
        let workers = self.workers.lock().take();
        let Some(workers) = workers else {
            return;
        };
        // Dropping the senders lets every worker finish its queue.
        let pending: Vec<(String, JoinHandle<()>)> = workers
            .into_iter()
            .map(|worker| (worker.name, worker.handle))
            .collect();

        let deadline = Instant::now() + timeout;
        for (name, mut handle) in pending {
            if tokio::time::timeout_at(deadline, &mut handle).await.is_err() {
                warn!(
                    emitter = %name,
                    timeout_ms = timeout.as_millis() as u64,
                    "Event worker did not drain in time, aborting"
                );
                handle.abort();
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use steward_core::{SessionEventType, SessionState};

    struct Counting {
        name: &'static str,
        seen: AtomicUsize,
        fail: bool,
    }

    impl Counting {
        fn new(name: &'static str, fail: bool) -> Arc<Self> {
            Arc::new(Self {
                name,
                seen: AtomicUsize::new(0),
                fail,
            })
        }
    }

    #[async_trait]
    impl EventEmitter for Counting {
        fn name(&self) -> &str {
            self.name
        }

        async fn emit(&self, _event: &SessionEvent) -> Result<(), EmitError> {
            self.seen.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(EmitError::Transport("broker down".into()))
            } else {
                Ok(())
            }
        }
    }

    struct Hanging;

    #[async_trait]
    impl EventEmitter for Hanging {
        fn name(&self) -> &str {
            "hanging"
        }

        async fn emit(&self, _event: &SessionEvent) -> Result<(), EmitError> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    fn event() -> SessionEvent {
        SessionEvent::written(
            "sess-1",
            SessionEventType::Created,
            &SessionState::new(serde_json::json!({"step": "greet"})),
            None,
        )
    }

    #[tokio::test]
    async fn failing_sink_does_not_block_the_next() {
        let broken = Counting::new("broken", true);
        let healthy = Counting::new("healthy", false);
        let sinks: Vec<Arc<dyn EventEmitter>> = vec![broken.clone(), healthy.clone()];
        let fan_out = FanOutEmitter::new(sinks);

        assert_eq!(fan_out.deliver(&event()).await, 1);
        assert!(fan_out.emit(&event()).await.is_ok());
        assert_eq!(broken.seen.load(Ordering::SeqCst), 2);
        assert_eq!(healthy.seen.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn stalled_sink_does_not_delay_the_next() {
        let healthy = Counting::new("healthy", false);
        let sinks: Vec<Arc<dyn EventEmitter>> = vec![Arc::new(Hanging), healthy.clone()];
        let fan_out = FanOutEmitter::new(sinks);

        let outcome = tokio::time::timeout(Duration::from_millis(100), fan_out.deliver(&event())).await;
        assert!(outcome.is_err());
        assert_eq!(healthy.seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn each_sink_drains_its_own_queue() {
        let healthy = Counting::new("healthy", false);
        let sinks: Vec<Arc<dyn EventEmitter>> = vec![Arc::new(Hanging), healthy.clone()];
        let dispatcher = EventDispatcher::spawn_each(sinks);
        for _ in 0..3 {
            dispatcher.dispatch(event());
        }

        dispatcher.shutdown(Duration::from_millis(200)).await;
        assert_eq!(healthy.seen.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn empty_fan_out_delivers_nowhere() {
        let fan_out = FanOutEmitter::new(Vec::new());
        assert!(fan_out.is_empty());
        assert_eq!(fan_out.deliver(&event()).await, 0);
    }

    #[tokio::test]
    async fn dispatcher_drains_on_shutdown() {
        let sink = Counting::new("sink", false);
        let dispatcher = EventDispatcher::spawn(sink.clone());
        for _ in 0..5 {
            dispatcher.dispatch(event());
        }
        dispatcher.shutdown(Duration::from_secs(5)).await;
        assert_eq!(sink.seen.load(Ordering::SeqCst), 5);

        // Dropped silently after shutdown.
        dispatcher.dispatch(event());
        dispatcher.shutdown(Duration::from_secs(5)).await;
        assert_eq!(sink.seen.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn durable_log_emitter_writes_events() {
        let db = Arc::new(crate::durable::SqliteDurableTier::open(":memory:").await.unwrap());
        let emitter = DurableLogEmitter::new(db.clone());
        emitter.emit(&event()).await.unwrap();

        let events = db.events_for("sess-1").await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, SessionEventType::Created);
    }

    #[tokio::test]
    async fn durable_log_emitter_surfaces_storage_errors() {
        let db = Arc::new(crate::durable::SqliteDurableTier::open(":memory:").await.unwrap());
        db.close().await.unwrap();
        let emitter = DurableLogEmitter::new(db);
        assert!(matches!(
            emitter.emit(&event()).await,
            Err(EmitError::Storage(TierError::Unavailable(_)))
        ));
    }
}
