//! Consumer loop: bridges the broker subscription to the fan-out, with
//! manual offset management for at-least-once semantics (spec §4.4).

mod broker;

pub use broker::{Broker, BrokerRecord, KafkaBroker};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::domain::UserEvent;
use crate::error::AggregatorError;
use crate::fanout::EventBus;

/// Whether the broker offset is committed immediately after publish, or
/// deferred until the event has actually been durably flushed.
///
/// This is the open question in design §9 ("offset-vs-flush ordering")
/// made a runtime choice instead of a silent default. `Immediate` keeps
/// the small uncommitted window but can drop an event on a crash between
/// publish and the next flush; `DeferUntilFlush` is not implemented by
/// this loop (it would require per-event store writes or a
/// flush-acknowledgement channel back into the loop) and is reserved for
/// a future iteration — selecting it today is rejected at construction
/// time with [`AggregatorError::Configuration`] rather than silently
/// behaving like `Immediate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitPolicy {
    Immediate,
    DeferUntilFlush,
}

pub struct ConsumerLoop {
    broker: Arc<dyn Broker>,
    fanout: Arc<EventBus>,
    commit_policy: CommitPolicy,
    cancel: CancellationToken,
    running: Arc<AtomicBool>,
    handle: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl ConsumerLoop {
    pub fn new(broker: Arc<dyn Broker>, fanout: Arc<EventBus>) -> Self {
        Self::with_commit_policy(broker, fanout, CommitPolicy::Immediate)
            .expect("CommitPolicy::Immediate is always valid")
    }

    /// Construct a loop with an explicit commit policy. Fails fast if the
    /// policy isn't implemented yet, rather than spawning a poller that
    /// silently exits (see [`CommitPolicy::DeferUntilFlush`]).
    pub fn with_commit_policy(
        broker: Arc<dyn Broker>,
        fanout: Arc<EventBus>,
        commit_policy: CommitPolicy,
    ) -> Result<Self, AggregatorError> {
        if commit_policy == CommitPolicy::DeferUntilFlush {
            return Err(AggregatorError::Configuration(
                "CommitPolicy::DeferUntilFlush is not yet implemented".to_string(),
            ));
        }
        Ok(Self {
            broker,
            fanout,
            commit_policy,
            cancel: CancellationToken::new(),
            running: Arc::new(AtomicBool::new(false)),
            handle: std::sync::Mutex::new(None),
        })
    }

    /// Launch the dedicated poller task bound to the loop's cancellation
    /// token.
    pub fn start(&self) {
        let broker = self.broker.clone();
        let fanout = self.fanout.clone();
        let cancel = self.cancel.clone();
        let running = self.running.clone();
        let commit_policy = self.commit_policy;

        running.store(true, Ordering::SeqCst);
        let task = tokio::spawn(async move {
            poll_loop(broker, fanout, cancel, commit_policy).await;
            running.store(false, Ordering::SeqCst);
        });
        *self.handle.lock().unwrap() = Some(task);
    }

    /// Whether the poller task is currently running, for the health
    /// snapshot (cleared both on graceful `stop` and on an early exit
    /// such as a fatal broker error).
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Signal cancellation and wait up to 30s for the poller task to
    /// finish. Idempotent.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let handle = self.handle.lock().unwrap().take();
        if let Some(handle) = handle {
            if tokio::time::timeout(Duration::from_secs(30), handle)
                .await
                .is_err()
            {
                warn!("poller task did not stop within 30s");
            }
        }
        self.running.store(false, Ordering::SeqCst);
    }
}

async fn poll_loop(
    broker: Arc<dyn Broker>,
    fanout: Arc<EventBus>,
    cancel: CancellationToken,
    commit_policy: CommitPolicy,
) {
    debug_assert_ne!(commit_policy, CommitPolicy::DeferUntilFlush);

    loop {
        let record = tokio::select! {
            _ = cancel.cancelled() => {
                info!("cancellation received, exiting poll loop");
                return;
            }
            result = broker.poll() => result,
        };

        match record {
            Ok(None) => continue,
            Ok(Some(record)) => {
                if let Err(e) = process_record(&record, &fanout).await {
                    warn!(error = %e, "skipping unprocessable record");
                }
                // A permanently malformed record must not block the
                // partition: commit regardless of validation outcome.
                if let Err(e) = broker.commit(&record).await {
                    warn!(error = %e, "failed to commit offset");
                }
            }
            Err(AggregatorError::FatalBrokerError(msg)) => {
                error!(error = %msg, "fatal broker error, exiting poll loop");
                fanout
                    .publish_error(&AggregatorError::FatalBrokerError(msg))
                    .await;
                return;
            }
            Err(AggregatorError::TransientConsumeError(msg)) => {
                warn!(error = %msg, "transient consume error, continuing");
            }
            Err(other) => {
                error!(error = %other, "unexpected poll error, backing off 5s");
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(Duration::from_secs(5)) => {}
                }
            }
        }
    }
}

/// Deserialize, validate, and publish one record. Returns an error only
/// to be logged by the caller — the offset is committed either way.
async fn process_record(record: &BrokerRecord, fanout: &EventBus) -> Result<(), AggregatorError> {
    let event = UserEvent::from_json_slice(&record.payload)?;
    fanout.publish(&event).await;
    Ok(())
}
