// ── Partitioned dispatch ──
//
// N workers share one graph. Events are routed by a hash of their identity
// so every notification for one object lands on the same worker and is
// processed in delivery order without per-object locking.

use std::hash::{DefaultHasher, Hash, Hasher};

use shadowgraph_api::RawChangeEvent;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{Coordinator, CoordinatorState};
use crate::error::CoreError;
use crate::model::{ChangeEvent, ObjectId};

/// Worker pool in front of a [`Coordinator`].
pub struct PartitionedDispatcher {
    senders: Vec<mpsc::Sender<ChangeEvent>>,
    handles: Vec<JoinHandle<()>>,
    coordinator: Coordinator,
}

impl PartitionedDispatcher {
    /// Spawn one worker per configured partition.
    pub fn spawn(coordinator: &Coordinator, cancel: &CancellationToken) -> Self {
        let config = coordinator.config();
        let mut senders = Vec::with_capacity(config.partitions);
        let mut handles = Vec::with_capacity(config.partitions);

        for partition in 0..config.partitions {
            let (tx, rx) = mpsc::channel(config.queue_depth);
            senders.push(tx);
            handles.push(tokio::spawn(worker_task(
                partition,
                coordinator.clone(),
                rx,
                cancel.clone(),
            )));
        }

        Self {
            senders,
            handles,
            coordinator: coordinator.clone(),
        }
    }

    pub fn partitions(&self) -> usize {
        self.senders.len()
    }

    /// Stable partition index for an identity.
    pub fn partition_for(&self, identity: &ObjectId) -> usize {
        partition_index(identity, self.senders.len())
    }

    /// Queue an event on its partition. Waits when the queue is full.
    pub async fn dispatch(&self, event: ChangeEvent) -> Result<(), CoreError> {
        let partition = self.partition_for(&event.identity);
        let sender = self.senders.get(partition).ok_or(CoreError::QueueClosed)?;
        sender.send(event).await.map_err(|_| CoreError::QueueClosed)
    }

    /// Validate and dispatch raw feed events until cancelled, the feed
    /// closes, or the coordinator fails. Malformed events are dropped.
    pub async fn ingest(&self, mut events: mpsc::Receiver<RawChangeEvent>, cancel: &CancellationToken) {
        let mut state = self.coordinator.subscribe_state();

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                // The read guard from `wait_for` must not outlive this arm.
                () = async { let _ = state.wait_for(|s| *s == CoordinatorState::Failed).await; } => break,
                raw = events.recv() => {
                    let Some(raw) = raw else {
                        debug!("change feed closed");
                        break;
                    };
                    let event = match ChangeEvent::try_from(raw) {
                        Ok(event) => event,
                        Err(e) => {
                            warn!(error = %e, "dropping malformed change event");
                            continue;
                        }
                    };
                    if self.dispatch(event).await.is_err() {
                        break;
                    }
                }
            }
        }
    }

    /// Close every queue and wait for the workers to drain.
    pub async fn join(self) {
        drop(self.senders);
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

fn partition_index(identity: &ObjectId, partitions: usize) -> usize {
    if partitions <= 1 {
        return 0;
    }
    let mut hasher = DefaultHasher::new();
    identity.to_string().hash(&mut hasher);
    let modulus = u64::try_from(partitions).unwrap_or(u64::MAX);
    usize::try_from(hasher.finish() % modulus).unwrap_or(0)
}

async fn worker_task(
    partition: usize,
    coordinator: Coordinator,
    mut rx: mpsc::Receiver<ChangeEvent>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            event = rx.recv() => {
                let Some(event) = event else { break };
                if let Err(e) = coordinator.process(event).await {
                    warn!(partition, error = %e, "partition stopped");
                    break;
                }
            }
        }
    }
    debug!(partition, "partition worker exited");
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;

    #[test]
    fn partitioning_is_stable_and_in_range() {
        let id = ObjectId::Uuid(Uuid::new_v4());
        let first = partition_index(&id, 8);
        assert!(first < 8);
        assert!((0..10).all(|_| partition_index(&id, 8) == first));
    }

    #[test]
    fn single_partition_takes_everything() {
        let id = ObjectId::Name("default-domain:admin:blue".into());
        assert_eq!(partition_index(&id, 1), 0);
        assert_eq!(partition_index(&id, 0), 0);
    }

    #[test]
    fn identities_spread_across_partitions() {
        let used: std::collections::BTreeSet<usize> = (0..64)
            .map(|i| partition_index(&ObjectId::Name(format!("vn-{i}")), 4))
            .collect();
        assert!(used.len() > 1);
    }
}
