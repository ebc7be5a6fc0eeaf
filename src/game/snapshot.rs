//! Initial sync snapshots and replication stats

use serde::Serialize;

use super::lifecycle::{EntityLifecycle, LifecycleEvent};
use super::world::{ReplicationEvent, World};

/// Builds the full-state sync sent to a newly joined observer
pub struct SnapshotBuilder;

impl SnapshotBuilder {
    /// One Spawned event per Active entity, in id order
    pub fn initial_sync(world: &World) -> Vec<ReplicationEvent> {
        world
            .iter()
            .filter(|e| e.is_active())
            .map(|e| {
                ReplicationEvent::Lifecycle(EntityLifecycle {
                    entity_id: e.id,
                    event: LifecycleEvent::Spawned {
                        kind: e.kind(),
                        snapshot: e.snapshot(),
                    },
                })
            })
            .collect()
    }
}

/// Replication volume counters for the health route
#[derive(Debug, Default, Clone, Serialize)]
pub struct ReplicationStats {
    pub batches: u64,
    pub events: u64,
    pub avg_events_per_batch: f32,
    pub snapshots_sent: u64,
    /// Snapshots resent to observers that fell behind
    pub resyncs: u64,
}

impl ReplicationStats {
    pub fn record_batch(&mut self, event_count: usize) {
        self.batches += 1;
        self.events += event_count as u64;

        // Running average
        let n = self.batches as f32;
        self.avg_events_per_batch =
            self.avg_events_per_batch * ((n - 1.0) / n) + (event_count as f32 / n);
    }

    pub fn record_snapshot(&mut self) {
        self.snapshots_sent += 1;
    }

    pub fn record_resync(&mut self) {
        self.resyncs += 1;
    }
}
