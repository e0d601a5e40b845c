//! Fleet snapshot reconciliation.
//!
//! Each broadcast from the hub carries the full fleet, split into active
//! and queued devices. The reconciler diffs that against its local entity
//! table keyed by device id: evict what disappeared, then create or update
//! in broadcast order. Renderer handles survive updates, so a device that
//! merely changed state keeps its on-screen identity.

use std::collections::{HashMap, HashSet};

use tracing::{debug, trace};

use foc_core::{DeviceId, DeviceSnapshot, DeviceView, FleetBatch};

/// Presentation backend. The engine never draws; it tells the renderer
/// what exists, what changed, and what is gone.
pub trait Renderer {
    /// Opaque per-device token the renderer hands back on create and gets
    /// returned on every update and on destroy.
    type Handle;

    fn create(&mut self, snapshot: &DeviceSnapshot, view: &DeviceView) -> Self::Handle;
    fn update(&mut self, handle: &mut Self::Handle, snapshot: &DeviceSnapshot, view: &DeviceView);
    fn destroy(&mut self, handle: Self::Handle);
    /// Queued devices are replaced wholesale, no per-entry diffing.
    fn set_queue(&mut self, queued: &[DeviceSnapshot]);
}

struct LocalEntity<H> {
    snapshot: DeviceSnapshot,
    handle: H,
}

/// Outcome of feeding one inbound frame to [`Reconciler::ingest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ingest {
    /// Frame was not a fleet broadcast (command ack, malformed, etc).
    Ignored,
    Applied {
        created: usize,
        updated: usize,
        destroyed: usize,
    },
}

pub struct Reconciler<R: Renderer> {
    renderer: R,
    entities: HashMap<DeviceId, LocalEntity<R::Handle>>,
    order: Vec<DeviceId>,
    queued: Vec<DeviceSnapshot>,
}

impl<R: Renderer> Reconciler<R> {
    pub fn new(renderer: R) -> Self {
        Self {
            renderer,
            entities: HashMap::new(),
            order: Vec::new(),
            queued: Vec::new(),
        }
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    pub fn renderer_mut(&mut self) -> &mut R {
        &mut self.renderer
    }

    pub fn active_count(&self) -> usize {
        self.entities.len()
    }

    pub fn queued_count(&self) -> usize {
        self.queued.len()
    }

    /// Latest accepted snapshot for an active device, if any.
    pub fn snapshot(&self, id: &DeviceId) -> Option<&DeviceSnapshot> {
        self.entities.get(id).map(|entity| &entity.snapshot)
    }

    pub fn queued_snapshot(&self, id: &DeviceId) -> Option<&DeviceSnapshot> {
        self.queued.iter().find(|snapshot| &snapshot.id == id)
    }

    /// Active device ids in last-broadcast order.
    pub fn active_ids(&self) -> impl Iterator<Item = &DeviceId> {
        self.order.iter()
    }

    pub fn queued(&self) -> &[DeviceSnapshot] {
        &self.queued
    }

    /// Feeds one raw inbound frame. Anything that is not a fleet broadcast
    /// is ignored without touching local state.
    pub fn ingest(&mut self, raw: &str) -> Ingest {
        let Some(batch) = FleetBatch::parse(raw) else {
            trace!("ignoring non-broadcast frame");
            return Ingest::Ignored;
        };
        self.apply(batch)
    }

    pub fn apply(&mut self, batch: FleetBatch) -> Ingest {
        // evict first so a device moving active -> queued frees its handle
        // before the queue list is redrawn
        let incoming: HashSet<&DeviceId> =
            batch.active.iter().map(|snapshot| &snapshot.id).collect();
        let stale: Vec<DeviceId> = self
            .entities
            .keys()
            .filter(|id| !incoming.contains(id))
            .cloned()
            .collect();
        let destroyed = stale.len();
        for id in stale {
            if let Some(entity) = self.entities.remove(&id) {
                debug!(device = %id, "device left the active fleet");
                self.renderer.destroy(entity.handle);
            }
        }

        let mut created = 0;
        let mut updated = 0;
        let mut order = Vec::with_capacity(batch.active.len());
        for snapshot in batch.active {
            order.push(snapshot.id.clone());
            let view = DeviceView::from_snapshot(&snapshot);
            match self.entities.get_mut(&snapshot.id) {
                Some(entity) => {
                    self.renderer.update(&mut entity.handle, &snapshot, &view);
                    entity.snapshot = snapshot;
                    updated += 1;
                }
                None => {
                    debug!(device = %snapshot.id, "device joined the active fleet");
                    let handle = self.renderer.create(&snapshot, &view);
                    self.entities
                        .insert(snapshot.id.clone(), LocalEntity { snapshot, handle });
                    created += 1;
                }
            }
        }
        self.order = order;

        self.renderer.set_queue(&batch.queued);
        self.queued = batch.queued;

        Ingest::Applied {
            created,
            updated,
            destroyed,
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{Event, TestRenderer};
    use super::*;
    use foc_core::DeviceStatus;

    fn snapshot(id: u64) -> DeviceSnapshot {
        DeviceSnapshot {
            id: DeviceId::from(id),
            name: format!("Node {id}"),
            counter: 0,
            status: DeviceStatus::Online,
            is_power_save: false,
            wake_up_pending: false,
            device_role: None,
            reporting_interval: None,
            debug_mode: false,
            analog_readings: Vec::new(),
            ping_response: None,
        }
    }

    fn batch(active: Vec<DeviceSnapshot>, queued: Vec<DeviceSnapshot>) -> FleetBatch {
        FleetBatch { active, queued }
    }

    #[test]
    fn handles_are_stable_across_updates() {
        let mut reconciler = Reconciler::new(TestRenderer::default());

        reconciler.apply(batch(vec![snapshot(1)], vec![]));
        let mut changed = snapshot(1);
        changed.is_power_save = true;
        reconciler.apply(batch(vec![changed], vec![]));

        let events = &reconciler.renderer().events;
        assert_eq!(
            events,
            &vec![
                Event::Created(0),
                Event::QueueSet(0),
                Event::Updated(0),
                Event::QueueSet(0),
            ]
        );
        // state change alone never destroys the entity
        assert_eq!(reconciler.active_count(), 1);
    }

    #[test]
    fn absent_devices_are_evicted() {
        let mut reconciler = Reconciler::new(TestRenderer::default());
        reconciler.apply(batch(vec![snapshot(1), snapshot(2)], vec![]));
        let outcome = reconciler.apply(batch(vec![snapshot(2)], vec![]));

        assert_eq!(
            outcome,
            Ingest::Applied {
                created: 0,
                updated: 1,
                destroyed: 1
            }
        );
        assert!(reconciler.snapshot(&DeviceId::from(1u64)).is_none());
        assert!(reconciler.snapshot(&DeviceId::from(2u64)).is_some());
        assert!(reconciler
            .renderer()
            .events
            .contains(&Event::Destroyed(0)));
    }

    #[test]
    fn device_moving_to_queue_loses_its_handle() {
        let mut reconciler = Reconciler::new(TestRenderer::default());
        reconciler.apply(batch(vec![snapshot(3)], vec![]));
        reconciler.apply(batch(vec![], vec![snapshot(3)]));

        assert_eq!(reconciler.active_count(), 0);
        assert_eq!(reconciler.queued_count(), 1);
        assert!(reconciler
            .queued_snapshot(&DeviceId::from(3u64))
            .is_some());
        let events = &reconciler.renderer().events;
        assert!(events.contains(&Event::Destroyed(0)));
        assert!(events.contains(&Event::QueueSet(1)));
    }

    #[test]
    fn non_broadcast_frames_leave_state_untouched() {
        let mut reconciler = Reconciler::new(TestRenderer::default());
        reconciler.apply(batch(vec![snapshot(1)], vec![]));

        assert_eq!(reconciler.ingest(r#"{"ok":true}"#), Ingest::Ignored);
        assert_eq!(reconciler.ingest("not json"), Ingest::Ignored);
        assert_eq!(reconciler.active_count(), 1);
        // no renderer traffic for ignored frames
        assert_eq!(reconciler.renderer().events.len(), 2);
    }

    #[test]
    fn broadcast_order_is_preserved() {
        let mut reconciler = Reconciler::new(TestRenderer::default());
        reconciler.apply(batch(vec![snapshot(9), snapshot(2), snapshot(5)], vec![]));

        let ids: Vec<String> = reconciler.active_ids().map(|id| id.to_string()).collect();
        assert_eq!(ids, vec!["9", "2", "5"]);
    }

    #[test]
    fn partial_key_broadcasts_still_apply() {
        let mut reconciler = Reconciler::new(TestRenderer::default());
        let outcome = reconciler.ingest(r#"{"active":[{"id":1,"name":"A"}]}"#);

        assert_eq!(
            outcome,
            Ingest::Applied {
                created: 1,
                updated: 0,
                destroyed: 0
            }
        );
        assert_eq!(reconciler.queued_count(), 0);
    }
}
