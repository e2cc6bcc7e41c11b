//! Telemetry fan-out: subscribers register against the shared drone
//! registry and receive both periodic snapshots and immediate
//! significant-event notifications.
//!
//! Each subscriber owns a small bounded queue rather than sharing one
//! broadcast channel, so a slow WebSocket client only ever falls behind
//! its own mailbox. On overflow the oldest *snapshot* in the queue is
//! evicted to make room; events are never dropped, matching the ring
//! buffer discipline already used for safety violations in
//! `fleet_core::safety::ViolationRingBuffer`.

use crate::supervisor::{DroneEvent, DroneSupervisor};
use dashmap::DashMap;
use fleet_core::DroneId;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, Notify};
use tracing::debug;

const DEFAULT_QUEUE_CAPACITY: usize = 32;

#[derive(Debug, Clone, serde::Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TelemetryMessage {
    Snapshot {
        drone_id: DroneId,
        status: crate::supervisor::DroneStatus,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
    Event {
        drone_id: DroneId,
        kind: &'static str,
        payload: serde_json::Value,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl TelemetryMessage {
    fn drone_id(&self) -> &DroneId {
        match self {
            TelemetryMessage::Snapshot { drone_id, .. } => drone_id,
            TelemetryMessage::Event { drone_id, .. } => drone_id,
        }
    }

    fn is_snapshot(&self) -> bool {
        matches!(self, TelemetryMessage::Snapshot { .. })
    }
}

struct Subscriber {
    filter: Option<DroneId>,
    queue: Mutex<VecDeque<TelemetryMessage>>,
    notify: Notify,
    closed: AtomicBool,
    capacity: usize,
}

impl Subscriber {
    fn matches(&self, drone_id: &DroneId) -> bool {
        match &self.filter {
            Some(wanted) => wanted == drone_id,
            None => true,
        }
    }

    async fn push(&self, msg: TelemetryMessage) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        let mut queue = self.queue.lock().await;
        if queue.len() >= self.capacity {
            if let Some(pos) = queue.iter().position(TelemetryMessage::is_snapshot) {
                queue.remove(pos);
            } else if msg.is_snapshot() {
                // Queue is saturated with undelivered events; drop the
                // incoming snapshot rather than evicting an event.
                return;
            }
        }
        queue.push_back(msg);
        drop(queue);
        self.notify.notify_one();
    }
}

/// Handle held by a consumer (a WebSocket connection, typically). Dropping
/// it leaks the subscriber entry until the next publish notices `closed`;
/// callers that can detect disconnect should call
/// [`TelemetryBroadcaster::unsubscribe`] explicitly.
pub struct SubscriberHandle {
    id: u64,
    subscriber: Arc<Subscriber>,
    broadcaster: Arc<TelemetryBroadcaster>,
}

impl SubscriberHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Waits for and returns the next message, or `None` once the
    /// subscription has been cancelled.
    pub async fn recv(&self) -> Option<TelemetryMessage> {
        loop {
            {
                let mut queue = self.subscriber.queue.lock().await;
                if let Some(msg) = queue.pop_front() {
                    return Some(msg);
                }
            }
            if self.subscriber.closed.load(Ordering::SeqCst) {
                return None;
            }
            self.subscriber.notify.notified().await;
        }
    }
}

impl Drop for SubscriberHandle {
    fn drop(&mut self) {
        self.broadcaster.unsubscribe(self.id);
    }
}

/// Publishes periodic snapshots of every registered drone and relays each
/// supervisor's significant events (state transitions, safety violations,
/// task completions) to matching subscribers.
pub struct TelemetryBroadcaster {
    drones: Arc<DashMap<DroneId, Arc<DroneSupervisor>>>,
    subscribers: DashMap<u64, Arc<Subscriber>>,
    next_id: AtomicU64,
    interval: Duration,
}

impl TelemetryBroadcaster {
    pub fn new(drones: Arc<DashMap<DroneId, Arc<DroneSupervisor>>>, interval: Duration) -> Arc<Self> {
        Arc::new(Self {
            drones,
            subscribers: DashMap::new(),
            next_id: AtomicU64::new(1),
            interval,
        })
    }

    /// Registers a new subscriber. `filter` of `None` means "every drone"
    /// (the wildcard subscription used by the system-wide WebSocket feed).
    pub fn subscribe(self: &Arc<Self>, filter: Option<DroneId>) -> SubscriberHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let subscriber = Arc::new(Subscriber {
            filter,
            queue: Mutex::new(VecDeque::with_capacity(DEFAULT_QUEUE_CAPACITY)),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            capacity: DEFAULT_QUEUE_CAPACITY,
        });
        self.subscribers.insert(id, Arc::clone(&subscriber));
        SubscriberHandle {
            id,
            subscriber,
            broadcaster: Arc::clone(self),
        }
    }

    pub fn unsubscribe(&self, id: u64) {
        if let Some((_, subscriber)) = self.subscribers.remove(&id) {
            subscriber.closed.store(true, Ordering::SeqCst);
            subscriber.notify.notify_one();
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    async fn publish(&self, msg: TelemetryMessage) {
        let drone_id = msg.drone_id().clone();
        for entry in self.subscribers.iter() {
            if entry.value().matches(&drone_id) {
                entry.value().push(msg.clone()).await;
            }
        }
    }

    async fn publish_event(&self, drone_id: DroneId, kind: &'static str, payload: serde_json::Value) {
        self.publish(TelemetryMessage::Event {
            drone_id,
            kind,
            payload,
            timestamp: chrono::Utc::now(),
        })
        .await;
    }

    async fn tick(&self) {
        for entry in self.drones.iter() {
            let drone_id = entry.key().clone();
            let status = entry.value().status().await;
            self.publish(TelemetryMessage::Snapshot {
                drone_id,
                status,
                timestamp: chrono::Utc::now(),
            })
            .await;
        }
    }

    /// Forwards one drone's significant events into the broadcaster for
    /// the lifetime of the process. Spawned once per registered drone at
    /// startup; drones are not added or removed after that point.
    async fn forward_events(self: Arc<Self>, drone_id: DroneId, supervisor: Arc<DroneSupervisor>) {
        let mut events = supervisor.subscribe();
        loop {
            match events.recv().await {
                Ok(DroneEvent::StateChanged { connection, flight, .. }) => {
                    self.publish_event(
                        drone_id.clone(),
                        "state_changed",
                        serde_json::json!({"connection": connection, "flight": flight}),
                    )
                    .await;
                }
                Ok(DroneEvent::SafetyViolation { violation, .. }) => {
                    self.publish_event(
                        drone_id.clone(),
                        "safety_violation",
                        serde_json::to_value(&violation).unwrap_or_default(),
                    )
                    .await;
                }
                Ok(DroneEvent::TaskCompleted { task_id, status, .. }) => {
                    self.publish_event(
                        drone_id.clone(),
                        "task_completed",
                        serde_json::json!({"task_id": task_id, "status": status}),
                    )
                    .await;
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(%drone_id, skipped, "telemetry event relay lagged behind supervisor broadcast");
                    continue;
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
            }
        }
    }

    /// Drives the periodic snapshot loop and the per-drone event relays
    /// until `shutdown` fires.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        for entry in self.drones.iter() {
            let drone_id = entry.key().clone();
            let supervisor = Arc::clone(entry.value());
            let broadcaster = Arc::clone(&self);
            tokio::spawn(broadcaster.forward_events(drone_id, supervisor));
        }

        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{SimulatedDroneAdapter, SimulatedDroneAdapterConfig};
    use fleet_core::config_types::DroneSettings;
    use fleet_core::{Pose, SafetyConfig};

    fn registry_with_one_drone() -> (Arc<DashMap<DroneId, Arc<DroneSupervisor>>>, DroneId) {
        let drones: Arc<DashMap<DroneId, Arc<DroneSupervisor>>> = Arc::new(DashMap::new());
        let id = DroneId::parse("D1").unwrap();
        let supervisor = DroneSupervisor::new(
            id.clone(),
            Box::new(SimulatedDroneAdapter::new(SimulatedDroneAdapterConfig::default())),
            false,
            false,
            SafetyConfig::default(),
            DroneSettings::default(),
            Pose::default(),
        );
        drones.insert(id.clone(), supervisor);
        (drones, id)
    }

    #[tokio::test]
    async fn wildcard_subscriber_receives_snapshot_for_every_drone() {
        let (drones, id) = registry_with_one_drone();
        let broadcaster = TelemetryBroadcaster::new(drones, Duration::from_millis(10));
        let handle = broadcaster.subscribe(None);
        broadcaster.tick().await;
        let msg = handle.recv().await.unwrap();
        assert_eq!(msg.drone_id(), &id);
        assert!(msg.is_snapshot());
    }

    #[tokio::test]
    async fn filtered_subscriber_ignores_other_drones() {
        let (drones, _id) = registry_with_one_drone();
        let broadcaster = TelemetryBroadcaster::new(drones, Duration::from_millis(10));
        let handle = broadcaster.subscribe(Some(DroneId::parse("D2").unwrap()));
        broadcaster.tick().await;
        broadcaster.publish_event(DroneId::parse("D2").unwrap(), "state_changed", serde_json::json!({})).await;
        let msg = handle.recv().await.unwrap();
        assert_eq!(msg.drone_id().as_str(), "D2");
    }

    #[tokio::test]
    async fn overflow_drops_oldest_snapshot_not_events() {
        let (drones, id) = registry_with_one_drone();
        let broadcaster = TelemetryBroadcaster::new(drones, Duration::from_secs(60));
        let handle = broadcaster.subscribe(None);

        for _ in 0..(DEFAULT_QUEUE_CAPACITY + 5) {
            broadcaster.tick().await;
        }
        broadcaster
            .publish_event(id.clone(), "state_changed", serde_json::json!({"marker": true}))
            .await;

        let mut saw_event = false;
        while let Ok(Some(msg)) = tokio::time::timeout(Duration::from_millis(50), handle.recv()).await {
            if matches!(msg, TelemetryMessage::Event { .. }) {
                saw_event = true;
            }
        }
        assert!(saw_event, "the event must survive queue overflow even though snapshots were dropped");
    }

    #[tokio::test]
    async fn unsubscribe_ends_recv() {
        let (drones, _id) = registry_with_one_drone();
        let broadcaster = TelemetryBroadcaster::new(drones, Duration::from_millis(10));
        let handle = broadcaster.subscribe(None);
        broadcaster.unsubscribe(handle.id());
        assert!(handle.recv().await.is_none());
    }
}
