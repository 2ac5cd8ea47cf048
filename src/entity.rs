//! Sensor and climate entities bound to a location in the coordinator's
//! snapshots.
//!
//! Entities hold no copy of the data. Each read resolves the entity's
//! [`EntityKey`] against the currently published snapshot, so a room that is
//! missing from one refresh simply reads as "no value" until it returns.

use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use crate::config::Credentials;
use crate::coordinator::Coordinator;
use crate::types::*;
use crate::Result;

/// Read one metric from a snapshot. Missing floor, room or field is `None`.
pub fn extract(snapshot: &Snapshot, key: &EntityKey) -> Option<Reading> {
    let room = snapshot.room(&key.floor_id, &key.room_id)?;
    read_metric(room, &key.metric)
}

pub fn read_metric(room: &Room, metric: &MetricKind) -> Option<Reading> {
    match metric {
        MetricKind::Current => room.temperature.map(Reading::Number),
        MetricKind::Target => room.target_temperature.map(Reading::Number),
        MetricKind::Humidity => room.humidity.map(Reading::Number),
        MetricKind::TotalOffset => room.total_offset.map(Reading::Number),
        MetricKind::OperationMode => room.operation_mode.clone().map(Reading::Text),
        MetricKind::Return(name) => room
            .return_sensor(name)
            .and_then(|s| s.value)
            .map(Reading::Number),
    }
}

/// Metrics a room reported in this snapshot, in a stable order. A return
/// sensor name listed twice yields one metric, bound to its first occurrence.
pub fn reported_metrics(room: &Room) -> Vec<MetricKind> {
    let mut metrics = Vec::new();
    if room.temperature.is_some() {
        metrics.push(MetricKind::Current);
    }
    if room.target_temperature.is_some() {
        metrics.push(MetricKind::Target);
    }
    if room.humidity.is_some() {
        metrics.push(MetricKind::Humidity);
    }
    if room.total_offset.is_some() {
        metrics.push(MetricKind::TotalOffset);
    }
    if room.operation_mode.is_some() {
        metrics.push(MetricKind::OperationMode);
    }
    for sensor in &room.return_sensors {
        let metric = MetricKind::Return(sensor.name.clone());
        if !metrics.contains(&metric) {
            metrics.push(metric);
        }
    }
    metrics
}

pub struct SensorEntity {
    key: EntityKey,
    name: String,
    coordinator: Coordinator,
}

impl SensorEntity {
    pub fn new(key: EntityKey, name: impl Into<String>, coordinator: Coordinator) -> Self {
        Self {
            key,
            name: name.into(),
            coordinator,
        }
    }

    pub fn key(&self) -> &EntityKey {
        &self.key
    }

    pub fn unique_id(&self) -> String {
        self.key.unique_id()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn unit(&self) -> Option<&'static str> {
        self.key.metric.unit()
    }

    pub fn value(&self) -> Option<Reading> {
        self.coordinator
            .snapshot()
            .and_then(|s| extract(&s, &self.key))
    }

    pub fn available(&self) -> bool {
        self.coordinator.snapshot().is_some()
    }
}

/// A target temperature as last confirmed by the controller, plus the value
/// written locally since then.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TwoPhase<T> {
    pub confirmed: Option<T>,
    pub optimistic: Option<T>,
}

impl<T: Copy> TwoPhase<T> {
    pub fn value(&self) -> Option<T> {
        self.optimistic.or(self.confirmed)
    }
}

#[derive(Debug, Clone, Copy)]
struct PendingTarget {
    value: f64,
    /// Snapshots up to this tick were requested before the write was accepted
    /// and cannot confirm or overwrite it.
    accepted_at_tick: u64,
}

pub struct ClimateEntity {
    house_id: String,
    floor_id: String,
    room_id: String,
    name: String,
    coordinator: Coordinator,
    credentials: Arc<Credentials>,
    pending: Mutex<Option<PendingTarget>>,
    hvac_mode: Mutex<HvacMode>,
}

impl ClimateEntity {
    pub fn new(
        floor_id: impl Into<String>,
        room_id: impl Into<String>,
        name: impl Into<String>,
        coordinator: Coordinator,
        credentials: Arc<Credentials>,
    ) -> Self {
        Self {
            house_id: coordinator.house_id().to_string(),
            floor_id: floor_id.into(),
            room_id: room_id.into(),
            name: name.into(),
            coordinator,
            credentials,
            pending: Mutex::new(None),
            hvac_mode: Mutex::new(HvacMode::default()),
        }
    }

    pub fn unique_id(&self) -> String {
        format!("controme_{}_{}_climate", self.house_id, self.room_id)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn available(&self) -> bool {
        self.coordinator.snapshot().is_some()
    }

    pub fn current_temperature(&self) -> Option<f64> {
        self.read(MetricKind::Current)
    }

    pub fn humidity(&self) -> Option<f64> {
        self.read(MetricKind::Humidity)
    }

    pub fn target_temperature(&self) -> Option<f64> {
        self.target().value()
    }

    /// Confirmed and optimistic target. The optimistic value is dropped as
    /// soon as a snapshot requested after the write has been published,
    /// whether or not it agrees.
    pub fn target(&self) -> TwoPhase<f64> {
        let snapshot = self.coordinator.snapshot();
        let confirmed = snapshot
            .as_deref()
            .and_then(|s| extract(s, &self.key(MetricKind::Target)))
            .and_then(|r| r.as_f64());

        let mut pending = self.pending.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(p) = *pending
            && snapshot.as_ref().is_some_and(|s| s.tick > p.accepted_at_tick)
        {
            debug!(room_id = %self.room_id, written = p.value, ?confirmed, "target reconciled");
            *pending = None;
        }

        TwoPhase {
            confirmed,
            optimistic: pending.map(|p| p.value),
        }
    }

    /// Write a new target through to the controller. On success the value is
    /// shown immediately until a later refresh reports the controller's view.
    /// On failure nothing changes locally.
    pub async fn set_target_temperature(&self, value: f64) -> Result<()> {
        self.coordinator
            .client()
            .set_target(&self.house_id, &self.room_id, value, &self.credentials)
            .await?;

        let accepted_at_tick = self.coordinator.issued_tick();
        *self.pending.lock().unwrap_or_else(|p| p.into_inner()) = Some(PendingTarget {
            value,
            accepted_at_tick,
        });
        info!(room_id = %self.room_id, value, "target temperature set");
        Ok(())
    }

    pub fn hvac_modes(&self) -> &'static [HvacMode] {
        &[HvacMode::Heat, HvacMode::Off]
    }

    pub fn hvac_mode(&self) -> HvacMode {
        *self.hvac_mode.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Local state only; the controller has no endpoint for it.
    pub fn set_hvac_mode(&self, mode: HvacMode) {
        *self.hvac_mode.lock().unwrap_or_else(|p| p.into_inner()) = mode;
        debug!(room_id = %self.room_id, ?mode, "hvac mode set");
    }

    fn key(&self, metric: MetricKind) -> EntityKey {
        EntityKey::new(&self.house_id, &self.floor_id, &self.room_id, metric)
    }

    fn read(&self, metric: MetricKind) -> Option<f64> {
        let key = self.key(metric);
        self.coordinator
            .snapshot()
            .and_then(|s| extract(&s, &key))
            .and_then(|r| r.as_f64())
    }
}
