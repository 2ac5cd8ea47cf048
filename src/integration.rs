//! Per-entry runtime context: one client, one coordinator and the entities
//! derived from the first snapshot.

use std::sync::Arc;

use tracing::info;

use crate::client::{ContromeClient, ContromeClientBuilder};
use crate::config::{ConfigEntry, Credentials};
use crate::coordinator::{Coordinator, CoordinatorBuilder};
use crate::entity::{reported_metrics, ClimateEntity, SensorEntity};
use crate::types::{EntityKey, Snapshot};
use crate::Result;

/// The hub device all entities of one entry are grouped under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub identifier: String,
    pub manufacturer: &'static str,
    pub model: &'static str,
    pub name: String,
}

impl DeviceInfo {
    fn for_house(house_id: &str) -> Self {
        Self {
            identifier: format!("controme_{house_id}"),
            manufacturer: "Controme",
            model: "Thermostat API",
            name: format!("Controme Home {house_id}"),
        }
    }
}

pub struct Integration {
    entry: ConfigEntry,
    device: DeviceInfo,
    coordinator: Coordinator,
    sensors: Vec<SensorEntity>,
    climates: Vec<ClimateEntity>,
}

impl Integration {
    /// Set up `entry` with default client and coordinator settings.
    pub async fn setup(entry: ConfigEntry) -> Result<Self> {
        Self::setup_with(entry, |c| c, |c| c).await
    }

    /// Like [`Integration::setup`], with hooks to adjust the client and
    /// coordinator builders (timeouts, wire log, snapshot callbacks).
    ///
    /// The first refresh must succeed, otherwise setup fails with
    /// [`crate::Error::Fetch`] and nothing keeps running.
    pub async fn setup_with(
        entry: ConfigEntry,
        client: impl FnOnce(ContromeClientBuilder) -> ContromeClientBuilder,
        coordinator: impl FnOnce(CoordinatorBuilder) -> CoordinatorBuilder,
    ) -> Result<Self> {
        let house_id = entry.credentials.house_id.clone();
        let client: ContromeClient = client(
            ContromeClient::builder(&entry.credentials.base_url)
                .return_keyword(&entry.return_keyword),
        )
        .build()?;
        let coordinator = coordinator(
            Coordinator::builder(client, &house_id).update_interval(entry.update_interval()),
        )
        .build();

        let first = coordinator.refresh().await?;

        let credentials = Arc::new(entry.credentials.clone());
        let sensors = sensors_for(&first, &coordinator);
        let climates = climates_for(&first, &coordinator, &credentials);
        info!(
            house_id = %house_id,
            sensors = sensors.len(),
            climates = climates.len(),
            "integration set up"
        );

        coordinator.start();

        Ok(Self {
            device: DeviceInfo::for_house(&house_id),
            entry,
            coordinator,
            sensors,
            climates,
        })
    }

    pub fn entry(&self) -> &ConfigEntry {
        &self.entry
    }

    pub fn device(&self) -> &DeviceInfo {
        &self.device
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    pub fn sensors(&self) -> &[SensorEntity] {
        &self.sensors
    }

    pub fn climates(&self) -> &[ClimateEntity] {
        &self.climates
    }

    pub fn sensor(&self, unique_id: &str) -> Option<&SensorEntity> {
        self.sensors.iter().find(|s| s.unique_id() == unique_id)
    }

    pub fn climate(&self, room_id: &str) -> Option<&ClimateEntity> {
        self.climates.iter().find(|c| c.room_id() == room_id)
    }

    /// Stop polling. Entities stay readable and show the last snapshot.
    pub fn unload(&self) {
        self.coordinator.stop();
        info!(house_id = %self.entry.credentials.house_id, "integration unloaded");
    }
}

fn sensors_for(snapshot: &Snapshot, coordinator: &Coordinator) -> Vec<SensorEntity> {
    snapshot
        .rooms()
        .flat_map(|(floor, room)| {
            reported_metrics(room).into_iter().map(move |metric| {
                let name = format!("{} {}", room.name, metric.label());
                let key = EntityKey::new(coordinator.house_id(), &floor.id, &room.id, metric);
                SensorEntity::new(key, name, coordinator.clone())
            })
        })
        .collect()
}

fn climates_for(
    snapshot: &Snapshot,
    coordinator: &Coordinator,
    credentials: &Arc<Credentials>,
) -> Vec<ClimateEntity> {
    snapshot
        .rooms()
        .map(|(floor, room)| {
            ClimateEntity::new(
                &floor.id,
                &room.id,
                &room.name,
                coordinator.clone(),
                credentials.clone(),
            )
        })
        .collect()
}
