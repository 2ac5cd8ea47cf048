use std::fmt;

use chrono::{DateTime, Utc};

/// The full floor/room tree as returned by one fetch of the temps endpoint.
///
/// Published by the coordinator behind an `Arc` and never mutated afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    /// Sequence number of the fetch that produced this snapshot. Assigned when
    /// the fetch starts, so a higher tick always means a newer request.
    pub tick: u64,
    pub fetched_at: DateTime<Utc>,
    pub floors: Vec<Floor>,
}

impl Snapshot {
    pub fn new(tick: u64, floors: Vec<Floor>) -> Self {
        Self {
            tick,
            fetched_at: Utc::now(),
            floors,
        }
    }

    pub fn floor(&self, floor_id: &str) -> Option<&Floor> {
        self.floors.iter().find(|f| f.id == floor_id)
    }

    pub fn room(&self, floor_id: &str, room_id: &str) -> Option<&Room> {
        self.floor(floor_id)
            .and_then(|f| f.rooms.iter().find(|r| r.id == room_id))
    }

    /// Every room paired with the floor it belongs to, in document order.
    pub fn rooms(&self) -> impl Iterator<Item = (&Floor, &Room)> {
        self.floors
            .iter()
            .flat_map(|f| f.rooms.iter().map(move |r| (f, r)))
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Floor {
    pub id: String,
    pub name: String,
    /// Never empty for a floor that reports metrics: a floor without a room
    /// list is stored as a single room carrying the floor's id.
    pub rooms: Vec<Room>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Room {
    pub id: String,
    pub name: String,
    pub temperature: Option<f64>,
    pub target_temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub total_offset: Option<f64>,
    pub operation_mode: Option<String>,
    pub return_sensors: Vec<ReturnSensor>,
}

impl Room {
    pub fn return_sensor(&self, name: &str) -> Option<&ReturnSensor> {
        self.return_sensors.iter().find(|s| s.name == name)
    }
}

/// A return-flow temperature sensor attached to a room.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReturnSensor {
    pub name: String,
    pub description: String,
    pub value: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MetricKind {
    Current,
    Target,
    Humidity,
    TotalOffset,
    OperationMode,
    Return(String),
}

impl MetricKind {
    /// Stable identifier used in entity unique ids.
    pub fn as_key(&self) -> String {
        match self {
            MetricKind::Current => "current".to_string(),
            MetricKind::Target => "target".to_string(),
            MetricKind::Humidity => "humidity".to_string(),
            MetricKind::TotalOffset => "total_offset".to_string(),
            MetricKind::OperationMode => "operation_mode".to_string(),
            MetricKind::Return(name) => format!("return_{name}"),
        }
    }

    pub fn label(&self) -> String {
        match self {
            MetricKind::Current => "Temperature".to_string(),
            MetricKind::Target => "Target Temperature".to_string(),
            MetricKind::Humidity => "Humidity".to_string(),
            MetricKind::TotalOffset => "Total Offset".to_string(),
            MetricKind::OperationMode => "Operation Mode".to_string(),
            MetricKind::Return(name) => format!("Return {name}"),
        }
    }

    pub fn unit(&self) -> Option<&'static str> {
        match self {
            MetricKind::Current
            | MetricKind::Target
            | MetricKind::TotalOffset
            | MetricKind::Return(_) => Some("\u{00b0}C"),
            MetricKind::Humidity => Some("%"),
            MetricKind::OperationMode => None,
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_key())
    }
}

/// Binds a long-lived entity to one value inside successive snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityKey {
    pub house_id: String,
    pub floor_id: String,
    pub room_id: String,
    pub metric: MetricKind,
}

impl EntityKey {
    pub fn new(
        house_id: impl Into<String>,
        floor_id: impl Into<String>,
        room_id: impl Into<String>,
        metric: MetricKind,
    ) -> Self {
        Self {
            house_id: house_id.into(),
            floor_id: floor_id.into(),
            room_id: room_id.into(),
            metric,
        }
    }

    pub fn unique_id(&self) -> String {
        format!(
            "controme_{}_{}_{}",
            self.house_id, self.room_id, self.metric
        )
    }
}

/// A single extracted value.
#[derive(Debug, Clone, PartialEq)]
pub enum Reading {
    Number(f64),
    Text(String),
}

impl Reading {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Reading::Number(v) => Some(*v),
            Reading::Text(_) => None,
        }
    }
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reading::Number(v) => write!(f, "{v:.1}"),
            Reading::Text(s) => f.write_str(s),
        }
    }
}

/// Operating mode shown by a climate entity. Kept locally, never sent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum HvacMode {
    Heat,
    #[default]
    Off,
}

/// A house id that answered the temps endpoint during setup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct House {
    pub id: String,
    pub name: String,
}

impl House {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: format!("House {id}"),
            id,
        }
    }
}

/// A host on the local network serving the controller login page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredHost {
    pub ip: std::net::Ipv4Addr,
    pub title: String,
}

impl DiscoveredHost {
    pub fn new(ip: std::net::Ipv4Addr) -> Self {
        Self {
            ip,
            title: format!("Controme at {ip}"),
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.ip)
    }
}
