mod client;
mod config;
mod coordinator;
mod diff;
mod discovery;
mod entity;
mod error;
mod integration;
mod logger;
mod protocol;
mod setup;
mod types;

pub use client::{ContromeClient, ContromeClientBuilder, DEFAULT_REQUEST_TIMEOUT};
pub use config::{normalize_base_url, ConfigEntry, Credentials, DEFAULT_UPDATE_INTERVAL_SECS};
pub use coordinator::{Coordinator, CoordinatorBuilder};
pub use discovery::{candidate_hosts, local_ipv4, Ipv4Network, Scanner, ScannerBuilder, PRIORITY_ADDRESSES};
pub use entity::{extract, read_metric, reported_metrics, ClimateEntity, SensorEntity, TwoPhase};
pub use error::{Error, Result};
pub use integration::{DeviceInfo, Integration};
pub use logger::MessageLogMode;
pub use protocol::{parse_temps, DEFAULT_RETURN_KEYWORD};
pub use setup::{SetupFlow, SetupStep, CANDIDATE_HOUSE_IDS};
pub use types::*;
