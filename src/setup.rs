//! Interactive creation of a [`ConfigEntry`].
//!
//! The user supplies the controller address and credentials; the house id is
//! found by probing the temps endpoint for each candidate id.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::client::{ContromeClient, DEFAULT_REQUEST_TIMEOUT};
use crate::config::{normalize_base_url, ConfigEntry, Credentials};
use crate::types::House;
use crate::{Error, Result};

/// House ids tried during setup.
pub const CANDIDATE_HOUSE_IDS: std::ops::RangeInclusive<u32> = 1..=9;

#[derive(Debug, Clone, PartialEq)]
pub enum SetupStep {
    /// Exactly one house answered; the entry is complete.
    Done(ConfigEntry),
    /// Several houses answered; finish with [`SetupFlow::select_house`].
    SelectHouse(Vec<House>),
}

pub struct SetupFlow {
    base_url: String,
    user: String,
    password: String,
    probe_timeout: Duration,
    houses: Vec<House>,
}

impl SetupFlow {
    pub fn new(
        base_url: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            user: user.into(),
            password: password.into(),
            probe_timeout: DEFAULT_REQUEST_TIMEOUT,
            houses: Vec::new(),
        }
    }

    pub fn probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Normalise the address and probe every candidate house id.
    ///
    /// Fails with [`Error::InvalidUrl`] for an unusable address and
    /// [`Error::CannotConnect`] when no house answers.
    pub async fn start(&mut self) -> Result<SetupStep> {
        self.base_url = normalize_base_url(&self.base_url)?;
        info!(base_url = %self.base_url, user = %self.user, "probing controller for houses");

        let client = ContromeClient::builder(&self.base_url)
            .timeout(self.probe_timeout)
            .build()?;
        self.houses = client.probe_houses(CANDIDATE_HOUSE_IDS).await;
        debug!(houses = ?self.houses, "house probe finished");

        match self.houses.as_slice() {
            [] => {
                warn!(base_url = %self.base_url, "no house answered");
                Err(Error::CannotConnect)
            }
            [house] => {
                info!(house_id = %house.id, "one house found, selecting it");
                Ok(SetupStep::Done(self.entry(&house.id)))
            }
            houses => {
                info!(count = houses.len(), "several houses found");
                Ok(SetupStep::SelectHouse(houses.to_vec()))
            }
        }
    }

    /// Houses found by the last [`SetupFlow::start`].
    pub fn houses(&self) -> &[House] {
        &self.houses
    }

    pub fn select_house(&self, house_id: &str) -> Result<ConfigEntry> {
        if !self.houses.iter().any(|h| h.id == house_id) {
            return Err(Error::UnknownHouse(house_id.to_string()));
        }
        info!(house_id, "house selected");
        Ok(self.entry(house_id))
    }

    fn entry(&self, house_id: &str) -> ConfigEntry {
        ConfigEntry::new(Credentials {
            base_url: self.base_url.clone(),
            house_id: house_id.to_string(),
            user: self.user.clone(),
            password: self.password.clone(),
        })
    }
}
