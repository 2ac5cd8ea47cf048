use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::join_all;
use serde_json::{json, Value};
use tracing::{debug, trace, warn};

use crate::config::{normalize_base_url, Credentials};
use crate::logger::{MessageLogMode, MessageLogger};
use crate::protocol::{
    format_setpoint, parse_temps_value, set_target_form, set_target_url, temps_url,
    DEFAULT_RETURN_KEYWORD,
};
use crate::types::*;
use crate::{Error, Result};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub struct ContromeClientBuilder {
    base_url: String,
    timeout: Duration,
    return_keyword: String,
    log_mode: Option<MessageLogMode>,
    log_path: Option<String>,
}

impl ContromeClientBuilder {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: DEFAULT_REQUEST_TIMEOUT,
            return_keyword: DEFAULT_RETURN_KEYWORD.to_string(),
            log_mode: None,
            log_path: None,
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Substring of a sensor description that marks it as a return-flow sensor.
    pub fn return_keyword(mut self, keyword: impl Into<String>) -> Self {
        self.return_keyword = keyword.into();
        self
    }

    pub fn message_log(mut self, mode: MessageLogMode, path: impl Into<String>) -> Self {
        self.log_mode = Some(mode);
        self.log_path = Some(path.into());
        self
    }

    pub fn build(self) -> Result<ContromeClient> {
        let base_url = normalize_base_url(&self.base_url)?;
        let http = reqwest::Client::builder().timeout(self.timeout).build()?;

        let logger = match (self.log_mode, self.log_path) {
            (Some(mode), Some(path)) => Some(Arc::new(Mutex::new(MessageLogger::new(mode, &path)?))),
            _ => None,
        };

        Ok(ContromeClient {
            http,
            base_url,
            return_keyword: self.return_keyword.into(),
            logger,
        })
    }
}

/// Transport for the controller's JSON API. Holds no cached state; cloning is
/// cheap and clones share the connection pool.
#[derive(Clone)]
pub struct ContromeClient {
    http: reqwest::Client,
    base_url: String,
    return_keyword: Arc<str>,
    logger: Option<Arc<Mutex<MessageLogger>>>,
}

impl ContromeClient {
    pub fn builder(base_url: impl Into<String>) -> ContromeClientBuilder {
        ContromeClientBuilder::new(base_url)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// GET the temps document for `house_id` and parse it into floors.
    pub async fn fetch_temps(&self, house_id: &str) -> Result<Vec<Floor>> {
        let url = temps_url(&self.base_url, house_id);
        debug!(url = %url, "fetching temps");
        self.with_logger(|l| l.log_request("GET", url.trim_start_matches(&self.base_url)));

        let resp = self.http.get(&url).send().await?;
        let status = resp.status().as_u16();
        if status != 200 {
            debug!(status, house_id, "temps request rejected");
            self.with_logger(|l| l.log_fetch(status, &Value::Null));
            return Err(Error::HttpStatus(status));
        }

        let body = resp.text().await?;
        let document: Value = serde_json::from_str(&body)?;
        self.with_logger(|l| l.log_fetch(status, &document));

        let floors = parse_temps_value(&document, &self.return_keyword)?;
        trace!(floors = floors.len(), "parsed temps document");
        Ok(floors)
    }

    /// POST a new target temperature for one room.
    ///
    /// Success means the controller accepted the value, not that the room has
    /// picked it up; a later fetch is authoritative.
    pub async fn set_target(
        &self,
        house_id: &str,
        room_id: &str,
        value: f64,
        credentials: &Credentials,
    ) -> Result<()> {
        let url = set_target_url(&self.base_url, house_id, room_id);
        let soll = format_setpoint(value);
        debug!(url = %url, soll = %soll, "setting target temperature");
        self.with_logger(|l| {
            l.log_command("set_target", Some(room_id), &json!({ "house": house_id, "soll": soll }))
        });

        let resp = self
            .http
            .post(&url)
            .form(&set_target_form(&credentials.user, &credentials.password, &soll))
            .send()
            .await?;

        match resp.status().as_u16() {
            200 => Ok(()),
            403 => {
                warn!(house_id, room_id, "controller rejected credentials");
                Err(Error::Auth)
            }
            status => Err(Error::HttpStatus(status)),
        }
    }

    /// Probe each candidate house id against the temps endpoint. A house is
    /// valid when it answers 200 with a non-empty floor list. Failures are
    /// skipped; results keep the order of `ids`.
    pub async fn probe_houses<I>(&self, ids: I) -> Vec<House>
    where
        I: IntoIterator,
        I::Item: ToString,
    {
        let probes = ids.into_iter().map(|id| {
            let id = id.to_string();
            async move {
                let url = temps_url(&self.base_url, &id);
                match self.probe_house(&url).await {
                    Ok(true) => {
                        debug!(house_id = %id, "house answered");
                        Some(House::new(id))
                    }
                    Ok(false) => {
                        trace!(house_id = %id, "house returned no floors");
                        None
                    }
                    Err(e) => {
                        debug!(house_id = %id, error = %e, "house probe failed");
                        None
                    }
                }
            }
        });
        join_all(probes).await.into_iter().flatten().collect()
    }

    async fn probe_house(&self, url: &str) -> Result<bool> {
        let resp = self.http.get(url).send().await?;
        let status = resp.status().as_u16();
        if status != 200 {
            return Err(Error::HttpStatus(status));
        }
        let document: Value = resp.json().await?;
        Ok(matches!(document, Value::Array(ref floors) if !floors.is_empty()))
    }

    fn with_logger(&self, f: impl FnOnce(&mut MessageLogger)) {
        if let Some(logger) = &self.logger
            && let Ok(mut guard) = logger.lock()
        {
            f(&mut guard);
        }
    }
}
