//! A configured meter instance: owns its identity pattern, key and field
//! state, and knows how to run a matching telegram through decryption,
//! parsing and driver dispatch. Grounded on the teacher's consume-loop
//! idiom (`mqtt/mod.rs`'s `MqttManager`), adapted from "publish a
//! `Transmission`" to "update this meter's field map".
use crate::drivers::{self, DriverInfo};
use crate::wmbus::dvparser;
use crate::wmbus::telegram::{self, DecodeError, Telegram};
use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde_json::{Map, Value};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MeterError {
    #[error("telegram id does not match this meter's id pattern")]
    IdMismatch,
    #[error("header decode failed: {0}")]
    Decode(#[from] DecodeError),
    #[error("payload parse failed: {0}")]
    Parse(#[from] dvparser::DvParseError),
    #[error("no driver found for manufacturer/version/type and none configured")]
    NoDriver,
}

#[derive(Debug, Clone)]
pub struct MeterInfo {
    pub name: String,
    /// Driver short name, or `"auto"` to dispatch by the telegram's MVT triple.
    pub driver_name: String,
    pub id_pattern: String,
    pub key: Option<[u8; 16]>,
    pub shells: Vec<String>,
}

/// Matches an id against a pattern where `*` matches any trailing run of
/// digits (e.g. `"12*"` matches `"12345678"`, `"*"` matches anything).
pub fn matches_id(pattern: &str, id: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => id.starts_with(prefix),
        None => pattern == id,
    }
}

pub struct Meter {
    pub info: MeterInfo,
    driver: Option<&'static DriverInfo>,
    pub fields: Map<String, Value>,
    /// Unit suffix per declared field name (e.g. `"total_m3" -> "m3"`), used
    /// by the human-readable printer format. Empty for imperative drivers,
    /// which don't declare field descriptors.
    pub units: HashMap<String, String>,
    pub update_count: u64,
    pub last_update: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl Meter {
    pub fn new(info: MeterInfo) -> Self {
        let driver = if info.driver_name != "auto" {
            drivers::REGISTRY.iter().find(|d| d.name == info.driver_name).copied()
        } else {
            None
        };
        Meter {
            info,
            driver,
            fields: Map::new(),
            units: HashMap::new(),
            update_count: 0,
            last_update: None,
            last_error: None,
        }
    }

    /// Runs a decoded-but-not-yet-decrypted telegram through this meter's
    /// pipeline. Returns `Ok(false)` when the telegram's id simply doesn't
    /// match this meter (not an error condition worth logging loudly).
    pub fn process(&mut self, telegram: &mut Telegram, now: DateTime<Utc>) -> Result<bool, MeterError> {
        if !matches_id(&self.info.id_pattern, &telegram.id) {
            return Ok(false);
        }

        if let Err(e) = telegram::decrypt(telegram, self.info.key.as_ref()) {
            self.last_error = Some(e.to_string());
            return Err(MeterError::Decode(e));
        }

        let dv = match dvparser::parse(&telegram.content) {
            Ok(dv) => dv,
            Err(e) => {
                self.last_error = Some(e.to_string());
                return Err(MeterError::Parse(e));
            }
        };

        let driver = match self.driver.or_else(|| {
            drivers::find_driver(telegram.m_field, telegram.version, telegram.device_type)
        }) {
            Some(d) => d,
            None => {
                warn!("no driver for id {}", telegram.id);
                return Err(MeterError::NoDriver);
            }
        };

        let mut extracted = driver.extract(telegram, &dv);
        extracted.insert("media".to_string(), Value::from(driver.category.media()));
        extracted.insert("meter".to_string(), Value::from(driver.name));
        extracted.insert("name".to_string(), Value::from(self.info.name.clone()));
        extracted.insert("id".to_string(), Value::from(telegram.id.clone()));
        extracted.insert("timestamp".to_string(), Value::from(now.to_rfc3339()));

        self.fields = extracted;
        self.units = driver
            .fields
            .iter()
            .filter(|f| !f.unit.is_empty())
            .map(|f| (f.name.to_string(), f.unit.to_string()))
            .collect();
        self.update_count += 1;
        self.last_update = Some(now);
        self.last_error = None;
        debug!("meter {} updated (count {})", self.info.name, self.update_count);
        Ok(true)
    }
}
