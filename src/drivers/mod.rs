//! Driver registry: static, read-only-after-init metadata mapping a
//! telegram's (manufacturer, version, type) triple to the logic that knows
//! how to pull fields out of its DIF/VIF record map.
pub mod apator08;
pub mod auto;
pub mod dme_07;
pub mod iperl;
pub mod supercom587;

use crate::wmbus::dvparser::DVEntry;
use crate::wmbus::telegram::Telegram;
use lazy_static::lazy_static;
use serde_json::{Map, Value};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeterCategory {
    WaterMeter,
    HeatMeter,
    ElectricityMeter,
    GasMeter,
    TempHygroMeter,
    SmokeDetector,
    PulseCounter,
    UnknownMeter,
    AutoMeter,
}

impl MeterCategory {
    /// The `media` field name published alongside every reading.
    pub fn media(self) -> &'static str {
        match self {
            MeterCategory::WaterMeter => "water",
            MeterCategory::HeatMeter => "heat",
            MeterCategory::ElectricityMeter => "electricity",
            MeterCategory::GasMeter => "gas",
            MeterCategory::TempHygroMeter => "temperature",
            MeterCategory::SmokeDetector => "smoke",
            MeterCategory::PulseCounter => "pulse",
            MeterCategory::UnknownMeter => "unknown",
            MeterCategory::AutoMeter => "auto",
        }
    }
}

/// A single (manufacturer, version, type) detection triple. `mfct` is the
/// packed 16 bit code, not the 3 letter string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Detection {
    pub mfct: u16,
    pub version: u8,
    pub device_type: u8,
}

/// Declares one output field for a declarative driver: where to find its
/// value in the DIF/VIF map and how to render it.
pub struct FieldDescriptor {
    pub name: &'static str,
    pub measurement_type: crate::wmbus::dvparser::MeasurementType,
    pub vif_range: crate::wmbus::dvparser::VifRange,
    pub storage_nr: Option<u32>,
    pub tariff_nr: Option<u32>,
    pub index_nr: Option<u32>,
    pub unit: &'static str,
    /// Looks up a raw integer value in a string table (e.g. error flags to
    /// a human status string). `None` means render as a scaled double.
    pub lookup: Option<fn(u64) -> &'static str>,
}

type ProcessContentFn = fn(&Telegram, &HashMap<String, DVEntry>) -> Map<String, Value>;

pub struct DriverInfo {
    pub name: &'static str,
    pub category: MeterCategory,
    pub default_fields: &'static [&'static str],
    pub detections: &'static [Detection],
    pub fields: &'static [FieldDescriptor],
    /// Some drivers (apator08) bypass the declarative field table entirely
    /// and parse the payload by hand; `fields` is empty for those.
    pub process_content: Option<ProcessContentFn>,
}

impl DriverInfo {
    /// Extracts every declared field plus the constant `name`/`id` fields
    /// into a JSON-ready map. Imperative drivers delegate to `process_content`.
    pub fn extract(
        &self,
        telegram: &Telegram,
        dv: &HashMap<String, DVEntry>,
    ) -> Map<String, Value> {
        if let Some(process) = self.process_content {
            return process(telegram, dv);
        }

        let mut out = Map::new();
        for field in self.fields {
            let entry = match field.index_nr {
                Some(idx) => crate::wmbus::dvparser::find_indexed(
                    dv,
                    field.measurement_type,
                    field.vif_range,
                    idx,
                ),
                None => crate::wmbus::dvparser::find(
                    dv,
                    field.measurement_type,
                    field.vif_range,
                    field.storage_nr,
                    field.tariff_nr,
                ),
            };

            let value = match entry {
                Some(e) => {
                    if let Some(lookup) = field.lookup {
                        Value::from(lookup(crate::wmbus::dvparser::extract_uint64(e)))
                    } else {
                        Value::from(crate::wmbus::dvparser::extract_double(e, true))
                    }
                }
                None => Value::Null,
            };
            out.insert(field.name.to_string(), value);
        }
        out
    }
}

lazy_static! {
    pub static ref REGISTRY: Vec<&'static DriverInfo> = vec![
        &iperl::DRIVER,
        &apator08::DRIVER,
        &dme_07::DRIVER,
        &supercom587::DRIVER,
        &auto::DRIVER,
    ];
}

/// Finds the driver whose detection table matches this (mfct, version,
/// type) triple. Retries once with the high bit of mfct cleared, the
/// standard workaround for meters that advertise a "secondary" mfct byte.
pub fn find_driver(mfct: u16, version: u8, device_type: u8) -> Option<&'static DriverInfo> {
    find_exact(mfct, version, device_type)
        .or_else(|| find_exact(mfct & !0x8000, version, device_type))
}

fn find_exact(mfct: u16, version: u8, device_type: u8) -> Option<&'static DriverInfo> {
    REGISTRY.iter().find(|d| {
        d.detections.iter().any(|det| {
            det.mfct == mfct && det.version == version && det.device_type == device_type
        })
    }).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apator08_is_found_by_its_preset_high_bit_mfct() {
        // APT base code 0x0614 with the high bit preset, as apator08 ships.
        let driver = find_driver(0x8614, 0x03, 0x03).unwrap();
        assert_eq!(driver.name, "apator08");
    }

    #[test]
    fn unknown_triple_finds_no_driver() {
        assert!(find_driver(0xFFFF, 0xFF, 0xFF).is_none());
    }
}
