//! Apator08: an imperative driver for a proprietary volume encoding.
//! Grounded on `driver_apator08.cc`: overrides the forced device type to
//! water (the radio advertises gas), and reads a single field at the fixed
//! `0413` DIF/VIF key rather than through semantic VIF-range lookup.
use super::{Detection, DriverInfo, MeterCategory};
use crate::wmbus::dvparser::DVEntry;
use crate::wmbus::telegram::Telegram;
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Apator's base manufacturer code with the high bit preset, exactly as
/// the meter advertises it on the wire (see `find_driver`'s retry logic).
const APATOR_PRESET: u16 = 0x8614;

pub static DRIVER: DriverInfo = DriverInfo {
    name: "apator08",
    category: MeterCategory::WaterMeter,
    default_fields: &["name", "id", "total_m3", "timestamp"],
    detections: &[Detection {
        mfct: APATOR_PRESET,
        version: 0x03,
        device_type: 0x03,
    }],
    fields: &[],
    process_content: Some(extract),
};

/// The apator08 firmware stores total volume in tenths of a liter at a
/// fixed `0413` key and, for reasons never fully explained upstream, the
/// raw value must be divided by 3 to recover cubic metres. Preserved as-is
/// rather than "corrected" — see DESIGN.md's Open Question resolution.
fn extract(_telegram: &Telegram, dv: &HashMap<String, DVEntry>) -> Map<String, Value> {
    let mut out = Map::new();
    let total = dv
        .get("0413")
        .map(|e| crate::wmbus::dvparser::extract_double(e, true) / 3.0);
    out.insert("total_m3".to_string(), total.map(Value::from).unwrap_or(Value::Null));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wmbus::dvparser;

    #[test]
    fn divides_the_0413_key_by_three() {
        // DIF 0x04 (32bit int), VIF 0x13 (volume, scale 10^-3): raw 2614713 -> /1000 -> /3
        let content = vec![0x04, 0x13, 0xB9, 0xE5, 0x27, 0x00];
        let dv = dvparser::parse(&content).unwrap();
        let telegram_stub = crate::wmbus::telegram::decode_header(&[
            0x0A, 0x44, 0x14, 0x86, 0xDD, 0x44, 0x44, 0x00, 0x03, 0x03, 0x7A, 0x00, 0x00, 0x00,
            0x00,
        ])
        .unwrap();
        let out = extract(&telegram_stub, &dv);
        let total = out.get("total_m3").unwrap().as_f64().unwrap();
        assert!((total - 871.571).abs() < 0.001);
    }
}
