//! Supercom587 water meter. Grounded on `driver_supercom587.cc`: the meter
//! repeats the same DIF/VIF combination for warm and cold water, so the
//! field descriptor disambiguates with an `index_nr` rather than storage
//! or tariff numbers.
use super::{Detection, DriverInfo, FieldDescriptor, MeterCategory};
use crate::wmbus::dvparser::{MeasurementType, VifRange};

/// Manufacturer code for "SON" (Sontex).
const SON: u16 = 0x4DEE;

pub static DRIVER: DriverInfo = DriverInfo {
    name: "supercom587",
    category: MeterCategory::WaterMeter,
    default_fields: &["name", "id", "total_m3", "timestamp"],
    detections: &[
        Detection { mfct: SON, version: 0x3c, device_type: 0x06 },
        Detection { mfct: SON, version: 0x3c, device_type: 0x07 },
    ],
    fields: &[FieldDescriptor {
        name: "total_m3",
        measurement_type: MeasurementType::Instantaneous,
        vif_range: VifRange::Volume,
        storage_nr: None,
        tariff_nr: None,
        index_nr: Some(1),
        unit: "m3",
        lookup: None,
    }],
    process_content: None,
};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wmbus::dvparser;

    #[test]
    fn index_nr_one_selects_the_first_of_two_identical_keys() {
        // Warm water total (5.548 m3) then cold water total (4.989 m3),
        // both DIF 0x04 / VIF 0x13.
        let content = vec![
            0x04, 0x13, 0xAC, 0x15, 0x00, 0x00, // 5548 * 1e-3
            0x04, 0x13, 0x7D, 0x13, 0x00, 0x00, // 4989 * 1e-3
        ];
        let dv = dvparser::parse(&content).unwrap();
        let entry = dvparser::find_indexed(&dv, MeasurementType::Instantaneous, VifRange::Volume, 1)
            .unwrap();
        assert!((dvparser::extract_double(entry, true) - 5.548).abs() < 0.001);
    }
}
