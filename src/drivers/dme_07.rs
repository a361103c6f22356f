//! DME_07 water meter. Grounded on `driver_dme_07.cc`: declarative driver
//! with a status field backed by an error-flags lookup table defaulting to
//! "OK", plus a plain volume field.
use super::{Detection, DriverInfo, FieldDescriptor, MeterCategory};
use crate::wmbus::dvparser::{MeasurementType, VifRange};

/// Manufacturer code for "DME" (Diehl Metering).
const DME: u16 = 0x11A5;

fn status_lookup(flags: u64) -> &'static str {
    if flags == 0 {
        "OK"
    } else if flags & 0x01 != 0 {
        "LOW_BATTERY"
    } else if flags & 0x02 != 0 {
        "PERMANENT_ERROR"
    } else {
        "UNKNOWN_ERROR"
    }
}

pub static DRIVER: DriverInfo = DriverInfo {
    name: "dme_07",
    category: MeterCategory::WaterMeter,
    default_fields: &["name", "id", "total_m3", "status", "timestamp"],
    detections: &[Detection {
        mfct: DME,
        version: 0x7b,
        device_type: 0x07,
    }],
    fields: &[
        FieldDescriptor {
            name: "status",
            measurement_type: MeasurementType::Instantaneous,
            vif_range: VifRange::ErrorFlags,
            storage_nr: None,
            tariff_nr: None,
            index_nr: None,
            unit: "",
            lookup: Some(status_lookup),
        },
        FieldDescriptor {
            name: "total_m3",
            measurement_type: MeasurementType::Instantaneous,
            vif_range: VifRange::Volume,
            storage_nr: None,
            tariff_nr: None,
            index_nr: None,
            unit: "m3",
            lookup: None,
        },
    ],
    process_content: None,
};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wmbus::dvparser;

    #[test]
    fn status_is_null_when_no_error_flags_record_is_present() {
        let content = vec![0x04, 0x13, 0x03, 0x47, 0x03, 0x00]; // 214787 * 1e-3
        let dv = dvparser::parse(&content).unwrap();
        let out = DRIVER.extract(
            &crate::wmbus::telegram::decode_header(&[
                0x0A, 0x44, 0xA5, 0x11, 0x90, 0x91, 0x92, 0x93, 0x7b, 0x07, 0x7A, 0x00, 0x00, 0x00,
                0x00,
            ])
            .unwrap(),
            &dv,
        );
        assert!(out.get("status").unwrap().is_null());
        assert!((out.get("total_m3").unwrap().as_f64().unwrap() - 214.787).abs() < 0.001);
    }

    #[test]
    fn status_reads_ok_when_an_error_flags_record_decodes_to_zero() {
        // DIF 0x02 (16 bit int), VIF 0xFD/0x17 (error flags VIFE), flags 0x0000.
        let content = vec![0x04, 0x13, 0x03, 0x47, 0x03, 0x00, 0x02, 0xFD, 0x17, 0x00, 0x00];
        let dv = dvparser::parse(&content).unwrap();
        let out = DRIVER.extract(
            &crate::wmbus::telegram::decode_header(&[
                0x0A, 0x44, 0xA5, 0x11, 0x90, 0x91, 0x92, 0x93, 0x7b, 0x07, 0x7A, 0x00, 0x00, 0x00,
                0x00,
            ])
            .unwrap(),
            &dv,
        );
        assert_eq!(out.get("status").unwrap(), "OK");
    }
}
