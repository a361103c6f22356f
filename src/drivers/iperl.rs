//! Itron "iPerl" water meter: the representative declarative driver.
//! Grounded on `driver_iperl.cc` (Driver/addNumericFieldWithExtractor, T1
//! link mode, SEN detection triples).
use super::{Detection, DriverInfo, FieldDescriptor, MeterCategory};
use crate::wmbus::dvparser::{MeasurementType, VifRange};

/// Manufacturer code for "SEN" (Itron/Sensus), per the M-Bus 3-letter
/// packing: `(S-64)*1024 + (E-64)*32 + (N-64)`.
const SEN: u16 = 0x4CAE;

pub static DRIVER: DriverInfo = DriverInfo {
    name: "iperl",
    category: MeterCategory::WaterMeter,
    default_fields: &["name", "id", "total_m3", "max_flow_m3h", "timestamp"],
    detections: &[
        Detection { mfct: SEN, version: 0x68, device_type: 0x06 },
        Detection { mfct: SEN, version: 0x68, device_type: 0x07 },
        Detection { mfct: SEN, version: 0x7c, device_type: 0x07 },
    ],
    fields: &[
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
        FieldDescriptor {
            name: "max_flow_m3h",
            measurement_type: MeasurementType::Instantaneous,
            vif_range: VifRange::VolumeFlow,
            storage_nr: None,
            tariff_nr: None,
            index_nr: None,
            unit: "m3/h",
            lookup: None,
        },
    ],
    process_content: None,
};
