//! Trivial fallback driver used when a configured meter has no specific
//! type set and `find_driver` must still return something reportable.
//! Grounded on `driver_auto.cc`: no detections of its own, no fields —
//! the framework re-dispatches to whichever concrete driver actually
//! matches the telegram's MVT triple and only falls back to this one when
//! none does.
use super::{DriverInfo, MeterCategory};

pub static DRIVER: DriverInfo = DriverInfo {
    name: "auto",
    category: MeterCategory::AutoMeter,
    default_fields: &["name", "id", "timestamp"],
    detections: &[],
    fields: &[],
    process_content: None,
};
