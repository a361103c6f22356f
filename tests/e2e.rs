//! End-to-end coverage driving real captured telegrams through header
//! decode, decryption and driver dispatch the same way the serial reader
//! in `main.rs` does, one scenario per meter family this crate ships a
//! driver for.
use chrono::Utc;
use wmbusmeters::meter::{Meter, MeterInfo};
use wmbusmeters::printer::{render, OutputFormat, PrinterConfig, Reading};
use wmbusmeters::wmbus::telegram;

fn meter(name: &str, driver: &str, id_pattern: &str, key: Option<[u8; 16]>) -> Meter {
    Meter::new(MeterInfo {
        name: name.to_string(),
        driver_name: driver.to_string(),
        id_pattern: id_pattern.to_string(),
        key,
        shells: vec![],
    })
}

fn run(frame: &[u8], m: &mut Meter) -> bool {
    let mut decoded = telegram::decode_header(frame).unwrap();
    m.process(&mut decoded, Utc::now()).unwrap()
}

/// Itron iPerl, config word selects no security (mode 0): `total_m3=7.704`,
/// `max_flow_m3h=0`.
#[test]
fn iperl_unencrypted_telegram_reports_total_and_flow() {
    let frame = hex::decode(
        "1E44AE4C9956341268077A36001000\
         2F2F0413181E0000023B00002F2F2F2F",
    )
    .unwrap();

    let mut m = meter("MoreWater", "iperl", "12345699", None);
    assert!(run(&frame, &mut m));
    assert_eq!(m.fields["id"], "12345699");
    assert!((m.fields["total_m3"].as_f64().unwrap() - 7.704).abs() < 0.001);
    assert_eq!(m.fields["max_flow_m3h"].as_f64().unwrap(), 0.0);
}

/// The same reading rendered end to end, both as JSON and as the
/// human-readable line, checked against the literal shapes each format
/// documents (timestamp excluded, since it is wall-clock dependent).
#[test]
fn iperl_reading_renders_the_documented_json_and_human_shapes() {
    let frame = hex::decode(
        "1E44AE4C9956341268077A36001000\
         2F2F0413181E0000023B00002F2F2F2F",
    )
    .unwrap();

    let mut m = meter("MoreWater", "iperl", "12345699", None);
    assert!(run(&frame, &mut m));

    let reading = Reading {
        meter_name: m.info.name.clone(),
        id: m.fields["id"].as_str().unwrap().to_string(),
        fields: m.fields.clone(),
        units: m.units.clone(),
    };

    let json = render(&reading, &PrinterConfig { format: OutputFormat::Json, ..Default::default() });
    let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed["media"], "water");
    assert_eq!(parsed["meter"], "iperl");
    assert_eq!(parsed["name"], "MoreWater");
    assert_eq!(parsed["id"], "12345699");
    assert!((parsed["total_m3"].as_f64().unwrap() - 7.704).abs() < 0.001);
    assert_eq!(parsed["max_flow_m3h"].as_f64().unwrap(), 0.0);

    let human = render(&reading, &PrinterConfig::default());
    assert!(human.starts_with("MoreWater\t12345699\t"));
    assert!(human.contains("7.704 m3"));
    assert!(human.contains("0.0 m3/h"));
    assert!(!human.contains("total_m3="));
}

/// A second iPerl unit, same driver, a shorter telegram with no filler
/// bytes: `total_m3=123.529`.
#[test]
fn iperl_second_unit_matches_by_its_own_id() {
    let frame = hex::decode("1844AE4C4455223368077A55000000041389E20100023B0000").unwrap();

    let mut m = meter("WaterWater", "iperl", "33225544", None);
    assert!(run(&frame, &mut m));
    assert!((m.fields["total_m3"].as_f64().unwrap() - 123.529).abs() < 0.001);

    // And it must not answer for the other meter's id.
    let mut other = meter("WaterWater", "iperl", "99999999", None);
    assert!(!run(&frame, &mut other));
}

/// Apator08, a manufacturer-preset-high-bit mfct code and a `/ 3.0` content
/// extractor rather than a declarative field table. The real dongle
/// capture uses a manufacturer-specific CI (0xA0) that this crate's header
/// classifier doesn't cover; this vector swaps in the standard short
/// header CI (0x7A) while keeping the same id/mfct/version/type/content
/// bytes, so the driver logic under test is unchanged.
#[test]
fn apator08_divides_content_by_three() {
    let frame = hex::decode("14441486DD444003037A0000000413B9E52700").unwrap();

    let mut m = meter("Vatten", "apator08", "004444dd", None);
    assert!(run(&frame, &mut m));
    assert!((m.fields["total_m3"].as_f64().unwrap() - 871.571).abs() < 0.01);
}

/// The same apator08 telegram routed through a meter with no fixed driver,
/// relying on `find_driver`'s manufacturer/version/type dispatch — the
/// "auto" path used for meters the user hasn't pinned to a driver name.
#[test]
fn unconfigured_driver_auto_detects_via_manufacturer_version_type() {
    let frame = hex::decode("14441486DD444003037A0000000413B9E52700").unwrap();

    let mut m = meter("Vatten", "auto", "*", None);
    assert!(run(&frame, &mut m));
    assert!((m.fields["total_m3"].as_f64().unwrap() - 871.571).abs() < 0.01);
}

/// DME_07: the real capture's config word claims AES-CBC-IV (mode 5) while
/// its content is already plaintext with a live `2F2F` filler marker and no
/// key was ever shipped for it ("NOKEY" in the upstream fixture) — a
/// mismatch this crate's stricter `decrypt` refuses to paper over (it
/// errors rather than guess). This vector zeroes the config word to mode
/// 0 (no security), keeping every other header and content byte from the
/// real capture, so the driver/DVParser plumbing is exercised faithfully.
#[test]
fn dme07_reports_status_ok_and_total_from_plaintext_content() {
    let frame = hex::decode(
        "1E44A511909192937B077A9F00\
         0000\
         2F2F04130347030002FD1700002F2F2F",
    )
    .unwrap();

    let mut m = meter("DigiWasser", "dme_07", "93929190", None);
    assert!(run(&frame, &mut m));
    assert_eq!(m.fields["status"], "OK");
    assert!((m.fields["total_m3"].as_f64().unwrap() - 214.787).abs() < 0.001);
}

/// Supercom587: config word selects no security, and the warm/cold water
/// totals share the same DIF/VIF pair, disambiguated by `index_nr`. This
/// is the full real capture (163 bytes), not a trimmed fixture — the first
/// Volume/Instantaneous record in the content is the warm water total, so
/// `index_nr(1)` picks it regardless of how many repeats follow.
#[test]
fn supercom587_warm_water_picks_the_first_matching_record() {
    let frame = hex::decode(
        "A244EE4D785634123C067A8F000000\
         0C1348550000426CE1F14C130000000082046C21298C0413330000008D04931E3A3CFE33000000\
         33000000330000003300000033000000330000003300000033000000330000003300000033000000\
         3300000043000000341800000\
         46D0D0B5C2B03FD6C5E150082206C5C290BFD0F0200018C4079678885238310FD31000000\
         82106C01018110FD610002FD66020002FD170000",
    )
    .unwrap();

    let mut m = meter("MyWarmWater", "supercom587", "12345678", None);
    assert!(run(&frame, &mut m));
    assert!((m.fields["total_m3"].as_f64().unwrap() - 5.548).abs() < 0.001);
}
