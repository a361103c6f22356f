use log::{error, info, warn};
use std::env;
use std::sync::Arc;
use std::time::Duration;
use wmbusmeters::config::{self, ConfigError, LogLevel, MainConfig};
use wmbusmeters::meter::{Meter, MeterInfo};
use wmbusmeters::printer::{PrinterConfig, PrinterManager, Reading};
use wmbusmeters::serial::{self, SerialManager};
use wmbusmeters::wmbus::frame;
use wmbusmeters::wmbus::telegram;

fn loglevel_filter(level: &LogLevel) -> &'static str {
    match level {
        LogLevel::Silent => "error",
        LogLevel::Normal => "info",
        LogLevel::Verbose => "debug",
        LogLevel::Debug => "trace",
    }
}

fn load_config() -> Result<(MainConfig, Vec<MeterInfo>), ConfigError> {
    let args: Vec<String> = env::args().skip(1).collect();
    if !args.is_empty() {
        return config::parse_cli(&args);
    }

    let main = config::parse_main_conf(std::path::Path::new("/etc/wmbusmeters.conf"))?;
    let meters = config::load_meter_definitions(std::path::Path::new("/etc/wmbusmeters.d"));
    Ok((main, meters))
}

#[tokio::main]
async fn main() {
    env::set_var("RUST_BACKTRACE", "1");

    let (main_config, meter_infos) = match load_config() {
        Ok(pair) => pair,
        Err(ConfigError::Usage) => {
            eprintln!("usage: wmbusmeters [flags] <device> <name> <id> <key> [...]");
            eprintln!("   or: run with no arguments to read /etc/wmbusmeters.conf");
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    let default_filter = loglevel_filter(&main_config.loglevel);
    env_logger::init_from_env(
        env_logger::Env::new()
            .filter_or("WMBUSMETERS_LOG", default_filter),
    );

    let Some(device_path) = main_config.device.clone() else {
        error!("no serial device configured");
        std::process::exit(1);
    };

    {
        let mut config = wmbusmeters::CONFIG.write().unwrap();
        config.main = main_config.clone();
        config.meters = meter_infos;
    }

    let meters: Vec<Meter> = {
        let config = wmbusmeters::CONFIG.read().unwrap();
        config.meters.iter().cloned().map(Meter::new).collect()
    };
    // A plain std Mutex: `on_frame` below is a synchronous closure invoked
    // from inside the serial manager's async loop, never held across an await.
    let meters = Arc::new(std::sync::Mutex::new(meters));

    let printer_config = PrinterConfig {
        format: main_config.format,
        separator: main_config.separator,
        meterfiles_dir: main_config.meterfiles_dir.clone(),
        shells: main_config.shells.clone(),
    };
    let (mut printer, printer_tx) = PrinterManager::new(printer_config);
    let printer_task = tokio::spawn(async move {
        printer.start_thread().await;
    });

    let (mut serial_manager, raw_tx, stop) = SerialManager::new(Duration::from_secs(60));

    if let Err(e) = serial::spawn_device_reader("radio0".to_string(), &device_path, 9600, raw_tx) {
        error!("failed to open {device_path}: {e}");
        std::process::exit(1);
    }

    let stop_on_signal = stop.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("received interrupt, shutting down");
        stop_on_signal.notify_one();
    });

    let oneshot = main_config.oneshot;
    let meters_for_loop = meters.clone();
    let printer_tx_for_loop = printer_tx.clone();
    let stop_after_first = stop.clone();

    serial_manager
        .run_until_stopped(move |device_name, raw_frame| {
            if main_config.logtelegrams {
                info!("{device_name}: {}", hex::encode(&raw_frame));
            }

            let stripped = match frame::verify_and_strip_crc(&raw_frame) {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!("{device_name}: dropping frame with a bad CRC: {e}");
                    return;
                }
            };

            let mut decoded = match telegram::decode_header(&stripped) {
                Ok(t) => t,
                Err(e) => {
                    warn!("{device_name}: failed to decode header: {e}");
                    return;
                }
            };

            let now = chrono::Utc::now();
            let mut matched = false;
            {
                let mut meters = meters_for_loop.lock().unwrap();
                for meter in meters.iter_mut() {
                    match meter.process(&mut decoded, now) {
                        Ok(true) => {
                            matched = true;
                            let reading = Reading {
                                meter_name: meter.info.name.clone(),
                                id: decoded.id.clone(),
                                fields: meter.fields.clone(),
                                units: meter.units.clone(),
                            };
                            let _ = printer_tx_for_loop.try_send(reading);
                        }
                        Ok(false) => {}
                        Err(e) => warn!("{}: {e}", meter.info.name),
                    }
                }
            }

            if !matched {
                debug_unmatched(&decoded.id);
            }

            if oneshot && matched {
                stop_after_first.notify_one();
            }
        })
        .await;

    drop(printer_tx);
    let _ = printer_task.await;
}

fn debug_unmatched(id: &str) {
    log::debug!("no configured meter matched telegram id {id}");
}
