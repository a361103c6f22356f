//! Renders meter readings as human-readable lines, delimited fields or
//! JSON, optionally appending to a per-meter file and/or invoking a shell
//! hook. Grounded on `mqtt/mod.rs`'s `Transmission`-consuming manager loop,
//! generalized from "publish to an MQTT topic" to "render to text/shell".
use log::{error, info};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Command;
use tokio::sync::mpsc::{Receiver, Sender};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Human,
    Fields,
    Json,
}

#[derive(Debug, Clone)]
pub struct Reading {
    pub meter_name: String,
    pub id: String,
    pub fields: Map<String, Value>,
    /// Unit suffix per field name, used by the `Human` format. Fields absent
    /// from this map (e.g. `name`, `id`, `timestamp`) render without one.
    pub units: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct PrinterConfig {
    pub format: OutputFormat,
    pub separator: char,
    pub meterfiles_dir: Option<PathBuf>,
    pub shells: Vec<String>,
}

impl Default for PrinterConfig {
    fn default() -> Self {
        PrinterConfig {
            format: OutputFormat::Human,
            separator: ';',
            meterfiles_dir: None,
            shells: Vec::new(),
        }
    }
}

/// Renders one reading per `config.format`. Field order for `Fields` and
/// the line shape for `Human` follow the driver's declared field order.
pub fn render(reading: &Reading, config: &PrinterConfig) -> String {
    match config.format {
        OutputFormat::Human => {
            let mut parts = vec![reading.meter_name.clone(), reading.id.clone()];
            for (k, v) in &reading.fields {
                if k == "name" || k == "id" {
                    continue;
                }
                let plain = value_to_plain(v);
                parts.push(match reading.units.get(k) {
                    Some(unit) => format!("{plain} {unit}"),
                    None => plain,
                });
            }
            parts.join("\t")
        }
        OutputFormat::Fields => reading
            .fields
            .values()
            .map(value_to_plain)
            .collect::<Vec<_>>()
            .join(&config.separator.to_string()),
        OutputFormat::Json => serde_json::to_string(&reading.fields).unwrap_or_default(),
    }
}

fn value_to_plain(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => "".to_string(),
        other => other.to_string(),
    }
}

fn write_meterfile(reading: &Reading, config: &PrinterConfig) {
    let Some(dir) = &config.meterfiles_dir else { return };
    let path = dir.join(&reading.meter_name);
    let line = render(reading, config) + "\n";
    if let Err(e) = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .and_then(|mut f| {
            use std::io::Write;
            f.write_all(line.as_bytes())
        })
    {
        error!("failed writing meter file {}: {e}", path.display());
    }
}

fn run_shell_hooks(reading: &Reading, config: &PrinterConfig) {
    for shell in &config.shells {
        let mut cmd = Command::new("/bin/sh");
        cmd.arg("-c").arg(shell);
        cmd.env("METER_id", &reading.id);
        cmd.env("METER_name", &reading.meter_name);
        cmd.env(
            "METER_jsonfull",
            serde_json::to_string(&reading.fields).unwrap_or_default(),
        );
        for (k, v) in &reading.fields {
            cmd.env(format!("METER_{k}"), value_to_plain(v));
        }
        match cmd.spawn() {
            Ok(mut child) => {
                // Reaping happens asynchronously; we never block the loop
                // waiting on a shell hook to finish.
                tokio::spawn(async move {
                    let _ = tokio::task::spawn_blocking(move || child.wait()).await;
                });
            }
            Err(e) => error!("failed to spawn shell hook: {e}"),
        }
    }
}

pub struct PrinterManager {
    config: PrinterConfig,
    receiver: Receiver<Reading>,
}

impl PrinterManager {
    pub fn new(config: PrinterConfig) -> (Self, Sender<Reading>) {
        let (tx, rx) = tokio::sync::mpsc::channel(16);
        (PrinterManager { config, receiver: rx }, tx)
    }

    pub async fn start_thread(&mut self) {
        info!("printer starting, format {:?}", self.config.format);
        while let Some(reading) = self.receiver.recv().await {
            println!("{}", render(&reading, &self.config));
            write_meterfile(&reading, &self.config);
            run_shell_hooks(&reading, &self.config);
        }
    }
}
