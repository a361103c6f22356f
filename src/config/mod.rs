//! Configuration: CLI argument parsing plus `/etc/wmbusmeters.conf` and
//! `/etc/wmbusmeters.d/*` key=value file parsing. Grounded on the
//! teacher's `ConfigHolder` / `lazy_static! CONFIG: RwLock<...>` pattern,
//! adapted from YAML to the key=value format this program's config files
//! use, and on the teacher's existing `walkdir` dependency for scanning
//! the meter-definitions directory.
use crate::meter::MeterInfo;
use crate::printer::OutputFormat;
use lazy_static::lazy_static;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("usage: wmbusmeters [flags] <device> <name> <id> <key> [...]")]
    Usage,
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{file}:{line}: malformed key=value line: {text}")]
    MalformedLine {
        file: String,
        line: usize,
        text: String,
    },
    #[error("key must be exactly 32 hex characters (16 bytes), got {0}")]
    InvalidKeyLength(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub enum LogLevel {
    Silent,
    Normal,
    Verbose,
    Debug,
}

#[derive(Debug, Clone)]
pub struct MainConfig {
    pub loglevel: LogLevel,
    pub device: Option<String>,
    pub format: OutputFormat,
    pub separator: char,
    pub meterfiles: bool,
    pub meterfiles_dir: Option<PathBuf>,
    pub logtelegrams: bool,
    pub shells: Vec<String>,
    pub oneshot: bool,
}

impl Default for MainConfig {
    fn default() -> Self {
        MainConfig {
            loglevel: LogLevel::Normal,
            device: None,
            format: OutputFormat::Human,
            separator: ';',
            meterfiles: false,
            meterfiles_dir: None,
            logtelegrams: false,
            shells: Vec::new(),
            oneshot: false,
        }
    }
}

pub struct ConfigHolder {
    pub main: MainConfig,
    pub meters: Vec<MeterInfo>,
}

lazy_static! {
    pub static ref CONFIG: RwLock<ConfigHolder> = RwLock::new(ConfigHolder {
        main: MainConfig::default(),
        meters: Vec::new(),
    });
}

fn parse_key_value_lines(path: &Path) -> Result<Vec<(String, String)>, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.display().to_string(),
        source: e,
    })?;

    let mut pairs = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match line.split_once('=') {
            Some((k, v)) => pairs.push((k.trim().to_string(), v.trim().to_string())),
            None => {
                return Err(ConfigError::MalformedLine {
                    file: path.display().to_string(),
                    line: idx + 1,
                    text: line.to_string(),
                })
            }
        }
    }
    Ok(pairs)
}

fn parse_key_hex(value: &str) -> Result<[u8; 16], ConfigError> {
    let bytes = hex::decode(value).map_err(|_| ConfigError::InvalidKeyLength(value.len()))?;
    if bytes.len() != 16 {
        return Err(ConfigError::InvalidKeyLength(bytes.len()));
    }
    let mut key = [0u8; 16];
    key.copy_from_slice(&bytes);
    Ok(key)
}

/// Parses `/etc/wmbusmeters.conf`'s `key=value` lines into a `MainConfig`.
pub fn parse_main_conf(path: &Path) -> Result<MainConfig, ConfigError> {
    let mut config = MainConfig::default();
    for (key, value) in parse_key_value_lines(path)? {
        match key.as_str() {
            "loglevel" => {
                config.loglevel = match value.as_str() {
                    "silent" => LogLevel::Silent,
                    "verbose" => LogLevel::Verbose,
                    "debug" => LogLevel::Debug,
                    _ => LogLevel::Normal,
                }
            }
            "device" => config.device = Some(value),
            "format" => {
                config.format = match value.as_str() {
                    "fields" => OutputFormat::Fields,
                    "json" => OutputFormat::Json,
                    _ => OutputFormat::Human,
                }
            }
            "separator" => config.separator = value.chars().next().unwrap_or(';'),
            "meterfiles" => config.meterfiles = value == "true" || value == "1",
            "meterfiles_dir" => config.meterfiles_dir = Some(PathBuf::from(value)),
            "logtelegrams" => config.logtelegrams = value == "true" || value == "1",
            "oneshot" => config.oneshot = value == "true" || value == "1",
            "shell" => config.shells.push(value),
            _ => { /* unknown keys are forward-compatible no-ops */ }
        }
    }
    Ok(config)
}

/// Parses one `/etc/wmbusmeters.d/<name>` meter definition file.
pub fn parse_meter_file(path: &Path) -> Result<MeterInfo, ConfigError> {
    let mut name = String::new();
    let mut driver_name = "auto".to_string();
    let mut id_pattern = "*".to_string();
    let mut key: Option<[u8; 16]> = None;

    for (k, v) in parse_key_value_lines(path)? {
        match k.as_str() {
            "name" => name = v,
            "type" => driver_name = v,
            "id" => id_pattern = v,
            "key" if !v.is_empty() => key = Some(parse_key_hex(&v)?),
            _ => {}
        }
    }

    Ok(MeterInfo {
        name,
        driver_name,
        id_pattern,
        key,
        shells: Vec::new(),
    })
}

/// Scans a `wmbusmeters.d`-style directory for meter definition files.
pub fn load_meter_definitions(dir: &Path) -> Vec<MeterInfo> {
    let mut meters = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let Ok(entry) = entry else { continue };
        if !entry.file_type().is_file() {
            continue;
        }
        match parse_meter_file(entry.path()) {
            Ok(meter) => meters.push(meter),
            Err(e) => log::warn!("skipping {}: {e}", entry.path().display()),
        }
    }
    meters
}

/// Parses the legacy positional CLI form:
/// `<usb-device> <name> <id> <key> [<name> <id> <key> ...]`, with flags
/// allowed anywhere before the positional arguments.
pub fn parse_cli(args: &[String]) -> Result<(MainConfig, Vec<MeterInfo>), ConfigError> {
    let mut config = MainConfig::default();
    let mut rest: Vec<String> = Vec::new();

    for arg in args {
        match arg.as_str() {
            "--silence" => config.loglevel = LogLevel::Silent,
            "--verbose" => config.loglevel = LogLevel::Verbose,
            "--debug" => config.loglevel = LogLevel::Debug,
            "--meterfiles" => config.meterfiles = true,
            "--oneshot" => config.oneshot = true,
            "--logtelegrams" => config.logtelegrams = true,
            s if s.starts_with("--meterfiles=") => {
                config.meterfiles = true;
                config.meterfiles_dir = Some(PathBuf::from(&s["--meterfiles=".len()..]));
            }
            s if s.starts_with("--format=") => {
                config.format = match &s["--format=".len()..] {
                    "fields" => OutputFormat::Fields,
                    "json" => OutputFormat::Json,
                    _ => OutputFormat::Human,
                };
            }
            s if s.starts_with("--separator=") => {
                config.separator = s["--separator=".len()..].chars().next().unwrap_or(';');
            }
            s if s.starts_with("--shell=") => config.shells.push(s["--shell=".len()..].to_string()),
            "-h" | "--help" => return Err(ConfigError::Usage),
            other => rest.push(other.to_string()),
        }
    }

    if rest.is_empty() {
        return Err(ConfigError::Usage);
    }
    config.device = Some(rest.remove(0));

    if rest.len() % 3 != 0 {
        return Err(ConfigError::Usage);
    }

    let mut meters = Vec::new();
    for chunk in rest.chunks(3) {
        let name = chunk[0].clone();
        let id = chunk[1].clone();
        let key_hex = chunk[2].clone();
        let key = if key_hex.is_empty() { None } else { Some(parse_key_hex(&key_hex)?) };
        meters.push(MeterInfo {
            name,
            driver_name: "auto".to_string(),
            id_pattern: id,
            key,
            shells: Vec::new(),
        });
    }

    Ok((config, meters))
}
