//! Data Information Block / Value Information Block (DIF/VIF) parser.
//!
//! Walks the decrypted application payload one record at a time and
//! materializes a lookup map of `DVEntry`s, keyed by the hex of the full
//! DIF(+DIFE)+VIF(+VIFE) byte sequence. Drivers then resolve fields out of
//! this map by semantic lookup (`find`) rather than by raw key, since the
//! same physical quantity can be encoded with different DIF/VIF bytes
//! across meter firmware revisions.
use log::debug;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum DvParseError {
    #[error("payload ended in the middle of a DIF/DIFE/VIF/VIFE sequence")]
    Truncated,
    #[error("payload ended in the middle of a data value")]
    TruncatedValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MeasurementType {
    Instantaneous,
    Maximum,
    Minimum,
    AtError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VifRange {
    Energy,
    Volume,
    Mass,
    OnTime,
    OperatingTime,
    Power,
    VolumeFlow,
    VolumeFlowExt,
    MassFlow,
    FlowTemperature,
    ReturnTemperature,
    TemperatureDifference,
    ExternalTemperature,
    Pressure,
    Date,
    DateTime,
    HcaUnits,
    AveragingDuration,
    ActualityDuration,
    ErrorFlags,
    DigitalInput,
    DigitalOutput,
    Manufacturer,
    FirmwareVersion,
    AnyVIF,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum DataFormat {
    NoData,
    Int(usize),
    Bcd(usize),
    Real,
    Lvar,
}

/// One parsed DIF/VIF record.
#[derive(Debug, Clone)]
pub struct DVEntry {
    pub difvif_key: String,
    pub offset: usize,
    pub measurement_type: MeasurementType,
    pub storage_nr: u32,
    pub tariff_nr: u32,
    pub subunit_nr: u32,
    pub vif_range: VifRange,
    pub scale_exponent: i32,
    format: DataFormat,
    /// Raw value bytes as they appeared on the wire (little-endian, except
    /// BCD which is read high-nibble-first per digit).
    pub value: Vec<u8>,
}

fn data_format_for_dif(dif_low: u8) -> DataFormat {
    match dif_low {
        0x0 => DataFormat::NoData,
        0x1 => DataFormat::Int(1),
        0x2 => DataFormat::Int(2),
        0x3 => DataFormat::Int(3),
        0x4 => DataFormat::Int(4),
        0x5 => DataFormat::Real,
        0x6 => DataFormat::Int(6),
        0x7 => DataFormat::Int(8),
        0x8 => DataFormat::NoData,
        0x9 => DataFormat::Bcd(1),
        0xA => DataFormat::Bcd(2),
        0xB => DataFormat::Bcd(3),
        0xC => DataFormat::Bcd(4),
        0xD => DataFormat::Lvar,
        0xE => DataFormat::Bcd(6),
        0xF => DataFormat::NoData,
        _ => unreachable!("dif low nibble is always 0..=0xF"),
    }
}

fn measurement_type_for(dif: u8) -> MeasurementType {
    match (dif >> 4) & 0x3 {
        0b00 => MeasurementType::Instantaneous,
        0b01 => MeasurementType::Maximum,
        0b10 => MeasurementType::Minimum,
        _ => MeasurementType::AtError,
    }
}

struct VifInfo {
    range: VifRange,
    scale_exponent: i32,
}

fn vif_info(vif: u8, vife: Option<u8>) -> VifInfo {
    let primary = vif & 0x7F;
    // See https://m-bus.com/documentation-wired/08-appendix for the base table.
    match primary {
        0b0000_0000..=0b0000_0111 => VifInfo {
            range: VifRange::Energy,
            scale_exponent: (primary as i32 & 0x7) - 3,
        },
        0b0001_0000..=0b0001_0111 => VifInfo {
            range: VifRange::Volume,
            scale_exponent: (primary as i32 & 0x7) - 6,
        },
        0b0001_1000..=0b0001_1111 => VifInfo {
            range: VifRange::Mass,
            scale_exponent: (primary as i32 & 0x7) - 3,
        },
        0b0010_0000 => VifInfo {
            range: VifRange::OnTime,
            scale_exponent: 0,
        },
        0b0010_0100..=0b0010_0111 => VifInfo {
            range: VifRange::OperatingTime,
            scale_exponent: 0,
        },
        0b0010_1000..=0b0010_1111 => VifInfo {
            range: VifRange::Power,
            scale_exponent: (primary as i32 & 0x7) - 3,
        },
        0b0011_1000..=0b0011_1111 => VifInfo {
            range: VifRange::VolumeFlow,
            scale_exponent: (primary as i32 & 0x7) - 6,
        },
        0b0100_0000..=0b0100_0111 => VifInfo {
            range: VifRange::VolumeFlowExt,
            scale_exponent: (primary as i32 & 0x7) - 7,
        },
        0b0101_0000..=0b0101_0111 => VifInfo {
            range: VifRange::MassFlow,
            scale_exponent: (primary as i32 & 0x7) - 3,
        },
        0b0101_1000..=0b0101_1011 => VifInfo {
            range: VifRange::FlowTemperature,
            scale_exponent: (primary as i32 & 0x3) - 3,
        },
        0b0101_1100..=0b0101_1111 => VifInfo {
            range: VifRange::ReturnTemperature,
            scale_exponent: (primary as i32 & 0x3) - 3,
        },
        0b0110_0000..=0b0110_0011 => VifInfo {
            range: VifRange::TemperatureDifference,
            scale_exponent: (primary as i32 & 0x3) - 3,
        },
        0b0110_0100..=0b0110_0111 => VifInfo {
            range: VifRange::ExternalTemperature,
            scale_exponent: (primary as i32 & 0x3) - 3,
        },
        0b0110_1000..=0b0110_1011 => VifInfo {
            range: VifRange::Pressure,
            scale_exponent: (primary as i32 & 0x3) - 3,
        },
        0b0110_1100 => VifInfo {
            range: VifRange::Date,
            scale_exponent: 0,
        },
        0b0110_1101 => VifInfo {
            range: VifRange::DateTime,
            scale_exponent: 0,
        },
        0b0110_1110 => VifInfo {
            range: VifRange::HcaUnits,
            scale_exponent: 0,
        },
        0b0111_0000..=0b0111_0011 => VifInfo {
            range: VifRange::AveragingDuration,
            scale_exponent: 0,
        },
        0b0111_0100..=0b0111_0111 => VifInfo {
            range: VifRange::ActualityDuration,
            scale_exponent: 0,
        },
        _ => match vife {
            Some(ext) if ext & 0x7F == 0x17 => VifInfo {
                range: VifRange::ErrorFlags,
                scale_exponent: 0,
            },
            Some(ext) if ext & 0x7F == 0x1A => VifInfo {
                range: VifRange::DigitalOutput,
                scale_exponent: 0,
            },
            Some(ext) if ext & 0x7F == 0x1B => VifInfo {
                range: VifRange::DigitalInput,
                scale_exponent: 0,
            },
            Some(ext) if ext & 0x7F == 0x09 => VifInfo {
                range: VifRange::Manufacturer,
                scale_exponent: 0,
            },
            Some(ext) if ext & 0x7F == 0x0E => VifInfo {
                range: VifRange::FirmwareVersion,
                scale_exponent: 0,
            },
            _ => VifInfo {
                range: VifRange::Unknown,
                scale_exponent: 0,
            },
        },
    }
}

fn bcd_to_u64(bytes: &[u8]) -> u64 {
    let mut result: u64 = 0;
    for &byte in bytes.iter().rev() {
        let high = (byte >> 4) & 0x0F;
        let low = byte & 0x0F;
        result = result * 100 + (high * 10 + low) as u64;
    }
    result
}

/// Parses the full record map out of one telegram's plaintext content.
pub fn parse(content: &[u8]) -> Result<HashMap<String, DVEntry>, DvParseError> {
    let mut map = HashMap::new();
    let mut pos = 0usize;
    let mut dup_index: HashMap<String, u32> = HashMap::new();

    while pos < content.len() {
        let key_start = pos;
        let dif = content[pos];
        pos += 1;

        if dif == 0x0F || dif == 0x1F {
            // Manufacturer-specific data: the remainder is opaque to this parser.
            debug!("manufacturer-specific data at offset {pos}, stopping structured parse");
            break;
        }
        if dif == 0x2F {
            continue; // idle filler
        }
        if (0x3F..=0x6F).contains(&dif) {
            // Reserved DIF range: skip the byte already consumed above and move on,
            // rather than running it through `data_format_for_dif` as a bogus length class.
            debug!("reserved DIF 0x{dif:02X} at offset {key_start}, skipping one byte");
            continue;
        }

        let mut storage_nr: u32 = ((dif >> 6) & 0x1) as u32;
        let mut tariff_nr: u32 = 0;
        let mut subunit_nr: u32 = 0;

        let mut more_dife = dif & 0x80 != 0;
        let mut shift = 1u32;
        while more_dife {
            if pos >= content.len() {
                return Err(DvParseError::Truncated);
            }
            let dife = content[pos];
            pos += 1;
            storage_nr |= ((dife & 0x0F) as u32) << (shift * 4 - 3);
            tariff_nr |= ((dife >> 4) & 0x03) as u32 << ((shift - 1) * 2);
            subunit_nr |= ((dife >> 6) & 0x01) as u32 << (shift - 1);
            more_dife = dife & 0x80 != 0;
            shift += 1;
        }

        if pos >= content.len() {
            return Err(DvParseError::Truncated);
        }
        let vif = content[pos];
        pos += 1;
        let mut vife: Option<u8> = None;
        if vif & 0x80 != 0 {
            if pos >= content.len() {
                return Err(DvParseError::Truncated);
            }
            vife = Some(content[pos]);
            pos += 1;
            while vife.unwrap() & 0x80 != 0 {
                if pos >= content.len() {
                    return Err(DvParseError::Truncated);
                }
                pos += 1; // additional VIFE extension bytes are consumed but not interpreted further
            }
        }

        let format = data_format_for_dif(dif & 0x0F);
        let value_start = pos;
        let (consumed, value) = match format {
            DataFormat::NoData => (0, Vec::new()),
            DataFormat::Int(n) => {
                if pos + n > content.len() {
                    return Err(DvParseError::TruncatedValue);
                }
                (n, content[pos..pos + n].to_vec())
            }
            DataFormat::Real => {
                if pos + 4 > content.len() {
                    return Err(DvParseError::TruncatedValue);
                }
                (4, content[pos..pos + 4].to_vec())
            }
            DataFormat::Bcd(n) => {
                if pos + n > content.len() {
                    return Err(DvParseError::TruncatedValue);
                }
                (n, content[pos..pos + n].to_vec())
            }
            DataFormat::Lvar => {
                if pos >= content.len() {
                    return Err(DvParseError::TruncatedValue);
                }
                let len = content[pos] as usize;
                if pos + 1 + len > content.len() {
                    return Err(DvParseError::TruncatedValue);
                }
                (1 + len, content[pos + 1..pos + 1 + len].to_vec())
            }
        };
        pos += consumed;

        let info = vif_info(vif, vife);
        let mut key = hex::encode_upper(&content[key_start..value_start]);

        if map.contains_key(&key) {
            let counter = dup_index.entry(key.clone()).or_insert(1);
            *counter += 1;
            key = format!("{key}#{counter}");
        } else {
            dup_index.insert(key.clone(), 1);
        }

        map.insert(
            key.clone(),
            DVEntry {
                difvif_key: key,
                offset: value_start,
                measurement_type: measurement_type_for(dif),
                storage_nr,
                tariff_nr,
                subunit_nr,
                vif_range: info.range,
                scale_exponent: info.scale_exponent,
                format,
                value,
            },
        );
    }

    Ok(map)
}

/// Finds the first entry matching the given semantic filters. `storage_nr`
/// and `tariff_nr` of `None` match any value.
pub fn find<'a>(
    map: &'a HashMap<String, DVEntry>,
    measurement_type: MeasurementType,
    vif_range: VifRange,
    storage_nr: Option<u32>,
    tariff_nr: Option<u32>,
) -> Option<&'a DVEntry> {
    map.values().find(|e| {
        e.measurement_type == measurement_type
            && e.vif_range == vif_range
            && storage_nr.map_or(true, |s| s == e.storage_nr)
            && tariff_nr.map_or(true, |t| t == e.tariff_nr)
    })
}

/// Finds the `index`-th (1-based) entry matching the filters, for meters
/// whose firmware repeats a DIF/VIF combination across multiple records
/// (e.g. warm/cold water on the same physical line).
pub fn find_indexed<'a>(
    map: &'a HashMap<String, DVEntry>,
    measurement_type: MeasurementType,
    vif_range: VifRange,
    index: u32,
) -> Option<&'a DVEntry> {
    let mut matches: Vec<&DVEntry> = map
        .values()
        .filter(|e| e.measurement_type == measurement_type && e.vif_range == vif_range)
        .collect();
    matches.sort_by_key(|e| e.offset);
    matches.into_iter().nth((index.saturating_sub(1)) as usize)
}

fn raw_uint(entry: &DVEntry) -> u64 {
    match entry.format {
        DataFormat::Bcd(_) => bcd_to_u64(&entry.value),
        _ => {
            let mut v: u64 = 0;
            for (i, &b) in entry.value.iter().enumerate() {
                v |= (b as u64) << (8 * i);
            }
            v
        }
    }
}

pub fn extract_uint16(entry: &DVEntry) -> u16 {
    raw_uint(entry) as u16
}

pub fn extract_uint32(entry: &DVEntry) -> u32 {
    raw_uint(entry) as u32
}

pub fn extract_uint64(entry: &DVEntry) -> u64 {
    raw_uint(entry)
}

/// Interprets the raw value as a signed, scaled decimal quantity. BCD and
/// integer encodings are both treated as unsigned; real (IEEE-754) is
/// passed through as-is by the caller, since no implemented driver uses it.
pub fn extract_double(entry: &DVEntry, auto_scale: bool) -> f64 {
    let raw = raw_uint(entry) as f64;
    if auto_scale {
        raw * 10f64.powi(entry.scale_exponent)
    } else {
        raw
    }
}

/// Reverses the byte order of an LVAR value and decodes it as ASCII, per
/// the wM-Bus convention for vendor/customer string fields.
pub fn extract_string(entry: &DVEntry) -> String {
    let reversed: Vec<u8> = entry.value.iter().rev().copied().collect();
    String::from_utf8_lossy(&reversed).to_string()
}

pub fn extract_hex_string(entry: &DVEntry) -> String {
    hex::encode_upper(&entry.value)
}

/// Decodes a type G (16 bit date) or type F (32 bit date+time) field into
/// an ISO-8601-ish string. Mirrors the bit layout used across the EN 13757
/// driver set: `yyyy mmmm yyyd dddd` for type G, with an extra hour/minute
/// byte pair prepended for type F.
pub fn extract_date(entry: &DVEntry) -> Option<String> {
    let raw = raw_uint(entry);
    match entry.value.len() {
        2 => Some(decode_type_g(raw as u32)),
        4 => Some(decode_type_f(raw as u32)),
        _ => None,
    }
}

fn decode_year(low_word: u32, high_word: u32) -> u32 {
    let year_low = (low_word & 0xE0) >> 5;
    let year_high = (high_word & 0xF0) >> 1;
    let mut year = year_low | year_high;
    let mut century = (low_word & 0x60) >> 5;
    if century == 0 && year <= 80 {
        century = 1;
    }
    1900 + 100 * century + year
}

fn decode_type_g(time: u32) -> String {
    let day = time & 0x1F;
    let month = (time >> 8) & 0x0F;
    let year = decode_year(time & 0xFF, (time >> 8) & 0xFF);
    format!("{day:02}.{month:02}.{year:04}")
}

fn decode_type_f(time: u32) -> String {
    let min = time & 0x3F;
    let hour = (time >> 8) & 0x1F;
    let day = (time >> 16) & 0x1F;
    let month = (time >> 24) & 0x0F;
    let year = decode_year((time >> 16) & 0xFF, (time >> 24) & 0xFF);
    format!("{day:02}.{month:02}.{year:04} {hour:02}:{min:02}")
}
