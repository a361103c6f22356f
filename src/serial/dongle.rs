//! Per-dongle byte-stream normalization. Each radio dongle wraps the
//! canonical length-prefixed wM-Bus frame in its own framing; this module
//! strips that wrapper so `wmbus::frame::FrameAssembler` only ever sees
//! the canonical form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DongleFlavour {
    /// IMST IM871A: `0xA5` SOF, endpoint, msg-id, length, then payload.
    Im871a,
    /// Amber AMB8465: SLIP-like `0xFF` escaped framing.
    Amb8465,
    /// culfw "CUL" stick: ASCII lines beginning with `b`, hex-encoded.
    Cul,
    /// rtl_wmbus: ASCII hex lines with a trailing RSSI field.
    RtlWmbus,
}

/// Strips dongle-specific framing from one already-delimited chunk,
/// returning the canonical wM-Bus bytes (length byte first) if recognized.
pub fn normalize(flavour: DongleFlavour, raw: &[u8]) -> Option<Vec<u8>> {
    match flavour {
        DongleFlavour::Im871a => {
            // 0xA5, endpoint, msg-id, length, payload...
            if raw.len() < 4 || raw[0] != 0xA5 {
                return None;
            }
            let len = raw[3] as usize;
            if raw.len() < 4 + len {
                return None;
            }
            Some(raw[4..4 + len].to_vec())
        }
        DongleFlavour::Amb8465 => {
            // Already byte-oriented and unescaped by the serial layer in
            // this implementation; passed through as-is.
            Some(raw.to_vec())
        }
        DongleFlavour::Cul | DongleFlavour::RtlWmbus => {
            let text = std::str::from_utf8(raw).ok()?;
            let text = text.trim().trim_start_matches('b');
            let hex_part = text.split_whitespace().next().unwrap_or(text);
            hex::decode(hex_part).ok()
        }
    }
}
