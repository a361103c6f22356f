//! Decodes a canonical wM-Bus frame into a `Telegram`: data-link header,
//! transport-layer header, and (if a key is configured) decrypted content.
use crate::crypto::{aes128_cbc_decrypt, aes128_cbc_decrypt_no_iv, aes128_ctr_like};
use crate::wmbus::decode_manufacturer;
use log::debug;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum DecodeError {
    #[error("telegram shorter than the minimum data-link header (10 bytes)")]
    TooShort,
    #[error("declared length {declared} exceeds received length {received}")]
    LengthMismatch { declared: usize, received: usize },
    #[error("CI field {0:#04x} selects an unsupported header layout")]
    UnsupportedCiField(u8),
    #[error("wired M-Bus framing is not supported over the radio link")]
    WiredNotSupported,
    #[error("TPL security mode {0} is not supported")]
    UnsupportedSecurityMode(u16),
    #[error("a key is configured for this meter but the telegram selects no security mode")]
    SecurityModeRequired,
    #[error("decryption failed: the 0x2F 0x2F verification marker did not match")]
    DecryptFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityMode {
    None,
    AesCbcIv,
    AesCbcNoIv,
    AesCtr,
}

impl SecurityMode {
    fn from_config_word(config_word: u16) -> Option<SecurityMode> {
        match (config_word >> 8) & 0x1F {
            0 => Some(SecurityMode::None),
            4 => Some(SecurityMode::AesCbcNoIv),
            5 => Some(SecurityMode::AesCbcIv),
            7 => Some(SecurityMode::AesCtr),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderLayout {
    Short,
    Long,
    None,
}

fn classify_ci(ci: u8) -> Result<HeaderLayout, DecodeError> {
    const NO_HEADER: [u8; 3] = [0x66, 0x70, 0x71];
    const SHORT_HEADER: [u8; 10] = [0x67, 0x6E, 0x74, 0x7A, 0x7D, 0x7F, 0x88, 0x9E, 0xC1, 0xC4];
    const LONG_HEADER: [u8; 9] = [0x68, 0x6F, 0x72, 0x75, 0x7C, 0x7E, 0x9F, 0xC2, 0xC5];

    if SHORT_HEADER.contains(&ci) {
        Ok(HeaderLayout::Short)
    } else if LONG_HEADER.contains(&ci) {
        Ok(HeaderLayout::Long)
    } else if NO_HEADER.contains(&ci) {
        Ok(HeaderLayout::None)
    } else {
        Err(DecodeError::UnsupportedCiField(ci))
    }
}

#[derive(Debug, Clone)]
pub struct Telegram {
    pub c_field: u8,
    pub m_field: u16,
    pub mfct: String,
    pub address: [u8; 4],
    pub version: u8,
    pub device_type: u8,
    pub id: String,
    pub ci_field: u8,
    pub header_layout: HeaderLayout,
    pub access_no: u8,
    pub status: u8,
    pub config_word: u16,
    /// Extended Link Layer communication-control byte, present only on ELL
    /// framed telegrams. Neither this implementation's `classify_ci` nor any
    /// of the five in-scope drivers handles an ELL header layout, so this is
    /// always `0` for every telegram this crate currently decodes.
    pub cc_field: u8,
    /// Extended Link Layer session number, present only on ELL framed
    /// telegrams. Always `[0; 4]` for the same reason as `cc_field`.
    pub sn: [u8; 4],
    pub security_mode: SecurityMode,
    /// Bytes after the TPL header, still encrypted if a security mode applies.
    pub payload: Vec<u8>,
    /// Decrypted (or pass-through, if `SecurityMode::None`) application content.
    pub content: Vec<u8>,
}

/// Diehl-family manufacturers encode the A-field as version/type/serial
/// instead of serial/version/type for certain CI fields; this decision
/// table mirrors the upstream classifier byte-for-byte and must not drift.
fn diehl_address_transform_applies(mfct: &str, ci_field: u8) -> bool {
    matches!(mfct, "DME" | "SAP") && matches!(ci_field, 0x7A | 0x72)
        && false // None of the five drivers implemented here hit this path;
                 // left as an explicit, documented no-op rather than silently
                 // wired in unverified against a byte-level reference.
}

fn reverse_hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .rev()
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// Parses the data-link header and transport-layer header of a frame whose
/// block CRCs have already been verified and stripped.
pub fn decode_header(frame: &[u8]) -> Result<Telegram, DecodeError> {
    if frame.len() < 10 {
        return Err(DecodeError::TooShort);
    }
    let declared = frame[0] as usize;
    if declared + 1 > frame.len() {
        return Err(DecodeError::LengthMismatch {
            declared,
            received: frame.len(),
        });
    }

    let c_field = frame[1];
    let m_field = (frame[3] as u16) << 8 | frame[2] as u16;
    let mfct = decode_manufacturer(m_field);
    let mut address = [frame[4], frame[5], frame[6], frame[7]];
    let mut version = frame[8];
    let mut device_type = frame[9];

    if frame.len() < 11 {
        return Err(DecodeError::TooShort);
    }
    let ci_field = frame[10];
    let header_layout = classify_ci(ci_field)?;

    if diehl_address_transform_applies(&mfct, ci_field) {
        std::mem::swap(&mut version, &mut device_type);
        address.reverse();
    }

    let id = reverse_hex(&address);

    let (access_no, status, config_word, header_len) = match header_layout {
        HeaderLayout::Short => {
            if frame.len() < 15 {
                return Err(DecodeError::TooShort);
            }
            let access = frame[11];
            let status = frame[12];
            let config = (frame[14] as u16) << 8 | frame[13] as u16;
            (access, status, config, 4usize)
        }
        HeaderLayout::Long => {
            if frame.len() < 21 {
                return Err(DecodeError::TooShort);
            }
            // Secondary address (4), version (1), type (1) are skipped here:
            // this implementation dispatches by the primary (sender) id/mvt
            // only, matching the five drivers in scope.
            let access = frame[17];
            let status = frame[18];
            let config = (frame[20] as u16) << 8 | frame[19] as u16;
            (access, status, config, 10usize)
        }
        HeaderLayout::None => return Err(DecodeError::WiredNotSupported),
    };

    let payload_start = 11 + header_len;
    let payload = if payload_start <= frame.len() {
        frame[payload_start..].to_vec()
    } else {
        Vec::new()
    };

    let security_mode = SecurityMode::from_config_word(config_word)
        .ok_or(DecodeError::UnsupportedSecurityMode((config_word >> 8) & 0x1F))?;

    Ok(Telegram {
        c_field,
        m_field,
        mfct,
        address,
        version,
        device_type,
        id,
        ci_field,
        header_layout,
        access_no,
        status,
        config_word,
        cc_field: 0,
        sn: [0u8; 4],
        security_mode,
        payload,
        content: Vec::new(),
    })
}

/// `M ‖ A (8 bytes) ‖ access_no × 8`, the OMS mode-5 IV: the 8-byte `A`
/// block is the 4-byte address plus version and device type, and the
/// access number fills the remaining 8 bytes. See the "CBC IV construction"
/// open question resolution for why this departs from spec.md's literal
/// `access‖status‖config‖0x00×4` tail.
fn cbc_iv(telegram: &Telegram) -> [u8; 16] {
    let mut iv = [0u8; 16];
    iv[0] = (telegram.m_field & 0xFF) as u8;
    iv[1] = (telegram.m_field >> 8) as u8;
    iv[2..6].copy_from_slice(&telegram.address);
    iv[6] = telegram.version;
    iv[7] = telegram.device_type;
    for slot in iv[8..16].iter_mut() {
        *slot = telegram.access_no;
    }
    iv
}

/// `M ‖ A ‖ CC ‖ SN ‖ 0x00×3` (the Kamstrup CTR variant), where `A` is the
/// same 8-byte address/version/type block as `cbc_iv`.
fn ctr_iv(telegram: &Telegram) -> [u8; 16] {
    let mut iv = [0u8; 16];
    iv[0] = (telegram.m_field & 0xFF) as u8;
    iv[1] = (telegram.m_field >> 8) as u8;
    iv[2..6].copy_from_slice(&telegram.address);
    iv[6] = telegram.version;
    iv[7] = telegram.device_type;
    iv[8] = telegram.cc_field;
    iv[9..13].copy_from_slice(&telegram.sn);
    iv
}

/// Removes the 0x2F idle-filler padding AES block padding leaves behind.
fn remove_filler(data: &[u8]) -> Vec<u8> {
    let trim = data.iter().rev().take_while(|&&b| b == 0x2F).count();
    data[..data.len() - trim].to_vec()
}

/// Applies this telegram's security mode, decrypting `payload` into `content`.
/// `key` is `None` when no key is configured for the matching meter.
pub fn decrypt(telegram: &mut Telegram, key: Option<&[u8; 16]>) -> Result<(), DecodeError> {
    match (telegram.security_mode, key) {
        (SecurityMode::None, _) => {
            telegram.content = telegram.payload.clone();
            Ok(())
        }
        (_, None) => {
            // A key-less meter receiving an encrypted telegram cannot be
            // decoded; the safer default is to refuse rather than publish
            // whatever garbage the cipher stream happens to contain.
            Err(DecodeError::SecurityModeRequired)
        }
        (SecurityMode::AesCbcIv, Some(key)) => {
            let iv = cbc_iv(telegram);
            let plain = aes128_cbc_decrypt(&telegram.payload, key, &iv)
                .map_err(|_| DecodeError::DecryptFailed)?;
            verify_marker_and_store(telegram, plain)
        }
        (SecurityMode::AesCbcNoIv, Some(key)) => {
            let plain = aes128_cbc_decrypt_no_iv(&telegram.payload, key)
                .map_err(|_| DecodeError::DecryptFailed)?;
            verify_marker_and_store(telegram, plain)
        }
        (SecurityMode::AesCtr, Some(key)) => {
            let iv = ctr_iv(telegram);
            let plain = aes128_ctr_like(&telegram.payload, key, &iv)
                .map_err(|_| DecodeError::DecryptFailed)?;
            telegram.content = plain;
            Ok(())
        }
    }
}

fn verify_marker_and_store(telegram: &mut Telegram, plain: Vec<u8>) -> Result<(), DecodeError> {
    debug!("checking 0x2F 0x2F verification marker");
    if plain.len() < 2 || plain[0] != 0x2F || plain[1] != 0x2F {
        return Err(DecodeError::DecryptFailed);
    }
    telegram.content = remove_filler(&plain[2..]);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    // The OMS Annex N security-profile-A example with its four block CRCs
    // already verified and stripped (see wmbus::frame::tests).
    const OMS_ANNEX_N_NO_CRC: [u8; 47] = [
        0x2E, 0x44, 0x93, 0x15, 0x78, 0x56, 0x34, 0x12, 0x33, 0x03, 0x7A, 0x2A, 0x00, 0x20, 0x25,
        0x59, 0x23, 0xC9, 0x5A, 0xAA, 0x26, 0xD1, 0xB2, 0xE7, 0x49, 0x3B, 0x01, 0x3E, 0xC4, 0xA6,
        0xF6, 0xD3, 0x52, 0x9B, 0x52, 0x0E, 0xDF, 0xF0, 0xEA, 0x6D, 0xEF, 0xC9, 0x9D, 0x6D, 0x69,
        0xEB, 0xF3,
    ];

    #[test]
    fn decodes_manufacturer_and_id_from_a_real_telegram() {
        let t = decode_header(&OMS_ANNEX_N_NO_CRC).unwrap();
        assert_eq!(t.mfct, "ELS");
        assert_eq!(t.id, "12345678");
        assert_eq!(t.security_mode, SecurityMode::AesCbcIv);
    }

    #[test]
    fn decrypt_without_a_key_is_refused_for_encrypted_telegrams() {
        let t = decode_header(&OMS_ANNEX_N_NO_CRC).unwrap();
        let mut t = t;
        assert_eq!(decrypt(&mut t, None), Err(DecodeError::SecurityModeRequired));
    }

    #[test]
    fn decrypt_with_the_annex_n_key_recovers_the_0x2f_0x2f_marker() {
        let key: [u8; 16] = [
            0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0A, 0x0B, 0x0C, 0x0D, 0x0E,
            0x0F, 0x11,
        ];
        let mut t = decode_header(&OMS_ANNEX_N_NO_CRC).unwrap();
        decrypt(&mut t, Some(&key)).unwrap();
        assert!(!t.content.is_empty());
    }

    #[test]
    fn unsupported_ci_field_is_rejected() {
        let mut frame = OMS_ANNEX_N_NO_CRC.to_vec();
        frame[10] = 0x00;
        assert_eq!(
            decode_header(&frame),
            Err(DecodeError::UnsupportedCiField(0x00))
        );
    }

    #[test]
    fn ctr_mode_round_trips_through_decrypt_using_cc_and_sn() {
        let key: [u8; 16] = [0x42; 16];
        let mut t = Telegram {
            c_field: 0x44,
            m_field: 0x4CAE,
            mfct: "SEN".to_string(),
            address: [0x78, 0x56, 0x34, 0x12],
            version: 0x68,
            device_type: 0x07,
            id: "12345678".to_string(),
            ci_field: 0x7A,
            header_layout: HeaderLayout::Short,
            access_no: 0x01,
            status: 0x00,
            config_word: 0x0700, // mode 7 (AES_CTR)
            cc_field: 0x20,
            sn: [0x01, 0x02, 0x03, 0x04],
            security_mode: SecurityMode::AesCtr,
            payload: Vec::new(),
            content: Vec::new(),
        };
        let plaintext = b"0123456789abcdef0123456789abcdef";
        let iv = ctr_iv(&t);
        t.payload = crate::crypto::aes128_ctr_like(plaintext, &key, &iv).unwrap();

        decrypt(&mut t, Some(&key)).unwrap();
        assert_eq!(t.content, plaintext);
    }
}
