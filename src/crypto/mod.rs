//! AES-128 primitives used by the wM-Bus TPL security modes (EN 13757-7).
use aes::cipher::{
    block_padding::NoPadding, generic_array::GenericArray, BlockDecryptMut, BlockEncrypt,
    KeyInit, KeyIvInit,
};
use aes::Aes128;
use thiserror::Error;

type Aes128CbcDec = cbc::Decryptor<Aes128>;

#[derive(Error, Debug, PartialEq)]
pub enum CryptoError {
    #[error("key must be exactly 16 bytes, got {0}")]
    InvalidKeyLength(usize),
    #[error("ciphertext length {0} is not a multiple of 16")]
    NotBlockAligned(usize),
    #[error("decrypt padding rejected the ciphertext")]
    PaddingError,
}

/// Encrypts a single 16 byte block in place with raw AES-128 ECB.
pub fn aes128_ecb_encrypt(block: &[u8; 16], key: &[u8]) -> Result<[u8; 16], CryptoError> {
    if key.len() != 16 {
        return Err(CryptoError::InvalidKeyLength(key.len()));
    }
    let cipher = Aes128::new(GenericArray::from_slice(key));
    let mut b = GenericArray::clone_from_slice(block);
    cipher.encrypt_block(&mut b);
    Ok(b.into())
}

/// CBC decrypt with an explicit IV. No padding is stripped: wM-Bus content
/// is padded with `0x2F` filler bytes by the sender, not PKCS7.
pub fn aes128_cbc_decrypt(ct: &[u8], key: &[u8], iv: &[u8; 16]) -> Result<Vec<u8>, CryptoError> {
    if key.len() != 16 {
        return Err(CryptoError::InvalidKeyLength(key.len()));
    }
    if ct.len() % 16 != 0 {
        return Err(CryptoError::NotBlockAligned(ct.len()));
    }
    let k = GenericArray::clone_from_slice(key);
    let i = GenericArray::clone_from_slice(iv);
    Aes128CbcDec::new(&k.into(), &i.into())
        .decrypt_padded_vec_mut::<NoPadding>(ct)
        .map_err(|_| CryptoError::PaddingError)
}

/// CBC decrypt with an all-zero IV (TPL security mode 4 / "no IV").
pub fn aes128_cbc_decrypt_no_iv(ct: &[u8], key: &[u8]) -> Result<Vec<u8>, CryptoError> {
    aes128_cbc_decrypt(ct, key, &[0u8; 16])
}

/// wM-Bus Mode-1-style CTR decrypt: the IV is ECB-encrypted once per block,
/// XORed over the ciphertext, then incremented big-endian (low byte first)
/// with carry propagation across the whole 16 byte buffer.
pub fn aes128_ctr_like(ct: &[u8], key: &[u8], iv: &[u8; 16]) -> Result<Vec<u8>, CryptoError> {
    if key.len() != 16 {
        return Err(CryptoError::InvalidKeyLength(key.len()));
    }
    let mut out = Vec::with_capacity(ct.len());
    let mut counter = *iv;
    for chunk in ct.chunks(16) {
        let keystream = aes128_ecb_encrypt(&counter, key)?;
        for (i, byte) in chunk.iter().enumerate() {
            out.push(byte ^ keystream[i]);
        }
        increment_iv(&mut counter);
    }
    Ok(out)
}

fn increment_iv(iv: &mut [u8; 16]) {
    for byte in iv.iter_mut().rev() {
        let (next, carry) = byte.overflowing_add(1);
        *byte = next;
        if !carry {
            break;
        }
    }
}

const RB: u8 = 0x87;

fn shift_left_1(block: &[u8; 16]) -> [u8; 16] {
    let mut out = [0u8; 16];
    let mut carry = 0u8;
    for i in (0..16).rev() {
        let b = block[i];
        out[i] = (b << 1) | carry;
        carry = (b >> 7) & 1;
    }
    out
}

/// Derives the two AES-CMAC subkeys K1 and K2 from a key, per NIST SP 800-38B.
pub fn cmac_subkeys(key: &[u8]) -> Result<([u8; 16], [u8; 16]), CryptoError> {
    let l = aes128_ecb_encrypt(&[0u8; 16], key)?;
    let k1 = if l[0] & 0x80 == 0 {
        shift_left_1(&l)
    } else {
        let mut shifted = shift_left_1(&l);
        shifted[15] ^= RB;
        shifted
    };
    let k2 = if k1[0] & 0x80 == 0 {
        shift_left_1(&k1)
    } else {
        let mut shifted = shift_left_1(&k1);
        shifted[15] ^= RB;
        shifted
    };
    Ok((k1, k2))
}

fn xor16(a: &[u8; 16], b: &[u8; 16]) -> [u8; 16] {
    let mut out = [0u8; 16];
    for i in 0..16 {
        out[i] = a[i] ^ b[i];
    }
    out
}

/// Computes an AES-CMAC tag over an arbitrary-length message.
pub fn aes_cmac(key: &[u8], msg: &[u8]) -> Result<[u8; 16], CryptoError> {
    let (k1, k2) = cmac_subkeys(key)?;

    let n_full_blocks = if msg.is_empty() { 0 } else { (msg.len() + 15) / 16 };
    let complete = !msg.is_empty() && msg.len() % 16 == 0;

    let mut last_block = [0u8; 16];
    if n_full_blocks == 0 {
        last_block[0] = 0x80;
        last_block = xor16(&last_block, &k2);
    } else if complete {
        let start = (n_full_blocks - 1) * 16;
        last_block.copy_from_slice(&msg[start..start + 16]);
        last_block = xor16(&last_block, &k1);
    } else {
        let start = (n_full_blocks - 1) * 16;
        let tail = &msg[start..];
        last_block[..tail.len()].copy_from_slice(tail);
        last_block[tail.len()] = 0x80;
        last_block = xor16(&last_block, &k2);
    }

    let mut x = [0u8; 16];
    let full_blocks_before_last = if n_full_blocks == 0 { 0 } else { n_full_blocks - 1 };
    for i in 0..full_blocks_before_last {
        let mut block = [0u8; 16];
        block.copy_from_slice(&msg[i * 16..i * 16 + 16]);
        let y = xor16(&x, &block);
        x = aes128_ecb_encrypt(&y, key)?;
    }

    let y = xor16(&x, &last_block);
    aes128_ecb_encrypt(&y, key)
}

#[cfg(test)]
mod tests {
    use super::*;

    const KAMSTRUP_KEY: [u8; 16] = [
        0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0A, 0x0B, 0x0C, 0x0D, 0x0E, 0x0F,
        0x10,
    ];

    #[test]
    fn ecb_encrypt_rejects_short_key() {
        let block = [0u8; 16];
        assert_eq!(
            aes128_ecb_encrypt(&block, &[0u8; 8]),
            Err(CryptoError::InvalidKeyLength(8))
        );
    }

    #[test]
    fn increment_iv_carries_from_the_last_byte_toward_the_first() {
        let mut iv = [0u8; 16];
        iv[15] = 0xFF;
        increment_iv(&mut iv);
        assert_eq!(iv[15], 0x00);
        assert_eq!(iv[14], 0x01);
        assert_eq!(&iv[0..14], &[0u8; 14]);
    }

    #[test]
    fn ctr_like_round_trip_via_symmetry() {
        // AES-CTR is its own inverse: decrypting the "ciphertext" produced by
        // XORing the keystream over plaintext returns the plaintext.
        let iv = [0u8; 16];
        let plaintext = b"0123456789abcdef0123456789abcdef";
        let encrypted = aes128_ctr_like(plaintext, &KAMSTRUP_KEY, &iv).unwrap();
        let decrypted = aes128_ctr_like(&encrypted, &KAMSTRUP_KEY, &iv).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn cbc_no_iv_rejects_unaligned_ciphertext() {
        let ct = [0u8; 10];
        assert_eq!(
            aes128_cbc_decrypt_no_iv(&ct, &KAMSTRUP_KEY),
            Err(CryptoError::NotBlockAligned(10))
        );
    }

    #[test]
    fn cmac_k2_is_derived_from_k1_by_the_same_law() {
        let (k1, k2) = cmac_subkeys(&KAMSTRUP_KEY).unwrap();
        let expected_k2 = if k1[0] & 0x80 == 0 {
            shift_left_1(&k1)
        } else {
            let mut s = shift_left_1(&k1);
            s[15] ^= RB;
            s
        };
        assert_eq!(k2, expected_k2);
    }

    #[test]
    fn cmac_is_deterministic_and_full_width() {
        let tag_a = aes_cmac(&KAMSTRUP_KEY, b"hello wmbus").unwrap();
        let tag_b = aes_cmac(&KAMSTRUP_KEY, b"hello wmbus").unwrap();
        assert_eq!(tag_a, tag_b);
        let tag_c = aes_cmac(&KAMSTRUP_KEY, b"hello wmbuT").unwrap();
        assert_ne!(tag_a, tag_c);
    }
}
