//! CRC-32 (IEEE 802.3 / zlib) with the frame trailer layout.
//!
//! Reflected polynomial `0x04C11DB7`, initial value and final XOR
//! `0xFFFFFFFF`. The lookup table is built at compile time.

use crate::codec::TRAILER_SIZE;

const POLY: u32 = 0x04C1_1DB7u32.reverse_bits();

static TABLE: [u32; 256] = build_table();

const fn build_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut c = i as u32;
        let mut bit = 0;
        while bit < 8 {
            c = if c & 1 != 0 { POLY ^ (c >> 1) } else { c >> 1 };
            bit += 1;
        }
        table[i] = c;
        i += 1;
    }
    table
}

/// CRC-32 of `data`.
pub fn checksum(data: &[u8]) -> u32 {
    let crc = data.iter().fold(0xFFFF_FFFFu32, |crc, &byte| {
        (crc >> 8) ^ TABLE[((crc ^ byte as u32) & 0xFF) as usize]
    });
    crc ^ 0xFFFF_FFFF
}

/// Compute the CRC over everything but the last four bytes of `frame` and
/// store it, most significant byte first, into those four bytes.
///
/// Frames shorter than the trailer are left untouched.
pub fn store_trailer(frame: &mut [u8]) {
    let Some(body_len) = frame.len().checked_sub(TRAILER_SIZE) else {
        return;
    };
    let crc = checksum(&frame[..body_len]);
    frame[body_len..].copy_from_slice(&crc.to_be_bytes());
}

/// The CRC stored in the last four bytes of `frame`, if it is long enough.
pub fn stored_trailer(frame: &[u8]) -> Option<u32> {
    let body_len = frame.len().checked_sub(TRAILER_SIZE)?;
    let bytes: [u8; TRAILER_SIZE] = frame[body_len..].try_into().ok()?;
    Some(u32::from_be_bytes(bytes))
}

/// Recompute the CRC of `frame` and compare it with the stored trailer.
pub fn verify_trailer(frame: &[u8]) -> bool {
    match stored_trailer(frame) {
        Some(stored) => stored == checksum(&frame[..frame.len() - TRAILER_SIZE]),
        None => false,
    }
}
