//! Name hashing for the directory indexes.
//!
//! Names are hashed with CRC-32 (polynomial 0xEDB88320) over their UTF-16
//! code units. Only the low byte of each unit feeds the table lookup, so
//! hashes are collision-tolerant keys and never a substitute for comparing
//! the names themselves.

const CRC32_POLYNOMIAL: u32 = 0xEDB8_8320;

const fn make_crc32_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0u32;
    while i < 256 {
        let mut crc = i;
        let mut j = 0;
        while j < 8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ CRC32_POLYNOMIAL;
            } else {
                crc >>= 1;
            }
            j += 1;
        }
        table[i as usize] = crc;
        i += 1;
    }
    table
}

static CRC32_TABLE: [u32; 256] = make_crc32_table();

/// Upper-cases a single UTF-16 code unit when the mapping stays one unit wide.
pub fn upcase_unit(unit: u16) -> u16 {
    match char::from_u32(unit as u32) {
        Some(c) => {
            let mut upper = c.to_uppercase();
            match (upper.next(), upper.next()) {
                (Some(u), None) if (u as u32) <= 0xFFFF => u as u32 as u16,
                _ => unit,
            }
        }
        // unpaired surrogate half
        None => unit,
    }
}

/// Stable 32-bit hash of `name`, optionally case-folded first.
pub fn name_hash(name: &str, case_insensitive: bool) -> u32 {
    let mut crc: u32 = 0xFFFF_FFFF;
    for unit in name.encode_utf16() {
        let unit = if case_insensitive {
            upcase_unit(unit)
        } else {
            unit
        };
        let idx = ((crc ^ unit as u32) & 0xFF) as usize;
        crc = (crc >> 8) ^ CRC32_TABLE[idx];
    }
    crc ^ 0xFFFF_FFFF
}

/// Case-insensitive comparison using the same folding as [`name_hash`].
pub fn names_equal_ignore_case(a: &str, b: &str) -> bool {
    a.encode_utf16()
        .map(upcase_unit)
        .eq(b.encode_utf16().map(upcase_unit))
}
