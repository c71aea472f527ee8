//! CRC-16/IBM checksum used by the Codec 8 envelope.
//!
//! Reflected polynomial `0xA001`, initial value `0x0000`, no final XOR.
//! The device computes it over the data field only (codec id through the
//! trailing record count) and sends it in the low half of a 4-byte field.

pub fn crc16_ibm(bytes: &[u8]) -> u16 {
    let mut crc: u16 = 0x0000;
    for &b in bytes {
        crc ^= b as u16;
        for _ in 0..8 {
            if (crc & 0x0001) != 0 {
                crc = (crc >> 1) ^ 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}
