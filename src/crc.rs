/// Pre-computed CRC bytes of the fixed commands sent during initialization.
const KNOWN_COMMAND_CRCS: [([u8; 5], u8); 4] = [
    // GO_IDLE_STATE
    ([0x40, 0x00, 0x00, 0x00, 0x00], 0x95),
    // SEND_IF_COND, 0x1AA
    ([0x48, 0x00, 0x00, 0x01, 0xAA], 0x87),
    // APP_CMD
    ([0x77, 0x00, 0x00, 0x00, 0x00], 0x65),
    // SD_SEND_OP_COND, HCS
    ([0x69, 0x40, 0x00, 0x00, 0x00], 0x77),
];

/// CRC-7 calculation (x^7 + x^3 + 1), returned in the low 7 bits.
pub fn crc7(data: &[u8]) -> u8 {
    let mut crc = 0u8;
    for mut byte in data.iter().cloned() {
        for _bit in 0..8 {
            crc <<= 1;
            if ((byte & 0x80) ^ (crc & 0x80)) != 0 {
                crc ^= 0x09;
            }
            byte <<= 1;
        }
    }
    crc & 0x7F
}

/// Last byte of a command frame: CRC-7 of the first five bytes plus the stop bit.
pub fn command_crc(frame: &[u8; 5]) -> u8 {
    KNOWN_COMMAND_CRCS
        .iter()
        .find(|(known, _)| known == frame)
        .map(|&(_, crc)| crc)
        .unwrap_or_else(|| (crc7(frame) << 1) | 0x01)
}

/// CRC-16 calculation.
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc = 0;
    for &byte in data {
        crc = ((crc >> 8) & 0xFF) | (crc << 8);
        crc ^= u16::from(byte);
        crc ^= (crc & 0xFF) >> 4;
        crc ^= crc << 12;
        crc ^= (crc & 0xFF) << 5;
    }
    crc
}
