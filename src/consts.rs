/// Size of a sector / data block in bytes.
pub const BLOCK_SIZE: usize = 512;
/// [`BLOCK_SIZE`] as `u32`.
pub const BLOCK_SIZE_U32: u32 = BLOCK_SIZE as u32;
/// [`BLOCK_SIZE`] as `u64`.
pub const BLOCK_SIZE_U64: u64 = BLOCK_SIZE as u64;

pub mod commands {
    /// Start and transmission bits of every command byte.
    pub const CMD_BASE: u8 = 0x40;
    /// Mask of the command index inside the command byte.
    pub const CMD_INDEX_MASK: u8 = 0x3F;
    /// GO_IDLE_STATE - init card in spi mode if CS low.
    pub const CMD0: u8 = 0;
    /// SEND_IF_COND - verify SD Memory Card interface operating condition.
    pub const CMD8: u8 = 8;
    /// SEND_CSD - read the Card Specific Data (CSD register).
    pub const CMD9: u8 = 9;
    /// SEND_STATUS - read the card status register.
    pub const CMD13: u8 = 13;
    /// SET_BLOCKLEN - set the block length of standard capacity cards.
    pub const CMD16: u8 = 16;
    /// READ_SINGLE_BLOCK - read a single data block from the card.
    pub const CMD17: u8 = 17;
    /// WRITE_BLOCK - write a single data block to the card.
    pub const CMD24: u8 = 24;
    /// APP_CMD - escape for application specific command.
    pub const CMD55: u8 = 55;
    /// READ_OCR - read the OCR register of a card.
    pub const CMD58: u8 = 58;
    /// SD_SEND_OP_COND - Sends host capacity support information and activates
    /// the card's initialization process. Must follow [`CMD55`].
    pub const ACMD41: u8 = 41;
}

pub mod args {
    /// SEND_IF_COND argument: 2.7-3.6V supply and the 0xAA check pattern.
    pub const IF_COND: u32 = 0x0000_01AA;
    /// Check pattern echoed back by SEND_IF_COND.
    pub const IF_COND_CHECK_PATTERN: u8 = 0xAA;
    /// Voltage accepted field echoed back by SEND_IF_COND.
    pub const IF_COND_VOLTAGE: u8 = 0x01;
    /// SD_SEND_OP_COND argument with the host capacity support bit.
    pub const OP_COND_HCS: u32 = 0x4000_0000;
}

pub mod tokens {
    /// Byte clocked out while waiting, and read while the card is idle.
    pub const IDLE: u8 = 0xFF;
    /// Byte held by the card while it is busy programming.
    pub const BUSY: u8 = 0x00;
    /// Start data token for read or write single block.
    pub const DATA_START_BLOCK: u8 = 0xFE;
    /// Mask for data response tokens after a write block operation.
    pub const DATA_RES_MASK: u8 = 0x1F;
    /// Write data accepted token.
    pub const DATA_RES_ACCEPTED: u8 = 0x05;
    /// Write data rejected due to a CRC error.
    pub const DATA_RES_CRC_ERROR: u8 = 0x0B;
    /// Write data rejected due to a write error.
    pub const DATA_RES_WRITE_ERROR: u8 = 0x0D;
}
