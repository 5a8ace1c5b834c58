use crate::consts::BLOCK_SIZE_U64;

use bitfield::bitfield;
use size::{consts::KiB, Size};

/// Card Specific Data block.
pub type CsdData = [u8; 16];

bitfield! {
    /// Card Specific Data, version 1. Standard capacity cards.
    pub struct CsdV1(u128);
    pub u8, version, _: 127, 126;
    pub u8, data_read_access_time1, _: 119, 112;
    pub u8, data_read_access_time2, _: 111, 104;
    pub u8, max_data_transfer_rate, _: 103, 96;
    pub u16, card_command_classes, _: 95, 84;
    pub u8, read_block_length, _: 83, 80;
    pub read_partial_blocks, _: 79;
    pub write_block_misalignment, _: 78;
    pub read_block_misalignment, _: 77;
    pub dsr_implemented, _: 76;
    pub u16, device_size, _: 73, 62;
    pub u8, device_size_multiplier, _: 49, 47;
    pub erase_single_block_enabled, _: 46;
    pub u8, erase_sector_size, _: 45, 39;
    pub u8, write_speed_factor, _: 28, 26;
    pub u8, max_write_data_length, _: 25, 22;
    pub permanent_write_protection, _: 13;
    pub temporary_write_protection, _: 12;
    pub u8, crc, _: 7, 1;
}

bitfield! {
    /// Card Specific Data, version 2. High capacity cards.
    pub struct CsdV2(u128);
    pub u8, version, _: 127, 126;
    pub u8, data_read_access_time1, _: 119, 112;
    pub u8, data_read_access_time2, _: 111, 104;
    pub u8, max_data_transfer_rate, _: 103, 96;
    pub u16, card_command_classes, _: 95, 84;
    pub u8, read_block_length, _: 83, 80;
    pub read_partial_blocks, _: 79;
    pub u32, device_size, _: 69, 48;
    pub erase_single_block_enabled, _: 46;
    pub u8, erase_sector_size, _: 45, 39;
    pub u8, write_speed_factor, _: 28, 26;
    pub u8, max_write_data_length, _: 25, 22;
    pub permanent_write_protection, _: 13;
    pub temporary_write_protection, _: 12;
    pub u8, crc, _: 7, 1;
}

/// Card Specific Data, generic container.
pub enum Csd {
    V1(CsdV1),
    V2(CsdV2),
}

/// Represents capacity provider.
///
/// `None` when the register holds values no card can have.
pub trait CapacityProvider {
    /// Returns the card capacity in bytes.
    fn card_capacity(&self) -> Option<Size>;

    /// Returns the card capacity in 512-byte blocks.
    fn card_capacity_blocks(&self) -> Option<u64>;
}

impl From<CsdData> for CsdV1 {
    fn from(csd_data: CsdData) -> Self {
        CsdV1(u128::from_be_bytes(csd_data))
    }
}

impl From<CsdData> for CsdV2 {
    fn from(csd_data: CsdData) -> Self {
        CsdV2(u128::from_be_bytes(csd_data))
    }
}

impl From<CsdData> for Csd {
    /// Picks the layout from the CSD structure field, SDSC v2 cards still use version 1.
    fn from(csd_data: CsdData) -> Self {
        match csd_data[0] >> 6 {
            0 => Csd::V1(CsdV1::from(csd_data)),
            _ => Csd::V2(CsdV2::from(csd_data)),
        }
    }
}

impl CsdV1 {
    /// Log2 of the capacity in bytes over (C_SIZE + 1).
    ///
    /// READ_BL_LEN is 9, 10 or 11 on every standard capacity card.
    fn capacity_shift(&self) -> Option<u32> {
        match self.read_block_length() {
            bl_len @ 9..=11 => {
                Some(u32::from(self.device_size_multiplier()) + 2 + u32::from(bl_len))
            }
            _ => None,
        }
    }
}

impl CapacityProvider for CsdV1 {
    fn card_capacity(&self) -> Option<Size> {
        let bytes = (u64::from(self.device_size()) + 1).checked_shl(self.capacity_shift()?)?;

        Some(Size::from_bytes(bytes))
    }

    fn card_capacity_blocks(&self) -> Option<u64> {
        let shift = self.capacity_shift()?.checked_sub(BLOCK_SIZE_U64.trailing_zeros())?;

        (u64::from(self.device_size()) + 1).checked_shl(shift)
    }
}

impl CapacityProvider for CsdV2 {
    fn card_capacity(&self) -> Option<Size> {
        self.card_capacity_blocks()
            .and_then(|blocks| blocks.checked_mul(BLOCK_SIZE_U64))
            .map(Size::from_bytes)
    }

    fn card_capacity_blocks(&self) -> Option<u64> {
        (u64::from(self.device_size()) + 1).checked_mul(KiB as u64)
    }
}

impl CapacityProvider for Csd {
    fn card_capacity(&self) -> Option<Size> {
        match self {
            Csd::V1(csd) => csd.card_capacity(),
            Csd::V2(csd) => csd.card_capacity(),
        }
    }

    fn card_capacity_blocks(&self) -> Option<u64> {
        match self {
            Csd::V1(csd) => csd.card_capacity_blocks(),
            Csd::V2(csd) => csd.card_capacity_blocks(),
        }
    }
}
