use crate::consts::{args, tokens};

use bitfield::bitfield;

bitfield! {
    /// R1 response bitset.
    #[derive(Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
    pub struct R1Response(u8);
    impl Debug;
    pub in_idle_state, _: 0;
    pub erase_reset, _: 1;
    pub illegal_command, _: 2;
    pub command_crc_error, _: 3;
    pub erase_sequence_error, _: 4;
    pub address_error, _: 5;
    pub parameter_error, _: 6;
}

impl R1Response {
    /// Card is initialized and ready.
    pub const READY_STATE: Self = R1Response(0x00);
    /// Card is in idle state and running the initialization process.
    pub const IN_IDLE_STATE: Self = R1Response(0x01);
    /// Idle state with the illegal command bit, the answer of a v1 card to SEND_IF_COND.
    pub const IN_IDLE_AND_ILLEGAL: Self = R1Response(0x05);

    /// Wraps a raw byte read from the bus.
    pub fn new(raw: u8) -> Self {
        R1Response(raw)
    }

    /// Raw response byte.
    pub fn raw(&self) -> u8 {
        self.0
    }

    /// A valid R1 always has the top bit cleared.
    pub fn is_valid(&self) -> bool {
        self.0 & 0x80 == 0
    }

    /// No flag other than idle state is set.
    pub fn is_ready_or_idle(&self) -> bool {
        self.0 <= Self::IN_IDLE_STATE.0
    }
}

bitfield! {
    /// R7 payload of SEND_IF_COND.
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct IfCondResponse(u32);
    impl Debug;
    pub u8, command_version, _: 31, 28;
    pub u8, voltage_accepted, _: 11, 8;
    pub u8, check_pattern, _: 7, 0;
}

impl IfCondResponse {
    /// The card echoed the requested voltage range and check pattern.
    pub fn is_echo_valid(&self) -> bool {
        self.voltage_accepted() == args::IF_COND_VOLTAGE
            && self.check_pattern() == args::IF_COND_CHECK_PATTERN
    }
}

impl From<[u8; 4]> for IfCondResponse {
    fn from(data: [u8; 4]) -> Self {
        IfCondResponse(u32::from_be_bytes(data))
    }
}

bitfield! {
    /// Operation Conditions Register, R3 payload of READ_OCR.
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct Ocr(u32);
    impl Debug;
    pub power_up_complete, _: 31;
    pub card_capacity_status, _: 30;
    pub u16, voltage_window, _: 23, 15;
}

impl From<[u8; 4]> for Ocr {
    fn from(data: [u8; 4]) -> Self {
        Ocr(u32::from_be_bytes(data))
    }
}

bitfield! {
    /// R2 response of SEND_STATUS: R1 in the high byte, status in the low byte.
    #[derive(Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
    pub struct CardStatus(u16);
    impl Debug;
    pub u8, r1, _: 15, 8;
    pub card_locked, _: 0;
    pub lock_unlock_failed, _: 1;
    pub error, _: 2;
    pub card_controller_error, _: 3;
    pub ecc_failed, _: 4;
    pub write_protect_violation, _: 5;
    pub erase_param, _: 6;
    pub out_of_range, _: 7;
}

impl CardStatus {
    /// Builds the status from the R1 byte and the following status byte.
    pub fn new(r1: R1Response, status: u8) -> Self {
        CardStatus(u16::from(r1.raw()) << 8 | u16::from(status))
    }

    /// Raw R1 and status bytes.
    pub fn raw(&self) -> u16 {
        self.0
    }

    /// No R1 or status flag is raised.
    pub fn is_clear(&self) -> bool {
        self.0 == 0
    }
}

/// Data response token sent by the card after a written block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
pub enum DataResponse {
    /// Data accepted.
    Accepted,
    /// Data rejected due to a CRC error.
    CrcRejected,
    /// Data rejected due to a write error.
    WriteRejected,
    /// Any other pattern.
    Unknown(u8),
}

impl From<u8> for DataResponse {
    fn from(token: u8) -> Self {
        match token & tokens::DATA_RES_MASK {
            tokens::DATA_RES_ACCEPTED => DataResponse::Accepted,
            tokens::DATA_RES_CRC_ERROR => DataResponse::CrcRejected,
            tokens::DATA_RES_WRITE_ERROR => DataResponse::WriteRejected,
            _ => DataResponse::Unknown(token),
        }
    }
}
