use core::fmt;

/// Reason of a rejected block write, from the data response token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
pub enum WriteRejection {
    /// The card found a CRC error in the data.
    Crc,
    /// The card failed to program the data.
    WriteError,
    /// Unrecognized data response token.
    Other(u8),
}

/// Diagnostic error code, without the transport payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
pub enum ErrorCode {
    /// Error from the SPI peripheral.
    Transport,
    /// Couldn't drive the chip select.
    ChipSelect,
    /// No valid R1 within the poll window after this command index.
    NoResponse(u8),
    /// Neither the data start token nor the idle byte.
    UnexpectedToken(u8),
    /// CRC mismatch of a data block (card, host).
    CrcMismatch { card: u16, host: u16 },
    /// GO_IDLE_STATE never answered with the idle state.
    GoIdleFailed,
    /// SEND_IF_COND never answered usably.
    InterfaceConditionFailed,
    /// SEND_IF_COND is an illegal command: SD v1.x card.
    LegacyCardUnsupported,
    /// SEND_IF_COND echoed a wrong voltage or check pattern.
    UnexpectedInterfaceResponse,
    /// APP_CMD kept failing.
    AppCommandFailed,
    /// SD_SEND_OP_COND kept failing.
    OpConditionFailed,
    /// SD_SEND_OP_COND kept reporting idle state.
    OpConditionTimeout,
    /// READ_OCR failed.
    ReadOcrFailed,
    /// SET_BLOCKLEN failed.
    SetBlockLengthFailed,
    /// READ_SINGLE_BLOCK was rejected.
    ReadCommandRejected,
    /// No data start token within the poll window.
    ReadTimeout,
    /// WRITE_BLOCK was rejected.
    WriteCommandRejected,
    /// The data response token rejected the block.
    WriteRejected(WriteRejection),
    /// The card stayed busy past the poll window.
    WriteTimeout,
    /// SEND_STATUS failed or reported an error.
    StatusQueryFailed,
    /// The card is write protected.
    WriteProtected,
    /// The card is locked.
    Locked,
    /// Failed to read the Card Specific Data register.
    RegisterReadFailed,
    /// The card is not initialized.
    NotInitialized,
    /// Bad sector, count or buffer.
    InvalidParameter,
}

impl ErrorCode {
    /// Human-readable description.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Transport => "SPI transfer failed",
            ErrorCode::ChipSelect => "chip select failed",
            ErrorCode::NoResponse(_) => "no response from card",
            ErrorCode::UnexpectedToken(_) => "read data token error",
            ErrorCode::CrcMismatch { .. } => "data block CRC mismatch",
            ErrorCode::GoIdleFailed => "CMD0 / GO_IDLE_STATE failed",
            ErrorCode::InterfaceConditionFailed => "CMD8 / SEND_IF_COND failed",
            ErrorCode::LegacyCardUnsupported => "v1.x sdcard not supported",
            ErrorCode::UnexpectedInterfaceResponse => "CMD8 returned unexpected response",
            ErrorCode::AppCommandFailed => "CMD55 / APP_CMD failed",
            ErrorCode::OpConditionFailed => "ACMD41 / SEND_OP_COND failed",
            ErrorCode::OpConditionTimeout => "ACMD41 timeout",
            ErrorCode::ReadOcrFailed => "CMD58 / READ_OCR failed",
            ErrorCode::SetBlockLengthFailed => "CMD16 / SET_BLOCKLEN failed",
            ErrorCode::ReadCommandRejected => "CMD17 / READ_SINGLE_BLOCK failed",
            ErrorCode::ReadTimeout => "read operation timeout",
            ErrorCode::WriteCommandRejected => "CMD24 / WRITE_BLOCK failed",
            ErrorCode::WriteRejected(WriteRejection::Crc) => "write data rejected: CRC error",
            ErrorCode::WriteRejected(WriteRejection::WriteError) => {
                "write data rejected: write error"
            }
            ErrorCode::WriteRejected(WriteRejection::Other(_)) => "write data rejected",
            ErrorCode::WriteTimeout => "write operation timeout",
            ErrorCode::StatusQueryFailed => "CMD13 / SEND_STATUS failed",
            ErrorCode::WriteProtected => "sdcard is write protected",
            ErrorCode::Locked => "sdcard is locked",
            ErrorCode::RegisterReadFailed => "CMD9 / SEND_CSD failed",
            ErrorCode::NotInitialized => "sdcard not initialized",
            ErrorCode::InvalidParameter => "invalid parameter",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// [`SdCardSpi`](crate::SdCardSpi) result error.
///
/// `T` - transport error type.
/// `S` - select switch type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error<T, S> {
    /// Error from the SPI peripheral.
    Transport(T),
    /// Couldn't set a select.
    ChipSelect(S),
    /// Protocol, transfer or access error reported by the driver.
    Card(ErrorCode),
}

impl<T, S> Error<T, S> {
    /// Diagnostic code of this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::Transport(_) => ErrorCode::Transport,
            Error::ChipSelect(_) => ErrorCode::ChipSelect,
            Error::Card(code) => *code,
        }
    }
}

impl<T, S> From<ErrorCode> for Error<T, S> {
    fn from(code: ErrorCode) -> Self {
        Error::Card(code)
    }
}

impl<T, S> fmt::Display for Error<T, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.code(), f)
    }
}
