//! Disk-IO adapter, the boundary to the filesystem.
//!
//! The `disk_*` methods follow the FatFS `diskio.h` contract: a status byte,
//! a small result vocabulary and an ioctl with out-parameters. The distinct
//! [`ErrorCode`] behind a generic result stays available through
//! [`SdCardSpi::last_error`]. The same card is also exposed through
//! [`DiskioDevice`].

use crate::{
    config::SdCardSpiConfig,
    consts::BLOCK_SIZE,
    error::{Error, ErrorCode},
    session::{CardKind, CardSession},
    DiskioDevice, DiskioError, ErrorFor, IoctlCmd, Lba, SdCardSpi, Status, StatusFlag,
};
use crate::{error, info, warn};

use bitfield::bitfield;
use embedded_hal::blocking::{delay::DelayMs, spi::Transfer};
use switch_hal::OutputSwitch;

bitfield! {
    /// Drive status, FatFS `DSTATUS` bits.
    #[derive(Clone, Copy, PartialEq, Eq, Default)]
    #[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
    pub struct DiskStatus(u8);
    impl Debug;
    pub not_initialized, set_not_initialized: 0;
    pub no_disk, set_no_disk: 1;
    pub protected, set_protected: 2;
}

impl DiskStatus {
    /// Raw status byte.
    pub fn bits(&self) -> u8 {
        self.0
    }

    /// Initialized, present and writable.
    pub fn is_ok(&self) -> bool {
        self.0 == 0
    }
}

impl From<CardSession> for DiskStatus {
    fn from(session: CardSession) -> Self {
        let mut status = DiskStatus::default();
        status.set_not_initialized(!session.initialized);
        status.set_no_disk(session.no_disk);
        status.set_protected(session.protected);
        status
    }
}

/// Result of a disk operation, FatFS `DRESULT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
pub enum DiskResult {
    Ok,
    /// Any hard error during the operation.
    Error,
    WriteProtected,
    NotReady,
    ParameterError,
}

impl From<ErrorCode> for DiskResult {
    fn from(code: ErrorCode) -> Self {
        match code {
            ErrorCode::NotInitialized => DiskResult::NotReady,
            ErrorCode::InvalidParameter => DiskResult::ParameterError,
            ErrorCode::WriteProtected | ErrorCode::Locked => DiskResult::WriteProtected,
            _ => DiskResult::Error,
        }
    }
}

/// Disk control request, FatFS `disk_ioctl` commands.
#[derive(Debug)]
pub enum IoctlRequest<'a> {
    /// Complete pending writes. Writes are synchronous, nothing to do.
    Sync,
    /// Number of sectors on the card.
    GetSectorCount(&'a mut u64),
    /// Sector size, always 512.
    GetSectorSize(&'a mut u16),
    /// Erase block size hint, in sectors.
    GetEraseBlockSize(&'a mut u32),
    /// Any other command code.
    Other(u8),
}

impl<Spi: Transfer<u8>, Cs: OutputSwitch, Delay: DelayMs<u16>, Config: SdCardSpiConfig>
    SdCardSpi<Spi, Cs, Delay, Config>
where
    Spi::Error: core::fmt::Debug,
    Cs::Error: core::fmt::Debug,
{
    /// Drive status. No bus activity.
    pub fn disk_status(&self) -> DiskStatus {
        DiskStatus::from(self.session.get())
    }

    /// Initialize the card, retrying the whole sequence up to
    /// [`SdCardSpiConfig::INIT_ATTEMPTS`] times.
    pub fn disk_initialize(&mut self) -> DiskStatus {
        // Failure detail is kept in `last_error`.
        let _ = self.initialize_with_retries();

        self.disk_status()
    }

    /// Read `count` sectors starting at `sector` into `buf`.
    pub fn disk_read(&self, sector: u32, buf: &mut [u8], count: u32) -> DiskResult {
        let result = self
            .validate_transfer(sector, buf.len(), count)
            .and_then(|len| self.read_blocks(sector, &mut buf[..len]));

        self.disk_result(result)
    }

    /// Write `count` sectors starting at `sector` from `buf`.
    #[cfg(not(feature = "readonly"))]
    pub fn disk_write(&self, sector: u32, buf: &[u8], count: u32) -> DiskResult {
        let result = self
            .validate_transfer(sector, buf.len(), count)
            .and_then(|len| self.write_blocks(sector, &buf[..len]));

        self.disk_result(result)
    }

    /// Miscellaneous drive controls.
    pub fn disk_ioctl(&self, request: IoctlRequest) -> DiskResult {
        if let Err(err) = self.validate_initialized() {
            return self.disk_result(Err(err));
        }

        match request {
            IoctlRequest::Sync => DiskResult::Ok,
            IoctlRequest::GetSectorSize(size) => {
                *size = BLOCK_SIZE as u16;
                DiskResult::Ok
            }
            IoctlRequest::GetEraseBlockSize(sectors) => {
                *sectors = Config::ERASE_BLOCK_SECTORS;
                DiskResult::Ok
            }
            IoctlRequest::GetSectorCount(count) => {
                let result = self.sector_count().map(|sectors| *count = sectors);
                self.disk_result(result)
            }
            IoctlRequest::Other(cmd) => {
                warn!("SD unsupported ioctl: {}", cmd);
                DiskResult::ParameterError
            }
        }
    }

    /// Run the initialization sequence until it succeeds or the attempts run out.
    ///
    /// A v1.x card is reported right away, retrying can't change the answer.
    fn initialize_with_retries(&mut self) -> Result<CardKind, ErrorFor<Self>> {
        let mut result = Err(ErrorCode::NotInitialized.into());

        for attempt in 0..Config::INIT_ATTEMPTS {
            result = self.initialize_card();

            match &result {
                Ok(_) => {
                    self.last_error.set(None);
                    break;
                }
                Err(err) => {
                    let code = err.code();
                    self.last_error.set(Some(code));
                    warn!(
                        "SD initialize attempt {} failed: {}",
                        attempt + 1,
                        code.as_str()
                    );
                    if code == ErrorCode::LegacyCardUnsupported {
                        break;
                    }
                }
            }
        }

        result
    }

    /// Check session, count and buffer of a transfer, returns the byte length.
    fn validate_transfer(
        &self,
        sector: u32,
        buf_len: usize,
        count: u32,
    ) -> Result<usize, ErrorFor<Self>> {
        self.validate_initialized()?;

        let len = usize::try_from(count)
            .ok()
            .and_then(|count| count.checked_mul(BLOCK_SIZE))
            .filter(|&len| len != 0 && len <= buf_len);

        match len {
            Some(len) if sector.checked_add(count - 1).is_some() => Ok(len),
            _ => {
                error!(
                    "SD invalid transfer, sector: {}, count: {}, buffer length: {}",
                    sector, count, buf_len
                );
                Err(ErrorCode::InvalidParameter.into())
            }
        }
    }

    /// Sequential single block reads into consecutive 512-byte chunks.
    fn read_blocks(&self, sector: u32, buf: &mut [u8]) -> Result<(), ErrorFor<Self>> {
        for (offset, chunk) in (0u32..).zip(buf.chunks_exact_mut(BLOCK_SIZE)) {
            let block: &mut [u8; BLOCK_SIZE] =
                chunk.try_into().map_err(|_| ErrorCode::InvalidParameter)?;
            self.read_block(sector + offset, block)?;
        }

        Ok(())
    }

    /// Sequential single block writes from consecutive 512-byte chunks.
    #[cfg(not(feature = "readonly"))]
    fn write_blocks(&self, sector: u32, buf: &[u8]) -> Result<(), ErrorFor<Self>> {
        for (offset, chunk) in (0u32..).zip(buf.chunks_exact(BLOCK_SIZE)) {
            let block: &[u8; BLOCK_SIZE] =
                chunk.try_into().map_err(|_| ErrorCode::InvalidParameter)?;
            self.write_block(sector + offset, block)?;
        }

        Ok(())
    }

    /// Collapse an operation result into the filesystem vocabulary.
    fn disk_result(&self, result: Result<(), ErrorFor<Self>>) -> DiskResult {
        match result {
            Ok(()) => DiskResult::Ok,
            Err(err) => {
                let code = err.code();
                error!("SD disk operation failed: {}", code.as_str());
                self.last_error.set(Some(code));
                DiskResult::from(code)
            }
        }
    }

    /// Record a failed transfer and wrap it for diskio.
    fn hardware_error(&self, err: ErrorFor<Self>) -> DiskioError<ErrorFor<Self>> {
        let code = err.code();
        error!("SD transfer failed: {}", code.as_str());
        self.last_error.set(Some(code));
        DiskioError::Hardware(err)
    }

    /// Validate buffer for read/write.
    fn validate_buffer_len(buf_len: usize) -> Result<(), DiskioError<ErrorFor<Self>>> {
        if buf_len == 0 || buf_len % BLOCK_SIZE != 0 {
            error!(
                "SD invalid buffer, length: {}, block size: {}",
                buf_len, BLOCK_SIZE
            );
            Err(DiskioError::InvalidArgument)
        } else {
            Ok(())
        }
    }

    /// Convert lba, checking the whole buffer stays addressable.
    fn convert_lba(lba: Lba, buf_len: usize) -> Result<u32, DiskioError<ErrorFor<Self>>> {
        let sector = u32::try_from(lba).map_err(|_| DiskioError::InvalidArgument)?;
        let count =
            u32::try_from(buf_len / BLOCK_SIZE).map_err(|_| DiskioError::InvalidArgument)?;

        match sector.checked_add(count - 1) {
            Some(_) => Ok(sector),
            None => Err(DiskioError::InvalidArgument),
        }
    }

    /// Map an initialized check to the diskio vocabulary.
    fn diskio_initialized(&self) -> Result<(), DiskioError<ErrorFor<Self>>> {
        self.validate_initialized()
            .map(|_| ())
            .map_err(|_| DiskioError::NotInitialized)
    }
}

impl<Spi: Transfer<u8>, Cs: OutputSwitch, Delay: DelayMs<u16>, Config: SdCardSpiConfig>
    DiskioDevice for SdCardSpi<Spi, Cs, Delay, Config>
where
    Spi::Error: core::fmt::Debug,
    Cs::Error: core::fmt::Debug,
{
    type HardwareError = Error<Spi::Error, Cs::Error>;

    fn status(&self) -> Status {
        if self.session.get().initialized {
            Status::default()
        } else if self.last_error.get().is_some() {
            StatusFlag::ErrorOccured | StatusFlag::NotInitialized
        } else {
            StatusFlag::NotInitialized.into()
        }
    }

    fn reset(&mut self) {
        info!("SD reset invoked");
        self.session.set(CardSession::default());
    }

    fn initialize(&mut self) -> Result<(), DiskioError<Self::HardwareError>> {
        if self.session.get().initialized {
            warn!("SD already is initialized");
            return Err(DiskioError::AlreadyInitialized);
        }

        self.initialize_with_retries()
            .map(|_| ())
            .map_err(DiskioError::Hardware)
    }

    fn read(&self, buf: &mut [u8], lba: Lba) -> Result<(), DiskioError<Self::HardwareError>> {
        Self::validate_buffer_len(buf.len())?;
        self.diskio_initialized()?;

        let sector = Self::convert_lba(lba, buf.len())?;

        self.read_blocks(sector, buf)
            .map_err(|err| self.hardware_error(err))
    }

    #[cfg(not(feature = "readonly"))]
    fn write(&self, buf: &[u8], lba: Lba) -> Result<(), DiskioError<Self::HardwareError>> {
        Self::validate_buffer_len(buf.len())?;
        self.diskio_initialized()?;

        let sector = Self::convert_lba(lba, buf.len())?;

        self.write_blocks(sector, buf)
            .map_err(|err| self.hardware_error(err))
    }

    #[cfg(feature = "readonly")]
    fn write(&self, _buf: &[u8], _lba: Lba) -> Result<(), DiskioError<Self::HardwareError>> {
        Err(DiskioError::NotSupported)
    }

    fn ioctl(&self, cmd: IoctlCmd) -> Result<(), DiskioError<Self::HardwareError>> {
        match cmd {
            IoctlCmd::CtrlSync => self.diskio_initialized(),
            IoctlCmd::GetBlockSize(block_size) => {
                *block_size = BLOCK_SIZE;
                Ok(())
            }
            _ => Err(DiskioError::NotSupported),
        }
    }
}
