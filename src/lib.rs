//! SD card driver written in Embedded Rust, for the SPI bus of small
//! single-threaded machines such as the Replica 1.
//!
//! This crate initializes a SD v2+ card (SDSC or SDHC/SDXC), reads and writes
//! single 512-byte blocks, and exposes the card through a FatFS style disk-IO
//! adapter ([`DiskStatus`], [`DiskResult`], [`IoctlRequest`]) as well as the
//! [`DiskioDevice`] trait.
//!
//! Every wait on the card is a busy-wait bounded by a constant of
//! [`SdCardSpiConfig`], so no operation can spin forever.
//!
//! ## Features
//!
//! * `log`: Enabled by default. Generates log messages using the `log` crate.
//! * `defmt-log`: Log over defmt instead. Disable the default features first.
//! * `readonly`: Leave out the disk write operation.

#![cfg_attr(not(test), no_std)]

mod block;
mod config;
mod consts;
mod crc;
mod csd;
mod disk;
mod error;
mod init;
mod response;
mod session;

pub use crate::config::{DefaultSdCardSpiConfig, SdCardSpiConfig};
pub use crate::consts::BLOCK_SIZE;
pub use crate::csd::{CapacityProvider, Csd, CsdData, CsdV1, CsdV2};
pub use crate::disk::{DiskResult, DiskStatus, IoctlRequest};
pub use crate::error::{Error, ErrorCode, WriteRejection};
pub use crate::response::{CardStatus, DataResponse, IfCondResponse, Ocr, R1Response};
pub use crate::session::{CardKind, CardSession};
pub use diskio::{
    BlockSize, DiskioDevice, Error as DiskioError, IoctlCmd, Lba, Status, StatusFlag,
};

use crate::{
    consts::{commands, tokens},
    crc::command_crc,
};

use core::{
    cell::{Cell, RefCell},
    marker::PhantomData,
};
use embedded_hal::blocking::{delay::DelayMs, spi::Transfer};
use switch_hal::OutputSwitch;

#[cfg(all(feature = "defmt-log", feature = "log"))]
compile_error!("Cannot enable both log and defmt-log");

#[cfg(feature = "log")]
use log::{debug, error, info, warn};

#[cfg(feature = "defmt-log")]
use defmt::{debug, error, info, warn};

#[cfg(all(not(feature = "defmt-log"), not(feature = "log")))]
#[macro_export]
/// Like log::debug! but does nothing at all
macro_rules! debug {
    ($($arg:tt)+) => {};
}

#[cfg(all(not(feature = "defmt-log"), not(feature = "log")))]
#[macro_export]
/// Like log::info! but does nothing at all
macro_rules! info {
    ($($arg:tt)+) => {};
}

#[cfg(all(not(feature = "defmt-log"), not(feature = "log")))]
#[macro_export]
/// Like log::warn! but does nothing at all
macro_rules! warn {
    ($($arg:tt)+) => {};
}

#[cfg(all(not(feature = "defmt-log"), not(feature = "log")))]
#[macro_export]
/// Like log::error! but does nothing at all
macro_rules! error {
    ($($arg:tt)+) => {};
}

/// Error type alias.
pub(crate) type ErrorFor<T> = <T as DiskioDevice>::HardwareError;

/// SD Card SPI driver.
///
/// `Spi` - SPI, the byte transfer primitive.
/// `Cs` - Chip select output switch, `on` asserts the line.
/// `Delay` - Millisecond delay of the system timer.
/// `Config` - Config implementation of driver config trait.
///
/// The driver owns the bus. All block operations take `&self`; callers on a
/// pre-emptible system must serialize access themselves.
pub struct SdCardSpi<
    Spi: Transfer<u8>,
    Cs: OutputSwitch,
    Delay: DelayMs<u16>,
    Config: SdCardSpiConfig,
> {
    spi: RefCell<Spi>,
    cs: RefCell<Cs>,
    delay: RefCell<Delay>,
    session: Cell<CardSession>,
    last_error: Cell<Option<ErrorCode>>,
    fast_clock: Option<fn(&mut Spi)>,
    config: PhantomData<Config>,
}

impl<Spi: Transfer<u8>, Cs: OutputSwitch, Delay: DelayMs<u16>, Config: SdCardSpiConfig>
    SdCardSpi<Spi, Cs, Delay, Config>
where
    Spi::Error: core::fmt::Debug,
    Cs::Error: core::fmt::Debug,
{
    /// Creates a new [`SdCardSpi<Spi, Cs, Delay, Config>`].
    ///
    /// `spi` - SPI instance, clocked at the slow initialization speed.
    /// `cs` - chip select output switch.
    /// `delay` - millisecond delay.
    pub fn new(spi: Spi, cs: Cs, delay: Delay) -> Self {
        SdCardSpi {
            spi: RefCell::new(spi),
            cs: RefCell::new(cs),
            delay: RefCell::new(delay),
            session: Cell::new(CardSession::default()),
            last_error: Cell::new(None),
            fast_clock: None,
            config: PhantomData::<Config>,
        }
    }

    /// Installs the hook that raises the SPI clock once the card is ready.
    pub fn with_fast_clock(mut self, hook: fn(&mut Spi)) -> Self {
        self.fast_clock = Some(hook);
        self
    }

    /// Get a temporary borrow on the underlying SPI device. Useful if you
    /// need to re-clock the SPI.
    pub fn spi<T, F>(&self, func: F) -> T
    where
        F: FnOnce(&mut Spi) -> T,
    {
        func(&mut *self.spi.borrow_mut())
    }

    /// Releases the bus handles.
    pub fn free(self) -> (Spi, Cs, Delay) {
        (
            self.spi.into_inner(),
            self.cs.into_inner(),
            self.delay.into_inner(),
        )
    }

    /// Current card session.
    pub fn session(&self) -> CardSession {
        self.session.get()
    }

    /// Type of the card, [`CardKind::Unknown`] until initialized.
    pub fn card_kind(&self) -> CardKind {
        self.session.get().card_kind
    }

    /// Code of the last error seen by the disk adapter, cleared by a
    /// successful initialization.
    pub fn last_error(&self) -> Option<ErrorCode> {
        self.last_error.get()
    }

    /// Validate initialized, returns the card kind.
    fn validate_initialized(&self) -> Result<CardKind, ErrorFor<Self>> {
        let session = self.session.get();
        if session.initialized {
            Ok(session.card_kind)
        } else {
            Err(ErrorCode::NotInitialized.into())
        }
    }

    /// Activate chip select.
    fn select(&self) -> Result<(), ErrorFor<Self>> {
        self.cs.borrow_mut().on().map_err(Error::ChipSelect)
    }

    /// Deactivate chip select, then clock one byte so the card releases MISO.
    fn unselect(&self) -> Result<(), ErrorFor<Self>> {
        self.cs.borrow_mut().off().map_err(Error::ChipSelect)?;
        self.send(tokens::IDLE)
    }

    /// CS scope. Chip select is released on every exit path.
    ///
    /// An error of `f` wins over a failed release.
    fn cs_scope<T, F>(&self, f: F) -> Result<T, ErrorFor<Self>>
    where
        F: FnOnce(&Self) -> Result<T, ErrorFor<Self>>,
    {
        self.select()?;
        let result = f(self);

        match self.unselect() {
            Ok(()) => result,
            Err(err) if result.is_err() => {
                warn!("Failed to release SD chip select: {}", err.code().as_str());
                result
            }
            Err(err) => Err(err),
        }
    }

    /// Send one byte and receive one byte.
    fn transfer(&self, data: u8) -> Result<u8, ErrorFor<Self>> {
        self.spi
            .borrow_mut()
            .transfer(&mut [data])
            .map(|b| b[0])
            .map_err(Error::Transport)
    }

    /// Receive a byte from the SD card by clocking in an 0xFF byte.
    fn receive(&self) -> Result<u8, ErrorFor<Self>> {
        self.transfer(tokens::IDLE)
    }

    /// Send a byte to the SD card.
    fn send(&self, data: u8) -> Result<(), ErrorFor<Self>> {
        self.transfer(data).map(|_| ())
    }

    /// Receive a slice from the SD card.
    fn receive_slice(&self, data: &mut [u8]) -> Result<(), ErrorFor<Self>> {
        for byte in data.iter_mut() {
            *byte = self.receive()?;
        }

        Ok(())
    }

    /// Send a slice to the SD card.
    fn send_slice(&self, data: &[u8]) -> Result<(), ErrorFor<Self>> {
        for byte in data.iter() {
            self.send(*byte)?;
        }

        Ok(())
    }

    /// Receive the 4 bytes trailing a R3/R7 response.
    fn receive_payload(&self) -> Result<[u8; 4], ErrorFor<Self>> {
        let mut payload = [0; 4];
        self.receive_slice(&mut payload)?;

        Ok(payload)
    }

    /// Frame and send a command, then poll for its R1.
    ///
    /// Chip select must already be asserted. Exactly 6 bytes go out before the
    /// first response byte is read. A byte with the top bit set is never a
    /// status; if none other shows up within the poll window the result is
    /// [`ErrorCode::NoResponse`].
    fn send_command(&self, cmd: u8, arg: u32) -> Result<R1Response, ErrorFor<Self>> {
        let [arg0, arg1, arg2, arg3] = arg.to_be_bytes();
        let head = [
            commands::CMD_BASE | (cmd & commands::CMD_INDEX_MASK),
            arg0,
            arg1,
            arg2,
            arg3,
        ];

        self.send_slice(&head)?;
        self.send(command_crc(&head))?;

        for _ in 0..Config::READ_R1_ATTEMPTS {
            let r1 = R1Response::new(self.receive()?);

            if r1.is_valid() {
                return Ok(r1);
            }
        }

        Err(ErrorCode::NoResponse(cmd).into())
    }

    /// Send a command in its own chip select scope.
    fn command(&self, cmd: u8, arg: u32) -> Result<R1Response, ErrorFor<Self>> {
        self.cs_scope(|s| s.send_command(cmd, arg))
    }
}
