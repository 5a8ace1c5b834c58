use crate::{
    config::SdCardSpiConfig,
    consts::{commands, tokens, BLOCK_SIZE},
    crc::crc16,
    csd::{CapacityProvider, Csd, CsdData},
    error::{Error, ErrorCode, WriteRejection},
    response::{CardStatus, DataResponse, R1Response},
    ErrorFor, SdCardSpi,
};
use crate::{debug, warn};

use embedded_hal::blocking::{delay::DelayMs, spi::Transfer};
use size::Size;
use switch_hal::OutputSwitch;

impl<Spi: Transfer<u8>, Cs: OutputSwitch, Delay: DelayMs<u16>, Config: SdCardSpiConfig>
    SdCardSpi<Spi, Cs, Delay, Config>
where
    Spi::Error: core::fmt::Debug,
    Cs::Error: core::fmt::Debug,
{
    /// Read a single 512-byte block.
    ///
    /// A failure doesn't affect the session, the card stays initialized.
    pub fn read_block(
        &self,
        index: u32,
        block: &mut [u8; BLOCK_SIZE],
    ) -> Result<(), ErrorFor<Self>> {
        let address = self.block_address(index)?;
        debug!("SD read block {}, address: {:#x}", index, address);

        self.cs_scope(|s| {
            s.expect_ready(commands::CMD17, address, ErrorCode::ReadCommandRejected)?;
            s.read_data(block)
        })
    }

    /// Write a single 512-byte block.
    ///
    /// The card status is checked first, so a locked or write protected card
    /// fails with its own error before any data is sent.
    pub fn write_block(&self, index: u32, block: &[u8; BLOCK_SIZE]) -> Result<(), ErrorFor<Self>> {
        let address = self.block_address(index)?;
        debug!("SD write block {}, address: {:#x}", index, address);

        self.cs_scope(|s| {
            s.check_writable()?;
            s.expect_ready(commands::CMD24, address, ErrorCode::WriteCommandRejected)?;
            s.write_data(block)?;
            s.wait_not_busy()
        })
    }

    /// Query the card status register.
    pub fn card_status(&self) -> Result<CardStatus, ErrorFor<Self>> {
        self.validate_initialized()?;

        self.cs_scope(|s| s.query_status())
    }

    /// Read the Card Specific Data register.
    pub fn read_csd(&self) -> Result<Csd, ErrorFor<Self>> {
        self.validate_initialized()?;

        self.cs_scope(|s| {
            let mut csd_data: CsdData = Default::default();

            s.expect_ready(commands::CMD9, 0, ErrorCode::RegisterReadFailed)?;
            s.read_data(&mut csd_data)?;

            Ok(Csd::from(csd_data))
        })
    }

    /// Count of 512-byte sectors on the card.
    pub fn sector_count(&self) -> Result<u64, ErrorFor<Self>> {
        self.read_csd()?
            .card_capacity_blocks()
            .ok_or_else(Self::malformed_csd)
    }

    /// Capacity of the card.
    pub fn card_capacity(&self) -> Result<Size, ErrorFor<Self>> {
        self.read_csd()?
            .card_capacity()
            .ok_or_else(Self::malformed_csd)
    }

    fn malformed_csd() -> ErrorFor<Self> {
        warn!("SD CSD holds no valid capacity");
        ErrorCode::RegisterReadFailed.into()
    }

    /// Convert a block index into the command argument of the current card.
    fn block_address(&self, index: u32) -> Result<u32, ErrorFor<Self>> {
        self.validate_initialized()?
            .block_address(index)
            .ok_or_else(|| ErrorCode::InvalidParameter.into())
    }

    /// Send a command expecting the ready state, `error` otherwise.
    fn expect_ready(&self, cmd: u8, arg: u32, error: ErrorCode) -> Result<(), ErrorFor<Self>> {
        match self.send_command(cmd, arg) {
            Ok(R1Response::READY_STATE) => Ok(()),
            Ok(r1) => {
                warn!("Wrong response from CMD{}: {:#x}", cmd, r1.raw());
                Err(error.into())
            }
            Err(Error::Card(ErrorCode::NoResponse(_))) => Err(error.into()),
            Err(err) => Err(err),
        }
    }

    /// SEND_STATUS, R1 followed by one status byte.
    fn query_status(&self) -> Result<CardStatus, ErrorFor<Self>> {
        match self.send_command(commands::CMD13, 0) {
            Ok(r1) => Ok(CardStatus::new(r1, self.receive()?)),
            Err(Error::Card(ErrorCode::NoResponse(_))) => {
                Err(ErrorCode::StatusQueryFailed.into())
            }
            Err(err) => Err(err),
        }
    }

    /// Fail if the card can't take a write.
    fn check_writable(&self) -> Result<(), ErrorFor<Self>> {
        let status = self.query_status()?;

        if status.card_locked() {
            Err(ErrorCode::Locked.into())
        } else if status.write_protect_violation() {
            let mut session = self.session.get();
            session.protected = true;
            self.session.set(session);

            Err(ErrorCode::WriteProtected.into())
        } else if !status.is_clear() {
            warn!("SD status not clear: {:#x}", status.raw());
            Err(ErrorCode::StatusQueryFailed.into())
        } else {
            Ok(())
        }
    }

    /// Wait for the start token, then read a data block and its CRC.
    fn read_data(&self, data: &mut [u8]) -> Result<(), ErrorFor<Self>> {
        for _ in 0..Config::READ_TOKEN_ATTEMPTS {
            match self.receive()? {
                tokens::DATA_START_BLOCK => {
                    self.receive_slice(data)?;

                    let card_crc = u16::from_be_bytes([self.receive()?, self.receive()?]);

                    if Config::VERIFY_READ_CRC {
                        let host_crc = crc16(data);
                        if card_crc != host_crc {
                            return Err(ErrorCode::CrcMismatch {
                                card: card_crc,
                                host: host_crc,
                            }
                            .into());
                        }
                    }

                    return Ok(());
                }
                tokens::IDLE => {}
                token => return Err(ErrorCode::UnexpectedToken(token).into()),
            }
        }

        Err(ErrorCode::ReadTimeout.into())
    }

    /// Send a data block with filler CRC and check the data response token.
    fn write_data(&self, data: &[u8]) -> Result<(), ErrorFor<Self>> {
        self.send(tokens::DATA_START_BLOCK)?;
        self.send_slice(data)?;
        self.send(tokens::IDLE)?;
        self.send(tokens::IDLE)?;

        let rejection = match DataResponse::from(self.receive()?) {
            DataResponse::Accepted => return Ok(()),
            DataResponse::CrcRejected => WriteRejection::Crc,
            DataResponse::WriteRejected => WriteRejection::WriteError,
            DataResponse::Unknown(token) => WriteRejection::Other(token),
        };

        Err(ErrorCode::WriteRejected(rejection).into())
    }

    /// Wait until the card stops holding the line busy.
    fn wait_not_busy(&self) -> Result<(), ErrorFor<Self>> {
        for _ in 0..Config::WRITE_BUSY_ATTEMPTS {
            if self.receive()? != tokens::BUSY {
                return Ok(());
            }
        }

        Err(ErrorCode::WriteTimeout.into())
    }
}
