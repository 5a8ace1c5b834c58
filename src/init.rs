//! Card initialization sequence.
//!
//! Power up, GO_IDLE_STATE, SEND_IF_COND, then APP_CMD / SD_SEND_OP_COND
//! until the card leaves the idle state, READ_OCR to find the capacity class
//! and finally SET_BLOCKLEN for standard capacity cards. Every step retries a
//! bounded number of times and fails with its own [`ErrorCode`].

use crate::{
    config::SdCardSpiConfig,
    consts::{args, commands, tokens, BLOCK_SIZE_U32},
    error::{Error, ErrorCode},
    response::{IfCondResponse, Ocr, R1Response},
    session::{CardKind, CardSession},
    ErrorFor, SdCardSpi,
};
use crate::{debug, error, info, warn};

use embedded_hal::blocking::{delay::DelayMs, spi::Transfer};
use switch_hal::OutputSwitch;

/// States of the initialization sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
enum InitState {
    PowerUp,
    GoIdleState,
    SendInterfaceCondition,
    AppCommand,
    SendOperatingCondition,
    ReadOcr,
    SetBlockLength(CardKind),
    Ready(CardKind),
}

impl<Spi: Transfer<u8>, Cs: OutputSwitch, Delay: DelayMs<u16>, Config: SdCardSpiConfig>
    SdCardSpi<Spi, Cs, Delay, Config>
where
    Spi::Error: core::fmt::Debug,
    Cs::Error: core::fmt::Debug,
{
    /// Runs the initialization sequence once.
    ///
    /// On success the session is initialized and the card type returned. On
    /// failure the session is reset, never left partially initialized.
    pub fn initialize_card(&mut self) -> Result<CardKind, ErrorFor<Self>> {
        info!("SD initialize started");

        self.session.set(CardSession::default());

        match self.run_init() {
            Ok(kind) => {
                info!("SD successfully initialized, type: {:?}", kind);
                self.session.set(CardSession::ready(kind));
                Ok(kind)
            }
            Err(err) => {
                let code = err.code();
                error!("Failed to initialize SD: {}", code.as_str());
                self.session.set(CardSession::failed(code.card_answered()));
                Err(err)
            }
        }
    }

    /// Send a command in its own chip select scope, `None` if the card didn't answer.
    fn poll_command(&self, cmd: u8, arg: u32) -> Result<Option<R1Response>, ErrorFor<Self>> {
        match self.command(cmd, arg) {
            Ok(r1) => Ok(Some(r1)),
            Err(Error::Card(ErrorCode::NoResponse(_))) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Release chip select and clock the card into SPI mode.
    fn power_up(&self) -> Result<(), ErrorFor<Self>> {
        self.unselect()?;

        for _ in 0..Config::POWER_UP_DUMMY_BYTES {
            self.send(tokens::IDLE)?;
        }

        self.delay.borrow_mut().delay_ms(Config::POWER_UP_DELAY_MS);

        Ok(())
    }

    /// GO_IDLE_STATE until the card reports the idle state.
    fn go_idle_state(&self) -> Result<(), ErrorFor<Self>> {
        for attempt in 0..Config::GO_IDLE_ATTEMPTS {
            match self.poll_command(commands::CMD0, 0)? {
                Some(R1Response::IN_IDLE_STATE) => return Ok(()),
                Some(r1) => warn!(
                    "Wrong response from CMD0: {:#x}, attempt: {}",
                    r1.raw(),
                    attempt + 1
                ),
                None => {}
            }
        }

        Err(ErrorCode::GoIdleFailed.into())
    }

    /// Verify SD Memory Card interface operating condition.
    fn send_if_cond(&self) -> Result<(), ErrorFor<Self>> {
        info!("Verifying SD Memory Card interface operating condition");

        for attempt in 0..Config::SEND_IF_COND_ATTEMPTS {
            let reply = self.cs_scope(|s| match s.send_command(commands::CMD8, args::IF_COND) {
                Ok(R1Response::IN_IDLE_STATE) => {
                    Ok(Some((R1Response::IN_IDLE_STATE, s.receive_payload()?)))
                }
                Ok(r1) => Ok(Some((r1, [0; 4]))),
                Err(Error::Card(ErrorCode::NoResponse(_))) => Ok(None),
                Err(err) => Err(err),
            })?;

            match reply {
                Some((R1Response::IN_IDLE_STATE, payload)) => {
                    return if IfCondResponse::from(payload).is_echo_valid() {
                        Ok(())
                    } else {
                        Err(ErrorCode::UnexpectedInterfaceResponse.into())
                    };
                }
                Some((r1, _)) if r1.illegal_command() => {
                    return Err(ErrorCode::LegacyCardUnsupported.into());
                }
                Some((r1, _)) => warn!(
                    "Wrong response from CMD8: {:#x}, attempt: {}",
                    r1.raw(),
                    attempt + 1
                ),
                None => {}
            }
        }

        Err(ErrorCode::InterfaceConditionFailed.into())
    }

    /// Read the OCR and classify the capacity of a v2+ card.
    fn read_ocr(&self) -> Result<CardKind, ErrorFor<Self>> {
        let ocr = self.cs_scope(|s| match s.send_command(commands::CMD58, 0) {
            Ok(R1Response::READY_STATE) => Ok(Some(Ocr::from(s.receive_payload()?))),
            Ok(_) | Err(Error::Card(ErrorCode::NoResponse(_))) => Ok(None),
            Err(err) => Err(err),
        })?;

        match ocr {
            Some(ocr) if ocr.card_capacity_status() => Ok(CardKind::HighCapacity),
            Some(_) => Ok(CardKind::StandardCapacityV2),
            None => Err(ErrorCode::ReadOcrFailed.into()),
        }
    }

    /// The state machine itself.
    fn run_init(&self) -> Result<CardKind, ErrorFor<Self>> {
        let mut state = InitState::PowerUp;
        let mut op_cond_attempts = 0;

        loop {
            debug!("SD init state: {:?}", state);

            state = match state {
                InitState::PowerUp => {
                    self.power_up()?;
                    InitState::GoIdleState
                }
                InitState::GoIdleState => {
                    self.go_idle_state()?;
                    InitState::SendInterfaceCondition
                }
                InitState::SendInterfaceCondition => {
                    self.send_if_cond()?;
                    InitState::AppCommand
                }
                InitState::AppCommand => {
                    match self.poll_command(commands::CMD55, 0)? {
                        Some(r1) if r1.is_ready_or_idle() => InitState::SendOperatingCondition,
                        _ => {
                            op_cond_attempts += 1;
                            if op_cond_attempts >= Config::OP_COND_ATTEMPTS {
                                return Err(ErrorCode::AppCommandFailed.into());
                            }
                            InitState::AppCommand
                        }
                    }
                }
                InitState::SendOperatingCondition => {
                    let r1 = self.poll_command(commands::ACMD41, args::OP_COND_HCS)?;
                    if r1 == Some(R1Response::READY_STATE) {
                        InitState::ReadOcr
                    } else {
                        op_cond_attempts += 1;
                        if op_cond_attempts >= Config::OP_COND_ATTEMPTS {
                            // still idle means present but stuck powering up
                            return Err(if r1 == Some(R1Response::IN_IDLE_STATE) {
                                ErrorCode::OpConditionTimeout
                            } else {
                                ErrorCode::OpConditionFailed
                            }
                            .into());
                        }
                        InitState::AppCommand
                    }
                }
                InitState::ReadOcr => {
                    let kind = self.read_ocr()?;
                    if kind == CardKind::HighCapacity {
                        InitState::Ready(kind)
                    } else {
                        InitState::SetBlockLength(kind)
                    }
                }
                InitState::SetBlockLength(kind) => {
                    match self.poll_command(commands::CMD16, BLOCK_SIZE_U32)? {
                        Some(R1Response::READY_STATE) => InitState::Ready(kind),
                        _ => return Err(ErrorCode::SetBlockLengthFailed.into()),
                    }
                }
                InitState::Ready(kind) => {
                    if let Some(fast_clock) = self.fast_clock {
                        fast_clock(&mut *self.spi.borrow_mut());
                    }
                    self.unselect()?;

                    return Ok(kind);
                }
            };
        }
    }
}

impl ErrorCode {
    /// The card answered GO_IDLE_STATE before this error, so one is present.
    fn card_answered(&self) -> bool {
        !matches!(
            self,
            ErrorCode::GoIdleFailed | ErrorCode::Transport | ErrorCode::ChipSelect
        )
    }
}
