//! Simulated SD card on the far end of the SPI bus.
//!
//! The card decodes 6-byte command frames, checks their CRC on its own,
//! records every command and chip select edge, and answers with R1 one byte
//! slot late, the way real cards do.

#![allow(dead_code)]

use std::{
    cell::RefCell,
    collections::{HashMap, VecDeque},
    convert::Infallible,
    rc::Rc,
};

use embedded_hal::blocking::{delay::DelayMs, spi::Transfer};
use replica_sdcard::{SdCardSpi, SdCardSpiConfig};
use switch_hal::OutputSwitch;

pub const BLOCK_SIZE: usize = 512;

/// Capacity of every simulated card, in blocks.
pub const SIM_BLOCKS: u32 = 16384;

pub type Block = [u8; BLOCK_SIZE];

/// Driver under test.
pub type SdCard = SdCardSpi<FakeSpi, FakeCs, FakeDelay, TestConfig>;

/// Small bounds so failure paths finish quickly.
pub struct TestConfig;

impl SdCardSpiConfig for TestConfig {
    const POWER_UP_DUMMY_BYTES: usize = 10;
    const POWER_UP_DELAY_MS: u16 = 1;
    const READ_R1_ATTEMPTS: usize = 8;
    const GO_IDLE_ATTEMPTS: usize = 4;
    const SEND_IF_COND_ATTEMPTS: usize = 3;
    const OP_COND_ATTEMPTS: usize = 20;
    const READ_TOKEN_ATTEMPTS: usize = 64;
    const WRITE_BUSY_ATTEMPTS: usize = 64;
    const INIT_ATTEMPTS: usize = 3;
    const ERASE_BLOCK_SECTORS: u32 = 32;
    const VERIFY_READ_CRC: bool = true;
}

/// What kind of card sits in the slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behaviour {
    /// SDHC, block addressed.
    HighCapacity,
    /// SD v2 standard capacity, byte addressed.
    StandardCapacity,
    /// SD v1.x, SEND_IF_COND is illegal.
    Legacy,
    /// Nothing answers.
    Absent,
}

/// Misbehaviours switched on by tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct Faults {
    /// SD_SEND_OP_COND answers idle this many times before ready.
    pub op_cond_idle_polls: usize,
    /// Every R1 slot carries a byte with the top bit set.
    pub garbage_r1: bool,
    /// SEND_IF_COND echoes a wrong check pattern.
    pub bad_echo: bool,
    /// READ_SINGLE_BLOCK is accepted but no data token follows.
    pub read_token_never: bool,
    /// The card never leaves busy after a write.
    pub write_busy_forever: bool,
    /// Data response token sent instead of accepted.
    pub data_response: Option<u8>,
    pub write_protected: bool,
    pub locked: bool,
    /// R1 of every SEND_IF_COND, without payload.
    pub if_cond_r1: Option<u8>,
    /// R1 of every APP_CMD.
    pub app_cmd_r1: Option<u8>,
    /// R1 of READ_OCR, without payload.
    pub ocr_r1: Option<u8>,
    /// SET_BLOCKLEN answers with a parameter error.
    pub blocklen_reject: bool,
    /// Token sent in place of the data start token.
    pub read_token: Option<u8>,
    /// R1 of WRITE_BLOCK.
    pub write_cmd_r1: Option<u8>,
    /// CSD sent in place of the one matching the card.
    pub csd: Option<[u8; 16]>,
    /// Releasing chip select fails, the line stays asserted.
    pub cs_release_fails: bool,
}

/// One decoded command frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command {
    pub index: u8,
    pub arg: u32,
}

#[derive(Debug)]
enum Mode {
    Command,
    WriteToken(u32),
    WriteData(u32, Vec<u8>),
}

#[derive(Debug)]
pub struct CardModel {
    pub behaviour: Behaviour,
    pub faults: Faults,
    pub selected: bool,
    /// `true` for every assert, `false` for every release.
    pub cs_edges: Vec<bool>,
    pub commands: Vec<Command>,
    pub crc_errors: usize,
    pub delay_ms: u32,
    pub fast_clock: bool,
    pub storage: HashMap<u32, Block>,
    ready: bool,
    app_cmd: bool,
    op_cond_polls: usize,
    busy: bool,
    rx: Vec<u8>,
    tx: VecDeque<u8>,
    mode: Mode,
}

impl CardModel {
    pub fn new(behaviour: Behaviour) -> Self {
        CardModel {
            behaviour,
            faults: Faults::default(),
            selected: false,
            cs_edges: Vec::new(),
            commands: Vec::new(),
            crc_errors: 0,
            delay_ms: 0,
            fast_clock: false,
            storage: HashMap::new(),
            ready: false,
            app_cmd: false,
            op_cond_polls: 0,
            busy: false,
            rx: Vec::new(),
            tx: VecDeque::new(),
            mode: Mode::Command,
        }
    }

    /// Commands with the given index, in order.
    pub fn count(&self, index: u8) -> usize {
        self.commands.iter().filter(|c| c.index == index).count()
    }

    pub fn last_command(&self) -> Option<Command> {
        self.commands.last().copied()
    }

    /// Chip select ended released and was never asserted twice in a row.
    pub fn chip_select_released(&self) -> bool {
        !self.selected && self.cs_edges.windows(2).all(|pair| !(pair[0] && pair[1]))
    }

    pub fn block(&self, index: u32) -> Block {
        self.storage.get(&index).copied().unwrap_or([0; BLOCK_SIZE])
    }

    fn select(&mut self, selected: bool) {
        self.selected = selected;
        self.cs_edges.push(selected);

        if !selected {
            self.rx.clear();
            self.tx.clear();
            self.mode = Mode::Command;
            self.busy = false;
        }
    }

    /// One full-duplex byte slot.
    fn exchange(&mut self, mosi: u8) -> u8 {
        if !self.selected {
            return 0xFF;
        }

        let miso = match self.tx.pop_front() {
            Some(byte) => byte,
            None if self.busy => 0x00,
            None => 0xFF,
        };

        match &mut self.mode {
            Mode::Command => {
                if !self.rx.is_empty() || mosi & 0xC0 == 0x40 {
                    self.rx.push(mosi);
                }
                if self.rx.len() == 6 {
                    let frame: Vec<u8> = self.rx.drain(..).collect();
                    self.process(&frame);
                }
            }
            Mode::WriteToken(block) => {
                if mosi == 0xFE {
                    self.mode = Mode::WriteData(*block, Vec::with_capacity(BLOCK_SIZE + 2));
                }
            }
            Mode::WriteData(block, data) => {
                data.push(mosi);
                if data.len() == BLOCK_SIZE + 2 {
                    let block = *block;
                    let mut content = [0; BLOCK_SIZE];
                    content.copy_from_slice(&data[..BLOCK_SIZE]);
                    self.mode = Mode::Command;
                    self.finish_write(block, content);
                }
            }
        }

        miso
    }

    fn finish_write(&mut self, block: u32, content: Block) {
        if let Some(token) = self.faults.data_response {
            self.tx.push_back(token);
            return;
        }

        self.storage.insert(block, content);
        self.tx.push_back(0xE5);
        self.tx.extend([0x00; 3]);
        self.busy = self.faults.write_busy_forever;
    }

    fn reply(&mut self, r1: u8, payload: &[u8]) {
        self.tx.push_back(0xFF);
        self.tx.push_back(if self.faults.garbage_r1 { 0xC1 } else { r1 });
        self.tx.extend(payload.iter().copied());
    }

    fn data_block(&mut self, data: &[u8]) {
        let crc = crc16(data);
        self.tx.extend([0xFF, 0xFF, 0xFE]);
        self.tx.extend(data.iter().copied());
        self.tx.extend(crc.to_be_bytes());
    }

    /// Block index addressed by a read/write argument.
    fn address(&self, arg: u32) -> Option<u32> {
        let block = match self.behaviour {
            Behaviour::HighCapacity => arg,
            _ if arg % BLOCK_SIZE as u32 == 0 => arg / BLOCK_SIZE as u32,
            _ => return None,
        };

        (block < SIM_BLOCKS).then_some(block)
    }

    fn csd(&self) -> [u8; 16] {
        if let Some(csd) = self.faults.csd {
            return csd;
        }

        let csd: u128 = match self.behaviour {
            // version 2, C_SIZE 15
            Behaviour::HighCapacity => (1 << 126) | (9 << 80) | (15 << 48),
            // version 1, READ_BL_LEN 9, C_SIZE 31, C_SIZE_MULT 7
            _ => (9 << 80) | (31 << 62) | (7 << 47),
        };
        csd.to_be_bytes()
    }

    fn process(&mut self, frame: &[u8]) {
        if frame[5] != (crc7(&frame[..5]) << 1) | 0x01 {
            self.crc_errors += 1;
        }

        let index = frame[0] & 0x3F;
        let arg = u32::from_be_bytes([frame[1], frame[2], frame[3], frame[4]]);
        self.commands.push(Command { index, arg });

        if self.behaviour == Behaviour::Absent {
            return;
        }

        let app_cmd = std::mem::take(&mut self.app_cmd);
        let idle = if self.ready { 0x00 } else { 0x01 };
        let faults = self.faults;

        match (app_cmd, index) {
            (_, 0) => {
                self.ready = false;
                self.op_cond_polls = 0;
                self.reply(0x01, &[]);
            }
            (_, 8) => match (self.behaviour, faults.if_cond_r1) {
                (Behaviour::Legacy, _) => self.reply(0x05, &[]),
                (_, Some(r1)) => self.reply(r1, &[]),
                _ => {
                    let pattern = if faults.bad_echo { 0x55 } else { arg as u8 };
                    self.reply(0x01, &[0x00, 0x00, (arg >> 8) as u8 & 0x0F, pattern]);
                }
            },
            (_, 55) => {
                self.app_cmd = true;
                self.reply(faults.app_cmd_r1.unwrap_or(idle), &[]);
            }
            (true, 41) => {
                if self.op_cond_polls < self.faults.op_cond_idle_polls {
                    self.op_cond_polls += 1;
                    self.reply(0x01, &[]);
                } else {
                    self.ready = true;
                    self.reply(0x00, &[]);
                }
            }
            (_, 58) => match (self.behaviour, faults.ocr_r1) {
                (_, Some(r1)) => self.reply(r1, &[]),
                (Behaviour::HighCapacity, None) => self.reply(idle, &[0xC0, 0xFF, 0x80, 0x00]),
                _ => self.reply(idle, &[0x80, 0xFF, 0x80, 0x00]),
            },
            (_, 16) if faults.blocklen_reject => self.reply(0x40, &[]),
            (_, 16) if arg == BLOCK_SIZE as u32 => self.reply(idle, &[]),
            (_, 13) => {
                let status = if self.faults.locked {
                    0x01
                } else if self.faults.write_protected {
                    0x20
                } else {
                    0x00
                };
                self.reply(idle, &[status]);
            }
            (_, 9) => {
                self.reply(idle, &[]);
                let csd = self.csd();
                self.data_block(&csd);
            }
            (_, 17) => match self.address(arg) {
                Some(block) => {
                    self.reply(idle, &[]);
                    if let Some(token) = faults.read_token {
                        self.tx.extend([0xFF, token]);
                    } else if !faults.read_token_never {
                        let data = self.block(block);
                        self.data_block(&data);
                    }
                }
                None => self.reply(0x20, &[]),
            },
            (_, 24) => match (self.address(arg), faults.write_cmd_r1) {
                (Some(_), Some(r1)) => self.reply(r1, &[]),
                (Some(block), None) => {
                    self.reply(idle, &[]);
                    self.mode = Mode::WriteToken(block);
                }
                (None, _) => self.reply(0x20, &[]),
            },
            _ => self.reply(0x04 | idle, &[]),
        }
    }
}

pub struct FakeSpi {
    card: Rc<RefCell<CardModel>>,
}

impl FakeSpi {
    pub fn card(&self) -> &Rc<RefCell<CardModel>> {
        &self.card
    }
}

impl Transfer<u8> for FakeSpi {
    type Error = Infallible;

    fn transfer<'w>(&mut self, words: &'w mut [u8]) -> Result<&'w [u8], Self::Error> {
        let mut card = self.card.borrow_mut();
        for word in words.iter_mut() {
            *word = card.exchange(*word);
        }
        Ok(words)
    }
}

/// Chip select pin failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinError;

pub struct FakeCs {
    card: Rc<RefCell<CardModel>>,
}

impl OutputSwitch for FakeCs {
    type Error = PinError;

    fn on(&mut self) -> Result<(), Self::Error> {
        self.card.borrow_mut().select(true);
        Ok(())
    }

    fn off(&mut self) -> Result<(), Self::Error> {
        let mut card = self.card.borrow_mut();
        if card.faults.cs_release_fails {
            return Err(PinError);
        }
        card.select(false);
        Ok(())
    }
}

pub struct FakeDelay {
    card: Rc<RefCell<CardModel>>,
}

impl DelayMs<u16> for FakeDelay {
    fn delay_ms(&mut self, ms: u16) {
        self.card.borrow_mut().delay_ms += u32::from(ms);
    }
}

/// Driver wired to a fresh simulated card.
pub fn sd_card(behaviour: Behaviour) -> (SdCard, Rc<RefCell<CardModel>>) {
    sd_card_with(behaviour, Faults::default())
}

pub fn sd_card_with(behaviour: Behaviour, faults: Faults) -> (SdCard, Rc<RefCell<CardModel>>) {
    init_logger();

    let mut model = CardModel::new(behaviour);
    model.faults = faults;
    let card = Rc::new(RefCell::new(model));

    let sd = SdCardSpi::new(
        FakeSpi { card: card.clone() },
        FakeCs { card: card.clone() },
        FakeDelay { card: card.clone() },
    );

    (sd, card)
}

/// Driver with an initialized card.
pub fn ready_card(behaviour: Behaviour) -> (SdCard, Rc<RefCell<CardModel>>) {
    let (mut sd, card) = sd_card(behaviour);
    sd.initialize_card().unwrap();
    (sd, card)
}

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Block filled with a pattern derived from its index.
pub fn pattern(index: u32) -> Block {
    let mut block = [0; BLOCK_SIZE];
    for (i, byte) in block.iter_mut().enumerate() {
        *byte = (i as u32).wrapping_mul(31).wrapping_add(index) as u8;
    }
    block
}

/// CRC-7 computed bit by bit, independent of the driver's.
pub fn crc7(data: &[u8]) -> u8 {
    let mut crc = 0u8;
    for &byte in data {
        for bit in (0..8).rev() {
            let input = (byte >> bit) & 1;
            let top = (crc >> 6) & 1;
            crc = (crc << 1) & 0x7F;
            if input ^ top == 1 {
                crc ^= 0x09;
            }
        }
    }
    crc
}

/// CRC-16/XMODEM computed bit by bit.
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc = 0u16;
    for &byte in data {
        crc ^= u16::from(byte) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ 0x1021
            } else {
                crc << 1
            };
        }
    }
    crc
}
