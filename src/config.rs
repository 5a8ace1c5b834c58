/// Represents config for [`SdCardSpi`](crate::SdCardSpi).
///
/// Every blocking loop of the driver is bounded by one of these constants,
/// counted in attempts or byte slots rather than wall-clock time.
pub trait SdCardSpiConfig {
    /// Count of idle bytes clocked with chip select released at power up.
    const POWER_UP_DUMMY_BYTES: usize;
    /// Settle delay after power up, in milliseconds.
    const POWER_UP_DELAY_MS: u16;
    /// Max byte slots polled for a R1 response.
    const READ_R1_ATTEMPTS: usize;
    /// Max attempts to put the card into idle state.
    const GO_IDLE_ATTEMPTS: usize;
    /// Max attempts to verify the interface operating condition.
    const SEND_IF_COND_ATTEMPTS: usize;
    /// Max attempts shared by APP_CMD and SD_SEND_OP_COND.
    const OP_COND_ATTEMPTS: usize;
    /// Max byte slots polled for the data start token.
    const READ_TOKEN_ATTEMPTS: usize;
    /// Max byte slots polled while the card is busy programming.
    const WRITE_BUSY_ATTEMPTS: usize;
    /// Max attempts of the whole initialization sequence.
    const INIT_ATTEMPTS: usize;
    /// Erase block size hint, in sectors.
    const ERASE_BLOCK_SECTORS: u32;
    /// Check the CRC16 trailing every data block read from the card.
    const VERIFY_READ_CRC: bool;
}

/// Default implementation of [`SdCardSpiConfig`](crate::SdCardSpiConfig).
pub struct DefaultSdCardSpiConfig;

impl SdCardSpiConfig for DefaultSdCardSpiConfig {
    const POWER_UP_DUMMY_BYTES: usize = 10;
    const POWER_UP_DELAY_MS: u16 = 50;
    const READ_R1_ATTEMPTS: usize = 8;
    const GO_IDLE_ATTEMPTS: usize = 10;
    const SEND_IF_COND_ATTEMPTS: usize = 10;
    const OP_COND_ATTEMPTS: usize = 1000;
    const READ_TOKEN_ATTEMPTS: usize = 5000;
    const WRITE_BUSY_ATTEMPTS: usize = 65000;
    const INIT_ATTEMPTS: usize = 100;
    const ERASE_BLOCK_SECTORS: u32 = 32;
    const VERIFY_READ_CRC: bool = false;
}
