use crate::consts::BLOCK_SIZE_U32;

/// Card type, as found by the initialization sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
pub enum CardKind {
    /// Not initialized yet.
    #[default]
    Unknown,
    /// SD v1.x, standard capacity. Detected but not supported.
    LegacyStandardCapacity,
    /// SD v2+, standard capacity (SDSC), byte addressed.
    StandardCapacityV2,
    /// SD v2+, high capacity (SDHC/SDXC), block addressed.
    HighCapacity,
}

impl CardKind {
    /// Command argument addressing the given 512-byte block.
    ///
    /// Standard capacity cards take a byte offset, high capacity cards take
    /// the block index itself. Returns `None` when the byte offset overflows.
    pub fn block_address(&self, index: u32) -> Option<u32> {
        match self {
            CardKind::HighCapacity => Some(index),
            _ => index.checked_mul(BLOCK_SIZE_U32),
        }
    }
}

/// State of the one attached card.
///
/// Populated only by a successful initialization. A failed attempt leaves it
/// in its default state, never partially initialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
pub struct CardSession {
    /// Type of the card, decides the address encoding.
    pub card_kind: CardKind,
    /// No block operation is valid before this is set.
    pub initialized: bool,
    /// The card reported a write protect violation.
    pub protected: bool,
    /// No card answered.
    pub no_disk: bool,
}

impl Default for CardSession {
    fn default() -> Self {
        CardSession {
            card_kind: CardKind::Unknown,
            initialized: false,
            protected: false,
            no_disk: true,
        }
    }
}

impl CardSession {
    /// Session of a card that finished initialization.
    pub fn ready(card_kind: CardKind) -> Self {
        CardSession {
            card_kind,
            initialized: true,
            protected: false,
            no_disk: false,
        }
    }

    /// Session left behind by a failed initialization.
    pub fn failed(card_answered: bool) -> Self {
        CardSession {
            no_disk: !card_answered,
            ..Default::default()
        }
    }
}
