//! Compile-time flash zone table.
//!
//! Each USB alternate setting on the DFU interface selects one zone: a
//! `(flash_chip, start, end)` triple. Exactly one zone is active at a time.

/// Which physical SPI NOR part a zone lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FlashChip {
    /// The board's internal (soldered) flash.
    Internal,
    /// A flash chip on a removable cartridge.
    Cart,
}

/// A writable region of a [`FlashChip`], selected by alt-setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Zone {
    /// Chip this zone lives on.
    pub flash_chip: FlashChip,
    /// Inclusive start address, byte-addressed.
    pub start: u32,
    /// Exclusive end address, byte-addressed.
    pub end: u32,
}

/// Shipped default zone table, indexed by alternate setting.
pub const ZONES: &[Zone] = &[
    // alt 0
    Zone {
        flash_chip: FlashChip::Internal,
        start: 0x0020_0000,
        end: 0x0100_0000,
    },
    // alt 1
    Zone {
        flash_chip: FlashChip::Internal,
        start: 0x0034_0000,
        end: 0x0038_0000,
    },
    // alt 2
    Zone {
        flash_chip: FlashChip::Internal,
        start: 0x0038_0000,
        end: 0x0100_0000,
    },
    // alt 3
    Zone {
        flash_chip: FlashChip::Internal,
        start: 0x0040_0000,
        end: 0x0100_0000,
    },
    // alt 4
    Zone {
        flash_chip: FlashChip::Internal,
        start: 0x0080_0000,
        end: 0x0100_0000,
    },
    // alt 5
    Zone {
        flash_chip: FlashChip::Internal,
        start: 0x0000_0000,
        end: 0x0020_0000,
    },
    // alt 6
    Zone {
        flash_chip: FlashChip::Cart,
        start: 0x0000_0000,
        end: 0x0000_0100,
    },
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_has_seven_zones() {
        assert_eq!(ZONES.len(), 7);
    }

    #[test]
    fn every_zone_is_well_formed() {
        for z in ZONES {
            assert!(z.start <= z.end);
        }
    }

    #[test]
    fn alt_six_is_the_cart() {
        assert_eq!(ZONES[6].flash_chip, FlashChip::Cart);
        assert_eq!(ZONES[6].start, 0);
        assert_eq!(ZONES[6].end, 0x100);
    }
}
