//! JEDEC SPI NOR flash command wrappers over [`crate::spi`].

use bitflags::bitflags;

use crate::error::SpiNorError;
use crate::spi::{ChipSelect, SpiChunk, SpiTransport};
use crate::zone::FlashChip;

/// SPI NOR command opcodes.
pub mod opcode {
    /// Set the write enable latch.
    pub const WRITE_ENABLE: u8 = 0x06;
    /// Read status register 1.
    pub const READ_SR1: u8 = 0x05;
    /// Read data.
    pub const READ: u8 = 0x03;
    /// Page program.
    pub const PAGE_PROGRAM: u8 = 0x02;
    /// 4 KiB sector erase.
    pub const SECTOR_ERASE_4K: u8 = 0x20;
    /// 32 KiB block erase.
    pub const BLOCK_ERASE_32K: u8 = 0x52;
    /// 64 KiB block erase.
    pub const BLOCK_ERASE_64K: u8 = 0xD8;
    /// Wake the flash from deep power-down.
    pub const WAKE_UP: u8 = 0xAB;
    /// Enable software reset.
    pub const RESET_ENABLE: u8 = 0x66;
    /// Execute software reset.
    pub const RESET_EXECUTE: u8 = 0x99;
    /// Exit QPI mode.
    pub const QPI_EXIT: u8 = 0xFF;
    /// Read JEDEC manufacturer/device ID.
    pub const JEDEC_ID: u8 = 0x9F;
}

bitflags! {
    /// Status register 1 bits.
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct StatusRegister1: u8 {
        /// Erase/write in progress.
        const BUSY = 1 << 0;
        /// Write enable latch.
        const WEL = 1 << 1;
    }
}

/// The 2-bit verify classification `verify()` returns.
pub mod verify_code {
    /// Flash contents already match; no erase or program needed.
    pub const EQUAL: u8 = 0;
    /// Bit set when the target region needs an erase first.
    pub const ERASE_NEEDED: u8 = 0b01;
    /// Bit set when the target region needs a page-program.
    pub const WRITE_NEEDED: u8 = 0b10;
    /// An erase is required (and, per the collapsing rule, a write too).
    pub const ERASE_AND_WRITE: u8 = ERASE_NEEDED | WRITE_NEEDED;
    /// Only a write (page program) is required.
    pub const WRITE_ONLY: u8 = WRITE_NEEDED;
}

/// 24-bit big-endian address encoding shared by all addressed commands.
fn addr24(addr: u32) -> [u8; 3] {
    [(addr >> 16) as u8, (addr >> 8) as u8, addr as u8]
}

/// Thin JEDEC command wrapper over a SPI bus, selectable between two
/// physical chips.
pub struct NorFlash<SPI, CS> {
    spi: SPI,
    internal_cs: CS,
    cart_cs: CS,
    selected: FlashChip,
}

impl<SPI, CS, E> NorFlash<SPI, CS>
where
    SPI: SpiTransport<Error = E>,
    CS: ChipSelect,
{
    /// Builds a driver over the given bus and the two chip-select pins.
    pub fn new(spi: SPI, internal_cs: CS, cart_cs: CS) -> Self {
        Self {
            spi,
            internal_cs,
            cart_cs,
            selected: FlashChip::Internal,
        }
    }

    /// Switches which chip subsequent commands target.
    pub fn chip_select(&mut self, id: FlashChip) {
        self.selected = id;
    }

    /// Reads status register 1.
    pub fn read_sr(&mut self) -> Result<StatusRegister1, SpiNorError<E>> {
        let mut op = [opcode::READ_SR1];
        let mut sr = [0u8];
        let mut chunks = [SpiChunk::command(&mut op), SpiChunk::response(&mut sr)];
        let selected = self.selected;
        let (spi, cs) = self.parts(selected);
        spi.xfer(cs, &mut chunks).map_err(SpiNorError::bus)?;
        Ok(StatusRegister1::from_bits_truncate(sr[0]))
    }

    /// Issues `0x06` (write enable).
    pub fn write_enable(&mut self) -> Result<(), SpiNorError<E>> {
        let mut op = [opcode::WRITE_ENABLE];
        let mut chunks = [SpiChunk::command(&mut op)];
        let selected = self.selected;
        let (spi, cs) = self.parts(selected);
        spi.xfer(cs, &mut chunks).map_err(SpiNorError::bus)
    }

    /// Reads `dst.len()` bytes starting at 24-bit `addr` via opcode `0x03`.
    pub fn read(&mut self, dst: &mut [u8], addr: u32) -> Result<(), SpiNorError<E>> {
        let mut op = [opcode::READ, 0, 0, 0];
        op[1..].copy_from_slice(&addr24(addr));
        let mut chunks = [SpiChunk::command(&mut op), SpiChunk::response(dst)];
        let selected = self.selected;
        let (spi, cs) = self.parts(selected);
        spi.xfer(cs, &mut chunks).map_err(SpiNorError::bus)
    }

    /// Reads `src.len()` bytes at `addr` and classifies versus `src`,
    /// returning the 2-bit classification code (never `1`).
    pub fn verify(&mut self, src: &mut [u8], addr: u32) -> Result<u8, SpiNorError<E>> {
        let mut op = [opcode::READ, 0, 0, 0];
        op[1..].copy_from_slice(&addr24(addr));
        let mut chunks = [SpiChunk::command(&mut op), SpiChunk::response(src)];
        let selected = self.selected;
        let (spi, cs) = self.parts(selected);
        spi.xfer_verify(cs, &mut chunks).map_err(SpiNorError::bus)
    }

    /// Issues `0x02` (page program). `addr` and `addr + src.len() - 1` must
    /// share the same 256-byte page, and `src.len() <= 256`; both are the
    /// caller's responsibility.
    pub fn page_program(&mut self, src: &[u8], addr: u32) -> Result<(), SpiNorError<E>> {
        debug_assert!(src.len() <= 256);
        debug_assert_eq!(
            addr / 256,
            (addr + src.len() as u32 - 1) / 256,
            "page_program must not cross a 256-byte page boundary"
        );
        let mut op = [opcode::PAGE_PROGRAM, 0, 0, 0];
        op[1..].copy_from_slice(&addr24(addr));
        let mut payload = heapless::Vec::<u8, 256>::new();
        payload.extend_from_slice(src).ok();
        let mut chunks = [
            SpiChunk::command(&mut op),
            SpiChunk::command(payload.as_mut_slice()),
        ];
        let selected = self.selected;
        let (spi, cs) = self.parts(selected);
        spi.xfer(cs, &mut chunks).map_err(SpiNorError::bus)
    }

    /// 4 KiB sector erase at `addr`.
    pub fn sector_erase_4k(&mut self, addr: u32) -> Result<(), SpiNorError<E>> {
        self.erase(opcode::SECTOR_ERASE_4K, addr)
    }

    /// 32 KiB block erase at `addr`.
    pub fn block_erase_32k(&mut self, addr: u32) -> Result<(), SpiNorError<E>> {
        self.erase(opcode::BLOCK_ERASE_32K, addr)
    }

    /// 64 KiB block erase at `addr`.
    pub fn block_erase_64k(&mut self, addr: u32) -> Result<(), SpiNorError<E>> {
        self.erase(opcode::BLOCK_ERASE_64K, addr)
    }

    fn erase(&mut self, op_code: u8, addr: u32) -> Result<(), SpiNorError<E>> {
        let mut op = [op_code, 0, 0, 0];
        op[1..].copy_from_slice(&addr24(addr));
        let mut chunks = [SpiChunk::command(&mut op)];
        let selected = self.selected;
        let (spi, cs) = self.parts(selected);
        spi.xfer(cs, &mut chunks).map_err(SpiNorError::bus)
    }

    /// Wakes the flash from deep power-down (`0xAB`). Boot-time only.
    pub fn wake_up(&mut self) -> Result<(), SpiNorError<E>> {
        let mut op = [opcode::WAKE_UP];
        let mut chunks = [SpiChunk::command(&mut op)];
        let selected = self.selected;
        let (spi, cs) = self.parts(selected);
        spi.xfer(cs, &mut chunks).map_err(SpiNorError::bus)
    }

    /// Issues the reset-enable/reset-execute sequence (`0x66`, `0x99`).
    /// Boot-time only.
    pub fn reset(&mut self) -> Result<(), SpiNorError<E>> {
        {
            let mut op = [opcode::RESET_ENABLE];
            let mut chunks = [SpiChunk::command(&mut op)];
            let selected = self.selected;
            let (spi, cs) = self.parts(selected);
            spi.xfer(cs, &mut chunks).map_err(SpiNorError::bus)?;
        }
        let mut op = [opcode::RESET_EXECUTE];
        let mut chunks = [SpiChunk::command(&mut op)];
        let selected = self.selected;
        let (spi, cs) = self.parts(selected);
        spi.xfer(cs, &mut chunks).map_err(SpiNorError::bus)
    }

    /// Exits QPI mode (`0xFF`). Issued in quad mode at boot.
    pub fn qpi_exit(&mut self) -> Result<(), SpiNorError<E>> {
        let mut op = [opcode::QPI_EXIT];
        let mut chunks = [SpiChunk::command(&mut op)];
        let selected = self.selected;
        let (spi, cs) = self.parts(selected);
        spi.xfer(cs, &mut chunks).map_err(SpiNorError::bus)
    }

    /// Reads the 3-byte JEDEC manufacturer/device ID (`0x9F`).
    pub fn jedec_id(&mut self) -> Result<[u8; 3], SpiNorError<E>> {
        let mut op = [opcode::JEDEC_ID];
        let mut id = [0u8; 3];
        let mut chunks = [SpiChunk::command(&mut op), SpiChunk::response(&mut id)];
        let selected = self.selected;
        let (spi, cs) = self.parts(selected);
        spi.xfer(cs, &mut chunks).map_err(SpiNorError::bus)?;
        Ok(id)
    }

    fn parts(&mut self, selected: FlashChip) -> (&mut SPI, &mut CS) {
        let cs = match selected {
            FlashChip::Internal => &mut self.internal_cs,
            FlashChip::Cart => &mut self.cart_cs,
        };
        (&mut self.spi, cs)
    }
}
