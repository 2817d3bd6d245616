//! Cooperative flash writer task.
//!
//! `tick()` performs at most one SPI operation per call and never busy-waits
//! on the flash's busy bit; it is driven either from the main loop at
//! `>= 200 Hz`, or synchronously from the `GETSTATUS` manifest shortcut.

use crate::buffer::{DoubleBuffer, SLOT_SIZE};
use crate::error::SpiNorError;
use crate::flash::{verify_code, NorFlash, StatusRegister1};
use crate::hooks::Reboot;
use crate::spi::{ChipSelect, SpiTransport};
use crate::zone::FlashChip;

/// Current step of the writer's state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WriterOp {
    /// Nothing in flight.
    Idle,
    /// Verifying/erasing the target region.
    Erase,
    /// Programming (or re-verifying) the target region.
    Program,
}

/// Byte-addressed cursors the writer advances, shared with the DFU class.
#[derive(Debug, Clone, Copy, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AddrCursors {
    /// Next byte offset the host is allowed to send.
    pub recv: u32,
    /// Next byte offset for `UPLOAD` reads.
    pub read: u32,
    /// Next byte offset the writer will program.
    pub prog: u32,
    /// Rolling marker, `>= prog`, up to which erasure is guaranteed.
    pub erase: u32,
    /// Exclusive upper bound from the active zone.
    pub end: u32,
}

impl AddrCursors {
    /// Resets all four cursors to a newly selected zone's bounds.
    pub fn reset_to(&mut self, start: u32, end: u32) {
        self.recv = start;
        self.read = start;
        self.prog = start;
        self.erase = start;
        self.end = end;
    }
}

/// The cooperative erase/verify/program/retry task, generic over the erase
/// granularity in KiB (4, 32, or 64).
pub struct FlashWriter<const ERASE_KIB: u32> {
    op: WriterOp,
    op_ofs: usize,
    retry: u8,
    /// Verify classification from the last Erase-branch `verify()` call,
    /// held until the Program branch's re-verify pass recomputes it.
    should: u8,
    /// Set once when the retry budget hits zero; consumed (and cleared) by
    /// [`take_exhausted`](Self::take_exhausted).
    exhausted: bool,
}

/// Initial retry budget per 4 KiB buffer.
pub const INITIAL_RETRY: u8 = 4;

impl<const ERASE_KIB: u32> Default for FlashWriter<ERASE_KIB> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const ERASE_KIB: u32> FlashWriter<ERASE_KIB> {
    /// Builds an idle writer.
    pub const fn new() -> Self {
        Self {
            op: WriterOp::Idle,
            op_ofs: 0,
            retry: INITIAL_RETRY,
            should: verify_code::EQUAL,
            exhausted: false,
        }
    }

    /// Current step, for status reporting / diagnostics.
    pub fn op(&self) -> WriterOp {
        self.op
    }

    /// Returns whether the writer hit retry exhaustion since the last call,
    /// clearing the flag. The caller uses this to surface a wire error after
    /// a tick, without `tick()` itself needing a richer return type.
    pub fn take_exhausted(&mut self) -> bool {
        core::mem::take(&mut self.exhausted)
    }

    fn erase_bytes() -> u32 {
        ERASE_KIB * 1024
    }

    /// One tick of the writer. Performs at most one SPI operation.
    ///
    /// Returns `true` if the in-flight buffer was released this tick
    /// (either by successful commit or by fatal retry exhaustion), which is
    /// what the `GETSTATUS` manifest shortcut polls on to decide when
    /// `used == 0`.
    pub fn tick<SPI, CS, E, R>(
        &mut self,
        flash: &mut NorFlash<SPI, CS>,
        buf: &mut DoubleBuffer,
        cursors: &mut AddrCursors,
        selected: FlashChip,
        reboot: &mut R,
    ) -> bool
    where
        SPI: SpiTransport<Error = E>,
        CS: ChipSelect,
        R: Reboot,
    {
        if self.op == WriterOp::Idle {
            if buf.is_empty() {
                return false;
            }
            self.op = WriterOp::Erase;
            self.op_ofs = 0;
        } else {
            match flash.read_sr() {
                Ok(sr) if sr.contains(StatusRegister1::BUSY) => return false, // busy, come back later
                Ok(_) => {}
                Err(SpiNorError::Bus(_)) => return false, // bus errors treated as not-ready-yet, retried next tick
            }
        }

        flash.chip_select(selected);

        if self.retry == 0 {
            #[cfg(feature = "defmt")]
            defmt::error!("flash writer exhausted retries, rebooting");
            self.op = WriterOp::Idle;
            self.exhausted = true;
            buf.release_read();
            reboot.reboot();
        }

        // SAFETY/shape note: `buf.peek_read()` is `Some` whenever we get
        // here, because the only way `op` leaves `Idle` is the check above,
        // and the buffer is only released once the whole op completes.
        let slot = match buf.peek_read() {
            Some(s) => s,
            None => {
                self.op = WriterOp::Idle;
                return false;
            }
        };

        if self.op == WriterOp::Erase {
            let mut window = [0u8; SLOT_SIZE];
            window.copy_from_slice(slot);
            match flash.verify(&mut window, cursors.prog) {
                Ok(code) => self.should = code,
                Err(SpiNorError::Bus(_)) => return false,
            }

            if self.should & verify_code::ERASE_NEEDED == 0 {
                cursors.erase = cursors.prog + Self::erase_bytes();
                self.op = WriterOp::Program;
            } else {
                self.retry -= 1;
                cursors.erase = cursors.prog;
                let _ = flash.write_enable();
                let erase_result = match ERASE_KIB {
                    32 => flash.block_erase_32k(cursors.erase),
                    64 => flash.block_erase_64k(cursors.erase),
                    _ => flash.sector_erase_4k(cursors.erase),
                };
                if erase_result.is_err() {
                    return false;
                }
                cursors.erase += Self::erase_bytes();
                return true;
            }
        }

        if self.op == WriterOp::Program {
            if self.should & verify_code::WRITE_NEEDED == 0 {
                self.retry = INITIAL_RETRY;
                cursors.prog += SLOT_SIZE as u32;
                buf.release_read();
                self.op = WriterOp::Idle;
                return true;
            } else if self.op_ofs == SLOT_SIZE {
                self.retry -= 1;
                self.op_ofs = 0;
                self.op = WriterOp::Idle;
                return true;
            } else {
                let page_ofs = (cursors.prog as usize + self.op_ofs) & 0xff;
                let l = core::cmp::min(SLOT_SIZE - self.op_ofs, 256 - page_ofs);
                let _ = flash.write_enable();
                let addr = cursors.prog + self.op_ofs as u32;
                if flash
                    .page_program(&slot[self.op_ofs..self.op_ofs + l], addr)
                    .is_err()
                {
                    return false;
                }
                self.op_ofs += l;
                return true;
            }
        }

        false
    }
}
