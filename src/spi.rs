//! Chip-select aware byte-serial SPI transport.
//!
//! Unlike `embedded-hal`'s `SpiDevice`, which asserts and releases chip
//! select around a single `transaction()` call, this transport takes
//! explicit control of chip select so a command phase and a response phase
//! (e.g. opcode bytes, then readback bytes) can be programmed as separate
//! chunks while CS stays asserted across both.

use embedded_hal::digital::OutputPin;
use embedded_hal::spi::SpiBus;

/// One leg of a transfer: a buffer, and whether to drive it (`do_write`)
/// and/or capture readback into it (`do_read`).
pub struct SpiChunk<'a> {
    /// Bytes to drive (if `do_write`) and/or capture into (if `do_read`).
    pub buffer: &'a mut [u8],
    /// If true, read back bytes are captured into `buffer`.
    pub do_read: bool,
    /// If true, `buffer`'s bytes are driven on MOSI; otherwise `0x00` is driven.
    pub do_write: bool,
}

impl<'a> SpiChunk<'a> {
    /// Command phase: drive `buffer`, discard readback.
    pub fn command(buffer: &'a mut [u8]) -> Self {
        Self {
            buffer,
            do_read: false,
            do_write: true,
        }
    }

    /// Response phase: drive nothing (`0x00`), capture readback into `buffer`.
    pub fn response(buffer: &'a mut [u8]) -> Self {
        Self {
            buffer,
            do_read: true,
            do_write: false,
        }
    }
}

/// A chip-select pin the caller wants asserted for the duration of a
/// transfer. One implementor per physical flash chip.
pub trait ChipSelect {
    /// Pull the line active.
    fn assert(&mut self);
    /// Release the line.
    fn release(&mut self);
}

impl<P: OutputPin> ChipSelect for P {
    fn assert(&mut self) {
        let _ = self.set_low();
    }
    fn release(&mut self) {
        let _ = self.set_high();
    }
}

/// Byte-serial transfer operations over a SPI bus with caller-managed CS.
pub trait SpiTransport {
    /// Underlying bus error type.
    type Error;

    /// Asserts `cs`, drives/captures each chunk in order, releases `cs`.
    fn xfer<CS: ChipSelect>(
        &mut self,
        cs: &mut CS,
        chunks: &mut [SpiChunk],
    ) -> Result<(), Self::Error>;

    /// Like [`xfer`](Self::xfer), but for chunks with `do_read` set,
    /// classifies the read-back bytes against the caller's buffer contents
    /// instead of overwriting them:
    ///
    /// - bit 0 ("erase needed") is set if any byte has `(expected & actual)
    ///   != expected` -- some bit the caller wants as `1` is currently `0`.
    /// - bit 1 ("write needed") is set if any byte has `expected != actual`.
    ///
    /// The erase-needed bit, if set, also forces the write-needed bit, so
    /// the only values ever returned are `0`, `2`, or `3` -- `1` is
    /// unreachable by construction.
    fn xfer_verify<CS: ChipSelect>(
        &mut self,
        cs: &mut CS,
        chunks: &mut [SpiChunk],
    ) -> Result<u8, Self::Error>;
}

impl<B: SpiBus> SpiTransport for B {
    type Error = <B as embedded_hal::spi::ErrorType>::Error;

    fn xfer<CS: ChipSelect>(
        &mut self,
        cs: &mut CS,
        chunks: &mut [SpiChunk],
    ) -> Result<(), Self::Error> {
        cs.assert();
        let result = (|| {
            for chunk in chunks.iter_mut() {
                transfer_chunk(self, chunk, None)?;
            }
            Ok(())
        })();
        cs.release();
        result
    }

    fn xfer_verify<CS: ChipSelect>(
        &mut self,
        cs: &mut CS,
        chunks: &mut [SpiChunk],
    ) -> Result<u8, Self::Error> {
        cs.assert();
        let mut code = 0u8;
        let result = (|| {
            for chunk in chunks.iter_mut() {
                transfer_chunk(self, chunk, Some(&mut code))?;
            }
            Ok(())
        })();
        cs.release();
        result?;

        if code & 0x1 != 0 {
            code |= 0x2;
        }
        debug_assert_ne!(code, 1, "erase-needed must always imply write-needed");
        Ok(code)
    }
}

/// Drives/captures one chunk byte by byte. When `verify` is `Some`, read
/// back bytes are classified against `chunk.buffer`'s existing contents
/// instead of overwriting it.
fn transfer_chunk<B: SpiBus>(
    bus: &mut B,
    chunk: &mut SpiChunk,
    verify: Option<&mut u8>,
) -> Result<(), B::Error> {
    match verify {
        None => {
            for i in 0..chunk.buffer.len() {
                let out = if chunk.do_write { chunk.buffer[i] } else { 0x00 };
                let mut inbuf = [0u8];
                bus.transfer(&mut inbuf, &[out])?;
                if chunk.do_read {
                    chunk.buffer[i] = inbuf[0];
                }
            }
            Ok(())
        }
        Some(code) => {
            for i in 0..chunk.buffer.len() {
                let out = if chunk.do_write { chunk.buffer[i] } else { 0x00 };
                let mut inbuf = [0u8];
                bus.transfer(&mut inbuf, &[out])?;
                let actual = inbuf[0];
                if chunk.do_read {
                    let expected = chunk.buffer[i];
                    if (expected & actual) != expected {
                        *code |= 0x1;
                    }
                    if expected != actual {
                        *code |= 0x2;
                    }
                }
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// In-memory mock `SpiBus` simulating a single flash array: writes
    /// (page program) only ever clear bits, a separate "erase" operation
    /// the test drives directly sets bytes back to `0xFF`.
    struct MockBus {
        mem: [u8; 64],
        cursor: usize,
    }

    impl MockBus {
        fn new() -> Self {
            Self {
                mem: [0u8; 64],
                cursor: 0,
            }
        }
    }

    impl embedded_hal::spi::ErrorType for MockBus {
        type Error = core::convert::Infallible;
    }

    impl SpiBus for MockBus {
        fn read(&mut self, words: &mut [u8]) -> Result<(), Self::Error> {
            for w in words.iter_mut() {
                *w = self.mem[self.cursor % self.mem.len()];
                self.cursor += 1;
            }
            Ok(())
        }
        fn write(&mut self, words: &[u8]) -> Result<(), Self::Error> {
            for &w in words {
                self.mem[self.cursor % self.mem.len()] &= w;
                self.cursor += 1;
            }
            Ok(())
        }
        fn transfer(&mut self, read: &mut [u8], write: &[u8]) -> Result<(), Self::Error> {
            for (r, &w) in read.iter_mut().zip(write.iter()) {
                let idx = self.cursor % self.mem.len();
                *r = self.mem[idx];
                self.mem[idx] &= w;
                self.cursor += 1;
            }
            Ok(())
        }
        fn transfer_in_place(&mut self, words: &mut [u8]) -> Result<(), Self::Error> {
            for w in words.iter_mut() {
                let idx = self.cursor % self.mem.len();
                let r = self.mem[idx];
                self.mem[idx] &= *w;
                *w = r;
                self.cursor += 1;
            }
            Ok(())
        }
        fn flush(&mut self) -> Result<(), Self::Error> {
            Ok(())
        }
    }

    struct FakeCs(bool);
    impl ChipSelect for FakeCs {
        fn assert(&mut self) {
            self.0 = true;
        }
        fn release(&mut self) {
            self.0 = false;
        }
    }

    #[test]
    fn equal_classifies_as_zero() {
        let mut bus = MockBus::new();
        bus.cursor = 0;
        let mut cs = FakeCs(false);
        let mut expected = [0u8; 4]; // matches zeroed mem
        let mut chunks = [SpiChunk::response(&mut expected)];
        let code = bus.xfer_verify(&mut cs, &mut chunks).unwrap();
        assert_eq!(code, 0);
        assert!(!cs.0);
    }

    #[test]
    fn needs_erase_implies_write_too() {
        let mut bus = MockBus::new();
        bus.mem[0] = 0x00; // actual has a 0 bit the caller wants set
        let mut cs = FakeCs(false);
        let mut expected = [0xFFu8];
        let mut chunks = [SpiChunk::response(&mut expected)];
        let code = bus.xfer_verify(&mut cs, &mut chunks).unwrap();
        assert_eq!(code, 0b11);
    }

    #[test]
    fn write_only_when_bits_only_need_clearing() {
        let mut bus = MockBus::new();
        bus.mem[0] = 0xFF; // actual all ones, caller wants fewer ones: no erase needed
        let mut cs = FakeCs(false);
        let mut expected = [0x0Fu8];
        let mut chunks = [SpiChunk::response(&mut expected)];
        let code = bus.xfer_verify(&mut cs, &mut chunks).unwrap();
        assert_eq!(code, 0b10);
    }
}
