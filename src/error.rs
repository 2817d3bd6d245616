//! Error types used across the core.
//!
//! DFU-facing errors are represented as [`DfuStatus`] values, the wire
//! status code reported via `GETSTATUS`. SPI/flash bus errors are not part
//! of that wire vocabulary -- the flash is assumed to be on-board and
//! reliable, so a bus error is surfaced only through [`SpiNorError`], used
//! by the driver's internal `Result` plumbing and logging.

use core::fmt;

/// DFU status code, reported to the host in `GETSTATUS`.
///
/// This is the full DFU 1.1a status table, not just `OK`/`errUNKNOWN` --
/// trimming it down would remove diagnostic value for no benefit.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DfuStatus {
    /// No error condition is present.
    Ok = 0x00,
    /// File is not targeted for use by this device.
    ErrTarget = 0x01,
    /// File is for this device but fails some vendor-specific verification test.
    ErrFile = 0x02,
    /// Device is unable to write memory.
    ErrWrite = 0x03,
    /// Memory erase function failed.
    ErrErase = 0x04,
    /// Memory erase check failed.
    ErrCheckErased = 0x05,
    /// Program memory function failed.
    ErrProg = 0x06,
    /// Programmed memory failed verification.
    ErrVerify = 0x07,
    /// Cannot program memory due to received address that is out of range.
    ErrAddress = 0x08,
    /// Received `DNLOAD` with `wLength = 0`, but device does not think it has all the data yet.
    ErrNotDone = 0x09,
    /// Device's firmware is corrupt. It cannot return to run-time (non-DFU) operations.
    ErrFirmware = 0x0A,
    /// iString indicates a vendor-specific error.
    ErrVendor = 0x0B,
    /// Device detected unexpected USB reset signaling.
    ErrUsbr = 0x0C,
    /// Device detected unexpected power-on reset.
    ErrPor = 0x0D,
    /// Something went wrong, but the device does not know what it was.
    ErrUnknown = 0x0E,
    /// Device stalled an unexpected request.
    ErrStalledPkt = 0x0F,
}

/// Internal classification of why a request was rejected, before it is
/// collapsed onto a [`DfuStatus`] for the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DfuError {
    /// `DNLOAD` would push `addr_recv` past `addr_end`.
    BoundsViolation,
    /// The request is not in the allowed set for the current state.
    DisallowedRequest,
    /// The flash writer exhausted its retry budget on the current buffer.
    WriterExhausted,
}

impl From<DfuError> for DfuStatus {
    fn from(e: DfuError) -> Self {
        match e {
            // Both a bounds violation and a disallowed request collapse
            // onto `errUNKNOWN`, not a more specific code.
            DfuError::BoundsViolation => DfuStatus::ErrUnknown,
            DfuError::DisallowedRequest => DfuStatus::ErrUnknown,
            DfuError::WriterExhausted => DfuStatus::ErrWrite,
        }
    }
}

/// SPI/NOR driver failure. Never surfaced on the wire (see module docs);
/// exists so `flash`/`spi` can return `Result` rather than panic, and so a
/// `defmt` log can be emitted before the writer treats the buffer as stuck.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SpiNorError<E> {
    /// The underlying `embedded-hal` SPI bus returned an error.
    Bus(E),
}

impl<E: fmt::Debug> fmt::Display for SpiNorError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpiNorError::Bus(e) => write!(f, "SPI bus error: {:?}", e),
        }
    }
}

impl<E> SpiNorError<E> {
    /// Wraps a bus error. Used at call sites as `.map_err(SpiNorError::Bus)`.
    pub fn bus(e: E) -> Self {
        SpiNorError::Bus(e)
    }
}
