//! The external-collaborator seam: traits the crate user implements to hook
//! the core up to real hardware -- resetting the MCU, a debug timestamp,
//! vendor-specific control requests. The tri-valued accept/reject/ignore
//! disposition for vendor requests mirrors
//! `usb_device::class::UsbClass::control_in`'s own contract: a handler that
//! doesn't recognize the request simply leaves the transfer untouched.

use usb_device::control::Recipient;

use crate::buffer::SLOT_SIZE;

/// Resets the device, or jumps to the user's firmware, once the bootloader
/// decides its job is done (manifestation) or unrecoverable (flash writer
/// retry exhaustion).
///
/// Real implementations reset the MCU or jump to the application image and
/// never hand control back; the trait itself does not force `-> !` so that
/// test doubles can simply record the call and return, relying on the
/// caller's own state (buffer already released, writer already idle) to make
/// that return a no-op.
pub trait Reboot {
    /// Perform the reset/jump. On real hardware this does not return.
    fn reboot(&mut self);
}

/// A free-running millisecond counter, used only for `defmt` diagnostics —
/// nothing in the protocol state machine reads it back.
pub trait Ticker {
    /// Current time in milliseconds since an arbitrary epoch.
    fn tick_now(&mut self) -> u32;
}

/// Outcome of a vendor-specific control request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum VendorDisposition {
    /// Request recognized and handled; `control_in`/`control_out` should
    /// accept the transfer.
    Handled,
    /// Request recognized but invalid (bad length, bad index, ...); the
    /// transfer should be rejected.
    Rejected,
    /// Request not recognized by this handler; the caller leaves the
    /// transfer untouched so another class (or the default stall) applies.
    Ignored,
}

/// The double buffer's two slots, handed to a [`VendorRequestHandler`] as
/// 8 KiB of scratch. It is the same memory the flash writer consumes, so a
/// vendor request must not be issued while a write is in flight.
pub type VendorScratch<'a> = (&'a mut [u8; SLOT_SIZE], &'a mut [u8; SLOT_SIZE]);

/// Delegate for vendor-class control requests addressed to the DFU
/// interface.
pub trait VendorRequestHandler {
    /// Handle `bRequest` from a host-to-device (`DNLOAD`-shaped) vendor
    /// transfer. `data` is the payload the host sent.
    fn control_out(
        &mut self,
        request: u8,
        value: u16,
        data: &[u8],
        scratch: VendorScratch,
    ) -> VendorDisposition;

    /// Handle `bRequest` from a device-to-host (`UPLOAD`-shaped) vendor
    /// transfer. On [`VendorDisposition::Handled`], the handler has written
    /// its response into `scratch.0[..len]`.
    fn control_in(
        &mut self,
        request: u8,
        value: u16,
        scratch: VendorScratch,
        len: &mut usize,
    ) -> VendorDisposition;
}

/// A [`VendorRequestHandler`] that recognizes nothing; the default for
/// callers with no vendor-specific requests to serve.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoVendorRequests;

impl VendorRequestHandler for NoVendorRequests {
    fn control_out(&mut self, _request: u8, _value: u16, _data: &[u8], _scratch: VendorScratch) -> VendorDisposition {
        VendorDisposition::Ignored
    }

    fn control_in(&mut self, _request: u8, _value: u16, _scratch: VendorScratch, _len: &mut usize) -> VendorDisposition {
        VendorDisposition::Ignored
    }
}

/// Recipient DFU vendor requests must target; only meaningful to callers
/// wiring their own `control_out`/`control_in` recipient filtering.
pub const VENDOR_RECIPIENT: Recipient = Recipient::Interface;
