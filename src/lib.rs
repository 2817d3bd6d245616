#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]
//!
//! A DFU-mode USB bootloader core for a board with one or two SPI NOR flash
//! chips, built on `usb-device`.
//!
//! ## About
//!
//! DFU protocol version 1.1a is implemented as a `usb_device::class::UsbClass`
//! ([`DfuClass`]). Unlike a typical DFU implementation that programs flash
//! synchronously from inside the USB interrupt handler, this core splits the
//! job in two: the USB side only ever copies a control transfer into a
//! double buffer ([`buffer::DoubleBuffer`]), and a separate cooperative task
//! ([`writer::FlashWriter`]) erases/programs/verifies it a step at a time.
//! Ticking the writer is the caller's job: call `DfuCore::poll_writer` (or
//! `DfuClass::poll_writer`) from the main loop at `>= 200 Hz`, or let
//! `GETSTATUS`'s manifestation shortcut drain it synchronously once the host
//! sends `wLength = 0`.
//!
//! This is a protocol implementation only: the USB device/configuration
//! descriptor assembly, board bring-up, and GPIO/SPI peripheral
//! initialization are the caller's job, same as with any other
//! `usb_device::class::UsbClass`.
//!
//! ### Supported operations
//!
//! * Upload (device to host) and download (host to device), as raw streamed
//!   bytes rather than vendor block commands.
//! * Erase-on-demand with a variable sector size (4, 32, or 64 KiB),
//!   choosing the smallest erase that covers each incoming buffer.
//! * Selecting between up to two physical SPI NOR chips and several flash
//!   zones via the DFU alternate-setting mechanism.
//!
//! ### Not supported operations
//!
//! * Runtime (non-DFU) USB operation -- this core only ever runs in DFU
//!   mode; `appIdle`/`appDetach` exist solely as states reachable on the
//!   wire.
//! * Detection of SPI bus-level errors: the flash is assumed to be on-board
//!   and reliable; a bus error is treated the same as "not ready yet" and
//!   retried on the next tick.
//!
//! ## Example
//!
//! The example below focuses on wiring [`core::DfuCore`] together; board
//! initialization (clocks, GPIO, the SPI peripheral, the `usb-device` HAL
//! bus) is not in scope here. See the crate's `demos/` directory for a
//! fuller sketch.
//!
//! ```ignore
//! use usb_device::prelude::*;
//! use apf_dfu_bootloader::core::DfuCore;
//! use apf_dfu_bootloader::hooks::{NoVendorRequests, Reboot, Ticker};
//!
//! struct BoardHooks;
//!
//! impl Reboot for BoardHooks {
//!     fn reboot(&mut self) {
//!         // Jump to the application image / reset the MCU. Never returns
//!         // on real hardware.
//!         loop {}
//!     }
//! }
//!
//! impl Ticker for BoardHooks {
//!     fn tick_now(&mut self) -> u32 {
//!         board::millis()
//!     }
//! }
//!
//! let usb_bus_alloc = UsbBus::new(peripheral);
//! let mut dfu = DfuCore::new(&usb_bus_alloc, spi, internal_cs, cart_cs, BoardHooks);
//! let mut usb_dev = UsbDeviceBuilder::new(&usb_bus_alloc, UsbVidPid(0x1209, 0x0001)).build();
//!
//! loop {
//!     if usb_dev.poll(&mut [&mut dfu]) {
//!         // handled in DfuCore's UsbClass callbacks
//!     }
//!     dfu.poll_writer();
//! }
//! ```

/// DFU protocol status/error codes and the internal error classification
/// they are derived from.
pub mod error;

/// Compile-time flash zone table, indexed by DFU alternate setting.
pub mod zone;

/// The producer/consumer double buffer between USB ingress and the flash
/// writer.
pub mod buffer;

/// Chip-select aware byte-serial SPI transport.
pub mod spi;

/// JEDEC SPI NOR flash command wrappers.
pub mod flash;

/// The cooperative erase/verify/program/retry flash writer task.
pub mod writer;

/// The external-collaborator seam: `Reboot`, `Ticker`, vendor-request
/// delegation.
pub mod hooks;

/// The DFU protocol state machine, implemented as a `usb_device::class::UsbClass`.
pub mod class;

/// The single owning aggregate tying every other module together.
pub mod core;

#[doc(inline)]
pub use crate::class::{DfuClass, DfuState};
#[doc(inline)]
pub use crate::core::DfuCore;
#[doc(inline)]
pub use crate::error::{DfuError, DfuStatus};
