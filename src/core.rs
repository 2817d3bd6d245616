//! The single owning aggregate that ties every other module together behind
//! one `&mut`-passed value.
//!
//! `usb_device::class::UsbClass`'s callbacks all take `&mut self`, so the
//! double buffer, flash writer, and SPI driver cannot live in a separate
//! struct alongside [`DfuClass`](crate::class::DfuClass) without `DfuClass`
//! holding a reference back into it -- `DfuClass` already *is* the owning
//! aggregate. `DfuCore` is therefore a thin builder/wrapper rather than a
//! second composition: it exists only so the crate user builds the
//! aggregate from raw parts (a SPI bus and two chip-select pins) instead of
//! constructing a [`NorFlash`](crate::flash::NorFlash) by hand first.

use core::ops::{Deref, DerefMut};

use usb_device::class_prelude::{UsbBus, UsbBusAllocator};

use crate::class::DfuClass;
use crate::flash::NorFlash;
use crate::hooks::{Reboot, Ticker, VendorRequestHandler};
use crate::spi::{ChipSelect, SpiTransport};

/// Owns the whole DFU bootloader core: protocol state machine, flash writer,
/// double buffer, and SPI NOR driver, behind the single value the main loop
/// hands to `usb_dev.poll(&mut [&mut core])` and pumps with
/// [`poll_writer`](crate::class::DfuClass::poll_writer) (reached through
/// `Deref`).
pub struct DfuCore<B: UsbBus, SPI, CSel, HOOKS, const ERASE_KIB: u32 = 4> {
    class: DfuClass<B, SPI, CSel, HOOKS, ERASE_KIB>,
}

impl<B, SPI, CSel, HOOKS, E, const ERASE_KIB: u32> DfuCore<B, SPI, CSel, HOOKS, ERASE_KIB>
where
    B: UsbBus,
    SPI: SpiTransport<Error = E>,
    CSel: ChipSelect,
    HOOKS: Reboot + Ticker + VendorRequestHandler,
{
    /// Builds the aggregate from a SPI bus and the board's two flash
    /// chip-select pins, wiring up the `NorFlash` driver internally.
    pub fn new(alloc: &UsbBusAllocator<B>, spi: SPI, internal_cs: CSel, cart_cs: CSel, hooks: HOOKS) -> Self {
        let flash = NorFlash::new(spi, internal_cs, cart_cs);
        Self {
            class: DfuClass::new(alloc, flash, hooks),
        }
    }
}

impl<B: UsbBus, SPI, CSel, HOOKS, const ERASE_KIB: u32> Deref for DfuCore<B, SPI, CSel, HOOKS, ERASE_KIB> {
    type Target = DfuClass<B, SPI, CSel, HOOKS, ERASE_KIB>;

    fn deref(&self) -> &Self::Target {
        &self.class
    }
}

impl<B: UsbBus, SPI, CSel, HOOKS, const ERASE_KIB: u32> DerefMut for DfuCore<B, SPI, CSel, HOOKS, ERASE_KIB> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.class
    }
}

impl<B, SPI, CSel, HOOKS, E, const ERASE_KIB: u32> usb_device::class::UsbClass<B>
    for DfuCore<B, SPI, CSel, HOOKS, ERASE_KIB>
where
    B: UsbBus,
    SPI: SpiTransport<Error = E>,
    CSel: ChipSelect,
    HOOKS: Reboot + Ticker + VendorRequestHandler,
{
    fn get_configuration_descriptors(
        &self,
        writer: &mut usb_device::descriptor::DescriptorWriter,
    ) -> usb_device::Result<()> {
        self.class.get_configuration_descriptors(writer)
    }

    fn get_string(&self, index: usb_device::class_prelude::StringIndex, lang_id: u16) -> Option<&str> {
        self.class.get_string(index, lang_id)
    }

    fn control_in(&mut self, xfer: usb_device::class_prelude::ControlIn<B>) {
        self.class.control_in(xfer)
    }

    fn control_out(&mut self, xfer: usb_device::class_prelude::ControlOut<B>) {
        self.class.control_out(xfer)
    }

    fn reset(&mut self) {
        self.class.reset()
    }

    fn poll(&mut self) {
        self.class.poll()
    }
}

// `DfuCore` is exercised end-to-end in `tests/`, where `usbd-class-tester`
// already provides a full `UsbBus` simulation; a unit test here would just
// reimplement that harness to build the `UsbBusAllocator` the constructor
// needs.
