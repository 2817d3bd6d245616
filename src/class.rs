//! DFU protocol state machine, implementing `usb_device::class::UsbClass`.
//!
//! `DNLOAD` is a raw streaming write into the double buffer rather than a
//! vendor sub-command stream, so there is no address-pointer/erase/
//! read-unprotect command set to parse. Request gating is a static table
//! (`allowed(state, request)`) rather than an ad hoc check in each handler.
//! `SET_INTERFACE`/`GET_INTERFACE` select a flash zone, since flash is
//! organized as a table of zones rather than one fixed memory region.

use core::cmp::min;
use core::marker::PhantomData;

use usb_device::class_prelude::*;
use usb_device::control::{Recipient, RequestType};

use crate::buffer::{DoubleBuffer, SLOT_SIZE};
use crate::error::{DfuError, DfuStatus};
use crate::flash::NorFlash;
use crate::hooks::{Reboot, Ticker, VendorDisposition, VendorRequestHandler};
use crate::spi::{ChipSelect, SpiTransport};
use crate::writer::{AddrCursors, FlashWriter};
use crate::zone::ZONES;

const USB_CLASS_APPLICATION_SPECIFIC: u8 = 0xFE;
const USB_SUBCLASS_DFU: u8 = 0x01;
const USB_PROTOCOL_DFU_MODE: u8 = 0x02;

const DFU_DETACH: u8 = 0x00;
const DFU_DNLOAD: u8 = 0x01;
const DFU_UPLOAD: u8 = 0x02;
const DFU_GETSTATUS: u8 = 0x03;
const DFU_CLRSTATUS: u8 = 0x04;
const DFU_GETSTATE: u8 = 0x05;
const DFU_ABORT: u8 = 0x06;

const STD_GET_INTERFACE: u8 = 0x0A;
const STD_SET_INTERFACE: u8 = 0x0B;

const DESC_DESCTYPE_DFU: u8 = 0x21;

/// `bwPollTimeout` reported in `GETSTATUS`, in milliseconds.
const POLL_TIMEOUT_MS: u32 = 5;

/// `wDetachTimeOut` advertised in the DFU functional descriptor.
const DETACH_TIMEOUT_MS: u16 = 250;

/// DFU state, discriminants fixed by the DFU 1.1a wire encoding.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DfuState {
    /// Device would be running its normal application. Unreachable in
    /// practice: this core only ever runs in DFU mode.
    #[allow(dead_code)]
    AppIdle = 0,
    /// Waiting for a bus reset after a runtime `DETACH`. Doubles as the
    /// class's power-on state until the first reset carries it to
    /// `DfuIdle`.
    AppDetach = 1,
    DfuIdle = 2,
    DfuDnloadSync = 3,
    /// Reported (never persisted) while the double buffer is saturated.
    #[allow(dead_code)]
    DfuDnBusy = 4,
    DfuDnloadIdle = 5,
    DfuManifestSync = 6,
    /// Part of the DFU 1.1a closed state set; never actually entered, since
    /// `GETSTATUS`'s manifest shortcut collapses `DfuManifestSync` straight
    /// to `DfuIdle` within one synchronous call.
    #[allow(dead_code)]
    DfuManifest = 7,
    #[allow(dead_code)]
    DfuManifestWaitReset = 8,
    DfuUploadIdle = 9,
    DfuError = 10,
}

/// Per-state bitmask of allowed `bRequest` values; bit `n`
/// set iff request value `n` is allowed in that state.
const ALLOWED: [u8; 11] = [
    0b0010_1001, // AppIdle: DETACH, GETSTATUS, GETSTATE
    0b0010_1000, // AppDetach: GETSTATUS, GETSTATE
    0b0110_1111, // DfuIdle: DETACH, DNLOAD, UPLOAD, GETSTATUS, GETSTATE, ABORT
    0b0110_1010, // DfuDnloadSync: DNLOAD, GETSTATUS, GETSTATE, ABORT
    0b0000_0000, // DfuDnBusy
    0b0110_1010, // DfuDnloadIdle: DNLOAD, GETSTATUS, GETSTATE, ABORT
    0b0110_1000, // DfuManifestSync: GETSTATUS, GETSTATE, ABORT
    0b0000_0000, // DfuManifest
    0b0000_0000, // DfuManifestWaitReset
    0b0110_1100, // DfuUploadIdle: UPLOAD, GETSTATUS, GETSTATE, ABORT
    0b0011_1000, // DfuError: GETSTATUS, CLRSTATUS, GETSTATE
];

fn allowed(state: DfuState, request: u8) -> bool {
    request <= 6 && ALLOWED[state as usize] & (1 << request) != 0
}

/// `(state, status)` pair reported via `GETSTATUS`/`GETSTATE`.
#[derive(Debug, Clone, Copy)]
struct DfuStatusReg {
    state: DfuState,
    status: DfuStatus,
}

impl DfuStatusReg {
    fn new() -> Self {
        Self {
            state: DfuState::AppDetach,
            status: DfuStatus::Ok,
        }
    }

    fn set_ok(&mut self, state: DfuState) {
        self.state = state;
        self.status = DfuStatus::Ok;
    }

    fn error(&mut self, status: DfuStatus) {
        self.state = DfuState::DfuError;
        self.status = status;
    }
}

/// `GETSTATUS`'s 6-byte reply: `bStatus | bwPollTimeout(3) | bState | iString`.
fn encode_status(reported: DfuState, status: DfuStatus, poll_ms: u32) -> [u8; 6] {
    [
        status as u8,
        (poll_ms & 0xff) as u8,
        ((poll_ms >> 8) & 0xff) as u8,
        ((poll_ms >> 16) & 0xff) as u8,
        reported as u8,
        0,
    ]
}

/// The DFU protocol machine, bound to a SPI NOR flash driver, a chip-select
/// type, and a crate-user-supplied `HOOKS` implementation. `ERASE_KIB`
/// selects the flash writer's erase granularity, default `4`.
pub struct DfuClass<B: UsbBus, SPI, CSel, HOOKS, const ERASE_KIB: u32 = 4> {
    if_num: InterfaceNumber,
    interface_string: StringIndex,
    status: DfuStatusReg,
    zone_idx: usize,
    cursors: AddrCursors,
    buffer: DoubleBuffer,
    writer: FlashWriter<ERASE_KIB>,
    flash: NorFlash<SPI, CSel>,
    hooks: HOOKS,
    detach_pending: bool,
    _bus: PhantomData<B>,
}

impl<B, SPI, CSel, HOOKS, E, const ERASE_KIB: u32> DfuClass<B, SPI, CSel, HOOKS, ERASE_KIB>
where
    B: UsbBus,
    SPI: SpiTransport<Error = E>,
    CSel: ChipSelect,
    HOOKS: Reboot + Ticker + VendorRequestHandler,
{
    /// Builds a new DFU class bound to `flash`. Starts in `appDetach`; the
    /// device's own first bus reset (enumeration) carries it to `dfuIdle`
    /// with zone 0 selected, leaving the initial state transition to
    /// `reset()`.
    pub fn new(alloc: &UsbBusAllocator<B>, flash: NorFlash<SPI, CSel>, hooks: HOOKS) -> Self {
        let mut cursors = AddrCursors::default();
        cursors.reset_to(ZONES[0].start, ZONES[0].end);
        Self {
            if_num: alloc.interface(),
            interface_string: alloc.string(),
            status: DfuStatusReg::new(),
            zone_idx: 0,
            cursors,
            buffer: DoubleBuffer::new(),
            writer: FlashWriter::new(),
            flash,
            hooks,
            detach_pending: false,
            _bus: PhantomData,
        }
    }

    /// Current reported DFU state, for diagnostics.
    pub fn state(&self) -> DfuState {
        self.status.state
    }

    /// Pumps the flash writer task once. The main loop should
    /// call this at `>= 200 Hz`; returns `true` if a buffer was released
    /// this tick (committed, or fatally abandoned after a reboot).
    pub fn poll_writer(&mut self) -> bool {
        let chip = ZONES[self.zone_idx].flash_chip;
        let progressed =
            self.writer
                .tick(&mut self.flash, &mut self.buffer, &mut self.cursors, chip, &mut self.hooks);
        if self.writer.take_exhausted() {
            self.status.error(DfuError::WriterExhausted.into());
        }
        progressed
    }

    fn select_zone(&mut self, idx: usize) {
        self.zone_idx = idx;
        let zone = ZONES[idx];
        self.cursors.reset_to(zone.start, zone.end);
        self.status.set_ok(DfuState::DfuIdle);
    }

    fn clear_status(&mut self, xfer: ControlOut<B>) {
        self.status.set_ok(DfuState::DfuIdle);
        xfer.accept().ok();
    }

    fn abort(&mut self, xfer: ControlOut<B>) {
        self.status.set_ok(DfuState::DfuIdle);
        xfer.accept().ok();
    }

    fn detach(&mut self, xfer: ControlOut<B>) {
        self.detach_pending = true;
        xfer.accept().ok();
    }

    fn download(&mut self, xfer: ControlOut<B>, length: u16) {
        if length == 0 {
            self.status.set_ok(DfuState::DfuManifestSync);
            xfer.accept().ok();
            return;
        }

        let wlen = length as u32;
        if self
            .cursors
            .recv
            .checked_add(wlen)
            .map(|end| end > self.cursors.end)
            .unwrap_or(true)
        {
            self.status.error(DfuError::BoundsViolation.into());
            xfer.reject().ok();
            return;
        }

        if self.buffer.is_full() {
            // No free slot. The transfer is not committed and state does
            // not change; the next `GETSTATUS` reports `dfuDNBUSY`.
            xfer.reject().ok();
            return;
        }

        let data = xfer.data();
        let len = data.len();
        let slot = self.buffer.reserve_write();
        slot[..len].copy_from_slice(data);
        slot[len..].fill(0xFF);
        self.buffer.commit_write();
        self.cursors.recv += wlen;

        self.status.set_ok(DfuState::DfuDnloadSync);
        xfer.accept().ok();
    }

    fn upload(&mut self, xfer: ControlIn<B>, length: u16) {
        let remaining = self.cursors.end.saturating_sub(self.cursors.read);
        let len = (min(length, SLOT_SIZE as u16) as u32).min(remaining) as usize;
        let addr = self.cursors.read;

        let chip = ZONES[self.zone_idx].flash_chip;
        self.flash.chip_select(chip);
        let result = {
            let scratch = self.buffer.upload_scratch();
            self.flash.read(&mut scratch[..len], addr)
        };

        match result {
            Ok(()) => {
                self.cursors.read += len as u32;
                self.status.set_ok(if len < SLOT_SIZE {
                    DfuState::DfuIdle
                } else {
                    DfuState::DfuUploadIdle
                });
                let scratch = self.buffer.upload_scratch();
                xfer.accept_with(&scratch[..len]).ok();
            }
            Err(_) => {
                self.status.error(DfuStatus::ErrAddress);
                xfer.reject().ok();
            }
        }
    }

    fn get_state(&mut self, xfer: ControlIn<B>, length: u16) {
        if length < 1 {
            self.status.error(DfuStatus::ErrStalledPkt);
            xfer.reject().ok();
            return;
        }
        xfer.accept_with(&[self.status.state as u8]).ok();
    }

    fn get_status(&mut self, xfer: ControlIn<B>, length: u16) {
        if length < 6 {
            self.status.error(DfuStatus::ErrStalledPkt);
            xfer.reject().ok();
            return;
        }

        let reported = match self.status.state {
            DfuState::DfuDnloadSync => {
                if self.buffer.is_full() {
                    DfuState::DfuDnBusy
                } else {
                    self.status.set_ok(DfuState::DfuDnloadIdle);
                    DfuState::DfuDnloadIdle
                }
            }
            DfuState::DfuManifestSync => {
                // The manifest phase collapses to a single synchronous
                // drain instead of polling through
                // `DfuManifest`/`DfuManifestWaitReset`.
                while !self.buffer.is_empty() {
                    self.poll_writer();
                }
                self.status.set_ok(DfuState::DfuIdle);
                DfuState::DfuIdle
            }
            other => other,
        };

        let payload = encode_status(reported, self.status.status, POLL_TIMEOUT_MS);
        xfer.accept_with(&payload).ok();
    }
}

impl<B, SPI, CSel, HOOKS, E, const ERASE_KIB: u32> UsbClass<B> for DfuClass<B, SPI, CSel, HOOKS, ERASE_KIB>
where
    B: UsbBus,
    SPI: SpiTransport<Error = E>,
    CSel: ChipSelect,
    HOOKS: Reboot + Ticker + VendorRequestHandler,
{
    fn get_configuration_descriptors(&self, writer: &mut DescriptorWriter) -> usb_device::Result<()> {
        for (alt, _zone) in ZONES.iter().enumerate() {
            writer.interface_alt(
                self.if_num,
                alt as u8,
                USB_CLASS_APPLICATION_SPECIFIC,
                USB_SUBCLASS_DFU,
                USB_PROTOCOL_DFU_MODE,
                Some(self.interface_string),
            )?;

            writer.write(
                DESC_DESCTYPE_DFU,
                &[
                    // bmAttributes: bitWillDetach | bitManifestationTolerant
                    // | bitCanUpload | bitCanDnload
                    0x8 | 0x4 | 0x2 | 0x1,
                    (DETACH_TIMEOUT_MS & 0xff) as u8,
                    (DETACH_TIMEOUT_MS >> 8) as u8,
                    (SLOT_SIZE as u16 & 0xff) as u8,
                    (SLOT_SIZE as u16 >> 8) as u8,
                    // bcdDFUVersion 1.1a
                    0x1a,
                    0x01,
                ],
            )?;
        }

        Ok(())
    }

    fn get_string(&self, index: StringIndex, lang_id: u16) -> Option<&str> {
        if (lang_id == usb_device::descriptor::lang_id::ENGLISH_US || lang_id == 0) && index == self.interface_string
        {
            return Some("DFU cartridge flash");
        }
        None
    }

    fn control_in(&mut self, xfer: ControlIn<B>) {
        let req = *xfer.request();

        if req.index != u8::from(self.if_num) as u16 {
            return;
        }

        if req.request_type == RequestType::Vendor && req.recipient == Recipient::Interface {
            let mut len = 0usize;
            let scratch = self.buffer.slots_mut();
            let disposition = self.hooks.control_in(req.request, req.value, scratch, &mut len);
            match disposition {
                VendorDisposition::Handled => {
                    let scratch = self.buffer.upload_scratch();
                    xfer.accept_with(&scratch[..len]).ok();
                }
                VendorDisposition::Rejected => {
                    xfer.reject().ok();
                }
                VendorDisposition::Ignored => {}
            }
            return;
        }

        if req.request_type == RequestType::Standard && req.recipient == Recipient::Interface {
            if req.request == STD_GET_INTERFACE {
                xfer.accept_with(&[self.zone_idx as u8]).ok();
            }
            return;
        }

        if req.request_type != RequestType::Class || req.recipient != Recipient::Interface {
            return;
        }

        if !allowed(self.status.state, req.request) {
            self.status.error(DfuError::DisallowedRequest.into());
            xfer.reject().ok();
            return;
        }

        match req.request {
            DFU_UPLOAD => self.upload(xfer, req.length),
            DFU_GETSTATUS => self.get_status(xfer, req.length),
            DFU_GETSTATE => self.get_state(xfer, req.length),
            _ => {
                xfer.reject().ok();
            }
        }
    }

    fn control_out(&mut self, xfer: ControlOut<B>) {
        let req = *xfer.request();

        if req.index != u8::from(self.if_num) as u16 {
            return;
        }

        if req.request_type == RequestType::Vendor && req.recipient == Recipient::Interface {
            let (request, value) = (req.request, req.value);
            let data = xfer.data();
            let scratch = self.buffer.slots_mut();
            match self.hooks.control_out(request, value, data, scratch) {
                VendorDisposition::Handled => {
                    xfer.accept().ok();
                }
                VendorDisposition::Rejected => {
                    xfer.reject().ok();
                }
                VendorDisposition::Ignored => {}
            }
            return;
        }

        if req.request_type == RequestType::Standard && req.recipient == Recipient::Interface {
            if req.request == STD_SET_INTERFACE {
                let alt = req.value as usize;
                if alt < ZONES.len() {
                    self.select_zone(alt);
                    xfer.accept().ok();
                } else {
                    xfer.reject().ok();
                }
            }
            return;
        }

        if req.request_type != RequestType::Class || req.recipient != Recipient::Interface {
            return;
        }

        if !allowed(self.status.state, req.request) {
            self.status.error(DfuError::DisallowedRequest.into());
            xfer.reject().ok();
            return;
        }

        match req.request {
            DFU_DETACH => self.detach(xfer),
            DFU_DNLOAD => {
                let length = req.length;
                self.download(xfer, length);
            }
            DFU_CLRSTATUS => self.clear_status(xfer),
            DFU_ABORT => self.abort(xfer),
            _ => {
                xfer.reject().ok();
            }
        }
    }

    fn reset(&mut self) {
        if self.status.state == DfuState::AppDetach {
            self.select_zone(0);
        } else {
            self.hooks.reboot();
        }
    }

    fn poll(&mut self) {
        if self.detach_pending {
            self.detach_pending = false;
            self.hooks.reboot();
        }
    }
}
