#![allow(dead_code)]
use usb_device::class::UsbClass;
use usbd_class_tester::prelude::*;

use apf_dfu_bootloader::{DfuState, DfuStatus};

pub const DFU_DETACH: u8 = 0x00;
pub const DFU_DNLOAD: u8 = 0x01;
pub const DFU_UPLOAD: u8 = 0x02;
pub const DFU_GETSTATUS: u8 = 0x03;
pub const DFU_CLRSTATUS: u8 = 0x04;
pub const DFU_GETSTATE: u8 = 0x05;
pub const DFU_ABORT: u8 = 0x06;

pub const STD_GET_INTERFACE: u8 = 0x0A;
pub const STD_SET_INTERFACE: u8 = 0x0B;

pub trait DeviceExt<C> {
    fn read(&mut self, cls: &mut C, req: u8, value: u16, index: u16, length: u16) -> AnyResult<Vec<u8>>;
    fn write(
        &mut self,
        cls: &mut C,
        req: u8,
        value: u16,
        index: u16,
        length: u16,
        data: &[u8],
    ) -> AnyResult<Vec<u8>>;

    fn std_read(&mut self, cls: &mut C, req: u8, value: u16, length: u16) -> AnyResult<Vec<u8>>;
    fn std_write(&mut self, cls: &mut C, req: u8, value: u16, data: &[u8]) -> AnyResult<Vec<u8>>;

    fn download(&mut self, cls: &mut C, data: &[u8]) -> AnyResult<Vec<u8>>;
    fn upload(&mut self, cls: &mut C, length: usize) -> AnyResult<Vec<u8>>;
    fn get_status(&mut self, cls: &mut C) -> AnyResult<Vec<u8>>;
    fn clear_status(&mut self, cls: &mut C) -> AnyResult<Vec<u8>>;
    fn get_state(&mut self, cls: &mut C) -> AnyResult<Vec<u8>>;
    fn abort(&mut self, cls: &mut C) -> AnyResult<Vec<u8>>;
    fn set_interface(&mut self, cls: &mut C, alt: u8) -> AnyResult<Vec<u8>>;
    fn get_interface(&mut self, cls: &mut C) -> AnyResult<Vec<u8>>;
}

impl<'a, C, M> DeviceExt<C> for Device<'a, C, M>
where
    C: UsbClass<EmulatedUsbBus>,
    M: UsbDeviceCtx<C<'a> = C>,
{
    fn read(&mut self, cls: &mut C, req: u8, value: u16, index: u16, length: u16) -> AnyResult<Vec<u8>> {
        self.control_read(cls, CtrRequestType::to_host().class().interface(), req, value, index, length)
    }

    fn write(
        &mut self,
        cls: &mut C,
        req: u8,
        value: u16,
        index: u16,
        length: u16,
        data: &[u8],
    ) -> AnyResult<Vec<u8>> {
        self.control_write(
            cls,
            CtrRequestType::to_device().class().interface(),
            req,
            value,
            index,
            length,
            data,
        )
    }

    fn std_read(&mut self, cls: &mut C, req: u8, value: u16, length: u16) -> AnyResult<Vec<u8>> {
        self.control_read(cls, CtrRequestType::to_host().standard().interface(), req, value, 0, length)
    }

    fn std_write(&mut self, cls: &mut C, req: u8, value: u16, data: &[u8]) -> AnyResult<Vec<u8>> {
        self.control_write(
            cls,
            CtrRequestType::to_device().standard().interface(),
            req,
            value,
            0,
            data.len() as u16,
            data,
        )
    }

    fn download(&mut self, cls: &mut C, data: &[u8]) -> AnyResult<Vec<u8>> {
        if data.len() > u16::MAX as usize {
            return Err(AnyUsbError::DataConversion);
        }
        self.write(cls, DFU_DNLOAD, 0, 0, data.len() as u16, data)
    }

    fn upload(&mut self, cls: &mut C, length: usize) -> AnyResult<Vec<u8>> {
        if length > u16::MAX as usize {
            return Err(AnyUsbError::DataConversion);
        }
        self.read(cls, DFU_UPLOAD, 0, 0, length as u16)
    }

    fn get_status(&mut self, cls: &mut C) -> AnyResult<Vec<u8>> {
        self.read(cls, DFU_GETSTATUS, 0, 0, 6)
    }

    fn clear_status(&mut self, cls: &mut C) -> AnyResult<Vec<u8>> {
        self.write(cls, DFU_CLRSTATUS, 0, 0, 0, &[])
    }

    fn get_state(&mut self, cls: &mut C) -> AnyResult<Vec<u8>> {
        self.read(cls, DFU_GETSTATE, 0, 0, 1)
    }

    fn abort(&mut self, cls: &mut C) -> AnyResult<Vec<u8>> {
        self.write(cls, DFU_ABORT, 0, 0, 0, &[])
    }

    fn set_interface(&mut self, cls: &mut C, alt: u8) -> AnyResult<Vec<u8>> {
        self.std_write(cls, STD_SET_INTERFACE, alt as u16, &[])
    }

    fn get_interface(&mut self, cls: &mut C) -> AnyResult<Vec<u8>> {
        self.std_read(cls, STD_GET_INTERFACE, 0, 1)
    }
}

pub fn status(status: DfuStatus, poll_timeout: u32, state: DfuState) -> [u8; 6] {
    let t = poll_timeout.to_le_bytes();
    [status as u8, t[0], t[1], t[2], state as u8, 0]
}
