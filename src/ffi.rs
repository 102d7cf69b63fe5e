//! libMPSSE I2C bindings
//!
//! Only the calls [`crate::bus::Ft232hBus`] needs: channel discovery, open,
//! init, close and the two device transfer primitives. Declarations follow
//! FTDI's `libmpsse_i2c.h` and `ftd2xx.h`.

#![allow(non_camel_case_types)]
#![allow(non_snake_case)]

use std::ffi::c_void;

pub type DWORD = u32;
pub type UCHAR = u8;
pub type USHORT = u16;

pub type FT_STATUS = DWORD;
pub type FT_HANDLE = *mut c_void;

pub const FT_OK: FT_STATUS = 0;
pub const FT_DEVICE_NOT_FOUND: FT_STATUS = 2;

/// `ftd2xx.h` status names, indexed by status code
const STATUS_NAMES: [&str; 19] = [
    "FT_OK",
    "FT_INVALID_HANDLE",
    "FT_DEVICE_NOT_FOUND",
    "FT_DEVICE_NOT_OPENED",
    "FT_IO_ERROR",
    "FT_INSUFFICIENT_RESOURCES",
    "FT_INVALID_PARAMETER",
    "FT_INVALID_BAUD_RATE",
    "FT_DEVICE_NOT_OPENED_FOR_ERASE",
    "FT_DEVICE_NOT_OPENED_FOR_WRITE",
    "FT_FAILED_TO_WRITE_DEVICE",
    "FT_EEPROM_READ_FAILED",
    "FT_EEPROM_WRITE_FAILED",
    "FT_EEPROM_ERASE_FAILED",
    "FT_EEPROM_NOT_PRESENT",
    "FT_EEPROM_NOT_PROGRAMMED",
    "FT_INVALID_ARGS",
    "FT_NOT_SUPPORTED",
    "FT_OTHER_ERROR",
];

// Transfer option bits
pub const I2C_TRANSFER_OPTIONS_START_BIT: DWORD = 0x01;
pub const I2C_TRANSFER_OPTIONS_STOP_BIT: DWORD = 0x02;
pub const I2C_TRANSFER_OPTIONS_BREAK_ON_NACK: DWORD = 0x04;
pub const I2C_TRANSFER_OPTIONS_NACK_LAST_BYTE: DWORD = 0x08;

pub const I2C_CLOCK_FAST_MODE_PLUS: DWORD = 1_000_000;

#[repr(C)]
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub ClockRate: DWORD,
    pub LatencyTimer: UCHAR,
    pub Options: DWORD,
    pub Pin: DWORD,
    pub currentPinState: USHORT,
}

#[link(name = "libmpsse")]
extern "C" {
    pub fn I2C_GetNumChannels(numChannels: *mut DWORD) -> FT_STATUS;
    pub fn I2C_OpenChannel(index: DWORD, handle: *mut FT_HANDLE) -> FT_STATUS;
    pub fn I2C_InitChannel(handle: FT_HANDLE, config: *mut ChannelConfig) -> FT_STATUS;
    pub fn I2C_CloseChannel(handle: FT_HANDLE) -> FT_STATUS;

    pub fn I2C_DeviceRead(
        handle: FT_HANDLE,
        deviceAddress: UCHAR,
        sizeToTransfer: DWORD,
        buffer: *mut UCHAR,
        sizeTransfered: *mut DWORD,
        options: DWORD,
    ) -> FT_STATUS;

    pub fn I2C_DeviceWrite(
        handle: FT_HANDLE,
        deviceAddress: UCHAR,
        sizeToTransfer: DWORD,
        buffer: *const UCHAR,
        sizeTransfered: *mut DWORD,
        options: DWORD,
    ) -> FT_STATUS;
}

/// Symbolic name of an FT_STATUS code
pub fn status_to_string(status: FT_STATUS) -> &'static str {
    STATUS_NAMES
        .get(status as usize)
        .copied()
        .unwrap_or("FT_UNKNOWN_STATUS")
}
