//! Two-wire bus transport
//!
//! [`I2cBus`] is the only way the rest of the crate touches hardware. The
//! FT232H implementation is compiled in with the `ftdi` feature; tests and
//! `--simulate` runs use [`crate::sim::SimBus`].

use crate::error::Result;

/// Byte-level transaction primitive over a shared I2C bus
///
/// Implementations do not retry; retry policy belongs to the caller.
/// Addresses are 7-bit.
pub trait I2cBus {
    /// START - ADDR(W) - DATA - STOP
    ///
    /// Returns `BusError::NoAck` if the device does not acknowledge.
    fn write(&mut self, address: u8, bytes: &[u8]) -> Result<()>;

    /// START - ADDR(R) - DATA - STOP, filling all of `buffer`
    ///
    /// Returns `BusError::Truncated` if fewer bytes than `buffer.len()` arrive.
    fn read(&mut self, address: u8, buffer: &mut [u8]) -> Result<()>;

    /// Write then read with a repeated START, holding the bus in between
    ///
    /// Used for register-addressed reads: the register pointer is written and
    /// the data is clocked out without a STOP in between.
    fn write_read(&mut self, address: u8, bytes: &[u8], buffer: &mut [u8]) -> Result<()>;
}

impl<B: I2cBus + ?Sized> I2cBus for &mut B {
    fn write(&mut self, address: u8, bytes: &[u8]) -> Result<()> {
        (**self).write(address, bytes)
    }

    fn read(&mut self, address: u8, buffer: &mut [u8]) -> Result<()> {
        (**self).read(address, buffer)
    }

    fn write_read(&mut self, address: u8, bytes: &[u8], buffer: &mut [u8]) -> Result<()> {
        (**self).write_read(address, bytes, buffer)
    }
}

#[cfg(feature = "ftdi")]
pub use ft232h::Ft232hBus;

#[cfg(feature = "ftdi")]
mod ft232h {
    use super::I2cBus;
    use crate::error::{BusError, Result};
    use crate::ffi::*;
    use std::ptr;

    fn check(status: FT_STATUS) -> Result<()> {
        if status == FT_OK {
            Ok(())
        } else {
            Err(BusError::Adapter {
                status,
                description: status_to_string(status).to_string(),
            })
        }
    }

    /// FT232H USB-to-I2C bridge driven through libMPSSE
    pub struct Ft232hBus {
        handle: FT_HANDLE,
    }

    impl Ft232hBus {
        /// Open and configure adapter channel `channel_index` (usually 0)
        pub fn open(channel_index: u32) -> Result<Self> {
            let mut num_channels: DWORD = 0;
            check(unsafe { I2C_GetNumChannels(&mut num_channels) })?;

            if channel_index >= num_channels {
                return Err(BusError::Adapter {
                    status: FT_DEVICE_NOT_FOUND,
                    description: format!(
                        "adapter channel {} not present ({} found)",
                        channel_index, num_channels
                    ),
                });
            }

            let mut handle: FT_HANDLE = ptr::null_mut();
            check(unsafe { I2C_OpenChannel(channel_index, &mut handle) })?;

            let mut config = ChannelConfig {
                ClockRate: I2C_CLOCK_FAST_MODE_PLUS, // 1 MHz
                LatencyTimer: 1,                      // 1ms latency (minimum stable value)
                Options: 0,
                Pin: 0,
                currentPinState: 0,
            };

            let status = unsafe { I2C_InitChannel(handle, &mut config) };
            if status != FT_OK {
                unsafe { I2C_CloseChannel(handle) };
                check(status)?;
            }

            Ok(Self { handle })
        }

        fn device_write(&mut self, address: u8, bytes: &[u8], options: DWORD) -> Result<()> {
            let mut transferred: DWORD = 0;
            let status = unsafe {
                I2C_DeviceWrite(
                    self.handle,
                    address,
                    bytes.len() as DWORD,
                    bytes.as_ptr(),
                    &mut transferred,
                    options,
                )
            };
            check(status)?;

            // BREAK_ON_NACK stops the transfer early; a short count means NACK
            if (transferred as usize) < bytes.len() {
                return Err(BusError::NoAck { address });
            }
            Ok(())
        }

        fn device_read(&mut self, address: u8, buffer: &mut [u8], options: DWORD) -> Result<()> {
            let mut transferred: DWORD = 0;
            let status = unsafe {
                I2C_DeviceRead(
                    self.handle,
                    address,
                    buffer.len() as DWORD,
                    buffer.as_mut_ptr(),
                    &mut transferred,
                    options,
                )
            };
            check(status)?;

            if (transferred as usize) < buffer.len() {
                return Err(BusError::Truncated {
                    expected: buffer.len(),
                    actual: transferred as usize,
                });
            }
            Ok(())
        }
    }

    impl I2cBus for Ft232hBus {
        fn write(&mut self, address: u8, bytes: &[u8]) -> Result<()> {
            self.device_write(
                address,
                bytes,
                I2C_TRANSFER_OPTIONS_START_BIT
                    | I2C_TRANSFER_OPTIONS_STOP_BIT
                    | I2C_TRANSFER_OPTIONS_BREAK_ON_NACK,
            )
        }

        fn read(&mut self, address: u8, buffer: &mut [u8]) -> Result<()> {
            self.device_read(
                address,
                buffer,
                I2C_TRANSFER_OPTIONS_START_BIT
                    | I2C_TRANSFER_OPTIONS_STOP_BIT
                    | I2C_TRANSFER_OPTIONS_NACK_LAST_BYTE,
            )
        }

        fn write_read(&mut self, address: u8, bytes: &[u8], buffer: &mut [u8]) -> Result<()> {
            // No STOP after the write - keep the bus for the repeated START
            self.device_write(
                address,
                bytes,
                I2C_TRANSFER_OPTIONS_START_BIT | I2C_TRANSFER_OPTIONS_BREAK_ON_NACK,
            )?;
            self.read(address, buffer)
        }
    }

    impl Drop for Ft232hBus {
        fn drop(&mut self) {
            unsafe {
                I2C_CloseChannel(self.handle);
            }
        }
    }
}
