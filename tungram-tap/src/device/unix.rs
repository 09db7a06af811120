// Copyright 2025 - developers of the `tungram` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! `/dev/net/tun` TAP access for development on Unix hosts.

use crate::TapError;
use std::io;
use std::sync::atomic::{AtomicI32, Ordering};

const TUNSETIFF: libc::c_ulong = 0x4004_54ca;
const IFF_TAP: libc::c_short = 0x0002;
const IFF_NO_PI: libc::c_short = 0x1000;

#[repr(C)]
struct IfReq {
    name: [u8; libc::IFNAMSIZ],
    flags: libc::c_short,
    _pad: [u8; 64],
}

/// A blocking file descriptor on the TAP device, shareable between the
/// reader and writer workers.
pub(crate) struct RawTap {
    fd: AtomicI32,
}

impl RawTap {
    pub(crate) fn open(device_id: &str) -> Result<Self, TapError> {
        if device_id.len() >= libc::IFNAMSIZ {
            return Err(TapError::NotFound);
        }

        let fd = unsafe { libc::open(c"/dev/net/tun".as_ptr(), libc::O_RDWR) };
        if fd < 0 {
            return Err(TapError::from(io::Error::last_os_error()));
        }

        let mut request = IfReq {
            name: [0; libc::IFNAMSIZ],
            flags: IFF_TAP | IFF_NO_PI,
            _pad: [0; 64],
        };
        request.name[..device_id.len()].copy_from_slice(device_id.as_bytes());

        if unsafe { libc::ioctl(fd, TUNSETIFF, &mut request) } < 0 {
            let error = io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(match error.raw_os_error() {
                Some(libc::EBUSY) => TapError::DeviceBusy,
                _ => TapError::from(error),
            });
        }

        Ok(Self {
            fd: AtomicI32::new(fd),
        })
    }

    fn fd(&self) -> Option<i32> {
        match self.fd.load(Ordering::SeqCst) {
            -1 => None,
            fd => Some(fd),
        }
    }

    pub(crate) fn read(&self, buffer: &mut [u8]) -> io::Result<usize> {
        let Some(fd) = self.fd() else {
            return Err(io::ErrorKind::NotConnected.into());
        };
        let n = unsafe { libc::read(fd, buffer.as_mut_ptr() as *mut libc::c_void, buffer.len()) };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(n as usize)
    }

    pub(crate) fn write(&self, frame: &[u8]) -> io::Result<usize> {
        let Some(fd) = self.fd() else {
            return Err(io::ErrorKind::NotConnected.into());
        };
        let n = unsafe { libc::write(fd, frame.as_ptr() as *const libc::c_void, frame.len()) };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(n as usize)
    }

    pub(crate) fn close(&self) {
        let fd = self.fd.swap(-1, Ordering::SeqCst);
        if fd != -1 {
            unsafe { libc::close(fd) };
        }
    }
}

impl Drop for RawTap {
    fn drop(&mut self) {
        self.close();
    }
}
