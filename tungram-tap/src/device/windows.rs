// Copyright 2025 - developers of the `tungram` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! TAP-Windows6 device access through `\\.\Global\{GUID}.tap`.

use crate::TapError;
use std::io;
use std::os::windows::ffi::OsStrExt;
use std::sync::atomic::{AtomicUsize, Ordering};
use winapi::shared::minwindef::{DWORD, FALSE, LPVOID};
use winapi::um::errhandlingapi::GetLastError;
use winapi::um::fileapi::{CreateFileW, ReadFile, WriteFile, OPEN_EXISTING};
use winapi::um::handleapi::{CloseHandle, INVALID_HANDLE_VALUE};
use winapi::um::ioapiset::DeviceIoControl;
use winapi::um::winnt::{FILE_ATTRIBUTE_SYSTEM, GENERIC_READ, GENERIC_WRITE, HANDLE};

/// `TAP_WIN_IOCTL_SET_MEDIA_STATUS`: tells the driver to report the link
/// as connected; without it the adapter stays "cable unplugged".
const TAP_IOCTL_SET_MEDIA_STATUS: DWORD = 0x0022_C084;

const ERROR_SHARING_VIOLATION: DWORD = 32;

/// A blocking handle on the TAP driver. The handle value is stored as an
/// integer so the type is shareable between the reader and writer workers;
/// the driver serialises concurrent requests itself.
pub(crate) struct RawTap {
    handle: AtomicUsize,
}

impl RawTap {
    pub(crate) fn open(device_id: &str) -> Result<Self, TapError> {
        let path: Vec<u16> = std::ffi::OsStr::new(&format!("\\\\.\\Global\\{device_id}.tap"))
            .encode_wide()
            .chain(std::iter::once(0))
            .collect();

        let handle = unsafe {
            CreateFileW(
                path.as_ptr(),
                GENERIC_READ | GENERIC_WRITE,
                0, // exclusive
                std::ptr::null_mut(),
                OPEN_EXISTING,
                FILE_ATTRIBUTE_SYSTEM,
                std::ptr::null_mut(),
            )
        };
        if handle == INVALID_HANDLE_VALUE {
            return Err(match unsafe { GetLastError() } {
                ERROR_SHARING_VIOLATION => TapError::DeviceBusy,
                _ => TapError::from(io::Error::last_os_error()),
            });
        }

        let raw = Self {
            handle: AtomicUsize::new(handle as usize),
        };
        raw.set_media_status(true)?;
        Ok(raw)
    }

    fn handle(&self) -> Option<HANDLE> {
        match self.handle.load(Ordering::SeqCst) {
            0 => None,
            h => Some(h as HANDLE),
        }
    }

    fn set_media_status(&self, connected: bool) -> Result<(), TapError> {
        let Some(handle) = self.handle() else {
            return Err(TapError::Io(io::ErrorKind::NotConnected.into()));
        };
        let mut status: u32 = connected as u32;
        let mut returned: DWORD = 0;
        let ok = unsafe {
            DeviceIoControl(
                handle,
                TAP_IOCTL_SET_MEDIA_STATUS,
                &mut status as *mut u32 as LPVOID,
                std::mem::size_of::<u32>() as DWORD,
                std::ptr::null_mut(),
                0,
                &mut returned,
                std::ptr::null_mut(),
            )
        };
        if ok == FALSE {
            return Err(TapError::from(io::Error::last_os_error()));
        }
        Ok(())
    }

    pub(crate) fn read(&self, buffer: &mut [u8]) -> io::Result<usize> {
        let Some(handle) = self.handle() else {
            return Err(io::ErrorKind::NotConnected.into());
        };
        let mut read: DWORD = 0;
        let ok = unsafe {
            ReadFile(
                handle,
                buffer.as_mut_ptr() as LPVOID,
                buffer.len() as DWORD,
                &mut read,
                std::ptr::null_mut(),
            )
        };
        if ok == FALSE {
            return Err(io::Error::last_os_error());
        }
        Ok(read as usize)
    }

    pub(crate) fn write(&self, frame: &[u8]) -> io::Result<usize> {
        let Some(handle) = self.handle() else {
            return Err(io::ErrorKind::NotConnected.into());
        };
        let mut written: DWORD = 0;
        let ok = unsafe {
            WriteFile(
                handle,
                frame.as_ptr() as LPVOID,
                frame.len() as DWORD,
                &mut written,
                std::ptr::null_mut(),
            )
        };
        if ok == FALSE {
            return Err(io::Error::last_os_error());
        }
        Ok(written as usize)
    }

    pub(crate) fn close(&self) {
        let handle = self.handle.swap(0, Ordering::SeqCst);
        if handle != 0 {
            unsafe { CloseHandle(handle as HANDLE) };
        }
    }
}

impl Drop for RawTap {
    fn drop(&mut self) {
        self.close();
    }
}
