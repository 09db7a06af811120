// Copyright 2025 - developers of the `tungram` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The virtual Ethernet (TAP) adapter: discovery by interface alias,
//! address assignment, and raw frame I/O.
//!
//! Raw reads and writes against the driver are blocking at the OS level, so
//! the device is driven from worker threads and bridged to the async runtime
//! with a bounded channel. The frame stream is single-consumer; the handle is
//! exclusively owned and lives for exactly one tunnel run.

mod device;
mod sys;

use device::RawTap;
use log::{debug, error, info, warn};
use std::io;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use std::{fmt, thread};
use tokio::sync::mpsc;

/// Frames are read through a fixed 64 KiB buffer.
const READ_BUFFER_SIZE: usize = 65535;

/// How long to back off after a failed read before retrying.
const READ_RETRY_DELAY: Duration = Duration::from_millis(50);

/// In-flight frames between the reader thread and the async consumer.
const FRAME_CHANNEL_DEPTH: usize = 512;

#[derive(Debug)]
pub enum TapError {
    /// No adapter with the configured alias is installed.
    NotFound,
    /// The device node exists but is already held by another process.
    DeviceBusy,
    /// The driver refused the handle (typically: not elevated).
    PermissionDenied,
    /// Anything else the OS reported.
    Io(io::Error),
}

impl std::error::Error for TapError {}

impl fmt::Display for TapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TapError::NotFound => write!(f, "tap adapter not found"),
            TapError::DeviceBusy => write!(f, "tap device is busy"),
            TapError::PermissionDenied => write!(f, "tap device access denied"),
            TapError::Io(err) => write!(f, "tap device error: {err}"),
        }
    }
}

impl From<io::Error> for TapError {
    fn from(error: io::Error) -> Self {
        match error.kind() {
            io::ErrorKind::NotFound => TapError::NotFound,
            io::ErrorKind::PermissionDenied => TapError::PermissionDenied,
            _ => TapError::Io(error),
        }
    }
}

/// A discovered-but-not-yet-opened adapter.
#[derive(Clone, Debug)]
pub struct TapAdapter {
    alias: String,
    device_id: String,
}

impl TapAdapter {
    /// Locates the adapter with the given interface alias and resolves the
    /// opaque device identifier used to open it.
    pub async fn discover(alias: &str) -> Result<Self, TapError> {
        let device_id = sys::discover(alias).await?;
        info!("found tap adapter {:?} (device {})", alias, device_id);
        Ok(Self {
            alias: alias.to_string(),
            device_id,
        })
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    /// Removes any previously assigned address, assigns `ip` with the given
    /// prefix and brings the adapter up. Idempotent.
    pub async fn assign_ip(&self, ip: Ipv4Addr, prefix: u8) -> Result<(), TapError> {
        sys::assign_ip(&self.alias, ip, prefix).await?;
        info!("assigned {}/{} to {:?}", ip, prefix, self.alias);
        Ok(())
    }

    /// The adapter's own MAC address, when it can be read.
    pub async fn mac(&self) -> Option<[u8; 6]> {
        sys::read_mac(&self.alias).await
    }

    /// Opens the raw frame endpoint exclusively and raises the media status
    /// to connected. Spawns the blocking reader thread.
    pub fn open(self) -> Result<TapDevice, TapError> {
        let raw = Arc::new(RawTap::open(&self.device_id)?);
        info!("tap device {} opened", self.device_id);

        let closed = Arc::new(AtomicBool::new(false));
        let packet_count = Arc::new(AtomicU64::new(0));
        let (frame_tx, frame_rx) = mpsc::channel(FRAME_CHANNEL_DEPTH);

        let reader = {
            let raw = Arc::clone(&raw);
            let closed = Arc::clone(&closed);
            let packet_count = Arc::clone(&packet_count);
            thread::spawn(move || read_loop(raw, closed, packet_count, frame_tx))
        };

        Ok(TapDevice {
            adapter: self,
            raw,
            closed,
            packet_count,
            frames: Some(frame_rx),
            _reader: reader,
        })
    }
}

/// An open, exclusively owned TAP device.
pub struct TapDevice {
    adapter: TapAdapter,
    raw: Arc<RawTap>,
    closed: Arc<AtomicBool>,
    packet_count: Arc<AtomicU64>,
    frames: Option<mpsc::Receiver<Vec<u8>>>,
    _reader: thread::JoinHandle<()>,
}

impl TapDevice {
    pub fn alias(&self) -> &str {
        self.adapter.alias()
    }

    /// Takes the single-consumer stream of ingress frames.
    ///
    /// Returns `None` on a second call; there is exactly one reader.
    pub fn packets(&mut self) -> Option<mpsc::Receiver<Vec<u8>>> {
        self.frames.take()
    }

    /// The number of frames read from the adapter so far, shared with the
    /// user interface.
    pub fn packet_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.packet_count)
    }

    /// Writes a single raw frame. Best-effort: an error is logged and the
    /// frame dropped, never retried.
    pub async fn write(&self, frame: Vec<u8>) {
        let raw = Arc::clone(&self.raw);
        let result = tokio::task::spawn_blocking(move || raw.write(&frame)).await;
        match result {
            Ok(Ok(_)) => {}
            Ok(Err(err)) => warn!("dropping frame, tap write failed: {err}"),
            Err(err) => warn!("dropping frame, write worker died: {err}"),
        }
    }

    /// Releases the handle and stops the frame stream. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.raw.close();
        info!("tap device closed");
    }
}

impl Drop for TapDevice {
    fn drop(&mut self) {
        self.close();
    }
}

fn read_loop(
    raw: Arc<RawTap>,
    closed: Arc<AtomicBool>,
    packet_count: Arc<AtomicU64>,
    frames: mpsc::Sender<Vec<u8>>,
) {
    debug!("tap reader thread started");
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];

    while !closed.load(Ordering::SeqCst) {
        match raw.read(&mut buffer) {
            Ok(0) => continue,
            Ok(n) => {
                packet_count.fetch_add(1, Ordering::Relaxed);
                if frames.blocking_send(buffer[..n].to_vec()).is_err() {
                    // Consumer is gone; only shutdown does that.
                    break;
                }
            }
            Err(err) => {
                if closed.load(Ordering::SeqCst) {
                    break;
                }
                error!("tap read failed: {err}");
                thread::sleep(READ_RETRY_DELAY);
            }
        }
    }
    debug!("tap reader thread finished");
}
