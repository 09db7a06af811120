// Copyright 2025 - developers of the `tungram` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Bring-up errors. Steady-state failures never surface here: they are
//! logged where they happen and cost at most one batch or blob.

use std::fmt;
use tungram_hostnet::HostNetError;
use tungram_tap::TapError;
use tungram_transport::TransportError;

/// The configuration cannot drive the selected transport.
#[derive(Debug)]
pub enum ConfigError {
    /// The encryption key is not exactly 32 ASCII bytes; the length found.
    BadKey(usize),
    /// A credential the selected transport requires is absent.
    MissingCredentials(&'static str),
}

impl std::error::Error for ConfigError {}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::BadKey(len) => {
                write!(f, "encryption key must be 32 ascii bytes, got {len}")
            }
            ConfigError::MissingCredentials(key) => {
                write!(f, "missing credentials: {key}")
            }
        }
    }
}

/// Why the tunnel failed to come up.
#[derive(Debug)]
pub enum InitError {
    Config(ConfigError),
    Device(TapError),
    HostNetwork(HostNetError),
    Carrier(TransportError),
}

impl std::error::Error for InitError {}

impl fmt::Display for InitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InitError::Config(err) => write!(f, "invalid configuration: {err}"),
            InitError::Device(err) => write!(f, "tap device unavailable: {err}"),
            InitError::HostNetwork(err) => write!(f, "host network setup failed: {err}"),
            InitError::Carrier(err) => write!(f, "carrier bring-up failed: {err}"),
        }
    }
}

impl From<ConfigError> for InitError {
    fn from(error: ConfigError) -> Self {
        Self::Config(error)
    }
}

impl From<TapError> for InitError {
    fn from(error: TapError) -> Self {
        Self::Device(error)
    }
}

impl From<HostNetError> for InitError {
    fn from(error: HostNetError) -> Self {
        Self::HostNetwork(error)
    }
}

impl From<TransportError> for InitError {
    fn from(error: TransportError) -> Self {
        Self::Carrier(error)
    }
}
