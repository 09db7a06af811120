// Copyright 2025 - developers of the `tungram` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The tunnel's configuration record.
//!
//! Persisted as plain JSON; every field has a default, unknown keys are
//! ignored, and a missing or corrupt file falls back to the defaults.
//! Immutable once the core starts: changes take effect on restart.

use crate::error::ConfigError;
use log::warn;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::Path;
use std::time::Duration;
use tungram_crypto::TunnelKey;
use tungram_transport::Role;

/// Which messaging service carries the tunnel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Telegram,
    Vk,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub transport_type: TransportKind,

    // Telegram credentials and endpoint handle.
    pub api_id: i32,
    pub api_hash: String,
    pub bot_token: String,
    pub chat_id: String,

    // VKontakte credentials and endpoint handle.
    pub vk_login: String,
    pub vk_password: String,
    pub vk_token: String,
    pub vk_peer_id: String,
    pub vk_app_id: i64,

    pub tap_interface_name: String,
    pub server_ip: Ipv4Addr,
    pub client_ip: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub mtu: u32,
    pub subnet: Ipv4Addr,
    pub subnet_mask: Ipv4Addr,

    /// Exactly 32 ASCII bytes; the pre-shared Kuznyechik key.
    pub encryption_key: String,

    /// Must match on both peers; nothing on the wire advertises it.
    pub compression_enabled: bool,

    /// Seconds the sender keeps coalescing after the first packet.
    pub batch_interval: f64,
    /// Bytes; consulted before taking each further packet into a batch.
    pub max_batch_size: usize,

    pub telegram_queue_cap: usize,
    pub vk_queue_cap: usize,

    /// Carrier data-centre CIDRs kept out of the tunnel.
    pub telegram_subnets: Vec<String>,

    pub location_label: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            transport_type: TransportKind::Telegram,
            api_id: 0,
            api_hash: String::new(),
            bot_token: String::new(),
            chat_id: String::new(),
            vk_login: String::new(),
            vk_password: String::new(),
            vk_token: String::new(),
            vk_peer_id: String::new(),
            vk_app_id: 0,
            tap_interface_name: "Ethernet 5".into(),
            server_ip: Ipv4Addr::new(10, 8, 0, 1),
            client_ip: Ipv4Addr::new(10, 8, 0, 2),
            netmask: Ipv4Addr::new(255, 255, 255, 0),
            mtu: 1280,
            subnet: Ipv4Addr::new(10, 8, 0, 0),
            subnet_mask: Ipv4Addr::new(255, 255, 255, 0),
            encryption_key: String::new(),
            compression_enabled: false,
            batch_interval: 0.05,
            max_batch_size: 512 * 1024,
            telegram_queue_cap: 5000,
            vk_queue_cap: 500,
            telegram_subnets: default_carrier_subnets(),
            location_label: "Unknown PC".into(),
        }
    }
}

/// Telegram and VK/Mail.ru data-centre ranges, excluded from the tunnel so
/// the carrier traffic itself keeps using the real uplink.
fn default_carrier_subnets() -> Vec<String> {
    [
        // Telegram
        "91.108.4.0/22",
        "91.108.8.0/22",
        "91.108.12.0/22",
        "91.108.16.0/22",
        "91.108.56.0/22",
        "149.154.160.0/20",
        "149.154.164.0/22",
        "149.154.168.0/22",
        "149.154.172.0/22",
        // VKontakte and Mail.ru group
        "87.240.128.0/18",
        "93.186.224.0/20",
        "95.142.192.0/20",
        "185.32.248.0/22",
        "188.93.56.0/24",
        "128.140.168.0/21",
        "195.218.169.0/24",
        "79.137.183.0/24",
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}

impl Config {
    /// Loads the record, tolerating a missing or unreadable file.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(text) => match serde_json::from_str(&text) {
                Ok(config) => config,
                Err(err) => {
                    warn!("config file is not valid, using defaults: {err}");
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }

    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        let text = serde_json::to_string_pretty(self).expect("config serializes");
        std::fs::write(path, text)
    }

    /// This host's tunnel address for the given role.
    pub fn ip_for_role(&self, role: Role) -> Ipv4Addr {
        match role {
            Role::Server => self.server_ip,
            Role::Client => self.client_ip,
        }
    }

    /// The address the peer owns, answered in ARP and routed through.
    pub fn peer_ip_for_role(&self, role: Role) -> Ipv4Addr {
        match role {
            Role::Server => self.client_ip,
            Role::Client => self.server_ip,
        }
    }

    /// The pre-shared key, checked for the exact Kuznyechik length.
    pub fn tunnel_key(&self) -> Result<TunnelKey, ConfigError> {
        if !self.encryption_key.is_ascii() {
            return Err(ConfigError::BadKey(self.encryption_key.len()));
        }
        TunnelKey::from_bytes(self.encryption_key.as_bytes())
            .ok_or(ConfigError::BadKey(self.encryption_key.len()))
    }

    pub fn batch_interval_duration(&self) -> Duration {
        Duration::from_secs_f64(self.batch_interval.max(0.0))
    }

    /// Checks that the selected transport has the credentials it needs.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.tunnel_key()?;
        match self.transport_type {
            TransportKind::Telegram => {
                if self.bot_token.is_empty() {
                    return Err(ConfigError::MissingCredentials("bot_token"));
                }
                if self.chat_id.is_empty() {
                    return Err(ConfigError::MissingCredentials("chat_id"));
                }
            }
            TransportKind::Vk => {
                if self.vk_token.is_empty() && (self.vk_login.is_empty() || self.vk_password.is_empty())
                {
                    return Err(ConfigError::MissingCredentials("vk_token or vk_login"));
                }
                if self.vk_peer_id_parsed().is_none() {
                    return Err(ConfigError::MissingCredentials("vk_peer_id"));
                }
            }
        }
        Ok(())
    }

    pub fn vk_peer_id_parsed(&self) -> Option<i64> {
        self.vk_peer_id.trim().parse().ok()
    }

    /// Hostnames whose addresses must bypass the tunnel, on top of the
    /// static subnet list.
    pub fn carrier_api_hosts(&self) -> Vec<String> {
        let mut hosts = vec!["api.telegram.org".to_string(), "telegram.org".to_string()];
        if self.transport_type == TransportKind::Vk {
            for host in ["api.vk.com", "vk.com", "im.vk.com", "pu.vk.com", "login.vk.com"] {
                hosts.push(host.to_string());
            }
        }
        hosts
    }
}
