// Copyright 2025 - developers of the `tungram` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! A [`HostNet`] backend that records every call instead of touching the
//! host, for tests of the bring-up and cleanup sequences.

use crate::{HostNet, HostNetError};
use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;
use std::sync::Mutex;

/// Operations that can be made to fail on purpose.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Failure {
    AddRoute,
    DeleteRoute,
    AddNat,
    RemoveNat,
}

#[derive(Default)]
pub struct RecordingHostNet {
    calls: Mutex<Vec<String>>,
    gateway: Option<Ipv4Addr>,
    interfaces: HashMap<String, u32>,
    resolved: HashMap<String, Vec<Ipv4Addr>>,
    failures: HashSet<Failure>,
}

impl RecordingHostNet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_gateway(mut self, gateway: Ipv4Addr) -> Self {
        self.gateway = Some(gateway);
        self
    }

    pub fn with_interface(mut self, alias: &str, index: u32) -> Self {
        self.interfaces.insert(alias.to_string(), index);
        self
    }

    pub fn with_resolved(mut self, host: &str, ips: &[Ipv4Addr]) -> Self {
        self.resolved.insert(host.to_string(), ips.to_vec());
        self
    }

    pub fn with_failure(mut self, failure: Failure) -> Self {
        self.failures.insert(failure);
        self
    }

    /// Everything invoked so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn check(&self, failure: Failure) -> Result<(), HostNetError> {
        if self.failures.contains(&failure) {
            Err(HostNetError::Command(format!("injected {failure:?} failure")))
        } else {
            Ok(())
        }
    }
}

impl HostNet for RecordingHostNet {
    async fn default_gateway(&self) -> Result<Option<Ipv4Addr>, HostNetError> {
        self.record("default_gateway".into());
        Ok(self.gateway)
    }

    async fn interface_index(&self, alias: &str) -> Result<Option<u32>, HostNetError> {
        self.record(format!("interface_index {alias}"));
        Ok(self.interfaces.get(alias).copied())
    }

    async fn set_mtu(&self, if_index: u32, mtu: u32) -> Result<(), HostNetError> {
        self.record(format!("set_mtu {if_index} {mtu}"));
        Ok(())
    }

    async fn add_route(
        &self,
        dest: &str,
        mask: Option<&str>,
        gateway: Ipv4Addr,
        if_index: Option<u32>,
        metric: u32,
    ) -> Result<(), HostNetError> {
        let mut call = format!("add_route {dest}");
        if let Some(mask) = mask {
            call.push_str(&format!(" mask {mask}"));
        }
        call.push_str(&format!(" via {gateway}"));
        if let Some(if_index) = if_index {
            call.push_str(&format!(" if {if_index}"));
        }
        call.push_str(&format!(" metric {metric}"));
        self.record(call);
        self.check(Failure::AddRoute)
    }

    async fn delete_route(&self, dest: &str, mask: Option<&str>) -> Result<(), HostNetError> {
        match mask {
            Some(mask) => self.record(format!("delete_route {dest} mask {mask}")),
            None => self.record(format!("delete_route {dest}")),
        }
        self.check(Failure::DeleteRoute)
    }

    async fn set_dns(&self, if_index: u32, servers: &[Ipv4Addr]) -> Result<(), HostNetError> {
        let servers: Vec<String> = servers.iter().map(|s| s.to_string()).collect();
        self.record(format!("set_dns {if_index} {}", servers.join(",")));
        Ok(())
    }

    async fn set_profile_private(&self, alias: &str) -> Result<(), HostNetError> {
        self.record(format!("set_profile_private {alias}"));
        Ok(())
    }

    async fn allow_firewall(&self, alias: &str) -> Result<(), HostNetError> {
        self.record(format!("allow_firewall {alias}"));
        Ok(())
    }

    async fn remove_firewall_rules(&self) -> Result<(), HostNetError> {
        self.record("remove_firewall_rules".into());
        Ok(())
    }

    async fn enable_ip_forwarding(&self) -> Result<(), HostNetError> {
        self.record("enable_ip_forwarding".into());
        Ok(())
    }

    async fn add_nat(&self, name: &str, subnet: &str) -> Result<(), HostNetError> {
        self.record(format!("add_nat {name} {subnet}"));
        self.check(Failure::AddNat)
    }

    async fn remove_nat(&self, name: &str) -> Result<(), HostNetError> {
        self.record(format!("remove_nat {name}"));
        self.check(Failure::RemoveNat)
    }

    async fn resolve_host(&self, host: &str) -> Vec<Ipv4Addr> {
        self.record(format!("resolve_host {host}"));
        self.resolved.get(host).cloned().unwrap_or_default()
    }
}
