// Copyright 2025 - developers of the `tungram` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The production [`HostNet`] backend: PowerShell, `route` and `reg`.

use crate::{HostNet, HostNetError, FIREWALL_RULE_IN, FIREWALL_RULE_OUT};
use log::debug;
use std::net::Ipv4Addr;
use tokio::process::Command;

#[derive(Default)]
pub struct WindowsHostNet;

impl WindowsHostNet {
    pub fn new() -> Self {
        Self
    }

    async fn powershell(&self, script: &str) -> Result<String, HostNetError> {
        debug!("powershell: {script}");
        let output = Command::new("powershell")
            .args(["-NoProfile", "-ExecutionPolicy", "Bypass", "-Command", script])
            .output()
            .await?;
        if !output.status.success() {
            return Err(HostNetError::Command(format!(
                "{script}: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl HostNet for WindowsHostNet {
    async fn default_gateway(&self) -> Result<Option<Ipv4Addr>, HostNetError> {
        let table = self.powershell("route print 0.0.0.0").await?;
        for line in table.lines() {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() >= 5 && parts[0] == "0.0.0.0" && parts[1] == "0.0.0.0" {
                if let Ok(gateway) = parts[2].parse::<Ipv4Addr>() {
                    // The tunnel's own half-defaults must not count.
                    if !parts[2].starts_with("10.8.") {
                        return Ok(Some(gateway));
                    }
                }
            }
        }
        Ok(None)
    }

    async fn interface_index(&self, alias: &str) -> Result<Option<u32>, HostNetError> {
        let output = self
            .powershell(&format!("(Get-NetAdapter -Name '{alias}' -ErrorAction SilentlyContinue).InterfaceIndex"))
            .await?;
        Ok(output.trim().parse().ok())
    }

    async fn set_mtu(&self, if_index: u32, mtu: u32) -> Result<(), HostNetError> {
        self.powershell(&format!(
            "Set-NetIPInterface -InterfaceIndex {if_index} -NlMtuBytes {mtu}"
        ))
        .await?;
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
        let mut command = format!("route add {dest}");
        if let Some(mask) = mask {
            command.push_str(&format!(" mask {mask}"));
        }
        command.push_str(&format!(" {gateway} metric {metric}"));
        if let Some(if_index) = if_index {
            command.push_str(&format!(" IF {if_index}"));
        }
        self.powershell(&command).await?;
        Ok(())
    }

    async fn delete_route(&self, dest: &str, mask: Option<&str>) -> Result<(), HostNetError> {
        let command = match mask {
            Some(mask) => format!("route delete {dest} mask {mask}"),
            None => format!("route delete {dest}"),
        };
        self.powershell(&command).await?;
        Ok(())
    }

    async fn set_dns(&self, if_index: u32, servers: &[Ipv4Addr]) -> Result<(), HostNetError> {
        let list: Vec<String> = servers.iter().map(|s| format!("'{s}'")).collect();
        self.powershell(&format!(
            "Set-DnsClientServerAddress -InterfaceIndex {if_index} -ServerAddresses ({})",
            list.join(",")
        ))
        .await?;
        Ok(())
    }

    async fn set_profile_private(&self, alias: &str) -> Result<(), HostNetError> {
        self.powershell(&format!(
            "Set-NetConnectionProfile -InterfaceAlias '{alias}' -NetworkCategory Private"
        ))
        .await?;
        Ok(())
    }

    async fn allow_firewall(&self, alias: &str) -> Result<(), HostNetError> {
        self.powershell(&format!(
            "New-NetFirewallRule -DisplayName '{FIREWALL_RULE_IN}' -Direction Inbound \
             -InterfaceAlias '{alias}' -Action Allow -Enabled True"
        ))
        .await?;
        self.powershell(&format!(
            "New-NetFirewallRule -DisplayName '{FIREWALL_RULE_OUT}' -Direction Outbound \
             -InterfaceAlias '{alias}' -Action Allow -Enabled True"
        ))
        .await?;
        Ok(())
    }

    async fn remove_firewall_rules(&self) -> Result<(), HostNetError> {
        self.powershell(&format!(
            "Remove-NetFirewallRule -DisplayName '{FIREWALL_RULE_IN}','{FIREWALL_RULE_OUT}' \
             -ErrorAction SilentlyContinue"
        ))
        .await?;
        Ok(())
    }

    async fn enable_ip_forwarding(&self) -> Result<(), HostNetError> {
        debug!("enabling persistent ip forwarding");
        let output = Command::new("reg")
            .args([
                "add",
                r"HKLM\SYSTEM\CurrentControlSet\Services\Tcpip\Parameters",
                "/v",
                "IPEnableRouter",
                "/t",
                "REG_DWORD",
                "/d",
                "1",
                "/f",
            ])
            .output()
            .await?;
        if !output.status.success() {
            return Err(HostNetError::Command("IPEnableRouter".into()));
        }
        Ok(())
    }

    async fn add_nat(&self, name: &str, subnet: &str) -> Result<(), HostNetError> {
        self.powershell(&format!(
            "New-NetNat -Name '{name}' -InternalIPInterfaceAddressPrefix '{subnet}'"
        ))
        .await?;
        Ok(())
    }

    async fn remove_nat(&self, name: &str) -> Result<(), HostNetError> {
        self.powershell(&format!(
            "Remove-NetNat -Name '{name}' -Confirm:$false -ErrorAction SilentlyContinue"
        ))
        .await?;
        Ok(())
    }

    async fn resolve_host(&self, host: &str) -> Vec<Ipv4Addr> {
        let Ok(addresses) = tokio::net::lookup_host((host, 443)).await else {
            return Vec::new();
        };
        addresses
            .filter_map(|addr| match addr {
                std::net::SocketAddr::V4(v4) => Some(*v4.ip()),
                std::net::SocketAddr::V6(_) => None,
            })
            .collect()
    }
}
