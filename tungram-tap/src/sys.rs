// Copyright 2025 - developers of the `tungram` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Adapter discovery and addressing through the host's own tooling.
//!
//! On Windows the adapter alias maps to a driver GUID through the network
//! class registry key, and addressing goes through PowerShell; on Unix the
//! alias is the device name itself and addressing goes through `ip`.

use crate::TapError;
use log::debug;

/// Parses `AA-BB-CC-DD-EE-FF` / `aa:bb:cc:dd:ee:ff` MAC forms.
fn parse_mac(text: &str) -> Option<[u8; 6]> {
    let hex: String = text
        .trim()
        .chars()
        .filter(|c| !matches!(c, '-' | ':'))
        .collect();
    if hex.len() != 12 {
        return None;
    }

    let mut mac = [0u8; 6];
    for (i, byte) in mac.iter_mut().enumerate() {
        *byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16).ok()?;
    }
    Some(mac)
}

#[cfg(windows)]
mod imp {
    use super::*;
    use std::net::Ipv4Addr;
    use tokio::process::Command;

    async fn powershell(script: &str) -> Result<String, TapError> {
        debug!("powershell: {script}");
        let output = Command::new("powershell")
            .args(["-NoProfile", "-Command", script])
            .output()
            .await
            .map_err(TapError::Io)?;
        if !output.status.success() {
            return Err(TapError::Io(std::io::Error::other(
                String::from_utf8_lossy(&output.stderr).into_owned(),
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    pub(crate) async fn discover(alias: &str) -> Result<String, TapError> {
        let script = format!(
            "$tap = Get-NetAdapter -Name '{alias}' -ErrorAction SilentlyContinue\n\
             if ($tap) {{\n\
               $key = 'HKLM:\\SYSTEM\\CurrentControlSet\\Control\\Class\\{{4d36e972-e325-11ce-bfc1-08002be10318}}'\n\
               (Get-ChildItem $key | Get-ItemProperty | Where-Object {{ $_.NetCfgInstanceId -eq $tap.InterfaceGuid }}).NetCfgInstanceId\n\
             }}"
        );
        let guid = powershell(&script).await?.trim().to_string();
        if guid.is_empty() {
            return Err(TapError::NotFound);
        }
        Ok(guid)
    }

    pub(crate) async fn assign_ip(alias: &str, ip: Ipv4Addr, prefix: u8) -> Result<(), TapError> {
        let script = format!(
            "Remove-NetIPAddress -InterfaceAlias '{alias}' -Confirm:$false -ErrorAction SilentlyContinue\n\
             Start-Sleep -Milliseconds 500\n\
             New-NetIPAddress -IPAddress {ip} -PrefixLength {prefix} -InterfaceAlias '{alias}' | Out-Null\n\
             Enable-NetAdapter -Name '{alias}' -Confirm:$false"
        );
        powershell(&script).await?;
        Ok(())
    }

    pub(crate) async fn read_mac(alias: &str) -> Option<[u8; 6]> {
        let script = format!("(Get-NetAdapter -Name '{alias}').MacAddress");
        parse_mac(&powershell(&script).await.ok()?)
    }
}

#[cfg(unix)]
mod imp {
    use super::*;
    use std::net::Ipv4Addr;
    use tokio::process::Command;

    async fn ip_command(args: &[&str]) -> Result<(), TapError> {
        debug!("ip {}", args.join(" "));
        let status = Command::new("ip")
            .args(args)
            .status()
            .await
            .map_err(TapError::Io)?;
        if !status.success() {
            return Err(TapError::Io(std::io::Error::other(format!(
                "ip {} exited with {status}",
                args.join(" ")
            ))));
        }
        Ok(())
    }

    pub(crate) async fn discover(alias: &str) -> Result<String, TapError> {
        if std::path::Path::new(&format!("/sys/class/net/{alias}")).exists() {
            Ok(alias.to_string())
        } else {
            Err(TapError::NotFound)
        }
    }

    pub(crate) async fn assign_ip(alias: &str, ip: Ipv4Addr, prefix: u8) -> Result<(), TapError> {
        ip_command(&["addr", "flush", "dev", alias]).await?;
        ip_command(&["addr", "add", &format!("{ip}/{prefix}"), "dev", alias]).await?;
        ip_command(&["link", "set", alias, "up"]).await?;
        Ok(())
    }

    pub(crate) async fn read_mac(alias: &str) -> Option<[u8; 6]> {
        let text = tokio::task::spawn_blocking({
            let path = format!("/sys/class/net/{alias}/address");
            move || std::fs::read_to_string(path)
        })
        .await
        .ok()?
        .ok()?;
        parse_mac(&text)
    }
}

pub(crate) use imp::{assign_ip, discover, read_mac};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mac_parsing_accepts_both_separators() {
        assert_eq!(
            parse_mac("00-FF-10-20-30-40"),
            Some([0x00, 0xff, 0x10, 0x20, 0x30, 0x40])
        );
        assert_eq!(
            parse_mac("02:00:00:00:00:01\n"),
            Some([0x02, 0x00, 0x00, 0x00, 0x00, 0x01])
        );
    }

    #[test]
    fn mac_parsing_rejects_malformed_input() {
        assert_eq!(parse_mac(""), None);
        assert_eq!(parse_mac("00-FF-10-20-30"), None);
        assert_eq!(parse_mac("not a mac address"), None);
    }
}
