// Copyright 2025 - developers of the `tungram` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Host network programming for the tunnel.
//!
//! The tunnel needs exactly the right traffic captured: everything through
//! the TAP adapter, except the carrier's own endpoints, which must keep
//! using the real uplink or the tunnel would try to carry itself.
//!
//! All host state is reached through the [`HostNet`] capability, one method
//! per semantic operation. The production backend shells out to the
//! platform tools; [`recording::RecordingHostNet`] captures calls for tests.

pub mod recording;
pub mod windows;

use log::{info, warn};
use std::fmt;
use std::net::Ipv4Addr;

/// Name of the NAT rule the server owns. Deleted and recreated on bring-up.
pub const NAT_RULE_NAME: &str = "TUNGRAM_NAT";

/// Display names of the firewall allow rules for the TAP interface.
pub const FIREWALL_RULE_IN: &str = "TUNGRAM_IN";
pub const FIREWALL_RULE_OUT: &str = "TUNGRAM_OUT";

/// DNS servers assigned to the TAP adapter on the client.
pub const DNS_SERVERS: [Ipv4Addr; 2] = [Ipv4Addr::new(8, 8, 8, 8), Ipv4Addr::new(1, 1, 1, 1)];

/// The halves of `0.0.0.0/0`: routing both through the tunnel out-ranks the
/// existing default route without deleting it.
pub const HALF_DEFAULT_ROUTES: [(&str, &str); 2] =
    [("0.0.0.0", "128.0.0.0"), ("128.0.0.0", "128.0.0.0")];

#[derive(Debug)]
pub enum HostNetError {
    /// The client host has no default gateway to fall back on.
    NoDefaultGateway,
    /// The TAP interface alias did not resolve to an interface index.
    InterfaceNotFound(String),
    /// A host tool reported failure.
    Command(String),
    /// Spawning a host tool failed.
    Io(std::io::Error),
}

impl std::error::Error for HostNetError {}

impl fmt::Display for HostNetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostNetError::NoDefaultGateway => write!(f, "no default gateway found"),
            HostNetError::InterfaceNotFound(alias) => {
                write!(f, "interface {alias:?} not found")
            }
            HostNetError::Command(detail) => write!(f, "host command failed: {detail}"),
            HostNetError::Io(err) => write!(f, "host command failed: {err}"),
        }
    }
}

impl From<std::io::Error> for HostNetError {
    fn from(error: std::io::Error) -> Self {
        Self::Io(error)
    }
}

/// One method per semantic operation on the host's network state.
#[allow(async_fn_in_trait)]
pub trait HostNet {
    /// The gateway of the current (non-tunnel) default route, if any.
    async fn default_gateway(&self) -> Result<Option<Ipv4Addr>, HostNetError>;

    /// Resolves an interface alias to the index used by route commands.
    async fn interface_index(&self, alias: &str) -> Result<Option<u32>, HostNetError>;

    async fn set_mtu(&self, if_index: u32, mtu: u32) -> Result<(), HostNetError>;

    /// Adds an IPv4 route. `dest` is either a CIDR (`"10.0.0.0/8"`) or a
    /// bare network address paired with `mask`.
    async fn add_route(
        &self,
        dest: &str,
        mask: Option<&str>,
        gateway: Ipv4Addr,
        if_index: Option<u32>,
        metric: u32,
    ) -> Result<(), HostNetError>;

    async fn delete_route(&self, dest: &str, mask: Option<&str>) -> Result<(), HostNetError>;

    async fn set_dns(&self, if_index: u32, servers: &[Ipv4Addr]) -> Result<(), HostNetError>;

    /// Marks the interface's network profile private (Windows semantics).
    async fn set_profile_private(&self, alias: &str) -> Result<(), HostNetError>;

    /// Installs inbound and outbound firewall allow rules for the interface.
    async fn allow_firewall(&self, alias: &str) -> Result<(), HostNetError>;

    async fn remove_firewall_rules(&self) -> Result<(), HostNetError>;

    /// Enables kernel IP forwarding, persistently.
    async fn enable_ip_forwarding(&self) -> Result<(), HostNetError>;

    async fn add_nat(&self, name: &str, subnet: &str) -> Result<(), HostNetError>;

    async fn remove_nat(&self, name: &str) -> Result<(), HostNetError>;

    /// Resolves a carrier API hostname to its IPv4 addresses.
    async fn resolve_host(&self, host: &str) -> Vec<Ipv4Addr>;
}

/// Destinations that must bypass the tunnel: the carrier's published
/// data-centre subnets plus whatever its API hostnames resolve to.
#[derive(Clone, Debug, Default)]
pub struct Exclusions {
    pub subnets: Vec<String>,
    pub api_hosts: Vec<String>,
}

impl Exclusions {
    async fn routes<H: HostNet>(&self, net: &H) -> Vec<String> {
        let mut routes = self.subnets.clone();
        for host in &self.api_hosts {
            for ip in net.resolve_host(host).await {
                let route = format!("{ip}/32");
                if !routes.contains(&route) {
                    info!("resolved {host} -> {ip}");
                    routes.push(route);
                }
            }
        }
        routes
    }
}

/// Installs the client's split-tunnel state: carrier exclusions through the
/// real gateway, the half-default pair through the tunnel, DNS and firewall
/// exceptions on the TAP adapter.
pub async fn setup_client<H: HostNet>(
    net: &H,
    alias: &str,
    server_ip: Ipv4Addr,
    mtu: u32,
    exclusions: &Exclusions,
) -> Result<(), HostNetError> {
    info!("setting up client routing on {alias:?}");

    let gateway = net
        .default_gateway()
        .await?
        .ok_or(HostNetError::NoDefaultGateway)?;
    let if_index = net
        .interface_index(alias)
        .await?
        .ok_or_else(|| HostNetError::InterfaceNotFound(alias.to_string()))?;

    net.set_mtu(if_index, mtu).await?;

    let routes = exclusions.routes(net).await;
    info!("excluding {} carrier routes from the tunnel", routes.len());
    for route in &routes {
        if let Err(err) = net.add_route(route, None, gateway, None, 1).await {
            warn!("failed to exclude {route}: {err}");
        }
    }

    for (dest, mask) in HALF_DEFAULT_ROUTES {
        net.add_route(dest, Some(mask), server_ip, Some(if_index), 1)
            .await?;
    }

    net.set_dns(if_index, &DNS_SERVERS).await?;
    net.set_profile_private(alias).await?;
    net.allow_firewall(alias).await?;
    Ok(())
}

/// Installs the server's NAT state: forwarding, firewall, and a fresh NAT
/// rule over the tunnel subnet.
pub async fn setup_server<H: HostNet>(
    net: &H,
    alias: &str,
    mtu: u32,
    subnet: Ipv4Addr,
) -> Result<(), HostNetError> {
    info!("setting up server nat on {alias:?}");

    if let Some(if_index) = net.interface_index(alias).await? {
        net.set_mtu(if_index, mtu).await?;
    }

    net.enable_ip_forwarding().await?;
    net.allow_firewall(alias).await?;

    // Stale rules from an earlier run shadow the new one, and the stack
    // needs a moment to let go of the name.
    let _ = net.remove_nat(NAT_RULE_NAME).await;
    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
    net.add_nat(NAT_RULE_NAME, &format!("{subnet}/24")).await?;
    info!("server nat configured");
    Ok(())
}

/// Removes everything either role may have installed. Best-effort per step:
/// cleanup after a partially failed bring-up must still undo what it can.
pub async fn cleanup<H: HostNet>(net: &H, exclusions: &Exclusions) {
    info!("cleaning up tunnel routes");

    if let Err(err) = net.remove_nat(NAT_RULE_NAME).await {
        warn!("nat removal failed: {err}");
    }

    for (dest, mask) in HALF_DEFAULT_ROUTES {
        if let Err(err) = net.delete_route(dest, Some(mask)).await {
            warn!("route cleanup of {dest} failed: {err}");
        }
    }

    for route in exclusions.routes(net).await {
        let base = route.split('/').next().unwrap_or(&route).to_string();
        if let Err(err) = net.delete_route(&base, None).await {
            warn!("route cleanup of {base} failed: {err}");
        }
    }

    if let Err(err) = net.remove_firewall_rules().await {
        warn!("firewall cleanup failed: {err}");
    }
}

#[cfg(test)]
mod tests {
    use super::recording::{Failure, RecordingHostNet};
    use super::*;

    fn exclusions() -> Exclusions {
        Exclusions {
            subnets: vec!["149.154.160.0/20".into(), "91.108.4.0/22".into()],
            api_hosts: vec!["api.telegram.org".into()],
        }
    }

    #[tokio::test]
    async fn client_setup_installs_exclusions_then_half_defaults() {
        let net = RecordingHostNet::new()
            .with_gateway(Ipv4Addr::new(192, 168, 1, 1))
            .with_interface("Ethernet 5", 23)
            .with_resolved("api.telegram.org", &[Ipv4Addr::new(149, 154, 167, 220)]);

        setup_client(
            &net,
            "Ethernet 5",
            Ipv4Addr::new(10, 8, 0, 1),
            1280,
            &exclusions(),
        )
        .await
        .unwrap();

        let calls = net.calls();
        assert!(calls.contains(&"set_mtu 23 1280".to_string()));
        assert!(calls.contains(&"add_route 149.154.160.0/20 via 192.168.1.1 metric 1".to_string()));
        assert!(calls.contains(&"add_route 149.154.167.220/32 via 192.168.1.1 metric 1".to_string()));

        // The half-default pair goes through the tunnel, after the exclusions.
        let first_half = calls
            .iter()
            .position(|c| c.starts_with("add_route 0.0.0.0 mask 128.0.0.0 via 10.8.0.1"))
            .unwrap();
        let last_exclusion = calls
            .iter()
            .rposition(|c| c.contains("via 192.168.1.1"))
            .unwrap();
        assert!(last_exclusion < first_half);
        assert!(calls
            .iter()
            .any(|c| c.starts_with("add_route 128.0.0.0 mask 128.0.0.0 via 10.8.0.1 if 23")));
        assert!(calls.contains(&"set_dns 23 8.8.8.8,1.1.1.1".to_string()));
        assert!(calls.contains(&"allow_firewall Ethernet 5".to_string()));
    }

    #[tokio::test]
    async fn client_setup_fails_without_a_gateway() {
        let net = RecordingHostNet::new().with_interface("Ethernet 5", 23);
        let result = setup_client(
            &net,
            "Ethernet 5",
            Ipv4Addr::new(10, 8, 0, 1),
            1280,
            &exclusions(),
        )
        .await;
        assert!(matches!(result, Err(HostNetError::NoDefaultGateway)));
        assert!(net.calls().iter().all(|c| !c.starts_with("add_route")));
    }

    #[tokio::test(start_paused = true)]
    async fn server_setup_replaces_the_nat_rule() {
        let net = RecordingHostNet::new().with_interface("tap0", 7);
        setup_server(&net, "tap0", 1280, Ipv4Addr::new(10, 8, 0, 0))
            .await
            .unwrap();

        let calls = net.calls();
        let removed = calls
            .iter()
            .position(|c| c == "remove_nat TUNGRAM_NAT")
            .unwrap();
        let added = calls
            .iter()
            .position(|c| c == "add_nat TUNGRAM_NAT 10.8.0.0/24")
            .unwrap();
        assert!(removed < added);
        assert!(calls.contains(&"enable_ip_forwarding".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn server_setup_surfaces_nat_failure() {
        let net = RecordingHostNet::new().with_failure(Failure::AddNat);
        let result = setup_server(&net, "tap0", 1280, Ipv4Addr::new(10, 8, 0, 0)).await;
        assert!(matches!(result, Err(HostNetError::Command(_))));
    }

    #[tokio::test]
    async fn cleanup_keeps_going_past_failures() {
        let net = RecordingHostNet::new()
            .with_failure(Failure::RemoveNat)
            .with_failure(Failure::DeleteRoute);

        cleanup(&net, &exclusions()).await;

        let calls = net.calls();
        assert!(calls.contains(&"remove_nat TUNGRAM_NAT".to_string()));
        // Both half-default deletions and both exclusion deletions were
        // still attempted.
        assert_eq!(
            calls.iter().filter(|c| c.starts_with("delete_route")).count(),
            4
        );
        assert!(calls.contains(&"remove_firewall_rules".to_string()));
    }
}
