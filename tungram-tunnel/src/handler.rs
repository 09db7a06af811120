// Copyright 2025 - developers of the `tungram` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The data-plane state machine bridging the TAP adapter and the carrier
//! transport.
//!
//! Ingress frames are classified: garbage is dropped, ARP requests for the
//! peer's address are answered locally with the fixed peer MAC, and IPv4
//! payloads go to the transport with their Ethernet header stripped. Egress
//! packets get the header rebuilt from the fixed MAC pair and are written
//! back to the adapter.

use crate::config::Config;
use crate::error::InitError;
use log::{debug, error, info};
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, Notify};
use tungram_hostnet::{self as hostnet, Exclusions, HostNet};
use tungram_tap::{TapAdapter, TapDevice};
use tungram_transport::{Role, Transport};
use tungram_wire::{arp, eth, filter, FALLBACK_LOCAL_MAC, PEER_MAC};

/// In-flight packets between the transport's receiver and the TAP writer.
const INBOUND_CHANNEL_DEPTH: usize = 1024;

/// Fires a callback on the first real packet of a run. Monotonic: garbage
/// never fires it, and it fires at most once.
#[derive(Default)]
pub struct TrafficSignal {
    fired: AtomicBool,
    callback: Mutex<Option<Box<dyn Fn() + Send + Sync>>>,
}

impl TrafficSignal {
    pub fn set_callback(&self, callback: impl Fn() + Send + Sync + 'static) {
        *self.callback.lock().unwrap() = Some(Box::new(callback));
    }

    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    pub(crate) fn fire(&self) {
        if self.fired.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(callback) = &*self.callback.lock().unwrap() {
            callback();
        }
    }
}

/// What to do with one ingress TAP frame.
#[derive(Debug, PartialEq)]
enum IngressAction {
    Discard,
    /// Forward the IPv4 payload (Ethernet header stripped) to the carrier.
    Forward(Vec<u8>),
    /// Write this ARP reply back to the adapter.
    Reply(Vec<u8>),
}

fn classify(frame: &[u8], answered_ip: Ipv4Addr) -> IngressAction {
    if filter::is_garbage(frame) {
        return IngressAction::Discard;
    }
    match eth::ethertype(frame) {
        Some(eth::ETHERTYPE_ARP) => match arp::reply_for(frame, answered_ip, &PEER_MAC) {
            Some(reply) => IngressAction::Reply(reply),
            None => IngressAction::Discard,
        },
        Some(eth::ETHERTYPE_IPV4) => match eth::payload(frame) {
            Some(packet) => IngressAction::Forward(packet.to_vec()),
            None => IngressAction::Discard,
        },
        _ => IngressAction::Discard,
    }
}

pub struct PacketHandler<H: HostNet, T: Transport> {
    config: Config,
    role: Role,
    hostnet: H,
    transport: T,
    exclusions: Exclusions,
    answered_ip: Ipv4Addr,
    local_mac: [u8; 6],
    device: Option<TapDevice>,
    frames: Option<mpsc::Receiver<Vec<u8>>>,
    inbound: Option<mpsc::Receiver<Vec<u8>>>,
    running: Arc<AtomicBool>,
    traffic: Arc<TrafficSignal>,
}

impl<H: HostNet, T: Transport> PacketHandler<H, T> {
    pub fn new(config: Config, role: Role, hostnet: H, transport: T) -> Self {
        let exclusions = Exclusions {
            subnets: config.telegram_subnets.clone(),
            api_hosts: config.carrier_api_hosts(),
        };
        Self {
            answered_ip: config.peer_ip_for_role(role),
            config,
            role,
            hostnet,
            transport,
            exclusions,
            local_mac: FALLBACK_LOCAL_MAC,
            device: None,
            frames: None,
            inbound: None,
            running: Arc::new(AtomicBool::new(false)),
            traffic: Arc::new(TrafficSignal::default()),
        }
    }

    pub fn traffic_signal(&self) -> Arc<TrafficSignal> {
        Arc::clone(&self.traffic)
    }

    pub fn running_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// The adapter's ingress frame counter, once the device is open.
    pub fn packet_counter(&self) -> Option<Arc<AtomicU64>> {
        self.device.as_ref().map(TapDevice::packet_counter)
    }

    /// Brings the tunnel up: pre-cleanup, carrier session, TAP device,
    /// host routing. Any failure aborts and leaves the host clean enough
    /// for the next attempt.
    pub async fn initialize(&mut self) -> Result<(), InitError> {
        info!("pre-start network cleanup");
        hostnet::cleanup(&self.hostnet, &self.exclusions).await;

        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CHANNEL_DEPTH);
        self.transport.init(inbound_tx, self.role).await?;
        self.inbound = Some(inbound_rx);

        let adapter = TapAdapter::discover(&self.config.tap_interface_name).await?;
        adapter
            .assign_ip(self.config.ip_for_role(self.role), 24)
            .await?;
        self.local_mac = adapter.mac().await.unwrap_or(FALLBACK_LOCAL_MAC);

        let mut device = adapter.open()?;
        self.frames = device.packets();
        self.device = Some(device);

        match self.role {
            Role::Client => {
                hostnet::setup_client(
                    &self.hostnet,
                    &self.config.tap_interface_name,
                    self.config.server_ip,
                    self.config.mtu,
                    &self.exclusions,
                )
                .await?;
            }
            Role::Server => {
                hostnet::setup_server(
                    &self.hostnet,
                    &self.config.tap_interface_name,
                    self.config.mtu,
                    self.config.subnet,
                )
                .await?;
            }
        }

        self.running.store(true, Ordering::SeqCst);
        info!("tunnel up ({:?})", self.role);
        Ok(())
    }

    /// Pumps frames in both directions until `stop` is signalled or either
    /// side closes. ARP replies are written before the next ingress frame
    /// is taken.
    pub async fn run(&mut self, stop: &Notify) {
        let (Some(mut frames), Some(mut inbound)) = (self.frames.take(), self.inbound.take())
        else {
            error!("handler started without initialization");
            return;
        };

        loop {
            tokio::select! {
                _ = stop.notified() => break,
                frame = frames.recv() => match frame {
                    Some(frame) => self.handle_ingress(frame).await,
                    None => break,
                },
                packet = inbound.recv() => match packet {
                    Some(packet) => self.handle_egress(packet).await,
                    None => break,
                },
            }
        }
    }

    async fn handle_ingress(&self, frame: Vec<u8>) {
        if !self.running.load(Ordering::SeqCst) {
            return;
        }

        match classify(&frame, self.answered_ip) {
            IngressAction::Discard => {}
            IngressAction::Reply(reply) => {
                debug!("answering arp for {}", self.answered_ip);
                if self.role == Role::Client {
                    self.traffic.fire();
                }
                if let Some(device) = &self.device {
                    device.write(reply).await;
                }
            }
            IngressAction::Forward(packet) => {
                if self.role == Role::Client {
                    self.traffic.fire();
                }
                self.transport.send(packet);
            }
        }
    }

    async fn handle_egress(&self, packet: Vec<u8>) {
        if !self.running.load(Ordering::SeqCst) {
            return;
        }
        if self.role == Role::Server {
            self.traffic.fire();
        }

        let frame = eth::build_ipv4_frame(&self.local_mac, &PEER_MAC, &packet);
        if let Some(device) = &self.device {
            device.write(frame).await;
        }
    }

    /// Stops the transport, restores host networking and closes the
    /// adapter. Idempotent; the only path that closes anything.
    pub async fn shutdown(&mut self) {
        if !self.running.swap(false, Ordering::SeqCst) && self.device.is_none() {
            return;
        }
        info!("tunnel shutting down");

        self.transport.disconnect().await;
        hostnet::cleanup(&self.hostnet, &self.exclusions).await;
        if let Some(device) = self.device.take() {
            info!(
                "session captured {} frames",
                device.packet_counter().load(Ordering::SeqCst)
            );
            device.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ipv4_frame(dst_ip: [u8; 4]) -> Vec<u8> {
        let mut packet = vec![0u8; 20];
        packet[0] = 0x45;
        packet[9] = 6;
        packet[12..16].copy_from_slice(&[10, 8, 0, 2]);
        packet[16..20].copy_from_slice(&dst_ip);
        eth::build_ipv4_frame(&[0xaa; 6], &[0xbb; 6], &packet)
    }

    fn arp_request(target: [u8; 4]) -> Vec<u8> {
        let mut frame = Vec::new();
        frame.extend_from_slice(&[0xff; 6]);
        frame.extend_from_slice(&[0x52, 0x54, 0, 0, 0, 7]);
        frame.extend_from_slice(&[0x08, 0x06]);
        frame.extend_from_slice(&[0x00, 0x01, 0x08, 0x00, 0x06, 0x04, 0x00, 0x01]);
        frame.extend_from_slice(&[0x52, 0x54, 0, 0, 0, 7]);
        frame.extend_from_slice(&[10, 8, 0, 2]);
        frame.extend_from_slice(&[0u8; 6]);
        frame.extend_from_slice(&target);
        frame
    }

    #[test]
    fn ipv4_frames_forward_without_their_header() {
        let server = Ipv4Addr::new(10, 8, 0, 1);
        let frame = ipv4_frame([8, 8, 8, 8]);
        match classify(&frame, server) {
            IngressAction::Forward(packet) => {
                assert_eq!(packet.len(), frame.len() - eth::HEADER_LEN);
                assert_eq!(packet[0], 0x45);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn garbage_is_discarded() {
        let server = Ipv4Addr::new(10, 8, 0, 1);
        assert_eq!(
            classify(&ipv4_frame([255, 255, 255, 255]), server),
            IngressAction::Discard
        );
        assert_eq!(classify(&[0u8; 10], server), IngressAction::Discard);
    }

    #[test]
    fn arp_for_the_peer_address_is_answered() {
        let server = Ipv4Addr::new(10, 8, 0, 1);
        match classify(&arp_request([10, 8, 0, 1]), server) {
            IngressAction::Reply(reply) => {
                assert_eq!(reply.len(), 42);
                assert_eq!(&reply[6..12], &PEER_MAC);
                assert_eq!(&reply[20..22], &[0x00, 0x02]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn arp_for_other_addresses_is_not() {
        let server = Ipv4Addr::new(10, 8, 0, 1);
        assert_eq!(
            classify(&arp_request([10, 8, 0, 99]), server),
            IngressAction::Discard
        );
    }

    #[test]
    fn egress_frames_carry_the_fixed_mac_pair() {
        let frame = eth::build_ipv4_frame(&[1, 2, 3, 4, 5, 6], &PEER_MAC, &[0x45, 0x00]);
        assert_eq!(&frame[0..6], &[1, 2, 3, 4, 5, 6]);
        assert_eq!(&frame[6..12], &PEER_MAC);
        assert_eq!(&frame[12..14], &[0x08, 0x00]);
    }

    #[test]
    fn traffic_signal_fires_exactly_once() {
        let signal = TrafficSignal::default();
        let count = Arc::new(AtomicU64::new(0));
        signal.set_callback({
            let count = Arc::clone(&count);
            move || {
                count.fetch_add(1, Ordering::SeqCst);
            }
        });

        assert!(!signal.has_fired());
        signal.fire();
        signal.fire();
        signal.fire();
        assert!(signal.has_fired());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn traffic_signal_without_callback_still_latches() {
        let signal = TrafficSignal::default();
        signal.fire();
        assert!(signal.has_fired());
    }
}
