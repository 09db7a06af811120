// Copyright 2025 - developers of the `tungram` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! ARP answering for the tunnel's synthetic peer.
//!
//! The carrier is an L3 transport and there is no real neighbour on the TAP
//! segment, so requests for the peer's address are answered locally with the
//! fixed peer MAC. One resolved neighbour is all the OS needs to route
//! through the half-default routes.

use crate::eth;
use std::net::Ipv4Addr;

const OPER_REQUEST: [u8; 2] = [0x00, 0x01];
const OPER_REPLY: [u8; 2] = [0x00, 0x02];

/// Size of an ARP-over-Ethernet frame for IPv4.
pub const FRAME_LEN: usize = eth::HEADER_LEN + 28;

/// Inspects an ingress ARP frame and, if it is a request for
/// `answered_ip`, synthesises the full reply frame to write back.
///
/// Anything else (replies, gratuitous ARP, requests for other addresses,
/// malformed bodies) returns `None`.
pub fn reply_for(frame: &[u8], answered_ip: Ipv4Addr, peer_mac: &[u8; 6]) -> Option<Vec<u8>> {
    if frame.len() < FRAME_LEN || eth::ethertype(frame) != Some(eth::ETHERTYPE_ARP) {
        return None;
    }

    let body = &frame[eth::HEADER_LEN..];
    if body[6..8] != OPER_REQUEST {
        return None;
    }

    let target_ip: [u8; 4] = body[24..28].try_into().unwrap();
    if Ipv4Addr::from(target_ip) != answered_ip {
        return None;
    }

    let requester_mac = &frame[6..12];
    let requester_ip = &body[14..18];

    let mut reply = Vec::with_capacity(FRAME_LEN);
    reply.extend_from_slice(requester_mac);
    reply.extend_from_slice(peer_mac);
    reply.extend_from_slice(&eth::ETHERTYPE_ARP.to_be_bytes());
    // htype ethernet, ptype ipv4, hlen 6, plen 4, oper reply
    reply.extend_from_slice(&[0x00, 0x01, 0x08, 0x00, 0x06, 0x04]);
    reply.extend_from_slice(&OPER_REPLY);
    reply.extend_from_slice(peer_mac);
    reply.extend_from_slice(&target_ip);
    reply.extend_from_slice(requester_mac);
    reply.extend_from_slice(requester_ip);
    Some(reply)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PEER_MAC;

    fn request(target: Ipv4Addr) -> Vec<u8> {
        let sender_mac = [0x52, 0x54, 0x00, 0x12, 0x34, 0x56];
        let sender_ip = [10, 8, 0, 2];

        let mut frame = Vec::with_capacity(FRAME_LEN);
        frame.extend_from_slice(&[0xff; 6]); // broadcast
        frame.extend_from_slice(&sender_mac);
        frame.extend_from_slice(&eth::ETHERTYPE_ARP.to_be_bytes());
        frame.extend_from_slice(&[0x00, 0x01, 0x08, 0x00, 0x06, 0x04]);
        frame.extend_from_slice(&OPER_REQUEST);
        frame.extend_from_slice(&sender_mac);
        frame.extend_from_slice(&sender_ip);
        frame.extend_from_slice(&[0x00; 6]); // unknown target mac
        frame.extend_from_slice(&target.octets());
        frame
    }

    #[test]
    fn request_for_answered_ip_gets_a_reply() {
        let target = Ipv4Addr::new(10, 8, 0, 1);
        let reply = reply_for(&request(target), target, &PEER_MAC).unwrap();

        assert_eq!(reply.len(), 42);
        // Addressed back to the requester, from the synthetic peer.
        assert_eq!(&reply[0..6], &[0x52, 0x54, 0x00, 0x12, 0x34, 0x56]);
        assert_eq!(&reply[6..12], &PEER_MAC);
        assert_eq!(&reply[12..14], &[0x08, 0x06]);
        // Opcode reply; sender is the answered address at the peer MAC.
        assert_eq!(&reply[20..22], &[0x00, 0x02]);
        assert_eq!(&reply[22..28], &PEER_MAC);
        assert_eq!(&reply[28..32], &[10, 8, 0, 1]);
        // Target echoes the requester.
        assert_eq!(&reply[32..38], &[0x52, 0x54, 0x00, 0x12, 0x34, 0x56]);
        assert_eq!(&reply[38..42], &[10, 8, 0, 2]);
    }

    #[test]
    fn request_for_other_ip_is_ignored() {
        let frame = request(Ipv4Addr::new(10, 8, 0, 99));
        assert_eq!(reply_for(&frame, Ipv4Addr::new(10, 8, 0, 1), &PEER_MAC), None);
    }

    #[test]
    fn replies_are_not_answered() {
        let mut frame = request(Ipv4Addr::new(10, 8, 0, 1));
        frame[20..22].copy_from_slice(&OPER_REPLY);
        assert_eq!(reply_for(&frame, Ipv4Addr::new(10, 8, 0, 1), &PEER_MAC), None);
    }

    #[test]
    fn short_bodies_are_ignored() {
        let mut frame = request(Ipv4Addr::new(10, 8, 0, 1));
        frame.truncate(40);
        assert_eq!(reply_for(&frame, Ipv4Addr::new(10, 8, 0, 1), &PEER_MAC), None);
    }
}
