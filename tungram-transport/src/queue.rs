// Copyright 2025 - developers of the `tungram` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The bounded send queue with newest-wins shedding.

use log::debug;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::sync::Notify;

/// A FIFO of IP packets awaiting batching. Pushing to a full queue drops
/// the single oldest packet: under carrier stalls the tunnel must keep
/// accepting fresh traffic at the cost of latency spikes, never hang.
pub struct PacketQueue {
    packets: Mutex<VecDeque<Vec<u8>>>,
    capacity: usize,
    notify: Notify,
    closed: AtomicBool,
}

impl PacketQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            packets: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Enqueues a packet, shedding the oldest one on overflow.
    pub fn push(&self, packet: Vec<u8>) {
        {
            let mut packets = self.packets.lock().unwrap();
            if packets.len() >= self.capacity {
                packets.pop_front();
                debug!("send queue full, shedding oldest packet");
            }
            packets.push_back(packet);
        }
        self.notify.notify_one();
    }

    /// Waits for the next packet. Returns `None` once the queue is closed
    /// and drained.
    pub async fn pop(&self) -> Option<Vec<u8>> {
        loop {
            let notified = self.notify.notified();
            if let Some(packet) = self.packets.lock().unwrap().pop_front() {
                return Some(packet);
            }
            if self.closed.load(Ordering::SeqCst) {
                return None;
            }
            notified.await;
        }
    }

    /// Takes a packet only if one is already queued.
    pub fn try_pop(&self) -> Option<Vec<u8>> {
        self.packets.lock().unwrap().pop_front()
    }

    pub fn len(&self) -> usize {
        self.packets.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wakes every waiter; subsequent `pop`s drain the queue and then
    /// return `None`.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fifo_order() {
        let queue = PacketQueue::new(10);
        queue.push(vec![1]);
        queue.push(vec![2]);
        queue.push(vec![3]);
        assert_eq!(queue.pop().await, Some(vec![1]));
        assert_eq!(queue.pop().await, Some(vec![2]));
        assert_eq!(queue.pop().await, Some(vec![3]));
    }

    #[tokio::test]
    async fn overflow_sheds_exactly_the_oldest() {
        let capacity = 5;
        let queue = PacketQueue::new(capacity);
        for i in 0..=capacity {
            queue.push(vec![i as u8]);
        }

        let mut drained = Vec::new();
        while let Some(packet) = queue.try_pop() {
            drained.push(packet[0]);
        }

        assert_eq!(drained.len(), capacity);
        assert!(!drained.contains(&0));
        assert_eq!(drained, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn pop_wakes_on_push() {
        let queue = std::sync::Arc::new(PacketQueue::new(4));
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop().await })
        };
        tokio::task::yield_now().await;
        queue.push(vec![42]);
        assert_eq!(waiter.await.unwrap(), Some(vec![42]));
    }

    #[tokio::test]
    async fn close_drains_then_ends() {
        let queue = PacketQueue::new(4);
        queue.push(vec![1]);
        queue.close();
        assert_eq!(queue.pop().await, Some(vec![1]));
        assert_eq!(queue.pop().await, None);
    }
}
