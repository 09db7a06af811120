// Copyright 2025 - developers of the `tungram` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Packet coalescing: the latency/upload-rate trade at the heart of the
//! sender loop.

use crate::queue::PacketQueue;
use log::warn;
use std::time::Duration;
use tokio::time::{timeout_at, Instant};
use tungram_wire::batch;

#[derive(Clone, Debug)]
pub struct BatchPolicy {
    /// How long to keep coalescing after the first packet of a batch.
    pub interval: Duration,
    /// Soft cap on the batch size, in bytes. Consulted before taking each
    /// further packet, never after appending: the first packet always goes
    /// in, so an oversized packet still makes forward progress, and a batch
    /// may end up larger than the cap by one packet.
    pub max_size: usize,
}

/// Collects the next batch from the queue.
///
/// Waits for one packet, then coalesces everything that arrives within
/// `interval` of it, stopping early once the buffer has reached `max_size`.
/// Returns `None` when the queue has been closed and drained.
pub(crate) async fn next_batch(queue: &PacketQueue, policy: &BatchPolicy) -> Option<Vec<u8>> {
    let mut buffer = Vec::new();

    loop {
        let first = queue.pop().await?;
        if batch::push_record(&mut buffer, &first) {
            break;
        }
        warn!("dropping unframeable {}-byte packet", first.len());
    }

    let deadline = Instant::now() + policy.interval;
    while buffer.len() < policy.max_size {
        match timeout_at(deadline, queue.pop()).await {
            Ok(Some(packet)) => {
                if !batch::push_record(&mut buffer, &packet) {
                    warn!("dropping unframeable {}-byte packet", packet.len());
                }
            }
            Ok(None) => break,
            Err(_) => break, // coalescing window over
        }
    }

    Some(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(interval_ms: u64, max_size: usize) -> BatchPolicy {
        BatchPolicy {
            interval: Duration::from_millis(interval_ms),
            max_size,
        }
    }

    fn sizes(buffer: &[u8]) -> Vec<usize> {
        batch::records(buffer).map(|r| r.len()).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn two_packets_under_the_cap_share_a_batch() {
        let queue = PacketQueue::new(100);
        queue.push(vec![0xaa; 1500]);
        queue.push(vec![0xbb; 800]);

        let buffer = next_batch(&queue, &policy(50, 2400)).await.unwrap();
        assert_eq!(buffer.len(), 2304);
        assert_eq!(sizes(&buffer), vec![1500, 800]);
    }

    #[tokio::test(start_paused = true)]
    async fn cap_is_checked_before_taking_the_next_packet() {
        // A lone packet ships alone once the window closes; two packets
        // already queued both go in, because at check time the buffer is
        // still below the cap.
        let queue = PacketQueue::new(100);
        let policy = policy(50, 2000);

        queue.push(vec![0x01; 1500]);
        let first = next_batch(&queue, &policy).await.unwrap();
        assert_eq!(first.len(), 1502);

        queue.push(vec![0x02; 1500]);
        queue.push(vec![0x03; 1500]);
        let second = next_batch(&queue, &policy).await.unwrap();
        assert_eq!(second.len(), 3004);
        assert_eq!(sizes(&second), vec![1500, 1500]);
    }

    #[tokio::test(start_paused = true)]
    async fn oversized_first_packet_still_ships() {
        let queue = PacketQueue::new(100);
        queue.push(vec![0xcc; 3000]);

        let buffer = next_batch(&queue, &policy(50, 2000)).await.unwrap();
        assert_eq!(sizes(&buffer), vec![3000]);
    }

    #[tokio::test(start_paused = true)]
    async fn records_keep_queue_order() {
        let queue = PacketQueue::new(100);
        for i in 0u8..5 {
            queue.push(vec![i; 10]);
        }

        let buffer = next_batch(&queue, &policy(50, 4096)).await.unwrap();
        let firsts: Vec<u8> = batch::records(&buffer).map(|r| r[0]).collect();
        assert_eq!(firsts, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn closed_queue_ends_the_stream() {
        let queue = PacketQueue::new(100);
        queue.close();
        assert_eq!(next_batch(&queue, &policy(50, 2000)).await, None);
    }
}
