// Copyright 2025 - developers of the `tungram` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The carrier-agnostic transport engine shared by both variants.
//!
//! Owns the send queue and the two steady-state loops. Everything a variant
//! decides is captured at construction: the carrier binding, the upload
//! fan-out, the queue cap and the document filename.

use crate::auth::AuthPrompter;
use crate::batcher::{next_batch, BatchPolicy};
use crate::blob::BlobCodec;
use crate::queue::PacketQueue;
use crate::uploader::upload_with_retries;
use crate::{Carrier, IncomingDocument, Role, TransportError};
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tungram_wire::batch;

/// How long the receiver backs off after a failed poll.
const POLL_RETRY_DELAY: Duration = Duration::from_secs(1);

pub(crate) struct ChatSession<C: Carrier> {
    carrier: Arc<C>,
    codec: BlobCodec,
    policy: BatchPolicy,
    queue: Arc<PacketQueue>,
    prompter: AuthPrompter,
    filename: &'static str,
    upload_slots: Arc<Semaphore>,
    connected: Arc<AtomicBool>,
    tasks: Vec<JoinHandle<()>>,
}

impl<C: Carrier> ChatSession<C> {
    pub(crate) fn new(
        carrier: C,
        codec: BlobCodec,
        policy: BatchPolicy,
        queue_cap: usize,
        upload_fanout: usize,
        filename: &'static str,
        prompter: AuthPrompter,
    ) -> Self {
        Self {
            carrier: Arc::new(carrier),
            codec,
            policy,
            queue: Arc::new(PacketQueue::new(queue_cap)),
            prompter,
            filename,
            upload_slots: Arc::new(Semaphore::new(upload_fanout)),
            connected: Arc::new(AtomicBool::new(false)),
            tasks: Vec::new(),
        }
    }

    pub(crate) async fn init(
        &mut self,
        inbound: mpsc::Sender<Vec<u8>>,
        role: Role,
    ) -> Result<(), TransportError> {
        self.carrier.connect(role, &self.prompter).await?;
        self.connected.store(true, Ordering::SeqCst);
        info!("carrier session established ({role:?})");

        self.tasks.push(tokio::spawn(sender_loop(
            Arc::clone(&self.carrier),
            self.codec.clone(),
            self.policy.clone(),
            Arc::clone(&self.queue),
            self.prompter.clone(),
            self.filename,
            Arc::clone(&self.upload_slots),
        )));
        self.tasks.push(tokio::spawn(receiver_loop(
            Arc::clone(&self.carrier),
            self.codec.clone(),
            Arc::clone(&self.connected),
            inbound,
        )));
        Ok(())
    }

    pub(crate) fn send(&self, packet: Vec<u8>) {
        if !self.connected.load(Ordering::SeqCst) {
            return;
        }
        self.queue.push(packet);
    }

    pub(crate) async fn disconnect(&mut self) {
        if !self.connected.swap(false, Ordering::SeqCst) && self.tasks.is_empty() {
            return;
        }
        self.queue.close();
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.carrier.disconnect().await;
        info!("carrier session closed");
    }
}

async fn sender_loop<C: Carrier>(
    carrier: Arc<C>,
    codec: BlobCodec,
    policy: BatchPolicy,
    queue: Arc<PacketQueue>,
    prompter: AuthPrompter,
    filename: &'static str,
    upload_slots: Arc<Semaphore>,
) {
    debug!("batch sender started");
    loop {
        let Some(batch) = next_batch(&queue, &policy).await else {
            break;
        };
        if batch.is_empty() {
            continue;
        }

        let blob = codec.seal(&batch);
        debug!("uploading {}-byte blob", blob.len());

        // Holding the permit before spawning keeps the number of in-flight
        // uploads bounded even when the carrier stalls.
        let Ok(permit) = Arc::clone(&upload_slots).acquire_owned().await else {
            break;
        };
        let carrier = Arc::clone(&carrier);
        let prompter = prompter.clone();
        tokio::spawn(async move {
            let _permit = permit;
            upload_with_retries(
                |captcha| {
                    let carrier = Arc::clone(&carrier);
                    let blob = blob.clone();
                    async move { carrier.send_document(blob, filename, captcha).await }
                },
                &prompter,
            )
            .await;
        });
    }
    debug!("batch sender finished");
}

async fn receiver_loop<C: Carrier>(
    carrier: Arc<C>,
    codec: BlobCodec,
    connected: Arc<AtomicBool>,
    inbound: mpsc::Sender<Vec<u8>>,
) {
    debug!("receiver started");
    while connected.load(Ordering::SeqCst) {
        match carrier.next_documents().await {
            Ok(documents) => {
                for document in documents {
                    let carrier = Arc::clone(&carrier);
                    let codec = codec.clone();
                    let inbound = inbound.clone();
                    tokio::spawn(async move {
                        process_document(&*carrier, &codec, &inbound, document).await;
                    });
                }
            }
            Err(err) => {
                warn!("carrier poll failed: {err}");
                tokio::time::sleep(POLL_RETRY_DELAY).await;
            }
        }
    }
    debug!("receiver finished");
}

/// Downloads and opens one posted document, dispatching its records in
/// order. Every failure path drops exactly this blob.
async fn process_document<C: Carrier>(
    carrier: &C,
    codec: &BlobCodec,
    inbound: &mpsc::Sender<Vec<u8>>,
    document: IncomingDocument,
) {
    let blob = match carrier.download(&document).await {
        Ok(blob) => blob,
        Err(err) => {
            warn!("document download failed: {err}");
            return;
        }
    };

    let opened = match codec.open(&blob) {
        Ok(opened) => opened,
        Err(err) => {
            warn!("dropping blob: {err}");
            return;
        }
    };

    for record in batch::records(&opened) {
        if inbound.send(record.to_vec()).await.is_err() {
            return;
        }
    }
}
