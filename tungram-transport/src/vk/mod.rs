// Copyright 2025 - developers of the `tungram` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The VKontakte variant of the tunnel transport.

mod http;

pub use http::HttpVkApi;

use crate::auth::AuthPrompter;
use crate::batcher::BatchPolicy;
use crate::blob::BlobCodec;
use crate::session::ChatSession;
use crate::{Carrier, Role, Transport, TransportError};
use tokio::sync::mpsc;

/// One upload at a time: VK's captcha challenges must be solved one by one,
/// not surface as a pile.
pub const UPLOAD_FANOUT: usize = 1;

/// Default send-queue cap for the VK transport, tuned well below the
/// Telegram one because captcha stalls back the queue up quickly.
pub const DEFAULT_QUEUE_CAP: usize = 500;

const DOCUMENT_FILENAME: &str = "d.bin";

/// Tunnels batches through document messages to a VKontakte peer.
pub struct VkTransport<C: Carrier> {
    session: ChatSession<C>,
}

impl<C: Carrier> VkTransport<C> {
    pub fn new(
        carrier: C,
        codec: BlobCodec,
        policy: BatchPolicy,
        queue_cap: usize,
        prompter: AuthPrompter,
    ) -> Self {
        Self {
            session: ChatSession::new(
                carrier,
                codec,
                policy,
                queue_cap,
                UPLOAD_FANOUT,
                DOCUMENT_FILENAME,
                prompter,
            ),
        }
    }
}

impl<C: Carrier> Transport for VkTransport<C> {
    async fn init(
        &mut self,
        inbound: mpsc::Sender<Vec<u8>>,
        role: Role,
    ) -> Result<(), TransportError> {
        self.session.init(inbound, role).await
    }

    fn send(&self, packet: Vec<u8>) {
        self.session.send(packet);
    }

    async fn disconnect(&mut self) {
        self.session.disconnect().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthKind;
    use crate::session::testing::{MockCarrier, SendScript};
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use std::time::Duration;
    use tungram_crypto::TunnelKey;
    use tungram_wire::batch;

    fn codec() -> BlobCodec {
        let key = TunnelKey::from_bytes(b"U&U?OglmE4P;0.32_Ktliw>uP]%PL:&d").unwrap();
        BlobCodec::new(key, false)
    }

    fn policy() -> BatchPolicy {
        BatchPolicy {
            interval: Duration::from_millis(50),
            max_size: 512 * 1024,
        }
    }

    fn transport_from(
        carrier: &Arc<MockCarrier>,
        prompter: AuthPrompter,
    ) -> VkTransport<Arc<MockCarrier>> {
        VkTransport::new(
            Arc::clone(carrier),
            codec(),
            policy(),
            DEFAULT_QUEUE_CAP,
            prompter,
        )
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_secs(8)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn uploads_never_overlap() {
        let carrier = Arc::new(MockCarrier {
            upload_gate: Some(Duration::from_millis(400)),
            ..Default::default()
        });
        let mut transport = transport_from(&carrier, AuthPrompter::disabled());
        let (inbound, _inbound_rx) = mpsc::channel(64);
        transport.init(inbound, Role::Client).await.unwrap();

        for i in 0..10u8 {
            transport.send(vec![i; 60 * 1024]);
            tokio::time::sleep(Duration::from_millis(60)).await;
        }
        settle().await;

        assert_eq!(carrier.max_in_flight.load(Ordering::SeqCst), 1);
        assert_eq!(carrier.sent.lock().unwrap().len(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_captcha_drops_the_batch_and_later_uploads_proceed() {
        let carrier = Arc::new(MockCarrier::default());
        carrier
            .send_script
            .lock()
            .unwrap()
            .push_back(SendScript::Captcha);

        let mut transport = transport_from(&carrier, AuthPrompter::disabled());
        let (inbound, _inbound_rx) = mpsc::channel(64);
        transport.init(inbound, Role::Client).await.unwrap();

        transport.send(vec![0xaa; 100]);
        settle().await;
        assert!(carrier.sent.lock().unwrap().is_empty());

        // The next batch is untouched by the earlier challenge.
        transport.send(vec![0xbb; 100]);
        settle().await;
        let sent = carrier.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].2.is_none(), "no stale captcha answer attached");
        let opened = codec().open(&sent[0].0).unwrap();
        assert_eq!(batch::records(&opened).next().unwrap(), &[0xbb; 100]);
    }

    #[tokio::test(start_paused = true)]
    async fn solved_captcha_retries_the_same_batch() {
        let carrier = Arc::new(MockCarrier::default());
        carrier
            .send_script
            .lock()
            .unwrap()
            .push_back(SendScript::Captcha);

        let (prompter, mut inbox) = AuthPrompter::channel();
        tokio::spawn(async move {
            while let Some(request) = inbox.recv().await {
                assert_eq!(request.kind, AuthKind::Captcha);
                request.answer(Some("answer".into()));
            }
        });

        let mut transport = transport_from(&carrier, prompter);
        let (inbound, _inbound_rx) = mpsc::channel(64);
        transport.init(inbound, Role::Client).await.unwrap();

        transport.send(vec![0xcc; 100]);
        settle().await;

        let sent = carrier.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1, "d.bin");
        let answer = sent[0].2.as_ref().unwrap();
        assert_eq!(answer.sid, "sid-9");
        assert_eq!(answer.key, "answer");
    }

    #[tokio::test(start_paused = true)]
    async fn flood_is_retried_with_a_pause() {
        let carrier = Arc::new(MockCarrier::default());
        {
            let mut script = carrier.send_script.lock().unwrap();
            script.push_back(SendScript::Flood);
            script.push_back(SendScript::Flood);
            script.push_back(SendScript::Ok);
        }

        let mut transport = transport_from(&carrier, AuthPrompter::disabled());
        let (inbound, _inbound_rx) = mpsc::channel(64);
        transport.init(inbound, Role::Client).await.unwrap();

        transport.send(vec![0xdd; 100]);
        settle().await;

        assert_eq!(carrier.sent.lock().unwrap().len(), 1);
    }
}
