// Copyright 2025 - developers of the `tungram` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The Telegram variant of the tunnel transport.

mod http;

pub use http::HttpBotApi;

use crate::auth::AuthPrompter;
use crate::batcher::BatchPolicy;
use crate::blob::BlobCodec;
use crate::session::ChatSession;
use crate::{Carrier, Role, Transport, TransportError};
use tokio::sync::mpsc;

/// Telegram tolerates a handful of concurrent document uploads.
pub const UPLOAD_FANOUT: usize = 5;

/// Default send-queue cap for the Telegram transport.
pub const DEFAULT_QUEUE_CAP: usize = 5000;

/// Deliberately minimal: the filename is pure carrier overhead.
const DOCUMENT_FILENAME: &str = "d";

/// Tunnels batches through documents posted to a Telegram chat.
pub struct TelegramTransport<C: Carrier> {
    session: ChatSession<C>,
}

impl<C: Carrier> TelegramTransport<C> {
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

impl<C: Carrier> Transport for TelegramTransport<C> {
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
