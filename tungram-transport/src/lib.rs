// Copyright 2025 - developers of the `tungram` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Transports move the tunnel's traffic over a messaging service.
//!
//! A transport owns one send queue and two long-lived loops: the sender
//! coalesces queued IP packets into batches and uploads each batch as a
//! sealed document to the bound chat; the receiver observes documents posted
//! by the peer, opens them and pushes every framed packet to the `inbound`
//! channel in record order.
//!
//! The carrier is unreliable, out of order and rate limited, and the
//! transport's job is to stay alive on top of that: queue overflow sheds the
//! oldest packet, a failed upload drops one batch, a bad blob drops itself.
//! Nothing short of [`Transport::disconnect`] stops the session.
//!
//! The concrete messaging-service client library is consumed through the
//! [`Carrier`] trait, one method per operation the tunnel needs from a chat
//! service; the HTTP bindings for Telegram and VKontakte live in their
//! transport modules.

#![deny(unsafe_code)]

pub mod auth;
mod batcher;
mod blob;
mod queue;
mod session;
pub mod telegram;
mod uploader;
pub mod vk;

pub use auth::{AuthKind, AuthPrompter, AuthRequest};
pub use batcher::BatchPolicy;
pub use blob::BlobCodec;
pub use queue::PacketQueue;
pub use telegram::TelegramTransport;
pub use vk::VkTransport;

use std::fmt;
use tokio::sync::mpsc;

/// Which end of the tunnel this host is.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    /// Routes the host's traffic into the tunnel.
    Client,
    /// Terminates the tunnel and NATs its traffic to the Internet.
    Server,
}

/// Errors that abort transport bring-up.
#[derive(Debug)]
pub enum TransportError {
    /// The carrier refused the session, or the user cancelled a prompt.
    Auth(String),
    /// The carrier could not be reached or bound.
    Carrier(CarrierError),
}

impl std::error::Error for TransportError {}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Auth(detail) => write!(f, "carrier auth failed: {detail}"),
            TransportError::Carrier(err) => write!(f, "carrier init failed: {err}"),
        }
    }
}

impl From<CarrierError> for TransportError {
    fn from(error: CarrierError) -> Self {
        match error {
            CarrierError::Auth(detail) => TransportError::Auth(detail),
            other => TransportError::Carrier(other),
        }
    }
}

/// Errors reported by a carrier API call.
#[derive(Debug)]
pub enum CarrierError {
    /// The carrier demands a captcha; the payload is the image URL plus the
    /// carrier's challenge id.
    Captcha { img_url: String, sid: String },
    /// Rate limited; retry after a short sleep.
    Flood,
    /// Any other API-level error.
    Api { code: i64, message: String },
    /// Transport-level HTTP failure.
    Http(reqwest::Error),
    /// The carrier rejected the credentials.
    Auth(String),
}

impl std::error::Error for CarrierError {}

impl fmt::Display for CarrierError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CarrierError::Captcha { img_url, .. } => write!(f, "captcha required: {img_url}"),
            CarrierError::Flood => write!(f, "rate limited"),
            CarrierError::Api { code, message } => write!(f, "api error {code}: {message}"),
            CarrierError::Http(err) => write!(f, "http error: {err}"),
            CarrierError::Auth(detail) => write!(f, "auth error: {detail}"),
        }
    }
}

impl From<reqwest::Error> for CarrierError {
    fn from(error: reqwest::Error) -> Self {
        Self::Http(error)
    }
}

/// A user-supplied captcha answer, paired with the challenge it solves.
#[derive(Clone, Debug)]
pub struct CaptchaAnswer {
    pub sid: String,
    pub key: String,
}

/// A document posted to the bound chat by the peer, identified by whatever
/// handle the carrier needs to download it.
#[derive(Clone, Debug, PartialEq)]
pub struct IncomingDocument {
    pub handle: String,
}

/// The operations the tunnel needs from a messaging-service client library:
/// interactive login, send-file to the bound chat, observe documents posted
/// by the peer, and fetch their contents.
///
/// The chat/peer endpoint is part of the carrier's construction; `connect`
/// both authenticates and binds to it. Futures are `Send` because uploads
/// and downloads run as spawned tasks.
pub trait Carrier: Send + Sync + 'static {
    /// Authenticates in the mode required by `role` and binds the configured
    /// chat endpoint. Interactive input (phone, code, 2FA password, captcha)
    /// is requested through `prompter`; a cancelled prompt fails the
    /// connection with [`CarrierError::Auth`].
    fn connect(
        &self,
        role: Role,
        prompter: &AuthPrompter,
    ) -> impl std::future::Future<Output = Result<(), CarrierError>> + Send;

    /// Uploads `payload` as a document named `filename` and posts it to the
    /// bound chat, solving at most one captcha challenge per call.
    fn send_document(
        &self,
        payload: Vec<u8>,
        filename: &str,
        captcha: Option<CaptchaAnswer>,
    ) -> impl std::future::Future<Output = Result<(), CarrierError>> + Send;

    /// Waits for the next documents posted to the bound chat by the peer.
    /// Long-polls; an empty result is normal.
    fn next_documents(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<IncomingDocument>, CarrierError>> + Send;

    /// Fetches a posted document's bytes.
    fn download(
        &self,
        document: &IncomingDocument,
    ) -> impl std::future::Future<Output = Result<Vec<u8>, CarrierError>> + Send;

    /// Terminates the carrier session.
    fn disconnect(&self) -> impl std::future::Future<Output = ()> + Send;
}

impl<C: Carrier> Carrier for std::sync::Arc<C> {
    async fn connect(&self, role: Role, prompter: &AuthPrompter) -> Result<(), CarrierError> {
        (**self).connect(role, prompter).await
    }

    async fn send_document(
        &self,
        payload: Vec<u8>,
        filename: &str,
        captcha: Option<CaptchaAnswer>,
    ) -> Result<(), CarrierError> {
        (**self).send_document(payload, filename, captcha).await
    }

    async fn next_documents(&self) -> Result<Vec<IncomingDocument>, CarrierError> {
        (**self).next_documents().await
    }

    async fn download(&self, document: &IncomingDocument) -> Result<Vec<u8>, CarrierError> {
        (**self).download(document).await
    }

    async fn disconnect(&self) {
        (**self).disconnect().await
    }
}

/// The interface both transport variants present to the packet handler.
#[allow(async_fn_in_trait)]
pub trait Transport: Send + 'static {
    /// Authenticates to the carrier for `role`, binds the configured chat
    /// endpoint and starts the sender and receiver loops. Packets received
    /// from the peer are pushed into `inbound`.
    async fn init(
        &mut self,
        inbound: mpsc::Sender<Vec<u8>>,
        role: Role,
    ) -> Result<(), TransportError>;

    /// Enqueues one IP packet for batched upload. If the queue is full the
    /// oldest queued packet is shed; the tunnel trades latency for liveness,
    /// never blocking the caller.
    fn send(&self, packet: Vec<u8>);

    /// Stops the loops and terminates the carrier session. In-flight uploads
    /// are not awaited. Idempotent.
    async fn disconnect(&mut self);
}
