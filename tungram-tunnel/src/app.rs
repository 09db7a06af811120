// Copyright 2025 - developers of the `tungram` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Application lifecycle: build, wire callbacks, run until stopped.

use crate::config::{Config, TransportKind};
use crate::error::{ConfigError, InitError};
use crate::handler::{PacketHandler, TrafficSignal};
use log::{error, info};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};
use tungram_hostnet::HostNet;
use tungram_transport::telegram::HttpBotApi;
use tungram_transport::vk::HttpVkApi;
use tungram_transport::{
    AuthPrompter, BatchPolicy, BlobCodec, Role, TelegramTransport, Transport, TransportError,
    VkTransport,
};

/// The configured transport, behind one concrete type so the application
/// can pick a variant at runtime.
pub enum AnyTransport {
    Telegram(TelegramTransport<HttpBotApi>),
    Vk(VkTransport<HttpVkApi>),
}

impl Transport for AnyTransport {
    async fn init(
        &mut self,
        inbound: mpsc::Sender<Vec<u8>>,
        role: Role,
    ) -> Result<(), TransportError> {
        match self {
            AnyTransport::Telegram(transport) => transport.init(inbound, role).await,
            AnyTransport::Vk(transport) => transport.init(inbound, role).await,
        }
    }

    fn send(&self, packet: Vec<u8>) {
        match self {
            AnyTransport::Telegram(transport) => transport.send(packet),
            AnyTransport::Vk(transport) => transport.send(packet),
        }
    }

    async fn disconnect(&mut self) {
        match self {
            AnyTransport::Telegram(transport) => transport.disconnect().await,
            AnyTransport::Vk(transport) => transport.disconnect().await,
        }
    }
}

/// Builds the transport the configuration selects.
pub fn build_transport(
    config: &Config,
    prompter: AuthPrompter,
) -> Result<AnyTransport, ConfigError> {
    let codec = BlobCodec::new(config.tunnel_key()?, config.compression_enabled);
    let policy = BatchPolicy {
        interval: config.batch_interval_duration(),
        max_size: config.max_batch_size,
    };

    Ok(match config.transport_type {
        TransportKind::Telegram => AnyTransport::Telegram(TelegramTransport::new(
            HttpBotApi::new(config.bot_token.clone(), config.chat_id.clone()),
            codec,
            policy,
            config.telegram_queue_cap,
            prompter,
        )),
        TransportKind::Vk => {
            let peer_id = config
                .vk_peer_id_parsed()
                .ok_or(ConfigError::MissingCredentials("vk_peer_id"))?;
            AnyTransport::Vk(VkTransport::new(
                HttpVkApi::new(
                    config.vk_token.clone(),
                    config.vk_login.clone(),
                    config.vk_password.clone(),
                    config.vk_app_id,
                    peer_id,
                ),
                codec,
                policy,
                config.vk_queue_cap,
                prompter,
            ))
        }
    })
}

/// A handle that requests a graceful stop from anywhere.
#[derive(Clone)]
pub struct StopHandle {
    stop: Arc<Notify>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.stop.notify_one();
    }
}

/// Owns the handler and runs one tunnel session from bring-up to cleanup.
pub struct Application<H: HostNet> {
    handler: PacketHandler<H, AnyTransport>,
    stop: Arc<Notify>,
}

impl<H: HostNet> Application<H> {
    /// Validates the configuration and assembles the core. The user
    /// interface keeps the other end of the prompt channel.
    pub fn new(
        config: Config,
        role: Role,
        hostnet: H,
        prompter: AuthPrompter,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let transport = build_transport(&config, prompter)?;
        Ok(Self {
            handler: PacketHandler::new(config, role, hostnet, transport),
            stop: Arc::new(Notify::new()),
        })
    }

    /// Registers the callback fired on the first real packet of this run:
    /// on the client, the first tunnelled TAP frame; on the server, the
    /// first packet received from the carrier.
    pub fn on_traffic_started(&self, callback: impl Fn() + Send + Sync + 'static) {
        self.handler.traffic_signal().set_callback(callback);
    }

    pub fn traffic_signal(&self) -> Arc<TrafficSignal> {
        self.handler.traffic_signal()
    }

    /// `true` while the tunnel is up. Observed by the user interface.
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        self.handler.running_flag()
    }

    /// The adapter's ingress frame counter, available once running.
    pub fn packet_counter(&self) -> Option<Arc<AtomicU64>> {
        self.handler.packet_counter()
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            stop: Arc::clone(&self.stop),
        }
    }

    /// Initializes, pumps packets until stopped, then shuts down. Bring-up
    /// failures are logged and returned after undoing any partial setup.
    pub async fn run(&mut self) -> Result<(), InitError> {
        if let Err(err) = self.handler.initialize().await {
            error!("initialization failed: {err}");
            self.handler.shutdown().await;
            return Err(err);
        }

        self.handler.run(&self.stop).await;
        self.shutdown().await;
        Ok(())
    }

    /// Stops the transport, restores the host and closes the device.
    /// Idempotent.
    pub async fn shutdown(&mut self) {
        info!("stopping");
        self.handler.shutdown().await;
    }
}
