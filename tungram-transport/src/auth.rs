// Copyright 2025 - developers of the `tungram` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Interactive authentication prompts.
//!
//! Carrier sign-in may require user input: a phone number, an SMS code, a
//! two-factor password, or a captcha answer. Each prompt is a one-shot
//! request/reply exchange; the asking coroutine blocks until the user side
//! answers or cancels. One prompt is outstanding at a time.

use std::fmt;
use tokio::sync::{mpsc, oneshot};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthKind {
    Phone,
    LoginCode,
    TwoFactorPassword,
    /// `payload` carries the captcha image URL.
    Captcha,
}

impl fmt::Display for AuthKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthKind::Phone => write!(f, "phone number"),
            AuthKind::LoginCode => write!(f, "login code"),
            AuthKind::TwoFactorPassword => write!(f, "2fa password"),
            AuthKind::Captcha => write!(f, "captcha"),
        }
    }
}

/// One pending prompt. Consumed by answering.
#[derive(Debug)]
pub struct AuthRequest {
    pub kind: AuthKind,
    pub payload: Option<String>,
    reply: oneshot::Sender<Option<String>>,
}

impl AuthRequest {
    /// Resolves the prompt; `None` means the user cancelled.
    pub fn answer(self, text: Option<String>) {
        let _ = self.reply.send(text);
    }
}

/// The transport-side handle used to ask the user for input.
#[derive(Clone)]
pub struct AuthPrompter {
    requests: mpsc::Sender<AuthRequest>,
}

impl AuthPrompter {
    /// Creates the prompter and the request stream the user interface owns.
    pub fn channel() -> (Self, mpsc::Receiver<AuthRequest>) {
        // Depth 1: prompts are sequential by construction.
        let (requests, inbox) = mpsc::channel(1);
        (Self { requests }, inbox)
    }

    /// A prompter with nobody listening; every prompt resolves as cancelled.
    pub fn disabled() -> Self {
        let (prompter, _inbox) = Self::channel();
        prompter
    }

    /// Asks the user and waits for the reply. `None` means the prompt was
    /// cancelled, either explicitly or because the user interface is gone.
    pub async fn ask(&self, kind: AuthKind, payload: Option<String>) -> Option<String> {
        let (reply, answer) = oneshot::channel();
        let request = AuthRequest {
            kind,
            payload,
            reply,
        };
        self.requests.send(request).await.ok()?;
        answer.await.ok().flatten()
    }
}
