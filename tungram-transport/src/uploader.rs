// Copyright 2025 - developers of the `tungram` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The retry policy around one batch upload.
//!
//! Per-batch, not per-session: whatever happens here, only this batch is at
//! stake. Captcha challenges are bounced to the user; rate limits wait out
//! a second; anything else drops the batch on the spot.

use crate::auth::{AuthKind, AuthPrompter};
use crate::{CaptchaAnswer, CarrierError};
use log::{debug, warn};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Attempts per batch, shared by the captcha and flood paths.
pub(crate) const MAX_UPLOAD_ATTEMPTS: u32 = 5;

/// How long to sleep on a rate-limit error before retrying.
pub(crate) const FLOOD_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Drives `attempt` to completion under the carrier retry policy. The batch
/// is dropped (with a log line) when the policy gives up; the session never
/// is.
pub(crate) async fn upload_with_retries<F, Fut>(attempt: F, prompter: &AuthPrompter)
where
    F: Fn(Option<CaptchaAnswer>) -> Fut,
    Fut: Future<Output = Result<(), CarrierError>>,
{
    let mut captcha = None;

    for _ in 0..MAX_UPLOAD_ATTEMPTS {
        match attempt(captcha.take()).await {
            Ok(()) => return,
            Err(CarrierError::Captcha { img_url, sid }) => {
                debug!("upload hit a captcha: {img_url}");
                match prompter.ask(AuthKind::Captcha, Some(img_url)).await {
                    Some(key) => captcha = Some(CaptchaAnswer { sid, key }),
                    None => {
                        warn!("captcha not solved, dropping batch");
                        return;
                    }
                }
            }
            Err(CarrierError::Flood) => {
                debug!("rate limited, sleeping before retry");
                sleep(FLOOD_RETRY_DELAY).await;
            }
            Err(err) => {
                warn!("upload failed, dropping batch: {err}");
                return;
            }
        }
    }

    warn!("upload retries exhausted, dropping batch");
}
