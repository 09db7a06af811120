// Copyright 2025 - developers of the `tungram` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! [`Carrier`] binding over the Telegram Bot HTTP API.
//!
//! A bot token works for both tunnel roles. The MTProto user-account client
//! is a separate library concern; anything implementing [`Carrier`] (using
//! the prompter for phone/code/2FA input) plugs into the same transport.

use crate::auth::AuthPrompter;
use crate::{CaptchaAnswer, Carrier, CarrierError, IncomingDocument, Role};
use log::{debug, info};
use reqwest::multipart::{Form, Part};
use serde_json::Value;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

const API_BASE: &str = "https://api.telegram.org";

/// How long one `getUpdates` long-poll is held open, in seconds.
const POLL_TIMEOUT_SECS: u64 = 25;

const HTTP_ERROR_TOO_MANY_REQUESTS: i64 = 429;

pub struct HttpBotApi {
    http: reqwest::Client,
    token: String,
    chat_id: String,
    me_id: AtomicI64,
    offset: AtomicI64,
}

impl HttpBotApi {
    pub fn new(token: String, chat_id: String) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(POLL_TIMEOUT_SECS * 2))
            .build()
            .expect("default reqwest client");
        Self {
            http,
            token,
            chat_id,
            me_id: AtomicI64::new(0),
            offset: AtomicI64::new(0),
        }
    }

    fn method_url(&self, method: &str) -> String {
        format!("{API_BASE}/bot{}/{method}", self.token)
    }

    /// Unwraps the Bot API envelope into its `result`.
    fn api_result(mut envelope: Value) -> Result<Value, CarrierError> {
        if envelope["ok"].as_bool() == Some(true) {
            return Ok(envelope["result"].take());
        }
        let code = envelope["error_code"].as_i64().unwrap_or(0);
        let message = envelope["description"]
            .as_str()
            .unwrap_or("unknown error")
            .to_string();
        if code == HTTP_ERROR_TOO_MANY_REQUESTS {
            return Err(CarrierError::Flood);
        }
        Err(CarrierError::Api { code, message })
    }

    async fn call(&self, method: &str, query: &[(&str, String)]) -> Result<Value, CarrierError> {
        let envelope: Value = self
            .http
            .get(self.method_url(method))
            .query(query)
            .send()
            .await?
            .json()
            .await?;
        Self::api_result(envelope)
    }
}

/// Extracts the documents of one `getUpdates` response, skipping anything
/// posted by the local account. Returns the next update offset as well.
fn parse_updates(updates: &Value, me_id: i64) -> (Option<i64>, Vec<IncomingDocument>) {
    let mut next_offset = None;
    let mut documents = Vec::new();

    for update in updates.as_array().into_iter().flatten() {
        if let Some(id) = update["update_id"].as_i64() {
            next_offset = Some(next_offset.unwrap_or(i64::MIN).max(id + 1));
        }

        let message = if update["message"].is_object() {
            &update["message"]
        } else {
            &update["channel_post"]
        };
        if message["from"]["id"].as_i64() == Some(me_id) {
            continue;
        }
        if let Some(file_id) = message["document"]["file_id"].as_str() {
            documents.push(IncomingDocument {
                handle: file_id.to_string(),
            });
        }
    }

    (next_offset, documents)
}

impl Carrier for HttpBotApi {
    async fn connect(&self, role: Role, _prompter: &AuthPrompter) -> Result<(), CarrierError> {
        if self.token.is_empty() {
            return Err(CarrierError::Auth("bot token is not configured".into()));
        }

        debug!("telegram connecting ({role:?})");
        let me = self.call("getMe", &[]).await.map_err(|err| match err {
            CarrierError::Api { code, message } if code == 401 => CarrierError::Auth(message),
            other => other,
        })?;
        self.me_id.store(me["id"].as_i64().unwrap_or(0), Ordering::SeqCst);

        // Bind the chat endpoint up front so a typo fails bring-up, not the
        // first upload.
        self.call("getChat", &[("chat_id", self.chat_id.clone())])
            .await?;
        info!(
            "telegram logged in as {}, tunnel endpoint {}",
            me["username"].as_str().unwrap_or("?"),
            self.chat_id
        );
        Ok(())
    }

    async fn send_document(
        &self,
        payload: Vec<u8>,
        filename: &str,
        _captcha: Option<CaptchaAnswer>,
    ) -> Result<(), CarrierError> {
        let form = Form::new()
            .text("chat_id", self.chat_id.clone())
            .text("disable_notification", "true")
            .part(
                "document",
                Part::bytes(payload).file_name(filename.to_string()),
            );

        let envelope: Value = self
            .http
            .post(self.method_url("sendDocument"))
            .multipart(form)
            .send()
            .await?
            .json()
            .await?;
        Self::api_result(envelope)?;
        Ok(())
    }

    async fn next_documents(&self) -> Result<Vec<IncomingDocument>, CarrierError> {
        let updates = self
            .call(
                "getUpdates",
                &[
                    ("timeout", POLL_TIMEOUT_SECS.to_string()),
                    ("offset", self.offset.load(Ordering::SeqCst).to_string()),
                    (
                        "allowed_updates",
                        r#"["message","channel_post"]"#.to_string(),
                    ),
                ],
            )
            .await?;

        let (next_offset, documents) =
            parse_updates(&updates, self.me_id.load(Ordering::SeqCst));
        if let Some(next_offset) = next_offset {
            self.offset.store(next_offset, Ordering::SeqCst);
        }
        Ok(documents)
    }

    async fn download(&self, document: &IncomingDocument) -> Result<Vec<u8>, CarrierError> {
        let file = self
            .call("getFile", &[("file_id", document.handle.clone())])
            .await?;
        let Some(path) = file["file_path"].as_str() else {
            return Err(CarrierError::Api {
                code: 0,
                message: "getFile returned no file_path".into(),
            });
        };

        let bytes = self
            .http
            .get(format!("{API_BASE}/file/bot{}/{path}", self.token))
            .send()
            .await?
            .bytes()
            .await?;
        Ok(bytes.to_vec())
    }

    async fn disconnect(&self) {
        // The Bot API is stateless; nothing to tear down.
        debug!("telegram session closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn updates_yield_documents_and_the_next_offset() {
        let updates = json!([
            {
                "update_id": 7,
                "message": {
                    "from": {"id": 42},
                    "document": {"file_id": "AAQ1"}
                }
            },
            {
                "update_id": 8,
                "channel_post": {
                    "document": {"file_id": "AAQ2"}
                }
            },
            {
                "update_id": 9,
                "message": {
                    "from": {"id": 42},
                    "text": "no attachment"
                }
            }
        ]);

        let (offset, documents) = parse_updates(&updates, 99);
        assert_eq!(offset, Some(10));
        assert_eq!(
            documents,
            vec![
                IncomingDocument { handle: "AAQ1".into() },
                IncomingDocument { handle: "AAQ2".into() },
            ]
        );
    }

    #[test]
    fn own_messages_are_ignored() {
        let updates = json!([
            {
                "update_id": 1,
                "message": {
                    "from": {"id": 42},
                    "document": {"file_id": "MINE"}
                }
            }
        ]);

        let (offset, documents) = parse_updates(&updates, 42);
        assert_eq!(offset, Some(2));
        assert!(documents.is_empty());
    }

    #[test]
    fn envelope_errors_map_to_carrier_errors() {
        let flood = json!({"ok": false, "error_code": 429, "description": "Too Many Requests"});
        assert!(matches!(
            HttpBotApi::api_result(flood),
            Err(CarrierError::Flood)
        ));

        let other = json!({"ok": false, "error_code": 400, "description": "Bad Request"});
        assert!(matches!(
            HttpBotApi::api_result(other),
            Err(CarrierError::Api { code: 400, .. })
        ));

        let ok = json!({"ok": true, "result": {"id": 1}});
        assert_eq!(HttpBotApi::api_result(ok).unwrap()["id"], 1);
    }
}
