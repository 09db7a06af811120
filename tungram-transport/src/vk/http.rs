// Copyright 2025 - developers of the `tungram` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! [`Carrier`] binding over the VKontakte HTTP API.
//!
//! Sending a document is a three-step dance (`docs.getMessagesUploadServer`
//! → raw upload → `docs.save` → `messages.send`); receiving rides the
//! user long-poll server. Authentication is either a ready access token or
//! the direct password grant, with 2FA codes and captchas bounced to the
//! user through the prompter.

use crate::auth::{AuthKind, AuthPrompter};
use crate::{CaptchaAnswer, Carrier, CarrierError, IncomingDocument, Role};
use log::{debug, info, warn};
use reqwest::multipart::{Form, Part};
use serde_json::Value;
use std::time::Duration;
use tokio::sync::Mutex;

const API_BASE: &str = "https://api.vk.com/method";
const OAUTH_TOKEN_URL: &str = "https://oauth.vk.com/token";
const API_VERSION: &str = "5.131";

/// The stock client credentials the password grant is issued against when
/// no application id is configured.
const OFFICIAL_CLIENT_ID: i64 = 2274003;
const OFFICIAL_CLIENT_SECRET: &str = "hHbZxrka2uZ6jB1inYsH";

/// Long-poll hold time, in seconds.
const POLL_WAIT_SECS: u64 = 25;

const API_ERROR_AUTH: i64 = 5;
const API_ERROR_FLOOD: i64 = 9;
const API_ERROR_CAPTCHA: i64 = 14;

const MAX_LOGIN_ATTEMPTS: u32 = 5;

/// Messages long-poll event code for a new message.
const EVENT_NEW_MESSAGE: i64 = 4;

/// Message flag: outgoing (set on our own messages).
const FLAG_OUTBOX: i64 = 2;

struct LongPollState {
    server: String,
    key: String,
    ts: i64,
}

pub struct HttpVkApi {
    http: reqwest::Client,
    token: Mutex<String>,
    login: String,
    password: String,
    app_id: i64,
    peer_id: i64,
    longpoll: Mutex<Option<LongPollState>>,
}

impl HttpVkApi {
    pub fn new(token: String, login: String, password: String, app_id: i64, peer_id: i64) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(POLL_WAIT_SECS * 2))
            .build()
            .expect("default reqwest client");
        Self {
            http,
            token: Mutex::new(token),
            login,
            password,
            app_id,
            peer_id,
            longpoll: Mutex::new(None),
        }
    }

    fn api_error(error: &Value) -> CarrierError {
        let code = error["error_code"].as_i64().unwrap_or(0);
        match code {
            API_ERROR_FLOOD => CarrierError::Flood,
            API_ERROR_CAPTCHA => CarrierError::Captcha {
                img_url: error["captcha_img"].as_str().unwrap_or("").to_string(),
                sid: error["captcha_sid"].as_str().unwrap_or("").to_string(),
            },
            API_ERROR_AUTH => CarrierError::Auth(
                error["error_msg"].as_str().unwrap_or("unauthorized").to_string(),
            ),
            _ => CarrierError::Api {
                code,
                message: error["error_msg"].as_str().unwrap_or("unknown").to_string(),
            },
        }
    }

    async fn call(
        &self,
        method: &str,
        params: &[(&str, String)],
        captcha: Option<&CaptchaAnswer>,
    ) -> Result<Value, CarrierError> {
        let token = self.token.lock().await.clone();
        let mut form: Vec<(&str, String)> = vec![
            ("access_token", token),
            ("v", API_VERSION.to_string()),
        ];
        form.extend_from_slice(params);
        if let Some(answer) = captcha {
            form.push(("captcha_sid", answer.sid.clone()));
            form.push(("captcha_key", answer.key.clone()));
        }

        let mut envelope: Value = self
            .http
            .post(format!("{API_BASE}/{method}"))
            .form(&form)
            .send()
            .await?
            .json()
            .await?;
        if envelope["error"].is_object() {
            return Err(Self::api_error(&envelope["error"]));
        }
        Ok(envelope["response"].take())
    }

    /// The OAuth password grant, driving 2FA and captcha challenges through
    /// the prompter.
    async fn direct_auth(&self, prompter: &AuthPrompter) -> Result<(), CarrierError> {
        let client_id = if self.app_id != 0 {
            self.app_id
        } else {
            OFFICIAL_CLIENT_ID
        };

        let mut code: Option<String> = None;
        let mut captcha: Option<CaptchaAnswer> = None;

        for _ in 0..MAX_LOGIN_ATTEMPTS {
            let mut query: Vec<(&str, String)> = vec![
                ("grant_type", "password".to_string()),
                ("client_id", client_id.to_string()),
                ("client_secret", OFFICIAL_CLIENT_SECRET.to_string()),
                ("username", self.login.clone()),
                ("password", self.password.clone()),
                ("v", API_VERSION.to_string()),
                ("2fa_supported", "1".to_string()),
            ];
            if let Some(code) = code.take() {
                query.push(("code", code));
            }
            if let Some(answer) = captcha.take() {
                query.push(("captcha_sid", answer.sid));
                query.push(("captcha_key", answer.key));
            }

            let reply: Value = self
                .http
                .get(OAUTH_TOKEN_URL)
                .query(&query)
                .send()
                .await?
                .json()
                .await?;

            if let Some(token) = reply["access_token"].as_str() {
                *self.token.lock().await = token.to_string();
                return Ok(());
            }

            match reply["error"].as_str() {
                Some("need_validation") => {
                    debug!("vk 2fa requested");
                    match prompter.ask(AuthKind::LoginCode, None).await {
                        Some(answer) => code = Some(answer),
                        None => return Err(CarrierError::Auth("2fa cancelled".into())),
                    }
                }
                Some("need_captcha") => {
                    let img = reply["captcha_img"].as_str().unwrap_or("").to_string();
                    let sid = reply["captcha_sid"].as_str().unwrap_or("").to_string();
                    debug!("vk login captcha: {img}");
                    match prompter.ask(AuthKind::Captcha, Some(img)).await {
                        Some(key) => captcha = Some(CaptchaAnswer { sid, key }),
                        None => return Err(CarrierError::Auth("captcha cancelled".into())),
                    }
                }
                other => {
                    return Err(CarrierError::Auth(format!(
                        "login refused: {}",
                        other.unwrap_or("unknown error")
                    )));
                }
            }
        }

        Err(CarrierError::Auth("login attempts exhausted".into()))
    }
}

/// Message ids of fresh incoming messages for `peer_id` in one long-poll
/// result.
fn longpoll_message_ids(updates: &Value, peer_id: i64) -> Vec<i64> {
    let mut ids = Vec::new();
    for update in updates.as_array().into_iter().flatten() {
        let Some(fields) = update.as_array() else {
            continue;
        };
        if fields.first().and_then(Value::as_i64) != Some(EVENT_NEW_MESSAGE) {
            continue;
        }
        let (Some(id), Some(flags), Some(peer)) = (
            fields.get(1).and_then(Value::as_i64),
            fields.get(2).and_then(Value::as_i64),
            fields.get(3).and_then(Value::as_i64),
        ) else {
            continue;
        };
        if flags & FLAG_OUTBOX == 0 && peer == peer_id {
            ids.push(id);
        }
    }
    ids
}

/// Document download URLs attached to a `messages.getById` response.
fn document_urls(response: &Value) -> Vec<String> {
    let mut urls = Vec::new();
    for item in response["items"].as_array().into_iter().flatten() {
        for attachment in item["attachments"].as_array().into_iter().flatten() {
            if attachment["type"].as_str() == Some("doc") {
                if let Some(url) = attachment["doc"]["url"].as_str() {
                    urls.push(url.to_string());
                }
            }
        }
    }
    urls
}

impl Carrier for HttpVkApi {
    async fn connect(&self, role: Role, prompter: &AuthPrompter) -> Result<(), CarrierError> {
        debug!("vk connecting ({role:?})");

        if self.token.lock().await.len() > 10 {
            debug!("vk using the configured access token");
            self.call("users.get", &[], None).await.map_err(|err| match err {
                CarrierError::Auth(detail) => CarrierError::Auth(detail),
                CarrierError::Api { code, message } if code == API_ERROR_AUTH => {
                    CarrierError::Auth(message)
                }
                other => other,
            })?;
        } else {
            debug!("vk using login/password");
            self.direct_auth(prompter).await?;
        }

        info!("vk connected, peer {}", self.peer_id);
        Ok(())
    }

    async fn send_document(
        &self,
        payload: Vec<u8>,
        filename: &str,
        captcha: Option<CaptchaAnswer>,
    ) -> Result<(), CarrierError> {
        let captcha = captcha.as_ref();

        let upload = self
            .call(
                "docs.getMessagesUploadServer",
                &[
                    ("type", "doc".to_string()),
                    ("peer_id", self.peer_id.to_string()),
                ],
                captcha,
            )
            .await?;
        let Some(upload_url) = upload["upload_url"].as_str() else {
            return Err(CarrierError::Api {
                code: 0,
                message: "no upload_url".into(),
            });
        };

        let form = Form::new().part("file", Part::bytes(payload).file_name(filename.to_string()));
        let uploaded: Value = self
            .http
            .post(upload_url)
            .multipart(form)
            .send()
            .await?
            .json()
            .await?;
        let Some(file) = uploaded["file"].as_str() else {
            return Err(CarrierError::Api {
                code: 0,
                message: "document upload rejected".into(),
            });
        };

        let saved = self
            .call(
                "docs.save",
                &[
                    ("file", file.to_string()),
                    ("title", filename.to_string()),
                ],
                captcha,
            )
            .await?;
        let doc = if saved["doc"].is_object() {
            &saved["doc"]
        } else {
            &saved[0]["doc"]
        };
        let (Some(owner_id), Some(id)) = (doc["owner_id"].as_i64(), doc["id"].as_i64()) else {
            return Err(CarrierError::Api {
                code: 0,
                message: "docs.save returned no document".into(),
            });
        };

        self.call(
            "messages.send",
            &[
                ("peer_id", self.peer_id.to_string()),
                ("attachment", format!("doc{owner_id}_{id}")),
                ("random_id", "0".to_string()),
            ],
            captcha,
        )
        .await?;
        Ok(())
    }

    async fn next_documents(&self) -> Result<Vec<IncomingDocument>, CarrierError> {
        let mut state = self.longpoll.lock().await;
        if state.is_none() {
            let server = self.call("messages.getLongPollServer", &[], None).await?;
            let (Some(host), Some(key), Some(ts)) = (
                server["server"].as_str(),
                server["key"].as_str(),
                server["ts"].as_i64(),
            ) else {
                return Err(CarrierError::Api {
                    code: 0,
                    message: "bad long-poll server response".into(),
                });
            };
            *state = Some(LongPollState {
                server: host.to_string(),
                key: key.to_string(),
                ts,
            });
        }
        let lp = state.as_mut().unwrap();

        let reply: Value = self
            .http
            .get(format!("https://{}", lp.server))
            .query(&[
                ("act", "a_check".to_string()),
                ("key", lp.key.clone()),
                ("ts", lp.ts.to_string()),
                ("wait", POLL_WAIT_SECS.to_string()),
                ("mode", "2".to_string()),
                ("version", "3".to_string()),
            ])
            .send()
            .await?
            .json()
            .await?;

        if reply["failed"].is_i64() {
            // Key expired or history lost; rebind on the next poll.
            warn!("vk long-poll session invalidated, rebinding");
            *state = None;
            return Ok(Vec::new());
        }
        if let Some(ts) = reply["ts"].as_i64() {
            lp.ts = ts;
        }

        let ids = longpoll_message_ids(&reply["updates"], self.peer_id);
        drop(state);
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
        let messages = self
            .call(
                "messages.getById",
                &[("message_ids", ids.join(","))],
                None,
            )
            .await?;

        Ok(document_urls(&messages)
            .into_iter()
            .map(|url| IncomingDocument { handle: url })
            .collect())
    }

    async fn download(&self, document: &IncomingDocument) -> Result<Vec<u8>, CarrierError> {
        let bytes = self
            .http
            .get(&document.handle)
            .send()
            .await?
            .bytes()
            .await?;
        Ok(bytes.to_vec())
    }

    async fn disconnect(&self) {
        debug!("vk session closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn longpoll_keeps_fresh_incoming_messages_only() {
        let updates = json!([
            [4, 101, 1, 589972849],          // incoming, right peer
            [4, 102, 3, 589972849],          // outgoing (flag 2 set)
            [4, 103, 1, 111111],             // wrong peer
            [8, 589972849],                  // friend online, not a message
            [4, 104, 17, 589972849]          // incoming with extra flags
        ]);
        assert_eq!(longpoll_message_ids(&updates, 589972849), vec![101, 104]);
    }

    #[test]
    fn document_urls_skip_other_attachments() {
        let response = json!({
            "items": [
                {
                    "attachments": [
                        {"type": "photo", "photo": {}},
                        {"type": "doc", "doc": {"url": "https://vk.example/doc1"}}
                    ]
                },
                {"attachments": []},
                {
                    "attachments": [
                        {"type": "doc", "doc": {"url": "https://vk.example/doc2"}}
                    ]
                }
            ]
        });
        assert_eq!(
            document_urls(&response),
            vec!["https://vk.example/doc1", "https://vk.example/doc2"]
        );
    }

    #[test]
    fn api_errors_map_by_code() {
        let flood = json!({"error_code": 9, "error_msg": "Flood control"});
        assert!(matches!(HttpVkApi::api_error(&flood), CarrierError::Flood));

        let captcha = json!({
            "error_code": 14,
            "error_msg": "Captcha needed",
            "captcha_sid": "55",
            "captcha_img": "https://vk.example/captcha.png"
        });
        match HttpVkApi::api_error(&captcha) {
            CarrierError::Captcha { img_url, sid } => {
                assert_eq!(img_url, "https://vk.example/captcha.png");
                assert_eq!(sid, "55");
            }
            other => panic!("unexpected {other:?}"),
        }

        let auth = json!({"error_code": 5, "error_msg": "User authorization failed"});
        assert!(matches!(HttpVkApi::api_error(&auth), CarrierError::Auth(_)));

        let other = json!({"error_code": 100, "error_msg": "Bad parameter"});
        assert!(matches!(
            HttpVkApi::api_error(&other),
            CarrierError::Api { code: 100, .. }
        ));
    }
}
