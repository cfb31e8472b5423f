//! Outbound Telegram notifications.
//!
//! Thin wrapper over the Bot API. Notifications are fire-and-forget from
//! the mutation's point of view: callers invoke these only after their
//! transaction has committed, log failures with `warn!`, and never retry.

use anyhow::{Result, ensure};
use serde_json::json;

const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

pub struct Notifier {
    http: reqwest::Client,
    base: String,
    token: String,
}

impl Notifier {
    pub fn new(bot_token: &str) -> Self {
        Self::with_base(TELEGRAM_API_BASE, bot_token)
    }

    /// Point the wrapper at a different API host (tests, local bot API).
    pub fn with_base(base: &str, bot_token: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base: base.trim_end_matches('/').to_string(),
            token: bot_token.to_string(),
        }
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.base, self.token, method)
    }

    /// `sendMessage` with HTML parse mode, optionally into a forum topic.
    pub async fn send_message(
        &self,
        chat_id: &str,
        text: &str,
        topic_id: Option<&str>,
    ) -> Result<()> {
        let mut body = json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": "HTML",
        });
        if let Some(topic) = topic_id {
            body["message_thread_id"] = json!(topic);
        }

        let resp = self
            .http
            .post(self.method_url("sendMessage"))
            .json(&body)
            .send()
            .await?;
        ensure!(
            resp.status().is_success(),
            "telegram sendMessage returned {}",
            resp.status()
        );
        Ok(())
    }

    /// `sendPhoto` with a JPEG body and an HTML caption.
    pub async fn send_photo(
        &self,
        chat_id: &str,
        caption: &str,
        jpeg: Vec<u8>,
        topic_id: Option<&str>,
    ) -> Result<()> {
        let photo = reqwest::multipart::Part::bytes(jpeg)
            .file_name("photo.jpg")
            .mime_str("image/jpeg")?;
        let mut form = reqwest::multipart::Form::new()
            .text("chat_id", chat_id.to_string())
            .text("caption", caption.to_string())
            .text("parse_mode", "HTML")
            .part("photo", photo);
        if let Some(topic) = topic_id {
            form = form.text("message_thread_id", topic.to_string());
        }

        let resp = self
            .http
            .post(self.method_url("sendPhoto"))
            .multipart(form)
            .send()
            .await?;
        ensure!(
            resp.status().is_success(),
            "telegram sendPhoto returned {}",
            resp.status()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_urls_embed_token_and_method() {
        let n = Notifier::with_base("http://localhost:9999/", "123:ABC");
        assert_eq!(
            n.method_url("sendMessage"),
            "http://localhost:9999/bot123:ABC/sendMessage"
        );
    }
}
