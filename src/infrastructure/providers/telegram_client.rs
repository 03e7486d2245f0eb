use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use crate::domain::ports::credential_source::TelegramCredential;
use crate::domain::ports::telegram_client::{ParseMode, PlatformError, TelegramClient};

#[derive(Debug, Deserialize)]
struct BotResponse {
    ok: bool,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    error_code: Option<u16>,
    #[serde(default)]
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
struct ResponseParameters {
    #[serde(default)]
    retry_after: Option<u64>,
}

/// Telegram Bot API over HTTPS.
#[derive(Clone)]
pub struct HttpTelegramClient {
    http_client: reqwest::Client,
    api_base: String,
}

impl HttpTelegramClient {
    pub fn new(api_base: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http_client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http_client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
        })
    }

    fn method_url(&self, credential: &TelegramCredential, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, credential.bot_token, method)
    }

    async fn call(&self, method: &str, request: reqwest::RequestBuilder) -> Result<Value, PlatformError> {
        // without_url keeps the bot token out of error messages
        let response = request
            .send()
            .await
            .map_err(|e| PlatformError::Transient(e.without_url().to_string()))?;
        let status = response.status();

        let body: BotResponse = match response.json().await {
            Ok(body) => body,
            Err(e) if status.is_success() || status.is_server_error() => {
                return Err(PlatformError::Transient(format!(
                    "{} returned unreadable body: {}",
                    method,
                    e.without_url()
                )));
            }
            Err(_) => {
                return Err(classify_error(
                    status.as_u16(),
                    status.canonical_reason().unwrap_or_default(),
                    None,
                ));
            }
        };

        if body.ok {
            debug!(method, "Telegram call succeeded");
            return Ok(body.result.unwrap_or(Value::Null));
        }

        let code = body.error_code.unwrap_or_else(|| status.as_u16());
        let description = body.description.unwrap_or_default();
        let retry_after = body
            .parameters
            .and_then(|p| p.retry_after)
            .map(Duration::from_secs);
        Err(classify_error(code, &description, retry_after))
    }
}

fn message_id(result: &Value) -> Result<i64, PlatformError> {
    result["message_id"]
        .as_i64()
        .ok_or_else(|| PlatformError::Transient("response carried no message_id".to_string()))
}

fn parse_mode_field(parse_mode: ParseMode) -> Option<&'static str> {
    match parse_mode {
        ParseMode::Markdown => Some("Markdown"),
        ParseMode::Plain => None,
    }
}

/// Bot API descriptions meaning the message itself is gone. Anything else that
/// is "not found" (a chat, a user) is a configuration problem, not a success.
const MESSAGE_GONE: [&str; 3] = [
    "message to delete not found",
    "message to edit not found",
    "message can't be deleted",
];

/// Map a Bot API error response onto the platform error taxonomy.
pub fn classify_error(code: u16, description: &str, retry_after: Option<Duration>) -> PlatformError {
    let lower = description.to_lowercase();
    match code {
        429 => PlatformError::RateLimited { retry_after },
        401 | 403 => PlatformError::Unauthorized(description.to_string()),
        400 if lower.contains("can't parse entities") => PlatformError::ParseEntities(description.to_string()),
        400 if lower.contains("message is not modified") => PlatformError::NotModified,
        400 if MESSAGE_GONE.iter().any(|phrase| lower.contains(phrase)) => {
            PlatformError::NotFound(description.to_string())
        }
        500..=599 => PlatformError::Transient(format!("HTTP {}: {}", code, description)),
        _ => PlatformError::Rejected(format!("HTTP {}: {}", code, description)),
    }
}

#[async_trait]
impl TelegramClient for HttpTelegramClient {
    async fn send_message(
        &self,
        credential: &TelegramCredential,
        text: &str,
        parse_mode: ParseMode,
    ) -> Result<i64, PlatformError> {
        let mut body = json!({
            "chat_id": credential.chat_id,
            "text": text,
        });
        if let Some(mode) = parse_mode_field(parse_mode) {
            body["parse_mode"] = json!(mode);
        }
        let request = self
            .http_client
            .post(self.method_url(credential, "sendMessage"))
            .json(&body);
        let result = self.call("sendMessage", request).await?;
        message_id(&result)
    }

    async fn edit_message(
        &self,
        credential: &TelegramCredential,
        message_id: i64,
        text: &str,
        parse_mode: ParseMode,
    ) -> Result<(), PlatformError> {
        let mut body = json!({
            "chat_id": credential.chat_id,
            "message_id": message_id,
            "text": text,
        });
        if let Some(mode) = parse_mode_field(parse_mode) {
            body["parse_mode"] = json!(mode);
        }
        let request = self
            .http_client
            .post(self.method_url(credential, "editMessageText"))
            .json(&body);
        self.call("editMessageText", request).await?;
        Ok(())
    }

    async fn delete_message(&self, credential: &TelegramCredential, message_id: i64) -> Result<(), PlatformError> {
        let request = self
            .http_client
            .post(self.method_url(credential, "deleteMessage"))
            .json(&json!({
                "chat_id": credential.chat_id,
                "message_id": message_id,
            }));
        self.call("deleteMessage", request).await?;
        Ok(())
    }

    async fn send_document(
        &self,
        credential: &TelegramCredential,
        file_name: &str,
        contents: Vec<u8>,
        caption: &str,
    ) -> Result<i64, PlatformError> {
        let document = Part::bytes(contents)
            .file_name(file_name.to_string())
            .mime_str("text/markdown")
            .map_err(|e| PlatformError::Rejected(e.without_url().to_string()))?;
        let form = Form::new()
            .text("chat_id", credential.chat_id.clone())
            .text("caption", caption.to_string())
            .part("document", document);
        let request = self
            .http_client
            .post(self.method_url(credential, "sendDocument"))
            .multipart(form);
        let result = self.call("sendDocument", request).await?;
        message_id(&result)
    }
}
