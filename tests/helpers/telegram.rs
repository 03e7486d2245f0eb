use async_trait::async_trait;
use notesync::domain::errors::DomainResult;
use notesync::domain::ports::credential_source::{CredentialSource, TelegramCredential};
use notesync::domain::ports::telegram_client::{ParseMode, PlatformError, TelegramClient};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq)]
pub enum TelegramCall {
    Send { text: String, parse_mode: ParseMode },
    Edit { message_id: i64, text: String, parse_mode: ParseMode },
    Delete { message_id: i64 },
    Document { file_name: String, caption: String, size: usize },
}

/// Records every Bot API call. Calls succeed unless an error was queued for
/// that kind of call. Posted messages get ids from 1000 upwards.
pub struct MockTelegramClient {
    calls: Mutex<Vec<TelegramCall>>,
    send_errors: Mutex<VecDeque<PlatformError>>,
    edit_errors: Mutex<VecDeque<PlatformError>>,
    delete_errors: Mutex<VecDeque<PlatformError>>,
    next_message_id: AtomicI64,
}

impl MockTelegramClient {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            send_errors: Mutex::new(VecDeque::new()),
            edit_errors: Mutex::new(VecDeque::new()),
            delete_errors: Mutex::new(VecDeque::new()),
            next_message_id: AtomicI64::new(1000),
        }
    }

    pub fn fail_next_send(&self, err: PlatformError) {
        self.send_errors.lock().unwrap().push_back(err);
    }

    pub fn fail_next_edit(&self, err: PlatformError) {
        self.edit_errors.lock().unwrap().push_back(err);
    }

    pub fn fail_next_delete(&self, err: PlatformError) {
        self.delete_errors.lock().unwrap().push_back(err);
    }

    pub fn calls(&self) -> Vec<TelegramCall> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: TelegramCall) {
        self.calls.lock().unwrap().push(call);
    }

    fn posted(&self, queue: &Mutex<VecDeque<PlatformError>>) -> Result<i64, PlatformError> {
        match queue.lock().unwrap().pop_front() {
            Some(err) => Err(err),
            None => Ok(self.next_message_id.fetch_add(1, Ordering::SeqCst)),
        }
    }

    fn done(queue: &Mutex<VecDeque<PlatformError>>) -> Result<(), PlatformError> {
        match queue.lock().unwrap().pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl TelegramClient for MockTelegramClient {
    async fn send_message(
        &self,
        _credential: &TelegramCredential,
        text: &str,
        parse_mode: ParseMode,
    ) -> Result<i64, PlatformError> {
        self.record(TelegramCall::Send {
            text: text.to_string(),
            parse_mode,
        });
        self.posted(&self.send_errors)
    }

    async fn edit_message(
        &self,
        _credential: &TelegramCredential,
        message_id: i64,
        text: &str,
        parse_mode: ParseMode,
    ) -> Result<(), PlatformError> {
        self.record(TelegramCall::Edit {
            message_id,
            text: text.to_string(),
            parse_mode,
        });
        Self::done(&self.edit_errors)
    }

    async fn delete_message(&self, _credential: &TelegramCredential, message_id: i64) -> Result<(), PlatformError> {
        self.record(TelegramCall::Delete { message_id });
        Self::done(&self.delete_errors)
    }

    async fn send_document(
        &self,
        _credential: &TelegramCredential,
        file_name: &str,
        contents: Vec<u8>,
        caption: &str,
    ) -> Result<i64, PlatformError> {
        self.record(TelegramCall::Document {
            file_name: file_name.to_string(),
            caption: caption.to_string(),
            size: contents.len(),
        });
        self.posted(&self.send_errors)
    }
}

/// Fixed set of channel credentials.
pub struct StaticCredentials {
    channels: HashMap<String, TelegramCredential>,
}

impl StaticCredentials {
    pub fn with_channel(channel_id: &str) -> Self {
        let mut channels = HashMap::new();
        channels.insert(
            channel_id.to_string(),
            TelegramCredential {
                channel_id: channel_id.to_string(),
                bot_token: "123456:test-token".to_string(),
                chat_id: "-1001".to_string(),
            },
        );
        Self { channels }
    }
}

#[async_trait]
impl CredentialSource for StaticCredentials {
    async fn load_telegram_credential(&self, channel_id: &str) -> DomainResult<Option<TelegramCredential>> {
        Ok(self.channels.get(channel_id).cloned())
    }
}
