use crate::db::Database;
use crate::models::{
    DEFAULT_NOTE_COLOR, DEFAULT_PHOTO_STYLE, DEFAULT_PRINT_POSITION, DraftBody, InvalidRecord,
    Message, MessageBody, MessageDraft, MessageRecord, Position, Settings, StyleUpdate,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, SubsecRound, Utc};
use tokio::sync::Mutex;

pub const MESSAGES_KEY: &str = "retro_printer_messages_v1";
pub const SETTINGS_KEY: &str = "retro_printer_settings_v1";

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("http transport error: {0}")]
    Http(#[from] hyper::Error),
    #[error("invalid http request: {0}")]
    Request(#[from] hyper::http::Error),
    #[error("{path} returned status {status}")]
    Status { status: u16, path: String },
    #[error("malformed json: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    InvalidRecord(#[from] InvalidRecord),
    #[error("message {0} not found")]
    NotFound(String),
}

/// Persistence façade for printed messages and the settings record.
///
/// Writes report failures; reads may substitute defaults or cached data
/// instead of failing, depending on the backend.
#[async_trait]
pub trait MessageStorage: Send + Sync {
    /// Human-readable backend name for the status line.
    fn backend_name(&self) -> &'static str;

    async fn list_messages(&self) -> Result<Vec<Message>, StorageError>;

    async fn create_message(&self, draft: MessageDraft) -> Result<Message, StorageError>;

    /// Deleting an unknown id succeeds.
    async fn delete_message(&self, id: &str) -> Result<(), StorageError>;

    async fn update_message_position(&self, id: &str, x: f64, y: f64)
    -> Result<(), StorageError>;

    async fn toggle_reminder(&self, id: &str, value: bool) -> Result<(), StorageError>;

    async fn update_style(&self, id: &str, update: StyleUpdate) -> Result<(), StorageError>;

    async fn get_settings(&self) -> Result<Settings, StorageError>;

    async fn put_settings(&self, settings: &Settings) -> Result<(), StorageError>;
}

/// Messages shown on a fresh desk.
pub fn seed_messages() -> Vec<Message> {
    let now = stamp_now();
    vec![
        Message {
            id: "8658".to_string(),
            body: MessageBody::Text {
                content: "你好！| Hello World".to_string(),
                note_color_id: DEFAULT_NOTE_COLOR.to_string(),
            },
            created_at: now,
            position: Some(Position::new(360.0, -50.0)),
            is_pinned: false,
            has_reminder: false,
        },
        Message {
            id: "7052".to_string(),
            body: MessageBody::Text {
                content: "我们常常对一些生活小事斤斤计较，却对那些大事毫不在心。".to_string(),
                note_color_id: DEFAULT_NOTE_COLOR.to_string(),
            },
            created_at: now - Duration::hours(1),
            position: Some(Position::new(360.0, 80.0)),
            is_pinned: false,
            has_reminder: false,
        },
    ]
}

/// Creation time at the precision the persisted ISO-8601 form keeps.
pub fn stamp_now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

/// Turns a draft into a stored message, filling what the caller left out.
pub fn materialize(draft: MessageDraft, id: String) -> Message {
    let body = match draft.body {
        DraftBody::Text {
            content,
            note_color_id,
        } => MessageBody::Text {
            content,
            note_color_id: note_color_id.unwrap_or_else(|| DEFAULT_NOTE_COLOR.to_string()),
        },
        DraftBody::Image {
            image_url,
            caption,
            style_id,
        } => MessageBody::Image {
            image_url,
            caption,
            style_id: style_id.unwrap_or_else(|| DEFAULT_PHOTO_STYLE.to_string()),
        },
    };

    Message {
        id,
        body,
        created_at: stamp_now(),
        position: Some(draft.position.unwrap_or(DEFAULT_PRINT_POSITION)),
        is_pinned: false,
        has_reminder: draft.has_reminder,
    }
}

/// Applies a partial style change. Each selector only touches the card kind it
/// belongs to.
pub fn apply_style(message: &mut Message, update: &StyleUpdate) {
    match &mut message.body {
        MessageBody::Text { note_color_id, .. } => {
            if let Some(color) = &update.note_color_id {
                *note_color_id = color.clone();
            }
        }
        MessageBody::Image { style_id, .. } => {
            if let Some(style) = &update.style_id {
                *style_id = style.clone();
            }
        }
    }
}

/// Backend that keeps everything in the local key-value database.
pub struct LocalStorage {
    db: Database,
    // Serializes read-modify-write cycles on the messages blob.
    write_lock: Mutex<()>,
}

impl LocalStorage {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            write_lock: Mutex::new(()),
        }
    }

    async fn read_messages(&self) -> Result<Vec<Message>, StorageError> {
        let Some(raw) = self.db.get(MESSAGES_KEY).await? else {
            tracing::info!("no stored messages, seeding defaults");
            return self.reseed().await;
        };

        let value = match serde_json::from_str::<serde_json::Value>(&raw) {
            Ok(value @ serde_json::Value::Array(_)) => value,
            Ok(_) => {
                tracing::warn!("stored messages are not an array, reseeding");
                return self.reseed().await;
            }
            Err(err) => {
                tracing::warn!(error = %err, "stored messages are not valid json, reseeding");
                return self.reseed().await;
            }
        };

        let records: Vec<MessageRecord> = match serde_json::from_value(value) {
            Ok(records) => records,
            Err(err) => {
                tracing::warn!(error = %err, "stored messages have an unknown shape, reseeding");
                return self.reseed().await;
            }
        };

        Ok(records
            .into_iter()
            .filter_map(|record| match Message::try_from(record) {
                Ok(message) => Some(message),
                Err(err) => {
                    tracing::warn!(error = %err, "dropping unreadable stored message");
                    None
                }
            })
            .collect())
    }

    async fn write_messages(&self, messages: &[Message]) -> Result<(), StorageError> {
        let records: Vec<MessageRecord> = messages.iter().map(MessageRecord::from).collect();
        let raw = serde_json::to_string(&records)?;
        self.db.put(MESSAGES_KEY, &raw).await?;
        Ok(())
    }

    async fn reseed(&self) -> Result<Vec<Message>, StorageError> {
        let seed = seed_messages();
        self.write_messages(&seed).await?;
        Ok(seed)
    }

    async fn modify<F>(&self, id: &str, mut apply: F) -> Result<(), StorageError>
    where
        F: FnMut(&mut Message) + Send,
    {
        let _guard = self.write_lock.lock().await;
        let mut messages = self.read_messages().await?;
        let mut touched = false;
        for message in messages.iter_mut().filter(|m| m.id == id) {
            apply(message);
            touched = true;
        }
        if !touched {
            tracing::debug!(id, "update for unknown message ignored");
            return Ok(());
        }
        self.write_messages(&messages).await
    }
}

#[async_trait]
impl MessageStorage for LocalStorage {
    fn backend_name(&self) -> &'static str {
        "LOCAL"
    }

    async fn list_messages(&self) -> Result<Vec<Message>, StorageError> {
        let _guard = self.write_lock.lock().await;
        self.read_messages().await
    }

    async fn create_message(&self, draft: MessageDraft) -> Result<Message, StorageError> {
        let _guard = self.write_lock.lock().await;
        let mut messages = self.read_messages().await?;

        let mut id = uuid::Uuid::new_v4().simple().to_string();
        while messages.iter().any(|m| m.id == id) {
            id = uuid::Uuid::new_v4().simple().to_string();
        }

        let message = materialize(draft, id);
        messages.insert(0, message.clone());
        self.write_messages(&messages).await?;
        tracing::debug!(id = %message.id, "message printed");
        Ok(message)
    }

    async fn delete_message(&self, id: &str) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().await;
        let mut messages = self.read_messages().await?;
        let before = messages.len();
        messages.retain(|m| m.id != id);
        if messages.len() == before {
            return Ok(());
        }
        self.write_messages(&messages).await
    }

    async fn update_message_position(
        &self,
        id: &str,
        x: f64,
        y: f64,
    ) -> Result<(), StorageError> {
        self.modify(id, |m| m.position = Some(Position::new(x, y)))
            .await
    }

    async fn toggle_reminder(&self, id: &str, value: bool) -> Result<(), StorageError> {
        self.modify(id, |m| m.has_reminder = value).await
    }

    async fn update_style(&self, id: &str, update: StyleUpdate) -> Result<(), StorageError> {
        self.modify(id, |m| apply_style(m, &update)).await
    }

    async fn get_settings(&self) -> Result<Settings, StorageError> {
        let Some(raw) = self.db.get(SETTINGS_KEY).await? else {
            return Ok(Settings::default());
        };
        match serde_json::from_str(&raw) {
            Ok(settings) => Ok(settings),
            Err(err) => {
                tracing::warn!(error = %err, "stored settings are corrupted, using defaults");
                Ok(Settings::default())
            }
        }
    }

    async fn put_settings(&self, settings: &Settings) -> Result<(), StorageError> {
        let raw = serde_json::to_string(settings)?;
        self.db.put(SETTINGS_KEY, &raw).await?;
        Ok(())
    }
}
