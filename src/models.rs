use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub const DEFAULT_NOTE_COLOR: &str = "white";
pub const DEFAULT_PHOTO_STYLE: &str = "classic";

/// Where a card lands when neither the caller nor the backend picked a spot:
/// just right of the device's paper slot.
pub const DEFAULT_PRINT_POSITION: Position = Position { x: 360.0, y: 0.0 };

/// Offset in pixels from the desk anchor (the centre of the device).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn offset_by(self, dx: f64, dy: f64) -> Self {
        Self {
            x: self.x + dx,
            y: self.y + dy,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Text,
    Image,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MessageBody {
    Text {
        content: String,
        note_color_id: String,
    },
    Image {
        image_url: String,
        caption: Option<String>,
        style_id: String,
    },
}

/// A printed card on the desk.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: String,
    pub body: MessageBody,
    pub created_at: DateTime<Utc>,
    pub position: Option<Position>,
    pub is_pinned: bool,
    pub has_reminder: bool,
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self.body {
            MessageBody::Text { .. } => MessageKind::Text,
            MessageBody::Image { .. } => MessageKind::Image,
        }
    }

    /// The cosmetic selector that applies to this kind of card.
    pub fn style_key(&self) -> &str {
        match &self.body {
            MessageBody::Text { note_color_id, .. } => note_color_id,
            MessageBody::Image { style_id, .. } => style_id,
        }
    }

    pub fn label(&self) -> &str {
        match &self.body {
            MessageBody::Text { content, .. } => content,
            MessageBody::Image { caption, .. } => caption.as_deref().unwrap_or("Photo"),
        }
    }

    pub fn short_id(&self) -> &str {
        match self.id.char_indices().nth(8) {
            Some((idx, _)) => &self.id[..idx],
            None => &self.id,
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid message record `{id}`: {reason}")]
pub struct InvalidRecord {
    pub id: String,
    pub reason: &'static str,
}

/// Persisted / wire shape of a message. Shared by the local key-value blob and
/// the HTTP API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note_color_id: Option<String>,
    #[serde(
        serialize_with = "serialize_timestamp",
        deserialize_with = "deserialize_timestamp"
    )]
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<f64>,
    #[serde(default)]
    pub is_pinned: bool,
    #[serde(default)]
    pub has_reminder: bool,
}

impl TryFrom<MessageRecord> for Message {
    type Error = InvalidRecord;

    fn try_from(record: MessageRecord) -> Result<Self, Self::Error> {
        let body = match record.kind {
            MessageKind::Text => MessageBody::Text {
                content: record.content.unwrap_or_default(),
                note_color_id: record
                    .note_color_id
                    .unwrap_or_else(|| DEFAULT_NOTE_COLOR.to_string()),
            },
            MessageKind::Image => {
                let Some(image_url) = record.image_url.filter(|url| !url.is_empty()) else {
                    return Err(InvalidRecord {
                        id: record.id,
                        reason: "image record without imageUrl",
                    });
                };
                MessageBody::Image {
                    image_url,
                    caption: record.content,
                    style_id: record
                        .style_id
                        .unwrap_or_else(|| DEFAULT_PHOTO_STYLE.to_string()),
                }
            }
        };

        let position = match (record.x, record.y) {
            (Some(x), Some(y)) => Some(Position { x, y }),
            _ => None,
        };

        Ok(Message {
            id: record.id,
            body,
            created_at: record.timestamp,
            position,
            is_pinned: record.is_pinned,
            has_reminder: record.has_reminder,
        })
    }
}

impl From<&Message> for MessageRecord {
    fn from(message: &Message) -> Self {
        let (kind, content, image_url, style_id, note_color_id) = match &message.body {
            MessageBody::Text {
                content,
                note_color_id,
            } => (
                MessageKind::Text,
                Some(content.clone()),
                None,
                None,
                Some(note_color_id.clone()),
            ),
            MessageBody::Image {
                image_url,
                caption,
                style_id,
            } => (
                MessageKind::Image,
                caption.clone(),
                Some(image_url.clone()),
                Some(style_id.clone()),
                None,
            ),
        };

        MessageRecord {
            id: message.id.clone(),
            kind,
            content,
            image_url,
            style_id,
            note_color_id,
            timestamp: message.created_at,
            x: message.position.map(|p| p.x),
            y: message.position.map(|p| p.y),
            is_pinned: message.is_pinned,
            has_reminder: message.has_reminder,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DraftBody {
    Text {
        content: String,
        note_color_id: Option<String>,
    },
    Image {
        image_url: String,
        caption: Option<String>,
        style_id: Option<String>,
    },
}

/// What the device hands to the façade when the user hits print.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageDraft {
    pub body: DraftBody,
    pub position: Option<Position>,
    pub has_reminder: bool,
}

impl MessageDraft {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            body: DraftBody::Text {
                content: content.into(),
                note_color_id: None,
            },
            position: None,
            has_reminder: false,
        }
    }

    pub fn image(image_url: impl Into<String>) -> Self {
        Self {
            body: DraftBody::Image {
                image_url: image_url.into(),
                caption: Some("Photo".to_string()),
                style_id: None,
            },
            position: None,
            has_reminder: false,
        }
    }

    pub fn with_reminder(mut self, has_reminder: bool) -> Self {
        self.has_reminder = has_reminder;
        self
    }

    #[cfg(test)]
    pub fn at(mut self, position: Position) -> Self {
        self.position = Some(position);
        self
    }

    /// Blank notes and empty photo payloads never reach the printer.
    pub fn is_printable(&self) -> bool {
        match &self.body {
            DraftBody::Text { content, .. } => !content.trim().is_empty(),
            DraftBody::Image { image_url, .. } => !image_url.is_empty(),
        }
    }

    /// Fills unset cosmetic selectors from the user's defaults.
    pub fn apply_defaults(&mut self, settings: &Settings) {
        match &mut self.body {
            DraftBody::Text { note_color_id, .. } => {
                note_color_id.get_or_insert_with(|| settings.note_color_id.clone());
            }
            DraftBody::Image { style_id, .. } => {
                style_id.get_or_insert_with(|| settings.polaroid_style.clone());
            }
        }
    }
}

/// Body of `POST /messages`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRequest {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note_color_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_reminder: Option<bool>,
}

impl From<&MessageDraft> for MessageRequest {
    fn from(draft: &MessageDraft) -> Self {
        let (kind, content, image_url, style_id, note_color_id) = match &draft.body {
            DraftBody::Text {
                content,
                note_color_id,
            } => (
                MessageKind::Text,
                Some(content.clone()),
                None,
                None,
                note_color_id.clone(),
            ),
            DraftBody::Image {
                image_url,
                caption,
                style_id,
            } => (
                MessageKind::Image,
                caption.clone(),
                Some(image_url.clone()),
                style_id.clone(),
                None,
            ),
        };

        MessageRequest {
            kind,
            content,
            image_url,
            style_id,
            note_color_id,
            x: draft.position.map(|p| p.x),
            y: draft.position.map(|p| p.y),
            has_reminder: Some(draft.has_reminder),
        }
    }
}

/// Body of `PATCH /messages/{id}/style`. Absent fields keep their value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StyleUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note_color_id: Option<String>,
}

/// The single process-wide preferences record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub theme_id: String,
    pub polaroid_style: String,
    pub note_color_id: String,
    pub printer_style: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            theme_id: "default".to_string(),
            polaroid_style: DEFAULT_PHOTO_STYLE.to_string(),
            note_color_id: DEFAULT_NOTE_COLOR.to_string(),
            printer_style: "classic".to_string(),
        }
    }
}

/// Accepts ISO-8601 with an offset, or a zone-less local date-time (read as UTC).
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
                .ok()
                .map(|naive| naive.and_utc())
        })
}

fn serialize_timestamp<S: Serializer>(value: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&value.to_rfc3339_opts(SecondsFormat::Millis, true))
}

fn deserialize_timestamp<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
    let raw = String::deserialize(d)?;
    parse_timestamp(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp `{raw}`")))
}

fn deserialize_id<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Number(i64),
    }

    Ok(match RawId::deserialize(d)? {
        RawId::Text(id) => id,
        RawId::Number(id) => id.to_string(),
    })
}
