use crate::models::{Message, MessageDraft, MessageRecord, MessageRequest, Settings, StyleUpdate};
use crate::storage::{MessageStorage, StorageError};
use anyhow::{Context, Result};
use async_trait::async_trait;
use hyper::client::HttpConnector;
use hyper::header::{ACCEPT, CONTENT_TYPE};
use hyper::{Body, Client, Method, Request, StatusCode};
use hyper_rustls::HttpsConnector;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Mutex;

enum Transport {
    Plain(Client<HttpConnector>),
    Tls(Client<HttpsConnector<HttpConnector>>),
}

/// Backend that talks to the printer REST service.
///
/// The last good message listing and settings are kept in memory so that reads
/// keep working through a flaky connection.
pub struct RemoteStorage {
    transport: Transport,
    base_url: String,
    messages_cache: Mutex<Option<Vec<Message>>>,
    settings_cache: Mutex<Option<Settings>>,
}

impl RemoteStorage {
    pub fn new(base_url: &str) -> Result<Self> {
        let base_url = base_url.trim_end_matches('/').to_string();
        let transport = if base_url.starts_with("https://") {
            let connector = hyper_rustls::HttpsConnectorBuilder::new()
                .with_native_roots()
                .context("Failed to load native roots")?
                .https_only()
                .enable_http1()
                .build();
            Transport::Tls(Client::builder().build(connector))
        } else {
            Transport::Plain(Client::new())
        };

        Ok(Self {
            transport,
            base_url,
            messages_cache: Mutex::new(None),
            settings_cache: Mutex::new(None),
        })
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
    ) -> Result<(StatusCode, hyper::body::Bytes), StorageError> {
        let mut builder = Request::builder()
            .method(method.clone())
            .uri(format!("{}{}", self.base_url, path))
            .header(ACCEPT, "application/json");
        if body.is_some() {
            builder = builder.header(CONTENT_TYPE, "application/json");
        }
        let request = builder.body(body.map(Body::from).unwrap_or_else(Body::empty))?;

        let response = match &self.transport {
            Transport::Plain(client) => client.request(request).await?,
            Transport::Tls(client) => client.request(request).await?,
        };
        let status = response.status();
        let bytes = hyper::body::to_bytes(response.into_body()).await?;
        tracing::debug!(%method, path, status = status.as_u16(), "remote storage call");
        Ok((status, bytes))
    }

    async fn send_json<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: &B,
    ) -> Result<(), StorageError> {
        let payload = serde_json::to_vec(body)?;
        let (status, _) = self.send(method, path, Some(payload)).await?;
        ensure_success(status, path)
    }

    async fn fetch<T: DeserializeOwned>(&self, path: &str) -> Result<T, StorageError> {
        let (status, bytes) = self.send(Method::GET, path, None).await?;
        ensure_success(status, path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn fetch_messages(&self) -> Result<Vec<Message>, StorageError> {
        let records: Vec<MessageRecord> = self.fetch("/messages").await?;
        Ok(records
            .into_iter()
            .filter_map(|record| match Message::try_from(record) {
                Ok(message) => Some(message),
                Err(err) => {
                    tracing::warn!(error = %err, "skipping unreadable remote message");
                    None
                }
            })
            .collect())
    }

    async fn fetch_settings(&self) -> Result<Settings, StorageError> {
        let (status, bytes) = self.send(Method::GET, "/settings", None).await?;
        if status == StatusCode::NOT_FOUND {
            return Ok(Settings::default());
        }
        ensure_success(status, "/settings")?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

fn ensure_success(status: StatusCode, path: &str) -> Result<(), StorageError> {
    if status.is_success() {
        Ok(())
    } else {
        Err(StorageError::Status {
            status: status.as_u16(),
            path: path.to_string(),
        })
    }
}

/// Ids are opaque, so they are escaped as a single path segment.
fn message_path(id: &str, suffix: &str) -> String {
    format!("/messages/{}{}", urlencoding::encode(id), suffix)
}

#[derive(Serialize)]
struct PositionBody {
    x: f64,
    y: f64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ReminderBody {
    has_reminder: bool,
}

#[async_trait]
impl MessageStorage for RemoteStorage {
    fn backend_name(&self) -> &'static str {
        "REMOTE"
    }

    async fn list_messages(&self) -> Result<Vec<Message>, StorageError> {
        match self.fetch_messages().await {
            Ok(messages) => {
                if let Ok(mut cache) = self.messages_cache.lock() {
                    *cache = Some(messages.clone());
                }
                Ok(messages)
            }
            Err(err) => {
                let cached = self
                    .messages_cache
                    .lock()
                    .ok()
                    .and_then(|cache| cache.clone());
                match cached {
                    Some(messages) => {
                        tracing::warn!(error = %err, "listing failed, serving cached messages");
                        Ok(messages)
                    }
                    None => Err(err),
                }
            }
        }
    }

    async fn create_message(&self, draft: MessageDraft) -> Result<Message, StorageError> {
        let payload = serde_json::to_vec(&MessageRequest::from(&draft))?;
        let (status, bytes) = self.send(Method::POST, "/messages", Some(payload)).await?;
        ensure_success(status, "/messages")?;
        let record: MessageRecord = serde_json::from_slice(&bytes)?;
        Ok(Message::try_from(record)?)
    }

    async fn delete_message(&self, id: &str) -> Result<(), StorageError> {
        let path = message_path(id, "");
        let (status, _) = self.send(Method::DELETE, &path, None).await?;
        if status == StatusCode::NOT_FOUND {
            return Ok(());
        }
        ensure_success(status, &path)
    }

    async fn update_message_position(
        &self,
        id: &str,
        x: f64,
        y: f64,
    ) -> Result<(), StorageError> {
        self.send_json(
            Method::PATCH,
            &message_path(id, "/position"),
            &PositionBody { x, y },
        )
        .await
    }

    async fn toggle_reminder(&self, id: &str, value: bool) -> Result<(), StorageError> {
        self.send_json(
            Method::PATCH,
            &message_path(id, "/reminder"),
            &ReminderBody {
                has_reminder: value,
            },
        )
        .await
    }

    async fn update_style(&self, id: &str, update: StyleUpdate) -> Result<(), StorageError> {
        self.send_json(Method::PATCH, &message_path(id, "/style"), &update)
            .await
    }

    async fn get_settings(&self) -> Result<Settings, StorageError> {
        match self.fetch_settings().await {
            Ok(settings) => {
                if let Ok(mut cache) = self.settings_cache.lock() {
                    *cache = Some(settings.clone());
                }
                Ok(settings)
            }
            Err(err) => {
                tracing::warn!(error = %err, "settings unavailable, using last known or defaults");
                Ok(self
                    .settings_cache
                    .lock()
                    .ok()
                    .and_then(|cache| cache.clone())
                    .unwrap_or_default())
            }
        }
    }

    async fn put_settings(&self, settings: &Settings) -> Result<(), StorageError> {
        self.send_json(Method::PUT, "/settings", settings).await?;
        if let Ok(mut cache) = self.settings_cache.lock() {
            *cache = Some(settings.clone());
        }
        Ok(())
    }
}
