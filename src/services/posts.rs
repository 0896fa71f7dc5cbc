//! Post authoring: create (with optional media upload), owner-scoped edit
//! and delete.

use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

use crate::backend::{DataBackend, ObjectStore};
use crate::error::{Error, Result};
use crate::models::{decode, tables, Media, Post};
use crate::services::session::Session;

#[derive(Debug, Clone)]
pub struct MediaUpload {
    pub file_name: String,
    pub content_type: mime::Mime,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct PostDraft {
    pub title: String,
    pub content: Option<String>,
    pub featured: bool,
    pub media: Option<MediaUpload>,
}

#[derive(Debug, Clone, Default)]
pub struct PostPatch {
    pub title: Option<String>,
    pub content: Option<String>,
}

pub struct PostService {
    data: Arc<dyn DataBackend>,
    store: Arc<dyn ObjectStore>,
    bucket: String,
}

impl PostService {
    pub fn new(
        data: Arc<dyn DataBackend>,
        store: Arc<dyn ObjectStore>,
        bucket: impl Into<String>,
    ) -> Self {
        Self {
            data,
            store,
            bucket: bucket.into(),
        }
    }

    /// Create a post owned by the session user. Media, when present, is
    /// uploaded and registered first; a failure there fails the whole
    /// operation (an already-uploaded object may remain orphaned, it is
    /// never cleaned up).
    pub async fn create_post(&self, session: &Session, draft: PostDraft) -> Result<Post> {
        if draft.title.trim().is_empty() {
            return Err(Error::InvalidInput("title is required".to_string()));
        }

        let media_id = match draft.media {
            Some(upload) => Some(self.store_media(upload).await?),
            None => None,
        };

        let rows = self
            .data
            .insert(
                tables::POST,
                vec![json!({
                    "user_id": session.user_id,
                    "title": draft.title,
                    "content": draft.content,
                    "media_id": media_id,
                    "is_featured": draft.featured,
                })],
            )
            .await?;
        first_row(tables::POST, rows)
    }

    /// Patch title/content, scoped to rows owned by the session user. A
    /// non-existent or foreign post matches nothing and maps to `NotFound`.
    pub async fn update_post(
        &self,
        session: &Session,
        post_id: Uuid,
        patch: PostPatch,
    ) -> Result<Post> {
        let mut fields = serde_json::Map::new();
        if let Some(title) = patch.title {
            if title.trim().is_empty() {
                return Err(Error::InvalidInput("title cannot be empty".to_string()));
            }
            fields.insert("title".to_string(), json!(title));
        }
        if let Some(content) = patch.content {
            fields.insert("content".to_string(), json!(content));
        }
        if fields.is_empty() {
            return Err(Error::InvalidInput("nothing to update".to_string()));
        }

        let rows = self
            .data
            .update(
                tables::POST,
                owner_filters(post_id, session),
                Value::Object(fields),
            )
            .await?;
        if rows.is_empty() {
            return Err(Error::NotFound(format!(
                "post {post_id} owned by {}",
                session.user_id
            )));
        }
        first_row(tables::POST, rows)
    }

    pub async fn delete_post(&self, session: &Session, post_id: Uuid) -> Result<()> {
        let affected = self
            .data
            .delete(tables::POST, owner_filters(post_id, session))
            .await?;
        if affected == 0 {
            return Err(Error::NotFound(format!(
                "post {post_id} owned by {}",
                session.user_id
            )));
        }
        Ok(())
    }

    /// Upload the bytes, resolve the public URL, and register the `Media`
    /// row, returning its id.
    async fn store_media(&self, upload: MediaUpload) -> Result<Uuid> {
        let key = object_key(&upload.file_name);
        self.store
            .upload(
                &self.bucket,
                &key,
                upload.bytes,
                upload.content_type.as_ref(),
            )
            .await?;
        let url = self.store.public_url(&self.bucket, &key);

        let rows = self
            .data
            .insert(
                tables::MEDIA,
                vec![json!({
                    "media_url": url,
                    "media_type": upload.content_type.to_string(),
                })],
            )
            .await?;
        let media: Media = first_row(tables::MEDIA, rows)?;
        Ok(media.id)
    }
}

fn owner_filters(post_id: Uuid, session: &Session) -> Vec<(String, String)> {
    vec![
        ("id".to_string(), post_id.to_string()),
        ("user_id".to_string(), session.user_id.to_string()),
    ]
}

fn first_row<T: serde::de::DeserializeOwned>(table: &str, rows: Vec<Value>) -> Result<T> {
    let row = rows.into_iter().next().ok_or_else(|| Error::Backend {
        status: 500,
        message: format!("{table} insert returned no representation"),
    })?;
    decode::row(table, row)
}

/// Object keys are the upload millis plus the sanitized file name, keeping
/// keys unique and free of characters the storage API rejects.
fn object_key(file_name: &str) -> String {
    format!("{}-{}", Utc::now().timestamp_millis(), sanitize_file_name(file_name))
}

fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect()
}
