//! Comment authoring. The thread projection is not touched here: the new
//! comment reaches it through the realtime subscription.

use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::backend::DataBackend;
use crate::error::{Error, Result};
use crate::models::{decode, tables, Comment};
use crate::services::session::Session;

pub struct CommentService {
    data: Arc<dyn DataBackend>,
}

impl CommentService {
    pub fn new(data: Arc<dyn DataBackend>) -> Self {
        Self { data }
    }

    pub async fn add_comment(
        &self,
        session: &Session,
        post_id: Uuid,
        content: &str,
    ) -> Result<Comment> {
        let content = content.trim();
        if content.is_empty() {
            return Err(Error::InvalidInput("comment cannot be empty".to_string()));
        }

        let rows = self
            .data
            .insert(
                tables::COMMENTS,
                vec![json!({
                    "post_id": post_id,
                    "user_id": session.user_id,
                    "content": content,
                })],
            )
            .await?;
        let row = rows.into_iter().next().ok_or_else(|| Error::Backend {
            status: 500,
            message: "comment insert returned no representation".to_string(),
        })?;
        decode::row(tables::COMMENTS, row)
    }
}
