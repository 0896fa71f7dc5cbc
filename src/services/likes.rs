//! Like operations. One like per (user, post): the check-then-insert is
//! best-effort at the client, so a race can still store a second row; the
//! projections count whatever rows exist.

use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

use crate::backend::{DataBackend, SelectQuery};
use crate::error::Result;
use crate::models::tables;
use crate::services::session::Session;

/// Count `Likes` rows for one post.
pub(crate) async fn count_for_post(data: &dyn DataBackend, post_id: Uuid) -> Result<u64> {
    data.count(SelectQuery::table(tables::LIKES).eq("post_id", post_id))
        .await
}

/// Count, degrading to 0 with a warning when the read fails. Read failures
/// never abort the surrounding load.
pub(crate) async fn count_for_post_or_zero(data: &dyn DataBackend, post_id: Uuid) -> u64 {
    match count_for_post(data, post_id).await {
        Ok(count) => count,
        Err(err) => {
            warn!(%post_id, error = %err, "like count fetch failed, defaulting to 0");
            0
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LikeOutcome {
    pub already_liked: bool,
}

pub struct LikeService {
    data: Arc<dyn DataBackend>,
}

impl LikeService {
    pub fn new(data: Arc<dyn DataBackend>) -> Self {
        Self { data }
    }

    /// Like a post on behalf of the session user. Idempotent at the client:
    /// an existing like short-circuits without inserting.
    pub async fn like_post(&self, session: &Session, post_id: Uuid) -> Result<LikeOutcome> {
        let existing = self
            .data
            .select_one(
                SelectQuery::table(tables::LIKES)
                    .eq("post_id", post_id)
                    .eq("user_id", session.user_id),
            )
            .await?;
        if existing.is_some() {
            return Ok(LikeOutcome { already_liked: true });
        }

        self.data
            .insert(
                tables::LIKES,
                vec![serde_json::json!({
                    "user_id": session.user_id,
                    "post_id": post_id,
                })],
            )
            .await?;
        Ok(LikeOutcome { already_liked: false })
    }

    pub async fn like_count(&self, post_id: Uuid) -> Result<u64> {
        count_for_post(self.data.as_ref(), post_id).await
    }
}
