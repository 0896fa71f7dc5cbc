//! Typed entities for the hosted project's relations, plus the composed
//! view types the projections hand to callers.
//!
//! Rows cross the `DataBackend` boundary as `serde_json::Value`; everything
//! past that boundary is one of the types below, produced by [`decode`].

pub mod decode;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Relation names as provisioned in the hosted project.
pub mod tables {
    pub const POST: &str = "Post";
    pub const LIKES: &str = "Likes";
    pub const COMMENTS: &str = "Comments";
    pub const USERS: &str = "Users";
    pub const MEDIA: &str = "Media";
}

/// A post row. The like-count is derived from `Likes` rows, never stored here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub content: Option<String>,
    pub media_id: Option<Uuid>,
    #[serde(default)]
    pub is_featured: bool,
    pub created_at: DateTime<Utc>,
}

/// A like row. Immutable once created; there is no unlike.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Like {
    pub id: Uuid,
    pub user_id: Uuid,
    pub post_id: Uuid,
}

/// A comment row. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: Uuid,
    pub post_id: Uuid,
    pub user_id: Uuid,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// A media row: uploaded object plus its public URL and MIME type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Media {
    pub id: Uuid,
    pub media_url: String,
    pub media_type: String,
}

/// A profile row from `Users`. The id is shared with the auth identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: Uuid,
    pub username: String,
    #[serde(default)]
    pub email: String,
    pub profile_pic: Option<String>,
}

impl UserProfile {
    /// Identity attached to an event whose author lookup failed.
    pub fn placeholder(id: Uuid) -> Self {
        Self {
            id,
            username: "Anonymous".to_string(),
            email: String::new(),
            profile_pic: None,
        }
    }
}

/// A post with its derived like-count attached, as held by the feed.
#[derive(Debug, Clone, PartialEq)]
pub struct PostView {
    pub post: Post,
    pub like_count: u64,
}

/// A comment with its author's profile resolved for display.
#[derive(Debug, Clone, PartialEq)]
pub struct CommentView {
    pub comment: Comment,
    pub author: UserProfile,
}
