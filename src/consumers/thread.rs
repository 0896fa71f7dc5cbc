//! Thread change listener: new comments on one post (enriched with the
//! commenter's profile) and edits to that post.

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;
use uuid::Uuid;

use crate::backend::{ChangeFeed, ChangeSubscription, DataBackend, SubscriptionSpec};
use crate::consumers::profile_or_placeholder;
use crate::error::Result;
use crate::models::{decode, tables, Comment, CommentView, Post};
use crate::services::thread::ThreadEvent;

pub struct ThreadListener {
    tasks: Vec<JoinHandle<()>>,
}

impl ThreadListener {
    pub async fn start(
        changes: &dyn ChangeFeed,
        data: Arc<dyn DataBackend>,
        post_id: Uuid,
        events: mpsc::Sender<ThreadEvent>,
    ) -> Result<Self> {
        let comment_inserts = changes
            .subscribe(SubscriptionSpec::insert(tables::COMMENTS).filtered("post_id", post_id))
            .await?;
        let post_updates = changes
            .subscribe(SubscriptionSpec::update(tables::POST).filtered("id", post_id))
            .await?;

        let tasks = vec![
            tokio::spawn(forward_comments(comment_inserts, data, events.clone())),
            tokio::spawn(forward_edits(post_updates, events)),
        ];
        Ok(Self { tasks })
    }
}

impl Drop for ThreadListener {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

async fn forward_comments(
    mut subscription: ChangeSubscription,
    data: Arc<dyn DataBackend>,
    events: mpsc::Sender<ThreadEvent>,
) {
    while let Some(change) = subscription.next().await {
        let comment: Comment = match decode::row(tables::COMMENTS, change.row) {
            Ok(comment) => comment,
            Err(err) => {
                warn!(error = %err, "dropping malformed comment change");
                continue;
            }
        };
        let author = profile_or_placeholder(data.as_ref(), comment.user_id).await;
        let view = CommentView { comment, author };
        if events.send(ThreadEvent::CommentAdded(view)).await.is_err() {
            break;
        }
    }
}

async fn forward_edits(mut subscription: ChangeSubscription, events: mpsc::Sender<ThreadEvent>) {
    while let Some(change) = subscription.next().await {
        let post: Post = match decode::row(tables::POST, change.row) {
            Ok(post) => post,
            Err(err) => {
                warn!(error = %err, "dropping malformed post change");
                continue;
            }
        };
        if events.send(ThreadEvent::PostEdited(post)).await.is_err() {
            break;
        }
    }
}
