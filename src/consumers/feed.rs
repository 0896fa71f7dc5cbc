//! Feed change listener: post inserts, post updates, like inserts.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::backend::{ChangeFeed, ChangeSubscription, SubscriptionSpec};
use crate::error::Result;
use crate::models::{decode, tables, Like, Post};
use crate::services::feed::FeedEvent;

/// Owns the three feed subscriptions. Dropping the listener aborts the
/// forwarding tasks, which releases each subscription synchronously; any
/// event still in flight lands in a closed channel and is discarded.
pub struct FeedListener {
    tasks: Vec<JoinHandle<()>>,
}

impl FeedListener {
    pub async fn start(
        changes: &dyn ChangeFeed,
        events: mpsc::Sender<FeedEvent>,
    ) -> Result<Self> {
        let post_inserts = changes.subscribe(SubscriptionSpec::insert(tables::POST)).await?;
        let post_updates = changes.subscribe(SubscriptionSpec::update(tables::POST)).await?;
        let like_inserts = changes.subscribe(SubscriptionSpec::insert(tables::LIKES)).await?;

        let tasks = vec![
            tokio::spawn(forward_posts(post_inserts, events.clone(), true)),
            tokio::spawn(forward_posts(post_updates, events.clone(), false)),
            tokio::spawn(forward_likes(like_inserts, events)),
        ];
        Ok(Self { tasks })
    }
}

impl Drop for FeedListener {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

async fn forward_posts(
    mut subscription: ChangeSubscription,
    events: mpsc::Sender<FeedEvent>,
    inserted: bool,
) {
    while let Some(change) = subscription.next().await {
        let post: Post = match decode::row(tables::POST, change.row) {
            Ok(post) => post,
            Err(err) => {
                warn!(error = %err, "dropping malformed post change");
                continue;
            }
        };
        let event = if inserted {
            FeedEvent::PostCreated(post)
        } else {
            FeedEvent::PostUpdated(post)
        };
        if events.send(event).await.is_err() {
            break; // view gone
        }
    }
}

async fn forward_likes(mut subscription: ChangeSubscription, events: mpsc::Sender<FeedEvent>) {
    while let Some(change) = subscription.next().await {
        let like: Like = match decode::row(tables::LIKES, change.row) {
            Ok(like) => like,
            Err(err) => {
                warn!(error = %err, "dropping malformed like change");
                continue;
            }
        };
        if events
            .send(FeedEvent::LikeAdded { post_id: like.post_id })
            .await
            .is_err()
        {
            break;
        }
    }
}
