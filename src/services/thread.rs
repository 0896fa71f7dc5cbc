//! Post detail (thread) aggregate: one post with its owner, media,
//! like-count, and full comment list, kept current by the per-thread
//! subscriptions.

use futures::future;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{error, warn};
use uuid::Uuid;

use crate::backend::{ChangeFeed, DataBackend, Direction, SelectQuery};
use crate::consumers::{profile_or_placeholder, ThreadListener};
use crate::error::{Error, Result};
use crate::models::{decode, tables, Comment, CommentView, Media, Post, UserProfile};
use crate::services::likes;

#[derive(Debug, Clone)]
pub struct ThreadSnapshot {
    pub post: Post,
    pub owner: UserProfile,
    pub media: Option<Media>,
    pub like_count: u64,
    pub comments: Vec<CommentView>,
}

#[derive(Debug, Clone)]
pub enum ThreadEvent {
    CommentAdded(CommentView),
    PostEdited(Post),
}

/// Load the full aggregate. The post row is fetched first; owner, media,
/// comments, and like-count then resolve concurrently. The query seam has
/// no join support, so the denormalized read decomposes into these lookups.
pub async fn load_thread(data: &dyn DataBackend, post_id: Uuid) -> Result<ThreadSnapshot> {
    let row = data
        .select_one(SelectQuery::table(tables::POST).eq("id", post_id))
        .await?
        .ok_or_else(|| Error::NotFound(format!("post {post_id}")))?;
    let post: Post = decode::row(tables::POST, row)?;

    let (owner, media, comments, like_count) = tokio::join!(
        profile_or_placeholder(data, post.user_id),
        fetch_media(data, post.media_id),
        fetch_comments(data, post_id),
        likes::count_for_post_or_zero(data, post_id),
    );

    Ok(ThreadSnapshot {
        post,
        owner,
        media,
        like_count,
        comments: comments?,
    })
}

/// Attached media degrades to `None` on a failed lookup; the rest of the
/// thread still renders.
async fn fetch_media(data: &dyn DataBackend, media_id: Option<Uuid>) -> Option<Media> {
    let media_id = media_id?;
    let row = match data
        .select_one(SelectQuery::table(tables::MEDIA).eq("id", media_id))
        .await
    {
        Ok(row) => row?,
        Err(err) => {
            warn!(%media_id, error = %err, "media lookup failed");
            return None;
        }
    };
    match decode::row(tables::MEDIA, row) {
        Ok(media) => Some(media),
        Err(err) => {
            warn!(%media_id, error = %err, "media row undecodable");
            None
        }
    }
}

async fn fetch_comments(data: &dyn DataBackend, post_id: Uuid) -> Result<Vec<CommentView>> {
    let rows = data
        .select(
            SelectQuery::table(tables::COMMENTS)
                .eq("post_id", post_id)
                .order_by("created_at", Direction::Asc),
        )
        .await?;
    let comments: Vec<Comment> = decode::rows(tables::COMMENTS, rows)?;

    let authors = future::join_all(
        comments
            .iter()
            .map(|comment| profile_or_placeholder(data, comment.user_id)),
    )
    .await;

    Ok(comments
        .into_iter()
        .zip(authors)
        .map(|(comment, author)| CommentView { comment, author })
        .collect())
}

pub struct ThreadProjection {
    snapshot: ThreadSnapshot,
}

impl ThreadProjection {
    pub fn new(snapshot: ThreadSnapshot) -> Self {
        Self { snapshot }
    }

    pub fn snapshot(&self) -> &ThreadSnapshot {
        &self.snapshot
    }

    pub fn apply(&mut self, event: ThreadEvent) {
        match event {
            ThreadEvent::CommentAdded(view) => self.apply_comment(view),
            ThreadEvent::PostEdited(post) => self.apply_edit(post),
        }
    }

    /// Append a new comment, deduplicated by id: the subscription can race
    /// the initial load for the same row.
    pub fn apply_comment(&mut self, view: CommentView) {
        if self
            .snapshot
            .comments
            .iter()
            .any(|existing| existing.comment.id == view.comment.id)
        {
            return;
        }
        self.snapshot.comments.push(view);
    }

    /// An edit event replaces title and content only; the comment list and
    /// like-count are owned by their own events.
    pub fn apply_edit(&mut self, post: Post) {
        if post.id != self.snapshot.post.id {
            return;
        }
        self.snapshot.post.title = post.title;
        self.snapshot.post.content = post.content;
    }
}

enum ThreadCommand {
    Reload,
}

pub struct ThreadViewHandle {
    commands: mpsc::Sender<ThreadCommand>,
    snapshots: watch::Receiver<ThreadSnapshot>,
}

impl ThreadViewHandle {
    pub async fn reload(&self) -> Result<()> {
        self.commands
            .send(ThreadCommand::Reload)
            .await
            .map_err(|_| Error::Subscription("thread view task stopped".to_string()))
    }

    pub fn snapshots(&self) -> watch::Receiver<ThreadSnapshot> {
        self.snapshots.clone()
    }

    pub fn current(&self) -> ThreadSnapshot {
        self.snapshots.borrow().clone()
    }
}

pub struct ThreadView;

impl ThreadView {
    /// Load the aggregate, open the two per-thread subscriptions, and run
    /// the view task until the handle drops.
    pub async fn spawn(
        data: Arc<dyn DataBackend>,
        changes: &dyn ChangeFeed,
        post_id: Uuid,
    ) -> Result<ThreadViewHandle> {
        let snapshot = load_thread(data.as_ref(), post_id).await?;

        let (events_tx, mut events_rx) = mpsc::channel(64);
        let listener = ThreadListener::start(changes, data.clone(), post_id, events_tx).await?;

        let (commands_tx, mut commands_rx) = mpsc::channel(8);
        let (snapshots_tx, snapshots_rx) = watch::channel(snapshot.clone());

        tokio::spawn(async move {
            let _listener = listener;
            let mut projection = ThreadProjection::new(snapshot);

            loop {
                tokio::select! {
                    command = commands_rx.recv() => match command {
                        Some(ThreadCommand::Reload) => {
                            match load_thread(data.as_ref(), post_id).await {
                                Ok(fresh) => projection = ThreadProjection::new(fresh),
                                Err(err) => {
                                    error!(%post_id, error = %err, "thread reload failed, keeping previous state");
                                }
                            }
                            let _ = snapshots_tx.send(projection.snapshot().clone());
                        }
                        None => break,
                    },
                    event = events_rx.recv() => match event {
                        Some(event) => {
                            projection.apply(event);
                            let _ = snapshots_tx.send(projection.snapshot().clone());
                        }
                        None => break,
                    },
                }
            }
        });

        Ok(ThreadViewHandle {
            commands: commands_tx,
            snapshots: snapshots_rx,
        })
    }
}
