//! Feed projection: the in-memory ordered list of visible posts, kept
//! current by a full reload plus incremental change events.
//!
//! [`FeedProjection`] is a pure state machine; [`FeedView`] wraps it in a
//! task that is the only writer of its state, consuming a command channel
//! and the typed event stream produced by the change listener.

use futures::future;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::error;
use uuid::Uuid;

use crate::backend::{ChangeFeed, DataBackend, SelectQuery};
use crate::consumers::FeedListener;
use crate::error::{Error, Result};
use crate::models::{decode, tables, Post, PostView};
use crate::services::likes;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    CreatedAt,
    Likes,
}

impl FromStr for SortKey {
    type Err = Error;

    fn from_str(raw: &str) -> Result<Self> {
        match raw {
            "created_at" => Ok(SortKey::CreatedAt),
            "likes" => Ok(SortKey::Likes),
            other => Err(Error::Config(format!("unknown sort key: {other}"))),
        }
    }
}

/// What happens to a freshly created post that reaches the feed through a
/// change event.
///
/// `ShowImmediately` prepends it regardless of the active search term and
/// sort position, so new posts are visible at once; the list regains full
/// consistency with the query on the next reload. `RespectQuery` filters
/// and re-sorts the way a reload would.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InsertPolicy {
    #[default]
    ShowImmediately,
    RespectQuery,
}

impl FromStr for InsertPolicy {
    type Err = Error;

    fn from_str(raw: &str) -> Result<Self> {
        match raw {
            "show_immediately" => Ok(InsertPolicy::ShowImmediately),
            "respect_query" => Ok(InsertPolicy::RespectQuery),
            other => Err(Error::Config(format!("unknown insert policy: {other}"))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FeedQuery {
    /// Case-insensitive title substring; empty matches everything.
    pub search: String,
    pub sort: SortKey,
}

impl Default for FeedQuery {
    fn default() -> Self {
        Self {
            search: String::new(),
            sort: SortKey::CreatedAt,
        }
    }
}

impl FeedQuery {
    fn matches(&self, post: &Post) -> bool {
        self.search.is_empty()
            || post
                .title
                .to_lowercase()
                .contains(&self.search.to_lowercase())
    }
}

/// Typed events the change listener feeds into the projection.
#[derive(Debug, Clone)]
pub enum FeedEvent {
    PostCreated(Post),
    PostUpdated(Post),
    LikeAdded { post_id: Uuid },
}

pub struct FeedProjection {
    posts: Vec<PostView>,
    query: FeedQuery,
    policy: InsertPolicy,
}

impl FeedProjection {
    pub fn new(policy: InsertPolicy) -> Self {
        Self {
            posts: Vec::new(),
            query: FeedQuery::default(),
            policy,
        }
    }

    pub fn posts(&self) -> &[PostView] {
        &self.posts
    }

    /// Full refetch: every post row, title-filtered, like-counts fanned out
    /// concurrently, then sorted. On a fetch or decode failure the previous
    /// list stays untouched and the error is returned for the caller to log.
    /// A single post's failed like-count degrades to 0 with a warning.
    pub async fn reload(&mut self, data: &dyn DataBackend, query: FeedQuery) -> Result<()> {
        let raw = data.select(SelectQuery::table(tables::POST)).await?;
        let posts: Vec<Post> = decode::rows(tables::POST, raw)?;

        let matching: Vec<Post> = posts.into_iter().filter(|p| query.matches(p)).collect();
        let counts = future::join_all(
            matching
                .iter()
                .map(|post| likes::count_for_post_or_zero(data, post.id)),
        )
        .await;

        let mut views: Vec<PostView> = matching
            .into_iter()
            .zip(counts)
            .map(|(post, like_count)| PostView { post, like_count })
            .collect();
        sort_posts(&mut views, query.sort);

        self.posts = views;
        self.query = query;
        Ok(())
    }

    pub fn apply(&mut self, event: FeedEvent) {
        match event {
            FeedEvent::PostCreated(post) => self.apply_insert(post),
            FeedEvent::PostUpdated(post) => self.apply_update(post),
            FeedEvent::LikeAdded { post_id } => self.apply_like(post_id),
        }
    }

    /// Admit a newly created post. Idempotent on the post id.
    pub fn apply_insert(&mut self, post: Post) {
        if self.posts.iter().any(|view| view.post.id == post.id) {
            return;
        }
        match self.policy {
            InsertPolicy::ShowImmediately => {
                self.posts.insert(0, PostView { post, like_count: 0 });
            }
            InsertPolicy::RespectQuery => {
                if !self.query.matches(&post) {
                    return;
                }
                self.posts.push(PostView { post, like_count: 0 });
                sort_posts(&mut self.posts, self.query.sort);
            }
        }
    }

    /// Replace a post's fields, preserving its computed like-count. No-op
    /// when the id is not in the list.
    pub fn apply_update(&mut self, post: Post) {
        let Some(entry) = self.posts.iter_mut().find(|view| view.post.id == post.id) else {
            return;
        };
        entry.post = post;
        if self.policy == InsertPolicy::RespectQuery {
            sort_posts(&mut self.posts, self.query.sort);
        }
    }

    /// Count one observed like event. Deliberately not idempotent: the
    /// transport delivers each event at most once per listener lifetime, so
    /// a replayed event is a genuine second like.
    pub fn apply_like(&mut self, post_id: Uuid) {
        let Some(entry) = self.posts.iter_mut().find(|view| view.post.id == post_id) else {
            return;
        };
        entry.like_count += 1;
        if self.policy == InsertPolicy::RespectQuery && self.query.sort == SortKey::Likes {
            sort_posts(&mut self.posts, self.query.sort);
        }
    }
}

/// Descending by the sort key; ties broken by id ascending so the order is
/// deterministic.
fn sort_posts(views: &mut [PostView], sort: SortKey) {
    match sort {
        SortKey::Likes => views.sort_by(|a, b| {
            b.like_count
                .cmp(&a.like_count)
                .then_with(|| a.post.id.cmp(&b.post.id))
        }),
        SortKey::CreatedAt => views.sort_by(|a, b| {
            b.post
                .created_at
                .cmp(&a.post.created_at)
                .then_with(|| a.post.id.cmp(&b.post.id))
        }),
    }
}

enum FeedCommand {
    Reload(FeedQuery),
}

/// Handle to a running feed view task. Dropping it closes the command
/// channel; the task then exits and its listener releases every
/// subscription.
pub struct FeedViewHandle {
    commands: mpsc::Sender<FeedCommand>,
    snapshots: watch::Receiver<Vec<PostView>>,
}

impl FeedViewHandle {
    pub async fn reload(&self, query: FeedQuery) -> Result<()> {
        self.commands
            .send(FeedCommand::Reload(query))
            .await
            .map_err(|_| Error::Subscription("feed view task stopped".to_string()))
    }

    pub fn snapshots(&self) -> watch::Receiver<Vec<PostView>> {
        self.snapshots.clone()
    }

    pub fn current(&self) -> Vec<PostView> {
        self.snapshots.borrow().clone()
    }
}

pub struct FeedView;

impl FeedView {
    /// Start the feed: open the change subscriptions, run the initial
    /// reload, then consume commands and events until the handle drops.
    pub async fn spawn(
        data: Arc<dyn DataBackend>,
        changes: &dyn ChangeFeed,
        query: FeedQuery,
        policy: InsertPolicy,
    ) -> Result<FeedViewHandle> {
        let (events_tx, mut events_rx) = mpsc::channel(64);
        let listener = FeedListener::start(changes, events_tx).await?;

        let (commands_tx, mut commands_rx) = mpsc::channel(8);
        let (snapshots_tx, snapshots_rx) = watch::channel(Vec::new());

        tokio::spawn(async move {
            // Held for the task's lifetime; releases the subscriptions on exit.
            let _listener = listener;
            let mut projection = FeedProjection::new(policy);

            if let Err(err) = projection.reload(data.as_ref(), query).await {
                error!(error = %err, "initial feed load failed");
            }
            let _ = snapshots_tx.send(projection.posts().to_vec());

            loop {
                tokio::select! {
                    command = commands_rx.recv() => match command {
                        Some(FeedCommand::Reload(query)) => {
                            if let Err(err) = projection.reload(data.as_ref(), query).await {
                                error!(error = %err, "feed reload failed, keeping previous list");
                            }
                            let _ = snapshots_tx.send(projection.posts().to_vec());
                        }
                        None => break,
                    },
                    event = events_rx.recv() => match event {
                        Some(event) => {
                            projection.apply(event);
                            let _ = snapshots_tx.send(projection.posts().to_vec());
                        }
                        None => break,
                    },
                }
            }
        });

        Ok(FeedViewHandle {
            commands: commands_tx,
            snapshots: snapshots_rx,
        })
    }
}
