//! Trait seams over the hosted backend: relational queries, object storage,
//! auth, and realtime change subscriptions. Everything above this module
//! talks to these traits; [`rest`] and [`realtime`] are the production
//! implementations.

pub mod realtime;
pub mod rest;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::Result;

/// Sort direction for a [`SelectQuery`] order clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

/// A select against one relation: column projection, equality filters,
/// optional order and limit. Built fluently, encoded by the implementation.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectQuery {
    pub table: String,
    pub columns: String,
    pub filters: Vec<(String, String)>,
    pub order: Option<(String, Direction)>,
    pub limit: Option<u32>,
}

impl SelectQuery {
    pub fn table(name: impl Into<String>) -> Self {
        Self {
            table: name.into(),
            columns: "*".to_string(),
            filters: Vec::new(),
            order: None,
            limit: None,
        }
    }

    pub fn columns(mut self, columns: impl Into<String>) -> Self {
        self.columns = columns.into();
        self
    }

    pub fn eq(mut self, column: impl Into<String>, value: impl ToString) -> Self {
        self.filters.push((column.into(), value.to_string()));
        self
    }

    pub fn order_by(mut self, column: impl Into<String>, direction: Direction) -> Self {
        self.order = Some((column.into(), direction));
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Relational reads and writes. Rows are loosely-typed `Value`s; callers
/// decode them at the boundary via [`crate::models::decode`].
#[async_trait]
pub trait DataBackend: Send + Sync {
    async fn select(&self, query: SelectQuery) -> Result<Vec<Value>>;

    async fn select_one(&self, query: SelectQuery) -> Result<Option<Value>>;

    async fn count(&self, query: SelectQuery) -> Result<u64>;

    /// Insert rows, returning the created representations.
    async fn insert(&self, table: &str, rows: Vec<Value>) -> Result<Vec<Value>>;

    /// Patch every row matching the equality filters, returning the updated
    /// representations. Zero returned rows means nothing matched.
    async fn update(
        &self,
        table: &str,
        filters: Vec<(String, String)>,
        patch: Value,
    ) -> Result<Vec<Value>>;

    /// Delete every row matching the equality filters, returning how many
    /// rows were removed.
    async fn delete(&self, table: &str, filters: Vec<(String, String)>) -> Result<u64>;
}

/// Object storage: upload bytes under a key, resolve the public URL.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn upload(
        &self,
        bucket: &str,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<()>;

    fn public_url(&self, bucket: &str, key: &str) -> String;
}

#[derive(Debug, Clone)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AuthUser {
    pub id: Uuid,
    pub email: String,
}

#[derive(Debug, Clone)]
pub struct AuthSession {
    pub user_id: Uuid,
    pub email: String,
    pub access_token: String,
}

/// The auth provider's request/response surface. Session internals
/// (refresh, expiry) stay on the provider's side.
#[async_trait]
pub trait AuthBackend: Send + Sync {
    async fn sign_up(&self, credentials: &Credentials) -> Result<AuthUser>;

    async fn sign_in(&self, credentials: &Credentials) -> Result<AuthSession>;

    async fn sign_out(&self, access_token: &str) -> Result<()>;

    async fn current_user(&self, access_token: &str) -> Result<Option<AuthUser>>;
}

/// Which row-change kinds a subscription watches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Insert,
    Update,
}

/// One logical change subscription: a relation, an event kind, and an
/// optional server-side equality filter.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionSpec {
    pub table: String,
    pub kind: EventKind,
    pub filter: Option<(String, String)>,
}

impl SubscriptionSpec {
    pub fn insert(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            kind: EventKind::Insert,
            filter: None,
        }
    }

    pub fn update(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            kind: EventKind::Update,
            filter: None,
        }
    }

    pub fn filtered(mut self, column: impl Into<String>, value: impl ToString) -> Self {
        self.filter = Some((column.into(), value.to_string()));
        self
    }
}

/// A decoded row change delivered by the transport.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub table: String,
    pub kind: EventKind,
    pub row: Value,
}

/// An open subscription. Dropping it releases the server-side channel
/// synchronously; events arriving afterwards are discarded by the transport.
pub struct ChangeSubscription {
    events: mpsc::Receiver<ChangeEvent>,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl ChangeSubscription {
    pub fn new(
        events: mpsc::Receiver<ChangeEvent>,
        release: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            events,
            release: Some(Box::new(release)),
        }
    }

    /// Next event, or `None` once the transport has closed the stream.
    pub async fn next(&mut self) -> Option<ChangeEvent> {
        self.events.recv().await
    }
}

impl Drop for ChangeSubscription {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

/// Realtime change-notification transport.
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    async fn subscribe(&self, spec: SubscriptionSpec) -> Result<ChangeSubscription>;
}
