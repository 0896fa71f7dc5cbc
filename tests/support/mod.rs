//! Shared test fixture: an in-memory implementation of the backend seams
//! (relational store, object storage, auth, change feed) plus row builders
//! and watch-channel helpers.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use tideline::backend::{
    AuthBackend, AuthSession, AuthUser, ChangeEvent, ChangeFeed, ChangeSubscription, Credentials,
    DataBackend, Direction, EventKind, ObjectStore, SelectQuery, SubscriptionSpec,
};
use tideline::error::{Error, Result};
use tideline::services::session::Session;

struct Subscriber {
    id: u64,
    spec: SubscriptionSpec,
    tx: mpsc::Sender<ChangeEvent>,
}

struct Account {
    id: Uuid,
    email: String,
    password: String,
    token: String,
}

/// In-memory stand-in for the hosted project. Writes emit change events to
/// matching subscribers, the way the real backend's replication stream does.
#[derive(Default)]
pub struct MemoryBackend {
    tables: RwLock<HashMap<String, Vec<Value>>>,
    subscribers: Arc<Mutex<Vec<Subscriber>>>,
    objects: Mutex<HashMap<String, (Vec<u8>, String)>>,
    accounts: Mutex<Vec<Account>>,
    failing_tables: Mutex<HashSet<String>>,
    next_subscriber_id: AtomicU64,
}

impl MemoryBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn seed(&self, table: &str, rows: Vec<Value>) {
        self.tables
            .write()
            .unwrap()
            .entry(table.to_string())
            .or_default()
            .extend(rows);
    }

    /// Make every read (select/count) of `table` fail until cleared.
    pub fn fail_reads_on(&self, table: &str) {
        self.failing_tables.lock().unwrap().insert(table.to_string());
    }

    pub fn clear_read_failures(&self) {
        self.failing_tables.lock().unwrap().clear();
    }

    pub fn rows(&self, table: &str) -> Vec<Value> {
        self.tables
            .read()
            .unwrap()
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    pub fn object_count(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap().len()
    }

    pub fn register_account(&self, email: &str, password: &str) -> Uuid {
        let id = Uuid::new_v4();
        self.accounts.lock().unwrap().push(Account {
            id,
            email: email.to_string(),
            password: password.to_string(),
            token: Uuid::new_v4().to_string(),
        });
        id
    }

    /// Deliver a raw change event to matching subscribers, bypassing the
    /// table store. Lets tests replay or fabricate transport traffic.
    pub fn push_event(&self, event: ChangeEvent) {
        let subscribers = self.subscribers.lock().unwrap();
        for subscriber in subscribers.iter() {
            if spec_matches(&subscriber.spec, &event) {
                let _ = subscriber.tx.try_send(event.clone());
            }
        }
    }

    fn check_readable(&self, table: &str) -> Result<()> {
        if self.failing_tables.lock().unwrap().contains(table) {
            return Err(Error::Backend {
                status: 503,
                message: format!("injected read failure for {table}"),
            });
        }
        Ok(())
    }

    fn matching_rows(&self, query: &SelectQuery) -> Vec<Value> {
        let tables = self.tables.read().unwrap();
        let mut rows: Vec<Value> = tables
            .get(&query.table)
            .map(|rows| {
                rows.iter()
                    .filter(|row| row_matches(row, &query.filters))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        if let Some((column, direction)) = &query.order {
            rows.sort_by(|a, b| {
                let ordering = compare_values(a.get(column.as_str()), b.get(column.as_str()));
                match direction {
                    Direction::Asc => ordering,
                    Direction::Desc => ordering.reverse(),
                }
            });
        }
        if let Some(limit) = query.limit {
            rows.truncate(limit as usize);
        }
        rows
    }
}

fn row_matches(row: &Value, filters: &[(String, String)]) -> bool {
    filters
        .iter()
        .all(|(column, value)| field_equals(row.get(column.as_str()), value))
}

fn field_equals(field: Option<&Value>, expected: &str) -> bool {
    match field {
        Some(Value::String(s)) => s == expected,
        Some(Value::Number(n)) => n.to_string() == expected,
        Some(Value::Bool(b)) => b.to_string() == expected,
        Some(other) => other.to_string() == expected,
        None => false,
    }
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> std::cmp::Ordering {
    match (a, b) {
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(std::cmp::Ordering::Equal),
        _ => std::cmp::Ordering::Equal,
    }
}

fn spec_matches(spec: &SubscriptionSpec, event: &ChangeEvent) -> bool {
    if spec.table != event.table || spec.kind != event.kind {
        return false;
    }
    match &spec.filter {
        Some((column, value)) => field_equals(event.row.get(column.as_str()), value),
        None => true,
    }
}

#[async_trait]
impl DataBackend for MemoryBackend {
    async fn select(&self, query: SelectQuery) -> Result<Vec<Value>> {
        self.check_readable(&query.table)?;
        Ok(self.matching_rows(&query))
    }

    async fn select_one(&self, query: SelectQuery) -> Result<Option<Value>> {
        self.check_readable(&query.table)?;
        Ok(self.matching_rows(&query).into_iter().next())
    }

    async fn count(&self, query: SelectQuery) -> Result<u64> {
        self.check_readable(&query.table)?;
        Ok(self.matching_rows(&query).len() as u64)
    }

    async fn insert(&self, table: &str, rows: Vec<Value>) -> Result<Vec<Value>> {
        let mut created = Vec::with_capacity(rows.len());
        {
            let mut tables = self.tables.write().unwrap();
            let stored = tables.entry(table.to_string()).or_default();
            for mut row in rows {
                let fields = row
                    .as_object_mut()
                    .ok_or_else(|| Error::InvalidInput("row must be an object".to_string()))?;
                fields
                    .entry("id")
                    .or_insert_with(|| json!(Uuid::new_v4()));
                fields
                    .entry("created_at")
                    .or_insert_with(|| json!(Utc::now()));
                stored.push(row.clone());
                created.push(row);
            }
        }
        for row in &created {
            self.push_event(ChangeEvent {
                table: table.to_string(),
                kind: EventKind::Insert,
                row: row.clone(),
            });
        }
        Ok(created)
    }

    async fn update(
        &self,
        table: &str,
        filters: Vec<(String, String)>,
        patch: Value,
    ) -> Result<Vec<Value>> {
        let patch = patch
            .as_object()
            .ok_or_else(|| Error::InvalidInput("patch must be an object".to_string()))?
            .clone();
        let mut updated = Vec::new();
        {
            let mut tables = self.tables.write().unwrap();
            if let Some(rows) = tables.get_mut(table) {
                for row in rows.iter_mut().filter(|row| row_matches(row, &filters)) {
                    if let Some(fields) = row.as_object_mut() {
                        for (key, value) in &patch {
                            fields.insert(key.clone(), value.clone());
                        }
                    }
                    updated.push(row.clone());
                }
            }
        }
        for row in &updated {
            self.push_event(ChangeEvent {
                table: table.to_string(),
                kind: EventKind::Update,
                row: row.clone(),
            });
        }
        Ok(updated)
    }

    async fn delete(&self, table: &str, filters: Vec<(String, String)>) -> Result<u64> {
        let mut tables = self.tables.write().unwrap();
        let Some(rows) = tables.get_mut(table) else {
            return Ok(0);
        };
        let before = rows.len();
        rows.retain(|row| !row_matches(row, &filters));
        Ok((before - rows.len()) as u64)
    }
}

#[async_trait]
impl ObjectStore for MemoryBackend {
    async fn upload(
        &self,
        bucket: &str,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<()> {
        self.objects
            .lock()
            .unwrap()
            .insert(format!("{bucket}/{key}"), (bytes, content_type.to_string()));
        Ok(())
    }

    fn public_url(&self, bucket: &str, key: &str) -> String {
        format!("memory://{bucket}/{key}")
    }
}

#[async_trait]
impl AuthBackend for MemoryBackend {
    async fn sign_up(&self, credentials: &Credentials) -> Result<AuthUser> {
        let mut accounts = self.accounts.lock().unwrap();
        if accounts.iter().any(|a| a.email == credentials.email) {
            return Err(Error::Auth("email already registered".to_string()));
        }
        let account = Account {
            id: Uuid::new_v4(),
            email: credentials.email.clone(),
            password: credentials.password.clone(),
            token: Uuid::new_v4().to_string(),
        };
        let user = AuthUser {
            id: account.id,
            email: account.email.clone(),
        };
        accounts.push(account);
        Ok(user)
    }

    async fn sign_in(&self, credentials: &Credentials) -> Result<AuthSession> {
        let accounts = self.accounts.lock().unwrap();
        let account = accounts
            .iter()
            .find(|a| a.email == credentials.email && a.password == credentials.password)
            .ok_or_else(|| Error::Auth("invalid credentials".to_string()))?;
        Ok(AuthSession {
            user_id: account.id,
            email: account.email.clone(),
            access_token: account.token.clone(),
        })
    }

    async fn sign_out(&self, _access_token: &str) -> Result<()> {
        Ok(())
    }

    async fn current_user(&self, access_token: &str) -> Result<Option<AuthUser>> {
        let accounts = self.accounts.lock().unwrap();
        Ok(accounts
            .iter()
            .find(|a| a.token == access_token)
            .map(|a| AuthUser {
                id: a.id,
                email: a.email.clone(),
            }))
    }
}

#[async_trait]
impl ChangeFeed for MemoryBackend {
    async fn subscribe(&self, spec: SubscriptionSpec) -> Result<ChangeSubscription> {
        let id = self.next_subscriber_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(64);
        self.subscribers
            .lock()
            .unwrap()
            .push(Subscriber { id, spec, tx });

        let subscribers = self.subscribers.clone();
        Ok(ChangeSubscription::new(rx, move || {
            subscribers
                .lock()
                .unwrap()
                .retain(|subscriber| subscriber.id != id);
        }))
    }
}

// ---------------------------------------------------------------------------
// Row builders and helpers

pub fn post_row(id: Uuid, user_id: Uuid, title: &str, created_at: DateTime<Utc>) -> Value {
    json!({
        "id": id,
        "user_id": user_id,
        "title": title,
        "content": "body",
        "media_id": null,
        "is_featured": false,
        "created_at": created_at,
    })
}

pub fn like_row(user_id: Uuid, post_id: Uuid) -> Value {
    json!({
        "id": Uuid::new_v4(),
        "user_id": user_id,
        "post_id": post_id,
    })
}

pub fn comment_row(
    id: Uuid,
    post_id: Uuid,
    user_id: Uuid,
    content: &str,
    created_at: DateTime<Utc>,
) -> Value {
    json!({
        "id": id,
        "post_id": post_id,
        "user_id": user_id,
        "content": content,
        "created_at": created_at,
    })
}

pub fn user_row(id: Uuid, username: &str) -> Value {
    json!({
        "id": id,
        "username": username,
        "email": format!("{username}@example.com"),
        "profile_pic": null,
    })
}

pub fn session_for(user_id: Uuid) -> Session {
    Session {
        user_id,
        email: "tester@example.com".to_string(),
        access_token: "test-token".to_string(),
    }
}

/// Wait until a watch channel's value satisfies `predicate`, with a timeout
/// so a broken view fails the test instead of hanging it.
pub async fn wait_until<T, F>(rx: &mut watch::Receiver<T>, predicate: F) -> T
where
    T: Clone,
    F: Fn(&T) -> bool,
{
    if predicate(&rx.borrow()) {
        return rx.borrow().clone();
    }
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            rx.changed().await.expect("view task ended unexpectedly");
            if predicate(&rx.borrow()) {
                break;
            }
        }
    })
    .await
    .expect("watch channel never reached the expected state");
    rx.borrow().clone()
}
