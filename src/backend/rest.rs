//! REST implementation of the backend seams against a hosted project
//! exposing PostgREST-style data endpoints, GoTrue-style auth endpoints,
//! and a storage API with public-object URLs.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::RwLock;
use uuid::Uuid;

use crate::backend::{
    AuthBackend, AuthSession, AuthUser, Credentials, DataBackend, Direction, ObjectStore,
    SelectQuery,
};
use crate::config::BackendConfig;
use crate::error::{Error, Result};

pub struct RestBackend {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    /// Bearer token for the signed-in session, when one exists. Falls back
    /// to the project api key for anonymous access.
    access_token: RwLock<Option<String>>,
}

impl RestBackend {
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let http = reqwest::Client::builder().build()?;
        Ok(Self {
            http,
            base_url: config.url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            access_token: RwLock::new(None),
        })
    }

    /// Attach (or clear) the session token used for authorized calls.
    pub fn set_access_token(&self, token: Option<String>) {
        *self.access_token.write().expect("access token lock poisoned") = token;
    }

    fn bearer(&self) -> String {
        self.access_token
            .read()
            .expect("access token lock poisoned")
            .clone()
            .unwrap_or_else(|| self.api_key.clone())
    }

    fn rest_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .header("apikey", &self.api_key)
            .bearer_auth(self.bearer())
    }

    async fn ensure_ok(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(Error::Backend {
            status: status.as_u16(),
            message,
        })
    }
}

/// Render a [`SelectQuery`] as PostgREST query-string pairs:
/// `select=*`, `col=eq.val`, `order=col.desc`, `limit=n`.
fn encode_query(query: &SelectQuery) -> Vec<(String, String)> {
    let mut pairs = vec![("select".to_string(), query.columns.clone())];
    for (column, value) in &query.filters {
        pairs.push((column.clone(), format!("eq.{value}")));
    }
    if let Some((column, direction)) = &query.order {
        let direction = match direction {
            Direction::Asc => "asc",
            Direction::Desc => "desc",
        };
        pairs.push(("order".to_string(), format!("{column}.{direction}")));
    }
    if let Some(limit) = query.limit {
        pairs.push(("limit".to_string(), limit.to_string()));
    }
    pairs
}

/// Render equality filters for mutations (no projection clause).
fn encode_filters(filters: &[(String, String)]) -> Vec<(String, String)> {
    filters
        .iter()
        .map(|(column, value)| (column.clone(), format!("eq.{value}")))
        .collect()
}

/// Pull the total out of a `Content-Range` header such as `0-24/57` or `*/0`.
fn content_range_total(header: &str) -> Option<u64> {
    header.rsplit('/').next()?.parse().ok()
}

#[async_trait]
impl DataBackend for RestBackend {
    async fn select(&self, query: SelectQuery) -> Result<Vec<Value>> {
        let request = self
            .authed(self.http.get(self.rest_url(&query.table)))
            .query(&encode_query(&query));
        let response = Self::ensure_ok(request.send().await?).await?;
        Ok(response.json().await?)
    }

    async fn select_one(&self, query: SelectQuery) -> Result<Option<Value>> {
        let rows = self.select(query.limit(1)).await?;
        Ok(rows.into_iter().next())
    }

    async fn count(&self, query: SelectQuery) -> Result<u64> {
        let request = self
            .authed(self.http.head(self.rest_url(&query.table)))
            .header("Prefer", "count=exact")
            .query(&encode_query(&query));
        let response = Self::ensure_ok(request.send().await?).await?;
        response
            .headers()
            .get("content-range")
            .and_then(|value| value.to_str().ok())
            .and_then(content_range_total)
            .ok_or_else(|| Error::Backend {
                status: response.status().as_u16(),
                message: "count response carried no content-range total".to_string(),
            })
    }

    async fn insert(&self, table: &str, rows: Vec<Value>) -> Result<Vec<Value>> {
        let request = self
            .authed(self.http.post(self.rest_url(table)))
            .header("Prefer", "return=representation")
            .json(&rows);
        let response = Self::ensure_ok(request.send().await?).await?;
        Ok(response.json().await?)
    }

    async fn update(
        &self,
        table: &str,
        filters: Vec<(String, String)>,
        patch: Value,
    ) -> Result<Vec<Value>> {
        let request = self
            .authed(self.http.patch(self.rest_url(table)))
            .header("Prefer", "return=representation")
            .query(&encode_filters(&filters))
            .json(&patch);
        let response = Self::ensure_ok(request.send().await?).await?;
        Ok(response.json().await?)
    }

    async fn delete(&self, table: &str, filters: Vec<(String, String)>) -> Result<u64> {
        let request = self
            .authed(self.http.delete(self.rest_url(table)))
            .header("Prefer", "return=representation")
            .query(&encode_filters(&filters));
        let response = Self::ensure_ok(request.send().await?).await?;
        let rows: Vec<Value> = response.json().await?;
        Ok(rows.len() as u64)
    }
}

#[async_trait]
impl ObjectStore for RestBackend {
    async fn upload(
        &self,
        bucket: &str,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<()> {
        let url = format!("{}/storage/v1/object/{bucket}/{key}", self.base_url);
        let request = self
            .authed(self.http.post(url))
            .header("Content-Type", content_type)
            .body(bytes);
        Self::ensure_ok(request.send().await?)
            .await
            .map_err(|err| Error::Storage(err.to_string()))?;
        Ok(())
    }

    fn public_url(&self, bucket: &str, key: &str) -> String {
        format!("{}/storage/v1/object/public/{bucket}/{key}", self.base_url)
    }
}

/// GoTrue responses nest the identity either at the top level or under
/// `user` depending on the endpoint.
fn decode_auth_user(value: &Value) -> Result<AuthUser> {
    let user = value.get("user").unwrap_or(value);
    let id = user
        .get("id")
        .and_then(Value::as_str)
        .and_then(|raw| Uuid::parse_str(raw).ok())
        .ok_or_else(|| Error::Auth("auth response carried no user id".to_string()))?;
    let email = user
        .get("email")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    Ok(AuthUser { id, email })
}

#[async_trait]
impl AuthBackend for RestBackend {
    async fn sign_up(&self, credentials: &Credentials) -> Result<AuthUser> {
        let url = format!("{}/auth/v1/signup", self.base_url);
        let body = serde_json::json!({
            "email": credentials.email,
            "password": credentials.password,
        });
        let response = self
            .authed(self.http.post(url))
            .json(&body)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(Error::Auth(format!("sign-up rejected ({status}): {message}")));
        }
        decode_auth_user(&response.json::<Value>().await?)
    }

    async fn sign_in(&self, credentials: &Credentials) -> Result<AuthSession> {
        let url = format!("{}/auth/v1/token?grant_type=password", self.base_url);
        let body = serde_json::json!({
            "email": credentials.email,
            "password": credentials.password,
        });
        let response = self
            .authed(self.http.post(url))
            .json(&body)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(Error::Auth(format!("sign-in rejected ({status}): {message}")));
        }
        let payload: Value = response.json().await?;
        let access_token = payload
            .get("access_token")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Auth("token response carried no access token".to_string()))?
            .to_string();
        let user = decode_auth_user(&payload)?;
        self.set_access_token(Some(access_token.clone()));
        Ok(AuthSession {
            user_id: user.id,
            email: user.email,
            access_token,
        })
    }

    async fn sign_out(&self, access_token: &str) -> Result<()> {
        let url = format!("{}/auth/v1/logout", self.base_url);
        let request = self
            .http
            .post(url)
            .header("apikey", &self.api_key)
            .bearer_auth(access_token);
        Self::ensure_ok(request.send().await?).await?;
        self.set_access_token(None);
        Ok(())
    }

    async fn current_user(&self, access_token: &str) -> Result<Option<AuthUser>> {
        let url = format!("{}/auth/v1/user", self.base_url);
        let response = self
            .http
            .get(url)
            .header("apikey", &self.api_key)
            .bearer_auth(access_token)
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Ok(None);
        }
        let response = Self::ensure_ok(response).await?;
        Ok(Some(decode_auth_user(&response.json::<Value>().await?)?))
    }
}
