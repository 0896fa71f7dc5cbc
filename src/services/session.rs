//! Session lifecycle. A [`Session`] is produced once at the composition
//! root and threaded explicitly to every operation that mutates data;
//! nothing here re-queries ambient auth state.

use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::backend::{AuthBackend, AuthUser, Credentials, DataBackend, SelectQuery};
use crate::error::{Error, Result};
use crate::models::{decode, tables, UserProfile};

/// The signed-in identity. Cheap to clone; dropped by the caller on
/// sign-out.
#[derive(Debug, Clone)]
pub struct Session {
    pub user_id: Uuid,
    pub email: String,
    pub access_token: String,
}

#[derive(Debug, Clone)]
pub struct NewProfile {
    pub username: String,
    pub profile_pic: Option<String>,
}

pub struct SessionService {
    auth: Arc<dyn AuthBackend>,
    data: Arc<dyn DataBackend>,
}

impl SessionService {
    pub fn new(auth: Arc<dyn AuthBackend>, data: Arc<dyn DataBackend>) -> Self {
        Self { auth, data }
    }

    /// Register with the auth provider, then insert the profile row sharing
    /// the auth identity's id. A profile-insert failure surfaces after the
    /// registration has already succeeded.
    pub async fn sign_up(
        &self,
        credentials: &Credentials,
        profile: NewProfile,
    ) -> Result<AuthUser> {
        if profile.username.trim().is_empty() {
            return Err(Error::InvalidInput("username is required".to_string()));
        }

        let user = self.auth.sign_up(credentials).await?;
        self.data
            .insert(
                tables::USERS,
                vec![json!({
                    "id": user.id,
                    "username": profile.username,
                    "email": user.email,
                    "profile_pic": profile.profile_pic,
                })],
            )
            .await?;
        Ok(user)
    }

    pub async fn sign_in(&self, credentials: &Credentials) -> Result<Session> {
        let session = self.auth.sign_in(credentials).await?;
        Ok(Session {
            user_id: session.user_id,
            email: session.email,
            access_token: session.access_token,
        })
    }

    pub async fn sign_out(&self, session: Session) -> Result<()> {
        self.auth.sign_out(&session.access_token).await
    }

    /// The session user's profile row, for display.
    pub async fn current_user(&self, session: &Session) -> Result<UserProfile> {
        let row = self
            .data
            .select_one(SelectQuery::table(tables::USERS).eq("id", session.user_id))
            .await?
            .ok_or_else(|| Error::NotFound(format!("profile for user {}", session.user_id)))?;
        decode::row(tables::USERS, row)
    }
}
