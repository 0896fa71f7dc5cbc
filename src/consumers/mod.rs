//! Change listeners: one per view, each owning the realtime subscriptions
//! for its concerns and translating raw row changes into the typed events
//! the view task consumes.

mod feed;
mod thread;

pub use feed::FeedListener;
pub use thread::ThreadListener;

use tracing::warn;
use uuid::Uuid;

use crate::backend::{DataBackend, SelectQuery};
use crate::error::Result;
use crate::models::{decode, tables, UserProfile};

/// Resolve a user's profile for event enrichment. Lookup failure (or a
/// missing row) degrades to the placeholder identity rather than dropping
/// the event.
pub(crate) async fn profile_or_placeholder(data: &dyn DataBackend, user_id: Uuid) -> UserProfile {
    match fetch_profile(data, user_id).await {
        Ok(Some(profile)) => profile,
        Ok(None) => {
            warn!(%user_id, "no profile row for event author, using placeholder");
            UserProfile::placeholder(user_id)
        }
        Err(err) => {
            warn!(%user_id, error = %err, "profile lookup failed, using placeholder");
            UserProfile::placeholder(user_id)
        }
    }
}

async fn fetch_profile(data: &dyn DataBackend, user_id: Uuid) -> Result<Option<UserProfile>> {
    let row = data
        .select_one(SelectQuery::table(tables::USERS).eq("id", user_id))
        .await?;
    row.map(|value| decode::row(tables::USERS, value)).transpose()
}
