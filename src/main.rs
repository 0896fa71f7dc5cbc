//! Demo composition root: connect to the hosted project, stream the live
//! feed, and log snapshots as they change.

use std::sync::Arc;
use tideline::backend::realtime::RealtimeClient;
use tideline::backend::rest::RestBackend;
use tideline::config::Config;
use tideline::logging;
use tideline::services::feed::{FeedQuery, FeedView};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    logging::init_tracing();

    let config = Config::from_env()?;
    let data = Arc::new(RestBackend::new(&config.backend)?);
    let realtime = RealtimeClient::connect(&config.realtime.url, &config.backend.api_key).await?;

    let query = FeedQuery {
        search: String::new(),
        sort: config.feed.sort,
    };
    let feed = FeedView::spawn(data, &realtime, query, config.feed.insert_policy).await?;
    let mut snapshots = feed.snapshots();

    info!("feed ready, streaming updates (ctrl-c to exit)");
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let posts = snapshots.borrow_and_update().clone();
                info!(count = posts.len(), "feed updated");
                for view in posts.iter().take(10) {
                    info!(
                        id = %view.post.id,
                        likes = view.like_count,
                        title = %view.post.title,
                        "post"
                    );
                }
            }
        }
    }

    Ok(())
}
