mod support;

use chrono::{Duration, Utc};
use support::{like_row, post_row, MemoryBackend};
use tideline::models::tables;
use tideline::services::feed::{FeedProjection, FeedQuery, InsertPolicy, SortKey};
use uuid::Uuid;

fn ids(projection: &FeedProjection) -> Vec<Uuid> {
    projection.posts().iter().map(|v| v.post.id).collect()
}

#[tokio::test]
async fn reload_sorts_by_likes_then_created_at() {
    let backend = MemoryBackend::new();
    let author = Uuid::new_v4();
    let a = Uuid::from_u128(1);
    let b = Uuid::from_u128(2);
    let t1 = Utc::now() - Duration::hours(2);
    let t2 = Utc::now() - Duration::hours(1);

    backend.seed(
        tables::POST,
        vec![post_row(a, author, "A", t1), post_row(b, author, "B", t2)],
    );
    backend.seed(
        tables::LIKES,
        vec![
            like_row(author, a),
            like_row(author, a),
            like_row(author, b),
            like_row(author, b),
            like_row(author, b),
            like_row(author, b),
            like_row(author, b),
        ],
    );

    let mut feed = FeedProjection::new(InsertPolicy::ShowImmediately);

    // A has 2 likes, B has 5 and is newer: both sorts yield [B, A].
    feed.reload(
        backend.as_ref(),
        FeedQuery { search: String::new(), sort: SortKey::Likes },
    )
    .await
    .unwrap();
    assert_eq!(ids(&feed), vec![b, a]);
    let likes: Vec<u64> = feed.posts().iter().map(|v| v.like_count).collect();
    assert_eq!(likes, vec![5, 2]);
    assert!(likes.windows(2).all(|w| w[0] >= w[1]));

    feed.reload(
        backend.as_ref(),
        FeedQuery { search: String::new(), sort: SortKey::CreatedAt },
    )
    .await
    .unwrap();
    assert_eq!(ids(&feed), vec![b, a]);
}

#[tokio::test]
async fn reload_breaks_ties_by_id_ascending() {
    let backend = MemoryBackend::new();
    let author = Uuid::new_v4();
    let t = Utc::now();
    let first = Uuid::from_u128(5);
    let second = Uuid::from_u128(9);

    // Same timestamp, no likes: ids decide, ascending.
    backend.seed(
        tables::POST,
        vec![
            post_row(second, author, "tie", t),
            post_row(first, author, "tie", t),
        ],
    );

    let mut feed = FeedProjection::new(InsertPolicy::ShowImmediately);
    feed.reload(
        backend.as_ref(),
        FeedQuery { search: String::new(), sort: SortKey::CreatedAt },
    )
    .await
    .unwrap();
    assert_eq!(ids(&feed), vec![first, second]);

    feed.reload(
        backend.as_ref(),
        FeedQuery { search: String::new(), sort: SortKey::Likes },
    )
    .await
    .unwrap();
    assert_eq!(ids(&feed), vec![first, second]);
}

#[tokio::test]
async fn search_filters_titles_case_insensitively() {
    let backend = MemoryBackend::new();
    let author = Uuid::new_v4();
    let t = Utc::now();
    let rust_post = Uuid::from_u128(1);
    let other = Uuid::from_u128(2);
    let shouting = Uuid::from_u128(3);

    backend.seed(
        tables::POST,
        vec![
            post_row(rust_post, author, "why rust rules", t),
            post_row(other, author, "gardening", t),
            post_row(shouting, author, "RUST AND YOU", t),
        ],
    );

    let mut feed = FeedProjection::new(InsertPolicy::ShowImmediately);
    feed.reload(
        backend.as_ref(),
        FeedQuery { search: "rust".to_string(), sort: SortKey::CreatedAt },
    )
    .await
    .unwrap();
    let mut matched = ids(&feed);
    matched.sort();
    let mut expected = vec![rust_post, shouting];
    expected.sort();
    assert_eq!(matched, expected);

    // Empty search matches everything.
    feed.reload(
        backend.as_ref(),
        FeedQuery { search: String::new(), sort: SortKey::CreatedAt },
    )
    .await
    .unwrap();
    assert_eq!(feed.posts().len(), 3);
}

#[tokio::test]
async fn failed_post_fetch_keeps_the_previous_list() {
    let backend = MemoryBackend::new();
    let author = Uuid::new_v4();
    let id = Uuid::from_u128(1);
    backend.seed(tables::POST, vec![post_row(id, author, "kept", Utc::now())]);

    let mut feed = FeedProjection::new(InsertPolicy::ShowImmediately);
    feed.reload(backend.as_ref(), FeedQuery::default()).await.unwrap();
    assert_eq!(feed.posts().len(), 1);

    backend.fail_reads_on(tables::POST);
    let err = feed
        .reload(backend.as_ref(), FeedQuery::default())
        .await
        .unwrap_err();
    assert!(matches!(err, tideline::Error::Backend { .. }));
    assert_eq!(ids(&feed), vec![id], "previous list must survive the failure");
}

#[tokio::test]
async fn failed_like_count_degrades_to_zero_without_aborting() {
    let backend = MemoryBackend::new();
    let author = Uuid::new_v4();
    let id = Uuid::from_u128(1);
    backend.seed(tables::POST, vec![post_row(id, author, "post", Utc::now())]);
    backend.seed(tables::LIKES, vec![like_row(author, id)]);
    backend.fail_reads_on(tables::LIKES);

    let mut feed = FeedProjection::new(InsertPolicy::ShowImmediately);
    feed.reload(backend.as_ref(), FeedQuery::default()).await.unwrap();
    assert_eq!(feed.posts().len(), 1);
    assert_eq!(feed.posts()[0].like_count, 0);
}
