use chrono::{TimeZone, Utc};
use mirror_bot::types::*;
use mirror_bot::{PostRepository, SqlitePostRepository};

async fn memory_repository() -> SqlitePostRepository {
    let repository = SqlitePostRepository::connect("sqlite::memory:")
        .await
        .expect("in-memory database should open");
    repository
        .init_schema()
        .await
        .expect("schema creation should succeed");
    repository
}

fn sample_post(post_id: &str, hour: u32) -> Post {
    Post {
        platform: PlatformType::Telegram,
        source_id: "some_channel".to_string(),
        post_id: post_id.to_string(),
        text: Some(format!("post {}", post_id)),
        media: Vec::new(),
        url: format!("https://t.me/some_channel/{}", post_id),
        author: None,
        created_at: Utc.with_ymd_and_hms(2024, 6, 1, hour, 0, 0).unwrap(),
        views: None,
        content_hash: None,
    }
}

#[tokio::test]
async fn test_create_then_exists_and_find() {
    let repository = memory_repository().await;
    let post = sample_post("100", 12);

    assert!(!repository.exists("hash-100").await.unwrap());

    let id = repository.create(&post, "hash-100").await.unwrap();
    assert!(id > 0);
    assert!(repository.exists("hash-100").await.unwrap());

    let record = repository
        .find("hash-100")
        .await
        .unwrap()
        .expect("record should exist");
    assert_eq!(record.id, id);
    assert_eq!(record.platform, "telegram");
    assert_eq!(record.source_id, "some_channel");
    assert_eq!(record.post_id, "100");
    assert_eq!(record.content_hash, "hash-100");
    assert_eq!(record.url, "https://t.me/some_channel/100");
    assert_eq!(record.created_at, post.created_at);
    assert!(!record.published);
    assert!(record.published_at.is_none());
    assert!(record.target_message_id.is_none());
    assert!(record.error_message.is_none());
}

#[tokio::test]
async fn test_duplicate_hash_is_rejected() {
    let repository = memory_repository().await;
    let post = sample_post("1", 10);

    repository.create(&post, "same-hash").await.unwrap();
    let err = repository
        .create(&sample_post("2", 11), "same-hash")
        .await
        .expect_err("second insert should collide");
    assert!(matches!(err, StoreError::DuplicateHash(h) if h == "same-hash"));
}

#[tokio::test]
async fn test_mark_published_updates_the_record() {
    let repository = memory_repository().await;
    repository
        .create(&sample_post("1", 10), "hash-1")
        .await
        .unwrap();

    repository.mark_published("hash-1", 555).await.unwrap();

    let record = repository.find("hash-1").await.unwrap().unwrap();
    assert!(record.published);
    assert_eq!(record.target_message_id, Some(555));
    assert!(record.published_at.is_some());
    assert!(record.error_message.is_none());
}

#[tokio::test]
async fn test_mark_failed_records_the_error_and_hides_the_row() {
    let repository = memory_repository().await;
    repository
        .create(&sample_post("1", 10), "hash-1")
        .await
        .unwrap();

    repository
        .mark_failed("hash-1", "Telegram API error 400: Bad Request")
        .await
        .unwrap();

    let record = repository.find("hash-1").await.unwrap().unwrap();
    assert!(!record.published);
    assert_eq!(
        record.error_message.as_deref(),
        Some("Telegram API error 400: Bad Request")
    );

    // failed records are terminal, so they are not pending either
    let pending = repository.list_unpublished(10).await.unwrap();
    assert!(pending.is_empty());
}

#[tokio::test]
async fn test_marking_an_unknown_hash_is_a_quiet_noop() {
    let repository = memory_repository().await;

    repository.mark_published("missing", 1).await.unwrap();
    repository.mark_failed("missing", "boom").await.unwrap();
    assert!(repository.find("missing").await.unwrap().is_none());
}

#[tokio::test]
async fn test_list_unpublished_is_oldest_first_and_limited() {
    let repository = memory_repository().await;
    repository
        .create(&sample_post("newest", 18), "hash-newest")
        .await
        .unwrap();
    repository
        .create(&sample_post("oldest", 8), "hash-oldest")
        .await
        .unwrap();
    repository
        .create(&sample_post("middle", 13), "hash-middle")
        .await
        .unwrap();

    let pending = repository.list_unpublished(10).await.unwrap();
    let ids: Vec<&str> = pending.iter().map(|r| r.post_id.as_str()).collect();
    assert_eq!(ids, ["oldest", "middle", "newest"]);

    let pending = repository.list_unpublished(2).await.unwrap();
    assert_eq!(pending.len(), 2);
    assert_eq!(pending[0].post_id, "oldest");

    repository.mark_published("hash-oldest", 1).await.unwrap();
    let pending = repository.list_unpublished(10).await.unwrap();
    let ids: Vec<&str> = pending.iter().map(|r| r.post_id.as_str()).collect();
    assert_eq!(ids, ["middle", "newest"]);
}

#[tokio::test]
async fn test_close_is_clean() {
    let repository = memory_repository().await;
    repository
        .create(&sample_post("1", 10), "hash-1")
        .await
        .unwrap();
    repository.close().await.unwrap();
}
