use super::*;

async fn make_index() -> LocalIndex {
    let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
    let index = LocalIndex::from_pool(pool);
    index.init().await.unwrap();
    index
}

fn record(id: &str, title: &str, artist: &str) -> LocalRecord {
    LocalRecord {
        id: id.into(),
        title: title.into(),
        artist: artist.into(),
        path: Some(PathBuf::from(format!("/music/{title} - {artist}.mp3"))),
        added_at: 1_700_000_000,
    }
}

#[tokio::test]
async fn put_and_get_record() {
    let index = make_index().await;
    let rec = record("a", "X", "Y");

    index.put(&rec).await.unwrap();

    assert!(index.contains("a").await.unwrap());
    assert_eq!(index.get("a").await.unwrap(), Some(rec));
}

#[tokio::test]
async fn put_is_idempotent_and_keeps_first_row() {
    let index = make_index().await;
    index.put(&record("a", "X", "Y")).await.unwrap();

    let mut again = record("a", "Other", "Name");
    again.added_at = 1_800_000_000;
    index.put(&again).await.unwrap();

    assert_eq!(index.len().await.unwrap(), 1);
    let stored = index.get("a").await.unwrap().unwrap();
    assert_eq!(stored.title, "X");
    assert_eq!(stored.added_at, 1_700_000_000);
}

#[tokio::test]
async fn delete_missing_id_is_noop() {
    let index = make_index().await;
    index.put(&record("a", "X", "Y")).await.unwrap();

    assert!(!index.delete("missing").await.unwrap());
    assert!(index.delete("a").await.unwrap());
    assert!(!index.delete("a").await.unwrap());
    assert!(index.is_empty().await.unwrap());
}

#[tokio::test]
async fn contains_is_false_for_unknown_id() {
    let index = make_index().await;
    assert!(!index.contains("nope").await.unwrap());
    assert_eq!(index.get("nope").await.unwrap(), None);
}

#[tokio::test]
async fn list_all_orders_by_insertion_time() {
    let index = make_index().await;
    let mut late = record("b", "B", "Y");
    late.added_at = 20;
    let mut early = record("a", "A", "Y");
    early.added_at = 10;
    index.put(&late).await.unwrap();
    index.put(&early).await.unwrap();

    let ids: Vec<_> = index
        .list_all()
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.id)
        .collect();
    assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);
    assert_eq!(
        index.list_ids().await.unwrap(),
        HashSet::from(["a".to_string(), "b".to_string()])
    );
}

#[tokio::test]
async fn rows_without_path_round_trip_as_none() {
    let index = make_index().await;
    let mut legacy = record("a", "X", "Y");
    legacy.path = None;
    index.put(&legacy).await.unwrap();

    assert_eq!(index.get("a").await.unwrap().unwrap().path, None);
}

#[tokio::test]
async fn operations_fail_once_the_pool_is_closed() {
    let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
    let index = LocalIndex::from_pool(pool.clone());
    index.init().await.unwrap();
    index.put(&record("a", "X", "Y")).await.unwrap();
    pool.close().await;

    assert!(matches!(
        index.put(&record("b", "X", "Y")).await,
        Err(IndexError::Sqlx(_))
    ));
    assert!(index.contains("a").await.is_err());
}

#[tokio::test]
async fn open_creates_database_file_and_parent_dirs() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("nested").join("index.db");

    let index = LocalIndex::open(&db_path).await.unwrap();
    index.put(&record("a", "X", "Y")).await.unwrap();

    assert!(db_path.exists());
    let reopened = LocalIndex::open(&db_path).await.unwrap();
    assert!(reopened.contains("a").await.unwrap());
}

#[tokio::test]
async fn counts_records_sharing_a_path() {
    let index = make_index().await;
    index.put(&record("a", "X", "Y")).await.unwrap();
    index.put(&record("b", "X", "Y")).await.unwrap();
    index.put(&record("c", "Z", "Y")).await.unwrap();

    assert_eq!(
        index
            .count_with_path(Path::new("/music/X - Y.mp3"))
            .await
            .unwrap(),
        2
    );
    assert_eq!(
        index
            .count_with_path(Path::new("/music/absent.mp3"))
            .await
            .unwrap(),
        0
    );
}
