//! Integration tests for invalidation-tracked live queries.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use mentra_db::{
    DbError, LiveQuery, MentraDb, Poi, ShellAlias, ShellHistory, SubscriptionState, Table,
};
use pretty_assertions::assert_eq;

const SETTLE: Duration = Duration::from_millis(150);

fn alias(name: &str, target: &str) -> ShellAlias {
    ShellAlias {
        alias: name.to_string(),
        target: target.to_string(),
        description: None,
        created_at: 0,
    }
}

fn poi(name: &str) -> Poi {
    Poi {
        id: 0,
        name: name.to_string(),
        category: "park".to_string(),
        latitude: 0.0,
        longitude: 0.0,
        address: None,
        rating: None,
        is_favorite: false,
    }
}

async fn next<T>(live: &mut LiveQuery<T>) -> T {
    tokio::time::timeout(Duration::from_secs(2), live.next())
        .await
        .expect("live query did not emit")
        .expect("live query ended")
        .expect("live query failed")
}

async fn assert_quiet<T: std::fmt::Debug>(live: &mut LiveQuery<T>) {
    if let Ok(item) = tokio::time::timeout(SETTLE, live.next()).await {
        panic!("unexpected emission: {item:?}");
    }
}

#[tokio::test]
async fn emits_on_related_write_only() {
    let db = MentraDb::open_in_memory().await.unwrap();
    let mut live = db.shell_aliases().watch_all();

    assert_eq!(next(&mut live).await, Vec::<ShellAlias>::new());
    assert_eq!(live.state(), SubscriptionState::Active);

    db.shell_aliases().upsert(&alias("ll", "ls -la")).await.unwrap();
    assert_eq!(next(&mut live).await, vec![alias("ll", "ls -la")]);

    db.pois().insert(&poi("Vondelpark")).await.unwrap();
    assert_quiet(&mut live).await;
}

#[tokio::test]
async fn optional_shapes_emit_none_first() {
    let db = MentraDb::open_in_memory().await.unwrap();
    let mut live = db.profile().watch();
    assert_eq!(next(&mut live).await, None);

    db.profile().save(&Default::default()).await.unwrap();
    assert!(next(&mut live).await.is_some());
}

#[tokio::test]
async fn one_evaluation_per_transaction() {
    let db = MentraDb::open_in_memory().await.unwrap();
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = runs.clone();
    let mut live = db.subscribe(&[Table::ShellAliases, Table::ShellHistory], move |db| {
        counter.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move { db.shell_aliases().all().await })
    });
    next(&mut live).await;
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    db.transaction(|tx| {
        Box::pin(async move {
            for name in ["a", "b", "c"] {
                mentra_db::mapper::upsert(tx, &alias(name, "true"), "seed").await?;
            }
            let entry = ShellHistory {
                id: 0,
                command: "a".into(),
                original_language: None,
                translated_command: None,
                result: String::new(),
                success: true,
                timestamp: 1,
            };
            mentra_db::mapper::upsert(tx, &entry, "seed").await?;
            Ok(())
        })
    })
    .await
    .unwrap();

    assert_eq!(next(&mut live).await.len(), 3);
    assert_quiet(&mut live).await;
    assert_eq!(runs.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn clear_all_is_one_invalidation_pass() {
    let db = MentraDb::open_in_memory().await.unwrap();
    db.shell_aliases().upsert(&alias("ll", "ls -la")).await.unwrap();
    db.pois().insert(&poi("Vondelpark")).await.unwrap();
    db.profile().save(&Default::default()).await.unwrap();

    let runs = Arc::new(AtomicUsize::new(0));
    let counter = runs.clone();
    let mut live = db.subscribe(
        &[Table::ShellAliases, Table::Poi, Table::UserProfile],
        move |db| {
            counter.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move { Ok(db.stats().await?.total_rows()) })
        },
    );
    assert_eq!(next(&mut live).await, 3);

    db.clear_all().await.unwrap();

    assert_eq!(next(&mut live).await, 0);
    assert_quiet(&mut live).await;
    assert_eq!(runs.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn rolled_back_transaction_does_not_invalidate() {
    let db = MentraDb::open_in_memory().await.unwrap();
    let mut live = db.shell_aliases().watch_all();
    next(&mut live).await;

    let err = db
        .transaction(|tx| {
            Box::pin(async move {
                mentra_db::mapper::upsert(tx, &alias("gs", "git status"), "seed").await?;
                Err::<(), _>(DbError::invalid_data("test", "abort"))
            })
        })
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::InvalidData { .. }));

    assert_quiet(&mut live).await;
    assert!(db.shell_aliases().all().await.unwrap().is_empty());
}

#[tokio::test]
async fn search_subscription_tracks_matches() {
    let db = MentraDb::open_in_memory().await.unwrap();
    let mut live = db.shell_history().watch_search("git");
    assert!(next(&mut live).await.is_empty());

    let entry = ShellHistory {
        id: 0,
        command: "git pull".into(),
        original_language: Some("nl".into()),
        translated_command: Some("haal wijzigingen op".into()),
        result: "Already up to date.".into(),
        success: true,
        timestamp: 5,
    };
    db.shell_history().insert(&entry).await.unwrap();
    let hits = next(&mut live).await;
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].command, "git pull");
}

#[tokio::test]
async fn cancel_and_drop_detach_from_tables() {
    let db = MentraDb::open_in_memory().await.unwrap();
    let mut first = db.pois().watch_all();
    let second = db.pois().watch_favorites();
    next(&mut first).await;
    assert_eq!(db.live_query_count(), 2);

    first.cancel();
    assert_eq!(first.state(), SubscriptionState::Cancelled);
    assert!(first.next().await.is_none());

    drop(second);
    assert_eq!(db.live_query_count(), 0);

    // Writes after every subscriber left must still succeed.
    db.pois().insert(&poi("Park")).await.unwrap();
}

#[tokio::test]
async fn cancel_through_store_handle() {
    let db = MentraDb::open_in_memory().await.unwrap();
    let live = db.media().watch_all();
    assert_eq!(db.live_query_count(), 1);
    db.cancel(live);
    assert_eq!(db.live_query_count(), 0);
}
