//! Integration tests for the transaction coordinator.

use std::time::Duration;

use mentra_db::mapper;
use mentra_db::{DbError, MediaItem, MentraDb, ShellAlias, StoreConfig};
use pretty_assertions::assert_eq;

fn alias(name: &str) -> ShellAlias {
    ShellAlias {
        alias: name.to_string(),
        target: format!("echo {name}"),
        description: None,
        created_at: 0,
    }
}

fn track(id: &str) -> MediaItem {
    MediaItem {
        id: id.to_string(),
        title: id.to_uppercase(),
        artist: None,
        album: None,
        genre: None,
        duration_ms: 1_000,
        file_path: format!("/sdcard/Music/{id}.mp3"),
        mime_type: "audio/mpeg".to_string(),
        size_bytes: 10,
        date_added: 0,
        date_modified: 0,
        album_art_path: None,
        play_count: 0,
        last_played: None,
        is_favorite: false,
    }
}

#[tokio::test]
async fn nested_transactions_join_the_outer_one() {
    let db = MentraDb::open_in_memory().await.unwrap();

    let err = db
        .transaction(|tx| {
            Box::pin(async move {
                mapper::upsert(tx, &alias("outer"), "test").await?;
                tx.transaction(|tx| {
                    Box::pin(async move {
                        assert_eq!(tx.depth(), 1);
                        mapper::upsert(tx, &alias("inner"), "test").await?;
                        Ok(())
                    })
                })
                .await?;
                assert_eq!(tx.depth(), 0);
                Err::<(), _>(DbError::invalid_data("test", "fail after nested commit"))
            })
        })
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::InvalidData { .. }));

    // The nested work did not commit on its own.
    assert!(db.shell_aliases().all().await.unwrap().is_empty());
}

#[tokio::test]
async fn store_calls_inside_work_join_the_open_transaction() {
    let db = MentraDb::open_in_memory().await.unwrap();
    let inner = db.clone();

    let seen = tokio::time::timeout(
        Duration::from_secs(3),
        db.transaction(move |tx| {
            Box::pin(async move {
                assert!(inner.in_transaction());
                inner.shell_aliases().upsert(&alias("ll")).await?;
                inner
                    .transaction(|nested| {
                        Box::pin(async move {
                            assert_eq!(nested.depth(), 1);
                            mapper::upsert(nested, &alias("la"), "test").await?;
                            Ok(())
                        })
                    })
                    .await?;
                mapper::upsert(tx, &track("song"), "test").await?;
                let names: Vec<String> = inner
                    .shell_aliases()
                    .all()
                    .await?
                    .into_iter()
                    .map(|a| a.alias)
                    .collect();
                Ok((names, tx.written()))
            })
        }),
    )
    .await
    .expect("joined store calls must not wait on the write gate")
    .unwrap();

    let (names, written) = seen;
    assert_eq!(names, vec!["la".to_string(), "ll".to_string()]);
    let tables: Vec<&str> = written.iter().map(|t| t.name()).collect();
    assert_eq!(tables, vec!["media_items", "shell_aliases"]);
    assert!(!db.in_transaction());
    assert_eq!(db.shell_aliases().all().await.unwrap().len(), 2);
}

#[tokio::test]
async fn joined_store_writes_roll_back_with_the_outer_work() {
    let db = MentraDb::open_in_memory().await.unwrap();
    let inner = db.clone();

    let err = tokio::time::timeout(
        Duration::from_secs(3),
        db.transaction(move |_tx| {
            Box::pin(async move {
                inner.shell_aliases().upsert(&alias("ghost")).await?;
                inner.media().upsert(&track("ghost")).await?;
                Err::<(), _>(DbError::invalid_data("test", "abort after joined writes"))
            })
        }),
    )
    .await
    .expect("joined store calls must not wait on the write gate")
    .unwrap_err();
    assert!(matches!(err, DbError::InvalidData { .. }));

    assert!(db.shell_aliases().all().await.unwrap().is_empty());
    assert!(db.media().all().await.unwrap().is_empty());
}

#[tokio::test]
async fn maintenance_inside_work_is_refused() {
    let db = MentraDb::open_in_memory().await.unwrap();
    let inner = db.clone();

    let err = tokio::time::timeout(
        Duration::from_secs(3),
        db.transaction(move |_tx| Box::pin(async move { inner.clear_all().await })),
    )
    .await
    .expect("maintenance inside work must not wait on the write gate")
    .unwrap_err();
    assert!(matches!(
        err,
        DbError::InTransaction {
            operation: "clear_all"
        }
    ));
}

#[tokio::test]
async fn other_stores_do_not_join() {
    let db = MentraDb::open_in_memory().await.unwrap();
    let other = MentraDb::open_in_memory().await.unwrap();
    let side = other.clone();

    let err = db
        .transaction(move |tx| {
            Box::pin(async move {
                assert!(!side.in_transaction());
                side.shell_aliases().upsert(&alias("kept")).await?;
                mapper::upsert(tx, &alias("dropped"), "test").await?;
                Err::<(), _>(DbError::invalid_data("test", "abort"))
            })
        })
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::InvalidData { .. }));

    assert!(db.shell_aliases().all().await.unwrap().is_empty());
    assert_eq!(other.shell_aliases().all().await.unwrap(), vec![alias("kept")]);
}

#[tokio::test]
async fn error_propagates_unchanged_and_rolls_back() {
    let db = MentraDb::open_in_memory().await.unwrap();
    db.shell_aliases().create(&alias("ll")).await.unwrap();

    let err = db
        .transaction(|tx| {
            Box::pin(async move {
                mapper::upsert(tx, &alias("la"), "test").await?;
                mapper::insert_strict(tx, &alias("ll"), "test").await?;
                Ok(())
            })
        })
        .await
        .unwrap_err();
    match err {
        DbError::ConstraintViolation { table, key, .. } => {
            assert_eq!(table, "shell_aliases");
            assert_eq!(key.as_deref(), Some("'ll'"));
        }
        other => panic!("expected constraint violation, got {other}"),
    }

    let names: Vec<String> = db
        .shell_aliases()
        .all()
        .await
        .unwrap()
        .into_iter()
        .map(|a| a.alias)
        .collect();
    assert_eq!(names, vec!["ll".to_string()]);
}

#[tokio::test]
async fn written_tables_are_recorded() {
    let db = MentraDb::open_in_memory().await.unwrap();
    let written = db
        .transaction(|tx| {
            Box::pin(async move {
                mapper::upsert(tx, &alias("x"), "test").await?;
                mapper::upsert(tx, &track("y"), "test").await?;
                Ok(tx.written())
            })
        })
        .await
        .unwrap();
    let names: Vec<&str> = written.iter().map(|t| t.name()).collect();
    assert_eq!(names, vec!["media_items", "shell_aliases"]);
}

#[tokio::test]
async fn concurrent_play_count_increments_are_serialized() {
    let db = MentraDb::open_in_memory().await.unwrap();
    db.media().upsert(&track("song")).await.unwrap();

    let tasks: Vec<_> = (0..50)
        .map(|i| {
            let db = db.clone();
            tokio::spawn(async move { db.media().increment_play_count("song", i).await })
        })
        .collect();
    for task in tasks {
        assert!(task.await.unwrap().unwrap());
    }

    let item = db.media().get("song").await.unwrap().unwrap();
    assert_eq!(item.play_count, 50);
    assert!(item.last_played.is_some());
}

#[tokio::test]
async fn concurrent_writers_on_a_file_store() {
    let dir = tempfile::tempdir().unwrap();
    let config = StoreConfig {
        max_read_connections: 4,
        ..StoreConfig::file(dir.path().join("mentra.db"))
    };
    let db = MentraDb::open(config).await.unwrap();
    db.media().upsert(&track("song")).await.unwrap();

    let tasks: Vec<_> = (0..50)
        .map(|i| {
            let db = db.clone();
            tokio::spawn(async move {
                db.media().increment_play_count("song", i).await?;
                db.media().get("song").await
            })
        })
        .collect();
    for task in tasks {
        assert!(task.await.unwrap().unwrap().is_some());
    }

    assert_eq!(db.media().get("song").await.unwrap().unwrap().play_count, 50);
    db.close().await;
}

#[tokio::test]
async fn abandoned_work_rolls_back() {
    let db = MentraDb::open_in_memory().await.unwrap();

    let abandoned = tokio::time::timeout(
        Duration::from_millis(50),
        db.transaction(|tx| {
            Box::pin(async move {
                mapper::upsert(tx, &alias("ghost"), "test").await?;
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(())
            })
        }),
    )
    .await;
    assert!(abandoned.is_err());

    // The gate was released and the partial write is gone.
    db.shell_aliases().upsert(&alias("real")).await.unwrap();
    let names: Vec<String> = db
        .shell_aliases()
        .all()
        .await
        .unwrap()
        .into_iter()
        .map(|a| a.alias)
        .collect();
    assert_eq!(names, vec!["real".to_string()]);
}

#[tokio::test]
async fn statement_templates_are_reused() {
    let db = MentraDb::open_in_memory().await.unwrap();
    for name in ["a", "b", "c"] {
        db.shell_aliases().upsert(&alias(name)).await.unwrap();
    }
    let stats = db.statement_stats();
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hits, 2);
}
