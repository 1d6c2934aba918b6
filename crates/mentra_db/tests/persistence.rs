//! File-backed store behavior: durability across reopen, schema guard,
//! and strict decoding of stored values.

use std::path::Path;
use std::time::Duration;

use chrono::NaiveDate;
use mentra_db::mapper;
use mentra_db::{
    ActivityRecord, ActivityType, DbError, HealthStats, MentraDb, Poi, ShellAlias, StoreConfig,
};
use pretty_assertions::assert_eq;

fn walk(timestamp: i64) -> ActivityRecord {
    ActivityRecord {
        id: 0,
        timestamp,
        activity_type: ActivityType::Walking,
        steps: 1_200,
        distance: 900.0,
        calories: 54.5,
        duration_ms: 600_000,
        confidence: 0.9,
    }
}

fn park() -> Poi {
    Poi {
        id: 0,
        name: "Vondelpark".to_string(),
        category: "park".to_string(),
        latitude: 52.358,
        longitude: 4.868,
        address: None,
        rating: Some(4.5),
        is_favorite: false,
    }
}

async fn open(path: &Path) -> MentraDb {
    MentraDb::open_path(path).await.unwrap()
}

#[tokio::test]
async fn data_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("mentra.db");

    let day = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
    let stats = HealthStats {
        date: day,
        total_steps: 8_000,
        total_distance: 6_100.0,
        total_calories: 320.0,
        active_minutes: 70,
        walking_minutes: 60,
        running_minutes: 10,
        cycling_minutes: 0,
    };

    let id = {
        let db = open(&path).await;
        db.health_stats().upsert(&stats).await.unwrap();
        let id = db.activities().insert(&walk(1_000)).await.unwrap();
        db.close().await;
        id
    };

    let db = open(&path).await;
    assert_eq!(db.health_stats().get_for_date(day).await.unwrap(), Some(stats));
    let stored = db.activities().get(id).await.unwrap().unwrap();
    assert_eq!(stored, ActivityRecord { id, ..walk(1_000) });
}

#[tokio::test]
async fn interrupted_batch_leaves_nothing_behind() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mentra.db");

    {
        let db = open(&path).await;
        let records: Vec<ActivityRecord> = (1..=5).map(|i| walk(i * 1_000)).collect();
        let interrupted = tokio::time::timeout(
            Duration::from_millis(50),
            db.transaction(move |tx| {
                Box::pin(async move {
                    for record in &records {
                        mapper::upsert(tx, record, "insert_many").await?;
                    }
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    Ok(())
                })
            }),
        )
        .await;
        assert!(interrupted.is_err());
        db.close().await;
    }

    let db = open(&path).await;
    assert!(db.activities().since(0).await.unwrap().is_empty());
}

#[tokio::test]
async fn foreign_schema_is_refused_then_reset() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mentra.db");

    {
        let db = open(&path).await;
        db.shell_aliases()
            .upsert(&ShellAlias {
                alias: "ll".into(),
                target: "ls -la".into(),
                description: None,
                created_at: 0,
            })
            .await
            .unwrap();
        sqlx::query("ALTER TABLE shell_aliases ADD COLUMN extra TEXT")
            .execute(db.pool())
            .await
            .unwrap();
        sqlx::query("UPDATE schema_fingerprint SET fingerprint_hash = 'stale'")
            .execute(db.pool())
            .await
            .unwrap();
        db.close().await;
    }

    let err = MentraDb::open_path(&path).await.unwrap_err();
    match err {
        DbError::SchemaMismatch { found, diff, .. } => {
            assert!(found.starts_with("stale"), "found = {found}");
            assert!(diff.to_string().contains("shell_aliases"));
        }
        other => panic!("expected schema mismatch, got {other}"),
    }

    let config = StoreConfig {
        reset_on_schema_mismatch: true,
        ..StoreConfig::file(&path)
    };
    let db = MentraDb::open(config).await.unwrap();
    assert!(db.shell_aliases().all().await.unwrap().is_empty());
    assert_eq!(db.stats().await.unwrap().total_rows(), 0);
}

#[tokio::test]
async fn unknown_enum_name_is_corrupt_data() {
    let db = MentraDb::open_in_memory().await.unwrap();
    let id = db.activities().insert(&walk(5)).await.unwrap();

    sqlx::query("UPDATE activity_records SET activity_type = 'SWIMMING'")
        .execute(db.pool())
        .await
        .unwrap();

    match db.activities().get(id).await.unwrap_err() {
        DbError::CorruptData {
            table,
            column,
            value,
            ..
        } => {
            assert_eq!(table, "activity_records");
            assert_eq!(column, "activity_type");
            assert!(value.contains("SWIMMING"));
        }
        other => panic!("expected corrupt data, got {other}"),
    }
}

#[tokio::test]
async fn out_of_range_boolean_is_corrupt_data() {
    let db = MentraDb::open_in_memory().await.unwrap();
    db.pois().insert(&park()).await.unwrap();

    sqlx::query("UPDATE poi SET is_favorite = 7")
        .execute(db.pool())
        .await
        .unwrap();

    let err = db.pois().all().await.unwrap_err();
    assert!(
        matches!(err, DbError::CorruptData { column: "is_favorite", .. }),
        "got {err}"
    );
}

#[tokio::test]
async fn duplicate_key_on_strict_insert() {
    let db = MentraDb::open_in_memory().await.unwrap();
    let alias = ShellAlias {
        alias: "gs".into(),
        target: "git status".into(),
        description: Some("status".into()),
        created_at: 1,
    };
    db.shell_aliases().create(&alias).await.unwrap();

    let err = db.shell_aliases().create(&alias).await.unwrap_err();
    assert!(matches!(
        err,
        DbError::ConstraintViolation {
            table: "shell_aliases",
            operation: "create",
            ..
        }
    ));
    assert_eq!(db.shell_aliases().all().await.unwrap(), vec![alias]);
}

#[tokio::test]
async fn clear_all_empties_every_table() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(&dir.path().join("mentra.db")).await;
    db.activities().insert(&walk(1)).await.unwrap();
    db.pois().insert(&park()).await.unwrap();
    db.profile().save(&Default::default()).await.unwrap();
    assert_eq!(db.stats().await.unwrap().total_rows(), 3);

    db.clear_all().await.unwrap();
    assert_eq!(db.stats().await.unwrap().total_rows(), 0);
    assert!(db.profile().get().await.unwrap().is_none());
}
