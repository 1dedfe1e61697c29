use crate::auth::AuthService;
use crate::config::Config;
use crate::db::{Database, Document, NewActivity, NewProgress, StreakWindow, User, now_timestamp};
use crate::error::AppError;
use crate::server::{AppState, create_router};
use crate::stats::{self, Metric, Period, RefreshScheduler};
use crate::sync::{
    self, ActivityItem, ActivityRequest, DocumentPushRequest, LastSyncRequest, ProgressRequest,
    ReconcileRequest,
};
use axum::Router;
use axum::body::{Body, Bytes};
use axum::http::{Request, StatusCode, header};
use chrono::Utc;
use futures_util::{Stream, stream};
use serde_json::{Value, json};
use std::convert::Infallible;
use std::path::Path;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

const DAY: i64 = 86_400;

fn test_db() -> Database {
    Database::open_memory().unwrap()
}

fn create_user(db: &Database, id: &str) {
    let user = User {
        id: id.to_string(),
        password_hash: "hash".to_string(),
        admin: false,
        timezone: "UTC".to_string(),
        created_at: now_timestamp(),
    };
    db.create_user(&user).unwrap();
}

fn session(document: &str, start_time: i64, duration: i64, page: i64, pages: i64) -> NewActivity {
    NewActivity {
        document_id: document.to_string(),
        start_time,
        duration,
        page,
        pages,
    }
}

fn record(db: &Database, user: &str, device: &str, items: &[NewActivity]) -> usize {
    db.record_activity(user, device, "Kobo Libra", items, &CancellationToken::new())
        .unwrap()
}

fn item(document: &str, start_time: i64, duration: i64, page: i64, pages: i64) -> ActivityItem {
    ActivityItem {
        document: document.to_string(),
        start_time,
        duration,
        page,
        pages,
    }
}

fn progress(document: &str, device: &str, percentage: f64) -> NewProgress {
    NewProgress {
        document_id: document.to_string(),
        device_id: device.to_string(),
        percentage,
        progress: format!("/body/DocFragment[{}]", (percentage * 100.0) as i64),
    }
}

/// Catalog with A (file), B (no file) and C (file, deleted).
fn seed_catalog(db: &Database) {
    for id in ["A", "B", "C"] {
        db.upsert_document(&Document::stub(id)).unwrap();
    }
    db.attach_file("A", "A.epub", "aaaa", None).unwrap();
    db.attach_file("C", "C.epub", "cccc", None).unwrap();
    db.set_deleted("C", true).unwrap();
}

fn reconcile_request(device: &str, have: &[&str]) -> ReconcileRequest {
    ReconcileRequest {
        device_id: device.to_string(),
        device: "Kindle".to_string(),
        have: have.iter().map(|s| s.to_string()).collect(),
    }
}

// ========== USERS ==========

#[test]
fn db_create_and_get_user() {
    let db = test_db();
    create_user(&db, "alice");

    let user = db.get_user("alice").unwrap().unwrap();
    assert_eq!(user.id, "alice");
    assert_eq!(user.timezone, "UTC");
    assert!(!user.admin);
    assert!(db.get_user("bob").unwrap().is_none());
}

#[test]
fn db_duplicate_user_fails() {
    let db = test_db();
    create_user(&db, "alice");

    let dup = User {
        id: "alice".to_string(),
        password_hash: "other".to_string(),
        admin: true,
        timezone: "UTC".to_string(),
        created_at: now_timestamp(),
    };
    assert!(matches!(db.create_user(&dup), Err(AppError::Conflict(_))));
}

#[test]
fn db_delete_user_cascades() {
    let db = test_db();
    create_user(&db, "alice");
    record(&db, "alice", "kobo", &[session("doc", 1_000, 60, 1, 10)]);

    assert!(db.delete_user("alice").unwrap());
    assert!(!db.delete_user("alice").unwrap());

    let info = db.database_info("alice").unwrap();
    assert_eq!(info.activity_size, 0);
    assert_eq!(info.devices_size, 0);
    // Documents outlive their readers.
    assert_eq!(info.documents_size, 1);
}

#[test]
fn db_delete_user_drops_cached_statistics() {
    let db = test_db();
    db.upsert_document(&Document {
        words: Some(1_000),
        ..Document::stub("doc")
    })
    .unwrap();
    create_user(&db, "alice");
    create_user(&db, "bob");

    let now = Utc::now();
    for user in ["alice", "bob"] {
        record(&db, user, "kobo", &[session("doc", now.timestamp(), 60, 1, 10)]);
    }
    stats::refresh_cache(&db, now, &CancellationToken::new()).unwrap();
    assert_eq!(db.user_statistics().unwrap().len(), 2);

    assert!(db.delete_user("alice").unwrap());

    let rows = db.user_statistics().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].user_id, "bob");
    assert!(db.user_streaks("alice").unwrap().is_empty());
    assert!(db.daily_read_totals("alice").unwrap().is_empty());
    assert!(db.document_statistics("alice").unwrap().is_empty());
}

// ========== CATALOG ==========

#[test]
fn db_upsert_document_is_idempotent() {
    let db = test_db();
    let doc = Document {
        title: Some("Dune".to_string()),
        author: Some("Frank Herbert".to_string()),
        words: Some(188_000),
        ..Document::stub("dune")
    };

    assert!(db.upsert_document(&doc).unwrap());
    let first = db.get_document("dune").unwrap().unwrap();

    assert!(!db.upsert_document(&doc).unwrap());
    let second = db.get_document("dune").unwrap().unwrap();
    assert_eq!(first, second);
}

#[test]
fn db_upsert_null_never_erases() {
    let db = test_db();
    db.upsert_document(&Document {
        title: Some("Dune".to_string()),
        isbn13: Some("9780441013593".to_string()),
        ..Document::stub("dune")
    })
    .unwrap();

    db.upsert_document(&Document {
        author: Some("Frank Herbert".to_string()),
        ..Document::stub("dune")
    })
    .unwrap();

    let doc = db.get_document("dune").unwrap().unwrap();
    assert_eq!(doc.title.as_deref(), Some("Dune"));
    assert_eq!(doc.isbn13.as_deref(), Some("9780441013593"));
    assert_eq!(doc.author.as_deref(), Some("Frank Herbert"));
}

#[test]
fn db_upsert_keeps_tombstone_and_file() {
    let db = test_db();
    seed_catalog(&db);

    db.upsert_document(&Document {
        title: Some("Changed".to_string()),
        ..Document::stub("C")
    })
    .unwrap();

    let doc = db.get_document("C").unwrap().unwrap();
    assert!(doc.deleted);
    assert!(doc.synced);
    assert_eq!(doc.filepath.as_deref(), Some("C.epub"));
    assert_eq!(doc.title.as_deref(), Some("Changed"));
}

#[test]
fn db_attach_file_marks_synced() {
    let db = test_db();
    db.upsert_document(&Document::stub("B")).unwrap();
    assert!(!db.get_document("B").unwrap().unwrap().synced);

    let doc = db.attach_file("B", "B.epub", "bbbb", Some(5_000)).unwrap();
    assert!(doc.synced);
    assert!(doc.has_file());
    assert_eq!(doc.words, Some(5_000));

    assert!(matches!(
        db.attach_file("missing", "x.epub", "x", None),
        Err(AppError::NotFound(_))
    ));
}

#[test]
fn db_list_documents_hides_deleted() {
    let db = test_db();
    seed_catalog(&db);

    assert_eq!(db.list_documents(false).unwrap().len(), 2);
    assert_eq!(db.list_documents(true).unwrap().len(), 3);

    assert!(db.set_deleted("C", false).unwrap());
    assert_eq!(db.list_documents(false).unwrap().len(), 3);
    assert!(!db.set_deleted("missing", true).unwrap());
}

#[test]
fn sync_push_documents_normalizes() {
    let db = test_db();
    let req = DocumentPushRequest {
        documents: vec![Document {
            title: Some("  Emma ".to_string()),
            author: Some("   ".to_string()),
            filepath: Some("/etc/passwd".to_string()),
            ..Document::stub(" emma ")
        }],
    };

    assert_eq!(sync::push_documents(&db, &req).unwrap().changed, 1);
    assert_eq!(sync::push_documents(&db, &req).unwrap().changed, 0);

    let doc = db.get_document("emma").unwrap().unwrap();
    assert_eq!(doc.title.as_deref(), Some("Emma"));
    assert_eq!(doc.author, None);
    assert_eq!(doc.filepath, None);
}

#[test]
fn sync_push_documents_rejects_blank_id() {
    let db = test_db();
    let req = DocumentPushRequest {
        documents: vec![Document::stub("ok"), Document::stub("  ")],
    };

    assert!(matches!(
        sync::push_documents(&db, &req),
        Err(AppError::Validation(_))
    ));
    assert!(db.get_document("ok").unwrap().is_none());
}

// ========== RECONCILIATION ==========

#[test]
fn reconcile_full_sync_device() {
    let db = test_db();
    create_user(&db, "alice");
    seed_catalog(&db);

    sync::reconcile(&db, "alice", &reconcile_request("kindle", &[])).unwrap();
    assert!(db.set_device_sync("alice", "kindle", true).unwrap());

    let resp = sync::reconcile(&db, "alice", &reconcile_request("kindle", &["B", "C"])).unwrap();
    assert_eq!(resp.want, vec!["B"]);
    assert_eq!(resp.want_files, vec!["B"]);
    assert_eq!(resp.want_metadata, vec!["B"]);
    assert_eq!(
        resp.give.iter().map(|d| d.id.as_str()).collect::<Vec<_>>(),
        vec!["A"]
    );
    assert_eq!(resp.delete, vec!["C"]);
}

#[test]
fn reconcile_partial_device_only_wants() {
    let db = test_db();
    create_user(&db, "alice");
    seed_catalog(&db);

    let resp = sync::reconcile(&db, "alice", &reconcile_request("phone", &["B", "C"])).unwrap();
    assert_eq!(resp.want, vec!["B"]);
    assert!(resp.give.is_empty());
    assert!(resp.delete.is_empty());

    let device = db.get_device("alice", "phone").unwrap().unwrap();
    assert!(!device.sync);
    assert_eq!(device.device_name, "Kindle");
}

#[test]
fn reconcile_unknown_ids_want_metadata() {
    let db = test_db();
    create_user(&db, "alice");
    seed_catalog(&db);

    let resp =
        sync::reconcile(&db, "alice", &reconcile_request("phone", &["new", "B", "new"])).unwrap();
    assert_eq!(resp.want, vec!["new", "B"]);
    assert_eq!(resp.want_files, vec!["new", "B"]);
    assert_eq!(resp.want_metadata, vec!["new", "B"]);
    // Reconciliation never creates documents.
    assert!(db.get_document("new").unwrap().is_none());
}

#[test]
fn reconcile_wants_metadata_for_activity_stubs() {
    let db = test_db();
    create_user(&db, "alice");
    record(&db, "alice", "kobo", &[session("X", 1_000, 60, 1, 10)]);

    let stub = db.get_document("X").unwrap().unwrap();
    assert_eq!(stub.title, None);
    assert!(!stub.synced);

    let resp = sync::reconcile(&db, "alice", &reconcile_request("kobo", &["X"])).unwrap();
    assert_eq!(resp.want, vec!["X"]);
    assert_eq!(resp.want_files, vec!["X"]);
    assert_eq!(resp.want_metadata, vec!["X"]);

    db.attach_file("X", "X.epub", "xxxx", None).unwrap();
    let resp = sync::reconcile(&db, "alice", &reconcile_request("kobo", &["X"])).unwrap();
    assert!(resp.want.is_empty());
    assert!(resp.want_metadata.is_empty());
}

#[test]
fn reconcile_response_lists_always_present() {
    let db = test_db();
    create_user(&db, "alice");

    let resp = sync::reconcile(&db, "alice", &reconcile_request("phone", &[])).unwrap();
    let json = serde_json::to_value(&resp).unwrap();
    for key in ["want", "want_files", "want_metadata", "give", "delete"] {
        assert_eq!(json[key], serde_json::json!([]), "{}", key);
    }
}

#[test]
fn reconcile_rejects_missing_device() {
    let db = test_db();
    create_user(&db, "alice");

    assert!(matches!(
        sync::reconcile(&db, "alice", &reconcile_request(" ", &["A"])),
        Err(AppError::Validation(_))
    ));
    assert!(db.list_devices("alice").unwrap().is_empty());
}

#[test]
fn device_name_update_keeps_existing_when_blank() {
    let db = test_db();
    create_user(&db, "alice");

    db.upsert_device("alice", "kobo", "Kobo Clara").unwrap();
    let device = db.upsert_device("alice", "kobo", "").unwrap();
    assert_eq!(device.device_name, "Kobo Clara");

    let device = db.upsert_device("alice", "kobo", "Kobo Sage").unwrap();
    assert_eq!(device.device_name, "Kobo Sage");
    assert_eq!(db.list_devices("alice").unwrap().len(), 1);
}

// ========== ACTIVITY ==========

#[test]
fn activity_batch_records_rows() {
    let db = test_db();
    create_user(&db, "alice");

    let req = ActivityRequest {
        device_id: "kobo".to_string(),
        device: "Kobo Libra".to_string(),
        activity: vec![item("doc-1", 1_000, 60, 0, 10), item("doc-1", 2_000, 30, 9, 10)],
    };

    let resp = sync::record_activity(&db, "alice", &req, &CancellationToken::new()).unwrap();
    assert_eq!(resp.added, 2);

    let rows = db.list_activity("alice", Some("doc-1"), 0, 10).unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].start_time, 2_000);
    assert!((rows[0].start_percentage - 0.9).abs() < 1e-9);
    assert!((rows[0].end_percentage - 1.0).abs() < 1e-9);
    assert!((rows[1].end_percentage - 0.1).abs() < 1e-9);

    assert!(db.get_document("doc-1").unwrap().is_some());
    assert!(db.get_device("alice", "kobo").unwrap().is_some());
}

#[test]
fn activity_validation_failure_writes_nothing() {
    let db = test_db();
    create_user(&db, "alice");

    let mut activity: Vec<_> = (1..=5)
        .map(|i| item(&format!("doc-{}", i), 1_000 * i, 60, 1, 10))
        .collect();
    activity[2].pages = 0;

    let req = ActivityRequest {
        device_id: "kobo".to_string(),
        device: "Kobo Libra".to_string(),
        activity,
    };

    let err = sync::record_activity(&db, "alice", &req, &CancellationToken::new()).unwrap_err();
    assert!(matches!(err, AppError::Validation(ref msg) if msg.contains("activity[2]")));

    let info = db.database_info("alice").unwrap();
    assert_eq!(info.activity_size, 0);
    assert_eq!(info.devices_size, 0);
    assert_eq!(info.documents_size, 0);
}

#[test]
fn activity_cancellation_rolls_back() {
    let db = test_db();
    create_user(&db, "alice");

    let cancel = CancellationToken::new();
    cancel.cancel();

    let items = vec![session("doc-1", 1_000, 60, 1, 10), session("doc-2", 2_000, 60, 1, 10)];
    let err = db
        .record_activity("alice", "kobo", "Kobo", &items, &cancel)
        .unwrap_err();
    assert!(matches!(err, AppError::Cancelled));
    assert!(err.is_retryable());

    let info = db.database_info("alice").unwrap();
    assert_eq!(info.activity_size, 0);
    assert_eq!(info.devices_size, 0);
    assert_eq!(info.documents_size, 0);
}

#[test]
fn activity_last_sync() {
    let db = test_db();
    create_user(&db, "alice");

    let query = LastSyncRequest {
        device_id: "kobo".to_string(),
    };
    assert_eq!(sync::last_sync_time(&db, "alice", &query).unwrap().last_sync, 0);

    record(
        &db,
        "alice",
        "kobo",
        &[session("doc", 5_000, 60, 1, 10), session("doc", 3_000, 60, 1, 10)],
    );
    record(&db, "alice", "kindle", &[session("doc", 9_000, 60, 1, 10)]);

    assert_eq!(sync::last_sync_time(&db, "alice", &query).unwrap().last_sync, 5_000);
}

#[test]
fn activity_list_pages_newest_first() {
    let db = test_db();
    create_user(&db, "alice");
    let items: Vec<_> = (0..5).map(|i| session("doc", 1_000 + i, 60, 1, 10)).collect();
    record(&db, "alice", "kobo", &items);

    let page = db.list_activity("alice", None, 1, 2).unwrap();
    assert_eq!(
        page.iter().map(|a| a.start_time).collect::<Vec<_>>(),
        vec![1_003, 1_002]
    );
    assert!(db.list_activity("alice", Some("other"), 0, 10).unwrap().is_empty());
}

// ========== PROGRESS ==========

#[test]
fn progress_last_writer_wins() {
    let db = test_db();
    create_user(&db, "alice");

    db.insert_progress("alice", "Kobo", &progress("doc", "dev1", 0.30), 100)
        .unwrap();
    db.insert_progress("alice", "Kindle", &progress("doc", "dev2", 0.45), 200)
        .unwrap();

    let current = sync::get_progress(&db, "alice", "doc").unwrap();
    assert!((current.percentage - 0.45).abs() < 1e-9);
    assert_eq!(current.device_id, "dev2");
    assert_eq!(current.device, "Kindle");
}

#[test]
fn progress_reversed_order_reverses_result() {
    let db = test_db();
    create_user(&db, "alice");

    db.insert_progress("alice", "Kindle", &progress("doc", "dev2", 0.45), 100)
        .unwrap();
    db.insert_progress("alice", "Kobo", &progress("doc", "dev1", 0.30), 200)
        .unwrap();

    let current = sync::get_progress(&db, "alice", "doc").unwrap();
    assert!((current.percentage - 0.30).abs() < 1e-9);
    assert_eq!(current.device_id, "dev1");
}

#[test]
fn progress_history_is_kept() {
    let db = test_db();
    create_user(&db, "alice");

    let req = ProgressRequest {
        document: "doc".to_string(),
        percentage: 0.5,
        progress: "/body/p[12]".to_string(),
        device: "Kobo".to_string(),
        device_id: "kobo".to_string(),
    };
    let ack = sync::set_progress(&db, "alice", &req).unwrap();
    assert_eq!(ack.document, "doc");
    sync::set_progress(&db, "alice", &req).unwrap();

    assert_eq!(db.database_info("alice").unwrap().progress_size, 2);
    assert!(db.get_document("doc").unwrap().is_some());
}

#[test]
fn progress_not_found_and_validation() {
    let db = test_db();
    create_user(&db, "alice");

    assert!(matches!(
        sync::get_progress(&db, "alice", "nothing"),
        Err(AppError::NotFound(_))
    ));

    let req = ProgressRequest {
        document: "doc".to_string(),
        percentage: 1.5,
        progress: String::new(),
        device: String::new(),
        device_id: "kobo".to_string(),
    };
    assert!(matches!(
        sync::set_progress(&db, "alice", &req),
        Err(AppError::Validation(_))
    ));
}

// ========== STATISTICS ==========

#[test]
fn stats_clamp_percentage() {
    assert_eq!(stats::clamp_percentage(98.4), 100.0);
    assert_eq!(stats::clamp_percentage(95.0), 95.0);
    assert_eq!(stats::clamp_percentage(97.0), 97.0);
}

#[test]
fn refresh_ten_day_streak_and_daily_totals() {
    let db = test_db();
    create_user(&db, "alice");

    let now = Utc::now();
    let items: Vec<_> = (0..10)
        .map(|i| session("doc", now.timestamp() - i * DAY, 60, 1, 10))
        .collect();
    record(&db, "alice", "kobo", &items);

    stats::refresh_cache(&db, now, &CancellationToken::new()).unwrap();

    let streaks = db.user_streaks("alice").unwrap();
    let day = streaks
        .iter()
        .find(|s| s.window == StreakWindow::Day)
        .unwrap();
    assert_eq!(day.current_streak, 10);
    assert_eq!(day.max_streak, 10);
    assert_eq!(day.last_timezone, "UTC");

    let daily = db.daily_read_totals("alice").unwrap();
    assert_eq!(daily.len(), 30);
    assert!(daily[..10].iter().all(|d| d.minutes_read == 1));
    assert!(daily[10..].iter().all(|d| d.minutes_read == 0));
}

#[test]
fn refresh_gap_resets_current_streak() {
    let db = test_db();
    create_user(&db, "alice");

    let now = Utc::now();
    let items: Vec<_> = (0..10)
        .filter(|i| *i != 4)
        .map(|i| session("doc", now.timestamp() - i * DAY, 60, 1, 10))
        .collect();
    record(&db, "alice", "kobo", &items);

    stats::refresh_cache(&db, now, &CancellationToken::new()).unwrap();

    let day = db
        .user_streaks("alice")
        .unwrap()
        .into_iter()
        .find(|s| s.window == StreakWindow::Day)
        .unwrap();
    assert_eq!(day.current_streak, 4);
    assert_eq!(day.max_streak, 5);
}

#[test]
fn refresh_document_statistics() {
    let db = test_db();
    create_user(&db, "alice");
    db.upsert_document(&Document {
        words: Some(1_000),
        ..Document::stub("doc")
    })
    .unwrap();

    let now = Utc::now();
    let ts = now.timestamp();
    record(
        &db,
        "alice",
        "kobo",
        &[session("doc", ts - 3_600, 120, 0, 10), session("doc", ts - 400 * DAY, 60, 5, 10)],
    );
    db.insert_progress("alice", "Kobo", &progress("doc", "kobo", 0.984), ts)
        .unwrap();

    stats::refresh_cache(&db, now, &CancellationToken::new()).unwrap();

    let stat = db.document_statistic("alice", "doc").unwrap().unwrap();
    assert_eq!(stat.percentage, 100.0);
    assert_eq!(stat.read_percentage, 20.0);
    assert_eq!(stat.total_time_seconds, 180);
    assert_eq!(stat.total_words_read, 200);
    assert!((stat.total_wpm - 200.0 / 3.0).abs() < 1e-6);
    assert_eq!(stat.yearly_time_seconds, 120);
    assert_eq!(stat.weekly_words_read, 100);
    assert!((stat.weekly_wpm - 50.0).abs() < 1e-6);
    assert_eq!(stat.last_read, ts - 3_600);
}

#[test]
fn refresh_cancelled_keeps_previous_cache() {
    let db = test_db();
    create_user(&db, "alice");
    let now = Utc::now();
    record(&db, "alice", "kobo", &[session("doc", now.timestamp(), 60, 1, 10)]);
    stats::refresh_cache(&db, now, &CancellationToken::new()).unwrap();

    record(
        &db,
        "alice",
        "kobo",
        &[session("doc", now.timestamp() - DAY, 60, 1, 10)],
    );

    let cancel = CancellationToken::new();
    cancel.cancel();
    assert!(matches!(
        stats::refresh_cache(&db, now, &cancel),
        Err(AppError::Cancelled)
    ));

    let day = db
        .user_streaks("alice")
        .unwrap()
        .into_iter()
        .find(|s| s.window == StreakWindow::Day)
        .unwrap();
    assert_eq!(day.current_streak, 1);
}

#[test]
fn refresh_replaces_whole_cache() {
    let db = test_db();
    create_user(&db, "alice");
    let now = Utc::now();
    record(&db, "alice", "kobo", &[session("doc", now.timestamp(), 60, 1, 10)]);

    stats::refresh_cache(&db, now, &CancellationToken::new()).unwrap();
    stats::refresh_cache(&db, now, &CancellationToken::new()).unwrap();

    assert_eq!(db.user_streaks("alice").unwrap().len(), 2);
    assert_eq!(db.daily_read_totals("alice").unwrap().len(), 30);
    assert_eq!(db.document_statistics("alice").unwrap().len(), 1);
}

#[test]
fn leaderboard_ranks_users() {
    let db = test_db();
    db.upsert_document(&Document {
        words: Some(10_000),
        ..Document::stub("doc")
    })
    .unwrap();

    let ts = Utc::now().timestamp();
    for (user, page, duration) in [("alice", 2, 600), ("bob", 5, 60), ("carol", 0, 0)] {
        create_user(&db, user);
        record(&db, user, "kobo", &[session("doc", ts - 60, duration, page, 10)]);
    }
    stats::refresh_cache(&db, Utc::now(), &CancellationToken::new()).unwrap();

    let rows = db.user_statistics().unwrap();
    // carol read words too, only alice and bob have time
    assert_eq!(rows.len(), 3);

    let by_time = stats::rank(&rows, Metric::Duration, Period::Week);
    assert_eq!(by_time[0].user_id, "alice");
    assert_eq!(by_time[0].value, 600.0);

    let by_wpm = stats::rank(&rows, Metric::Wpm, Period::All);
    assert_eq!(by_wpm[0].user_id, "bob");
    assert_eq!(by_wpm[0].value, 1_000.0);
    assert_eq!(by_wpm[2].user_id, "carol");
    assert_eq!(by_wpm[2].value, 0.0);
}

#[test]
fn timezone_change_marks_cache_stale() {
    let db = test_db();
    let auth = AuthService::new(db.clone(), true);
    auth.register("alice", "secret").unwrap();

    stats::refresh_cache(&db, Utc::now(), &CancellationToken::new()).unwrap();
    assert_eq!(db.streak_timezone("alice").unwrap().as_deref(), Some("UTC"));

    assert!(!auth.set_timezone("alice", "UTC").unwrap());
    assert!(auth.set_timezone("alice", "Europe/Paris").unwrap());

    stats::refresh_cache(&db, Utc::now(), &CancellationToken::new()).unwrap();
    assert_eq!(
        db.streak_timezone("alice").unwrap().as_deref(),
        Some("Europe/Paris")
    );
    assert!(!auth.set_timezone("alice", "Europe/Paris").unwrap());
}

// ========== CONFIG ==========

#[test]
fn config_parse_toml() {
    let toml = r#"
[server]
bind = "127.0.0.1:9090"
log_level = "shelfsync=debug"

[database]
path = "/tmp/test.db"

[storage]
documents_dir = "/tmp/docs"

[auth]
registration = "open"

[stats]
refresh_interval_seconds = 60
refresh_on_startup = false
"#;
    let config = Config::parse(toml).unwrap();
    assert_eq!(config.server.bind.port(), 9090);
    assert_eq!(config.server.log_level, "shelfsync=debug");
    assert!(config.auth.registration_enabled());
    assert_eq!(config.storage.documents_dir.to_str(), Some("/tmp/docs"));
    assert_eq!(config.stats.refresh_interval_seconds, 60);
    assert!(!config.stats.refresh_on_startup);
}

#[test]
fn config_default_values() {
    let config = Config::default();
    assert_eq!(config.server.bind.port(), 8585);
    assert!(!config.auth.registration_enabled());
    assert_eq!(config.stats.refresh_interval_seconds, 900);
    assert!(config.stats.refresh_on_startup);
    assert_eq!(config.storage.max_upload_bytes, 256 * 1024 * 1024);
}

#[test]
fn config_generated_default_parses() {
    let config = Config::parse(&Config::generate_default()).unwrap();
    assert_eq!(config.server.bind.port(), 8585);
    assert_eq!(config.stats.refresh_interval_seconds, 900);
}

#[test]
fn config_rejects_zero_upload_limit() {
    assert!(matches!(
        Config::parse("[storage]\nmax_upload_bytes = 0\n"),
        Err(AppError::Config(_))
    ));
}

#[test]
fn config_rejects_zero_interval() {
    assert!(matches!(
        Config::parse("[stats]\nrefresh_interval_seconds = 0\n"),
        Err(AppError::Config(_))
    ));
}

// ========== STORAGE ==========

#[test]
fn db_file_backed_persists() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("shelfsync.db");

    {
        let db = Database::open(&path).unwrap();
        create_user(&db, "alice");
        db.upsert_document(&Document::stub("doc")).unwrap();
    }

    let db = Database::open(&path).unwrap();
    assert!(db.get_user("alice").unwrap().is_some());
    assert!(db.get_document("doc").unwrap().is_some());
}

fn chunks(parts: &[&'static [u8]]) -> impl Stream<Item = Result<Bytes, Infallible>> + Unpin {
    stream::iter(
        parts
            .iter()
            .map(|p| Ok(Bytes::from_static(*p)))
            .collect::<Vec<_>>(),
    )
}

fn storage_state(db: &Database, dir: &Path, max_upload_bytes: u64) -> (AppState, RefreshScheduler) {
    let mut config = Config::default();
    config.storage.documents_dir = dir.join("documents");
    config.storage.max_upload_bytes = max_upload_bytes;

    let scheduler = RefreshScheduler::start(db.clone(), Duration::from_secs(3600), false);
    let state = AppState::new_with_db(
        config,
        db.clone(),
        AuthService::new(db.clone(), false),
        scheduler.handle(),
        CancellationToken::new(),
    );
    (state, scheduler)
}

#[tokio::test]
async fn state_stores_document_file() {
    let dir = tempfile::tempdir().unwrap();
    let db = test_db();
    db.upsert_document(&Document::stub("abc123")).unwrap();
    let (state, scheduler) = storage_state(&db, dir.path(), 1024);

    let doc = state
        .store_document_file("abc123", "EPUB", Some(42), chunks(&[b"epub ", b"bytes"]))
        .await
        .unwrap();
    assert!(doc.synced);
    assert_eq!(doc.filepath.as_deref(), Some("abc123.epub"));
    assert_eq!(
        doc.checksum.as_deref(),
        Some(blake3::hash(b"epub bytes").to_hex().as_str())
    );

    let path = state.document_file_path(&doc).unwrap();
    assert_eq!(std::fs::read(path).unwrap(), b"epub bytes");

    assert!(matches!(
        state.store_document_file("unknown", "epub", None, chunks(&[b"x"])).await,
        Err(AppError::NotFound(_))
    ));
    assert!(matches!(
        state.store_document_file("../abc123", "epub", None, chunks(&[b"x"])).await,
        Err(AppError::Validation(_))
    ));
    assert!(matches!(
        state.store_document_file("abc123", "epub", None, chunks(&[])).await,
        Err(AppError::Validation(_))
    ));

    scheduler.shutdown().await;
}

#[tokio::test]
async fn state_rejects_oversized_stream() {
    let dir = tempfile::tempdir().unwrap();
    let db = test_db();
    db.upsert_document(&Document::stub("big")).unwrap();
    let (state, scheduler) = storage_state(&db, dir.path(), 8);

    let err = state
        .store_document_file("big", "epub", None, chunks(&[b"12345", b"67890"]))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::PayloadTooLarge(_)));

    let documents = dir.path().join("documents");
    assert_eq!(std::fs::read_dir(&documents).unwrap().count(), 0);
    assert!(!db.get_document("big").unwrap().unwrap().has_file());

    scheduler.shutdown().await;
}

// ========== HTTP ==========

struct TestServer {
    app: Router,
    db: Database,
    scheduler: RefreshScheduler,
    _dir: tempfile::TempDir,
}

const ALICE: (&str, &str) = ("alice", "secret");
const ROOT: (&str, &str) = ("root", "toor");

fn test_server(max_upload_bytes: u64) -> TestServer {
    let dir = tempfile::tempdir().unwrap();
    let db = test_db();
    let mut config = Config::default();
    config.storage.documents_dir = dir.path().join("documents");
    config.storage.max_upload_bytes = max_upload_bytes;

    let auth = AuthService::new(db.clone(), false);
    auth.create_user(ALICE.0, ALICE.1, false).unwrap();
    auth.create_user(ROOT.0, ROOT.1, true).unwrap();

    let scheduler = RefreshScheduler::start(db.clone(), Duration::from_secs(3600), false);
    let state = AppState::new_with_db(
        config,
        db.clone(),
        auth,
        scheduler.handle(),
        CancellationToken::new(),
    );

    TestServer {
        app: create_router(state),
        db,
        scheduler,
        _dir: dir,
    }
}

async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    credentials: Option<(&str, &str)>,
    body: Body,
) -> (StatusCode, Bytes) {
    let mut req = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some((user, key)) = credentials {
        req = req.header("x-auth-user", user).header("x-auth-key", key);
    }

    let resp = app
        .clone()
        .oneshot(req.body(body).unwrap())
        .await
        .unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, bytes)
}

async fn send_json(
    app: &Router,
    method: &str,
    uri: &str,
    credentials: Option<(&str, &str)>,
    body: Value,
) -> (StatusCode, Value) {
    let (status, bytes) = send(app, method, uri, credentials, Body::from(body.to_string())).await;
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn http_credentials_required() {
    let server = test_server(1024);

    let (status, _) = send(&server.app, "GET", "/api/ko/users/auth", None, Body::empty()).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let wrong = Some((ALICE.0, "nope"));
    let (status, body) = send_json(&server.app, "GET", "/api/ko/users/auth", wrong, Value::Null).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["error"].is_string());

    let (status, body) =
        send_json(&server.app, "GET", "/api/ko/users/auth", Some(ALICE), Value::Null).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["authorized"], "OK");

    server.scheduler.shutdown().await;
}

#[tokio::test]
async fn http_progress_round_trip() {
    let server = test_server(1024);
    let app = &server.app;

    let (status, body) = send_json(
        app,
        "PUT",
        "/api/ko/syncs/progress",
        Some(ALICE),
        json!({
            "document": "doc",
            "percentage": 0.5,
            "progress": "/body/DocFragment[12]",
            "device": "Kobo Libra",
            "device_id": "kobo",
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["document"], "doc");
    assert!(body["timestamp"].is_i64());

    let (status, body) =
        send_json(app, "GET", "/api/ko/syncs/progress/doc", Some(ALICE), Value::Null).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["percentage"], 0.5);
    assert_eq!(body["progress"], "/body/DocFragment[12]");
    assert_eq!(body["device"], "Kobo Libra");
    assert_eq!(body["device_id"], "kobo");

    let (status, _) =
        send_json(app, "GET", "/api/ko/syncs/progress/other", Some(ALICE), Value::Null).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send_json(
        app,
        "PUT",
        "/api/ko/syncs/progress",
        Some(ALICE),
        json!({
            "document": "doc",
            "percentage": 1.5,
            "progress": "",
            "device": "Kobo Libra",
            "device_id": "kobo",
        }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    server.scheduler.shutdown().await;
}

#[tokio::test]
async fn http_activity_then_reconcile() {
    let server = test_server(1024);
    let app = &server.app;

    let (status, body) = send_json(
        app,
        "POST",
        "/api/ko/activity",
        Some(ALICE),
        json!({
            "device_id": "kobo",
            "device": "Kobo Libra",
            "activity": [
                { "document": "X", "start_time": 1000, "duration": 60, "page": 1, "pages": 10 },
                { "document": "X", "start_time": 2000, "duration": 30, "page": 2, "pages": 10 },
            ],
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["added"], 2);

    let (status, body) = send_json(
        app,
        "POST",
        "/api/ko/activity",
        Some(ALICE),
        json!({
            "device_id": "kobo",
            "activity": [{ "document": "Y", "start_time": 3000, "duration": 60, "page": 1, "pages": 0 }],
        }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("activity[0]"));
    assert!(server.db.get_document("Y").unwrap().is_none());

    let (status, body) = send_json(
        app,
        "POST",
        "/api/ko/syncs/activity",
        Some(ALICE),
        json!({ "device_id": "kobo" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["last_sync"], 2000);

    let (status, body) = send_json(
        app,
        "POST",
        "/api/ko/syncs/documents",
        Some(ALICE),
        json!({ "device_id": "kobo", "device": "Kobo Libra", "have": ["X"] }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["want"], json!(["X"]));
    assert_eq!(body["want_files"], json!(["X"]));
    assert_eq!(body["want_metadata"], json!(["X"]));
    assert_eq!(body["give"], json!([]));
    assert_eq!(body["delete"], json!([]));

    server.scheduler.shutdown().await;
}

#[tokio::test]
async fn http_upload_larger_than_default_body_limit() {
    let server = test_server(16 * 1024 * 1024);
    let app = &server.app;
    server.db.upsert_document(&Document::stub("book")).unwrap();

    let data: Vec<u8> = (0..3 * 1024 * 1024).map(|i| (i % 251) as u8).collect();
    let (status, body) = send(
        app,
        "PUT",
        "/api/ko/documents/book/file?ext=epub&words=90000",
        Some(ALICE),
        Body::from(data.clone()),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let doc: Document = serde_json::from_slice(&body).unwrap();
    assert_eq!(doc.filepath.as_deref(), Some("book.epub"));
    assert_eq!(doc.words, Some(90_000));
    assert_eq!(
        doc.checksum.as_deref(),
        Some(blake3::hash(&data).to_hex().as_str())
    );
    assert!(server.db.get_document("book").unwrap().unwrap().synced);

    let (status, body) =
        send(app, "GET", "/api/ko/documents/book/file", Some(ALICE), Body::empty()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.len(), data.len());
    assert!(body.as_ref() == data.as_slice());

    server.scheduler.shutdown().await;
}

#[tokio::test]
async fn http_upload_over_configured_limit() {
    let server = test_server(1024);
    server.db.upsert_document(&Document::stub("book")).unwrap();

    let (status, _) = send(
        &server.app,
        "PUT",
        "/api/ko/documents/book/file",
        Some(ALICE),
        Body::from(vec![7u8; 4096]),
    )
    .await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert!(!server.db.get_document("book").unwrap().unwrap().has_file());

    let (status, _) = send(
        &server.app,
        "PUT",
        "/api/ko/documents/missing/file",
        Some(ALICE),
        Body::from(vec![7u8; 16]),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    server.scheduler.shutdown().await;
}

#[tokio::test]
async fn http_admin_routes() {
    let server = test_server(1024);
    let app = &server.app;
    server.db.upsert_document(&Document::stub("old")).unwrap();

    let (status, _) = send(app, "POST", "/api/admin/cache/refresh", Some(ALICE), Body::empty()).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = send(app, "DELETE", "/api/admin/documents/old", Some(ALICE), Body::empty()).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(!server.db.get_document("old").unwrap().unwrap().deleted);

    let (status, _) = send(app, "POST", "/api/admin/cache/refresh", Some(ROOT), Body::empty()).await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let (status, _) = send(app, "DELETE", "/api/admin/documents/old", Some(ROOT), Body::empty()).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(server.db.get_document("old").unwrap().unwrap().deleted);

    let (status, _) =
        send(app, "DELETE", "/api/admin/documents/missing", Some(ROOT), Body::empty()).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    server.scheduler.shutdown().await;
}
