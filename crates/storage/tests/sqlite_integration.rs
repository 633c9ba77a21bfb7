use learn_core::model::{ChapterCatalog, ChapterId, QuizScore, SessionId, SessionState};
use learn_core::time::fixed_now;
use storage::catalog::bundled_catalog;
use storage::repository::{ChapterRepository, SnapshotRepository, StorageError};
use storage::sqlite::SqliteRepository;

async fn connect(name: &str) -> SqliteRepository {
    let url = format!("sqlite:file:{name}?mode=memory&cache=shared");
    let repo = SqliteRepository::connect(&url).await.expect("connect");
    repo.migrate().await.expect("migrate");
    repo
}

async fn seeded(name: &str) -> (SqliteRepository, ChapterCatalog) {
    let repo = connect(name).await;
    let catalog = bundled_catalog().unwrap();
    for chapter in catalog.chapters() {
        repo.upsert_chapter(chapter).await.unwrap();
    }
    (repo, catalog)
}

#[tokio::test]
async fn sqlite_roundtrips_the_bundled_course() {
    let (repo, catalog) = seeded("memdb_course").await;

    let listed = repo.list_chapters().await.expect("list");
    assert_eq!(listed.as_slice(), catalog.chapters());

    let rebuilt = ChapterCatalog::new(listed).expect("valid catalog");
    assert_eq!(rebuilt, catalog);

    let id = ChapterId::new("operations").unwrap();
    let chapter = repo.get_chapter(&id).await.expect("get");
    assert_eq!(chapter.ordinal(), 3);
    assert_eq!(chapter.quiz(), catalog.get(&id).unwrap().quiz());
}

#[tokio::test]
async fn sqlite_upsert_replaces_chapter_fields() {
    let (repo, catalog) = seeded("memdb_upsert").await;

    let mut draft = catalog.first().to_draft();
    draft.title = "Chapter 1: Hello again".into();
    draft.keywords.push("Greeting".into());
    let updated = draft.validate().unwrap();
    repo.upsert_chapter(&updated).await.unwrap();

    let fetched = repo.get_chapter(updated.id()).await.unwrap();
    assert_eq!(fetched.title(), "Chapter 1: Hello again");
    assert!(fetched.keywords().iter().any(|k| k == "greeting"));
    assert_eq!(repo.list_chapters().await.unwrap().len(), catalog.len());
}

#[tokio::test]
async fn sqlite_unknown_chapter_is_not_found() {
    let repo = connect("memdb_missing_chapter").await;
    let missing = ChapterId::new("nowhere").unwrap();
    assert!(matches!(
        repo.get_chapter(&missing).await,
        Err(StorageError::NotFound)
    ));
}

#[tokio::test]
async fn sqlite_snapshot_upserts_by_session_id() {
    let (repo, catalog) = seeded("memdb_snapshots").await;

    let session_id = SessionId::generate();
    let mut state = SessionState::start(session_id, &catalog, fixed_now());
    let first = catalog.first().id().clone();
    state.record_execution(&first).unwrap();
    repo.save_snapshot(&state.to_snapshot()).await.unwrap();

    state.record_execution(&first).unwrap();
    let latest = state.to_snapshot();
    repo.save_snapshot(&latest).await.unwrap();

    let loaded = repo.load_snapshot(session_id).await.unwrap();
    assert_eq!(loaded, latest);
    assert_eq!(loaded.total_code_runs, 2);

    let restored = SessionState::from_snapshot(loaded, &catalog).unwrap();
    assert_eq!(restored, state);

    assert_eq!(repo.list_snapshots(10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn sqlite_lists_snapshots_with_limit() {
    let (repo, catalog) = seeded("memdb_snapshot_list").await;

    for _ in 0..3 {
        let state = SessionState::start(SessionId::generate(), &catalog, fixed_now());
        repo.save_snapshot(&state.to_snapshot()).await.unwrap();
    }

    assert_eq!(repo.list_snapshots(10).await.unwrap().len(), 3);
    assert_eq!(repo.list_snapshots(2).await.unwrap().len(), 2);
}

#[tokio::test]
async fn sqlite_preserves_scores_in_payload() {
    let (repo, catalog) = seeded("memdb_scores").await;

    let mut snapshot = SessionState::start(SessionId::generate(), &catalog, fixed_now()).to_snapshot();
    let first = catalog.first().id().clone();
    if let Some(record) = snapshot.chapters.get_mut(&first) {
        record.best_quiz_score = Some(QuizScore::new(2, 3));
        record.attempt_count = 1;
    }
    repo.save_snapshot(&snapshot).await.unwrap();

    let loaded = repo.load_snapshot(snapshot.session_id).await.unwrap();
    assert_eq!(
        loaded.chapters[&first].best_quiz_score,
        Some(QuizScore::new(2, 3))
    );
}

#[tokio::test]
async fn sqlite_missing_snapshot_is_not_found() {
    let repo = connect("memdb_missing_snapshot").await;
    assert!(matches!(
        repo.load_snapshot(SessionId::generate()).await,
        Err(StorageError::NotFound)
    ));
}

#[tokio::test]
async fn migrations_are_idempotent() {
    let repo = connect("memdb_migrate_twice").await;
    repo.migrate().await.expect("second migrate");
}
