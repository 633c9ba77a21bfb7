use std::sync::Arc;
use std::time::Duration;

use learn_core::PassThreshold;
use learn_core::model::{ChapterCatalog, ChapterId, ChapterStatus, SessionSnapshot};
use learn_core::time::{fixed_clock, fixed_now};
use sandbox::ErrorKind;
use services::{
    AppServices, Clock, LearningEvent, MemoryEventSink, SessionConfig, SessionCoordinator,
    SessionError,
};
use storage::catalog::{bundled_catalog, catalog_from_json};
use storage::repository::Storage;

fn id(s: &str) -> ChapterId {
    ChapterId::new(s).unwrap()
}

fn services() -> AppServices {
    AppServices::in_memory(bundled_catalog().unwrap(), SessionConfig::default(), fixed_clock())
}

fn correct_answers(catalog: &ChapterCatalog, chapter: &ChapterId) -> Vec<usize> {
    catalog
        .get(chapter)
        .unwrap()
        .quiz()
        .questions()
        .iter()
        .map(|q| q.correct_index())
        .collect()
}

fn wrong_answers(catalog: &ChapterCatalog, chapter: &ChapterId) -> Vec<usize> {
    catalog
        .get(chapter)
        .unwrap()
        .quiz()
        .questions()
        .iter()
        .map(|q| (q.correct_index() + 1) % q.options().len())
        .collect()
}

fn pass_current(coordinator: &mut SessionCoordinator) {
    let chapter = coordinator.state().current_chapter().clone();
    let answers = correct_answers(coordinator.catalog(), &chapter);
    let outcome = coordinator.submit_quiz(&chapter, &answers).unwrap();
    assert!(outcome.passed);
}

//
// ─── EXECUTION ─────────────────────────────────────────────────────────────────
//

#[tokio::test]
async fn successful_run_counts_once() {
    let mut coordinator = services().start_session();
    let intro = id("python_intro");

    let result = coordinator.execute_snippet(&intro, "print(2 + 2)").await.unwrap();
    assert!(result.success);
    assert_eq!(result.output, "4");

    let view = coordinator.progress_snapshot();
    assert_eq!(view.chapter(&intro).unwrap().code_executions, 1);
    assert_eq!(view.total_code_runs, 1);
}

#[tokio::test]
async fn policy_violation_is_not_counted() {
    let mut coordinator = services().start_session();
    let intro = id("python_intro");

    let result = coordinator
        .execute_snippet(&intro, "import os\nos.system('rm -rf /')")
        .await
        .unwrap();
    assert!(!result.success);
    assert_eq!(result.error_kind(), Some(ErrorKind::PolicyViolation));
    assert!(result.output.is_empty());

    let view = coordinator.progress_snapshot();
    assert_eq!(view.chapter(&intro).unwrap().code_executions, 0);
    assert_eq!(view.total_code_runs, 0);
}

#[tokio::test]
async fn import_in_a_one_line_suite_is_not_counted() {
    let mut coordinator = services().start_session();
    let result = coordinator
        .run_current("print('hi')\nif True: import os")
        .await
        .unwrap();
    assert_eq!(result.error_kind(), Some(ErrorKind::PolicyViolation));
    assert!(result.output.is_empty());

    let view = coordinator.progress_snapshot();
    assert_eq!(view.chapter(&id("python_intro")).unwrap().code_executions, 0);
    assert_eq!(view.total_code_runs, 0);
}

#[tokio::test]
async fn runtime_faults_and_timeouts_still_count() {
    let config = SessionConfig {
        sandbox: SessionConfig::default()
            .sandbox
            .with_timeout(Duration::from_millis(200)),
        ..SessionConfig::default()
    };
    let services = AppServices::in_memory(bundled_catalog().unwrap(), config, fixed_clock());
    let mut coordinator = services.start_session();

    let fault = coordinator.run_current("print(1 / 0)").await.unwrap();
    assert_eq!(fault.error_kind(), Some(ErrorKind::RuntimeFault));

    let started = std::time::Instant::now();
    let timeout = coordinator.run_current("while True:\n    pass").await.unwrap();
    assert_eq!(timeout.error_kind(), Some(ErrorKind::Timeout));
    assert!(started.elapsed() < Duration::from_secs(2));

    assert_eq!(coordinator.progress_snapshot().total_code_runs, 2);
}

#[tokio::test]
async fn locked_chapter_rejects_execution() {
    let mut coordinator = services().start_session();
    let before = coordinator.state().clone();
    let err = coordinator
        .execute_snippet(&id("lists_collections"), "print(1)")
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::InvalidInput(_)));
    assert_eq!(coordinator.state(), &before);
}

#[tokio::test]
async fn bundled_snippets_run_cleanly() {
    let mut coordinator = services().start_session();
    let chapters: Vec<(ChapterId, String, String)> = coordinator
        .catalog()
        .chapters()
        .iter()
        .map(|c| {
            (
                c.id().clone(),
                c.example_code().to_owned(),
                c.starter_code().to_owned(),
            )
        })
        .collect();

    for (chapter, example, starter) in chapters {
        for source in [example, starter] {
            let result = coordinator.run_current(&source).await.unwrap();
            assert!(result.success, "{chapter}: {:?}", result.error);
            assert!(!result.output.is_empty(), "{chapter}");
        }
        pass_current(&mut coordinator);
        if coordinator.next_chapter().is_err() {
            break;
        }
    }
}

//
// ─── QUIZ & PROGRESSION ────────────────────────────────────────────────────────
//

#[tokio::test]
async fn failed_quiz_keeps_chapter_open() {
    let mut coordinator = services().start_session();
    let intro = id("python_intro");
    let answers = wrong_answers(coordinator.catalog(), &intro);

    let outcome = coordinator.submit_quiz(&intro, &answers).unwrap();
    assert!(!outcome.passed);
    assert!(!outcome.newly_completed);
    assert!(outcome.newly_unlocked.is_empty());
    assert_eq!(outcome.score.correct, 0);

    let view = coordinator.progress_snapshot();
    let item = view.chapter(&intro).unwrap();
    assert_eq!(item.status, ChapterStatus::Unlocked);
    assert_eq!(item.quiz_attempts, 1);
    assert_eq!(view.total_quiz_attempts, 1);
}

#[tokio::test]
async fn walking_the_whole_course() {
    let mut coordinator = services().start_session();
    for _ in 0..4 {
        pass_current(&mut coordinator);
        coordinator.next_chapter().unwrap();
    }
    pass_current(&mut coordinator);

    let err = coordinator.next_chapter().unwrap_err();
    assert_eq!(err.user_message(), "This is the last chapter.");

    let view = coordinator.progress_snapshot();
    assert_eq!(view.completed_chapters, 5);
    assert_eq!(view.percent_complete(), 100);
    assert_eq!(view.average_best_score(), Some(100));
}

#[tokio::test]
async fn retaking_a_completed_quiz_never_regresses() {
    let mut coordinator = services().start_session();
    let intro = id("python_intro");
    pass_current(&mut coordinator);

    let answers = wrong_answers(coordinator.catalog(), &intro);
    let outcome = coordinator.submit_quiz(&intro, &answers).unwrap();
    assert!(!outcome.passed);

    let view = coordinator.progress_snapshot();
    let item = view.chapter(&intro).unwrap();
    assert_eq!(item.status, ChapterStatus::Completed);
    assert_eq!(item.best_quiz_score.unwrap().correct, 3);
    assert_eq!(item.quiz_attempts, 2);
    assert_eq!(
        view.chapter(&id("variables_datatypes")).unwrap().status,
        ChapterStatus::Unlocked
    );
}

const FIVE_QUESTION_COURSE: &str = r#"[
    {
        "id": "basics",
        "ordinal": 1,
        "title": "Basics",
        "theory": "Numbers.",
        "example_code": "print(1)",
        "quiz": [
            {"prompt": "1 + 1?", "options": ["2", "3"], "correct_index": 0},
            {"prompt": "2 + 2?", "options": ["4", "5"], "correct_index": 0},
            {"prompt": "3 + 3?", "options": ["6", "7"], "correct_index": 0},
            {"prompt": "4 + 4?", "options": ["8", "9"], "correct_index": 0},
            {"prompt": "5 + 5?", "options": ["10", "11"], "correct_index": 0}
        ]
    },
    {
        "id": "more",
        "ordinal": 2,
        "title": "More",
        "theory": "More numbers.",
        "example_code": "print(2)",
        "quiz": [{"prompt": "?", "options": ["a", "b"], "correct_index": 1}],
        "prerequisites": ["basics"]
    }
]"#;

fn five_question_session(threshold: PassThreshold) -> SessionCoordinator {
    let config = SessionConfig {
        pass_threshold: threshold,
        ..SessionConfig::default()
    };
    AppServices::in_memory(catalog_from_json(FIVE_QUESTION_COURSE).unwrap(), config, fixed_clock())
        .start_session()
}

#[tokio::test]
async fn pass_threshold_decides_completion() {
    let basics = id("basics");

    let mut majority = five_question_session(PassThreshold::Majority);
    assert!(!majority.submit_quiz(&basics, &[0, 1, 1, 1, 1]).unwrap().passed);
    assert!(majority.submit_quiz(&basics, &[0, 0, 0, 1, 1]).unwrap().passed);

    let mut all = five_question_session(PassThreshold::All);
    assert!(!all.submit_quiz(&basics, &[0, 0, 0, 0, 1]).unwrap().passed);
    let outcome = all.submit_quiz(&basics, &[0, 0, 0, 0, 0]).unwrap();
    assert!(outcome.passed);
    assert_eq!(outcome.newly_unlocked, vec![id("more")]);

    let mut percent = five_question_session(PassThreshold::Percent(80));
    assert!(!percent.submit_quiz(&basics, &[0, 0, 0, 1, 1]).unwrap().passed);
    assert!(percent.submit_quiz(&basics, &[0, 0, 0, 0, 1]).unwrap().passed);
}

#[tokio::test]
async fn out_of_range_option_is_invalid_input() {
    let mut coordinator = five_question_session(PassThreshold::Majority);
    let before = coordinator.state().clone();
    let err = coordinator
        .submit_quiz(&id("basics"), &[0, 0, 0, 0, 7])
        .unwrap_err();
    assert!(matches!(err, SessionError::InvalidInput(_)));
    assert_eq!(coordinator.state(), &before);
}

//
// ─── TIME TRACKING ─────────────────────────────────────────────────────────────
//

#[tokio::test]
async fn time_is_charged_to_the_chapter_being_left() {
    let mut clock = Clock::manual(fixed_now());
    let services = AppServices::in_memory(
        bundled_catalog().unwrap(),
        SessionConfig::default(),
        clock.clone(),
    );
    let mut coordinator = services.start_session();

    clock.advance(chrono::Duration::seconds(90));
    pass_current(&mut coordinator);
    coordinator.next_chapter().unwrap();

    clock.advance(chrono::Duration::seconds(30));
    coordinator.previous_chapter().unwrap();

    let view = coordinator.progress_snapshot();
    assert_eq!(view.chapter(&id("python_intro")).unwrap().time_spent_secs, 90);
    assert_eq!(
        view.chapter(&id("variables_datatypes")).unwrap().time_spent_secs,
        30
    );
}

#[tokio::test]
async fn frequent_saves_keep_sub_second_time() {
    let mut clock = Clock::manual(fixed_now());
    let services = AppServices::in_memory(
        bundled_catalog().unwrap(),
        SessionConfig::default(),
        clock.clone(),
    );
    let mut coordinator = services.start_session();

    for _ in 0..10 {
        clock.advance(chrono::Duration::milliseconds(900));
        coordinator.save().await.unwrap();
    }

    let view = coordinator.progress_snapshot();
    assert_eq!(view.chapter(&id("python_intro")).unwrap().time_spent_secs, 9);
}

//
// ─── EXPORT / IMPORT ───────────────────────────────────────────────────────────
//

#[tokio::test]
async fn export_then_import_reproduces_the_session() {
    let services = services();
    let mut original = services.start_session();
    original.run_current("print('hi')").await.unwrap();
    pass_current(&mut original);
    original.next_chapter().unwrap();
    original.run_current("x = 1").await.unwrap();

    let json = original.export().unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(value["version"], 1);
    assert_eq!(value["current_chapter"], "variables_datatypes");
    assert_eq!(value["total_code_runs"], 2);
    assert_eq!(value["chapters"]["python_intro"]["completed"], true);
    assert_eq!(value["chapters"]["python_intro"]["best_quiz_score"]["total"], 3);

    let mut copy = services.start_session();
    copy.import(&json).unwrap();
    assert_eq!(copy.state(), original.state());
    assert_eq!(copy.session_id(), original.session_id());
}

#[tokio::test]
async fn import_rejects_inconsistent_records() {
    let services = services();
    let mut coordinator = services.start_session();
    let before = coordinator.state().clone();
    let mut snapshot: SessionSnapshot =
        serde_json::from_str(&coordinator.export().unwrap()).unwrap();

    let mut completed_while_locked = snapshot.clone();
    if let Some(record) = completed_while_locked.chapters.get_mut(&id("operations")) {
        record.completed = true;
    }
    let err = coordinator
        .import(&serde_json::to_string(&completed_while_locked).unwrap())
        .unwrap_err();
    assert!(matches!(err, SessionError::Snapshot(_)));

    let mut unmet = snapshot.clone();
    if let Some(record) = unmet.chapters.get_mut(&id("operations")) {
        record.unlocked = true;
    }
    assert!(
        coordinator
            .import(&serde_json::to_string(&unmet).unwrap())
            .is_err()
    );

    snapshot.version = 99;
    assert!(
        coordinator
            .import(&serde_json::to_string(&snapshot).unwrap())
            .is_err()
    );

    let err = coordinator.import("{not json").unwrap_err();
    assert!(matches!(err, SessionError::Export(_)));

    assert_eq!(coordinator.state(), &before);
}

#[tokio::test]
async fn import_rejects_unknown_chapters() {
    let mut coordinator = services().start_session();
    let json = coordinator.export().unwrap().replace("control_flow", "metaclasses");
    assert!(matches!(
        coordinator.import(&json),
        Err(SessionError::Snapshot(_))
    ));
}

//
// ─── PERSISTENCE ───────────────────────────────────────────────────────────────
//

#[tokio::test]
async fn save_and_resume_in_memory() {
    let services = services();
    let mut coordinator = services.start_session();
    coordinator.run_current("print(42)").await.unwrap();
    pass_current(&mut coordinator);
    coordinator.save().await.unwrap();

    let resumed = services
        .resume_session(coordinator.session_id())
        .await
        .unwrap();
    assert_eq!(resumed.state(), coordinator.state());

    let recent = services.recent_sessions(5).await.unwrap();
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].session_id, coordinator.session_id());
}

#[tokio::test]
async fn restoring_an_unknown_session_is_not_found() {
    let services = services();
    let mut coordinator = services.start_session();
    let before = coordinator.state().clone();
    let err = coordinator
        .restore(learn_core::model::SessionId::generate())
        .await
        .unwrap_err();
    assert_eq!(
        err.user_message(),
        "No saved progress was found for that session."
    );
    assert_eq!(coordinator.state(), &before);
}

#[tokio::test]
async fn sqlite_backed_session_survives_a_restart() {
    let url = "sqlite:file:memdb_services_restart?mode=memory&cache=shared";
    let storage = Storage::sqlite(url).await.expect("sqlite");
    for chapter in bundled_catalog().unwrap().chapters() {
        storage.chapters.upsert_chapter(chapter).await.unwrap();
    }

    let services = AppServices::from_storage(&storage, SessionConfig::default(), fixed_clock())
        .await
        .unwrap();
    let mut coordinator = services.start_session();
    coordinator.run_current("print('saved')").await.unwrap();
    pass_current(&mut coordinator);
    coordinator.next_chapter().unwrap();
    coordinator.save().await.unwrap();

    let reopened = Storage::sqlite(url).await.expect("reopen");
    let services = AppServices::from_storage(&reopened, SessionConfig::default(), fixed_clock())
        .await
        .unwrap();
    let resumed = services
        .resume_session(coordinator.session_id())
        .await
        .unwrap();
    assert_eq!(resumed.state(), coordinator.state());
    assert_eq!(
        resumed.current_chapter().unwrap().id(),
        &id("variables_datatypes")
    );
}

//
// ─── EVENTS & CONCURRENCY ──────────────────────────────────────────────────────
//

#[tokio::test]
async fn events_follow_the_session() {
    let sink = MemoryEventSink::new();
    let services = services().with_events(Arc::new(sink.clone()));
    let mut coordinator = services.start_session();
    coordinator.run_current("print(1)").await.unwrap();
    pass_current(&mut coordinator);

    let names: Vec<&str> = sink.events().iter().map(LearningEvent::name).collect();
    assert_eq!(
        names,
        vec![
            "session_started",
            "execution_attempted",
            "quiz_submitted",
            "chapter_completed",
            "chapter_unlocked",
        ]
    );
    assert!(
        sink.events()
            .iter()
            .all(|e| e.session_id() == coordinator.session_id())
    );
}

#[tokio::test]
async fn learners_progress_independently() {
    let services = services();
    let mut first = services.start_session();
    let mut second = services.start_session();

    let a = tokio::spawn(async move {
        first.run_current("print('a')").await.unwrap();
        pass_current(&mut first);
        first
    });
    let b = tokio::spawn(async move {
        second.run_current("while True:\n    pass").await.unwrap();
        second
    });
    let (first, second) = (a.await.unwrap(), b.await.unwrap());

    assert_eq!(first.progress_snapshot().completed_chapters, 1);
    assert_eq!(second.progress_snapshot().completed_chapters, 0);
    assert_eq!(second.progress_snapshot().total_code_runs, 1);
    assert_ne!(first.session_id(), second.session_id());
}
