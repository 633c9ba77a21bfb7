use learn_core::model::{ChapterId, ChapterStatus};
use learn_core::time::fixed_clock;
use proptest::prelude::*;
use services::{AppServices, ProgressView, SessionConfig};
use storage::catalog::bundled_catalog;

#[derive(Debug, Clone)]
enum Op {
    Quiz { chapter: usize, answers: Vec<usize> },
    Open(usize),
    Next,
    Previous,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0usize..5, prop::collection::vec(0usize..4, 3)).prop_map(|(chapter, answers)| Op::Quiz {
            chapter,
            answers
        }),
        (0usize..5).prop_map(Op::Open),
        Just(Op::Next),
        Just(Op::Previous),
    ]
}

fn rank(status: ChapterStatus) -> u8 {
    match status {
        ChapterStatus::Locked => 0,
        ChapterStatus::Unlocked => 1,
        ChapterStatus::Completed => 2,
    }
}

fn ranks(view: &ProgressView) -> Vec<u8> {
    view.chapters.iter().map(|c| rank(c.status)).collect()
}

proptest! {
    #[test]
    fn progress_never_moves_backwards(ops in prop::collection::vec(op(), 1..40)) {
        let services = AppServices::in_memory(
            bundled_catalog().unwrap(),
            SessionConfig::default(),
            fixed_clock(),
        );
        let ids: Vec<ChapterId> = services.catalog().chapters().iter().map(|c| c.id().clone()).collect();
        let mut coordinator = services.start_session();
        let mut before = coordinator.progress_snapshot();

        for op in ops {
            let _ = match op {
                Op::Quiz { chapter, answers } => coordinator.submit_quiz(&ids[chapter], &answers).map(|_| ()),
                Op::Open(chapter) => coordinator.open_chapter(&ids[chapter]).map(|_| ()),
                Op::Next => coordinator.next_chapter().map(|_| ()),
                Op::Previous => coordinator.previous_chapter().map(|_| ()),
            };
            let after = coordinator.progress_snapshot();

            for (was, now) in ranks(&before).into_iter().zip(ranks(&after)) {
                prop_assert!(now >= was);
            }
            prop_assert!(after.total_quiz_attempts >= before.total_quiz_attempts);
            prop_assert!(after.chapter(&after.current_chapter).unwrap().status != ChapterStatus::Locked);

            for (item, chapter) in after.chapters.iter().zip(services.catalog().chapters()) {
                if item.status != ChapterStatus::Locked {
                    for prerequisite in chapter.prerequisites() {
                        prop_assert_eq!(
                            after.chapter(prerequisite).unwrap().status,
                            ChapterStatus::Completed
                        );
                    }
                }
            }
            before = after;
        }
    }
}
