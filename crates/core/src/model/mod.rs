pub(crate) mod chapter;
mod ids;
mod progress;
pub(crate) mod quiz;
mod session;

pub use chapter::{Chapter, ChapterCatalog, ChapterDraft, CatalogError, ChapterError};
pub use ids::{ChapterId, MAX_CHAPTER_ID_LEN, ParseIdError, SessionId};
pub use progress::{ChapterProgress, ChapterStatus, ProgressError, ProgressStore};
pub use quiz::{
    Difficulty, GradedQuiz, QuestionFeedback, QuizDefinition, QuizError, QuizQuestion, QuizScore,
};
pub use session::{
    ChapterProgressRecord, SNAPSHOT_VERSION, SessionSnapshot, SessionState, SnapshotError,
};
