mod coordinator;
mod view;

// Public API of the session subsystem.
pub use crate::error::SessionError;
pub use coordinator::SessionCoordinator;
pub use view::{ChapterProgressItem, ProgressView};
