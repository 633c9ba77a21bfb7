#![forbid(unsafe_code)]

pub mod error;
pub mod model;
pub mod progression;
pub mod time;

pub use error::Error;
pub use progression::{PassThreshold, Progression, ProgressionError, QuizOutcome};
pub use time::Clock;
