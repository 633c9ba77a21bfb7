#![forbid(unsafe_code)]

pub mod app_services;
pub mod config;
pub mod error;
pub mod events;
pub mod sessions;

pub use learn_core::Clock;
pub use sessions as session;

pub use app_services::{AppServices, load_catalog};
pub use config::{ConfigError, SessionConfig};
pub use error::{AppServicesError, SessionError};
pub use events::{
    ChannelEventSink, EventSink, LearningEvent, MemoryEventSink, NoopEventSink, TracingEventSink,
};
pub use sessions::{ChapterProgressItem, ProgressView, SessionCoordinator};
