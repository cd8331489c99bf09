//! Turns a text idea or a prepared script into a rendered video by driving
//! chat, image and video generators through a cancellable, progress
//! reporting run.

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod logging;
pub mod orchestrator;
pub mod pipeline;
pub mod rate_limit;
pub mod scene;
pub mod video;

pub use cache::{clear_working_dir, CacheReset};
pub use config::{ChatSettings, ConfigDocument, GeneratorSettings, Profile, SettingsStore, SettingsUpdate};
pub use error::{ConfigError, GeneratorError, RunError};
pub use orchestrator::{Progress, RunOutcome, SceneOrchestrator, Stage};
