//! Collaborators the orchestrator drives.
//!
//! The orchestrator only sees these traits; the chat/media backed
//! implementations live in [`story`] and [`script`], and tests substitute
//! call-counting fakes.

mod script;
mod story;

pub use script::ChatScriptPipeline;
pub use story::ChatStoryPipeline;

use crate::error::GeneratorResult;
use crate::scene::{Character, CharacterRecord, PortraitRegistry, SceneScript, Story};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// idea -> story -> characters -> portraits -> per-scene scripts.
#[async_trait]
pub trait StoryPipeline: Send + Sync {
    async fn develop_story(&self, idea: &str, requirement: &str) -> GeneratorResult<Story>;

    async fn extract_characters(&self, story: &Story) -> GeneratorResult<Vec<Character>>;

    /// Generates portraits under `output_dir`. Characters the generator
    /// could not depict may be absent from the returned registry.
    async fn generate_portraits(
        &self,
        characters: &[Character],
        style: &str,
        output_dir: &Path,
    ) -> GeneratorResult<PortraitRegistry>;

    async fn write_script(&self, story: &Story, requirement: &str) -> GeneratorResult<Vec<SceneScript>>;
}

/// Everything needed to render one scene.
#[derive(Debug, Clone, Copy)]
pub struct SceneRenderRequest<'a> {
    pub index: usize,
    pub script: &'a str,
    pub requirement: &'a str,
    pub style: &'a str,
    pub characters: &'a [CharacterRecord],
    pub registry: &'a PortraitRegistry,
    /// Scene-private directory; the renderer writes all its files here.
    pub working_dir: &'a Path,
}

/// Renders one scene script into a video file.
#[async_trait]
pub trait ScriptPipeline: Send + Sync {
    async fn render_scene(&self, request: SceneRenderRequest<'_>) -> GeneratorResult<PathBuf>;
}

pub(crate) fn file_stem_for(name: &str) -> String {
    let stem: String = name
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect();
    if stem.is_empty() {
        "unnamed".to_string()
    } else {
        stem
    }
}
