use super::{SceneRenderRequest, ScriptPipeline};
use crate::api::{ChatClient, MediaClient};
use crate::error::GeneratorResult;
use crate::scene::{files, CharacterRecord, PortraitRegistry};
use async_trait::async_trait;
use std::path::PathBuf;
use tracing::{info, warn};

const SHOT_SYSTEM: &str = "You direct a text-to-video model. Turn the scene script into a single \
     shot description (camera, setting, characters, action, mood) of at most 120 words. \
     Reply with the description only.";

pub const SCENE_VIDEO_FILE: &str = "scene.mp4";
pub const SHOT_PROMPT_FILE: &str = "shot_prompt.txt";

pub struct ChatScriptPipeline {
    chat: ChatClient,
    videos: MediaClient,
}

impl ChatScriptPipeline {
    pub fn new(chat: ChatClient, videos: MediaClient) -> Self {
        Self { chat, videos }
    }
}

/// Characters named in the script, in record order.
fn cast<'a>(script: &str, characters: &'a [CharacterRecord]) -> Vec<&'a CharacterRecord> {
    characters
        .iter()
        .filter(|c| c.name().is_some_and(|name| !name.is_empty() && script.contains(name)))
        .collect()
}

/// First cast member whose front portrait exists on disk. Members without
/// one are skipped.
async fn reference_portrait(cast: &[&CharacterRecord], registry: &PortraitRegistry) -> Option<PathBuf> {
    for member in cast {
        let Some(name) = member.name() else { continue };
        match registry.front(name) {
            Some(path) if files::is_complete(path).await => return Some(path.to_path_buf()),
            Some(path) => warn!("Portrait not found at: {}", path.display()),
            None => warn!("No front portrait registered for {}", name),
        }
    }
    None
}

#[async_trait]
impl ScriptPipeline for ChatScriptPipeline {
    async fn render_scene(&self, request: SceneRenderRequest<'_>) -> GeneratorResult<PathBuf> {
        let output = request.working_dir.join(SCENE_VIDEO_FILE);
        if files::is_complete(&output).await {
            info!("Scene {} video already exists, skipping...", request.index);
            return Ok(output);
        }

        let cast = cast(request.script, request.characters);
        let cast_notes: Vec<String> = cast.iter().map(|c| c.describe()).collect();
        let prompt = format!(
            "Scene script:\n{}\n\nCharacters:\n{}\n\nRequirements:\n{}\n\nVisual style: {}",
            request.script,
            cast_notes.join("\n"),
            request.requirement,
            request.style
        );

        let shot = self.chat.complete(Some(SHOT_SYSTEM), &prompt).await?;
        let shot = shot.trim();
        files::write_atomic(&request.working_dir.join(SHOT_PROMPT_FILE), shot).await?;

        let reference = reference_portrait(&cast, request.registry).await;
        self.videos
            .generate(shot, reference.as_deref(), &output)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::Character;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_cast_matches_names_in_script() {
        let characters = vec![
            CharacterRecord::Validated(Character::new("Lan", "a painter")),
            CharacterRecord::Validated(Character::new("Minh", "a fisherman")),
            CharacterRecord::Raw(json!({"identifier_in_scene": "Hoa"})),
        ];
        let cast = cast("Lan meets Hoa at the harbour", &characters);
        let names: Vec<_> = cast.iter().filter_map(|c| c.name()).collect();
        assert_eq!(names, vec!["Lan", "Hoa"]);
    }

    #[tokio::test]
    async fn test_reference_portrait_skips_missing_files() {
        let dir = TempDir::new().expect("temp dir");
        let present = dir.path().join("minh_front.png");
        std::fs::write(&present, b"png").unwrap();

        let mut registry = PortraitRegistry::new();
        registry.insert("Lan", "front", dir.path().join("lan_front.png"));
        registry.insert("Minh", "front", &present);

        let lan = CharacterRecord::Validated(Character::new("Lan", "a painter"));
        let minh = CharacterRecord::Validated(Character::new("Minh", "a fisherman"));
        let nobody = CharacterRecord::Validated(Character::new("Hoa", "a baker"));

        let found = reference_portrait(&[&nobody, &lan, &minh], &registry).await;
        assert_eq!(found, Some(present));

        assert_eq!(reference_portrait(&[&nobody], &registry).await, None);
    }
}
