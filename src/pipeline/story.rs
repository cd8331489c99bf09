use super::{file_stem_for, StoryPipeline};
use crate::api::{ChatClient, MediaClient};
use crate::error::{GeneratorError, GeneratorResult};
use crate::scene::{files, Character, PortraitRegistry, SceneScript, Story, FRONT_POSE};
use async_trait::async_trait;
use serde_json::Value;
use std::path::Path;
use tracing::info;

const STORY_SYSTEM: &str = "You are a screenwriter. Expand the user's idea into a short, vivid story.";
const CHARACTERS_SYSTEM: &str = "List the characters of the story as a JSON array of objects with \
     \"name\" and \"description\" (appearance, clothing, personality). Return only JSON.";
const SCRIPT_SYSTEM: &str = "Split the story into scenes for a short video. Return a JSON array with \
     one element per scene; each element describes setting, characters present, action and dialogue. \
     Return only JSON.";

pub struct ChatStoryPipeline {
    chat: ChatClient,
    images: MediaClient,
}

impl ChatStoryPipeline {
    pub fn new(chat: ChatClient, images: MediaClient) -> Self {
        Self { chat, images }
    }
}

#[async_trait]
impl StoryPipeline for ChatStoryPipeline {
    async fn develop_story(&self, idea: &str, requirement: &str) -> GeneratorResult<Story> {
        let prompt = format!("Idea:\n{}\n\nRequirements:\n{}", idea, requirement);
        let text = self.chat.complete(Some(STORY_SYSTEM), &prompt).await?;
        if text.trim().is_empty() {
            return Err(GeneratorError::Malformed("chat model returned an empty story".to_string()));
        }
        Ok(Story::new(text.trim()))
    }

    async fn extract_characters(&self, story: &Story) -> GeneratorResult<Vec<Character>> {
        let characters: Vec<Character> = self
            .chat
            .complete_json(Some(CHARACTERS_SYSTEM), story.as_str())
            .await?;
        info!("Extracted {} characters", characters.len());
        Ok(characters)
    }

    async fn generate_portraits(
        &self,
        characters: &[Character],
        style: &str,
        output_dir: &Path,
    ) -> GeneratorResult<PortraitRegistry> {
        tokio::fs::create_dir_all(output_dir).await?;
        let mut registry = PortraitRegistry::new();

        for (idx, character) in characters.iter().enumerate() {
            let path = output_dir.join(format!("{}_{}.png", file_stem_for(&character.name), FRONT_POSE));

            // Reuse portraits left by an earlier run.
            if files::is_complete(&path).await {
                info!("Portrait for {} already exists, skipping...", character.name);
            } else {
                let prompt = format!(
                    "Front-facing full-body portrait of {}. {}. Plain background. Style: {}",
                    character.name, character.description, style
                );
                self.images.generate(&prompt, None, &path).await?;
                info!(
                    "Generated portrait for {} ({}/{})",
                    character.name,
                    idx + 1,
                    characters.len()
                );
            }
            registry.insert(character.name.clone(), FRONT_POSE, path);
        }

        Ok(registry)
    }

    async fn write_script(&self, story: &Story, requirement: &str) -> GeneratorResult<Vec<SceneScript>> {
        let prompt = format!("Story:\n{}\n\nRequirements:\n{}", story, requirement);
        let scenes: Vec<Value> = self.chat.complete_json(Some(SCRIPT_SYSTEM), &prompt).await?;

        Ok(scenes
            .into_iter()
            .map(|scene| match scene {
                Value::String(text) => SceneScript::Text(text),
                other => SceneScript::Structured(other),
            })
            .collect())
    }
}
