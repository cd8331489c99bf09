use super::{resolve_secret, ConfigDocument, GeneratorSettings};
use crate::api::{ChatClient, MediaClient, MediaKind, DASHSCOPE_BASE_URL};
use crate::error::{ConfigError, ConfigResult};
use crate::pipeline::{ChatScriptPipeline, ChatStoryPipeline};
use crate::rate_limit::RateLimiter;
use std::sync::Arc;
use tracing::info;

const DEFAULT_CHAT_BASE_URL: &str = "https://openrouter.ai/api/v1";
const CHAT_KEY_ENV: &str = "OPENROUTER_API_KEY";
const GENERATOR_KEY_ENV: &str = "DASHSCOPE_API_KEY";

/// The concrete pipelines a profile describes.
pub struct Collaborators {
    pub story: ChatStoryPipeline,
    pub script: ChatScriptPipeline,
}

fn media_client(
    kind: MediaKind,
    section: Option<GeneratorSettings>,
    name: &str,
) -> ConfigResult<MediaClient> {
    let section = section.ok_or_else(|| ConfigError::Invalid(format!("missing {} section", name)))?;

    if let Some(class_path) = &section.class_path {
        if !class_path.starts_with("dashscope") {
            return Err(ConfigError::Invalid(format!(
                "{}.class_path '{}' is not supported (expected dashscope.*)",
                name, class_path
            )));
        }
    }

    let api_key = resolve_secret(section.api_key.as_deref(), GENERATOR_KEY_ENV).ok_or_else(|| {
        ConfigError::Invalid(format!(
            "{}.init_args.api_key is not set (or set {})",
            name, GENERATOR_KEY_ENV
        ))
    })?;
    let model = section
        .model
        .ok_or_else(|| ConfigError::Invalid(format!("{}.init_args.model is not set", name)))?;
    let base_url = section.base_url.as_deref().unwrap_or(DASHSCOPE_BASE_URL);

    let limiter = Arc::new(RateLimiter::new(name, section.limits));
    info!("{} uses {} at {}", name, model, base_url);

    let client = MediaClient::new(kind, model, api_key, base_url, limiter)
        .map_err(|e| ConfigError::Invalid(format!("{}: {}", name, e)))?;
    Ok(client.with_reference_model(section.reference_model))
}

impl Collaborators {
    pub fn from_document(document: &ConfigDocument) -> ConfigResult<Self> {
        let chat_section = document
            .chat_model()
            .ok_or_else(|| ConfigError::Invalid("missing chat_model section".to_string()))?;

        let api_key = resolve_secret(chat_section.api_key.as_deref(), CHAT_KEY_ENV).ok_or_else(|| {
            ConfigError::Invalid(format!(
                "chat_model.init_args.api_key is not set (or set {})",
                CHAT_KEY_ENV
            ))
        })?;
        let model = chat_section
            .model
            .ok_or_else(|| ConfigError::Invalid("chat_model.init_args.model is not set".to_string()))?;
        let base_url = chat_section.base_url.as_deref().unwrap_or(DEFAULT_CHAT_BASE_URL);

        let chat_limiter = Arc::new(RateLimiter::new("chat_model", chat_section.limits));
        let chat = ChatClient::new(model, api_key, base_url, chat_limiter)
            .map_err(|e| ConfigError::Invalid(format!("chat_model: {}", e)))?;

        let images = media_client(MediaKind::Image, document.image_generator(), "image_generator")?;
        let videos = media_client(MediaKind::Video, document.video_generator(), "video_generator")?;

        Ok(Self {
            story: ChatStoryPipeline::new(chat.clone(), images),
            script: ChatScriptPipeline::new(chat, videos),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{default_document, Profile, SettingsUpdate};

    #[test]
    fn test_unsupported_selector_rejected() {
        let mut document = default_document(Profile::Idea2Video);
        document.apply(&SettingsUpdate {
            chat_api_key: Some("sk-chat".into()),
            generator_api_key: Some("sk-media".into()),
            ..Default::default()
        });
        document.set(
            &["image_generator", "class_path"],
            "tools.ImageGeneratorNanobananaGoogleAPI",
        );

        let err = Collaborators::from_document(&document).err().expect("should fail");
        assert!(err.to_string().contains("image_generator.class_path"));
    }

    #[test]
    fn test_configured_document_builds() {
        let mut document = default_document(Profile::Script2Video);
        document.apply(&SettingsUpdate {
            chat_api_key: Some("sk-chat".into()),
            generator_api_key: Some("sk-media".into()),
            ..Default::default()
        });
        assert!(Collaborators::from_document(&document).is_ok());
    }

    #[test]
    fn test_numeric_api_key_is_used_as_text() {
        let mut document = default_document(Profile::Script2Video);
        document.apply(&SettingsUpdate {
            generator_api_key: Some("sk-media".into()),
            ..Default::default()
        });
        document.set(&["chat_model", "init_args", "api_key"], 12345);
        assert!(Collaborators::from_document(&document).is_ok());
    }

    #[test]
    fn test_missing_chat_section_rejected() {
        let document = ConfigDocument::default();
        assert!(matches!(
            Collaborators::from_document(&document),
            Err(ConfigError::Invalid(_))
        ));
    }
}
