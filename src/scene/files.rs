//! Reading run inputs from disk and persisting intermediate artifacts.

use crate::error::{Result, RunError};
use crate::scene::{Character, CharacterRecord, PortraitRegistry, SceneScript};
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const STORY_FILE: &str = "story.txt";
pub const CHARACTERS_FILE: &str = "characters.json";
pub const REGISTRY_FILE: &str = "character_portraits_registry.json";
pub const SCRIPTS_FILE: &str = "scene_scripts.json";

async fn read_json(path: &Path, what: &str) -> Result<Value> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| RunError::io(format!("reading {} file {}", what, path.display()), e))?;
    serde_json::from_str(&text).map_err(|e| {
        RunError::Validation(format!("{} file {} is not valid JSON: {}", what, path.display(), e))
    })
}

/// Loads a script file holding either one scene payload or an array of them.
pub async fn load_scene_scripts(path: &Path) -> Result<Vec<SceneScript>> {
    info!("Loading script from {}", path.display());
    let value = read_json(path, "script").await?;

    let scenes = match value {
        Value::Array(items) => items.into_iter().map(scene_from_value).collect(),
        single => vec![scene_from_value(single)],
    };
    Ok(scenes)
}

fn scene_from_value(value: Value) -> SceneScript {
    match value {
        Value::String(text) => SceneScript::Text(text),
        other => SceneScript::Structured(other),
    }
}

/// Loads a characters file. Records that don't fit the `Character` shape are
/// passed through as raw JSON.
pub async fn load_characters(path: &Path) -> Result<Vec<CharacterRecord>> {
    info!("Loading characters from {}", path.display());
    let value = read_json(path, "characters").await?;

    let Value::Array(items) = value else {
        return Err(RunError::Validation(format!(
            "characters file {} must contain a JSON array",
            path.display()
        )));
    };

    let records = items
        .into_iter()
        .enumerate()
        .map(|(i, item)| match serde_json::from_value::<Character>(item.clone()) {
            Ok(character) => CharacterRecord::Validated(character),
            Err(e) => {
                warn!("Character record {} kept unvalidated: {}", i, e);
                CharacterRecord::Raw(item)
            }
        })
        .collect();
    Ok(records)
}

pub async fn load_portrait_registry(path: &Path) -> Result<PortraitRegistry> {
    info!("Loading registry from {}", path.display());
    let value = read_json(path, "portrait registry").await?;
    serde_json::from_value(value).map_err(|e| {
        RunError::Validation(format!(
            "portrait registry file {} has an unexpected shape: {}",
            path.display(),
            e
        ))
    })
}

/// Sibling path a file is written to before it is renamed into place.
pub fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

/// Writes `data` to `<path>.part` and renames it over `path`, so `path`
/// either holds the complete contents or does not exist.
pub async fn write_atomic(path: &Path, data: impl AsRef<[u8]>) -> std::io::Result<()> {
    let part = partial_path(path);
    tokio::fs::write(&part, data).await?;
    tokio::fs::rename(&part, path).await
}

/// True when `path` is a non-empty regular file. Leftover `.part` files
/// never count.
pub async fn is_complete(path: &Path) -> bool {
    match tokio::fs::metadata(path).await {
        Ok(metadata) => metadata.is_file() && metadata.len() > 0,
        Err(_) => false,
    }
}

pub async fn exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

pub async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| RunError::io(format!("serializing {}", path.display()), e.into()))?;
    write_atomic(path, text)
        .await
        .map_err(|e| RunError::io(format!("writing {}", path.display()), e))
}

pub async fn write_text(path: &Path, text: &str) -> Result<()> {
    write_atomic(path, text)
        .await
        .map_err(|e| RunError::io(format!("writing {}", path.display()), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_single_object_script_is_one_scene() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("script.json");
        std::fs::write(&path, r#"{"scene": 1, "dialogue": "Xin chào"}"#).unwrap();

        let scenes = load_scene_scripts(&path).await.unwrap();
        assert_eq!(scenes.len(), 1);
        assert!(matches!(scenes[0], SceneScript::Structured(_)));
    }

    #[tokio::test]
    async fn test_array_script_keeps_order_and_kinds() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("script.json");
        std::fs::write(&path, r#"["opening shot", {"scene": 2}, "closing shot"]"#).unwrap();

        let scenes = load_scene_scripts(&path).await.unwrap();
        assert_eq!(scenes.len(), 3);
        assert_eq!(scenes[0], SceneScript::Text("opening shot".into()));
        assert_eq!(scenes[1].payload(), r#"{"scene": 2}"#);
        assert_eq!(scenes[2].payload(), "closing shot");
    }

    #[tokio::test]
    async fn test_invalid_script_json_is_validation_error() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("script.json");
        std::fs::write(&path, "not json").unwrap();

        let err = load_scene_scripts(&path).await.unwrap_err();
        assert!(matches!(err, RunError::Validation(_)));
    }

    #[tokio::test]
    async fn test_missing_script_is_io_error() {
        let dir = TempDir::new().expect("temp dir");
        let err = load_scene_scripts(&dir.path().join("nope.json")).await.unwrap_err();
        assert!(matches!(err, RunError::Io { .. }));
    }

    #[tokio::test]
    async fn test_characters_fall_back_to_raw_records() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("characters.json");
        std::fs::write(
            &path,
            r#"[{"name": "Lan", "description": "a painter"}, {"identifier_in_scene": "Minh", "idx": 1}]"#,
        )
        .unwrap();

        let characters = load_characters(&path).await.unwrap();
        assert_eq!(characters.len(), 2);
        assert!(characters[0].is_validated());
        assert!(!characters[1].is_validated());
        assert_eq!(characters[1].name(), Some("Minh"));
    }

    #[tokio::test]
    async fn test_characters_must_be_array() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("characters.json");
        std::fs::write(&path, r#"{"name": "Lan"}"#).unwrap();

        assert!(matches!(
            load_characters(&path).await,
            Err(RunError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_registry_written_then_loaded() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join(REGISTRY_FILE);
        let mut registry = PortraitRegistry::new();
        registry.insert("Lan", "front", "portraits/lan_front.png");

        write_json(&path, &registry).await.unwrap();
        let loaded = load_portrait_registry(&path).await.unwrap();
        assert_eq!(loaded, registry);
    }

    #[tokio::test]
    async fn test_stale_part_file_is_not_complete() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("scene.mp4");
        std::fs::write(partial_path(&path), b"half a vid").unwrap();

        assert!(!is_complete(&path).await);

        write_atomic(&path, b"whole video").await.unwrap();
        assert!(is_complete(&path).await);
        assert!(!partial_path(&path).exists());
        assert_eq!(std::fs::read(&path).unwrap(), b"whole video");
    }

    #[tokio::test]
    async fn test_empty_file_is_not_complete() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("lan_front.png");
        std::fs::write(&path, b"").unwrap();
        assert!(!is_complete(&path).await);
    }

    #[test]
    fn test_partial_path_keeps_extension() {
        assert_eq!(
            partial_path(Path::new("/w/scene_0/scene.mp4")),
            PathBuf::from("/w/scene_0/scene.mp4.part")
        );
    }
}
