pub mod files;

use crate::error::{Result, RunError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

/// Story text produced from an idea. Immutable once developed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Story(String);

impl Story {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Story {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A character appearing in the story.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Character {
    /// Also the key into the portrait registry
    pub name: String,
    /// Appearance and personality notes
    pub description: String,
}

impl Character {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}

/// A character record as handed to scene rendering.
///
/// Records loaded from a characters file that do not match the `Character`
/// shape are kept as `Raw` rather than dropped.
#[derive(Debug, Clone, PartialEq)]
pub enum CharacterRecord {
    Validated(Character),
    Raw(serde_json::Value),
}

impl CharacterRecord {
    pub fn name(&self) -> Option<&str> {
        match self {
            CharacterRecord::Validated(c) => Some(&c.name),
            CharacterRecord::Raw(value) => value
                .get("name")
                .or_else(|| value.get("identifier_in_scene"))
                .and_then(|v| v.as_str()),
        }
    }

    /// One-line text form used in prompts.
    pub fn describe(&self) -> String {
        match self {
            CharacterRecord::Validated(c) => format!("{}: {}", c.name, c.description),
            CharacterRecord::Raw(value) => value.to_string(),
        }
    }

    pub fn is_validated(&self) -> bool {
        matches!(self, CharacterRecord::Validated(_))
    }
}

impl From<Character> for CharacterRecord {
    fn from(character: Character) -> Self {
        CharacterRecord::Validated(character)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortraitAsset {
    pub path: PathBuf,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl PortraitAsset {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            extra: BTreeMap::new(),
        }
    }
}

pub const FRONT_POSE: &str = "front";

/// Character name -> pose -> image asset.
///
/// Built once per run and only read afterwards; scene renders share it by
/// reference.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PortraitRegistry(BTreeMap<String, BTreeMap<String, PortraitAsset>>);

impl PortraitRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, pose: impl Into<String>, path: impl Into<PathBuf>) {
        self.0
            .entry(name.into())
            .or_default()
            .insert(pose.into(), PortraitAsset::new(path));
    }

    pub fn front(&self, name: &str) -> Option<&Path> {
        self.0
            .get(name)
            .and_then(|poses| poses.get(FRONT_POSE))
            .map(|asset| asset.path.as_path())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Script content for one scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SceneScript {
    Text(String),
    Structured(serde_json::Value),
}

impl SceneScript {
    /// Text handed to the scene renderer. Structured payloads become one-line
    /// JSON with `", "` / `": "` separators, keys in file order and
    /// non-ASCII characters kept as-is.
    pub fn payload(&self) -> String {
        match self {
            SceneScript::Text(text) => text.clone(),
            SceneScript::Structured(serde_json::Value::String(text)) => text.clone(),
            SceneScript::Structured(value) => spaced_json(value),
        }
    }
}

/// Single-line JSON with a space after every `,` and `:`.
struct SpacedFormatter;

impl serde_json::ser::Formatter for SpacedFormatter {
    fn begin_array_value<W: ?Sized + io::Write>(&mut self, writer: &mut W, first: bool) -> io::Result<()> {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_key<W: ?Sized + io::Write>(&mut self, writer: &mut W, first: bool) -> io::Result<()> {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        writer.write_all(b": ")
    }
}

fn spaced_json(value: &serde_json::Value) -> String {
    let mut buf = Vec::new();
    let mut serializer = serde_json::Serializer::with_formatter(&mut buf, SpacedFormatter);
    match value.serialize(&mut serializer) {
        Ok(()) => String::from_utf8(buf).unwrap_or_else(|_| value.to_string()),
        Err(_) => value.to_string(),
    }
}

impl From<&str> for SceneScript {
    fn from(text: &str) -> Self {
        SceneScript::Text(text.to_string())
    }
}

impl From<String> for SceneScript {
    fn from(text: String) -> Self {
        SceneScript::Text(text)
    }
}

/// One rendered scene.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneResult {
    /// Position in the final concatenation
    pub index: usize,
    pub video_path: PathBuf,
}

/// What the user asked for. Exactly one of `idea` / `script_path` is set.
#[derive(Debug, Clone, Default)]
pub struct GenerationRequest {
    pub idea: Option<String>,
    pub requirement: String,
    pub style: String,
    pub script_path: Option<PathBuf>,
    pub characters_path: Option<PathBuf>,
    pub registry_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunMode<'a> {
    Idea {
        idea: &'a str,
    },
    Script {
        script_path: &'a Path,
        characters_path: Option<&'a Path>,
        registry_path: Option<&'a Path>,
    },
}

impl GenerationRequest {
    pub fn mode(&self) -> Result<RunMode<'_>> {
        match (&self.idea, &self.script_path) {
            (Some(idea), None) => Ok(RunMode::Idea { idea }),
            (None, Some(script_path)) => Ok(RunMode::Script {
                script_path,
                characters_path: self.characters_path.as_deref(),
                registry_path: self.registry_path.as_deref(),
            }),
            (Some(_), Some(_)) => Err(RunError::Validation(
                "either an idea or a script file must be given, not both".to_string(),
            )),
            (None, None) => Err(RunError::Validation(
                "an idea or a script file is required".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_structured_payload_keeps_unicode() {
        let script = SceneScript::Structured(json!({"scene": "Cảnh 1", "shots": 2}));
        assert_eq!(script.payload(), r#"{"scene": "Cảnh 1", "shots": 2}"#);
    }

    #[test]
    fn test_structured_payload_keeps_file_key_order() {
        let script: SceneScript =
            serde_json::from_str(r#"{"title": "Dawn", "cast": ["Lan", "Minh"], "beats": {"b": 1, "a": []}}"#)
                .unwrap();
        assert_eq!(
            script.payload(),
            r#"{"title": "Dawn", "cast": ["Lan", "Minh"], "beats": {"b": 1, "a": []}}"#
        );
    }

    #[test]
    fn test_registry_front_lookup() {
        let mut registry = PortraitRegistry::new();
        registry.insert("Alice", "front", "/tmp/alice_front.png");
        registry.insert("Bob", "side", "/tmp/bob_side.png");

        assert_eq!(registry.front("Alice"), Some(Path::new("/tmp/alice_front.png")));
        assert_eq!(registry.front("Bob"), None);
        assert_eq!(registry.front("Carol"), None);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_registry_deserializes_nested_shape() {
        let registry: PortraitRegistry = serde_json::from_value(json!({
            "Alice": {"front": {"path": "a.png"}, "back": {"path": "b.png", "seed": 7}}
        }))
        .unwrap();
        assert_eq!(registry.front("Alice"), Some(Path::new("a.png")));
    }

    #[test]
    fn test_request_mode_requires_exactly_one_input() {
        let request = GenerationRequest {
            idea: Some("a cat learns to fly".into()),
            ..Default::default()
        };
        assert!(matches!(request.mode(), Ok(RunMode::Idea { .. })));

        let request = GenerationRequest::default();
        assert!(matches!(request.mode(), Err(RunError::Validation(_))));

        let request = GenerationRequest {
            idea: Some("x".into()),
            script_path: Some("script.json".into()),
            ..Default::default()
        };
        assert!(matches!(request.mode(), Err(RunError::Validation(_))));
    }

    #[test]
    fn test_raw_character_name() {
        let raw = CharacterRecord::Raw(json!({"identifier_in_scene": "Minh", "is_visible": true}));
        assert_eq!(raw.name(), Some("Minh"));
        assert!(!raw.is_validated());
    }
}
