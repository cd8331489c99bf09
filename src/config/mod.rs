//! Generator settings profiles.
//!
//! Each profile is a YAML document. The document is kept as the parsed YAML
//! mapping; known settings are read through lenient accessors and written
//! back into that same mapping, so a load/edit/save cycle never drops keys
//! written by other tools or newer versions, and a value of an unexpected
//! type never throws the rest of the file away.

mod wiring;

pub use wiring::Collaborators;

use crate::error::{ConfigError, ConfigResult};
use crate::rate_limit::RateLimits;
use serde_yaml::{Mapping, Value};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

pub const PLACEHOLDER_PREFIX: &str = "YOUR_";

pub const CHAT_SECTION: &str = "chat_model";
pub const IMAGE_SECTION: &str = "image_generator";
pub const VIDEO_SECTION: &str = "video_generator";
const INIT_ARGS: &str = "init_args";
const PER_MINUTE: &str = "max_requests_per_minute";
const PER_DAY: &str = "max_requests_per_day";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum)]
pub enum Profile {
    #[value(name = "idea2video")]
    Idea2Video,
    #[value(name = "script2video")]
    Script2Video,
}

impl Profile {
    pub const ALL: [Profile; 2] = [Profile::Idea2Video, Profile::Script2Video];

    pub fn file_name(self) -> &'static str {
        match self {
            Profile::Idea2Video => "idea2video.yaml",
            Profile::Script2Video => "script2video.yaml",
        }
    }

    pub fn default_working_dir(self) -> &'static str {
        match self {
            Profile::Idea2Video => ".working_dir/idea2video",
            Profile::Script2Video => ".working_dir/script2video",
        }
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Profile::Idea2Video => f.write_str("idea2video"),
            Profile::Script2Video => f.write_str("script2video"),
        }
    }
}

/// Known settings of the `chat_model` section.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatSettings {
    pub model: Option<String>,
    pub model_provider: Option<String>,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub limits: RateLimits,
}

/// Known settings of an `image_generator` / `video_generator` section.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GeneratorSettings {
    pub class_path: Option<String>,
    pub model: Option<String>,
    /// Model used instead of `model` when a reference image is supplied.
    pub reference_model: Option<String>,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub limits: RateLimits,
}

/// Reads a scalar as text. Numbers and booleans are accepted as written.
fn config_string(value: Option<&Value>, key: &str) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null => None,
        other => {
            warn!("Ignoring {}: expected text, found {:?}", key, other);
            None
        }
    }
}

/// Reads a non-negative count. Numeric strings such as `"10"` are accepted.
fn config_u32(value: Option<&Value>, key: &str) -> Option<u32> {
    let value = value?;
    let parsed = match value {
        Value::Null => return None,
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    match parsed.and_then(|n| u32::try_from(n).ok()) {
        Some(n) => Some(n),
        None => {
            warn!("Ignoring {}: expected a request count, found {:?}", key, value);
            None
        }
    }
}

/// One settings profile.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigDocument {
    root: Mapping,
}

impl ConfigDocument {
    /// Wraps a parsed YAML document. An empty document is an empty profile;
    /// anything other than a mapping at the top level is rejected.
    pub fn from_value(value: Value) -> ConfigResult<Self> {
        match value {
            Value::Mapping(root) => Ok(Self { root }),
            Value::Null => Ok(Self::default()),
            other => Err(ConfigError::Invalid(format!(
                "top level must be a mapping, found {:?}",
                other
            ))),
        }
    }

    pub fn parse(text: &str) -> ConfigResult<Self> {
        Self::from_value(serde_yaml::from_str(text)?)
    }

    pub fn to_yaml(&self) -> ConfigResult<String> {
        Ok(serde_yaml::to_string(&self.root)?)
    }

    pub fn as_mapping(&self) -> &Mapping {
        &self.root
    }

    /// Value at a key path such as `["chat_model", "init_args", "model"]`.
    pub fn get(&self, path: &[&str]) -> Option<&Value> {
        let (first, rest) = path.split_first()?;
        let mut value = self.root.get(*first)?;
        for key in rest {
            value = value.get(*key)?;
        }
        Some(value)
    }

    /// Sets the value at a key path, creating intermediate mappings. An
    /// intermediate that is not a mapping is replaced by one.
    pub fn set(&mut self, path: &[&str], value: impl Into<Value>) {
        let Some((last, parents)) = path.split_last() else {
            return;
        };
        let mut map = &mut self.root;
        for key in parents {
            let slot = map.entry(Value::from(*key)).or_insert(Value::Null);
            if !slot.is_mapping() {
                if !slot.is_null() {
                    warn!("Replacing non-mapping value at {} with a mapping", key);
                }
                *slot = Value::Mapping(Mapping::new());
            }
            map = match slot.as_mapping_mut() {
                Some(inner) => inner,
                None => return,
            };
        }
        map.insert(Value::from(*last), value.into());
    }

    fn has_section(&self, section: &str) -> bool {
        self.get(&[section]).is_some_and(Value::is_mapping)
    }

    fn string_at(&self, path: &[&str]) -> Option<String> {
        config_string(self.get(path), &path.join("."))
    }

    fn limits_of(&self, section: &str) -> RateLimits {
        RateLimits::new(
            config_u32(self.get(&[section, PER_MINUTE]), &format!("{}.{}", section, PER_MINUTE)),
            config_u32(self.get(&[section, PER_DAY]), &format!("{}.{}", section, PER_DAY)),
        )
    }

    pub fn chat_model(&self) -> Option<ChatSettings> {
        if !self.has_section(CHAT_SECTION) {
            return None;
        }
        Some(ChatSettings {
            model: self.string_at(&[CHAT_SECTION, INIT_ARGS, "model"]),
            model_provider: self.string_at(&[CHAT_SECTION, INIT_ARGS, "model_provider"]),
            api_key: self.string_at(&[CHAT_SECTION, INIT_ARGS, "api_key"]),
            base_url: self.string_at(&[CHAT_SECTION, INIT_ARGS, "base_url"]),
            limits: self.limits_of(CHAT_SECTION),
        })
    }

    fn generator(&self, section: &str) -> Option<GeneratorSettings> {
        if !self.has_section(section) {
            return None;
        }
        Some(GeneratorSettings {
            class_path: self.string_at(&[section, "class_path"]),
            model: self.string_at(&[section, INIT_ARGS, "model"]),
            reference_model: self.string_at(&[section, INIT_ARGS, "reference_model"]),
            api_key: self.string_at(&[section, INIT_ARGS, "api_key"]),
            base_url: self.string_at(&[section, INIT_ARGS, "base_url"]),
            limits: self.limits_of(section),
        })
    }

    pub fn image_generator(&self) -> Option<GeneratorSettings> {
        self.generator(IMAGE_SECTION)
    }

    pub fn video_generator(&self) -> Option<GeneratorSettings> {
        self.generator(VIDEO_SECTION)
    }

    /// Merges `update` into the document. Untouched keys keep their values.
    pub fn apply(&mut self, update: &SettingsUpdate) {
        if let Some(model) = &update.chat_model {
            self.set(&[CHAT_SECTION, INIT_ARGS, "model"], model.as_str());
        }
        if let Some(key) = &update.chat_api_key {
            self.set(&[CHAT_SECTION, INIT_ARGS, "api_key"], key.as_str());
        }
        if let Some(url) = &update.chat_base_url {
            self.set(&[CHAT_SECTION, INIT_ARGS, "base_url"], url.as_str());
        }
        if let Some(key) = &update.generator_api_key {
            self.set(&[IMAGE_SECTION, INIT_ARGS, "api_key"], key.as_str());
            self.set(&[VIDEO_SECTION, INIT_ARGS, "api_key"], key.as_str());
        }
        if let Some(rpm) = update.image_requests_per_minute {
            self.set(&[IMAGE_SECTION, PER_MINUTE], rpm);
        }
        if let Some(rpm) = update.video_requests_per_minute {
            self.set(&[VIDEO_SECTION, PER_MINUTE], rpm);
        }
    }

    /// Generator API key, preferring the image generator's like the settings
    /// form does.
    pub fn generator_api_key(&self) -> Option<String> {
        self.string_at(&[IMAGE_SECTION, INIT_ARGS, "api_key"])
            .filter(|k| !k.is_empty())
            .or_else(|| self.string_at(&[VIDEO_SECTION, INIT_ARGS, "api_key"]))
    }

    pub fn working_dir(&self, profile: Profile) -> PathBuf {
        self.string_at(&["working_dir"])
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(profile.default_working_dir()))
    }
}

/// Edits to the known settings. `None` leaves a field as it is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettingsUpdate {
    pub chat_model: Option<String>,
    pub chat_api_key: Option<String>,
    pub chat_base_url: Option<String>,
    /// Shared by the image and video generators.
    pub generator_api_key: Option<String>,
    pub image_requests_per_minute: Option<u32>,
    pub video_requests_per_minute: Option<u32>,
}

impl SettingsUpdate {
    pub fn is_empty(&self) -> bool {
        self == &SettingsUpdate::default()
    }
}

/// True for empty values and the `YOUR_...` placeholders written on first run.
pub fn is_placeholder(value: Option<&str>) -> bool {
    match value {
        None => true,
        Some(v) => v.trim().is_empty() || v.starts_with(PLACEHOLDER_PREFIX),
    }
}

/// Returns `value` unless it is a placeholder, in which case the environment
/// variable `env` is consulted.
pub fn resolve_secret(value: Option<&str>, env: &str) -> Option<String> {
    if !is_placeholder(value) {
        return value.map(str::to_string);
    }
    std::env::var(env).ok().filter(|v| !v.trim().is_empty())
}

fn default_document_text(profile: Profile) -> String {
    format!(
        r#"chat_model:
    init_args:
        model: "google/gemini-2.0-flash-exp:free"
        model_provider: "openai"
        api_key: "YOUR_OPENROUTER_API_KEY"
        base_url: "https://openrouter.ai/api/v1"
    # Rate limits for chat model API calls
    max_requests_per_minute: 10
    max_requests_per_day: 500

image_generator:
    class_path: "dashscope.ImageSynthesis"
    init_args:
        api_key: "YOUR_DASHSCOPE_API_KEY"
        model: "wanx2.1-t2i-turbo"
    # Rate limits for image generation API calls
    max_requests_per_minute: 10
    max_requests_per_day: 500

video_generator:
    class_path: "dashscope.VideoSynthesis"
    init_args:
        api_key: "YOUR_DASHSCOPE_API_KEY"
        model: "wanx2.1-t2v-turbo"
        reference_model: "wanx2.1-i2v-turbo"
    # Rate limits for video generation API calls
    max_requests_per_minute: 2
    max_requests_per_day: 10

working_dir: {}
"#,
        profile.default_working_dir()
    )
}

/// The document synthesized for a profile whose file is missing.
pub fn default_document(profile: Profile) -> ConfigDocument {
    match ConfigDocument::parse(&default_document_text(profile)) {
        Ok(document) => document,
        Err(e) => {
            error!("Built-in default config for {} is invalid: {}", profile, e);
            ConfigDocument::default()
        }
    }
}

/// Reads and writes profile documents under one config directory.
#[derive(Debug, Clone)]
pub struct SettingsStore {
    config_dir: PathBuf,
}

impl SettingsStore {
    pub fn new(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
        }
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn path(&self, profile: Profile) -> PathBuf {
        self.config_dir.join(profile.file_name())
    }

    fn read(&self, profile: Profile) -> ConfigResult<ConfigDocument> {
        let text = std::fs::read_to_string(self.path(profile))?;
        ConfigDocument::parse(&text)
    }

    /// Loads a profile. Never fails: a missing file is replaced by the
    /// placeholder document (also written to disk), and an unreadable file
    /// yields an empty document after logging why.
    pub fn load(&self, profile: Profile) -> ConfigDocument {
        match self.load_for_update(profile) {
            Ok(document) => document,
            Err(e) => {
                error!("Failed to load config {}: {}", self.path(profile).display(), e);
                ConfigDocument::default()
            }
        }
    }

    /// Loads a profile that is about to be edited and saved. Unlike
    /// [`load`](Self::load), an unreadable file is an error, so saving
    /// can never replace a file with an empty document.
    pub fn load_for_update(&self, profile: Profile) -> ConfigResult<ConfigDocument> {
        let path = self.path(profile);
        if !path.exists() {
            info!("Creating default config: {}", path.display());
            if let Err(e) = self.write_default(profile) {
                warn!("Could not write default config {}: {}", path.display(), e);
            }
            return Ok(default_document(profile));
        }

        let document = self.read(profile)?;
        info!("Loaded config from {}", path.display());
        Ok(document)
    }

    /// Writes a profile, replacing the file atomically.
    pub fn save(&self, profile: Profile, document: &ConfigDocument) -> ConfigResult<()> {
        let path = self.path(profile);
        std::fs::create_dir_all(&self.config_dir)?;

        let text = document.to_yaml()?;
        let tmp = path.with_extension("yaml.tmp");
        std::fs::write(&tmp, text)?;
        std::fs::rename(&tmp, &path)?;

        info!("Saved config to {}", path.display());
        Ok(())
    }

    /// Writes placeholder documents for every profile that has no file yet.
    pub fn ensure_defaults(&self) -> ConfigResult<()> {
        for profile in Profile::ALL {
            if !self.path(profile).exists() {
                info!("Creating default config: {}", self.path(profile).display());
                self.write_default(profile)?;
            }
        }
        Ok(())
    }

    fn write_default(&self, profile: Profile) -> ConfigResult<()> {
        std::fs::create_dir_all(&self.config_dir)?;
        std::fs::write(self.path(profile), default_document_text(profile))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_profile_synthesizes_placeholders() {
        let dir = TempDir::new().expect("temp dir");
        let store = SettingsStore::new(dir.path().join("configs"));

        let document = store.load(Profile::Idea2Video);
        let chat = document.chat_model().expect("chat section");
        assert_eq!(chat.api_key.as_deref(), Some("YOUR_OPENROUTER_API_KEY"));
        assert_eq!(chat.limits, RateLimits::new(Some(10), Some(500)));
        assert!(is_placeholder(document.generator_api_key().as_deref()));
        assert_eq!(
            document.working_dir(Profile::Idea2Video),
            PathBuf::from(".working_dir/idea2video")
        );
        assert!(store.path(Profile::Idea2Video).exists());
    }

    #[test]
    fn test_unparseable_profile_loads_empty_document() {
        let dir = TempDir::new().expect("temp dir");
        let store = SettingsStore::new(dir.path());
        std::fs::write(store.path(Profile::Script2Video), "chat_model: [unclosed").unwrap();

        assert_eq!(store.load(Profile::Script2Video), ConfigDocument::default());
    }

    #[test]
    fn test_unparseable_profile_is_not_editable() {
        let dir = TempDir::new().expect("temp dir");
        let store = SettingsStore::new(dir.path());
        let original = "chat_model: [unclosed\ntelemetry: on\n";
        std::fs::write(store.path(Profile::Script2Video), original).unwrap();

        assert!(store.load_for_update(Profile::Script2Video).is_err());
        assert_eq!(
            std::fs::read_to_string(store.path(Profile::Script2Video)).unwrap(),
            original
        );
    }

    #[test]
    fn test_empty_file_loads_empty_document() {
        let dir = TempDir::new().expect("temp dir");
        let store = SettingsStore::new(dir.path());
        std::fs::write(store.path(Profile::Script2Video), "").unwrap();

        assert_eq!(store.load(Profile::Script2Video), ConfigDocument::default());
    }

    #[test]
    fn test_save_preserves_unknown_keys() {
        let dir = TempDir::new().expect("temp dir");
        let store = SettingsStore::new(dir.path());
        std::fs::write(
            store.path(Profile::Idea2Video),
            r#"
chat_model:
  init_args:
    model: old-model
    temperature: 0.4
  retries: 3
telemetry:
  enabled: false
  endpoint: http://localhost:4318
working_dir: /tmp/runs
"#,
        )
        .unwrap();

        let mut document = store.load(Profile::Idea2Video);
        document.apply(&SettingsUpdate {
            chat_model: Some("new-model".into()),
            image_requests_per_minute: Some(5),
            ..Default::default()
        });
        store.save(Profile::Idea2Video, &document).unwrap();

        let reloaded = store.load(Profile::Idea2Video);
        assert_eq!(
            reloaded.chat_model().unwrap().model.as_deref(),
            Some("new-model")
        );
        assert_eq!(
            reloaded.get(&["chat_model", "init_args", "temperature"]),
            Some(&Value::from(0.4))
        );
        assert_eq!(reloaded.get(&["chat_model", "retries"]), Some(&Value::from(3)));
        assert_eq!(
            reloaded.get(&["telemetry", "endpoint"]),
            Some(&Value::from("http://localhost:4318"))
        );
        assert_eq!(
            reloaded.image_generator().unwrap().limits.per_minute,
            Some(5)
        );
        assert_eq!(reloaded.working_dir(Profile::Idea2Video), PathBuf::from("/tmp/runs"));
    }

    #[test]
    fn test_loosely_typed_values_load_and_survive_save() {
        let dir = TempDir::new().expect("temp dir");
        let store = SettingsStore::new(dir.path());
        std::fs::write(
            store.path(Profile::Idea2Video),
            r#"
chat_model:
  init_args:
    model: old
    api_key: 12345
  max_requests_per_minute: "10"
image_generator:
  init_args:
    api_key: sk-image
  max_requests_per_day: lots
telemetry:
  enabled: true
"#,
        )
        .unwrap();

        let mut document = store.load_for_update(Profile::Idea2Video).unwrap();
        let chat = document.chat_model().expect("chat section");
        assert_eq!(chat.api_key.as_deref(), Some("12345"));
        assert_eq!(chat.limits.per_minute, Some(10));
        assert_eq!(document.image_generator().unwrap().limits.per_day, None);

        document.apply(&SettingsUpdate {
            chat_model: Some("new".into()),
            ..Default::default()
        });
        store.save(Profile::Idea2Video, &document).unwrap();

        let reloaded = store.load(Profile::Idea2Video);
        assert_eq!(reloaded.get(&["telemetry", "enabled"]), Some(&Value::from(true)));
        assert_eq!(
            reloaded.get(&["chat_model", "init_args", "api_key"]),
            Some(&Value::from(12345))
        );
        assert_eq!(
            reloaded.get(&["image_generator", "max_requests_per_day"]),
            Some(&Value::from("lots"))
        );
        assert_eq!(reloaded.chat_model().unwrap().model.as_deref(), Some("new"));
        assert!(reloaded.video_generator().is_none());
    }

    #[test]
    fn test_set_replaces_scalar_parent() {
        let mut document = ConfigDocument::parse("chat_model: disabled\n").unwrap();
        document.set(&["chat_model", "init_args", "model"], "m");
        assert_eq!(document.chat_model().unwrap().model.as_deref(), Some("m"));
    }

    #[test]
    fn test_non_mapping_document_rejected() {
        assert!(matches!(
            ConfigDocument::parse("- just\n- a list\n"),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_generator_key_applies_to_both_generators() {
        let mut document = ConfigDocument::default();
        document.apply(&SettingsUpdate {
            generator_api_key: Some("sk-media".into()),
            ..Default::default()
        });
        assert_eq!(
            document.video_generator().unwrap().api_key.as_deref(),
            Some("sk-media")
        );
        assert_eq!(document.generator_api_key().as_deref(), Some("sk-media"));
    }

    #[test]
    fn test_placeholder_detection() {
        assert!(is_placeholder(None));
        assert!(is_placeholder(Some("  ")));
        assert!(is_placeholder(Some("YOUR_GOOGLE_API_KEY")));
        assert!(!is_placeholder(Some("sk-live")));
    }

    #[test]
    fn test_ensure_defaults_writes_both_profiles() {
        let dir = TempDir::new().expect("temp dir");
        let store = SettingsStore::new(dir.path().join("configs"));
        store.ensure_defaults().unwrap();

        for profile in Profile::ALL {
            let document = store.load(profile);
            assert_eq!(
                document.working_dir(profile),
                PathBuf::from(profile.default_working_dir())
            );
            assert_eq!(
                document.video_generator().unwrap().limits,
                RateLimits::new(Some(2), Some(10))
            );
        }
    }
}
