use thiserror::Error;

/// Failure reported by a chat, image or video collaborator.
#[derive(Error, Debug)]
pub enum GeneratorError {
    #[error("API error: {0}")]
    ApiError(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimited(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Malformed model output: {0}")]
    Malformed(String),

    #[error("HTTP request error: {0}")]
    HttpError(reqwest::Error),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("FFmpeg error: {0}")]
    FfmpegError(String),
}

impl From<reqwest::Error> for GeneratorError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GeneratorError::Timeout(err.to_string())
        } else if err.status() == Some(reqwest::StatusCode::TOO_MANY_REQUESTS) {
            GeneratorError::RateLimited(err.to_string())
        } else {
            GeneratorError::HttpError(err)
        }
    }
}

pub type GeneratorResult<T> = std::result::Result<T, GeneratorError>;

/// Terminal outcome of a failed run, annotated with where it failed.
#[derive(Error, Debug)]
pub enum RunError {
    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Generation failed while {stage}{}: {message}", scene_suffix(.scene))]
    Generation {
        stage: String,
        scene: Option<usize>,
        message: String,
    },

    #[error("Rate limit exceeded while {stage}{}: {message}", scene_suffix(.scene))]
    RateLimitExceeded {
        stage: String,
        scene: Option<usize>,
        message: String,
    },

    #[error("Timed out while {stage}{}: {message}", scene_suffix(.scene))]
    Timeout {
        stage: String,
        scene: Option<usize>,
        message: String,
    },

    #[error("Concatenation failed: {0}")]
    Concatenation(String),

    #[error("Cancelled while {stage}")]
    Cancelled { stage: String },

    #[error("IO error ({context}): {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

fn scene_suffix(scene: &Option<usize>) -> String {
    match scene {
        Some(index) => format!(" (scene {})", index),
        None => String::new(),
    }
}

impl RunError {
    /// Classifies a collaborator failure and attaches stage/scene context.
    pub fn from_generator(stage: &str, scene: Option<usize>, err: GeneratorError) -> Self {
        let stage = stage.to_string();
        match err {
            GeneratorError::RateLimited(message) => RunError::RateLimitExceeded {
                stage,
                scene,
                message,
            },
            GeneratorError::Timeout(message) => RunError::Timeout {
                stage,
                scene,
                message,
            },
            other => RunError::Generation {
                stage,
                scene,
                message: other.to_string(),
            },
        }
    }

    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        RunError::Io {
            context: context.into(),
            source,
        }
    }

    /// Scene index the failure is attributed to, if any.
    pub fn scene(&self) -> Option<usize> {
        match self {
            RunError::Generation { scene, .. }
            | RunError::RateLimitExceeded { scene, .. }
            | RunError::Timeout { scene, .. } => *scene,
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, RunError>;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generator_error_classification() {
        let err = RunError::from_generator(
            "rendering scene",
            Some(3),
            GeneratorError::RateLimited("daily quota used".to_string()),
        );
        assert!(matches!(err, RunError::RateLimitExceeded { scene: Some(3), .. }));

        let err = RunError::from_generator("developing story", None, GeneratorError::Timeout("300s".into()));
        assert!(matches!(err, RunError::Timeout { scene: None, .. }));

        let err = RunError::from_generator(
            "rendering scene",
            Some(1),
            GeneratorError::ApiError("500".into()),
        );
        assert_eq!(err.scene(), Some(1));
        assert!(matches!(err, RunError::Generation { .. }));
    }

    #[test]
    fn test_error_display() {
        let err = RunError::Generation {
            stage: "rendering scene".to_string(),
            scene: Some(4),
            message: "boom".to_string(),
        };
        assert_eq!(err.to_string(), "Generation failed while rendering scene (scene 4): boom");

        let err = RunError::Cancelled {
            stage: "writing script".to_string(),
        };
        assert!(err.to_string().contains("writing script"));
    }
}
