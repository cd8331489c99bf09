use std::fmt;
use std::sync::Arc;

/// Where a run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Idle,
    DevelopingStory,
    ExtractingCharacters,
    GeneratingPortraits,
    WritingScript,
    RenderingScene { index: usize, total: usize },
    ScenesRendered { total: usize },
    Concatenating,
    Done,
}

impl Stage {
    /// Lower-case phrase used in error messages ("failed while ...").
    pub fn label(&self) -> &'static str {
        match self {
            Stage::Idle => "starting",
            Stage::DevelopingStory => "developing story",
            Stage::ExtractingCharacters => "extracting characters",
            Stage::GeneratingPortraits => "generating portraits",
            Stage::WritingScript => "writing script",
            Stage::RenderingScene { .. } | Stage::ScenesRendered { .. } => "rendering scenes",
            Stage::Concatenating => "concatenating final video",
            Stage::Done => "finishing",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Idle => write!(f, "Initializing..."),
            Stage::DevelopingStory => write!(f, "Developing Story..."),
            Stage::ExtractingCharacters => write!(f, "Extracting Characters..."),
            Stage::GeneratingPortraits => write!(f, "Generating Portraits..."),
            Stage::WritingScript => write!(f, "Writing Script..."),
            Stage::RenderingScene { index, total } => {
                write!(f, "Generating Scene {}/{}", index + 1, total)
            }
            Stage::ScenesRendered { total } => write!(f, "Generated {} Scenes", total),
            Stage::Concatenating => write!(f, "Concatenating Final Video..."),
            Stage::Done => write!(f, "Done"),
        }
    }
}

/// Progress event. `total == 0` means the stage has no meaningful count and
/// should be shown as a busy indicator rather than a percentage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Progress {
    pub stage: String,
    pub current: usize,
    pub total: usize,
}

impl Progress {
    pub fn is_indeterminate(&self) -> bool {
        self.total == 0
    }

    pub fn percent(&self) -> Option<u8> {
        if self.is_indeterminate() {
            return None;
        }
        let pct = (self.current.min(self.total) * 100) / self.total;
        Some(pct as u8)
    }
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.percent() {
            Some(pct) => write!(f, "{} {}%", self.stage, pct),
            None => write!(f, "{}", self.stage),
        }
    }
}

pub type ProgressFn = Arc<dyn Fn(&Progress) + Send + Sync>;
