//! Drives an idea or a script through story, scene rendering and
//! concatenation.
//!
//! A run moves linearly through [`Stage`]s and ends in exactly one outcome:
//! the output path(s), or a [`RunError`] naming the stage (and scene) that
//! failed. Every collaborator call is a suspension point raced against the
//! orchestrator's cancellation token. Nothing a run writes is deleted when it
//! fails; only [`crate::cache::clear_working_dir`] removes files.

mod progress;

pub use progress::{Progress, ProgressFn, Stage};

use crate::error::{GeneratorResult, Result, RunError};
use crate::logging::{LogSink, TracingLogSink};
use crate::pipeline::{SceneRenderRequest, ScriptPipeline, StoryPipeline};
use crate::scene::files::{self, CHARACTERS_FILE, REGISTRY_FILE, SCRIPTS_FILE, STORY_FILE};
use crate::scene::{CharacterRecord, GenerationRequest, PortraitRegistry, RunMode, SceneResult, SceneScript};
use crate::video::Concatenator;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub const FINAL_VIDEO_FILE: &str = "final_video.mp4";
pub const MANUAL_RUN_DIR: &str = "manual_run";
pub const PORTRAITS_DIR: &str = "character_portraits";

/// Per-run bookkeeping. Created when a run starts and dropped when it ends.
#[derive(Debug)]
struct RunState {
    stage: Stage,
    current: usize,
    total: usize,
    scenes: Vec<SceneResult>,
}

impl RunState {
    fn new() -> Self {
        Self {
            stage: Stage::Idle,
            current: 0,
            total: 0,
            scenes: Vec::new(),
        }
    }
}

/// What [`SceneOrchestrator::run`] produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    FinalVideo(PathBuf),
    Scenes(Vec<SceneResult>),
}

pub struct SceneOrchestrator {
    story: Arc<dyn StoryPipeline>,
    script: Arc<dyn ScriptPipeline>,
    concatenator: Arc<dyn Concatenator>,
    working_dir: PathBuf,
    log: Arc<dyn LogSink>,
    progress: Option<ProgressFn>,
    cancel: CancellationToken,
}

impl SceneOrchestrator {
    pub fn new(
        story: Arc<dyn StoryPipeline>,
        script: Arc<dyn ScriptPipeline>,
        concatenator: Arc<dyn Concatenator>,
        working_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            story,
            script,
            concatenator,
            working_dir: working_dir.into(),
            log: Arc::new(TracingLogSink),
            progress: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_log_sink(mut self, log: Arc<dyn LogSink>) -> Self {
        self.log = log;
        self
    }

    pub fn with_progress(mut self, progress: impl Fn(&Progress) + Send + Sync + 'static) -> Self {
        self.progress = Some(Arc::new(progress));
        self
    }

    /// Uses a caller-owned token instead of a fresh one.
    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// Token that cancels the current (or next) run. A run that starts with
    /// an already-cancelled token replaces it, so fetch a fresh one per run.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn begin_run(&mut self) -> RunState {
        if self.cancel.is_cancelled() {
            self.cancel = CancellationToken::new();
        }
        RunState::new()
    }

    fn enter(&self, state: &mut RunState, stage: Stage, current: usize, total: usize) {
        state.stage = stage;
        state.current = current;
        state.total = total;

        self.log.info(&stage.to_string());
        if let Some(progress) = &self.progress {
            progress(&Progress {
                stage: stage.to_string(),
                current,
                total,
            });
        }
    }

    fn fail(&self, err: RunError) -> RunError {
        self.log.error(&format!("Error running pipeline: {}", err));
        err
    }

    fn check_cancelled(&self, state: &RunState) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(RunError::Cancelled {
                stage: state.stage.label().to_string(),
            });
        }
        Ok(())
    }

    /// Awaits one collaborator call unless the run is cancelled first.
    /// Cancellation drops the in-flight future, which releases whatever
    /// connections or child processes it holds.
    async fn call<T, F>(&self, state: &RunState, scene: Option<usize>, fut: F) -> Result<T>
    where
        F: Future<Output = GeneratorResult<T>>,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(RunError::Cancelled {
                stage: state.stage.label().to_string(),
            }),
            out = fut => out.map_err(|e| RunError::from_generator(state.stage.label(), scene, e)),
        }
    }

    /// Optional inputs that don't exist are run without, not failed on.
    fn skip_missing(&self, what: &str, path: &Path) {
        self.log.warn(&format!(
            "{} file not found, continuing without it: {}",
            what,
            path.display()
        ));
    }

    async fn create_dir(&self, dir: &Path) -> Result<()> {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| RunError::io(format!("creating {}", dir.display()), e))
    }

    /// Idea -> story -> characters -> portraits -> script -> scenes -> final
    /// video. Returns the path of the concatenated video.
    pub async fn run_from_idea(&mut self, idea: &str, requirement: &str, style: &str) -> Result<PathBuf> {
        if idea.trim().is_empty() {
            return Err(RunError::Validation("idea must not be empty".to_string()));
        }
        let mut state = self.begin_run();
        self.drive_idea(&mut state, idea, requirement, style)
            .await
            .map_err(|e| self.fail(e))
    }

    async fn drive_idea(
        &self,
        state: &mut RunState,
        idea: &str,
        requirement: &str,
        style: &str,
    ) -> Result<PathBuf> {
        let working_dir = self.working_dir.clone();
        self.create_dir(&working_dir).await?;

        self.enter(state, Stage::DevelopingStory, 0, 0);
        let story = self
            .call(state, None, self.story.develop_story(idea, requirement))
            .await?;
        files::write_text(&working_dir.join(STORY_FILE), story.as_str()).await?;

        self.enter(state, Stage::ExtractingCharacters, 0, 0);
        let characters = self
            .call(state, None, self.story.extract_characters(&story))
            .await?;
        files::write_json(&working_dir.join(CHARACTERS_FILE), &characters).await?;
        self.log
            .info(&format!("Extracted {} characters", characters.len()));

        self.enter(state, Stage::GeneratingPortraits, 0, 0);
        let portraits_dir = working_dir.join(PORTRAITS_DIR);
        let registry = self
            .call(
                state,
                None,
                self.story.generate_portraits(&characters, style, &portraits_dir),
            )
            .await?;
        files::write_json(&working_dir.join(REGISTRY_FILE), &registry).await?;

        self.enter(state, Stage::WritingScript, 0, 0);
        let scripts = self
            .call(state, None, self.story.write_script(&story, requirement))
            .await?;
        files::write_json(&working_dir.join(SCRIPTS_FILE), &scripts).await?;
        if scripts.is_empty() {
            return Err(RunError::Generation {
                stage: state.stage.label().to_string(),
                scene: None,
                message: "script contains no scenes".to_string(),
            });
        }

        let records: Vec<CharacterRecord> = characters.into_iter().map(CharacterRecord::from).collect();
        self.render_scenes(state, &scripts, &records, &registry, requirement, style, &working_dir)
            .await?;

        self.check_cancelled(state)?;
        self.enter(state, Stage::Concatenating, 0, 0);
        let final_video = working_dir.join(FINAL_VIDEO_FILE);
        self.concatenate(state, &final_video).await?;

        let total = state.scenes.len();
        self.enter(state, Stage::Done, total, total);
        self.log
            .info(&format!("Video Saved at: {}", final_video.display()));
        Ok(final_video)
    }

    /// Renders pre-written scene scripts under `<working_dir>/manual_run`.
    /// Returns one result per scene, in order; no concatenation is done.
    pub async fn run_from_script(
        &mut self,
        scenes: &[SceneScript],
        characters: &[CharacterRecord],
        registry: &PortraitRegistry,
        requirement: &str,
        style: &str,
    ) -> Result<Vec<SceneResult>> {
        if scenes.is_empty() {
            return Err(RunError::Validation("script contains no scenes".to_string()));
        }
        let mut state = self.begin_run();
        self.drive_script(&mut state, scenes, characters, registry, requirement, style)
            .await
            .map_err(|e| self.fail(e))
    }

    async fn drive_script(
        &self,
        state: &mut RunState,
        scenes: &[SceneScript],
        characters: &[CharacterRecord],
        registry: &PortraitRegistry,
        requirement: &str,
        style: &str,
    ) -> Result<Vec<SceneResult>> {
        let base = self.working_dir.join(MANUAL_RUN_DIR);
        self.create_dir(&base).await?;

        self.render_scenes(state, scenes, characters, registry, requirement, style, &base)
            .await?;

        let total = state.scenes.len();
        self.enter(state, Stage::Done, total, total);
        Ok(std::mem::take(&mut state.scenes))
    }

    /// Resolves a [`GenerationRequest`], loading script-mode input files,
    /// and runs it.
    pub async fn run(&mut self, request: &GenerationRequest) -> Result<RunOutcome> {
        match request.mode()? {
            RunMode::Idea { idea } => self
                .run_from_idea(idea, &request.requirement, &request.style)
                .await
                .map(RunOutcome::FinalVideo),
            RunMode::Script {
                script_path,
                characters_path,
                registry_path,
            } => {
                let scenes = files::load_scene_scripts(script_path).await?;
                let characters = match characters_path {
                    Some(path) if files::exists(path).await => files::load_characters(path).await?,
                    Some(path) => {
                        self.skip_missing("characters", path);
                        Vec::new()
                    }
                    None => Vec::new(),
                };
                let registry = match registry_path {
                    Some(path) if files::exists(path).await => files::load_portrait_registry(path).await?,
                    Some(path) => {
                        self.skip_missing("portrait registry", path);
                        PortraitRegistry::new()
                    }
                    None => PortraitRegistry::new(),
                };
                self.run_from_script(
                    &scenes,
                    &characters,
                    &registry,
                    &request.requirement,
                    &request.style,
                )
                .await
                .map(RunOutcome::Scenes)
            }
        }
    }

    /// Renders scenes one at a time in index order, each in its own
    /// `scene_<i>` directory under `base`. Stops at the first failure.
    #[allow(clippy::too_many_arguments)]
    async fn render_scenes(
        &self,
        state: &mut RunState,
        scripts: &[SceneScript],
        characters: &[CharacterRecord],
        registry: &PortraitRegistry,
        requirement: &str,
        style: &str,
        base: &Path,
    ) -> Result<()> {
        let total = scripts.len();

        for (index, script) in scripts.iter().enumerate() {
            self.check_cancelled(state)?;
            self.enter(state, Stage::RenderingScene { index, total }, index, total);

            let scene_dir = base.join(format!("scene_{}", index));
            self.create_dir(&scene_dir).await?;

            let payload = script.payload();
            let request = SceneRenderRequest {
                index,
                script: &payload,
                requirement,
                style,
                characters,
                registry,
                working_dir: &scene_dir,
            };
            let video_path = self
                .call(state, Some(index), self.script.render_scene(request))
                .await?;

            self.log.info(&format!(
                "Scene {} rendered: {}",
                index,
                video_path.display()
            ));
            state.scenes.push(SceneResult { index, video_path });
        }

        self.enter(state, Stage::ScenesRendered { total }, total, total);
        Ok(())
    }

    /// Runs the concatenator as its own task and waits for it. On
    /// cancellation the task is aborted, which kills the encoder, and is
    /// awaited so nothing is written after `Cancelled` is returned.
    async fn concatenate(&self, state: &RunState, output: &Path) -> Result<()> {
        let inputs: Vec<PathBuf> = state.scenes.iter().map(|s| s.video_path.clone()).collect();
        let concatenator = Arc::clone(&self.concatenator);
        let target = output.to_path_buf();
        let mut job = tokio::spawn(async move { concatenator.concat(&inputs, &target).await });

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                job.abort();
                let _ = job.await;
                Err(RunError::Cancelled {
                    stage: state.stage.label().to_string(),
                })
            }
            joined = &mut job => match joined {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(RunError::Concatenation(e.to_string())),
                Err(e) => Err(RunError::Concatenation(format!("concatenation worker failed: {}", e))),
            },
        }
    }
}
