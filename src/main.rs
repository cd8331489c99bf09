use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use vigen::config::{is_placeholder, Collaborators};
use vigen::logging;
use vigen::scene::GenerationRequest;
use vigen::video::FfmpegConcatenator;
use vigen::{
    clear_working_dir, CacheReset, ConfigDocument, Profile, RunError, RunOutcome, SceneOrchestrator,
    SettingsStore, SettingsUpdate,
};

#[derive(Parser, Debug)]
#[command(name = "vigen")]
#[command(about = "AI video generator: idea or script to video", long_about = None)]
struct Cli {
    /// Directory holding the idea2video.yaml / script2video.yaml profiles
    #[arg(long, global = true, default_value = "configs")]
    config_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Develop a story from an idea and render it into one video
    Idea(IdeaArgs),
    /// Render every scene of a prepared script file
    Script(ScriptArgs),
    /// Delete everything in a profile's working directory
    ClearCache {
        #[arg(long, value_enum, default_value = "idea2video")]
        profile: Profile,
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
    /// Show or edit generator settings
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },
}

#[derive(Args, Debug)]
struct IdeaArgs {
    /// The idea, inline
    #[arg(short, long, conflicts_with = "file")]
    text: Option<String>,

    /// Read the idea from a file
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// Extra requirements for story and script
    #[arg(short, long, default_value = "")]
    requirement: String,

    #[arg(short, long, default_value = "Realistic, warm feel")]
    style: String,
}

#[derive(Args, Debug)]
struct ScriptArgs {
    /// JSON file with one scene payload or an array of them
    #[arg(long)]
    script: PathBuf,

    /// JSON array of character records
    #[arg(long)]
    characters: Option<PathBuf>,

    /// JSON portrait registry (name -> pose -> {path})
    #[arg(long)]
    registry: Option<PathBuf>,

    #[arg(short, long, default_value = "")]
    requirement: String,

    #[arg(short, long, default_value = "Realistic, cinematographic")]
    style: String,
}

#[derive(Subcommand, Debug)]
enum SettingsAction {
    Show {
        #[arg(long, value_enum, default_value = "idea2video")]
        profile: Profile,
    },
    Set {
        #[arg(long, value_enum, default_value = "idea2video")]
        profile: Profile,
        #[arg(long)]
        chat_model: Option<String>,
        #[arg(long)]
        chat_api_key: Option<String>,
        #[arg(long)]
        chat_base_url: Option<String>,
        /// API key for both image and video generators
        #[arg(long)]
        generator_api_key: Option<String>,
        /// Image generator requests per minute
        #[arg(long)]
        image_rpm: Option<u32>,
        /// Video generator requests per minute
        #[arg(long)]
        video_rpm: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init_tracing();
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let store = SettingsStore::new(&cli.config_dir);
    if let Err(e) = store.ensure_defaults() {
        warn!("Could not create default configs in {}: {}", cli.config_dir.display(), e);
    }

    match cli.command {
        Command::Idea(args) => {
            let idea = match (args.text, args.file) {
                (Some(text), _) => text,
                (None, Some(path)) => tokio::fs::read_to_string(&path)
                    .await
                    .with_context(|| format!("Failed to read idea file: {}", path.display()))?,
                (None, None) => bail!("Either --text or --file must be provided"),
            };
            let request = GenerationRequest {
                idea: Some(idea),
                requirement: args.requirement,
                style: args.style,
                ..Default::default()
            };
            run(&store, Profile::Idea2Video, request).await
        }
        Command::Script(args) => {
            let request = GenerationRequest {
                requirement: args.requirement,
                style: args.style,
                script_path: Some(args.script),
                characters_path: args.characters,
                registry_path: args.registry,
                ..Default::default()
            };
            run(&store, Profile::Script2Video, request).await
        }
        Command::ClearCache { profile, yes } => clear_cache(&store, profile, yes).await,
        Command::Settings { action } => settings(&store, action),
    }
}

async fn run(store: &SettingsStore, profile: Profile, request: GenerationRequest) -> anyhow::Result<()> {
    info!("Initializing pipeline from {}...", store.path(profile).display());
    let document = store.load(profile);
    let collaborators = Collaborators::from_document(&document)
        .with_context(|| format!("Invalid settings in {}", store.path(profile).display()))?;

    let mut orchestrator = SceneOrchestrator::new(
        Arc::new(collaborators.story),
        Arc::new(collaborators.script),
        Arc::new(FfmpegConcatenator::default()),
        document.working_dir(profile),
    )
    .with_progress(|progress| info!("[progress] {}", progress));

    let token = orchestrator.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Cancellation requested, stopping after the current step...");
            token.cancel();
        }
    });

    match orchestrator.run(&request).await {
        Ok(RunOutcome::FinalVideo(path)) => {
            info!("Video generation completed successfully!");
            println!("{}", path.display());
            Ok(())
        }
        Ok(RunOutcome::Scenes(scenes)) => {
            info!("Generated {} videos", scenes.len());
            for scene in scenes {
                println!("{}", scene.video_path.display());
            }
            Ok(())
        }
        Err(e) => {
            let code = report_failure(&e, &document, profile);
            std::process::exit(code);
        }
    }
}

/// Prints a message suited to the failure kind and picks the exit code.
fn report_failure(err: &RunError, document: &ConfigDocument, profile: Profile) -> i32 {
    let working_dir = document.working_dir(profile);
    match err {
        RunError::Validation(msg) => {
            error!("Missing or invalid input: {}", msg);
            2
        }
        RunError::RateLimitExceeded { .. } => {
            error!("{}", err);
            error!("Generator quota reached. Wait before running again.");
            3
        }
        RunError::Cancelled { .. } => {
            warn!("{}", err);
            warn!("Files produced so far are kept in {}", working_dir.display());
            130
        }
        RunError::Concatenation(_) => {
            error!("{}", err);
            error!(
                "Scene videos were rendered and are still usable under {}",
                working_dir.display()
            );
            1
        }
        RunError::Generation { .. } | RunError::Timeout { .. } | RunError::Io { .. } => {
            error!("Video generation failed: {}", err);
            error!("Completed scenes are kept in {}", working_dir.display());
            1
        }
    }
}

async fn clear_cache(store: &SettingsStore, profile: Profile, yes: bool) -> anyhow::Result<()> {
    let root = store.load(profile).working_dir(profile);

    if root.exists() && !yes {
        print!(
            "Delete all data in {}? This cannot be undone. [y/N] ",
            root.display()
        );
        std::io::stdout().flush()?;
        let mut answer = String::new();
        std::io::stdin().lock().read_line(&mut answer)?;
        if !matches!(answer.trim(), "y" | "Y" | "yes") {
            info!("Cache left untouched");
            return Ok(());
        }
    }

    match clear_working_dir(&root).await.context("Failed to clear cache")? {
        CacheReset::AlreadyEmpty => info!("Cache is already empty."),
        CacheReset::Cleared { removed } => {
            info!("Cache cleared ({} entries). You can run a new idea now.", removed)
        }
    }
    Ok(())
}

fn mask(secret: Option<&str>) -> String {
    match secret {
        _ if is_placeholder(secret) => format!("<not set: {}>", secret.unwrap_or("")),
        Some(s) if s.chars().count() > 8 => {
            let tail: String = s.chars().rev().take(4).collect::<Vec<_>>().into_iter().rev().collect();
            format!("****{}", tail)
        }
        _ => "****".to_string(),
    }
}

fn settings(store: &SettingsStore, action: SettingsAction) -> anyhow::Result<()> {
    match action {
        SettingsAction::Show { profile } => {
            let document = store.load(profile);
            let chat = document.chat_model().unwrap_or_default();
            let image = document.image_generator().unwrap_or_default();
            let video = document.video_generator().unwrap_or_default();

            println!("Profile:           {} ({})", profile, store.path(profile).display());
            println!("Chat model:        {}", chat.model.as_deref().unwrap_or(""));
            println!("Chat API key:      {}", mask(chat.api_key.as_deref()));
            println!("Chat base URL:     {}", chat.base_url.as_deref().unwrap_or(""));
            println!(
                "Generator API key: {}",
                mask(document.generator_api_key().as_deref())
            );
            println!(
                "Image limit (RPM): {}",
                image.limits.per_minute.map(|n| n.to_string()).unwrap_or_default()
            );
            println!(
                "Video limit (RPM): {}",
                video.limits.per_minute.map(|n| n.to_string()).unwrap_or_default()
            );
            println!("Working dir:       {}", document.working_dir(profile).display());
            Ok(())
        }
        SettingsAction::Set {
            profile,
            chat_model,
            chat_api_key,
            chat_base_url,
            generator_api_key,
            image_rpm,
            video_rpm,
        } => {
            let update = SettingsUpdate {
                chat_model,
                chat_api_key,
                chat_base_url,
                generator_api_key,
                image_requests_per_minute: image_rpm,
                video_requests_per_minute: video_rpm,
            };
            if update.is_empty() {
                bail!("Nothing to change; pass at least one setting");
            }

            let mut document = store.load_for_update(profile).with_context(|| {
                format!(
                    "Refusing to edit {}; fix or remove the file first",
                    store.path(profile).display()
                )
            })?;
            document.apply(&update);
            store
                .save(profile, &document)
                .with_context(|| format!("Failed to save config {}", store.path(profile).display()))?;
            Ok(())
        }
    }
}
