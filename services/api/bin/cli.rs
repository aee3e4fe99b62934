//! Parlare CLI
//!
//! Runs one exercise session in the terminal. Every line read from stdin is a
//! learner turn; `/reset` starts a new exercise and `/quit` exits. Generated
//! media is downloaded once into the output directory.

use anyhow::Context;
use clap::Parser;
use parlare_api::{
    config::Config,
    state::{AppState, Services, SessionDefaults},
};
use parlare_core::{
    dispatcher::RenderableResult,
    exercise::{Difficulty, ExerciseRequest},
    session::Session,
};
use std::collections::HashSet;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

/// Generate language exercises interactively.
#[derive(Parser, Debug)]
#[command(name = "parlare")]
#[command(version, about, long_about = None)]
struct Args {
    /// What the exercise should be about
    #[arg(short, long)]
    topic: String,

    /// easy (text), medium (image) or hard (audio quiz)
    #[arg(short, long)]
    difficulty: Difficulty,

    /// Target language (default: TARGET_LANGUAGE from the environment)
    #[arg(short, long)]
    language: Option<String>,

    /// Extra context for the model, e.g. why the learner needs the topic
    #[arg(long)]
    context: Option<String>,

    /// Where generated images and audio are written
    #[arg(short, long, default_value = "./parlare-output")]
    output_dir: PathBuf,
}

/// Writes each asset path to disk at most once per run.
struct AssetCache {
    dir: PathBuf,
    written: HashSet<String>,
}

impl AssetCache {
    async fn save(&mut self, state: &AppState, path: &str) -> anyhow::Result<Option<PathBuf>> {
        if self.written.contains(path) {
            return Ok(None);
        }
        let data = state.assets.fetch(path).await?;
        let name = path.rsplit('/').next().unwrap_or(path);
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create '{}'", self.dir.display()))?;
        let target = self.dir.join(name);
        tokio::fs::write(&target, &data)
            .await
            .with_context(|| format!("Failed to write '{}'", target.display()))?;
        self.written.insert(path.to_string());
        Ok(Some(target))
    }
}

async fn render(result: &RenderableResult, state: &AppState, cache: &mut AssetCache) {
    println!("\n{}\n", result.response_to_user());
    for (number, item) in result.quiz.iter().enumerate() {
        println!("{}. {}", number + 1, item.question);
        for (letter, option) in ('a'..='z').zip(&item.options) {
            println!("   {}) {}", letter, option.option);
        }
    }
    for path in result.image_path.iter().chain(result.audio_path.iter()) {
        match cache.save(state, path).await {
            Ok(Some(file)) => println!("[saved {}]", file.display()),
            Ok(None) => {}
            Err(e) => warn!(%path, error = %e, "Could not download asset"),
        }
    }
    for notice in &result.notices {
        println!("[{}]", notice);
    }
}

async fn turn(
    state: &AppState,
    session: &mut Session,
    input: Option<&str>,
    cache: &mut AssetCache,
) {
    match state.controller.advance(session, input).await {
        Ok(variant) => {
            let result = state.dispatcher.dispatch(session, variant).await;
            render(&result, state, cache).await;
        }
        Err(failure) => println!("\n{}\n", failure),
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = Config::from_env().context("Failed to load configuration")?;

    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .with_writer(std::io::stderr)
        .init();

    let services = Services::from_config(&config).await?;
    let state = AppState::new(services, SessionDefaults::from(&config));

    let language = args.language.unwrap_or_else(|| config.target_language.clone());
    let mut request = ExerciseRequest::new(args.topic, args.difficulty, language);
    request.user_context = args.context;
    let mut session = Session::new(request, config.budgets);
    info!(session_id = %session.id, "Starting CLI session");

    let mut cache = AssetCache {
        dir: args.output_dir,
        written: HashSet::new(),
    };

    turn(&state, &mut session, None, &mut cache).await;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match line.trim() {
            "" => continue,
            "/quit" => break,
            "/reset" => {
                state.controller.reset(&mut session);
                turn(&state, &mut session, None, &mut cache).await;
            }
            text => turn(&state, &mut session, Some(text), &mut cache).await,
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(1)
        }
    }
}
