pub mod db;
pub mod error;
pub mod ingest;
pub mod models;
pub mod playback;
pub mod reel;
pub mod settings;
pub mod store;
mod utils;

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use db::Database;
use ingest::IngestLimits;
use log::{error, info};
use playback::{EventReceiver, PlaybackController, PlaybackEvent};
use reel::Reel;
use settings::SettingsStore;
use store::{StoryBackend, StoryStore};
use tokio::io::{AsyncBufReadExt, BufReader};

pub use error::StoryError;

const HELP: &str = "\
commands:
  list          show the reel
  add <path>    add an image as a new story
  open <n>      play stories starting at reel entry n
  next | prev   navigate within playback
  delete        delete the story on screen
  close         stop playback
  status        show playback state
  quit";

pub(crate) struct AppState {
    pub(crate) reel: Reel,
    pub(crate) controller: PlaybackController,
}

fn data_dir() -> Result<PathBuf> {
    if let Some(dir) = std::env::var_os("STORIES_DATA_DIR") {
        return Ok(PathBuf::from(dir));
    }
    let base = dirs::data_dir().context("unable to resolve data directory")?;
    Ok(base.join("stories"))
}

pub fn run() {
    // Initialize logging (reads RUST_LOG env var)
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    info!("Stories starting up...");

    let result = tokio::runtime::Runtime::new()
        .context("failed to start tokio runtime")
        .and_then(|runtime| runtime.block_on(run_async()));

    if let Err(err) = result {
        error!("{err:?}");
        std::process::exit(1);
    }
}

async fn run_async() -> Result<()> {
    let app_data_dir = data_dir()?;
    std::fs::create_dir_all(&app_data_dir)
        .with_context(|| format!("failed to create {}", app_data_dir.display()))?;

    let settings_store = SettingsStore::new(app_data_dir.join("settings.json"))?;
    let viewer = settings_store.viewer();

    let database = Database::new(app_data_dir.join("stories.sqlite3"))?;
    let store = StoryStore::new(
        StoryBackend::sqlite(database),
        &viewer.storage_key,
        viewer.retention(),
    );
    let loaded = store.load().await?;
    info!("Loaded {} stories", loaded.len());

    let (events_tx, events_rx) = playback::events::channel();
    let controller = PlaybackController::new(store.clone(), &viewer, events_tx);
    let state = AppState {
        reel: Reel::new(store, controller.clone(), IngestLimits::from(&viewer)),
        controller,
    };

    tokio::spawn(print_events(events_rx));

    println!("{}\n\n{HELP}", state.reel.render().await?);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("failed to read stdin")? {
        match handle_command(&state, line.trim()).await {
            Ok(true) => {}
            Ok(false) => break,
            Err(err) => println!("error: {err:#}"),
        }
    }

    state.controller.close().await;
    info!("Stories shutting down");
    Ok(())
}

/// Returns `false` when the user asked to quit.
async fn handle_command(state: &AppState, line: &str) -> Result<bool> {
    let (command, argument) = match line.split_once(char::is_whitespace) {
        Some((command, rest)) => (command, rest.trim()),
        None => (line, ""),
    };

    match command {
        "" => {}
        "help" => println!("{HELP}"),
        "list" => println!("{}", state.reel.render().await?),
        "add" => {
            if argument.is_empty() {
                return Err(anyhow!("usage: add <path>"));
            }
            match state.reel.add_from_path(Path::new(argument)).await {
                Ok(story) => println!("added {}", story.id),
                Err(err) => match StoryError::kind(&err) {
                    Some(StoryError::Decode(_) | StoryError::Read { .. }) => {
                        println!("Failed to process image. Please try a different one. ({err})")
                    }
                    _ => return Err(err),
                },
            }
        }
        "open" => {
            let nth: usize = argument
                .parse()
                .map_err(|_| anyhow!("usage: open <n>"))?;
            if state.reel.select_nth(nth).await?.is_none() {
                println!("no story at {nth}");
            }
        }
        "next" => {
            state.controller.advance().await;
        }
        "prev" => {
            state.controller.retreat().await;
        }
        "delete" => {
            if state.controller.delete_current().await?.is_none() {
                println!("nothing is playing");
            }
        }
        "close" => state.controller.close().await,
        "status" => {
            let snapshot = state.controller.snapshot().await;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }
        "quit" | "exit" => return Ok(false),
        other => println!("unknown command '{other}'\n{HELP}"),
    }

    Ok(true)
}

async fn print_events(mut events: EventReceiver) {
    while let Some(event) = events.recv().await {
        match event {
            PlaybackEvent::SegmentStarted {
                position, story_id, ..
            } => println!("> story {} ({story_id})", position + 1),
            PlaybackEvent::StoryDeleted { story_id } => println!("> deleted {story_id}"),
            PlaybackEvent::Closed => println!("> closed"),
            PlaybackEvent::Progress { .. } | PlaybackEvent::StoryViewed { .. } => {}
        }
    }
}
