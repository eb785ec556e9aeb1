use std::path::Path;

use anyhow::Result;
use chrono::{DateTime, Local, Utc};
use crate::{
    ingest::{ingest_file, IngestLimits},
    models::Story,
    playback::{PlaybackController, PlaybackSnapshot},
    store::StoryStore,
};

const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReelEntry {
    Add,
    Story {
        index: usize,
        id: String,
        viewed: bool,
        created_at: DateTime<Utc>,
    },
}

/// Entry point list: one "add" entry followed by every stored story.
#[derive(Clone)]
pub struct Reel {
    store: StoryStore,
    controller: PlaybackController,
    limits: IngestLimits,
}

impl Reel {
    pub fn new(store: StoryStore, controller: PlaybackController, limits: IngestLimits) -> Self {
        Self {
            store,
            controller,
            limits,
        }
    }

    pub async fn entries(&self) -> Result<Vec<ReelEntry>> {
        let stories = self.store.stories().await?;
        let mut entries = Vec::with_capacity(stories.len() + 1);
        entries.push(ReelEntry::Add);
        entries.extend(stories.into_iter().enumerate().map(|(index, story)| ReelEntry::Story {
            index,
            id: story.id,
            viewed: story.viewed,
            created_at: story.created_at,
        }));
        Ok(entries)
    }

    pub async fn render(&self) -> Result<String> {
        let lines: Vec<String> = self
            .entries()
            .await?
            .iter()
            .map(|entry| match entry {
                ReelEntry::Add => "[+] Add Story".to_string(),
                ReelEntry::Story {
                    index,
                    viewed,
                    created_at,
                    ..
                } => format!(
                    "[{}] Your Story {} {}",
                    index + 1,
                    created_at.with_timezone(&Local).format("%H:%M"),
                    if *viewed { "(seen)" } else { "(new)" }
                ),
            })
            .collect();
        Ok(lines.join("\n"))
    }

    /// Opens playback of every story, starting at `story_id`. Unknown ids do
    /// nothing and return `None`.
    pub async fn select(&self, story_id: &str) -> Result<Option<PlaybackSnapshot>> {
        let stories = self.store.stories().await?;
        let Some(start_index) = stories.iter().position(|story| story.id == story_id) else {
            log_warn!("select: story {story_id} not in reel");
            return Ok(None);
        };

        self.store.mark_viewed(story_id).await?;
        // Playback gets its own copy so later store edits don't disturb it.
        let snapshot = self.controller.open(stories, start_index).await?;
        Ok(Some(snapshot))
    }

    /// Selects by 1-based reel position, as shown by `render`.
    pub async fn select_nth(&self, nth: usize) -> Result<Option<PlaybackSnapshot>> {
        let stories = self.store.stories().await?;
        match nth.checked_sub(1).and_then(|index| stories.get(index)) {
            Some(story) => self.select(&story.id).await,
            None => {
                log_warn!("select: no story at reel position {nth}");
                Ok(None)
            }
        }
    }

    /// Ingests the file and stores it as the newest story. Nothing is stored
    /// if ingest fails.
    pub async fn add_from_path(&self, path: &Path) -> Result<Story> {
        let image = ingest_file(path, self.limits).await?;
        let story = Story::new(image, Utc::now());
        self.store.add(story.clone()).await?;
        log_info!("New story {} from {}", story.id, path.display());
        Ok(story)
    }

    /// Removes a story from the store and lets playback re-synchronize.
    pub async fn remove(&self, story_id: &str) -> Result<bool> {
        let removed = self.store.remove(story_id).await?;
        if removed {
            self.controller.story_removed(story_id).await;
        }
        Ok(removed)
    }
}
