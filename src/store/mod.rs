//! Durable collection of stories, newest first.
//!
//! The whole list is serialized under one key of the backing resource. Every
//! mutation builds the next list, writes it, and only then swaps it into the
//! in-memory copy, so callers never observe a partially applied change.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::{debug, info};
use tokio::sync::Mutex;

mod backend;

pub use backend::StoryBackend;

use crate::{error::StoryError, models::Story};

#[derive(Clone)]
pub struct StoryStore {
    backend: StoryBackend,
    key: Arc<str>,
    retention: chrono::Duration,
    stories: Arc<Mutex<Option<Vec<Story>>>>,
}

impl StoryStore {
    pub fn new(backend: StoryBackend, key: &str, retention: chrono::Duration) -> Self {
        Self {
            backend,
            key: Arc::from(key),
            retention,
            stories: Arc::new(Mutex::new(None)),
        }
    }

    pub async fn load(&self) -> Result<Vec<Story>> {
        self.load_at(Utc::now()).await
    }

    /// Reads the persisted list and permanently drops stories that are
    /// expired at `now`. Expiry is only evaluated here.
    pub async fn load_at(&self, now: DateTime<Utc>) -> Result<Vec<Story>> {
        let mut guard = self.stories.lock().await;
        let stories = self.read_filtered(now).await?;
        *guard = Some(stories.clone());
        Ok(stories)
    }

    /// Current in-memory list, loading it first if needed.
    pub async fn stories(&self) -> Result<Vec<Story>> {
        let mut guard = self.stories.lock().await;
        if let Some(stories) = guard.as_ref() {
            return Ok(stories.clone());
        }
        let stories = self.read_filtered(Utc::now()).await?;
        *guard = Some(stories.clone());
        Ok(stories)
    }

    pub async fn add(&self, story: Story) -> Result<()> {
        let mut guard = self.stories.lock().await;
        let current = self.current(&mut guard).await?;
        if current.iter().any(|existing| existing.id == story.id) {
            return Err(StoryError::DuplicateId(story.id).into());
        }

        let mut next = Vec::with_capacity(current.len() + 1);
        let id = story.id.clone();
        next.push(story);
        next.extend(current.iter().cloned());

        self.persist(&next).await?;
        *guard = Some(next);
        info!("Added story {id}");
        Ok(())
    }

    /// Returns whether a story was removed. Unknown ids are not an error.
    pub async fn remove(&self, id: &str) -> Result<bool> {
        let mut guard = self.stories.lock().await;
        let current = self.current(&mut guard).await?;
        if !current.iter().any(|story| story.id == id) {
            debug!("remove: story {id} not present");
            return Ok(false);
        }

        let next: Vec<Story> = current.iter().filter(|story| story.id != id).cloned().collect();
        self.persist(&next).await?;
        *guard = Some(next);
        info!("Removed story {id}");
        Ok(true)
    }

    /// Returns whether the flag flipped; repeated calls leave the list untouched.
    pub async fn mark_viewed(&self, id: &str) -> Result<bool> {
        let mut guard = self.stories.lock().await;
        let current = self.current(&mut guard).await?;
        let Some(index) = current.iter().position(|story| story.id == id && !story.viewed) else {
            return Ok(false);
        };

        let mut next = current.clone();
        next[index].viewed = true;
        self.persist(&next).await?;
        *guard = Some(next);
        Ok(true)
    }

    async fn current<'a>(&self, guard: &'a mut Option<Vec<Story>>) -> Result<&'a Vec<Story>> {
        if guard.is_none() {
            *guard = Some(self.read_filtered(Utc::now()).await?);
        }
        let stories: &'a Vec<Story> = guard.get_or_insert_with(Vec::new);
        Ok(stories)
    }

    async fn read_filtered(&self, now: DateTime<Utc>) -> Result<Vec<Story>> {
        let stored: Vec<Story> = match self.backend.read(&self.key).await? {
            Some(raw) => serde_json::from_str(&raw)
                .with_context(|| format!("stored stories under '{}' are malformed", self.key))?,
            None => Vec::new(),
        };

        let total = stored.len();
        let valid: Vec<Story> = stored
            .into_iter()
            .filter(|story| !story.is_expired_at(now, self.retention))
            .collect();

        if valid.len() < total {
            info!("Purged {} expired stories", total - valid.len());
            self.persist(&valid).await?;
        }

        Ok(valid)
    }

    async fn persist(&self, stories: &[Story]) -> Result<()> {
        let serialized = serde_json::to_string(stories).context("failed to serialize stories")?;
        self.backend.write(&self.key, serialized).await
    }
}
