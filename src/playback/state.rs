use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::{error::StoryError, models::Story};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum PlaybackStatus {
    #[default]
    Idle,
    Playing,
    Closed,
}

/// Timing for the story on screen.
#[derive(Debug, Clone, Default)]
pub struct PlaybackSegment {
    pub total_ms: u64,
    pub elapsed_ms: u64,
    pub paused: bool,
    pub anchor: Option<Instant>,
}

impl PlaybackSegment {
    fn start(total_ms: u64, now: Instant) -> Self {
        Self {
            total_ms,
            elapsed_ms: 0,
            paused: false,
            anchor: Some(now),
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.anchor
            .map(|anchor| anchor + std::time::Duration::from_millis(self.total_ms))
    }

    /// Refreshes `elapsed_ms` from the wall clock. Frozen while paused and
    /// never moves backwards.
    pub fn sync(&mut self, now: Instant) {
        if self.paused {
            return;
        }
        if let Some(anchor) = self.anchor {
            let since = now.saturating_duration_since(anchor).as_millis();
            let since = u64::try_from(since).unwrap_or(u64::MAX).min(self.total_ms);
            self.elapsed_ms = self.elapsed_ms.max(since);
        }
    }

    pub fn fill(&mut self) {
        self.elapsed_ms = self.total_ms;
    }

    pub fn percent(&self) -> f64 {
        if self.total_ms == 0 {
            return 100.0;
        }
        (self.elapsed_ms as f64 * 100.0 / self.total_ms as f64).min(100.0)
    }
}

/// Outcome of a transition, used by the controller to decide on timer work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// A new segment began at `position`.
    Moved { position: usize, story_id: String },
    /// Same story stays current; its index shifted.
    Reindexed { position: usize },
    Unchanged,
    Closed,
}

/// The transient StorySet being played plus its active segment.
#[derive(Debug, Clone, Default)]
pub struct PlaybackState {
    pub status: PlaybackStatus,
    pub stories: Vec<Story>,
    pub position: usize,
    pub segment: PlaybackSegment,
    /// Bumped whenever a segment starts or playback closes. Timer callbacks
    /// carry the generation they were started for and are ignored if stale.
    pub generation: u64,
}

impl PlaybackState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_playing(&self) -> bool {
        self.status == PlaybackStatus::Playing
    }

    pub fn current(&self) -> Option<&Story> {
        if self.is_playing() {
            self.stories.get(self.position)
        } else {
            None
        }
    }

    pub fn open(
        &mut self,
        stories: Vec<Story>,
        start_index: usize,
        total_ms: u64,
        now: Instant,
    ) -> Result<Step, StoryError> {
        if start_index >= stories.len() {
            return Err(StoryError::InvalidIndex {
                index: start_index,
                len: stories.len(),
            });
        }

        self.status = PlaybackStatus::Playing;
        self.stories = stories;
        self.position = start_index;
        self.segment.total_ms = total_ms;
        Ok(self.begin_segment(now))
    }

    pub fn advance(&mut self, now: Instant) -> Step {
        if !self.is_playing() {
            return Step::Unchanged;
        }
        if self.position + 1 < self.stories.len() {
            self.position += 1;
            self.begin_segment(now)
        } else {
            self.close()
        }
    }

    pub fn retreat(&mut self, now: Instant) -> Step {
        if !self.is_playing() || self.position == 0 {
            return Step::Unchanged;
        }
        self.position -= 1;
        self.begin_segment(now)
    }

    /// Drops the story on screen. The viewer stays on the same slot, which now
    /// holds the following story, or the new tail if the tail was removed.
    pub fn remove_current(&mut self, now: Instant) -> (Option<Story>, Step) {
        if !self.is_playing() || self.position >= self.stories.len() {
            return (None, Step::Unchanged);
        }

        let removed = self.stories.remove(self.position);
        if self.stories.is_empty() {
            return (Some(removed), self.close());
        }

        self.position = self.position.min(self.stories.len() - 1);
        (Some(removed), self.begin_segment(now))
    }

    /// Re-synchronizes after `id` disappeared from the underlying collection.
    pub fn remove_story(&mut self, id: &str, now: Instant) -> Step {
        if !self.is_playing() {
            return Step::Unchanged;
        }
        let Some(index) = self.stories.iter().position(|story| story.id == id) else {
            return Step::Unchanged;
        };

        if index == self.position {
            return self.remove_current(now).1;
        }

        self.stories.remove(index);
        if index < self.position {
            self.position -= 1;
        }
        Step::Reindexed {
            position: self.position,
        }
    }

    pub fn close(&mut self) -> Step {
        if !self.is_playing() {
            return Step::Unchanged;
        }
        self.status = PlaybackStatus::Closed;
        self.stories.clear();
        self.position = 0;
        let total_ms = self.segment.total_ms;
        self.segment = PlaybackSegment {
            total_ms,
            ..PlaybackSegment::default()
        };
        self.generation = self.generation.wrapping_add(1);
        Step::Closed
    }

    pub fn set_paused(&mut self, paused: bool, now: Instant) {
        if !self.is_playing() {
            return;
        }
        if paused {
            self.segment.sync(now);
        }
        self.segment.paused = paused;
    }

    /// Fill level for each story's bar: finished, live, or not yet reached.
    pub fn bar_fills(&self) -> Vec<f64> {
        if !self.is_playing() {
            return Vec::new();
        }
        (0..self.stories.len())
            .map(|index| {
                if index < self.position {
                    100.0
                } else if index == self.position {
                    self.segment.percent()
                } else {
                    0.0
                }
            })
            .collect()
    }

    fn begin_segment(&mut self, now: Instant) -> Step {
        self.segment = PlaybackSegment::start(self.segment.total_ms, now);
        self.generation = self.generation.wrapping_add(1);
        Step::Moved {
            position: self.position,
            story_id: self.stories[self.position].id.clone(),
        }
    }
}
