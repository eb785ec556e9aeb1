use serde::Serialize;
use tokio::sync::mpsc;

use super::state::{PlaybackState, PlaybackStatus};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PlaybackEvent {
    #[serde(rename_all = "camelCase")]
    SegmentStarted {
        position: usize,
        story_id: String,
        total_ms: u64,
    },
    Progress {
        position: usize,
        percent: f64,
    },
    #[serde(rename_all = "camelCase")]
    StoryViewed { story_id: String },
    #[serde(rename_all = "camelCase")]
    StoryDeleted { story_id: String },
    Closed,
}

pub type EventSender = mpsc::UnboundedSender<PlaybackEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<PlaybackEvent>;

pub fn channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackSnapshot {
    pub status: PlaybackStatus,
    pub position: usize,
    pub story_ids: Vec<String>,
    pub progress_percent: f64,
    pub paused: bool,
    pub bar_fills: Vec<f64>,
}

impl From<&PlaybackState> for PlaybackSnapshot {
    fn from(state: &PlaybackState) -> Self {
        Self {
            status: state.status,
            position: state.position,
            story_ids: state.stories.iter().map(|story| story.id.clone()).collect(),
            progress_percent: if state.is_playing() {
                state.segment.percent()
            } else {
                0.0
            },
            paused: state.segment.paused,
            bar_fills: state.bar_fills(),
        }
    }
}

impl PlaybackSnapshot {
    pub fn current_id(&self) -> Option<&str> {
        if self.status == PlaybackStatus::Playing {
            self.story_ids.get(self.position).map(String::as_str)
        } else {
            None
        }
    }
}
