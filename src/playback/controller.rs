use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use tokio::{
    sync::Mutex,
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::{error::StoryError, models::Story, settings::ViewerSettings, store::StoryStore};

use super::{
    events::{EventSender, PlaybackEvent, PlaybackSnapshot},
    state::{PlaybackState, Step},
};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info};

/// The one live timer task, tagged with the segment generation it serves.
struct SegmentTicker {
    generation: u64,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl SegmentTicker {
    fn stop(self) {
        self.cancel.cancel();
        self.handle.abort();
    }
}

/// Drives playback of one StorySet at a time.
///
/// Lock order is `state` then `ticker`; the ticker is only touched while the
/// state lock is held, so replacing the timer and moving the position happen
/// as one step from the point of view of any timer callback.
#[derive(Clone)]
pub struct PlaybackController {
    state: Arc<Mutex<PlaybackState>>,
    ticker: Arc<Mutex<Option<SegmentTicker>>>,
    store: StoryStore,
    events: EventSender,
    view_duration: Duration,
    tick_interval: Duration,
}

impl PlaybackController {
    pub fn new(store: StoryStore, settings: &ViewerSettings, events: EventSender) -> Self {
        Self {
            state: Arc::new(Mutex::new(PlaybackState::new())),
            ticker: Arc::new(Mutex::new(None)),
            store,
            events,
            view_duration: settings.view_duration(),
            tick_interval: settings.progress_tick(),
        }
    }

    pub fn store(&self) -> &StoryStore {
        &self.store
    }

    pub async fn snapshot(&self) -> PlaybackSnapshot {
        let mut guard = self.state.lock().await;
        guard.segment.sync(Instant::now());
        PlaybackSnapshot::from(&*guard)
    }

    /// Starts playback of `stories` at `start_index`, replacing any playback
    /// already in progress.
    pub async fn open(&self, stories: Vec<Story>, start_index: usize) -> Result<PlaybackSnapshot> {
        if start_index >= stories.len() {
            return Err(StoryError::InvalidIndex {
                index: start_index,
                len: stories.len(),
            }
            .into());
        }

        let mut state = self.state.lock().await;
        self.cancel_ticker().await;
        let step = state.open(
            stories,
            start_index,
            duration_ms(self.view_duration),
            Instant::now(),
        )?;
        self.apply_step(&mut state, step).await;
        Ok(PlaybackSnapshot::from(&*state))
    }

    pub async fn advance(&self) -> PlaybackSnapshot {
        let mut state = self.state.lock().await;
        let step = state.advance(Instant::now());
        self.apply_step(&mut state, step).await;
        PlaybackSnapshot::from(&*state)
    }

    pub async fn retreat(&self) -> PlaybackSnapshot {
        let mut state = self.state.lock().await;
        let step = state.retreat(Instant::now());
        self.apply_step(&mut state, step).await;
        PlaybackSnapshot::from(&*state)
    }

    /// Deletes the story on screen from the store and from the StorySet.
    /// Returns the deleted id, or `None` when nothing is playing.
    pub async fn delete_current(&self) -> Result<Option<String>> {
        let mut state = self.state.lock().await;
        let Some(story_id) = state.current().map(|story| story.id.clone()) else {
            return Ok(None);
        };

        // A deadline firing meanwhile waits on the state lock. On failure the
        // running segment is left as it was.
        if let Err(err) = self.store.remove(&story_id).await {
            log_error!("Failed to delete story {story_id}: {err:?}");
            return Err(err.context(format!("failed to delete story {story_id}")));
        }

        let (_, step) = state.remove_current(Instant::now());
        log_info!("Deleted story {story_id}; {} left in set", state.stories.len());
        self.emit(PlaybackEvent::StoryDeleted {
            story_id: story_id.clone(),
        });
        self.apply_step(&mut state, step).await;

        Ok(Some(story_id))
    }

    /// Re-synchronizes after `story_id` left the store through another path.
    pub async fn story_removed(&self, story_id: &str) -> PlaybackSnapshot {
        let mut state = self.state.lock().await;
        let step = state.remove_story(story_id, Instant::now());
        if let Step::Reindexed { position } = &step {
            log_debug!("Story {story_id} left the set; current story now at {position}");
        }
        self.apply_step(&mut state, step).await;
        PlaybackSnapshot::from(&*state)
    }

    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        let step = state.close();
        self.apply_step(&mut state, step).await;
        // Nothing may fire after close, even if playback was never opened.
        self.cancel_ticker().await;
    }

    /// Freezes or resumes the visible progress. The advance deadline is not
    /// moved.
    pub async fn set_paused(&self, paused: bool) -> PlaybackSnapshot {
        let mut state = self.state.lock().await;
        state.set_paused(paused, Instant::now());
        log_debug!("Playback paused={paused}");
        PlaybackSnapshot::from(&*state)
    }

    async fn apply_step(&self, state: &mut PlaybackState, step: Step) {
        match step {
            Step::Moved { position, story_id } => {
                self.start_ticker(state).await;
                log_info!(
                    "Showing story {story_id} ({}/{})",
                    position + 1,
                    state.stories.len()
                );
                self.emit(PlaybackEvent::SegmentStarted {
                    position,
                    story_id: story_id.clone(),
                    total_ms: state.segment.total_ms,
                });
                self.record_viewed(state, position, story_id).await;
            }
            Step::Closed => {
                self.cancel_ticker().await;
                log_info!("Playback closed");
                self.emit(PlaybackEvent::Closed);
            }
            Step::Reindexed { .. } | Step::Unchanged => {}
        }
    }

    async fn record_viewed(&self, state: &mut PlaybackState, position: usize, story_id: String) {
        match self
            .store
            .mark_viewed(&story_id)
            .await
            .with_context(|| format!("failed to mark {story_id} viewed"))
        {
            Ok(_) => {
                if let Some(story) = state.stories.get_mut(position) {
                    story.viewed = true;
                }
                self.emit(PlaybackEvent::StoryViewed { story_id });
            }
            Err(err) => log_error!("{err:?}"),
        }
    }

    /// Cancels the outstanding timer before the replacement is spawned.
    async fn start_ticker(&self, state: &PlaybackState) {
        let mut ticker = self.ticker.lock().await;
        if let Some(previous) = ticker.take() {
            previous.stop();
        }
        if let Some(deadline) = state.segment.deadline() {
            *ticker = Some(self.spawn_segment(state.generation, deadline));
        }
    }

    async fn cancel_ticker(&self) {
        if let Some(previous) = self.ticker.lock().await.take() {
            previous.stop();
        }
    }

    fn spawn_segment(&self, generation: u64, deadline: Instant) -> SegmentTicker {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let controller = self.clone();
        let tick_interval = self.tick_interval;

        let handle = tokio::spawn(async move {
            let mut interval = time::interval(tick_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let expiry = time::sleep_until(deadline);
            tokio::pin!(expiry);

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = &mut expiry => {
                        controller.finish_segment(generation).await;
                        break;
                    }
                    _ = interval.tick() => controller.report_progress(generation).await,
                }
            }
        });

        SegmentTicker {
            generation,
            cancel,
            handle,
        }
    }

    async fn report_progress(&self, generation: u64) {
        let mut state = self.state.lock().await;
        if state.generation != generation || !state.is_playing() || state.segment.paused {
            return;
        }
        state.segment.sync(Instant::now());
        let event = PlaybackEvent::Progress {
            position: state.position,
            percent: state.segment.percent(),
        };
        log_debug!("{event:?}");
        self.emit(event);
    }

    /// Deadline reached: show a full bar, then advance exactly once.
    async fn finish_segment(&self, generation: u64) {
        let mut state = self.state.lock().await;
        if state.generation != generation || !state.is_playing() {
            return;
        }

        {
            // This runs on the ticker's own task: release it without aborting.
            let mut ticker = self.ticker.lock().await;
            if ticker.as_ref().is_some_and(|t| t.generation == generation) {
                if let Some(current) = ticker.take() {
                    current.cancel.cancel();
                }
            }
        }

        state.segment.fill();
        self.emit(PlaybackEvent::Progress {
            position: state.position,
            percent: 100.0,
        });

        let step = state.advance(Instant::now());
        self.apply_step(&mut state, step).await;
    }

    fn emit(&self, event: PlaybackEvent) {
        let _ = self.events.send(event);
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::{EncodedImage, ImageEncoding},
        playback::{events, EventReceiver, PlaybackStatus},
        store::StoryBackend,
    };
    use chrono::Utc;

    fn story(id: &str) -> Story {
        Story {
            id: id.into(),
            image: EncodedImage::new(ImageEncoding::Png, Vec::new()),
            created_at: Utc::now(),
            viewed: false,
        }
    }

    /// Store holding `ids` in that order, plus a controller with 5s segments.
    async fn setup(ids: &[&str]) -> (PlaybackController, EventReceiver, Vec<Story>) {
        let store = StoryStore::new(StoryBackend::memory(), "storiesData", chrono::Duration::hours(24));
        for id in ids.iter().rev() {
            store.add(story(id)).await.unwrap();
        }
        let (tx, rx) = events::channel();
        let controller = PlaybackController::new(store.clone(), &ViewerSettings::default(), tx);
        let stories = store.stories().await.unwrap();
        (controller, rx, stories)
    }

    fn drain(rx: &mut EventReceiver) -> Vec<PlaybackEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    #[tokio::test(start_paused = true)]
    async fn open_rejects_invalid_start() {
        let (controller, _rx, stories) = setup(&["a", "b", "c"]).await;

        let err = controller.open(Vec::new(), 0).await.unwrap_err();
        assert!(matches!(
            StoryError::kind(&err),
            Some(StoryError::InvalidIndex { index: 0, len: 0 })
        ));

        let err = controller.open(stories, 3).await.unwrap_err();
        assert!(matches!(
            StoryError::kind(&err),
            Some(StoryError::InvalidIndex { index: 3, len: 3 })
        ));
        assert_eq!(controller.snapshot().await.status, PlaybackStatus::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn open_marks_first_story_viewed() {
        let (controller, mut rx, stories) = setup(&["a", "b"]).await;
        let snapshot = controller.open(stories, 1).await.unwrap();
        assert_eq!(snapshot.current_id(), Some("b"));

        let events = drain(&mut rx);
        assert_eq!(
            events[0],
            PlaybackEvent::SegmentStarted {
                position: 1,
                story_id: "b".into(),
                total_ms: 5_000
            }
        );
        assert!(events.contains(&PlaybackEvent::StoryViewed {
            story_id: "b".into()
        }));

        let stored = controller.store().stories().await.unwrap();
        assert!(!stored[0].viewed);
        assert!(stored[1].viewed);
    }

    #[tokio::test(start_paused = true)]
    async fn auto_advances_once_per_segment_with_full_bar_first() {
        let (controller, mut rx, stories) = setup(&["a", "b", "c"]).await;
        controller.open(stories, 0).await.unwrap();

        time::sleep(ms(4_900)).await;
        assert_eq!(controller.snapshot().await.position, 0);

        time::sleep(ms(200)).await;
        let snapshot = controller.snapshot().await;
        assert_eq!(snapshot.position, 1);
        assert_eq!(snapshot.bar_fills[0], 100.0);

        let events = drain(&mut rx);
        let started = events
            .iter()
            .position(|e| matches!(e, PlaybackEvent::SegmentStarted { position: 1, .. }))
            .expect("second segment started");
        assert_eq!(
            events[started - 1],
            PlaybackEvent::Progress {
                position: 0,
                percent: 100.0
            }
        );
        let starts = events
            .iter()
            .filter(|e| matches!(e, PlaybackEvent::SegmentStarted { .. }))
            .count();
        assert_eq!(starts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn finishing_last_segment_closes_and_goes_quiet() {
        let (controller, mut rx, stories) = setup(&["a", "b"]).await;
        controller.open(stories, 1).await.unwrap();

        time::sleep(ms(5_100)).await;
        assert_eq!(controller.snapshot().await.status, PlaybackStatus::Closed);
        assert_eq!(drain(&mut rx).last(), Some(&PlaybackEvent::Closed));

        time::sleep(ms(20_000)).await;
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn manual_advance_restarts_the_deadline() {
        let (controller, _rx, stories) = setup(&["a", "b", "c"]).await;
        controller.open(stories, 0).await.unwrap();

        time::sleep(ms(3_000)).await;
        assert_eq!(controller.advance().await.position, 1);

        // The first segment's deadline (t=5s) must not fire.
        time::sleep(ms(3_000)).await;
        assert_eq!(controller.snapshot().await.position, 1);

        time::sleep(ms(2_100)).await;
        assert_eq!(controller.snapshot().await.position, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn manual_advance_at_last_story_closes() {
        let (controller, mut rx, stories) = setup(&["a", "b"]).await;
        controller.open(stories, 1).await.unwrap();
        drain(&mut rx);

        let snapshot = controller.advance().await;
        assert_eq!(snapshot.status, PlaybackStatus::Closed);
        assert_eq!(snapshot.current_id(), None);
        assert_eq!(drain(&mut rx), vec![PlaybackEvent::Closed]);
    }

    #[tokio::test(start_paused = true)]
    async fn retreat_at_first_story_keeps_the_running_deadline() {
        let (controller, mut rx, stories) = setup(&["a", "b"]).await;
        controller.open(stories, 0).await.unwrap();

        time::sleep(ms(3_000)).await;
        drain(&mut rx);
        assert_eq!(controller.retreat().await.position, 0);
        assert!(!drain(&mut rx)
            .iter()
            .any(|e| matches!(e, PlaybackEvent::SegmentStarted { .. })));

        time::sleep(ms(2_100)).await;
        assert_eq!(controller.snapshot().await.position, 1);

        assert_eq!(controller.retreat().await.position, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn delete_current_resynchronizes_position_and_store() {
        let (controller, mut rx, stories) = setup(&["A", "B", "C"]).await;
        controller.open(stories, 1).await.unwrap();

        assert_eq!(controller.delete_current().await.unwrap().as_deref(), Some("B"));
        let snapshot = controller.snapshot().await;
        assert_eq!(snapshot.story_ids, ["A", "C"]);
        assert_eq!(snapshot.position, 1);
        assert_eq!(snapshot.current_id(), Some("C"));
        assert!(drain(&mut rx).contains(&PlaybackEvent::StoryDeleted {
            story_id: "B".into()
        }));

        assert_eq!(controller.delete_current().await.unwrap().as_deref(), Some("C"));
        let snapshot = controller.snapshot().await;
        assert_eq!(snapshot.story_ids, ["A"]);
        assert_eq!(snapshot.position, 0);

        assert_eq!(controller.delete_current().await.unwrap().as_deref(), Some("A"));
        assert_eq!(controller.snapshot().await.status, PlaybackStatus::Closed);
        assert!(controller.store().stories().await.unwrap().is_empty());
        assert_eq!(controller.delete_current().await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn delete_tail_clamps_and_restarts_timer() {
        let (controller, _rx, stories) = setup(&["A", "B", "C"]).await;
        controller.open(stories, 2).await.unwrap();

        time::sleep(ms(4_000)).await;
        controller.delete_current().await.unwrap();
        let snapshot = controller.snapshot().await;
        assert_eq!(snapshot.story_ids, ["A", "B"]);
        assert_eq!(snapshot.position, 1);

        // Fresh 5s segment for B.
        time::sleep(ms(4_000)).await;
        assert_eq!(controller.snapshot().await.status, PlaybackStatus::Playing);
        time::sleep(ms(1_100)).await;
        assert_eq!(controller.snapshot().await.status, PlaybackStatus::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn store_edits_do_not_touch_open_story_set() {
        let (controller, _rx, stories) = setup(&["a", "b"]).await;
        controller.open(stories, 1).await.unwrap();

        controller.store().add(story("z")).await.unwrap();
        assert!(controller.store().remove("b").await.unwrap());
        let snapshot = controller.snapshot().await;
        assert_eq!(snapshot.story_ids, ["a", "b"]);
        assert_eq!(snapshot.position, 1);

        // Already gone from the store; the set still drops it.
        assert_eq!(controller.delete_current().await.unwrap().as_deref(), Some("b"));
        let snapshot = controller.snapshot().await;
        assert_eq!(snapshot.story_ids, ["a"]);
        assert_eq!(snapshot.current_id(), Some("a"));

        let stored = controller.store().stories().await.unwrap();
        let stored: Vec<&str> = stored.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(stored, ["z", "a"]);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_delete_leaves_running_segment_alone() {
        let backend = StoryBackend::memory();
        backend.write("storiesData", "{oops".into()).await.unwrap();
        let store = StoryStore::new(backend, "storiesData", chrono::Duration::hours(24));
        let (tx, mut rx) = events::channel();
        let controller = PlaybackController::new(store, &ViewerSettings::default(), tx);

        controller.open(vec![story("a"), story("b")], 0).await.unwrap();
        time::sleep(ms(3_000)).await;
        drain(&mut rx);

        assert!(controller.delete_current().await.is_err());
        let snapshot = controller.snapshot().await;
        assert_eq!(snapshot.story_ids, ["a", "b"]);
        assert_eq!(snapshot.position, 0);
        assert_eq!(snapshot.progress_percent, 60.0);
        assert!(!drain(&mut rx).iter().any(|e| matches!(
            e,
            PlaybackEvent::SegmentStarted { .. } | PlaybackEvent::StoryDeleted { .. }
        )));

        // Original deadline still holds.
        time::sleep(ms(2_100)).await;
        assert_eq!(controller.snapshot().await.current_id(), Some("b"));
    }

    #[tokio::test(start_paused = true)]
    async fn close_cancels_pending_timer() {
        let (controller, mut rx, stories) = setup(&["a", "b"]).await;
        controller.open(stories, 0).await.unwrap();
        time::sleep(ms(1_000)).await;

        controller.close().await;
        drain(&mut rx);
        time::sleep(ms(30_000)).await;

        assert!(drain(&mut rx).is_empty());
        assert_eq!(controller.snapshot().await.status, PlaybackStatus::Closed);
        assert_eq!(controller.advance().await.status, PlaybackStatus::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn pause_freezes_progress_but_not_the_deadline() {
        let (controller, _rx, stories) = setup(&["a", "b"]).await;
        controller.open(stories, 0).await.unwrap();

        time::sleep(ms(1_000)).await;
        let paused = controller.set_paused(true).await;
        assert!(paused.paused);
        assert_eq!(paused.progress_percent, 20.0);

        time::sleep(ms(2_000)).await;
        assert_eq!(controller.snapshot().await.progress_percent, 20.0);

        time::sleep(ms(2_100)).await;
        let snapshot = controller.snapshot().await;
        assert_eq!(snapshot.position, 1);
        assert!(!snapshot.paused);
    }

    #[tokio::test(start_paused = true)]
    async fn external_removal_keeps_current_story_and_deadline() {
        let (controller, _rx, stories) = setup(&["A", "B", "C"]).await;
        controller.open(stories, 1).await.unwrap();
        time::sleep(ms(3_000)).await;

        let snapshot = controller.story_removed("A").await;
        assert_eq!(snapshot.story_ids, ["B", "C"]);
        assert_eq!(snapshot.current_id(), Some("B"));

        time::sleep(ms(2_100)).await;
        assert_eq!(controller.snapshot().await.current_id(), Some("C"));
    }

    #[tokio::test(start_paused = true)]
    async fn reopening_replaces_the_previous_timer() {
        let (controller, mut rx, stories) = setup(&["a", "b", "c"]).await;
        controller.open(stories.clone(), 0).await.unwrap();
        time::sleep(ms(4_000)).await;

        controller.open(stories, 2).await.unwrap();
        drain(&mut rx);

        time::sleep(ms(4_000)).await;
        let snapshot = controller.snapshot().await;
        assert_eq!(snapshot.position, 2);
        assert!(!drain(&mut rx)
            .iter()
            .any(|e| matches!(e, PlaybackEvent::SegmentStarted { .. })));
    }
}
