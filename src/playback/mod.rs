pub mod controller;
pub mod events;
pub mod state;

pub use controller::PlaybackController;
pub use events::{EventReceiver, EventSender, PlaybackEvent, PlaybackSnapshot};
pub use state::{PlaybackState, PlaybackStatus};
