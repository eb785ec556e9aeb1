pub mod story;

pub use story::{EncodedImage, ImageEncoding, Story};
