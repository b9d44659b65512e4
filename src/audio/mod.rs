//! Audio context: PCM helpers, the recent-turn window, and uploaded clips.

pub mod history;
pub mod pcm;
pub mod upload;

pub use history::{AudioClip, AudioHistory};
pub use upload::UploadedContext;
