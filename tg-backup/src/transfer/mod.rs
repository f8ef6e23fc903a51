//! Archive delivery: multipart encoding, progress reporting and the Bot API
//! uploader.

pub mod multipart;
pub mod progress;
pub mod progress_reader;
pub mod telegram;

pub use telegram::TelegramUploader;
