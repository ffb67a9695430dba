mod connection;
pub mod helpers;
mod migrations;
pub mod models;
pub mod repositories;

pub use connection::Database;
pub use models::{CaptureEvent, CaptureOutcome, ImageMetadata, ImageRecord};
pub use repositories::image_records::InsertOutcome;
