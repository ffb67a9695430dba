pub mod capture_event;
pub mod image_record;

pub use capture_event::{CaptureEvent, CaptureOutcome};
pub use image_record::{ImageMetadata, ImageRecord};
