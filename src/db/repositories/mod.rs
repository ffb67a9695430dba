pub mod capture_events;
pub mod image_records;
