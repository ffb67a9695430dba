//! Talking to cameras: the transport trait, its HTTP implementation and
//! the checks applied to what comes back.

pub mod client;
pub mod frame;
pub mod framesize;
pub mod http;

pub use client::{CameraClient, CaptureError, DeviceStatus};
pub use frame::{hash_distance, inspect_frame, InspectedFrame};
pub use http::HttpCameraClient;
