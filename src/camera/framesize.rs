//! ESP32 camera frame size codes as reported by the status endpoint.
//!
//! Indices follow `framesize_t` in esp32-camera's `sensor.h`. Only the
//! sizes the 2MP sensors actually offer are named.

const FRAMESIZES: [&str; 14] = [
    "96X96",
    "QQVGA(160x120)",
    "QCIF(176x144)",
    "HQVGA(240x176)",
    "240X240",
    "QVGA(320x240)",
    "CIF(400x296)",
    "HVGA(480x320)",
    "VGA(640x480)",
    "SVGA(800x600)",
    "XGA(1024x768)",
    "HD(1280x720)",
    "SXGA(1280x1024)",
    "UXGA(1600x1200)",
];

pub fn framesize_label(code: u64) -> String {
    usize::try_from(code)
        .ok()
        .and_then(|index| FRAMESIZES.get(index))
        .map(|label| (*label).to_string())
        .unwrap_or_else(|| format!("framesize #{code}"))
}
