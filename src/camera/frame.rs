//! Payload verification and derived metadata.

use image::{DynamicImage, ImageFormat};
use image_hasher::{HashAlg, HasherConfig, ImageHash};
use std::io::Cursor;

use crate::config::Rotation;

use super::client::CaptureError;

/// A decoded-and-checked frame ready to be stored.
#[derive(Debug, Clone)]
pub struct InspectedFrame {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub content_hash: String,
}

/// Verifies that `bytes` decode as an image, applies the device rotation
/// and computes a perceptual hash of what will be stored.
///
/// Undecodable payloads are a protocol failure: the device answered 200
/// with something that is not a frame.
pub fn inspect_frame(
    bytes: Vec<u8>,
    rotation: Option<Rotation>,
) -> Result<InspectedFrame, CaptureError> {
    let img = image::load_from_memory(&bytes).map_err(|err| {
        CaptureError::ProtocolError(format!("payload is not a decodable image: {err}"))
    })?;

    let (img, bytes) = match rotation {
        None => (img, bytes),
        Some(rotation) => {
            let rotated = match rotation {
                Rotation::Deg90 => img.rotate90(),
                Rotation::Deg180 => img.rotate180(),
                Rotation::Deg270 => img.rotate270(),
            };
            // JPEG has no alpha channel.
            let rotated = DynamicImage::ImageRgb8(rotated.to_rgb8());
            let mut encoded = Vec::new();
            rotated
                .write_to(&mut Cursor::new(&mut encoded), ImageFormat::Jpeg)
                .map_err(|err| {
                    CaptureError::ProtocolError(format!("failed to re-encode rotated frame: {err}"))
                })?;
            (rotated, encoded)
        }
    };

    Ok(InspectedFrame {
        width: img.width(),
        height: img.height(),
        content_hash: compute_phash(&img),
        bytes,
    })
}

pub fn compute_phash(img: &DynamicImage) -> String {
    let hasher = HasherConfig::new()
        .hash_alg(HashAlg::DoubleGradient)
        .hash_size(8, 8)
        .to_hasher();
    hasher.hash_image(img).to_base64()
}

/// Hamming distance between two base64 hashes; unparsable input is "very
/// different".
pub fn hash_distance(lhs: &str, rhs: &str) -> u32 {
    let Ok(h1) = ImageHash::<Vec<u8>>::from_base64(lhs) else {
        return u32::MAX;
    };
    let Ok(h2) = ImageHash::<Vec<u8>>::from_base64(rhs) else {
        return u32::MAX;
    };
    h1.dist(&h2)
}
