//! Canonical image encoding shared by the classifier and the generative model.
//!
//! Canonical means JPEG, 8-bit RGB, no alpha plane. Transparent sources are
//! flattened onto white using their alpha as the blend mask.

use std::io::Cursor;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use tracing::debug;

use crate::error::{NutritionError, Result};

pub const CANONICAL_FORMAT: ImageFormat = ImageFormat::Jpeg;
pub const CANONICAL_MIME: &str = "image/jpeg";
pub const CANONICAL_EXTENSION: &str = "jpeg";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalImage {
    bytes: Vec<u8>,
    width: u32,
    height: u32,
}

impl CanonicalImage {
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.bytes)
    }

    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", CANONICAL_MIME, self.to_base64())
    }
}

/// Convert arbitrary image bytes into the canonical encoding.
///
/// Input that is already canonical is returned unchanged, so normalizing twice
/// is byte-identical to normalizing once. Canonical is judged on the encoded frame
/// header, since CMYK and YCCK JPEGs also decode to 8-bit RGB.
pub fn normalize(bytes: &[u8]) -> Result<CanonicalImage> {
    let format = image::guess_format(bytes).map_err(|e| NutritionError::ImageDecode {
        message: format!("unrecognized image format: {e}"),
    })?;
    let img = image::load_from_memory_with_format(bytes, format)?;
    let (width, height) = (img.width(), img.height());

    if format == CANONICAL_FORMAT
        && jpeg_components(bytes) == Some(3)
        && matches!(img, DynamicImage::ImageRgb8(_))
    {
        debug!(width, height, "image already canonical");
        return Ok(CanonicalImage {
            bytes: bytes.to_vec(),
            width,
            height,
        });
    }

    debug!(?format, color = ?img.color(), width, height, "normalizing image");
    let rgb = flatten(img);
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(rgb).write_to(&mut out, CANONICAL_FORMAT)?;

    Ok(CanonicalImage {
        bytes: out.into_inner(),
        width,
        height,
    })
}

/// Component count declared by the JPEG frame header (SOFn), if it precedes the
/// first scan.
pub fn jpeg_components(bytes: &[u8]) -> Option<u8> {
    if !bytes.starts_with(&[0xFF, 0xD8]) {
        return None;
    }
    let mut pos = 2;
    while pos + 1 < bytes.len() {
        if bytes[pos] != 0xFF {
            return None;
        }
        let marker = bytes[pos + 1];
        match marker {
            // fill byte before a marker
            0xFF => {
                pos += 1;
                continue;
            }
            0x01 | 0xD0..=0xD7 => {
                pos += 2;
                continue;
            }
            0xD9 | 0xDA => return None,
            _ => {}
        }
        let len = usize::from(u16::from_be_bytes([
            *bytes.get(pos + 2)?,
            *bytes.get(pos + 3)?,
        ]));
        if matches!(marker, 0xC0..=0xCF) && !matches!(marker, 0xC4 | 0xC8 | 0xCC) {
            // Lh(2) P(1) Y(2) X(2) Nf(1)
            return bytes.get(pos + 9).copied();
        }
        pos += 2 + len;
    }
    None
}

/// Drop the alpha plane, compositing onto opaque white when one is present.
pub fn flatten(img: DynamicImage) -> RgbImage {
    if !img.color().has_alpha() {
        return img.into_rgb8();
    }

    let rgba = img.into_rgba8();
    let mut out = RgbImage::new(rgba.width(), rgba.height());
    for (x, y, px) in rgba.enumerate_pixels() {
        let [r, g, b, a] = px.0;
        out.put_pixel(x, y, Rgb([over_white(r, a), over_white(g, a), over_white(b, a)]));
    }
    out
}

fn over_white(channel: u8, alpha: u8) -> u8 {
    let (c, a) = (u32::from(channel), u32::from(alpha));
    ((c * a + 255 * (255 - a) + 127) / 255) as u8
}
