//! # Crop Module
//!
//! Crop e confronto before/after sugli output trasformati.
//!
//! ## Responsabilità:
//! - `CropRect` / `CropShape` / `CropSpec`: geometria della selezione e sua memoria sul record
//! - `rasterize`: ritaglia la regione selezionata, con clip circolare opzionale
//! - `encode_crop`: PNG per crop circolari o sorgenti PNG, altrimenti JPEG
//! - `session`: macchina a stati della sessione di crop (al massimo una attiva)
//!
//! ## Coordinate:
//! Il `CropSpec` salvato sul record è sempre espresso nello spazio del primo output
//! trasformato su cui è stato disegnato (`reference`). Crop successivi vengono composti
//! in quello stesso spazio, così il "before" ricostruito dall'originale combacia sempre.

pub mod session;

pub use session::{CropController, CropSession, CropState};

use crate::error::{OptimizeError, Result};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageFormat, Rgba};
use serde::Serialize;
use std::io::Cursor;
use std::str::FromStr;

const JPEG_CROP_QUALITY: u8 = 92;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl CropRect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    pub fn full(width: u32, height: u32) -> Self {
        Self::new(0, 0, width, height)
    }

    /// Clamp into a `width`×`height` image. `None` when nothing is left.
    pub fn clamp_to(self, width: u32, height: u32) -> Option<CropRect> {
        if self.x >= width || self.y >= height {
            return None;
        }
        let w = self.width.min(width - self.x);
        let h = self.height.min(height - self.y);
        if w == 0 || h == 0 {
            return None;
        }
        Some(CropRect::new(self.x, self.y, w, h))
    }

    /// Largest square centred on this rectangle
    pub fn squared(self) -> CropRect {
        let side = self.width.min(self.height);
        CropRect::new(
            self.x + (self.width - side) / 2,
            self.y + (self.height - side) / 2,
            side,
            side,
        )
    }

    /// Map from an image of size `from` onto one of size `to`
    pub fn scale(self, from: (u32, u32), to: (u32, u32)) -> CropRect {
        if from == to || from.0 == 0 || from.1 == 0 {
            return self;
        }
        let sx = to.0 as f64 / from.0 as f64;
        let sy = to.1 as f64 / from.1 as f64;
        CropRect::new(
            (self.x as f64 * sx).round() as u32,
            (self.y as f64 * sy).round() as u32,
            ((self.width as f64 * sx).round() as u32).max(1),
            ((self.height as f64 * sy).round() as u32).max(1),
        )
    }

    /// Map a rectangle drawn on `reference` back onto `original`, where
    /// `reference` is `original` scaled to cover it and centre-cropped.
    /// A fit-within resize is the case where nothing was cropped.
    pub fn uncover(self, reference: (u32, u32), original: (u32, u32)) -> CropRect {
        if reference == original || reference.0 == 0 || reference.1 == 0 || original.0 == 0 || original.1 == 0 {
            return self;
        }
        let (ow, oh) = (original.0 as f64, original.1 as f64);
        let (rw, rh) = (reference.0 as f64, reference.1 as f64);
        let scale = (rw / ow).max(rh / oh);
        let offset_x = (ow * scale - rw) / 2.0;
        let offset_y = (oh * scale - rh) / 2.0;
        CropRect::new(
            ((self.x as f64 + offset_x) / scale).round() as u32,
            ((self.y as f64 + offset_y) / scale).round() as u32,
            ((self.width as f64 / scale).round() as u32).max(1),
            ((self.height as f64 / scale).round() as u32).max(1),
        )
    }
}

impl FromStr for CropRect {
    type Err = OptimizeError;

    /// Parses `x,y,width,height`
    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<u32> = s
            .split(',')
            .map(|p| p.trim().parse::<u32>())
            .collect::<std::result::Result<_, _>>()
            .map_err(|_| OptimizeError::Validation(format!("invalid crop rectangle: {}", s)))?;
        match parts.as_slice() {
            [x, y, w, h] if *w > 0 && *h > 0 => Ok(CropRect::new(*x, *y, *w, *h)),
            _ => Err(OptimizeError::Validation(format!(
                "crop rectangle must be x,y,width,height with a non-zero size: {}",
                s
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CropShape {
    #[default]
    Rectangle,
    /// Locked 1:1, clipped to the inscribed circle
    Circle,
}

/// Crop remembered on a record for before/after reconstruction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CropSpec {
    pub rect: CropRect,
    pub shape: CropShape,
    /// Dimensions of the transformed image `rect` was drawn on
    pub reference: (u32, u32),
}

impl CropSpec {
    /// Crop a region of an image that already shows this crop. `inner` is in the
    /// coordinates of that image, which measures `shown` pixels.
    pub fn compose(&self, inner: CropRect, shown: (u32, u32), shape: CropShape) -> CropSpec {
        let mapped = inner.scale(shown, (self.rect.width, self.rect.height));
        CropSpec {
            rect: CropRect::new(
                self.rect.x + mapped.x,
                self.rect.y + mapped.y,
                mapped.width.min(self.rect.width.saturating_sub(mapped.x)).max(1),
                mapped.height.min(self.rect.height.saturating_sub(mapped.y)).max(1),
            ),
            shape,
            reference: self.reference,
        }
    }
}

/// Clear every pixel outside the circle inscribed in the image
fn clip_circle(image: DynamicImage) -> DynamicImage {
    let mut rgba = image.to_rgba8();
    let (w, h) = rgba.dimensions();
    let cx = w as f64 / 2.0;
    let cy = h as f64 / 2.0;
    let r = w.min(h) as f64 / 2.0;
    for (x, y, pixel) in rgba.enumerate_pixels_mut() {
        let dx = x as f64 + 0.5 - cx;
        let dy = y as f64 + 0.5 - cy;
        if dx * dx + dy * dy > r * r {
            *pixel = Rgba([0, 0, 0, 0]);
        }
    }
    DynamicImage::ImageRgba8(rgba)
}

/// Rasterize the selected region, optionally clipped to a circle
pub fn rasterize(image: &DynamicImage, rect: CropRect, shape: CropShape) -> Result<DynamicImage> {
    let (w, h) = image.dimensions();
    let rect = rect
        .clamp_to(w, h)
        .ok_or_else(|| OptimizeError::Crop(format!("selection lies outside the {}x{} image", w, h)))?;
    let cropped = image.crop_imm(rect.x, rect.y, rect.width, rect.height);
    Ok(match shape {
        CropShape::Rectangle => cropped,
        CropShape::Circle => clip_circle(cropped),
    })
}

/// Rasterize `spec` from an image of arbitrary size, resampled to the rectangle's own size
pub fn rasterize_spec(image: &DynamicImage, spec: &CropSpec) -> Result<DynamicImage> {
    let rect = spec.rect.uncover(spec.reference, image.dimensions());
    let cropped = rasterize(image, rect, CropShape::Rectangle)?;
    let sized = if cropped.dimensions() == (spec.rect.width, spec.rect.height) {
        cropped
    } else {
        cropped.resize_exact(spec.rect.width, spec.rect.height, FilterType::Lanczos3)
    };
    Ok(match spec.shape {
        CropShape::Rectangle => sized,
        CropShape::Circle => clip_circle(sized),
    })
}

/// Encode a crop. Returns the bytes and their mime type.
pub fn encode_crop(image: &DynamicImage, shape: CropShape, source_mime: &str) -> Result<(Vec<u8>, &'static str)> {
    let mut out = Cursor::new(Vec::new());
    if shape == CropShape::Circle || source_mime.eq_ignore_ascii_case("image/png") {
        image.write_to(&mut out, ImageFormat::Png)?;
        Ok((out.into_inner(), "image/png"))
    } else {
        DynamicImage::ImageRgb8(image.to_rgb8())
            .write_with_encoder(JpegEncoder::new_with_quality(&mut out, JPEG_CROP_QUALITY))?;
        Ok((out.into_inner(), "image/jpeg"))
    }
}
