//! # Output Formats
//!
//! Insieme fisso dei formati di output riconosciuti dal backend di trasformazione.
//! Ogni formato porta una tripla qualità (default/min/max) usata per inizializzare
//! e validare il controllo qualità.
//!
//! | Formato       | Wire name     | Default | Min | Max |
//! |---------------|---------------|---------|-----|-----|
//! | JPEG          | `jpeg`        | 80      | 10  | 100 |
//! | PNG           | `png`         | 80      | 10  | 100 |
//! | WebP          | `webp`        | 80      | 10  | 100 |
//! | AVIF          | `avif`        | 50      | 10  | 90  |
//! | HEIC          | `heic`        | 50      | 10  | 90  |
//! | Favicon ICO   | `ico`         | 100     | 100 | 100 |
//! | Favicon PNG   | `favicon-png` | 100     | 100 | 100 |

use crate::error::OptimizeError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Output format requested from the transform endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputFormat {
    Jpeg,
    Png,
    Webp,
    Avif,
    Heic,
    Ico,
    FaviconPng,
}

/// Quality control seed for a format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QualityRange {
    pub default: u8,
    pub min: u8,
    pub max: u8,
}

impl QualityRange {
    pub fn contains(&self, quality: u8) -> bool {
        (self.min..=self.max).contains(&quality)
    }
}

impl OutputFormat {
    pub const ALL: [OutputFormat; 7] = [
        OutputFormat::Jpeg,
        OutputFormat::Png,
        OutputFormat::Webp,
        OutputFormat::Avif,
        OutputFormat::Heic,
        OutputFormat::Ico,
        OutputFormat::FaviconPng,
    ];

    /// Name used on the wire (`outputFormat`) and on the command line
    pub fn wire_name(&self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "jpeg",
            OutputFormat::Png => "png",
            OutputFormat::Webp => "webp",
            OutputFormat::Avif => "avif",
            OutputFormat::Heic => "heic",
            OutputFormat::Ico => "ico",
            OutputFormat::FaviconPng => "favicon-png",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "jpg",
            OutputFormat::Png | OutputFormat::FaviconPng => "png",
            OutputFormat::Webp => "webp",
            OutputFormat::Avif => "avif",
            OutputFormat::Heic => "heic",
            OutputFormat::Ico => "ico",
        }
    }

    pub fn mime(&self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "image/jpeg",
            OutputFormat::Png | OutputFormat::FaviconPng => "image/png",
            OutputFormat::Webp => "image/webp",
            OutputFormat::Avif => "image/avif",
            OutputFormat::Heic => "image/heic",
            OutputFormat::Ico => "image/x-icon",
        }
    }

    pub fn quality_range(&self) -> QualityRange {
        match self {
            OutputFormat::Jpeg | OutputFormat::Png | OutputFormat::Webp => QualityRange {
                default: 80,
                min: 10,
                max: 100,
            },
            OutputFormat::Avif | OutputFormat::Heic => QualityRange {
                default: 50,
                min: 10,
                max: 90,
            },
            OutputFormat::Ico | OutputFormat::FaviconPng => QualityRange {
                default: 100,
                min: 100,
                max: 100,
            },
        }
    }

    /// Square edge for favicon variants
    pub fn fixed_edge(&self) -> Option<u32> {
        match self {
            OutputFormat::Ico => Some(32),
            OutputFormat::FaviconPng => Some(180),
            _ => None,
        }
    }

    /// Resolve the format that keeps a source file in its own encoding.
    /// Sources the backend cannot re-encode in kind fall back to JPEG.
    pub fn from_mime(mime: &str) -> OutputFormat {
        match mime.to_ascii_lowercase().as_str() {
            "image/png" => OutputFormat::Png,
            "image/webp" => OutputFormat::Webp,
            "image/avif" => OutputFormat::Avif,
            "image/heic" | "image/heif" => OutputFormat::Heic,
            "image/x-icon" | "image/vnd.microsoft.icon" => OutputFormat::Ico,
            _ => OutputFormat::Jpeg,
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

impl FromStr for OutputFormat {
    type Err = OptimizeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        match lower.as_str() {
            "jpg" => return Ok(OutputFormat::Jpeg),
            "favicon" => return Ok(OutputFormat::Ico),
            _ => {}
        }
        OutputFormat::ALL
            .into_iter()
            .find(|f| f.wire_name() == lower)
            .ok_or_else(|| OptimizeError::UnsupportedFormat(s.to_string()))
    }
}
