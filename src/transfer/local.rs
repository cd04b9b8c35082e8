//! # Local Backend
//!
//! Backend in-process che replica i due endpoint serverless senza rete.
//!
//! ## Responsabilità:
//! - Emette slot di upload write-once (un secondo upload sullo stesso slot fallisce)
//! - Salva i byte caricati sotto `uploads/` nella directory di lavoro
//! - Il transform consuma lo slot e cancella l'upload grezzo
//! - Esegue un singolo passaggio resize+re-encode con `image`:
//!   ridimensiona per stare nel bounding box (mai upscaling), poi codifica nel formato richiesto
//! - Restituisce un URL `file://` verso l'output in `optimized/`
//!
//! ## Limiti:
//! - HEIC non è codificabile localmente (`Transform` error)
//! - WebP viene scritto lossless, la qualità non si applica
//! - Le varianti favicon hanno lato fisso (32px ICO, 180px PNG)

use super::api::{ProgressCallback, TransformApi, TransformRequest, TransformResponse, UploadSlot};
use crate::error::{OptimizeError, Result};
use crate::format::OutputFormat;
use async_trait::async_trait;
use bytes::Bytes;
use image::codecs::avif::AvifEncoder;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};
use std::collections::HashMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use uuid::Uuid;

const WRITE_CHUNK_SIZE: usize = 64 * 1024;
const AVIF_SPEED: u8 = 8;

#[derive(Debug, Clone)]
enum SlotState {
    Pending { filename: String },
    Uploaded { filename: String, path: PathBuf },
}

pub struct LocalBackend {
    root: PathBuf,
    max_dimension: u32,
    slots: Mutex<HashMap<String, SlotState>>,
    _temp: Option<TempDir>,
}

impl LocalBackend {
    /// Backend rooted at an existing directory
    pub fn new(root: impl Into<PathBuf>, max_dimension: u32) -> Self {
        Self {
            root: root.into(),
            max_dimension,
            slots: Mutex::new(HashMap::new()),
            _temp: None,
        }
    }

    /// Backend rooted at a temporary directory removed on drop
    pub fn temporary(max_dimension: u32) -> Result<Self> {
        let temp = TempDir::new()?;
        let mut backend = Self::new(temp.path(), max_dimension);
        backend._temp = Some(temp);
        Ok(backend)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn slot(&self, key: &str) -> Option<SlotState> {
        self.slots
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn set_slot(&self, key: &str, state: SlotState) {
        self.slots
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(key.to_string(), state);
    }

    fn remove_slot(&self, key: &str) {
        self.slots
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(key);
    }

    /// Slots issued and not yet consumed by a transform
    pub fn open_slots(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }
}

/// Shrink to fit inside a `max`×`max` box, preserving aspect ratio
fn fit_within(image: DynamicImage, max: u32) -> DynamicImage {
    if image.width() <= max && image.height() <= max {
        image
    } else {
        image.resize(max, max, FilterType::Lanczos3)
    }
}

/// Single resize+re-encode pass
pub fn render(bytes: &[u8], format: OutputFormat, quality: u8, max_dimension: u32) -> Result<Vec<u8>> {
    let source = image::load_from_memory(bytes)?;
    let resized = match format.fixed_edge() {
        Some(edge) => source.resize_to_fill(edge, edge, FilterType::Lanczos3),
        None => fit_within(source, max_dimension),
    };

    let mut out = Cursor::new(Vec::new());
    match format {
        OutputFormat::Jpeg => {
            DynamicImage::ImageRgb8(resized.to_rgb8())
                .write_with_encoder(JpegEncoder::new_with_quality(&mut out, quality))?;
        }
        OutputFormat::Png | OutputFormat::FaviconPng => {
            resized.write_to(&mut out, ImageFormat::Png)?;
        }
        OutputFormat::Webp => {
            DynamicImage::ImageRgba8(resized.to_rgba8()).write_to(&mut out, ImageFormat::WebP)?;
        }
        OutputFormat::Avif => {
            DynamicImage::ImageRgba8(resized.to_rgba8())
                .write_with_encoder(AvifEncoder::new_with_speed_quality(&mut out, AVIF_SPEED, quality))?;
        }
        OutputFormat::Ico => {
            DynamicImage::ImageRgba8(resized.to_rgba8()).write_to(&mut out, ImageFormat::Ico)?;
        }
        OutputFormat::Heic => {
            return Err(OptimizeError::Transform(
                "HEIC encoding is not available on the local backend".to_string(),
            ));
        }
    }
    Ok(out.into_inner())
}

fn output_name(filename: &str, format: OutputFormat) -> String {
    let stem = Path::new(filename)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "image".to_string());
    format!("{}.{}", stem, format.extension())
}

#[async_trait]
impl TransformApi for LocalBackend {
    async fn request_upload_slot(&self, filename: &str, mime: &str) -> Result<UploadSlot> {
        if filename.is_empty() {
            return Err(OptimizeError::Link("filename is required".to_string()));
        }
        if !mime.starts_with("image/") {
            return Err(OptimizeError::Link(format!("unsupported file type: {}", mime)));
        }

        let key = format!("uploads/{}-{}", Uuid::new_v4().simple(), filename);
        self.set_slot(
            &key,
            SlotState::Pending {
                filename: filename.to_string(),
            },
        );
        Ok(UploadSlot {
            upload_url: format!("file://{}", self.root.join(&key).display()),
            key,
        })
    }

    async fn upload(
        &self,
        slot: &UploadSlot,
        bytes: Bytes,
        _mime: &str,
        progress: ProgressCallback,
    ) -> Result<()> {
        let filename = match self.slot(&slot.key) {
            Some(SlotState::Pending { filename }) => filename,
            Some(SlotState::Uploaded { .. }) => {
                return Err(OptimizeError::Upload(format!("slot {} was already used", slot.key)));
            }
            None => return Err(OptimizeError::Upload(format!("unknown upload slot {}", slot.key))),
        };

        let path = self.root.join(&slot.key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let total = bytes.len() as u64;
        let mut file = tokio::fs::File::create(&path)
            .await
            .map_err(|e| OptimizeError::Upload(e.to_string()))?;
        let mut sent = 0u64;
        for chunk in bytes.chunks(WRITE_CHUNK_SIZE) {
            file.write_all(chunk)
                .await
                .map_err(|e| OptimizeError::Upload(e.to_string()))?;
            sent += chunk.len() as u64;
            progress(sent, total);
        }
        file.flush().await?;

        self.set_slot(&slot.key, SlotState::Uploaded { filename, path });
        Ok(())
    }

    async fn request_transform(&self, request: &TransformRequest) -> Result<TransformResponse> {
        let (filename, path) = match self.slot(&request.key) {
            Some(SlotState::Uploaded { filename, path }) => (filename, path),
            _ => {
                return Err(OptimizeError::Transform(format!(
                    "no uploaded object for key {}",
                    request.key
                )))
            }
        };

        let format = request.output_format;
        let range = format.quality_range();
        let quality = request.quality.unwrap_or(range.default).clamp(range.min, range.max);
        let raw = tokio::fs::read(&path).await?;
        let max_dimension = self.max_dimension;

        // the slot and its upload are spent once the bytes are read
        self.remove_slot(&request.key);
        if let Err(e) = tokio::fs::remove_file(&path).await {
            debug!("Could not remove upload {}: {}", path.display(), e);
        }

        let encoded = tokio::task::spawn_blocking(move || render(&raw, format, quality, max_dimension))
            .await
            .map_err(|e| OptimizeError::Transform(e.to_string()))?
            .map_err(|e| match e {
                OptimizeError::Transform(_) => e,
                other => OptimizeError::Transform(other.to_string()),
            })?;

        let new_filename = output_name(&filename, format);
        let stored_name = output_name(
            request.key.trim_start_matches("uploads/"),
            format,
        );
        let out_path = self.root.join("optimized").join(stored_name);
        if let Some(parent) = out_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&out_path, &encoded).await?;

        info!(
            "Optimized {} -> {} ({} bytes, {} q{})",
            filename,
            new_filename,
            encoded.len(),
            format,
            quality
        );
        debug!("Local output written to {}", out_path.display());

        Ok(TransformResponse {
            download_url: format!("file://{}", out_path.display()),
            optimized_size: encoded.len() as u64,
            new_filename,
        })
    }

    async fn fetch(&self, url: &str) -> Result<Bytes> {
        let path = url
            .strip_prefix("file://")
            .ok_or_else(|| OptimizeError::NotFound(url.to_string()))?;
        Ok(Bytes::from(tokio::fs::read(path).await?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_fn(width, height, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, 128]));
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img).write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    fn noop_progress() -> ProgressCallback {
        Arc::new(|_, _| {})
    }

    #[test]
    fn test_render_fits_bounding_box() {
        let out = render(&png_bytes(400, 200), OutputFormat::Jpeg, 80, 100).unwrap();
        let decoded = image::load_from_memory(&out).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (100, 50));
    }

    #[test]
    fn test_render_never_upscales() {
        let out = render(&png_bytes(40, 30), OutputFormat::Png, 80, 1000).unwrap();
        let decoded = image::load_from_memory(&out).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (40, 30));
    }

    #[test]
    fn test_render_favicon_is_square() {
        let out = render(&png_bytes(300, 100), OutputFormat::FaviconPng, 100, 2000).unwrap();
        let decoded = image::load_from_memory(&out).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (180, 180));
    }

    #[test]
    fn test_render_heic_unsupported() {
        let err = render(&png_bytes(10, 10), OutputFormat::Heic, 50, 100).unwrap_err();
        assert!(matches!(err, OptimizeError::Transform(_)));
    }

    #[tokio::test]
    async fn test_full_round_trip_and_write_once() {
        let backend = LocalBackend::temporary(64).unwrap();
        let slot = backend.request_upload_slot("photo.png", "image/png").await.unwrap();
        assert!(slot.key.starts_with("uploads/"));

        let last = Arc::new(AtomicU64::new(0));
        let seen = last.clone();
        let progress: ProgressCallback = Arc::new(move |sent, _| seen.store(sent, Ordering::SeqCst));
        let bytes = Bytes::from(png_bytes(128, 128));
        let len = bytes.len() as u64;
        backend.upload(&slot, bytes.clone(), "image/png", progress).await.unwrap();
        assert_eq!(last.load(Ordering::SeqCst), len);

        let second = backend.upload(&slot, bytes, "image/png", noop_progress()).await;
        assert!(matches!(second, Err(OptimizeError::Upload(_))));

        let response = backend
            .request_transform(&TransformRequest {
                key: slot.key.clone(),
                output_format: OutputFormat::Webp,
                quality: None,
            })
            .await
            .unwrap();
        assert_eq!(response.new_filename, "photo.webp");

        let fetched = backend.fetch(&response.download_url).await.unwrap();
        assert_eq!(fetched.len() as u64, response.optimized_size);
        let decoded = image::load_from_memory(&fetched).unwrap();
        assert_eq!(decoded.width(), 64);
    }

    #[tokio::test]
    async fn test_transform_consumes_slot_and_upload() {
        let backend = LocalBackend::temporary(64).unwrap();
        let slot = backend.request_upload_slot("photo.png", "image/png").await.unwrap();
        backend
            .upload(&slot, Bytes::from(png_bytes(16, 16)), "image/png", noop_progress())
            .await
            .unwrap();
        let upload_path = backend.root().join(&slot.key);
        assert!(upload_path.exists());
        assert_eq!(backend.open_slots(), 1);

        let request = TransformRequest {
            key: slot.key.clone(),
            output_format: OutputFormat::Png,
            quality: None,
        };
        let response = backend.request_transform(&request).await.unwrap();
        assert!(!upload_path.exists());
        assert_eq!(backend.open_slots(), 0);
        assert!(backend.fetch(&response.download_url).await.is_ok());

        let again = backend.request_transform(&request).await.unwrap_err();
        assert!(matches!(again, OptimizeError::Transform(_)));
        let reupload = backend
            .upload(&slot, Bytes::from(png_bytes(16, 16)), "image/png", noop_progress())
            .await;
        assert!(matches!(reupload, Err(OptimizeError::Upload(_))));
    }

    #[tokio::test]
    async fn test_transform_without_upload_fails() {
        let backend = LocalBackend::temporary(64).unwrap();
        let slot = backend.request_upload_slot("a.jpg", "image/jpeg").await.unwrap();
        let err = backend
            .request_transform(&TransformRequest {
                key: slot.key,
                output_format: OutputFormat::Jpeg,
                quality: Some(70),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, OptimizeError::Transform(_)));
    }

    #[tokio::test]
    async fn test_rejects_non_image_mime() {
        let backend = LocalBackend::temporary(64).unwrap();
        let err = backend.request_upload_slot("notes.txt", "text/plain").await.unwrap_err();
        assert!(matches!(err, OptimizeError::Link(_)));
    }
}
