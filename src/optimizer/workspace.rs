//! # Workspace
//!
//! Orchestratore della sessione: possiede coda, pipeline, sessione di crop ed exporter.
//!
//! ## Flusso:
//! 1. **Seed**: `add_files` crea un record per file (scarta quelli oltre il limite)
//! 2. **Optimize all**: un pipeline per ogni record `Ready`, tutti concorrenti
//! 3. **Crop**: `open_crop` -> `crop_mut().set_*` -> `apply_crop` / `cancel_crop`
//! 4. **Compare / Revert**: before/after con regioni coincidenti, ritorno al primo output
//! 5. **Export**: archivio zip di tutti gli output riusciti
//!
//! ## Concorrenza:
//! - Fan-out con `join_all`, completamento non ordinato
//! - Nessun limite di default; `max_concurrency` attiva un semaforo come nel worker pool classico
//! - Nessuna cancellazione una volta emessa una richiesta di transform

use crate::{
    config::Config,
    crop::{encode_crop, rasterize, rasterize_spec, CropController, CropSpec},
    error::{OptimizeError, Result},
    export::ArchiveExporter,
    file_manager::FileManager,
    format::OutputFormat,
    optimizer::pipeline::Pipeline,
    progress::BatchStats,
    queue::{
        Queue, QueueObserver, RecordId, RecordStatus, SeedReport, SharedQueue, SourceFile,
        TransformedOutput,
    },
    transfer::TransformApi,
};
use bytes::Bytes;
use futures::future::join_all;
use image::DynamicImage;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info};

/// Before/after pair with matching regions
#[derive(Debug, Clone)]
pub struct Comparison {
    pub before: DynamicImage,
    pub after: DynamicImage,
}

pub struct Workspace {
    config: Config,
    api: Arc<dyn TransformApi>,
    queue: SharedQueue,
    pipeline: Pipeline,
    crop: CropController,
    exporter: ArchiveExporter,
}

fn cropped_name(original: &str, mime: &str) -> String {
    let stem = Path::new(original)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "image".to_string());
    let ext = if mime == "image/png" { "png" } else { "jpg" };
    format!("{}-cropped.{}", stem, ext)
}

fn decode(bytes: &[u8]) -> Result<DynamicImage> {
    Ok(image::load_from_memory(bytes)?)
}

impl Workspace {
    pub fn new(config: Config, api: Arc<dyn TransformApi>, observer: Arc<dyn QueueObserver>) -> Self {
        let queue = SharedQueue::new(Queue::new(config.max_file_size, observer));
        let pipeline = Pipeline::new(api.clone(), config.clone());
        Self {
            config,
            api,
            queue,
            pipeline,
            crop: CropController::new(),
            exporter: ArchiveExporter::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn queue(&self) -> &SharedQueue {
        &self.queue
    }

    /// Replace the queue with the given files
    pub fn add_files(&mut self, files: Vec<SourceFile>) -> SeedReport {
        self.crop.cancel();
        let report = self.queue.with(|q| q.seed(files));
        info!(
            "Queued {} files ({} rejected over {})",
            report.accepted.len(),
            report.rejected.len(),
            FileManager::format_size(self.config.max_file_size)
        );
        report
    }

    pub fn remove(&mut self, id: &RecordId) -> bool {
        if self.crop.active_record() == Some(id) {
            self.crop.cancel();
        }
        self.queue.with(|q| q.remove(id))
    }

    pub fn reset(&mut self) {
        self.crop.cancel();
        self.queue.with(|q| q.reset());
    }

    /// Transform every `Ready` record concurrently
    pub async fn optimize_all(&self) -> BatchStats {
        let ids = self.queue.with(|q| q.ids_with_status(&RecordStatus::Ready));
        let semaphore = self.config.max_concurrency.map(|n| Arc::new(Semaphore::new(n)));
        info!("Optimizing {} files", ids.len());

        let runs = ids.iter().map(|id| {
            let semaphore = semaphore.clone();
            async move {
                let _permit = match &semaphore {
                    Some(s) => Some(s.clone().acquire_owned().await),
                    None => None,
                };
                let original_size = self
                    .queue
                    .snapshot(id)
                    .map(|r| r.file.size())
                    .unwrap_or_default();
                (original_size, self.transform_record(id).await)
            }
        });

        let mut stats = BatchStats::new();
        for (original_size, result) in join_all(runs).await {
            match result {
                Ok(output) => stats.add_success(original_size, output.size),
                Err(_) => stats.add_error(),
            }
        }
        stats
    }

    async fn transform_record(&self, id: &RecordId) -> Result<TransformedOutput> {
        let record = self
            .queue
            .snapshot(id)
            .ok_or_else(|| OptimizeError::NotFound(format!("record {}", id)))?;
        self.pipeline
            .run(&self.queue, id, record.file, self.config.output_format)
            .await
    }

    /// Run the whole pipeline again for one record
    pub async fn retry(&self, id: &RecordId) -> Result<TransformedOutput> {
        let status = self
            .queue
            .snapshot(id)
            .map(|r| r.status)
            .ok_or_else(|| OptimizeError::NotFound(format!("record {}", id)))?;
        if let RecordStatus::Processing(_) = status {
            return Err(OptimizeError::Validation(format!("record {} is still processing", id)));
        }
        debug!("Retrying {}", id);
        self.transform_record(id).await
    }

    /// Restore the first transform output and forget any crop
    pub fn revert(&self, id: &RecordId) -> Result<()> {
        let found = self.queue.update(id, |record| {
            if let Some(initial) = record.initial.clone() {
                record.download_name = Some(initial.file_name.clone());
                record.current = Some(initial);
                record.crop = None;
                record.status = RecordStatus::Success;
            }
        });
        if found {
            Ok(())
        } else {
            Err(OptimizeError::NotFound(format!("record {}", id)))
        }
    }

    /// Open the crop editor on a record's current output
    pub async fn open_crop(&mut self, id: &RecordId) -> Result<()> {
        let record = self
            .queue
            .snapshot(id)
            .ok_or_else(|| OptimizeError::NotFound(format!("record {}", id)))?;
        let current = record
            .current
            .ok_or_else(|| OptimizeError::Crop(format!("{} has no optimized output yet", record.file.name)))?;

        self.crop.begin(id.clone());
        let loaded = match self.api.fetch(&current.url).await {
            Ok(bytes) => decode(&bytes),
            Err(e) => Err(e),
        };
        match loaded {
            Ok(image) => {
                let mime = FileManager::mime_for_path(Path::new(&current.file_name));
                self.crop.attach(id, image, mime)
            }
            Err(e) => {
                self.crop.cancel();
                Err(e)
            }
        }
    }

    pub fn crop(&self) -> &CropController {
        &self.crop
    }

    pub fn crop_mut(&mut self) -> &mut CropController {
        &mut self.crop
    }

    pub fn cancel_crop(&mut self) {
        self.crop.cancel();
    }

    /// Rasterize the selection and resubmit it through the pipeline
    pub async fn apply_crop(&mut self) -> Result<TransformedOutput> {
        let session = self.crop.take_ready()?;
        let record = self
            .queue
            .snapshot(&session.record)
            .ok_or_else(|| OptimizeError::NotFound(format!("record {}", session.record)))?;

        let region = rasterize(&session.image, session.selection, session.shape)?;
        let (bytes, mime) = encode_crop(&region, session.shape, &session.source_mime)?;
        let format = OutputFormat::from_mime(mime);
        let source = SourceFile::new(cropped_name(&record.file.name, mime), mime, bytes);

        let spec = match record.crop {
            Some(previous) => previous.compose(session.selection, session.dimensions(), session.shape),
            None => CropSpec {
                rect: session.selection,
                shape: session.shape,
                reference: session.dimensions(),
            },
        };
        info!(
            "Cropping {} to {}x{} at ({}, {}) as {:?}",
            record.file.name, spec.rect.width, spec.rect.height, spec.rect.x, spec.rect.y, spec.shape
        );

        let output = self.pipeline.run(&self.queue, &record.id, source, Some(format)).await?;
        self.queue.update(&record.id, |r| r.crop = Some(spec));
        Ok(output)
    }

    /// Before/after images. A stored crop is re-rasterized from the original.
    pub async fn compare(&self, id: &RecordId) -> Result<Comparison> {
        let (record, original) = self
            .queue
            .with(|q| {
                q.get(id).map(|r| {
                    let bytes = q.blobs().get(&r.original_url).cloned();
                    (r.clone(), bytes)
                })
            })
            .ok_or_else(|| OptimizeError::NotFound(format!("record {}", id)))?;
        let original: Bytes = original
            .ok_or_else(|| OptimizeError::NotFound(format!("object url {}", record.original_url)))?;
        let current = record
            .current
            .as_ref()
            .ok_or_else(|| OptimizeError::Validation(format!("{} has no optimized output yet", record.file.name)))?;

        let after_bytes = self.api.fetch(&current.url).await?;
        let original_image = decode(&original)?;
        let before = match &record.crop {
            Some(spec) => rasterize_spec(&original_image, spec)?,
            None => original_image,
        };
        let after = decode(&after_bytes)?;
        Ok(Comparison { before, after })
    }

    pub fn can_export(&self) -> bool {
        self.queue.with(|q| self.exporter.can_export(q))
    }

    /// Bundle every successful output into one zip archive
    pub async fn export_archive(&self) -> Result<Vec<u8>> {
        self.exporter.export(&self.queue, self.api.as_ref()).await
    }

    pub async fn export_to_path(&self, path: &Path) -> Result<usize> {
        self.exporter.export_to_path(&self.queue, self.api.as_ref(), path).await
    }

    /// Write every successful output into `dir` under its download name
    pub async fn save_outputs(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        self.exporter.save_to_dir(&self.queue, self.api.as_ref(), dir).await
    }

    pub fn successful_ids(&self) -> Vec<RecordId> {
        self.queue.with(|q| q.successful().map(|r| r.id.clone()).collect())
    }

    pub fn failed(&self) -> Vec<(String, String)> {
        self.queue.with(|q| {
            q.iter()
                .filter_map(|r| r.error().map(|e| (r.file.name.clone(), e.to_string())))
                .collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crop::{CropRect, CropShape};
    use crate::queue::NoopObserver;
    use crate::transfer::memory::{FailStage, MemoryApi};
    use image::{GenericImageView, ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;

    fn png(w: u32, h: u32) -> Vec<u8> {
        let img = RgbImage::from_fn(w, h, |x, y| Rgb([x as u8, y as u8, 50]));
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img).write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    fn workspace(api: Arc<MemoryApi>) -> Workspace {
        Workspace::new(Config::default(), api, Arc::new(NoopObserver))
    }

    #[tokio::test]
    async fn test_optimize_all_mixed_results() {
        let api = Arc::new(MemoryApi::new());
        api.fail("bad.png", FailStage::Upload);
        let mut ws = workspace(api.clone());
        ws.add_files(vec![
            SourceFile::new("good.png", "image/png", png(10, 10)),
            SourceFile::new("bad.png", "image/png", png(10, 10)),
            SourceFile::new("other.png", "image/png", png(10, 10)),
        ]);

        let stats = ws.optimize_all().await;
        assert_eq!(stats.succeeded, 2);
        assert_eq!(stats.errors, 1);
        assert!(ws.queue().with(|q| q.is_settled()));
        assert_eq!(ws.failed().len(), 1);
        assert_eq!(api.upload_count(), 2);
    }

    #[tokio::test]
    async fn test_concurrency_cap_still_processes_everything() {
        let api = Arc::new(MemoryApi::new());
        let config = Config {
            max_concurrency: Some(1),
            ..Default::default()
        };
        let mut ws = Workspace::new(config, api.clone(), Arc::new(NoopObserver));
        ws.add_files((0..5).map(|i| SourceFile::new(format!("{i}.png"), "image/png", png(4, 4))).collect());
        let stats = ws.optimize_all().await;
        assert_eq!(stats.succeeded, 5);
        assert_eq!(api.transform_count(), 5);
    }

    #[tokio::test]
    async fn test_retry_after_failure() {
        let api = Arc::new(MemoryApi::new());
        api.fail("flaky.png", FailStage::Transform);
        let mut ws = workspace(api.clone());
        let report = ws.add_files(vec![SourceFile::new("flaky.png", "image/png", png(8, 8))]);
        let id = report.accepted[0].clone();

        ws.optimize_all().await;
        assert!(ws.queue().snapshot(&id).unwrap().error().is_some());

        api.clear_failures();
        ws.retry(&id).await.unwrap();
        assert_eq!(ws.queue().snapshot(&id).unwrap().status, RecordStatus::Success);
    }

    #[tokio::test]
    async fn test_revert_without_crop_is_noop() {
        let api = Arc::new(MemoryApi::new());
        let mut ws = workspace(api);
        let report = ws.add_files(vec![SourceFile::new("a.png", "image/png", png(8, 8))]);
        let id = report.accepted[0].clone();
        ws.optimize_all().await;

        let before = ws.queue().snapshot(&id).unwrap();
        assert_eq!(before.current, before.initial);
        ws.revert(&id).unwrap();
        let after = ws.queue().snapshot(&id).unwrap();
        assert_eq!(after.current, after.initial);
        assert_eq!(after.current, before.current);
        assert!(after.crop.is_none());
        assert!(ws.revert(&RecordId::from("missing")).is_err());
    }

    #[tokio::test]
    async fn test_circular_crop_then_compare_and_revert() {
        let api = Arc::new(MemoryApi::new());
        let mut ws = workspace(api);
        let report = ws.add_files(vec![SourceFile::new("photo.jpg", "image/jpeg", png(120, 80))]);
        let id = report.accepted[0].clone();
        ws.optimize_all().await;
        let initial_url = ws.queue().snapshot(&id).unwrap().current.unwrap().url;

        ws.open_crop(&id).await.unwrap();
        ws.crop_mut().set_shape(CropShape::Circle).unwrap();
        ws.crop_mut().set_selection(CropRect::new(10, 10, 50, 60)).unwrap();
        let output = ws.apply_crop().await.unwrap();
        assert!(!ws.crop().is_open());
        assert!(output.file_name.ends_with(".png"));

        let record = ws.queue().snapshot(&id).unwrap();
        let spec = record.crop.unwrap();
        assert_eq!(spec.shape, CropShape::Circle);
        assert_eq!((spec.rect.width, spec.rect.height), (50, 50));
        assert_ne!(record.current_url(), Some(initial_url.as_str()));

        let comparison = ws.compare(&id).await.unwrap();
        assert_eq!(comparison.before.dimensions(), comparison.after.dimensions());
        assert_eq!(comparison.after.dimensions(), (50, 50));

        ws.revert(&id).unwrap();
        let record = ws.queue().snapshot(&id).unwrap();
        assert_eq!(record.current_url(), Some(initial_url.as_str()));
        assert!(record.crop.is_none());
        let comparison = ws.compare(&id).await.unwrap();
        assert_eq!(comparison.before.dimensions(), (120, 80));
    }

    #[tokio::test]
    async fn test_nested_crop_compare_matches() {
        let api = Arc::new(MemoryApi::new());
        let mut ws = workspace(api);
        let report = ws.add_files(vec![SourceFile::new("wide.png", "image/png", png(200, 100))]);
        let id = report.accepted[0].clone();
        ws.optimize_all().await;

        ws.open_crop(&id).await.unwrap();
        ws.crop_mut().set_selection(CropRect::new(20, 10, 100, 80)).unwrap();
        ws.apply_crop().await.unwrap();

        ws.open_crop(&id).await.unwrap();
        ws.crop_mut().set_selection(CropRect::new(10, 10, 40, 30)).unwrap();
        ws.apply_crop().await.unwrap();

        let spec = ws.queue().snapshot(&id).unwrap().crop.unwrap();
        assert_eq!(spec.rect, CropRect::new(30, 20, 40, 30));
        let comparison = ws.compare(&id).await.unwrap();
        assert_eq!(comparison.before.dimensions(), comparison.after.dimensions());
    }

    #[tokio::test]
    async fn test_open_crop_requires_output() {
        let api = Arc::new(MemoryApi::new());
        let mut ws = workspace(api);
        let report = ws.add_files(vec![SourceFile::new("a.png", "image/png", png(8, 8))]);
        let err = ws.open_crop(&report.accepted[0]).await.unwrap_err();
        assert!(matches!(err, OptimizeError::Crop(_)));
        assert!(!ws.crop().is_open());
        assert!(ws.apply_crop().await.is_err());
    }

    #[tokio::test]
    async fn test_remove_closes_crop_on_that_record() {
        let api = Arc::new(MemoryApi::new());
        let mut ws = workspace(api);
        let report = ws.add_files(vec![SourceFile::new("a.png", "image/png", png(8, 8))]);
        let id = report.accepted[0].clone();
        ws.optimize_all().await;
        ws.open_crop(&id).await.unwrap();
        assert!(ws.crop().is_open());

        assert!(ws.remove(&id));
        assert!(!ws.crop().is_open());
        assert_eq!(ws.queue().with(|q| q.blobs().revoked()), 1);
    }

    #[tokio::test]
    async fn test_failed_crop_keeps_record_exportable() {
        let api = Arc::new(MemoryApi::new());
        let mut ws = workspace(api.clone());
        let report = ws.add_files(vec![
            SourceFile::new("a.png", "image/png", png(40, 30)),
            SourceFile::new("b.png", "image/png", png(40, 30)),
        ]);
        let a = report.accepted[0].clone();
        ws.optimize_all().await;
        let before = ws.queue().snapshot(&a).unwrap();

        api.fail("a-cropped.png", FailStage::Transform);
        ws.open_crop(&a).await.unwrap();
        ws.crop_mut().set_selection(CropRect::new(0, 0, 20, 20)).unwrap();
        let err = ws.apply_crop().await.unwrap_err();
        assert!(matches!(err, OptimizeError::Transform(_)));

        let after = ws.queue().snapshot(&a).unwrap();
        assert_eq!(after.status, RecordStatus::Success);
        assert_eq!(after.current, before.current);
        assert_eq!(after.download_name, before.download_name);
        assert!(after.crop.is_none());
        assert!(ws.failed().is_empty());
        assert_eq!(ws.successful_ids().len(), 2);
        assert!(ws.can_export());
        let archive = ws.export_archive().await.unwrap();
        assert_eq!(zip::ZipArchive::new(Cursor::new(archive)).unwrap().len(), 2);

        // a failed retry of a finished record keeps it too
        api.fail("a.png", FailStage::Upload);
        assert!(ws.retry(&a).await.is_err());
        assert_eq!(ws.queue().snapshot(&a).unwrap().current, before.current);
        assert_eq!(ws.successful_ids().len(), 2);
    }

    #[test]
    fn test_cropped_name() {
        assert_eq!(cropped_name("photo.jpeg", "image/jpeg"), "photo-cropped.jpg");
        assert_eq!(cropped_name("logo.webp", "image/png"), "logo-cropped.png");
    }
}
