//! # Transform Pipeline
//!
//! Esegue per un singolo file: sanitize -> upload link -> upload -> transform.
//! Ogni confine di fase aggiorna lo stato del record tramite `Queue::update`,
//! che notifica l'observer in modo sincrono.

use crate::{
    config::Config,
    error::Result,
    format::OutputFormat,
    queue::{RecordId, RecordStatus, SharedQueue, SourceFile, Stage, TransformedOutput},
    sanitize::sanitize_filename,
    transfer::{ProgressCallback, TransformApi, TransformRequest},
};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Percentage of bytes saved. Negative when the output grew.
pub fn savings_percent(original_size: u64, optimized_size: u64) -> f64 {
    if original_size == 0 {
        0.0
    } else {
        (original_size as f64 - optimized_size as f64) / original_size as f64 * 100.0
    }
}

fn upload_progress_text(sent: u64, total: u64) -> String {
    let percent = if total == 0 { 100 } else { sent * 100 / total };
    format!("Uploading... {}%", percent)
}

/// Remote transform client for one record at a time
#[derive(Clone)]
pub struct Pipeline {
    api: Arc<dyn TransformApi>,
    config: Config,
}

impl Pipeline {
    pub fn new(api: Arc<dyn TransformApi>, config: Config) -> Self {
        Self { api, config }
    }

    /// Run upload + transform for `source` on behalf of record `id`.
    ///
    /// A record without any output ends in `Error` with the message. A record
    /// that already holds an output stays `Success` with that output and its
    /// format, and the failure is kept as the progress note.
    pub async fn run(
        &self,
        queue: &SharedQueue,
        id: &RecordId,
        source: SourceFile,
        format_override: Option<OutputFormat>,
    ) -> Result<TransformedOutput> {
        let previous_format = queue.snapshot(id).and_then(|r| r.current.is_some().then_some(r.format));
        match self.try_run(queue, id, source, format_override).await {
            Ok(output) => Ok(output),
            Err(e) => {
                let message = e.to_string();
                match previous_format {
                    Some(format) => {
                        warn!("Record {} kept its previous output: {}", id, e);
                        queue.update(id, |record| {
                            record.status = RecordStatus::Success;
                            record.progress = Some(format!("Last attempt failed: {}", message));
                            record.format = format;
                        });
                    }
                    None => {
                        error!("Record {} failed: {}", id, e);
                        queue.update(id, |record| {
                            record.status = RecordStatus::Error(message);
                            record.progress = None;
                        });
                    }
                }
                Err(e)
            }
        }
    }

    async fn try_run(
        &self,
        queue: &SharedQueue,
        id: &RecordId,
        source: SourceFile,
        format_override: Option<OutputFormat>,
    ) -> Result<TransformedOutput> {
        let filename = sanitize_filename(&source.name);
        let format = format_override.unwrap_or_else(|| OutputFormat::from_mime(&source.mime));
        let quality = self.config.quality_for(format);
        debug!("Record {}: {} -> {} (q{})", id, filename, format, quality);

        queue.update(id, |record| {
            record.status = RecordStatus::Processing(Stage::RequestingLink);
            record.progress = Some("Getting upload link...".to_string());
            record.format = Some(format);
        });
        let slot = self.api.request_upload_slot(&filename, &source.mime).await?;

        let total = source.size();
        queue.update(id, |record| {
            record.status = RecordStatus::Processing(Stage::Uploading { sent: 0, total });
            record.progress = Some(upload_progress_text(0, total));
        });
        let progress: ProgressCallback = {
            let queue = queue.clone();
            let id = id.clone();
            Arc::new(move |sent, total| {
                queue.update(&id, |record| {
                    record.status = RecordStatus::Processing(Stage::Uploading { sent, total });
                    record.progress = Some(upload_progress_text(sent, total));
                });
            })
        };
        self.api
            .upload(&slot, source.bytes.clone(), &source.mime, progress)
            .await?;

        queue.update(id, |record| {
            record.status = RecordStatus::Processing(Stage::Transforming);
            record.progress = Some("Optimizing...".to_string());
        });
        let response = self
            .api
            .request_transform(&TransformRequest {
                key: slot.key,
                output_format: format,
                quality: Some(quality),
            })
            .await?;

        let output = TransformedOutput {
            savings_percent: savings_percent(total, response.optimized_size),
            url: response.download_url,
            size: response.optimized_size,
            file_name: response.new_filename,
        };
        info!(
            "{} optimized: {} -> {} bytes ({:.1}% saved)",
            source.name, total, output.size, output.savings_percent
        );

        queue.update(id, |record| {
            record.status = RecordStatus::Success;
            record.progress = None;
            if record.initial.is_none() {
                record.initial = Some(output.clone());
            }
            record.current = Some(output.clone());
            record.download_name = Some(output.file_name.clone());
        });
        Ok(output)
    }
}
