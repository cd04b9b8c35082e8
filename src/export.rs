//! # Archive Export Module
//!
//! Raccoglie tutti gli output riusciti in un unico archivio zip.
//!
//! ## Regole:
//! - Disabilitato finché un record non è in stato terminale
//! - Disabilitato senza almeno un record riuscito
//! - Un solo export alla volta (guard RAII sul flag `in_progress`)
//! - Fetch concorrente di tutti i membri: un solo fallimento annulla l'export,
//!   nessun archivio parziale viene prodotto
//! - Nomi entry dal download name, resi univoci con suffisso `-1`, `-2`, ...

use crate::error::{OptimizeError, Result};
use crate::queue::{Queue, SharedQueue};
use crate::transfer::TransformApi;
use bytes::Bytes;
use futures::future::try_join_all;
use std::collections::HashSet;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

#[derive(Debug, Default)]
pub struct ArchiveExporter {
    in_progress: AtomicBool,
}

/// Clears the in-progress flag on drop
struct ExportGuard<'a>(&'a AtomicBool);

impl Drop for ExportGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Make every name unique by suffixing repeats before the extension
pub fn unique_names<I, S>(names: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut taken = HashSet::new();
    let mut out = Vec::new();
    for name in names {
        let name = name.as_ref();
        let (stem, ext) = match name.rfind('.') {
            Some(idx) if idx > 0 => (&name[..idx], &name[idx..]),
            _ => (name, ""),
        };
        let mut candidate = name.to_string();
        let mut n = 1;
        while !taken.insert(candidate.clone()) {
            candidate = format!("{}-{}{}", stem, n, ext);
            n += 1;
        }
        out.push(candidate);
    }
    out
}

/// Build a zip archive from named entries
pub fn build_archive(entries: &[(String, Bytes)]) -> Result<Vec<u8>> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    for (name, bytes) in entries {
        zip.start_file(name.as_str(), options)?;
        zip.write_all(bytes)?;
    }
    Ok(zip.finish()?.into_inner())
}

impl ArchiveExporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.in_progress.load(Ordering::SeqCst)
    }

    pub fn can_export(&self, queue: &Queue) -> bool {
        !self.is_running() && queue.is_settled() && queue.successful().next().is_some()
    }

    fn begin(&self) -> Result<ExportGuard<'_>> {
        self.in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| OptimizeError::Export("an export is already running".to_string()))?;
        Ok(ExportGuard(&self.in_progress))
    }

    /// Fetch every successful output. Fails as a whole if any fetch fails.
    async fn collect(&self, queue: &SharedQueue, api: &dyn TransformApi) -> Result<Vec<(String, Bytes)>> {
        let targets: Vec<(String, String)> = queue.with(|q| {
            if !q.is_settled() {
                return Err(OptimizeError::Export("some files are still being processed".to_string()));
            }
            let targets: Vec<(String, String)> = q
                .successful()
                .filter_map(|r| {
                    let output = r.current.as_ref()?;
                    let name = r.download_name.clone().unwrap_or_else(|| output.file_name.clone());
                    Some((name, output.url.clone()))
                })
                .collect();
            if targets.is_empty() {
                return Err(OptimizeError::Export("there are no optimized files to export".to_string()));
            }
            Ok(targets)
        })?;

        let names = unique_names(targets.iter().map(|(name, _)| name));
        let fetches = targets.iter().zip(names).map(|((original_name, url), name)| async move {
            api.fetch(url)
                .await
                .map(|bytes| (name, bytes))
                .map_err(|e| OptimizeError::Export(format!("could not download {}: {}", original_name, e)))
        });

        try_join_all(fetches).await.map_err(|e| {
            error!("{}", e);
            e
        })
    }

    /// Produce the archive bytes
    pub async fn export(&self, queue: &SharedQueue, api: &dyn TransformApi) -> Result<Vec<u8>> {
        let _guard = self.begin()?;
        let entries = self.collect(queue, api).await?;
        let archive = build_archive(&entries)?;
        info!("Archive built with {} files ({} bytes)", entries.len(), archive.len());
        Ok(archive)
    }

    /// Write the archive to `path`. Returns the number of entries.
    pub async fn export_to_path(&self, queue: &SharedQueue, api: &dyn TransformApi, path: &Path) -> Result<usize> {
        let _guard = self.begin()?;
        let entries = self.collect(queue, api).await?;
        let archive = build_archive(&entries)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, &archive).await?;
        info!("Saved {} files to {}", entries.len(), path.display());
        Ok(entries.len())
    }

    /// Write each output as a separate file into `dir`
    pub async fn save_to_dir(&self, queue: &SharedQueue, api: &dyn TransformApi, dir: &Path) -> Result<Vec<PathBuf>> {
        let _guard = self.begin()?;
        let entries = self.collect(queue, api).await?;
        tokio::fs::create_dir_all(dir).await?;
        let mut written = Vec::with_capacity(entries.len());
        for (name, bytes) in entries {
            let path = dir.join(&name);
            tokio::fs::write(&path, &bytes).await?;
            written.push(path);
        }
        info!("Saved {} optimized files to {}", written.len(), dir.display());
        Ok(written)
    }
}
