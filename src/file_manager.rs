//! # File Management Module
//!
//! Questo modulo gestisce la discovery delle immagini e il caricamento dei sorgenti.
//!
//! ## Responsabilità:
//! - Discovery ricorsiva di immagini a partire da file e directory
//! - Mappatura estensione -> mime type
//! - Caricamento di un file come `SourceFile` pronto per la coda
//! - Formattazione human-readable delle dimensioni
//!
//! ## Formati supportati:
//! - JPG, JPEG, PNG, WebP, GIF, BMP, TIFF, AVIF, HEIC/HEIF, ICO
//!
//! ## Esempio:
//! ```rust,ignore
//! let paths = FileManager::find_image_files(&[PathBuf::from("photos")])?;
//! for path in paths {
//!     let source = FileManager::load_source(&path).await?;
//! }
//! ```

use crate::error::{OptimizeError, Result};
use crate::queue::SourceFile;
use std::path::{Path, PathBuf};
use tokio::fs;
use walkdir::WalkDir;

/// Manages file operations and discovery
pub struct FileManager;

impl FileManager {
    /// Expand files and directories into the supported images they contain.
    /// Explicit file arguments are kept even with an unknown extension.
    pub fn find_image_files(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();

        for path in paths {
            if path.is_file() {
                files.push(path.clone());
                continue;
            }
            if !path.is_dir() {
                return Err(OptimizeError::NotFound(path.display().to_string()));
            }

            let mut found: Vec<PathBuf> = WalkDir::new(path)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
                .map(|e| e.into_path())
                .filter(|p| Self::is_image(p))
                .collect();
            found.sort();
            files.extend(found);
        }

        Ok(files)
    }

    /// Check if a file is an image
    pub fn is_image(path: &Path) -> bool {
        Self::mime_for_path(path) != "application/octet-stream"
    }

    /// Mime type from the file extension
    pub fn mime_for_path(path: &Path) -> &'static str {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "jpg" | "jpeg" => "image/jpeg",
            "png" => "image/png",
            "webp" => "image/webp",
            "gif" => "image/gif",
            "bmp" => "image/bmp",
            "tif" | "tiff" => "image/tiff",
            "avif" => "image/avif",
            "heic" | "heif" => "image/heic",
            "ico" => "image/x-icon",
            _ => "application/octet-stream",
        }
    }

    /// Read a file into a `SourceFile`
    pub async fn load_source(path: &Path) -> Result<SourceFile> {
        let bytes = fs::read(path).await?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| OptimizeError::Validation(format!("not a file: {}", path.display())))?;
        Ok(SourceFile::new(name, Self::mime_for_path(path), bytes))
    }

    /// Get human-readable file size
    pub fn format_size(size: u64) -> String {
        const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
        let mut size = size as f64;
        let mut unit_index = 0;

        while size >= 1024.0 && unit_index < UNITS.len() - 1 {
            size /= 1024.0;
            unit_index += 1;
        }

        if unit_index == 0 {
            format!("{} {}", size as u64, UNITS[unit_index])
        } else {
            format!("{:.2} {}", size, UNITS[unit_index])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_mime_for_path() {
        assert_eq!(FileManager::mime_for_path(Path::new("a.JPG")), "image/jpeg");
        assert_eq!(FileManager::mime_for_path(Path::new("b.png")), "image/png");
        assert_eq!(FileManager::mime_for_path(Path::new("c.heif")), "image/heic");
        assert_eq!(FileManager::mime_for_path(Path::new("notes.txt")), "application/octet-stream");
        assert!(!FileManager::is_image(Path::new("noext")));
    }

    #[test]
    fn test_find_image_files() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("b.png"), b"x").unwrap();
        std::fs::write(dir.path().join("nested").join("a.jpg"), b"x").unwrap();
        std::fs::write(dir.path().join("readme.md"), b"x").unwrap();
        let explicit = dir.path().join("readme.md");

        let files = FileManager::find_image_files(&[dir.path().to_path_buf(), explicit.clone()]).unwrap();
        assert_eq!(files.len(), 3);
        assert!(files.contains(&explicit));
        assert!(files.iter().any(|p| p.ends_with("nested/a.jpg")));
    }

    #[test]
    fn test_missing_path() {
        let err = FileManager::find_image_files(&[PathBuf::from("/definitely/not/here")]).unwrap_err();
        assert!(matches!(err, OptimizeError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_load_source() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("Photo One.webp");
        std::fs::write(&path, vec![7u8; 12]).unwrap();

        let source = FileManager::load_source(&path).await.unwrap();
        assert_eq!(source.name, "Photo One.webp");
        assert_eq!(source.mime, "image/webp");
        assert_eq!(source.size(), 12);
    }

    #[test]
    fn test_format_size() {
        assert_eq!(FileManager::format_size(512), "512 B");
        assert_eq!(FileManager::format_size(1536), "1.50 KB");
        assert_eq!(FileManager::format_size(10 * 1024 * 1024), "10.00 MB");
    }
}
