//! # Error Types Module
//!
//! Questo modulo definisce tutti i tipi di errore custom della libreria.
//!
//! ## Responsabilità:
//! - Definisce `OptimizeError` enum per categorizzare ogni fallimento della pipeline
//! - Fornisce messaggi leggibili da mostrare direttamente sul record in errore
//! - Integra con `thiserror` per automatic error conversion
//!
//! ## Categorie di errori:
//! - `Link`: Il backend ha rifiutato di emettere uno slot di upload
//! - `Upload`: Trasferimento dei byte fallito (rete o status non-2xx)
//! - `Transform`: Il passo di resize/re-encode del backend è fallito
//! - `Export`: Il fetch di almeno un membro dell'archivio è fallito
//! - `Crop`: Operazione di crop non valida (nessuna sessione, selezione vuota)
//! - `Validation`: Parametri o file non validi
//! - `NotFound`: Record o URL sconosciuto
//!
//! ## Esempio:
//! ```rust,ignore
//! if !response.status().is_success() {
//!     return Err(OptimizeError::Link(format!("status {}", response.status())));
//! }
//! ```

/// Custom error types for the upload/optimize pipeline
#[derive(thiserror::Error, Debug)]
pub enum OptimizeError {
    #[error("Could not get an upload link: {0}")]
    Link(String),

    #[error("Upload failed: {0}")]
    Upload(String),

    #[error("Optimization failed: {0}")]
    Transform(String),

    #[error("Export failed: {0}")]
    Export(String),

    #[error("Crop error: {0}")]
    Crop(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, OptimizeError>;
